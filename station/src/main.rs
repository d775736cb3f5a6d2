// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command-line test station.
//!
//! Opens the USB fixture, runs one programming script on a worker thread,
//! and renders the verdict. Ctrl-C flips the cancel token; the script
//! notices at its next operation boundary and any blocked HID read aborts.

mod presenter;
mod script;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use drv_fixture_hid::{CancelToken, PRODUCT_ID, VENDOR_ID};
use static_assertions::const_assert_eq;

use presenter::{ConsolePresenter, Presenter, Severity};
use script::{Fixture, ProgramScript, Status};

/// Program and verify firmware on a device under test.
#[derive(Debug, Parser)]
#[clap(name = "station", max_term_width = 80)]
struct Args {
    /// Resource root(s) holding flasher/<mcu>.elf and firmware/<name>.elf;
    /// searched in order, first match wins.
    #[clap(long = "root", required = true)]
    roots: Vec<PathBuf>,

    /// Flasher agent to load (flasher/<MCU>.elf).
    #[clap(long, default_value = "nRF5340")]
    mcu: String,

    /// Firmware to program (firmware/<NAME>.elf).
    #[clap(long, default_value = "firmware")]
    firmware: String,

    /// Access port id for the target core's AHB-AP.
    #[clap(long, default_value_t = 0)]
    access_port: u32,

    /// Stage chunks over SWD instead of the fixture's storage cache.
    #[clap(long)]
    direct: bool,

    /// RPC completion deadline, in seconds.
    #[clap(long, default_value_t = 1.0)]
    timeout: f64,

    /// List the fixture file system and exit.
    #[clap(long)]
    list: bool,

    /// Override the fixture's USB vendor id.
    #[clap(long, parse(try_from_str = parse_id), default_value = "0483")]
    vendor_id: u16,

    /// Override the fixture's USB product id.
    #[clap(long, parse(try_from_str = parse_id), default_value = "5710")]
    product_id: u16,
}

fn parse_id(text: &str) -> Result<u16, std::num::ParseIntError> {
    u16::from_str_radix(text.trim_start_matches("0x"), 16)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!("Cancelling...");
            cancel.cancel();
        })
        .context("installing the Ctrl-C handler")?;
    }

    let presenter = Arc::new(ConsolePresenter::new(cancel.clone()));
    presenter.log("Running...", Severity::Information);

    let script = ProgramScript {
        bundle: elf_image::Bundle::new(args.roots.clone()),
        mcu: args.mcu.clone(),
        firmware_name: args.firmware.clone(),
        access_port: args.access_port,
        use_storage: !args.direct,
        rpc_timeout: Duration::from_secs_f64(args.timeout),
        cancel: cancel.clone(),
    };

    let worker = {
        let presenter = Arc::clone(&presenter);
        let list_only = args.list;
        let (vendor_id, product_id) = (args.vendor_id, args.product_id);
        std::thread::spawn(move || {
            let mut fixture =
                match Fixture::open(presenter.as_ref(), cancel, vendor_id, product_id) {
                    Ok(fixture) => fixture,
                    Err(error) => {
                        presenter.log(&format!("{error:#}"), Severity::Fail);
                        return Status::Exception;
                    }
                };
            if list_only {
                fixture.log_entries(presenter.as_ref());
                return Status::Pass;
            }
            script.run(presenter.as_ref(), &mut fixture)
        })
    };

    let status = worker
        .join()
        .unwrap_or(Status::Exception);

    match status {
        Status::Pass => presenter.log("Pass", Severity::Pass),
        Status::Fail => presenter.log("Fail!", Severity::Fail),
        Status::Cancelled => presenter.log("Script cancelled!", Severity::Fail),
        Status::Exception => presenter.log("Script exception!", Severity::Fail),
    }
    if status != Status::Pass {
        std::process::exit(1);
    }
    Ok(())
}

// The clap default strings above must stay in sync with the transport's
// constants.
const_assert_eq!(VENDOR_ID, 0x0483);
const_assert_eq!(PRODUCT_ID, 0x5710);
