// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test scripts and the fixture they run against.
//!
//! A script runs once per press of Start, on a dedicated worker thread.
//! All fixture I/O is sequential and blocking; the script polls the
//! presenter's cancel flag between operations and lets the transport's
//! cancel token abort any read it is blocked in. On cancel the fixture is
//! left as-is; the next run starts from discovery anyway.

use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context};
use drv_fixture_hid::{CancelToken, HidTransport};
use drv_flasher::{Flasher, Staging};
use drv_instruments::{
    Indicator, InstrumentBus, InstrumentKind, Inventory, SerialWire, Storage, StorageMedium,
    FIXTURE_CAPACITY,
};
use drv_swd_rpc::TargetCore;
use elf_image::{Bundle, FirmwareImage};
use flashfs::FileSystem;

use crate::presenter::{Presenter, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Fail,
    Pass,
    Cancelled,
    Exception,
}

/// The opened fixture: bus, discovered instruments, and the scanned file
/// system on its storage chip.
pub struct Fixture {
    pub bus: InstrumentBus,
    pub inventory: Inventory,
    pub indicator: Indicator,
    pub storage: Storage,
    pub serial_wire: SerialWire,
    pub file_system: FileSystem,
}

fn first_instrument<T: Copy>(
    inventory: &Inventory,
    pick: impl Fn(&InstrumentKind) -> Option<T>,
    what: &str,
) -> anyhow::Result<T> {
    inventory
        .iter()
        .find_map(|(_, kind)| pick(kind))
        .ok_or_else(|| anyhow!("fixture has no {what} instrument"))
}

impl Fixture {
    pub fn open(
        presenter: &dyn Presenter,
        cancel: CancelToken,
        vendor_id: u16,
        product_id: u16,
    ) -> anyhow::Result<Self> {
        let transport = HidTransport::open_device(vendor_id, product_id, cancel)
            .context("opening fixture")?;
        let mut bus = InstrumentBus::new(Box::new(transport));
        let inventory = bus.discover().context("discovering instruments")?;
        for (identifier, kind) in inventory.iter() {
            log::debug!("instrument {identifier}: {}", kind.category());
        }

        let indicator = first_instrument(
            &inventory,
            |kind| match kind {
                InstrumentKind::Indicator(facade) => Some(*facade),
                _ => None,
            },
            "indicator",
        )?;
        let storage = first_instrument(
            &inventory,
            |kind| match kind {
                InstrumentKind::Storage(facade) => Some(*facade),
                _ => None,
            },
            "storage",
        )?;
        let serial_wire = first_instrument(
            &inventory,
            |kind| match kind {
                InstrumentKind::SerialWire(facade) => Some(*facade),
                _ => None,
            },
            "serial-wire",
        )?;

        presenter.log("Inspecting file system...", Severity::Information);
        let mut file_system = FileSystem::new(FIXTURE_CAPACITY);
        let mut medium = StorageMedium::new(&mut bus, storage);
        file_system.scan(&mut medium).context("scanning file system")?;

        Ok(Self {
            bus,
            inventory,
            indicator,
            storage,
            serial_wire,
            file_system,
        })
    }

    pub fn log_entries(&self, presenter: &dyn Presenter) {
        presenter.log("File system entries:", Severity::Information);
        for entry in self.file_system.list() {
            presenter.log(
                &format!("  {} {} (date {})", entry.name, entry.length, entry.date),
                Severity::Information,
            );
        }
    }
}

/// Program and verify one DUT.
pub struct ProgramScript {
    pub bundle: Bundle,
    pub mcu: String,
    pub firmware_name: String,
    pub access_port: u32,
    /// Stage chunks through the fixture's storage cache.
    pub use_storage: bool,
    pub rpc_timeout: Duration,
    pub cancel: CancelToken,
}

impl ProgramScript {
    pub fn run(&self, presenter: &dyn Presenter, fixture: &mut Fixture) -> Status {
        let status = match self.main(presenter, fixture) {
            Ok(()) => Status::Pass,
            Err(_) if presenter.is_cancelling() => Status::Cancelled,
            Err(error) => {
                presenter.log(&format!("{error:#}"), Severity::Fail);
                Status::Exception
            }
        };
        presenter.script_completed();
        status
    }

    fn check_cancel(&self, presenter: &dyn Presenter) -> anyhow::Result<()> {
        if presenter.is_cancelling() {
            Err(anyhow!("cancelled"))
        } else {
            Ok(())
        }
    }

    fn main(&self, presenter: &dyn Presenter, fixture: &mut Fixture) -> anyhow::Result<()> {
        fixture.indicator.set(&mut fixture.bus, 1.0, 0.0, 0.0)?;
        fixture.log_entries(presenter);

        let flasher_path = self
            .bundle
            .resource(format!("flasher/{}.elf", self.mcu))?;
        let flasher_image = FirmwareImage::load(&flasher_path)?;
        presenter.log(
            &format!(
                "flasher: {:#010x}+{:#x}, heap {:#010x}+{:#x}",
                flasher_image.address,
                flasher_image.data.len(),
                flasher_image.heap.address,
                flasher_image.heap.size
            ),
            Severity::Information,
        );

        let firmware_path = self
            .bundle
            .resource(format!("firmware/{}.elf", self.firmware_name))?;
        let firmware_image = FirmwareImage::load(&firmware_path)?;
        presenter.log(
            &format!(
                "firmware: {:#010x}+{:#x}",
                firmware_image.address,
                firmware_image.data.len()
            ),
            Severity::Information,
        );
        self.check_cancel(presenter)?;

        let staging = if self.use_storage {
            let date = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs() as u32)
                .unwrap_or(0);
            presenter.log(
                &format!("Caching {} on the fixture...", self.firmware_name),
                Severity::Information,
            );
            let mut medium = StorageMedium::new(&mut fixture.bus, fixture.storage);
            let entry = fixture.file_system.ensure(
                &mut medium,
                &self.firmware_name,
                &firmware_image.data,
                date,
            )?;
            Staging::Storage {
                storage: fixture.storage,
                address: entry.address,
            }
        } else {
            Staging::Direct
        };
        self.check_cancel(presenter)?;

        fixture.serial_wire.set_enabled(&mut fixture.bus, true)?;
        let core = TargetCore::new(fixture.serial_wire);
        fixture
            .serial_wire
            .set_access_port_id(&mut fixture.bus, self.access_port)?;
        let dpidr = core.connect(&mut fixture.bus, None)?;
        presenter.log(
            &format!("Connected, debug port {dpidr:#010x}"),
            Severity::Information,
        );
        self.check_cancel(presenter)?;

        let flasher = Flasher::new(core, flasher_image, firmware_image, staging)?
            .timeout(self.rpc_timeout);
        presenter.log("Programming...", Severity::Information);
        flasher.run(&mut fixture.bus, &self.cancel)?;

        fixture.indicator.set(&mut fixture.bus, 0.0, 1.0, 0.0)?;
        Ok(())
    }
}
