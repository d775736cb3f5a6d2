// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Programming orchestration.
//!
//! A small flasher agent is loaded into the target's RAM over SWD; it
//! exposes erase and write entry points that the host invokes as synthetic
//! calls. User firmware then streams through the agent's heap buffer one
//! chunk at a time: stage a chunk into target RAM (straight from the
//! fixture's storage chip when the image is cached there, else over SWD),
//! call `flasher_write`, repeat. Verification either asks the fixture to
//! compare target flash against the cached image or reads the flash back.

use core::fmt;
use std::time::Duration;

use derive_more::From;
use drv_fixture_hid::CancelToken;
use drv_instruments::{BusError, InstrumentBus, Storage};
use drv_swd_rpc::{CallRequest, SwdError, TargetCore, DEFAULT_RPC_TIMEOUT};
use elf_image::FirmwareImage;

/// Resident entry points expected of every flasher agent.
pub const FN_ERASE_ALL: &str = "flasher_erase_all";
pub const FN_ERASE_PAGE: &str = "flasher_erase_page";
pub const FN_WRITE: &str = "flasher_write";
pub const FN_HALT: &str = "flasher_halt";

#[derive(Debug, From)]
pub enum FlashError {
    /// The flasher agent reported an erase failure.
    EraseFailed(u32),
    /// The flasher agent reported a write failure.
    WriteFailed(u32),
    /// Programmed flash does not match the image.
    VerifyMismatch,
    /// The flasher ELF lacks a required entry point.
    MissingFunction(&'static str),
    /// A staging precondition does not hold.
    Misaligned(&'static str),
    Cancelled,
    #[from]
    Swd(SwdError),
    #[from]
    Bus(BusError),
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashError::EraseFailed(code) => write!(f, "flasher erase failed: code={code}"),
            FlashError::WriteFailed(code) => write!(f, "flasher write failed: code={code}"),
            FlashError::VerifyMismatch => f.write_str("flash contents do not match image"),
            FlashError::MissingFunction(name) => {
                write!(f, "flasher firmware has no `{name}`")
            }
            FlashError::Misaligned(what) => write!(f, "{what} is not 8-byte aligned"),
            FlashError::Cancelled => f.write_str("programming cancelled"),
            FlashError::Swd(e) => write!(f, "{e}"),
            FlashError::Bus(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for FlashError {}

/// How firmware chunks reach the agent's heap buffer.
#[derive(Debug, Clone, Copy)]
pub enum Staging {
    /// The image is cached on the fixture's storage chip at `address`;
    /// chunks move chip-to-target inside the fixture.
    Storage { storage: Storage, address: u32 },
    /// Chunks go out over the HID link and SWD writes.
    Direct,
}

#[derive(Debug)]
pub struct Flasher {
    core: TargetCore,
    /// The resident agent.
    flasher: FirmwareImage,
    /// What gets programmed.
    firmware: FirmwareImage,
    staging: Staging,
    timeout: Duration,
}

impl Flasher {
    pub fn new(
        core: TargetCore,
        flasher: FirmwareImage,
        firmware: FirmwareImage,
        staging: Staging,
    ) -> Result<Self, FlashError> {
        if flasher.heap.address % 8 != 0 {
            return Err(FlashError::Misaligned("flasher heap address"));
        }
        if flasher.heap.size % 8 != 0 {
            return Err(FlashError::Misaligned("flasher heap size"));
        }
        if firmware.data.len() % 8 != 0 {
            return Err(FlashError::Misaligned("firmware image length"));
        }
        for name in [FN_WRITE, FN_HALT] {
            if flasher.function(name).is_none() {
                return Err(FlashError::MissingFunction(name));
            }
        }
        if flasher.function(FN_ERASE_ALL).is_none()
            && flasher.function(FN_ERASE_PAGE).is_none()
        {
            return Err(FlashError::MissingFunction(FN_ERASE_ALL));
        }
        Ok(Self {
            core,
            flasher,
            firmware,
            staging,
            timeout: DEFAULT_RPC_TIMEOUT,
        })
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn firmware(&self) -> &FirmwareImage {
        &self.firmware
    }

    /// Load the agent into target RAM.
    pub fn setup(&self, bus: &mut InstrumentBus) -> Result<(), FlashError> {
        log::info!(
            "loading flasher agent at {:#010x} ({} bytes)",
            self.flasher.address,
            self.flasher.data.len()
        );
        self.core
            .serial_wire()
            .write_memory(bus, self.flasher.address, &self.flasher.data)?;
        Ok(())
    }

    fn rpc(
        &self,
        bus: &mut InstrumentBus,
        name: &'static str,
        args: [u32; 4],
    ) -> Result<u32, FlashError> {
        let function = self
            .flasher
            .function(name)
            .ok_or(FlashError::MissingFunction(name))?;
        let sentinel = self
            .flasher
            .function(FN_HALT)
            .ok_or(FlashError::MissingFunction(FN_HALT))?;
        let stack_top = self.flasher.stack.address + self.flasher.stack.size;
        let request = CallRequest::new(function, sentinel, stack_top)
            .args(args)
            .timeout(self.timeout);
        Ok(self.core.call(bus, &request)?)
    }

    /// Erase the target range about to be programmed.
    pub fn erase(&self, bus: &mut InstrumentBus) -> Result<(), FlashError> {
        let code = if self.flasher.function(FN_ERASE_ALL).is_some() {
            log::info!("erasing all target flash");
            self.rpc(bus, FN_ERASE_ALL, [0; 4])?
        } else {
            let length = self.firmware.data.len() as u32;
            log::info!(
                "erasing {:#010x}+{:#x}",
                self.firmware.address,
                length
            );
            self.rpc(bus, FN_ERASE_PAGE, [self.firmware.address, length, 0, 0])?
        };
        if code != 0 {
            return Err(FlashError::EraseFailed(code));
        }
        Ok(())
    }

    fn stage_chunk(
        &self,
        bus: &mut InstrumentBus,
        offset: u32,
        count: u32,
    ) -> Result<(), FlashError> {
        let heap = self.flasher.heap;
        match &self.staging {
            Staging::Storage { storage, address } => {
                self.core.serial_wire().write_from_storage(
                    bus,
                    heap.address,
                    count,
                    storage.identifier(),
                    address + offset,
                )?;
            }
            Staging::Direct => {
                let range = offset as usize..(offset + count) as usize;
                self.core
                    .serial_wire()
                    .write_memory(bus, heap.address, &self.firmware.data[range])?;
            }
        }
        Ok(())
    }

    /// Program the firmware, one heap-sized chunk at a time.
    pub fn program(
        &self,
        bus: &mut InstrumentBus,
        cancel: &CancelToken,
    ) -> Result<(), FlashError> {
        let heap = self.flasher.heap;
        let length = self.firmware.data.len() as u32;
        let mut offset = 0u32;
        while offset < length {
            if cancel.is_cancelled() {
                return Err(FlashError::Cancelled);
            }
            let count = (length - offset).min(heap.size);
            self.stage_chunk(bus, offset, count)?;
            let code = self.rpc(
                bus,
                FN_WRITE,
                [self.firmware.address + offset, heap.address, count, 0],
            )?;
            if code != 0 {
                return Err(FlashError::WriteFailed(code));
            }
            log::debug!(
                "programmed {:#010x}+{count:#x}",
                self.firmware.address + offset
            );
            offset += count;
        }
        Ok(())
    }

    /// Check the programmed flash against the image.
    pub fn verify(&self, bus: &mut InstrumentBus) -> Result<(), FlashError> {
        let length = self.firmware.data.len() as u32;
        match &self.staging {
            Staging::Storage { storage, address } => {
                let code = self.core.serial_wire().compare_to_storage(
                    bus,
                    self.firmware.address,
                    length,
                    storage.identifier(),
                    *address,
                )?;
                if code != 0 {
                    return Err(FlashError::VerifyMismatch);
                }
            }
            Staging::Direct => {
                let readback = self
                    .core
                    .serial_wire()
                    .read_memory(bus, self.firmware.address, length)?;
                if readback != self.firmware.data {
                    return Err(FlashError::VerifyMismatch);
                }
            }
        }
        Ok(())
    }

    /// The whole sequence: load agent, erase, program, verify.
    pub fn run(&self, bus: &mut InstrumentBus, cancel: &CancelToken) -> Result<(), FlashError> {
        self.setup(bus)?;
        self.erase(bus)?;
        self.program(bus, cancel)?;
        self.verify(bus)
    }
}
