// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Halt/run control and synthetic function calls on the target core.
//!
//! The resident flasher firmware is never "started": the core is halted
//! over SWD, the argument registers and stack pointer are staged, PC is
//! pointed at the wanted entry point, and LR at a sentinel that traps the
//! core straight back into debug-halt on return. Resume, wait for the
//! halt status bit, read R0, done: a function call synthesized from
//! debug primitives.

pub mod soc;

#[cfg(test)]
mod tests;

use core::fmt;
use std::time::{Duration, Instant};

use armv7_debug::{DebugRegister, Dhcsr, Reg};
use derive_more::From;
use drv_instruments::{BusError, InstrumentBus, SerialWire, SwdTransfer};

/// Default deadline for an RPC to run to completion.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(1);

/// Register state captured when an RPC misses its deadline; the DHCSR
/// decomposition tells a reviewer whether the core is running, asleep,
/// locked up, or halted somewhere unexpected.
#[derive(Debug, Clone, Copy)]
pub struct HaltTimeout {
    pub dhcsr: Dhcsr,
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub sp: u32,
    pub lr: u32,
    pub pc: u32,
}

impl fmt::Display for HaltTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dhcsr={} r0={:#010x} r1={:#010x} r2={:#010x} r3={:#010x} \
             sp={:#010x} lr={:#010x} pc={:#010x}",
            self.dhcsr.describe(),
            self.r0,
            self.r1,
            self.r2,
            self.r3,
            self.sp,
            self.lr,
            self.pc
        )
    }
}

#[derive(Debug, From)]
pub enum SwdError {
    /// The core did not re-halt before the deadline.
    RpcTimeout(Box<HaltTimeout>),
    /// An operation that requires debug-halt found the core running.
    NotHalted,
    /// The debug port identified as something else entirely.
    UnexpectedIdr { expected: u32, actual: u32 },
    /// A polling loop ran out its deadline.
    Timeout(&'static str),
    #[from]
    Bus(BusError),
}

impl fmt::Display for SwdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwdError::RpcTimeout(dump) => write!(f, "rpc did not complete: {dump}"),
            SwdError::NotHalted => f.write_str("target core is not halted"),
            SwdError::UnexpectedIdr { expected, actual } => write!(
                f,
                "unexpected debug port id {actual:#010x} (expected {expected:#010x})"
            ),
            SwdError::Timeout(message) => write!(f, "timed out: {message}"),
            SwdError::Bus(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SwdError {}

/// Poll `predicate` until it holds or `timeout` elapses.
pub fn retry<F>(
    timeout: Duration,
    message: &'static str,
    mut predicate: F,
) -> Result<(), SwdError>
where
    F: FnMut() -> Result<bool, SwdError>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if predicate()? {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(SwdError::Timeout(message));
        }
    }
}

/// Arguments for one synthetic call.
#[derive(Debug, Clone, Copy)]
pub struct CallRequest {
    pub function: u32,
    pub args: [u32; 4],
    /// Initial SP; grows down from here.
    pub stack_top: u32,
    /// Where returns land: the resident halt stub.
    pub sentinel: u32,
    pub timeout: Duration,
}

impl CallRequest {
    pub fn new(function: u32, sentinel: u32, stack_top: u32) -> Self {
        Self {
            function,
            args: [0; 4],
            stack_top,
            sentinel,
            timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    pub fn args(mut self, args: [u32; 4]) -> Self {
        self.args = args;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Cortex-M core behind the fixture's serial-wire port.
#[derive(Debug, Clone, Copy)]
pub struct TargetCore {
    serial_wire: SerialWire,
}

impl TargetCore {
    pub fn new(serial_wire: SerialWire) -> Self {
        Self { serial_wire }
    }

    pub fn serial_wire(&self) -> SerialWire {
        self.serial_wire
    }

    /// Bring up the debug port, optionally insisting on a known DPIDR.
    pub fn connect(
        &self,
        bus: &mut InstrumentBus,
        expected_idr: Option<u32>,
    ) -> Result<u32, SwdError> {
        let dpidr = self.serial_wire.connect(bus)?;
        log::debug!("debug port id {dpidr:#010x}");
        if let Some(expected) = expected_idr {
            if dpidr != expected {
                return Err(SwdError::UnexpectedIdr {
                    expected,
                    actual: dpidr,
                });
            }
        }
        Ok(dpidr)
    }

    pub fn dhcsr(&self, bus: &mut InstrumentBus) -> Result<Dhcsr, SwdError> {
        Ok(self
            .serial_wire
            .read_memory_word(bus, Dhcsr::ADDRESS)?
            .into())
    }

    pub fn is_halted(&self, bus: &mut InstrumentBus) -> Result<bool, SwdError> {
        Ok(self.dhcsr(bus)?.is_halted())
    }

    pub fn halt(&self, bus: &mut InstrumentBus) -> Result<(), SwdError> {
        self.write_dhcsr(bus, Dhcsr::halt())
    }

    pub fn resume(&self, bus: &mut InstrumentBus) -> Result<(), SwdError> {
        self.write_dhcsr(bus, Dhcsr::resume())
    }

    pub fn step(&self, bus: &mut InstrumentBus) -> Result<(), SwdError> {
        if !self.is_halted(bus)? {
            return Err(SwdError::NotHalted);
        }
        self.write_dhcsr(bus, Dhcsr::step())
    }

    fn write_dhcsr(&self, bus: &mut InstrumentBus, value: Dhcsr) -> Result<(), SwdError> {
        self.serial_wire
            .write_memory_word(bus, Dhcsr::ADDRESS, value.bits())?;
        Ok(())
    }

    pub fn read_register(&self, bus: &mut InstrumentBus, reg: Reg) -> Result<u32, SwdError> {
        Ok(self.serial_wire.read_register(bus, reg as u16)?)
    }

    pub fn write_register(
        &self,
        bus: &mut InstrumentBus,
        reg: Reg,
        value: u32,
    ) -> Result<(), SwdError> {
        self.serial_wire.write_register(bus, reg as u16, value)?;
        Ok(())
    }

    /// Run `request.function` to completion and return its R0.
    ///
    /// The whole setup goes out as one transfer batch: halt, stage
    /// R0..R3/SP/PC/LR, resume. PC gets the Thumb bit; so does LR, which
    /// points at the sentinel so any return re-enters debug-halt.
    pub fn call(
        &self,
        bus: &mut InstrumentBus,
        request: &CallRequest,
    ) -> Result<u32, SwdError> {
        let setup = [
            SwdTransfer::WriteMemoryWord {
                address: Dhcsr::ADDRESS,
                data: Dhcsr::halt().bits(),
            },
            SwdTransfer::WriteRegister {
                register: Reg::R0 as u16,
                data: request.args[0],
            },
            SwdTransfer::WriteRegister {
                register: Reg::R1 as u16,
                data: request.args[1],
            },
            SwdTransfer::WriteRegister {
                register: Reg::R2 as u16,
                data: request.args[2],
            },
            SwdTransfer::WriteRegister {
                register: Reg::R3 as u16,
                data: request.args[3],
            },
            SwdTransfer::WriteRegister {
                register: Reg::Sp as u16,
                data: request.stack_top,
            },
            SwdTransfer::WriteRegister {
                register: Reg::Lr as u16,
                data: request.sentinel | 1,
            },
            SwdTransfer::WriteRegister {
                register: Reg::Pc as u16,
                data: request.function | 1,
            },
            SwdTransfer::WriteMemoryWord {
                address: Dhcsr::ADDRESS,
                data: Dhcsr::resume().bits(),
            },
        ];
        self.serial_wire.transfer(bus, &setup)?;

        let deadline = Instant::now() + request.timeout;
        loop {
            if self.is_halted(bus)? {
                break;
            }
            if Instant::now() >= deadline {
                let dump = self.capture_halt_timeout(bus)?;
                log::warn!("rpc timeout at {:#010x}: {dump}", request.function);
                return Err(SwdError::RpcTimeout(Box::new(dump)));
            }
        }
        self.read_register(bus, Reg::R0)
    }

    /// One batch capturing everything a reviewer needs to triage a hung
    /// RPC.
    fn capture_halt_timeout(&self, bus: &mut InstrumentBus) -> Result<HaltTimeout, SwdError> {
        let reads = [
            SwdTransfer::ReadMemoryWord {
                address: Dhcsr::ADDRESS,
            },
            SwdTransfer::ReadRegister {
                register: Reg::R0 as u16,
            },
            SwdTransfer::ReadRegister {
                register: Reg::R1 as u16,
            },
            SwdTransfer::ReadRegister {
                register: Reg::R2 as u16,
            },
            SwdTransfer::ReadRegister {
                register: Reg::R3 as u16,
            },
            SwdTransfer::ReadRegister {
                register: Reg::Sp as u16,
            },
            SwdTransfer::ReadRegister {
                register: Reg::Lr as u16,
            },
            SwdTransfer::ReadRegister {
                register: Reg::Pc as u16,
            },
        ];
        let results = self.serial_wire.transfer(bus, &reads)?;
        let mut words = [0u32; 8];
        for (slot, result) in words.iter_mut().zip(&results) {
            *slot = result.word()?;
        }
        Ok(HaltTimeout {
            dhcsr: Dhcsr::from(words[0]),
            r0: words[1],
            r1: words[2],
            r2: words[3],
            r3: words[4],
            sp: words[5],
            lr: words[6],
            pc: words[7],
        })
    }
}
