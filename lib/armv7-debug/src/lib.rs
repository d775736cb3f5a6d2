// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// See ARMv7-M Architecture Reference Manual, Part 3 Debug Arch.
// https://developer.arm.com/documentation/ddi0403/d/Debug-Architecture

//! Cortex-M debug unit register model.
//!
//! The fixture reaches these registers as ordinary memory-mapped words over
//! the AHB-AP, so each register type carries its System Control Space
//! address via [`DebugRegister`].

use bitflags::bitflags;
use num_derive::FromPrimitive;

pub trait DebugRegister {
    /// System Control Space address of the register.
    const ADDRESS: u32;
}

// RW   0x00000000    Debug Halting Control and Status Register
// Some DHCSR bits have different read vs. write meanings. The DBGKEY value
// enables writing the C_* control bits; several S_* bits are read-only
// status.
bitflags! {
    #[derive(Debug, PartialEq, Eq, Copy, Clone)]
    pub struct Dhcsr: u32 {
        // At least one reset since last DHCSR read. Clear on read.
        const S_RESET_ST = 1 << 25;
        const S_RETIRE_ST = 1 << 24;
        const S_LOCKUP = 1 << 19;
        const S_SLEEP = 1 << 18;
        const S_HALT = 1 << 17;
        const S_REGRDY = 1 << 16;

        // Magic number allows setting C_* bits.
        const DBGKEY = 0xA05F << 16;

        const C_MASKINTS = 1 << 3;
        const C_STEP = 1 << 2;
        const C_HALT = 1 << 1;
        const C_DEBUGEN = 1 << 0;
        const _ = !0;
    }
}

impl From<u32> for Dhcsr {
    fn from(v: u32) -> Self {
        Self::from_bits_retain(v)
    }
}

impl DebugRegister for Dhcsr {
    const ADDRESS: u32 = 0xE000_EDF0;
}

impl Dhcsr {
    pub fn halt() -> Self {
        Self::DBGKEY | Self::C_HALT | Self::C_DEBUGEN
    }
    /// Clear C_HALT while keeping debug control.
    pub fn resume() -> Self {
        Self::DBGKEY | Self::C_DEBUGEN
    }
    pub fn step() -> Self {
        Self::DBGKEY | Self::C_STEP | Self::C_DEBUGEN
    }
    pub fn end_debug() -> Self {
        Self::DBGKEY
    }
    pub fn is_halted(self) -> bool {
        self & Self::S_HALT == Self::S_HALT
    }
    pub fn is_lockup(self) -> bool {
        self & Self::S_LOCKUP == Self::S_LOCKUP
    }
    pub fn is_regrdy(self) -> bool {
        self & Self::S_REGRDY == Self::S_REGRDY
    }

    /// Name the status bits for lockup triage.
    pub fn describe(self) -> String {
        let mut names = Vec::new();
        for (bit, name) in [
            (Self::S_RESET_ST, "reset-since-read"),
            (Self::S_RETIRE_ST, "retired"),
            (Self::S_LOCKUP, "lockup"),
            (Self::S_SLEEP, "sleep"),
            (Self::S_HALT, "halt"),
            (Self::S_REGRDY, "regrdy"),
            (Self::C_MASKINTS, "maskints"),
            (Self::C_STEP, "step"),
            (Self::C_HALT, "c-halt"),
            (Self::C_DEBUGEN, "debugen"),
        ] {
            if self.contains(bit) {
                names.push(name);
            }
        }
        if names.is_empty() {
            format!("{:#010x}", self.bits())
        } else {
            format!("{:#010x} [{}]", self.bits(), names.join(" "))
        }
    }
}

// Debug Core Register Selector Register
pub const DCRSR: u32 = 0xE000_EDF4;
// Debug Core Register Data Register
pub const DCRDR: u32 = 0xE000_EDF8;

// DEMCR RW   0x00000000    Debug Exception and Monitor Control Register
bitflags! {
    #[derive(Debug, PartialEq, Eq, Copy, Clone)]
    pub struct Demcr: u32 {
        const MON_EN = 1 << 16;
        const VC_HARDERR = 1 << 10;
        const VC_CORERESET = 1 << 0;
    }
}

impl DebugRegister for Demcr {
    const ADDRESS: u32 = 0xE000_EDFC;
}

// ARMv7-M Arch. Ref. Manual - C1.6.1 Debug Fault Status Register
bitflags! {
    #[derive(Debug, PartialEq, Eq, Copy, Clone)]
    pub struct Dfsr: u32 {
        // Assertion of an external debug request
        const EXTERNAL = 1 << 4;
        // Vector catch triggered
        const VCATCH = 1 << 3;
        // At least one DWT event
        const DWTTRAP = 1 << 2;
        // Breakpoint
        const BKPT = 1 << 1;
        // Halt request debug event
        const HALTED = 1 << 0;
        const _ = !0;
    }
}

impl DebugRegister for Dfsr {
    const ADDRESS: u32 = 0xE000_ED30;
}

impl Dfsr {
    pub fn is_vcatch(self) -> bool {
        self & Self::VCATCH == Self::VCATCH
    }
}

/// Core register selectors, ARMv7-M C1.6.3 REGSEL encoding. These are the
/// values the fixture's transfer engine takes for its register operations.
#[derive(Debug, PartialEq, Eq, Copy, Clone, FromPrimitive)]
#[repr(u16)]
pub enum Reg {
    R0 = 0b00000,
    R1 = 0b00001,
    R2 = 0b00010,
    R3 = 0b00011,
    R4 = 0b00100,
    R5 = 0b00101,
    R6 = 0b00110,
    R7 = 0b00111,
    R8 = 0b01000,
    R9 = 0b01001,
    R10 = 0b01010,
    R11 = 0b01011,
    R12 = 0b01100,
    Sp = 0b01101,
    Lr = 0b01110,
    // DebugReturnAddress: reads/writes the PC of the halted core, C1-704.
    Pc = 0b01111,
    Xpsr = 0b10000,
    Msp = 0b10001,
    Psp = 0b10010,
}

pub const VTOR: u32 = 0xE000_ED08;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dhcsr_control_words() {
        assert_eq!(Dhcsr::halt().bits(), 0xA05F_0003);
        assert_eq!(Dhcsr::resume().bits(), 0xA05F_0001);
        assert_eq!(Dhcsr::end_debug().bits(), 0xA05F_0000);
    }

    #[test]
    fn dhcsr_status() {
        let dhcsr = Dhcsr::from(0x0003_0003);
        assert!(dhcsr.is_halted());
        assert!(!dhcsr.is_lockup());
        let text = dhcsr.describe();
        assert!(text.contains("halt"));
        assert!(text.contains("debugen"));
    }

    #[test]
    fn regsel_values() {
        assert_eq!(Reg::Sp as u16, 13);
        assert_eq!(Reg::Lr as u16, 14);
        assert_eq!(Reg::Pc as u16, 15);
        assert_eq!(Reg::Xpsr as u16, 16);
    }
}
