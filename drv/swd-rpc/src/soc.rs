// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SOC register-map seam for scripts that bit-bang DUT peripherals.
//!
//! Bring-up scripts drive target pins and memory through the same SWD
//! transfer batches the flasher uses. They stay generic over [`Soc`]; each
//! concrete SOC contributes its register map by appending transfers into a
//! shared batch, so one batch can mix GPIO pokes from several drivers with
//! a single round trip.

use drv_instruments::SwdTransfer;

pub trait Soc {
    /// Configure a pin as input or output.
    fn append_gpio_config_transfers(
        &self,
        pin: u8,
        output: bool,
        transfers: &mut Vec<SwdTransfer>,
    );

    /// Drive an output pin.
    fn append_gpio_write_transfers(&self, pin: u8, high: bool, transfers: &mut Vec<SwdTransfer>);

    /// Read the port's input register; the caller masks out its pin.
    fn append_input_read_transfers(&self, transfers: &mut Vec<SwdTransfer>);

    /// Write a run of target memory.
    fn append_memory_write_transfers(
        &self,
        address: u32,
        data: &[u8],
        transfers: &mut Vec<SwdTransfer>,
    );
}

pub mod nrf53 {
    use super::{Soc, SwdTransfer};

    /// Access port ids on the nRF5340 debug port.
    pub const APPLICATION_AHB_AP: u32 = 0;
    pub const NETWORK_AHB_AP: u32 = 1;

    /// Application-core P0, secure alias.
    const P0_BASE: u32 = 0x5084_2500;
    const P0_OUTSET: u32 = P0_BASE + 0x008;
    const P0_OUTCLR: u32 = P0_BASE + 0x00c;
    const P0_IN: u32 = P0_BASE + 0x010;
    const P0_DIRSET: u32 = P0_BASE + 0x018;
    const P0_DIRCLR: u32 = P0_BASE + 0x01c;

    #[derive(Debug, Clone, Copy, Default)]
    pub struct Nrf53;

    impl Soc for Nrf53 {
        fn append_gpio_config_transfers(
            &self,
            pin: u8,
            output: bool,
            transfers: &mut Vec<SwdTransfer>,
        ) {
            let address = if output { P0_DIRSET } else { P0_DIRCLR };
            transfers.push(SwdTransfer::WriteMemoryWord {
                address,
                data: 1 << pin,
            });
        }

        fn append_gpio_write_transfers(
            &self,
            pin: u8,
            high: bool,
            transfers: &mut Vec<SwdTransfer>,
        ) {
            let address = if high { P0_OUTSET } else { P0_OUTCLR };
            transfers.push(SwdTransfer::WriteMemoryWord {
                address,
                data: 1 << pin,
            });
        }

        fn append_input_read_transfers(&self, transfers: &mut Vec<SwdTransfer>) {
            transfers.push(SwdTransfer::ReadMemoryWord { address: P0_IN });
        }

        fn append_memory_write_transfers(
            &self,
            address: u32,
            data: &[u8],
            transfers: &mut Vec<SwdTransfer>,
        ) {
            transfers.push(SwdTransfer::WriteData {
                address,
                data: data.to_vec(),
            });
        }
    }
}
