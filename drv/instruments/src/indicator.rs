// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use wirebuf::WireBuf;

use crate::bus::InstrumentBus;
use crate::error::BusError;

const API_RESET: u64 = 0;
const API_SET_RGB: u64 = 1;

/// RGB status lamp on the fixture lid.
#[derive(Debug, Clone, Copy)]
pub struct Indicator {
    identifier: u64,
}

impl Indicator {
    pub fn new(identifier: u64) -> Self {
        Self { identifier }
    }

    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    pub fn reset(&self, bus: &mut InstrumentBus) -> Result<(), BusError> {
        bus.invoke(self.identifier, API_RESET, &[])
    }

    /// Channel intensities in [0.0, 1.0].
    pub fn set(
        &self,
        bus: &mut InstrumentBus,
        red: f32,
        green: f32,
        blue: f32,
    ) -> Result<(), BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_f32(red);
        arguments.put_f32(green);
        arguments.put_f32(blue);
        bus.invoke(self.identifier, API_SET_RGB, arguments.as_slice())
    }
}
