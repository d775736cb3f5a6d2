// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use wirebuf::WireBuf;

use crate::bus::InstrumentBus;
use crate::error::{ensure_clean, BusError};

const API_RESET: u64 = 0;
const API_CONVERT: u64 = 1;

/// Current meter.
#[derive(Debug, Clone, Copy)]
pub struct Current {
    identifier: u64,
}

impl Current {
    pub fn new(identifier: u64) -> Self {
        Self { identifier }
    }

    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    pub fn reset(&self, bus: &mut InstrumentBus) -> Result<(), BusError> {
        bus.invoke(self.identifier, API_RESET, &[])
    }

    /// One conversion, in amps.
    pub fn convert(&self, bus: &mut InstrumentBus) -> Result<f32, BusError> {
        let body = bus.call(self.identifier, API_CONVERT, &[])?;
        let mut results = WireBuf::from_vec(body);
        let value = results.get_f32();
        ensure_clean(&results)?;
        Ok(value)
    }
}
