// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use wirebuf::WireBuf;

use crate::bus::InstrumentBus;
use crate::error::{ensure_clean, BusError};

const API_RESET: u64 = 0;
const API_CONVERT_CURRENT: u64 = 1;
const API_SET_VOLTAGE: u64 = 2;
const API_SET_ENABLED: u64 = 3;
const API_CONVERT_CURRENT_CONTINUOUS: u64 = 4;
const API_CONVERT_CURRENT_CONTINUOUS_COMPLETE: u64 = 5;

/// Battery emulator: a programmable supply with a current meter behind it.
#[derive(Debug, Clone, Copy)]
pub struct Battery {
    identifier: u64,
}

impl Battery {
    pub fn new(identifier: u64) -> Self {
        Self { identifier }
    }

    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    pub fn reset(&self, bus: &mut InstrumentBus) -> Result<(), BusError> {
        bus.invoke(self.identifier, API_RESET, &[])
    }

    /// One draw-current conversion, in amps.
    pub fn convert(&self, bus: &mut InstrumentBus) -> Result<f32, BusError> {
        let body = bus.call(self.identifier, API_CONVERT_CURRENT, &[])?;
        let mut results = WireBuf::from_vec(body);
        let value = results.get_f32();
        ensure_clean(&results)?;
        Ok(value)
    }

    pub fn set_voltage(&self, bus: &mut InstrumentBus, volts: f32) -> Result<(), BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_f32(volts);
        bus.invoke(self.identifier, API_SET_VOLTAGE, arguments.as_slice())
    }

    pub fn set_enabled(&self, bus: &mut InstrumentBus, enabled: bool) -> Result<(), BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_u8(enabled.into());
        bus.invoke(self.identifier, API_SET_ENABLED, arguments.as_slice())
    }

    /// Start integrating the draw current in the fixture firmware.
    pub fn convert_continuous(&self, bus: &mut InstrumentBus) -> Result<(), BusError> {
        bus.invoke(self.identifier, API_CONVERT_CURRENT_CONTINUOUS, &[])
    }

    /// Stop integrating and fetch the mean draw current, in amps.
    pub fn convert_continuous_complete(
        &self,
        bus: &mut InstrumentBus,
    ) -> Result<f32, BusError> {
        let body = bus.call(self.identifier, API_CONVERT_CURRENT_CONTINUOUS_COMPLETE, &[])?;
        let mut results = WireBuf::from_vec(body);
        let value = results.get_f32();
        ensure_clean(&results)?;
        Ok(value)
    }
}
