// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use wirebuf::WireBuf;

use crate::bus::InstrumentBus;
use crate::error::BusError;

const API_RESET: u64 = 0;
const API_SET_STATE: u64 = 1;

/// Power/signal relay.
#[derive(Debug, Clone, Copy)]
pub struct Relay {
    identifier: u64,
}

impl Relay {
    pub fn new(identifier: u64) -> Self {
        Self { identifier }
    }

    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    pub fn reset(&self, bus: &mut InstrumentBus) -> Result<(), BusError> {
        bus.invoke(self.identifier, API_RESET, &[])
    }

    pub fn set(&self, bus: &mut InstrumentBus, closed: bool) -> Result<(), BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_u8(closed.into());
        bus.invoke(self.identifier, API_SET_STATE, arguments.as_slice())
    }
}
