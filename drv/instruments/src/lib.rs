// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed access to the fixture's instruments.
//!
//! The fixture multiplexes a closed set of instrument categories over one
//! HID link: relays, indicators, meters, a battery emulator, the storage
//! chip, general-purpose pins, and the serial-wire debug port. The
//! [`InstrumentBus`] owns the transport; each facade is a thin handle
//! (category + identifier) whose methods encode one api's argument tuple
//! and decode its reply. Facades never own the bus; callers pass it per
//! operation, which keeps the ownership graph a tree.

mod bus;
mod error;
mod medium;

mod battery;
mod current;
mod gpio;
mod indicator;
mod relay;
mod serial_wire;
mod storage;
mod voltage;

#[cfg(test)]
mod tests;

use indexmap::IndexMap;

pub use battery::Battery;
pub use bus::{InstrumentBus, Reply, MANAGER_IDENTIFIER};
pub use current::Current;
pub use error::{BusError, ProtocolError, TransportError};
pub use gpio::{Capability, Direction, Domain, Drive, Gpio, PinConfig, Pull};
pub use indicator::Indicator;
pub use medium::{StorageMedium, FIXTURE_CAPACITY};
pub use relay::Relay;
pub use serial_wire::{Port, SerialWire, SwdTransfer, TransferResult};
pub use storage::{FileInfo, FileMode, Storage, MAX_TRANSFER_LEN};
pub use voltage::Voltage;

/// One discovered instrument.
#[derive(Debug, Clone, Copy)]
pub enum InstrumentKind {
    Relay(Relay),
    Indicator(Indicator),
    Voltage(Voltage),
    Current(Current),
    Battery(Battery),
    Storage(Storage),
    Gpio(Gpio),
    SerialWire(SerialWire),
}

impl InstrumentKind {
    pub fn category(&self) -> &'static str {
        match self {
            InstrumentKind::Relay(_) => "Relay",
            InstrumentKind::Indicator(_) => "Indicator",
            InstrumentKind::Voltage(_) => "Voltage",
            InstrumentKind::Current(_) => "Current",
            InstrumentKind::Battery(_) => "Battery",
            InstrumentKind::Storage(_) => "Storage",
            InstrumentKind::Gpio(_) => "Gpio",
            InstrumentKind::SerialWire(_) => "SerialWire",
        }
    }
}

/// Instruments reported by discovery, in discovery order.
#[derive(Debug, Default)]
pub struct Inventory {
    by_identifier: IndexMap<u64, InstrumentKind>,
}

macro_rules! typed_getter {
    ($method:ident, $variant:ident, $facade:ty) => {
        pub fn $method(&self, identifier: u64) -> Result<$facade, BusError> {
            match self.by_identifier.get(&identifier) {
                Some(InstrumentKind::$variant(facade)) => Ok(*facade),
                _ => Err(BusError::NoSuchInstrument { identifier }),
            }
        }
    };
}

impl Inventory {
    pub(crate) fn add(&mut self, category: &str, identifier: u64) {
        let kind = match category {
            "Relay" => InstrumentKind::Relay(Relay::new(identifier)),
            "Indicator" => InstrumentKind::Indicator(Indicator::new(identifier)),
            "Voltage" => InstrumentKind::Voltage(Voltage::new(identifier)),
            "Current" => InstrumentKind::Current(Current::new(identifier)),
            "Battery" => InstrumentKind::Battery(Battery::new(identifier)),
            "Storage" => InstrumentKind::Storage(Storage::new(identifier)),
            "Gpio" => InstrumentKind::Gpio(Gpio::new(identifier)),
            "SerialWire" => InstrumentKind::SerialWire(SerialWire::new(identifier)),
            _ => {
                log::debug!("skipping unrecognized instrument category {category}");
                return;
            }
        };
        self.by_identifier.insert(identifier, kind);
    }

    pub fn len(&self) -> usize {
        self.by_identifier.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identifier.is_empty()
    }

    pub fn get(&self, identifier: u64) -> Option<&InstrumentKind> {
        self.by_identifier.get(&identifier)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &InstrumentKind)> {
        self.by_identifier.iter().map(|(id, kind)| (*id, kind))
    }

    typed_getter!(relay, Relay, Relay);
    typed_getter!(indicator, Indicator, Indicator);
    typed_getter!(voltage, Voltage, Voltage);
    typed_getter!(current, Current, Current);
    typed_getter!(battery, Battery, Battery);
    typed_getter!(storage, Storage, Storage);
    typed_getter!(gpio, Gpio, Gpio);
    typed_getter!(serial_wire, SerialWire, SerialWire);
}
