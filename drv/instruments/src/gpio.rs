// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! General-purpose pin instrument. Each instance is one pin of the
//! fixture's DUT harness; some carry an auxiliary channel (a second pin
//! ganged behind the same identifier) and/or analog capability.

use bitflags::bitflags;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use wirebuf::WireBuf;

use crate::bus::InstrumentBus;
use crate::error::{ensure_clean, BusError, ProtocolError};

const API_RESET: u64 = 0;
const API_GET_CAPABILITIES: u64 = 1;
const API_GET_CONFIGURATION: u64 = 2;
const API_SET_CONFIGURATION: u64 = 3;
const API_GET_DIGITAL_INPUT: u64 = 4;
const API_SET_DIGITAL_OUTPUT: u64 = 5;
const API_GET_ANALOG_INPUT: u64 = 6;
const API_SET_ANALOG_OUTPUT: u64 = 7;
const API_GET_AUXILIARY_CONFIGURATION: u64 = 8;
const API_SET_AUXILIARY_CONFIGURATION: u64 = 9;
const API_GET_AUXILIARY_INPUT: u64 = 10;
const API_SET_AUXILIARY_OUTPUT: u64 = 11;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capability: u32 {
        const ANALOG_INPUT = 1 << 0;
        const ANALOG_OUTPUT = 1 << 1;
        const AUXILIARY = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum Domain {
    Digital = 0,
    Analog = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum Direction {
    Input = 0,
    Output = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum Drive {
    PushPull = 0,
    OpenDrain = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum Pull {
    None = 0,
    Up = 1,
    Down = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinConfig {
    pub domain: Domain,
    pub direction: Direction,
    pub drive: Drive,
    pub pull: Pull,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            domain: Domain::Digital,
            direction: Direction::Input,
            drive: Drive::PushPull,
            pull: Pull::None,
        }
    }
}

fn decode_config(results: &mut WireBuf) -> Result<PinConfig, BusError> {
    let domain = Domain::from_u8(results.get_u8());
    let direction = Direction::from_u8(results.get_u8());
    let drive = Drive::from_u8(results.get_u8());
    let pull = Pull::from_u8(results.get_u8());
    ensure_clean(results)?;
    match (domain, direction, drive, pull) {
        (Some(domain), Some(direction), Some(drive), Some(pull)) => Ok(PinConfig {
            domain,
            direction,
            drive,
            pull,
        }),
        _ => Err(ProtocolError::Malformed.into()),
    }
}

fn encode_config(config: PinConfig) -> WireBuf {
    let mut arguments = WireBuf::new();
    arguments.put_u8(config.domain as u8);
    arguments.put_u8(config.direction as u8);
    arguments.put_u8(config.drive as u8);
    arguments.put_u8(config.pull as u8);
    arguments
}

#[derive(Debug, Clone, Copy)]
pub struct Gpio {
    identifier: u64,
}

impl Gpio {
    pub fn new(identifier: u64) -> Self {
        Self { identifier }
    }

    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    pub fn reset(&self, bus: &mut InstrumentBus) -> Result<(), BusError> {
        bus.invoke(self.identifier, API_RESET, &[])
    }

    pub fn capabilities(&self, bus: &mut InstrumentBus) -> Result<Capability, BusError> {
        let body = bus.call(self.identifier, API_GET_CAPABILITIES, &[])?;
        let mut results = WireBuf::from_vec(body);
        let bits = results.get_u32();
        ensure_clean(&results)?;
        Ok(Capability::from_bits_truncate(bits))
    }

    pub fn configuration(&self, bus: &mut InstrumentBus) -> Result<PinConfig, BusError> {
        let body = bus.call(self.identifier, API_GET_CONFIGURATION, &[])?;
        decode_config(&mut WireBuf::from_vec(body))
    }

    pub fn set_configuration(
        &self,
        bus: &mut InstrumentBus,
        config: PinConfig,
    ) -> Result<(), BusError> {
        bus.invoke(
            self.identifier,
            API_SET_CONFIGURATION,
            encode_config(config).as_slice(),
        )
    }

    pub fn digital_input(&self, bus: &mut InstrumentBus) -> Result<bool, BusError> {
        let body = bus.call(self.identifier, API_GET_DIGITAL_INPUT, &[])?;
        let mut results = WireBuf::from_vec(body);
        let bit = results.get_u8() != 0;
        ensure_clean(&results)?;
        Ok(bit)
    }

    pub fn set_digital_output(
        &self,
        bus: &mut InstrumentBus,
        value: bool,
    ) -> Result<(), BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_u8(value.into());
        bus.invoke(self.identifier, API_SET_DIGITAL_OUTPUT, arguments.as_slice())
    }

    pub fn analog_input(&self, bus: &mut InstrumentBus) -> Result<f32, BusError> {
        let body = bus.call(self.identifier, API_GET_ANALOG_INPUT, &[])?;
        let mut results = WireBuf::from_vec(body);
        let value = results.get_f32();
        ensure_clean(&results)?;
        Ok(value)
    }

    pub fn set_analog_output(
        &self,
        bus: &mut InstrumentBus,
        value: f32,
    ) -> Result<(), BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_f32(value);
        bus.invoke(self.identifier, API_SET_ANALOG_OUTPUT, arguments.as_slice())
    }

    pub fn auxiliary_configuration(
        &self,
        bus: &mut InstrumentBus,
    ) -> Result<PinConfig, BusError> {
        let body = bus.call(self.identifier, API_GET_AUXILIARY_CONFIGURATION, &[])?;
        decode_config(&mut WireBuf::from_vec(body))
    }

    pub fn set_auxiliary_configuration(
        &self,
        bus: &mut InstrumentBus,
        config: PinConfig,
    ) -> Result<(), BusError> {
        bus.invoke(
            self.identifier,
            API_SET_AUXILIARY_CONFIGURATION,
            encode_config(config).as_slice(),
        )
    }

    pub fn auxiliary_input(&self, bus: &mut InstrumentBus) -> Result<bool, BusError> {
        let body = bus.call(self.identifier, API_GET_AUXILIARY_INPUT, &[])?;
        let mut results = WireBuf::from_vec(body);
        let bit = results.get_u8() != 0;
        ensure_clean(&results)?;
        Ok(bit)
    }

    pub fn set_auxiliary_output(
        &self,
        bus: &mut InstrumentBus,
        value: bool,
    ) -> Result<(), BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_u8(value.into());
        bus.invoke(
            self.identifier,
            API_SET_AUXILIARY_OUTPUT,
            arguments.as_slice(),
        )
    }
}
