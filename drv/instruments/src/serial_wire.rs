// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Serial-wire debug port instrument.
//!
//! Besides pin-level control (reset line, direction, raw bit shifting),
//! the fixture firmware implements an SWD transfer engine: the host sends
//! one batch of tagged transfer descriptors and gets every read's result
//! back in one round trip, in request order. Each read reply echoes its
//! discriminant and selector fields ahead of the payload so a desynced
//! stream is caught immediately instead of corrupting the run.

use wirebuf::WireBuf;

use crate::bus::InstrumentBus;
use crate::error::{ensure_clean, BusError, ProtocolError};

const API_RESET: u64 = 0;
const API_SET_OUTPUTS: u64 = 1;
const API_GET_INPUTS: u64 = 2;
const API_SHIFT_OUT_BITS: u64 = 3;
const API_SHIFT_OUT_DATA: u64 = 4;
const API_SHIFT_IN_BITS: u64 = 5;
const API_SHIFT_IN_DATA: u64 = 6;
const API_SET_ENABLED: u64 = 9;
const API_WRITE_MEMORY: u64 = 10;
const API_READ_MEMORY: u64 = 11;
const API_WRITE_FROM_STORAGE: u64 = 12;
const API_COMPARE_TO_STORAGE: u64 = 13;
const API_TRANSFER: u64 = 14;
const API_SET_HALF_BIT_DELAY: u64 = 15;
const API_SET_TARGET_ID: u64 = 16;
const API_SET_ACCESS_PORT_ID: u64 = 17;
const API_CONNECT: u64 = 18;

/// Output lines on the port header.
pub const OUTPUT_INDICATOR: u8 = 0;
pub const OUTPUT_RESET: u8 = 1;
pub const OUTPUT_DIRECTION: u8 = 2;
/// Input lines.
pub const INPUT_RESET: u8 = 0;

/// Bulk memory transfers chunk at this size over apis 10/11.
const MEMORY_CHUNK_LEN: usize = 1024;

/// Transfer discriminants on the wire.
const TYPE_READ_REGISTER: u64 = 0;
const TYPE_WRITE_REGISTER: u64 = 1;
const TYPE_READ_MEMORY_WORD: u64 = 2;
const TYPE_WRITE_MEMORY_WORD: u64 = 3;
const TYPE_READ_PORT: u64 = 4;
const TYPE_WRITE_PORT: u64 = 5;
const TYPE_SELECT_AND_READ_ACCESS_PORT: u64 = 6;
const TYPE_SELECT_AND_WRITE_ACCESS_PORT: u64 = 7;
const TYPE_READ_DATA: u64 = 8;
const TYPE_WRITE_DATA: u64 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    Debug = 0,
    Access = 1,
}

/// One SWD transfer descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwdTransfer {
    /// Core register via DCRSR/DCRDR, ARMv7-M REGSEL numbering.
    ReadRegister { register: u16 },
    WriteRegister { register: u16, data: u32 },
    ReadMemoryWord { address: u32 },
    WriteMemoryWord { address: u32, data: u32 },
    ReadPort { port: Port, register: u8 },
    WritePort { port: Port, register: u8, data: u32 },
    SelectAndReadAccessPort { register: u8 },
    SelectAndWriteAccessPort { register: u8, data: u32 },
    /// Bulk memory read through the AHB-AP.
    ReadData { address: u32, length: u32 },
    WriteData { address: u32, data: Vec<u8> },
}

impl SwdTransfer {
    fn discriminant(&self) -> u64 {
        match self {
            SwdTransfer::ReadRegister { .. } => TYPE_READ_REGISTER,
            SwdTransfer::WriteRegister { .. } => TYPE_WRITE_REGISTER,
            SwdTransfer::ReadMemoryWord { .. } => TYPE_READ_MEMORY_WORD,
            SwdTransfer::WriteMemoryWord { .. } => TYPE_WRITE_MEMORY_WORD,
            SwdTransfer::ReadPort { .. } => TYPE_READ_PORT,
            SwdTransfer::WritePort { .. } => TYPE_WRITE_PORT,
            SwdTransfer::SelectAndReadAccessPort { .. } => {
                TYPE_SELECT_AND_READ_ACCESS_PORT
            }
            SwdTransfer::SelectAndWriteAccessPort { .. } => {
                TYPE_SELECT_AND_WRITE_ACCESS_PORT
            }
            SwdTransfer::ReadData { .. } => TYPE_READ_DATA,
            SwdTransfer::WriteData { .. } => TYPE_WRITE_DATA,
        }
    }

    fn is_read(&self) -> bool {
        matches!(
            self,
            SwdTransfer::ReadRegister { .. }
                | SwdTransfer::ReadMemoryWord { .. }
                | SwdTransfer::ReadPort { .. }
                | SwdTransfer::SelectAndReadAccessPort { .. }
                | SwdTransfer::ReadData { .. }
        )
    }

    fn encode(&self, arguments: &mut WireBuf) {
        arguments.put_varuint(self.discriminant());
        match self {
            SwdTransfer::ReadRegister { register } => {
                arguments.put_varuint((*register).into());
            }
            SwdTransfer::WriteRegister { register, data } => {
                arguments.put_varuint((*register).into());
                arguments.put_u32(*data);
            }
            SwdTransfer::ReadMemoryWord { address } => {
                arguments.put_u32(*address);
            }
            SwdTransfer::WriteMemoryWord { address, data } => {
                arguments.put_u32(*address);
                arguments.put_u32(*data);
            }
            SwdTransfer::ReadPort { port, register } => {
                arguments.put_u8(*port as u8);
                arguments.put_u8(*register);
            }
            SwdTransfer::WritePort {
                port,
                register,
                data,
            } => {
                arguments.put_u8(*port as u8);
                arguments.put_u8(*register);
                arguments.put_u32(*data);
            }
            SwdTransfer::SelectAndReadAccessPort { register } => {
                arguments.put_u8(*register);
            }
            SwdTransfer::SelectAndWriteAccessPort { register, data } => {
                arguments.put_u8(*register);
                arguments.put_u32(*data);
            }
            SwdTransfer::ReadData { address, length } => {
                arguments.put_u32(*address);
                arguments.put_varuint((*length).into());
            }
            SwdTransfer::WriteData { address, data } => {
                arguments.put_u32(*address);
                arguments.put_varuint(data.len() as u64);
                arguments.put_bytes(data);
            }
        }
    }

    /// Decode this read's reply: echoed discriminant and selector fields,
    /// then the payload.
    fn decode_reply(&self, results: &mut WireBuf) -> Result<TransferResult, BusError> {
        if results.get_varuint() != self.discriminant() {
            return Err(ProtocolError::TransferMismatch.into());
        }
        match self {
            SwdTransfer::ReadRegister { register } => {
                if results.get_varuint() != u64::from(*register) {
                    return Err(ProtocolError::TransferMismatch.into());
                }
                Ok(TransferResult::Word(results.get_u32()))
            }
            SwdTransfer::ReadMemoryWord { address } => {
                if results.get_u32() != *address {
                    return Err(ProtocolError::TransferMismatch.into());
                }
                Ok(TransferResult::Word(results.get_u32()))
            }
            SwdTransfer::ReadPort { port, register } => {
                if results.get_u8() != *port as u8 || results.get_u8() != *register {
                    return Err(ProtocolError::TransferMismatch.into());
                }
                Ok(TransferResult::Word(results.get_u32()))
            }
            SwdTransfer::SelectAndReadAccessPort { register } => {
                if results.get_u8() != *register {
                    return Err(ProtocolError::TransferMismatch.into());
                }
                Ok(TransferResult::Word(results.get_u32()))
            }
            SwdTransfer::ReadData { address, length } => {
                if results.get_u32() != *address {
                    return Err(ProtocolError::TransferMismatch.into());
                }
                let count = results.get_varuint();
                if count != u64::from(*length) {
                    return Err(ProtocolError::TransferMismatch.into());
                }
                Ok(TransferResult::Bytes(results.get_bytes(count as usize)))
            }
            _ => Err(ProtocolError::TransferMismatch.into()),
        }
    }
}

/// The result of one read transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferResult {
    Word(u32),
    Bytes(Vec<u8>),
}

impl TransferResult {
    pub fn word(&self) -> Result<u32, BusError> {
        match self {
            TransferResult::Word(word) => Ok(*word),
            TransferResult::Bytes(_) => Err(ProtocolError::TransferMismatch.into()),
        }
    }

    pub fn bytes(self) -> Result<Vec<u8>, BusError> {
        match self {
            TransferResult::Bytes(bytes) => Ok(bytes),
            TransferResult::Word(_) => Err(ProtocolError::TransferMismatch.into()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SerialWire {
    identifier: u64,
}

impl SerialWire {
    pub fn new(identifier: u64) -> Self {
        Self { identifier }
    }

    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    pub fn reset(&self, bus: &mut InstrumentBus) -> Result<(), BusError> {
        bus.invoke(self.identifier, API_RESET, &[])
    }

    pub fn set_enabled(&self, bus: &mut InstrumentBus, enabled: bool) -> Result<(), BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_u8(enabled.into());
        bus.invoke(self.identifier, API_SET_ENABLED, arguments.as_slice())
    }

    pub fn set_half_bit_delay(
        &self,
        bus: &mut InstrumentBus,
        value: u32,
    ) -> Result<(), BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_u32(value);
        bus.invoke(self.identifier, API_SET_HALF_BIT_DELAY, arguments.as_slice())
    }

    /// Drive one output line of the port header.
    pub fn set(&self, bus: &mut InstrumentBus, line: u8, value: bool) -> Result<(), BusError> {
        let bits = 1u8 << line;
        let mut arguments = WireBuf::new();
        arguments.put_u8(bits);
        arguments.put_u8(if value { bits } else { 0 });
        bus.invoke(self.identifier, API_SET_OUTPUTS, arguments.as_slice())
    }

    pub fn get(&self, bus: &mut InstrumentBus, line: u8) -> Result<bool, BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_u8(1 << line);
        let body = bus.call(self.identifier, API_GET_INPUTS, arguments.as_slice())?;
        let mut results = WireBuf::from_vec(body);
        let value = results.get_varuint() != 0;
        ensure_clean(&results)?;
        Ok(value)
    }

    pub fn set_indicator(&self, bus: &mut InstrumentBus, value: bool) -> Result<(), BusError> {
        self.set(bus, OUTPUT_INDICATOR, value)
    }

    pub fn set_reset(&self, bus: &mut InstrumentBus, value: bool) -> Result<(), BusError> {
        self.set(bus, OUTPUT_RESET, value)
    }

    pub fn get_reset(&self, bus: &mut InstrumentBus) -> Result<bool, BusError> {
        self.get(bus, INPUT_RESET)
    }

    pub fn turn_to_read(&self, bus: &mut InstrumentBus) -> Result<(), BusError> {
        self.set(bus, OUTPUT_DIRECTION, false)
    }

    pub fn turn_to_write(&self, bus: &mut InstrumentBus) -> Result<(), BusError> {
        self.set(bus, OUTPUT_DIRECTION, true)
    }

    pub fn shift_out_bits(
        &self,
        bus: &mut InstrumentBus,
        byte: u8,
        bit_count: u8,
    ) -> Result<(), BusError> {
        debug_assert!(bit_count > 0);
        let mut arguments = WireBuf::new();
        arguments.put_u8(bit_count - 1);
        arguments.put_u8(byte);
        bus.invoke(self.identifier, API_SHIFT_OUT_BITS, arguments.as_slice())
    }

    pub fn shift_out_data(&self, bus: &mut InstrumentBus, data: &[u8]) -> Result<(), BusError> {
        debug_assert!(!data.is_empty());
        let mut arguments = WireBuf::new();
        arguments.put_varuint(data.len() as u64 - 1);
        arguments.put_bytes(data);
        bus.invoke(self.identifier, API_SHIFT_OUT_DATA, arguments.as_slice())
    }

    pub fn shift_in_bits(&self, bus: &mut InstrumentBus, bit_count: u8) -> Result<(), BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_u8(bit_count - 1);
        bus.invoke(self.identifier, API_SHIFT_IN_BITS, arguments.as_slice())
    }

    pub fn shift_in_data(
        &self,
        bus: &mut InstrumentBus,
        byte_count: usize,
    ) -> Result<(), BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_varuint(byte_count as u64 - 1);
        bus.invoke(self.identifier, API_SHIFT_IN_DATA, arguments.as_slice())
    }

    /// Execute a batch of transfers in one round trip. Results come back
    /// in request order, one per read transfer.
    pub fn transfer(
        &self,
        bus: &mut InstrumentBus,
        transfers: &[SwdTransfer],
    ) -> Result<Vec<TransferResult>, BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_varuint(transfers.len() as u64);
        let mut response_count = 0u64;
        for transfer in transfers {
            transfer.encode(&mut arguments);
            if transfer.is_read() {
                response_count += 1;
            }
        }

        let body = bus.call(self.identifier, API_TRANSFER, arguments.as_slice())?;
        let mut results = WireBuf::from_vec(body);
        let status = results.get_varuint();
        if status != 0 {
            return Err(ProtocolError::StatusNonZero(status).into());
        }
        if results.get_varuint() != response_count {
            return Err(ProtocolError::TransferMismatch.into());
        }
        let mut replies = Vec::with_capacity(response_count as usize);
        for transfer in transfers.iter().filter(|transfer| transfer.is_read()) {
            replies.push(transfer.decode_reply(&mut results)?);
        }
        ensure_clean(&results)?;
        Ok(replies)
    }

    fn transfer_one(
        &self,
        bus: &mut InstrumentBus,
        transfer: SwdTransfer,
    ) -> Result<TransferResult, BusError> {
        let mut replies = self.transfer(bus, core::slice::from_ref(&transfer))?;
        replies
            .pop()
            .ok_or_else(|| ProtocolError::TransferMismatch.into())
    }

    pub fn read_port(
        &self,
        bus: &mut InstrumentBus,
        port: Port,
        register: u8,
    ) -> Result<u32, BusError> {
        self.transfer_one(bus, SwdTransfer::ReadPort { port, register })?
            .word()
    }

    pub fn write_port(
        &self,
        bus: &mut InstrumentBus,
        port: Port,
        register: u8,
        data: u32,
    ) -> Result<(), BusError> {
        self.transfer(
            bus,
            &[SwdTransfer::WritePort {
                port,
                register,
                data,
            }],
        )?;
        Ok(())
    }

    pub fn select_and_read_access_port(
        &self,
        bus: &mut InstrumentBus,
        register: u8,
    ) -> Result<u32, BusError> {
        self.transfer_one(bus, SwdTransfer::SelectAndReadAccessPort { register })?
            .word()
    }

    pub fn select_and_write_access_port(
        &self,
        bus: &mut InstrumentBus,
        register: u8,
        data: u32,
    ) -> Result<(), BusError> {
        self.transfer(
            bus,
            &[SwdTransfer::SelectAndWriteAccessPort { register, data }],
        )?;
        Ok(())
    }

    pub fn read_register(&self, bus: &mut InstrumentBus, register: u16) -> Result<u32, BusError> {
        self.transfer_one(bus, SwdTransfer::ReadRegister { register })?
            .word()
    }

    pub fn write_register(
        &self,
        bus: &mut InstrumentBus,
        register: u16,
        data: u32,
    ) -> Result<(), BusError> {
        self.transfer(bus, &[SwdTransfer::WriteRegister { register, data }])?;
        Ok(())
    }

    pub fn read_memory_word(
        &self,
        bus: &mut InstrumentBus,
        address: u32,
    ) -> Result<u32, BusError> {
        self.transfer_one(bus, SwdTransfer::ReadMemoryWord { address })?
            .word()
    }

    pub fn write_memory_word(
        &self,
        bus: &mut InstrumentBus,
        address: u32,
        data: u32,
    ) -> Result<(), BusError> {
        self.transfer(bus, &[SwdTransfer::WriteMemoryWord { address, data }])?;
        Ok(())
    }

    pub fn read_data(
        &self,
        bus: &mut InstrumentBus,
        address: u32,
        length: u32,
    ) -> Result<Vec<u8>, BusError> {
        self.transfer_one(bus, SwdTransfer::ReadData { address, length })?
            .bytes()
    }

    pub fn write_data(
        &self,
        bus: &mut InstrumentBus,
        address: u32,
        data: &[u8],
    ) -> Result<(), BusError> {
        self.transfer(
            bus,
            &[SwdTransfer::WriteData {
                address,
                data: data.to_vec(),
            }],
        )?;
        Ok(())
    }

    fn write_memory_raw(
        &self,
        bus: &mut InstrumentBus,
        address: u32,
        data: &[u8],
    ) -> Result<(), BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_varuint(address.into());
        arguments.put_varuint(data.len() as u64);
        arguments.put_bytes(data);
        let body = bus.call(self.identifier, API_WRITE_MEMORY, arguments.as_slice())?;
        check_status(body)
    }

    /// Write target memory, chunked.
    pub fn write_memory(
        &self,
        bus: &mut InstrumentBus,
        address: u32,
        data: &[u8],
    ) -> Result<(), BusError> {
        for (index, chunk) in data.chunks(MEMORY_CHUNK_LEN).enumerate() {
            let offset = (index * MEMORY_CHUNK_LEN) as u32;
            self.write_memory_raw(bus, address + offset, chunk)?;
        }
        Ok(())
    }

    fn read_memory_raw(
        &self,
        bus: &mut InstrumentBus,
        address: u32,
        length: u32,
    ) -> Result<Vec<u8>, BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_varuint(address.into());
        arguments.put_varuint(length.into());
        let body = bus.call(self.identifier, API_READ_MEMORY, arguments.as_slice())?;
        let mut results = WireBuf::from_vec(body);
        let status = results.get_varuint();
        if status != 0 {
            return Err(ProtocolError::StatusNonZero(status).into());
        }
        let data = results.get_remaining();
        if data.len() != length as usize {
            return Err(ProtocolError::TransferMismatch.into());
        }
        Ok(data)
    }

    /// Read target memory, chunked.
    pub fn read_memory(
        &self,
        bus: &mut InstrumentBus,
        address: u32,
        length: u32,
    ) -> Result<Vec<u8>, BusError> {
        let mut data = Vec::with_capacity(length as usize);
        let mut offset = 0u32;
        while offset < length {
            let count = (length - offset).min(MEMORY_CHUNK_LEN as u32);
            data.extend_from_slice(&self.read_memory_raw(bus, address + offset, count)?);
            offset += count;
        }
        Ok(data)
    }

    /// Stage `length` bytes from the fixture's storage chip straight into
    /// target memory, no host round trips per chunk.
    pub fn write_from_storage(
        &self,
        bus: &mut InstrumentBus,
        address: u32,
        length: u32,
        storage_identifier: u64,
        storage_address: u32,
    ) -> Result<(), BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_varuint(address.into());
        arguments.put_varuint(length.into());
        arguments.put_varuint(storage_identifier);
        arguments.put_varuint(storage_address.into());
        let body = bus.call(self.identifier, API_WRITE_FROM_STORAGE, arguments.as_slice())?;
        check_status(body)
    }

    /// Compare target memory against the storage chip; 0 means identical.
    pub fn compare_to_storage(
        &self,
        bus: &mut InstrumentBus,
        address: u32,
        length: u32,
        storage_identifier: u64,
        storage_address: u32,
    ) -> Result<u64, BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_varuint(address.into());
        arguments.put_varuint(length.into());
        arguments.put_varuint(storage_identifier);
        arguments.put_varuint(storage_address.into());
        let body = bus.call(self.identifier, API_COMPARE_TO_STORAGE, arguments.as_slice())?;
        let mut results = WireBuf::from_vec(body);
        let code = results.get_varuint();
        ensure_clean(&results)?;
        Ok(code)
    }

    pub fn set_target_id(&self, bus: &mut InstrumentBus, value: u32) -> Result<(), BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_u32(value);
        bus.invoke(self.identifier, API_SET_TARGET_ID, arguments.as_slice())
    }

    pub fn set_access_port_id(
        &self,
        bus: &mut InstrumentBus,
        value: u32,
    ) -> Result<(), BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_u32(value);
        bus.invoke(self.identifier, API_SET_ACCESS_PORT_ID, arguments.as_slice())
    }

    /// Bring up the debug port; returns the DPIDR.
    pub fn connect(&self, bus: &mut InstrumentBus) -> Result<u32, BusError> {
        let body = bus.call(self.identifier, API_CONNECT, &[])?;
        let mut results = WireBuf::from_vec(body);
        let status = results.get_varuint();
        if status != 0 {
            return Err(ProtocolError::StatusNonZero(status).into());
        }
        let dpidr = results.get_u32();
        ensure_clean(&results)?;
        Ok(dpidr)
    }
}

fn check_status(body: Vec<u8>) -> Result<(), BusError> {
    let mut results = WireBuf::from_vec(body);
    let status = results.get_varuint();
    if status != 0 {
        return Err(ProtocolError::StatusNonZero(status).into());
    }
    Ok(())
}
