// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Storage chip instrument: raw erase/write/read/hash over the 2 MiB
//! flash, plus the FatFs-style file surface the fixture firmware exposes
//! for its own bookkeeping.
//!
//! Transfers are capped at [`MAX_TRANSFER_LEN`] bytes per api call; the
//! facade chunks larger operations. Writes are posted, so each chunk is
//! followed by a manager echo; the echo reply is the guarantee the chunk
//! has landed before the next instrument call goes out.

use bitflags::bitflags;
use wirebuf::WireBuf;

use crate::bus::InstrumentBus;
use crate::error::{ensure_clean, BusError};

const API_RESET: u64 = 0;
const API_ERASE: u64 = 1;
const API_WRITE: u64 = 2;
const API_READ: u64 = 3;
const API_HASH: u64 = 4;
const API_FILE_MKFS: u64 = 5;
const API_FILE_LIST: u64 = 6;
const API_FILE_OPEN: u64 = 7;
const API_FILE_UNLINK: u64 = 8;
const API_FILE_ADDRESS: u64 = 9;
const API_FILE_EXPAND: u64 = 10;
const API_FILE_WRITE: u64 = 11;
const API_FILE_READ: u64 = 12;

/// Most bytes one storage api call will carry.
pub const MAX_TRANSFER_LEN: usize = 4096;

/// Flush barrier payload, arbitrary but recognizable in traces.
const ECHO_BARRIER: [u8; 2] = [0xbe, 0xef];

bitflags! {
    /// FatFs open-mode bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileMode: u8 {
        const READ = 0x01;
        const WRITE = 0x02;
        const CREATE_NEW = 0x04;
        const CREATE_ALWAYS = 0x08;
        const OPEN_ALWAYS = 0x10;
        const OPEN_APPEND = 0x30;
    }
}

impl FileMode {
    pub const OPEN_EXISTING: FileMode = FileMode::empty();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u32,
    pub date: u32,
    pub time: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Storage {
    identifier: u64,
}

impl Storage {
    pub fn new(identifier: u64) -> Self {
        Self { identifier }
    }

    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    pub fn reset(&self, bus: &mut InstrumentBus) -> Result<(), BusError> {
        bus.invoke(self.identifier, API_RESET, &[])
    }

    pub fn erase(
        &self,
        bus: &mut InstrumentBus,
        address: u32,
        length: u32,
    ) -> Result<(), BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_varuint(address.into());
        arguments.put_varuint(length.into());
        bus.invoke(self.identifier, API_ERASE, arguments.as_slice())
    }

    pub fn write(
        &self,
        bus: &mut InstrumentBus,
        address: u32,
        data: &[u8],
    ) -> Result<(), BusError> {
        for (index, chunk) in data.chunks(MAX_TRANSFER_LEN).enumerate() {
            let offset = (index * MAX_TRANSFER_LEN) as u32;
            let mut arguments = WireBuf::new();
            arguments.put_varuint((address + offset).into());
            arguments.put_varuint(chunk.len() as u64);
            arguments.put_bytes(chunk);
            bus.invoke(self.identifier, API_WRITE, arguments.as_slice())?;
            bus.echo(&ECHO_BARRIER)?;
        }
        Ok(())
    }

    pub fn read(
        &self,
        bus: &mut InstrumentBus,
        address: u32,
        length: u32,
    ) -> Result<Vec<u8>, BusError> {
        self.read_strided(bus, address, length, 0, 0)
    }

    /// Gather `length` bytes as runs of `sublength` every `substride`
    /// (`sublength` 0 means a plain dense read).
    pub fn read_strided(
        &self,
        bus: &mut InstrumentBus,
        address: u32,
        length: u32,
        sublength: u32,
        substride: u32,
    ) -> Result<Vec<u8>, BusError> {
        let mut data = Vec::with_capacity(length as usize);
        let mut offset = 0u32;
        while offset < length {
            let transfer_length = (length - offset).min(MAX_TRANSFER_LEN as u32);
            let transfer_sublength = if sublength == 0 {
                transfer_length
            } else {
                sublength.min(transfer_length)
            };
            let mut arguments = WireBuf::new();
            arguments.put_varuint((address + offset).into());
            arguments.put_varuint(transfer_length.into());
            arguments.put_varuint(transfer_sublength.into());
            arguments.put_varuint(substride.into());
            let body = bus.call(self.identifier, API_READ, arguments.as_slice())?;
            let mut results = WireBuf::from_vec(body);
            data.extend_from_slice(&results.get_bytes(transfer_length as usize));
            ensure_clean(&results)?;
            offset += transfer_length;
        }
        Ok(data)
    }

    /// Chip-side SHA-1 over an address range.
    pub fn hash(
        &self,
        bus: &mut InstrumentBus,
        address: u32,
        length: u32,
    ) -> Result<[u8; 20], BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_varuint(address.into());
        arguments.put_varuint(length.into());
        let body = bus.call(self.identifier, API_HASH, arguments.as_slice())?;
        let mut results = WireBuf::from_vec(body);
        let bytes = results.get_bytes(20);
        ensure_clean(&results)?;
        let mut digest = [0u8; 20];
        digest.copy_from_slice(&bytes);
        Ok(digest)
    }

    pub fn file_mkfs(&self, bus: &mut InstrumentBus) -> Result<bool, BusError> {
        let body = bus.call(self.identifier, API_FILE_MKFS, &[])?;
        decode_flag(body)
    }

    pub fn file_list(&self, bus: &mut InstrumentBus) -> Result<Vec<FileInfo>, BusError> {
        let body = bus.call(self.identifier, API_FILE_LIST, &[])?;
        let mut results = WireBuf::from_vec(body);
        let count = results.get_varuint();
        let mut infos = Vec::new();
        for _ in 0..count {
            infos.push(FileInfo {
                name: results.get_string(),
                size: results.get_u32(),
                date: results.get_u32(),
                time: results.get_u32(),
            });
        }
        ensure_clean(&results)?;
        Ok(infos)
    }

    pub fn file_open(
        &self,
        bus: &mut InstrumentBus,
        name: &str,
        mode: FileMode,
    ) -> Result<bool, BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_string(name);
        arguments.put_varuint(mode.bits().into());
        let body = bus.call(self.identifier, API_FILE_OPEN, arguments.as_slice())?;
        decode_flag(body)
    }

    pub fn file_unlink(
        &self,
        bus: &mut InstrumentBus,
        name: &str,
    ) -> Result<bool, BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_string(name);
        let body = bus.call(self.identifier, API_FILE_UNLINK, arguments.as_slice())?;
        decode_flag(body)
    }

    /// Flash address of a file's contents, if the file exists.
    pub fn file_address(
        &self,
        bus: &mut InstrumentBus,
        name: &str,
    ) -> Result<Option<u32>, BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_string(name);
        let body = bus.call(self.identifier, API_FILE_ADDRESS, arguments.as_slice())?;
        let mut results = WireBuf::from_vec(body);
        let present = results.get_u8() != 0;
        let address = results.get_u32();
        ensure_clean(&results)?;
        Ok(present.then_some(address))
    }

    pub fn file_expand(
        &self,
        bus: &mut InstrumentBus,
        name: &str,
        size: u32,
    ) -> Result<bool, BusError> {
        let mut arguments = WireBuf::new();
        arguments.put_string(name);
        arguments.put_u32(size);
        let body = bus.call(self.identifier, API_FILE_EXPAND, arguments.as_slice())?;
        decode_flag(body)
    }

    pub fn file_write(
        &self,
        bus: &mut InstrumentBus,
        name: &str,
        offset: u32,
        data: &[u8],
    ) -> Result<bool, BusError> {
        for (index, chunk) in data.chunks(MAX_TRANSFER_LEN).enumerate() {
            let chunk_offset = offset + (index * MAX_TRANSFER_LEN) as u32;
            let mut arguments = WireBuf::new();
            arguments.put_string(name);
            arguments.put_u32(chunk_offset);
            arguments.put_u32(chunk.len() as u32);
            arguments.put_bytes(chunk);
            let body = bus.call(self.identifier, API_FILE_WRITE, arguments.as_slice())?;
            if !decode_flag(body)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn file_read(
        &self,
        bus: &mut InstrumentBus,
        name: &str,
        offset: u32,
        size: u32,
    ) -> Result<Option<Vec<u8>>, BusError> {
        let mut data = Vec::with_capacity(size as usize);
        let mut read = 0u32;
        while read < size {
            let count = (size - read).min(MAX_TRANSFER_LEN as u32);
            let mut arguments = WireBuf::new();
            arguments.put_string(name);
            arguments.put_u32(offset + read);
            arguments.put_u32(count);
            let body = bus.call(self.identifier, API_FILE_READ, arguments.as_slice())?;
            let mut results = WireBuf::from_vec(body);
            if results.get_u8() == 0 {
                return Ok(None);
            }
            let actual = results.get_u32();
            data.extend_from_slice(&results.get_bytes(actual as usize));
            ensure_clean(&results)?;
            if actual < count {
                break;
            }
            read += actual;
        }
        Ok(Some(data))
    }
}

fn decode_flag(body: Vec<u8>) -> Result<bool, BusError> {
    let mut results = WireBuf::from_vec(body);
    let flag = results.get_u8() != 0;
    ensure_clean(&results)?;
    Ok(flag)
}
