// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request/response routing to numbered instruments over the report
//! channel.
//!
//! A logical request is `varuint identifier || varuint api || varuint len ||
//! body`, itself length-prefixed and chunked into 63-byte report payloads
//! behind a one-byte sequence number. Replies reassemble through
//! [`Detour`]. Calls are strictly sequential: the next request is not
//! transmitted until the previous reply is fully received, which is what
//! gives every instrument call its happens-before ordering.

use detour::{Detour, State};
use drv_fixture_hid::{ReportChannel, OUT_REPORT_ID, REPORT_LEN};
use wirebuf::WireBuf;

use crate::error::{ensure_clean, BusError, ProtocolError};
use crate::Inventory;

/// The instrument manager is hardwired at identifier 0.
pub const MANAGER_IDENTIFIER: u64 = 0;

/// Manager api ids.
const API_RESET_INSTRUMENTS: u64 = 0;
const API_DISCOVER_INSTRUMENTS: u64 = 1;
const API_ECHO: u64 = 2;

/// Payload bytes per report, after the sequence byte.
const CHUNK_LEN: usize = REPORT_LEN - 1;

pub struct InstrumentBus {
    channel: Box<dyn ReportChannel>,
}

#[derive(Debug)]
pub struct Reply {
    pub identifier: u64,
    pub api: u64,
    pub body: Vec<u8>,
}

impl InstrumentBus {
    pub fn new(channel: Box<dyn ReportChannel>) -> Self {
        Self { channel }
    }

    /// Frame, chunk, and transmit one request.
    pub fn write(
        &mut self,
        identifier: u64,
        api: u64,
        body: &[u8],
    ) -> Result<(), BusError> {
        let mut packet = WireBuf::new();
        packet.put_varuint(identifier);
        packet.put_varuint(api);
        packet.put_varuint(body.len() as u64);
        packet.put_bytes(body);

        let mut frame = WireBuf::new();
        frame.put_varuint(packet.len() as u64);
        frame.put_bytes(packet.as_slice());
        let data = frame.into_vec();

        for (sequence, chunk) in data.chunks(CHUNK_LEN).enumerate() {
            let mut report = [0u8; REPORT_LEN];
            report[0] = sequence as u8;
            report[1..1 + chunk.len()].copy_from_slice(chunk);
            self.channel.write_report(OUT_REPORT_ID, &report)?;
        }
        Ok(())
    }

    /// Collect one reply.
    pub fn read(&mut self) -> Result<Reply, BusError> {
        let mut detour = Detour::new();
        while detour.state() != State::Success {
            let report = self.channel.read_report()?;
            detour.event(&report)?;
        }
        let mut message = WireBuf::from_vec(detour.take().unwrap_or_default());
        let identifier = message.get_varuint();
        let api = message.get_varuint();
        let length = message.get_varuint() as usize;
        let body = message.get_bytes(length);
        ensure_clean(&message)?;
        Ok(Reply {
            identifier,
            api,
            body,
        })
    }

    /// Fire-and-forget request.
    pub fn invoke(
        &mut self,
        identifier: u64,
        api: u64,
        body: &[u8],
    ) -> Result<(), BusError> {
        self.write(identifier, api, body)
    }

    /// Request plus reply, with the reply's routing echo checked.
    pub fn call(
        &mut self,
        identifier: u64,
        api: u64,
        body: &[u8],
    ) -> Result<Vec<u8>, BusError> {
        self.write(identifier, api, body)?;
        let reply = self.read()?;
        if reply.identifier != identifier {
            return Err(ProtocolError::InstrumentIdMismatch {
                expected: identifier,
                actual: reply.identifier,
            }
            .into());
        }
        if reply.api != api {
            return Err(ProtocolError::ApiIdMismatch {
                expected: api,
                actual: reply.api,
            }
            .into());
        }
        Ok(reply.body)
    }

    pub fn reset_instruments(&mut self) -> Result<(), BusError> {
        self.invoke(MANAGER_IDENTIFIER, API_RESET_INSTRUMENTS, &[])
    }

    /// Round-trip through the manager. Storage writes use this as a flush
    /// barrier: once the echo returns, everything before it has landed.
    pub fn echo(&mut self, data: &[u8]) -> Result<(), BusError> {
        let reply = self.call(MANAGER_IDENTIFIER, API_ECHO, data)?;
        if reply != data {
            return Err(ProtocolError::EchoMismatch.into());
        }
        Ok(())
    }

    /// Enumerate the fixture's instruments into typed facades.
    pub fn discover(&mut self) -> Result<Inventory, BusError> {
        let body = self.call(MANAGER_IDENTIFIER, API_DISCOVER_INSTRUMENTS, &[])?;
        let mut results = WireBuf::from_vec(body);
        let count = results.get_varuint();
        let mut inventory = Inventory::default();
        for _ in 0..count {
            let category = results.get_string();
            let identifier = results.get_varuint();
            inventory.add(&category, identifier);
        }
        ensure_clean(&results)?;
        Ok(inventory)
    }
}
