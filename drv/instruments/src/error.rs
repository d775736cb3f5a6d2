// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Errors for the instrument bus.
//!
//! Transport errors mean the report stream itself broke; protocol errors
//! mean a well-formed reply violated the contract. Both are fatal to the
//! current call; the link is considered reliable for the length of a test
//! run, so nothing here is retried.

use core::fmt;

use derive_more::From;
use detour::DetourError;
use drv_fixture_hid::HidError;

#[derive(Debug, From)]
pub enum TransportError {
    /// A reply report restarted reassembly mid-message.
    UnexpectedStart,
    /// A reply report skipped or repeated a sequence number.
    OutOfSequence,
    /// A reply deadline expired.
    Timeout,
    #[from]
    Hid(HidError),
}

impl From<DetourError> for TransportError {
    fn from(e: DetourError) -> Self {
        match e {
            DetourError::UnexpectedStart => TransportError::UnexpectedStart,
            DetourError::OutOfSequence => TransportError::OutOfSequence,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::UnexpectedStart => f.write_str("unexpected start of reply"),
            TransportError::OutOfSequence => f.write_str("reply report out of sequence"),
            TransportError::Timeout => f.write_str("reply timed out"),
            TransportError::Hid(e) => write!(f, "{e}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    InstrumentIdMismatch { expected: u64, actual: u64 },
    ApiIdMismatch { expected: u64, actual: u64 },
    /// A transfer reply did not echo the request.
    TransferMismatch,
    /// The fixture reported a nonzero status code.
    StatusNonZero(u64),
    /// An echo reply did not match what was sent.
    EchoMismatch,
    /// A reply body did not decode cleanly.
    Malformed,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InstrumentIdMismatch { expected, actual } => write!(
                f,
                "reply from instrument {actual}, expected {expected}"
            ),
            ProtocolError::ApiIdMismatch { expected, actual } => {
                write!(f, "reply for api {actual}, expected {expected}")
            }
            ProtocolError::TransferMismatch => f.write_str("transfer mismatch"),
            ProtocolError::StatusNonZero(code) => {
                write!(f, "memory transfer issue: code={code}")
            }
            ProtocolError::EchoMismatch => f.write_str("echo mismatch"),
            ProtocolError::Malformed => f.write_str("malformed reply body"),
        }
    }
}

#[derive(Debug, From)]
pub enum BusError {
    #[from]
    Transport(TransportError),
    #[from]
    Protocol(ProtocolError),
    /// Discovery never reported this instrument.
    NoSuchInstrument { identifier: u64 },
}

impl From<HidError> for BusError {
    fn from(e: HidError) -> Self {
        BusError::Transport(e.into())
    }
}

impl From<DetourError> for BusError {
    fn from(e: DetourError) -> Self {
        BusError::Transport(e.into())
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Transport(e) => write!(f, "transport: {e}"),
            BusError::Protocol(e) => write!(f, "protocol: {e}"),
            BusError::NoSuchInstrument { identifier } => {
                write!(f, "instrument {identifier} not found")
            }
        }
    }
}

impl std::error::Error for BusError {}
impl std::error::Error for TransportError {}
impl std::error::Error for ProtocolError {}

/// Check that a reply decoded without tripping any codec flags.
pub(crate) fn ensure_clean(buf: &wirebuf::WireBuf) -> Result<(), BusError> {
    if buf.is_clean() {
        Ok(())
    } else {
        Err(ProtocolError::Malformed.into())
    }
}
