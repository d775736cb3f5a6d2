// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reassembly of one logical message from fixed-size transport reports.
//!
//! Instrument replies arrive as a train of 64-byte HID reports. Each report
//! payload opens with a varuint sequence number; the report with sequence 0
//! additionally carries a varuint total length before the first body bytes.
//! [`Detour`] accumulates the train, checks the sequence, and drops the
//! zero padding the fixed-size transport appends to the final report.

use core::fmt;

use wirebuf::WireBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Clear,
    Intermediate,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetourError {
    /// A report with sequence 0 arrived while a message was mid-reassembly.
    UnexpectedStart,
    /// A follow-up report skipped or repeated a sequence number.
    OutOfSequence,
}

impl fmt::Display for DetourError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetourError::UnexpectedStart => f.write_str("unexpected start of message"),
            DetourError::OutOfSequence => f.write_str("report out of sequence"),
        }
    }
}

impl std::error::Error for DetourError {}

#[derive(Debug, Default)]
pub struct Detour {
    state: State,
    buffer: Vec<u8>,
    length: usize,
    sequence: u64,
}

impl Default for State {
    fn default() -> Self {
        State::Clear
    }
}

impl Detour {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn clear(&mut self) {
        self.state = State::Clear;
        self.buffer.clear();
        self.length = 0;
        self.sequence = 0;
    }

    /// Take the reassembled message, resetting for the next one.
    ///
    /// Returns `None` unless the state is [`State::Success`].
    pub fn take(&mut self) -> Option<Vec<u8>> {
        if self.state != State::Success {
            return None;
        }
        let buffer = core::mem::take(&mut self.buffer);
        self.clear();
        Some(buffer)
    }

    /// Feed one report payload (sequence byte included).
    pub fn event(&mut self, data: &[u8]) -> Result<(), DetourError> {
        let mut report = WireBuf::from_vec(data.to_vec());
        let sequence = report.get_varuint();
        if sequence == 0 {
            if self.sequence != 0 {
                return Err(DetourError::UnexpectedStart);
            }
            self.start(&report.get_remaining());
        } else {
            if sequence != self.sequence {
                return Err(DetourError::OutOfSequence);
            }
            self.extend(&report.get_remaining());
        }
        Ok(())
    }

    fn start(&mut self, data: &[u8]) {
        let mut body = WireBuf::from_vec(data.to_vec());
        self.state = State::Intermediate;
        self.length = body.get_varuint() as usize;
        self.sequence = 0;
        self.buffer.clear();
        self.extend(&body.get_remaining());
    }

    fn extend(&mut self, data: &[u8]) {
        let room = self.length - self.buffer.len();
        if data.len() <= room {
            self.buffer.extend_from_slice(data);
        } else {
            // Trailing bytes are padding from the fixed-size transport.
            self.buffer.extend_from_slice(&data[..room]);
        }
        if self.buffer.len() >= self.length {
            self.state = State::Success;
        } else {
            self.sequence += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(sequence: u8, body: &[u8]) -> Vec<u8> {
        let mut data = vec![sequence];
        data.extend_from_slice(body);
        data.resize(64, 0);
        data
    }

    #[test]
    fn single_report_message() {
        let mut detour = Detour::new();
        let mut body = vec![5u8];
        body.extend_from_slice(&[1, 2, 3, 4, 5]);
        detour.event(&report(0, &body)).unwrap();
        assert_eq!(detour.state(), State::Success);
        assert_eq!(detour.take().unwrap(), &[1, 2, 3, 4, 5]);
        assert_eq!(detour.state(), State::Clear);
    }

    #[test]
    fn two_report_message() {
        // 70 bytes of payload: length prefix + 62 in the first report, the
        // remaining 8 (plus padding) in the second.
        let payload: Vec<u8> = (0..70u8).collect();
        let mut first = vec![70u8];
        first.extend_from_slice(&payload[..62]);
        let mut detour = Detour::new();
        detour.event(&report(0, &first)).unwrap();
        assert_eq!(detour.state(), State::Intermediate);
        detour.event(&report(1, &payload[62..])).unwrap();
        assert_eq!(detour.state(), State::Success);
        assert_eq!(detour.take().unwrap(), payload);
    }

    #[test]
    fn restart_mid_message_is_rejected() {
        let mut detour = Detour::new();
        let mut first = vec![70u8];
        first.extend_from_slice(&[0; 62]);
        detour.event(&report(0, &first)).unwrap();
        assert_eq!(
            detour.event(&report(0, &first)),
            Err(DetourError::UnexpectedStart)
        );
    }

    #[test]
    fn sequence_gap_is_rejected() {
        let mut detour = Detour::new();
        let mut first = vec![200u8, 1];
        first.extend_from_slice(&[0; 61]);
        detour.event(&report(0, &first)).unwrap();
        assert_eq!(
            detour.event(&report(2, &[0; 63])),
            Err(DetourError::OutOfSequence)
        );
    }

    #[test]
    fn padding_is_discarded() {
        let mut detour = Detour::new();
        let mut body = vec![3u8];
        body.extend_from_slice(&[9, 9, 9]);
        detour.event(&report(0, &body)).unwrap();
        assert_eq!(detour.take().unwrap(), &[9, 9, 9]);
    }
}
