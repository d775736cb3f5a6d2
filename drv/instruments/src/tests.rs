// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use detour::{Detour, State};
use drv_fixture_hid::scripted::ScriptedChannel;
use drv_fixture_hid::{OUT_REPORT_ID, REPORT_LEN};
use wirebuf::WireBuf;

use super::*;
use crate::error::ProtocolError;

/// Queue one instrument reply, framed and chunked the way the fixture
/// firmware does it.
fn queue_reply(channel: &ScriptedChannel, identifier: u64, api: u64, body: &[u8]) {
    let mut packet = WireBuf::new();
    packet.put_varuint(identifier);
    packet.put_varuint(api);
    packet.put_varuint(body.len() as u64);
    packet.put_bytes(body);
    let mut frame = WireBuf::new();
    frame.put_varuint(packet.len() as u64);
    frame.put_bytes(packet.as_slice());

    for (sequence, chunk) in frame.as_slice().chunks(REPORT_LEN - 1).enumerate() {
        let mut report = [0u8; REPORT_LEN];
        report[0] = sequence as u8;
        report[1..1 + chunk.len()].copy_from_slice(chunk);
        channel.push_reply(report);
    }
}

/// Reassemble the outbound report stream back into logical messages.
fn written_messages(channel: &ScriptedChannel) -> Vec<(u64, u64, Vec<u8>)> {
    let mut messages = Vec::new();
    let mut detour = Detour::new();
    for (report_id, payload) in channel.written() {
        assert_eq!(report_id, OUT_REPORT_ID);
        detour.event(&payload).unwrap();
        if detour.state() == State::Success {
            let mut message = WireBuf::from_vec(detour.take().unwrap());
            let identifier = message.get_varuint();
            let api = message.get_varuint();
            let length = message.get_varuint() as usize;
            let body = message.get_bytes(length);
            assert!(message.is_clean());
            messages.push((identifier, api, body));
        }
    }
    assert_eq!(detour.state(), State::Clear, "partial outbound message");
    messages
}

fn fixture() -> (ScriptedChannel, InstrumentBus) {
    let channel = ScriptedChannel::new();
    let bus = InstrumentBus::new(Box::new(channel.clone()));
    (channel, bus)
}

#[test]
fn set_rgb_report_layout() {
    let (channel, mut bus) = fixture();
    let indicator = Indicator::new(1);
    indicator.set(&mut bus, 1.0, 0.0, 0.0).unwrap();

    let written = channel.written();
    assert_eq!(written.len(), 1);
    let (report_id, payload) = &written[0];
    assert_eq!(*report_id, OUT_REPORT_ID);
    // seq 0, total length 15, instrument 1, api 1, body length 12,
    // r = 1.0f32 little-endian, g = 0, b = 0, zero padding.
    let mut expected = vec![0u8, 15, 1, 1, 12, 0x00, 0x00, 0x80, 0x3f];
    expected.resize(REPORT_LEN, 0);
    assert_eq!(&payload[..], &expected[..]);
}

#[test]
fn call_returns_reply_body() {
    let (channel, mut bus) = fixture();
    let mut body = WireBuf::new();
    body.put_f32(3.3);
    queue_reply(&channel, 2, 1, body.as_slice());

    let voltage = Voltage::new(2);
    assert_eq!(voltage.convert(&mut bus).unwrap(), 3.3);
}

#[test]
fn call_rejects_wrong_instrument() {
    let (channel, mut bus) = fixture();
    let mut body = WireBuf::new();
    body.put_f32(3.3);
    queue_reply(&channel, 7, 1, body.as_slice());

    let voltage = Voltage::new(2);
    match voltage.convert(&mut bus) {
        Err(BusError::Protocol(ProtocolError::InstrumentIdMismatch {
            expected: 2,
            actual: 7,
        })) => {}
        other => panic!("expected id mismatch, got {other:?}"),
    }
}

#[test]
fn call_rejects_wrong_api() {
    let (channel, mut bus) = fixture();
    queue_reply(&channel, 2, 9, &[]);
    let voltage = Voltage::new(2);
    match voltage.convert(&mut bus) {
        Err(BusError::Protocol(ProtocolError::ApiIdMismatch { expected: 1, actual: 9 })) => {}
        other => panic!("expected api mismatch, got {other:?}"),
    }
}

#[test]
fn echo_verifies_payload() {
    let (channel, mut bus) = fixture();
    queue_reply(&channel, MANAGER_IDENTIFIER, 2, &[0xbe, 0xef]);
    bus.echo(&[0xbe, 0xef]).unwrap();

    queue_reply(&channel, MANAGER_IDENTIFIER, 2, &[0x00, 0x00]);
    match bus.echo(&[0xbe, 0xef]) {
        Err(BusError::Protocol(ProtocolError::EchoMismatch)) => {}
        other => panic!("expected echo mismatch, got {other:?}"),
    }
}

#[test]
fn discover_builds_typed_inventory() {
    let (channel, mut bus) = fixture();
    let mut body = WireBuf::new();
    body.put_varuint(3);
    body.put_string("Indicator");
    body.put_varuint(4);
    body.put_string("Storage");
    body.put_varuint(16);
    body.put_string("Frobnicator");
    body.put_varuint(99);
    queue_reply(&channel, MANAGER_IDENTIFIER, 1, body.as_slice());

    let inventory = bus.discover().unwrap();
    assert_eq!(inventory.len(), 2, "unknown categories are skipped");
    assert_eq!(inventory.indicator(4).unwrap().identifier(), 4);
    assert_eq!(inventory.storage(16).unwrap().identifier(), 16);
    assert!(matches!(
        inventory.serial_wire(4),
        Err(BusError::NoSuchInstrument { identifier: 4 })
    ));
    assert!(matches!(
        inventory.relay(5),
        Err(BusError::NoSuchInstrument { identifier: 5 })
    ));
}

fn transfer_reply(payload: impl FnOnce(&mut WireBuf)) -> Vec<u8> {
    let mut body = WireBuf::new();
    payload(&mut body);
    body.into_vec()
}

#[test]
fn transfer_encodes_batch_and_decodes_reply() {
    let (channel, mut bus) = fixture();
    let serial_wire = SerialWire::new(3);

    queue_reply(
        &channel,
        3,
        14,
        &transfer_reply(|body| {
            body.put_varuint(0); // status
            body.put_varuint(1); // response count
            body.put_varuint(0); // ReadRegister discriminant
            body.put_varuint(15); // echoed register
            body.put_u32(0x2000_0101);
        }),
    );

    let transfers = [
        SwdTransfer::WriteRegister {
            register: 15,
            data: 0x2000_0101,
        },
        SwdTransfer::ReadRegister { register: 15 },
    ];
    let results = serial_wire.transfer(&mut bus, &transfers).unwrap();
    assert_eq!(results, vec![TransferResult::Word(0x2000_0101)]);

    // The request body: 2 transfers, write then read.
    let messages = written_messages(&channel);
    assert_eq!(messages.len(), 1);
    let (identifier, api, body) = &messages[0];
    assert_eq!((*identifier, *api), (3, 14));
    let mut expected = WireBuf::new();
    expected.put_varuint(2);
    expected.put_varuint(1); // WriteRegister
    expected.put_varuint(15);
    expected.put_u32(0x2000_0101);
    expected.put_varuint(0); // ReadRegister
    expected.put_varuint(15);
    assert_eq!(&body[..], expected.as_slice());
}

#[test]
fn transfer_rejects_nonzero_status() {
    let (channel, mut bus) = fixture();
    let serial_wire = SerialWire::new(3);
    queue_reply(&channel, 3, 14, &transfer_reply(|body| body.put_varuint(5)));
    match serial_wire.transfer(&mut bus, &[SwdTransfer::ReadRegister { register: 0 }]) {
        Err(BusError::Protocol(ProtocolError::StatusNonZero(5))) => {}
        other => panic!("expected status error, got {other:?}"),
    }
}

#[test]
fn transfer_rejects_count_mismatch() {
    let (channel, mut bus) = fixture();
    let serial_wire = SerialWire::new(3);
    queue_reply(
        &channel,
        3,
        14,
        &transfer_reply(|body| {
            body.put_varuint(0);
            body.put_varuint(2); // should be 1
        }),
    );
    match serial_wire.transfer(&mut bus, &[SwdTransfer::ReadRegister { register: 0 }]) {
        Err(BusError::Protocol(ProtocolError::TransferMismatch)) => {}
        other => panic!("expected transfer mismatch, got {other:?}"),
    }
}

#[test]
fn transfer_rejects_selector_echo_mismatch() {
    let (channel, mut bus) = fixture();
    let serial_wire = SerialWire::new(3);
    queue_reply(
        &channel,
        3,
        14,
        &transfer_reply(|body| {
            body.put_varuint(0);
            body.put_varuint(1);
            body.put_varuint(2); // ReadMemoryWord discriminant
            body.put_u32(0xdead_0000); // wrong echoed address
            body.put_u32(42);
        }),
    );
    match serial_wire.transfer(
        &mut bus,
        &[SwdTransfer::ReadMemoryWord {
            address: 0x2000_0000,
        }],
    ) {
        Err(BusError::Protocol(ProtocolError::TransferMismatch)) => {}
        other => panic!("expected transfer mismatch, got {other:?}"),
    }
}

#[test]
fn transfer_decodes_bulk_read_bytes() {
    let (channel, mut bus) = fixture();
    let serial_wire = SerialWire::new(3);
    queue_reply(
        &channel,
        3,
        14,
        &transfer_reply(|body| {
            body.put_varuint(0);
            body.put_varuint(1);
            body.put_varuint(8); // ReadData discriminant
            body.put_u32(0x1000);
            body.put_varuint(4);
            body.put_bytes(&[1, 2, 3, 4]);
        }),
    );
    let data = serial_wire.read_data(&mut bus, 0x1000, 4).unwrap();
    assert_eq!(data, vec![1, 2, 3, 4]);
}

#[test]
fn write_memory_chunks_at_1k() {
    let (channel, mut bus) = fixture();
    let serial_wire = SerialWire::new(3);
    let data = vec![0xa5u8; 2500];
    // Each chunk's WRITE_MEMORY call expects a zero status reply.
    for _ in 0..3 {
        queue_reply(&channel, 3, 10, &transfer_reply(|body| body.put_varuint(0)));
    }
    serial_wire.write_memory(&mut bus, 0x2000_0000, &data).unwrap();

    let messages = written_messages(&channel);
    assert_eq!(messages.len(), 3);
    let mut expected_address = 0x2000_0000u64;
    for (index, (identifier, api, body)) in messages.iter().enumerate() {
        assert_eq!((*identifier, *api), (3, 10));
        let mut request = WireBuf::from_vec(body.clone());
        assert_eq!(request.get_varuint(), expected_address);
        let length = request.get_varuint();
        let expected_length = if index < 2 { 1024 } else { 452 };
        assert_eq!(length, expected_length);
        expected_address += length;
    }
}

#[test]
fn read_memory_reassembles_chunks() {
    let (channel, mut bus) = fixture();
    let serial_wire = SerialWire::new(3);
    queue_reply(
        &channel,
        3,
        11,
        &transfer_reply(|body| {
            body.put_varuint(0);
            body.put_bytes(&[0x11; 1024]);
        }),
    );
    queue_reply(
        &channel,
        3,
        11,
        &transfer_reply(|body| {
            body.put_varuint(0);
            body.put_bytes(&[0x22; 100]);
        }),
    );
    let data = serial_wire.read_memory(&mut bus, 0x2000_0000, 1124).unwrap();
    assert_eq!(data.len(), 1124);
    assert_eq!(data[0], 0x11);
    assert_eq!(data[1123], 0x22);
}

#[test]
fn storage_write_inserts_echo_barriers() {
    let (channel, mut bus) = fixture();
    let storage = Storage::new(16);
    let data = vec![0x5au8; 5000];
    // Two chunks, each followed by an echo round trip.
    queue_reply(&channel, MANAGER_IDENTIFIER, 2, &[0xbe, 0xef]);
    queue_reply(&channel, MANAGER_IDENTIFIER, 2, &[0xbe, 0xef]);
    storage.write(&mut bus, 0x1000, &data).unwrap();

    let messages = written_messages(&channel);
    let kinds: Vec<_> = messages
        .iter()
        .map(|(identifier, api, _)| (*identifier, *api))
        .collect();
    assert_eq!(kinds, [(16, 2), (0, 2), (16, 2), (0, 2)]);

    // Second chunk lands at address 0x1000 + 4096 and carries the tail.
    let mut request = WireBuf::from_vec(messages[2].2.clone());
    assert_eq!(request.get_varuint(), 0x1000 + 4096);
    assert_eq!(request.get_varuint(), 5000 - 4096);
}

#[test]
fn storage_strided_read_encodes_geometry() {
    let (channel, mut bus) = fixture();
    let storage = Storage::new(16);
    queue_reply(&channel, 16, 3, &[0xf0; 8]);
    let markers = storage
        .read_strided(&mut bus, 0, 8, 1, 4096)
        .unwrap();
    assert_eq!(markers.len(), 8);

    let messages = written_messages(&channel);
    let mut request = WireBuf::from_vec(messages[0].2.clone());
    assert_eq!(request.get_varuint(), 0, "address");
    assert_eq!(request.get_varuint(), 8, "length");
    assert_eq!(request.get_varuint(), 1, "sublength");
    assert_eq!(request.get_varuint(), 4096, "substride");
}

#[test]
fn large_requests_chunk_with_ascending_sequence() {
    let (channel, mut bus) = fixture();
    let storage = Storage::new(16);
    queue_reply(&channel, MANAGER_IDENTIFIER, 2, &[0xbe, 0xef]);
    storage.write(&mut bus, 0, &[0u8; 4096]).unwrap();

    let written = channel.written();
    // 4096 bytes of body plus framing spans 66 reports, then the echo.
    let sequences: Vec<u8> = written[..66].iter().map(|(_, p)| p[0]).collect();
    let expected: Vec<u8> = (0..66).collect();
    assert_eq!(sequences, expected);
}
