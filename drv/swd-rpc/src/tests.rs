// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use armv7_debug::{DebugRegister, Dhcsr, Reg};
use drv_fixture_hid::scripted::ScriptedChannel;
use drv_fixture_hid::REPORT_LEN;
use drv_instruments::{InstrumentBus, SerialWire};
use wirebuf::WireBuf;

use super::*;

const SERIAL_WIRE_ID: u64 = 3;
const API_TRANSFER: u64 = 14;
const API_CONNECT: u64 = 18;

fn queue_reply(channel: &ScriptedChannel, api: u64, body: &[u8]) {
    let mut packet = WireBuf::new();
    packet.put_varuint(SERIAL_WIRE_ID);
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

/// Body of the nth outbound logical message.
fn request_body(channel: &ScriptedChannel, index: usize) -> Vec<u8> {
    let mut detour = detour::Detour::new();
    let mut bodies = Vec::new();
    for (_report_id, payload) in channel.written() {
        detour.event(&payload).unwrap();
        if detour.state() == detour::State::Success {
            let mut message = WireBuf::from_vec(detour.take().unwrap());
            let _identifier = message.get_varuint();
            let _api = message.get_varuint();
            let length = message.get_varuint() as usize;
            bodies.push(message.get_bytes(length));
        }
    }
    bodies[index].clone()
}

fn target() -> (ScriptedChannel, InstrumentBus, TargetCore) {
    let channel = ScriptedChannel::new();
    let bus = InstrumentBus::new(Box::new(channel.clone()));
    let core = TargetCore::new(SerialWire::new(SERIAL_WIRE_ID));
    (channel, bus, core)
}

fn empty_transfer_reply() -> Vec<u8> {
    let mut body = WireBuf::new();
    body.put_varuint(0);
    body.put_varuint(0);
    body.into_vec()
}

fn dhcsr_read_reply(value: u32) -> Vec<u8> {
    let mut body = WireBuf::new();
    body.put_varuint(0);
    body.put_varuint(1);
    body.put_varuint(2); // ReadMemoryWord
    body.put_u32(Dhcsr::ADDRESS);
    body.put_u32(value);
    body.into_vec()
}

fn register_read_reply(reg: Reg, value: u32) -> Vec<u8> {
    let mut body = WireBuf::new();
    body.put_varuint(0);
    body.put_varuint(1);
    body.put_varuint(0); // ReadRegister
    body.put_varuint(reg as u64);
    body.put_u32(value);
    body.into_vec()
}

#[test]
fn call_stages_registers_and_returns_r0() {
    let (channel, mut bus, core) = target();
    queue_reply(&channel, API_TRANSFER, &empty_transfer_reply()); // setup batch
    queue_reply(&channel, API_TRANSFER, &dhcsr_read_reply(0x0003_0003)); // halted
    queue_reply(&channel, API_TRANSFER, &register_read_reply(Reg::R0, 0)); // status

    let request = CallRequest::new(0x2000_0100, 0x2000_0180, 0x2000_4000)
        .args([0x0800_0000, 0x2000_2000, 1024, 0]);
    assert_eq!(core.call(&mut bus, &request).unwrap(), 0);

    // The setup batch: halt, R0..R3, SP, LR, PC, resume; one round trip.
    let mut setup = WireBuf::from_vec(request_body(&channel, 0));
    assert_eq!(setup.get_varuint(), 9, "batch length");

    assert_eq!(setup.get_varuint(), 3, "WriteMemoryWord");
    assert_eq!(setup.get_u32(), Dhcsr::ADDRESS);
    assert_eq!(setup.get_u32(), Dhcsr::halt().bits());

    for (reg, value) in [
        (Reg::R0, 0x0800_0000),
        (Reg::R1, 0x2000_2000),
        (Reg::R2, 1024),
        (Reg::R3, 0),
        (Reg::Sp, 0x2000_4000),
        (Reg::Lr, 0x2000_0180 | 1),
        (Reg::Pc, 0x2000_0100 | 1),
    ] {
        assert_eq!(setup.get_varuint(), 1, "WriteRegister");
        assert_eq!(setup.get_varuint(), reg as u64);
        assert_eq!(setup.get_u32(), value, "{reg:?}");
    }

    assert_eq!(setup.get_varuint(), 3, "WriteMemoryWord");
    assert_eq!(setup.get_u32(), Dhcsr::ADDRESS);
    assert_eq!(setup.get_u32(), Dhcsr::resume().bits());
    assert_eq!(setup.remaining_len(), 0);
}

#[test]
fn call_timeout_captures_diagnostic_dump() {
    let (channel, mut bus, core) = target();
    queue_reply(&channel, API_TRANSFER, &empty_transfer_reply()); // setup
    // Still running (debugen only), and the deadline is already gone.
    queue_reply(&channel, API_TRANSFER, &dhcsr_read_reply(0x0008_0001));

    // The dump batch: DHCSR plus R0..R3, SP, LR, PC.
    let mut dump = WireBuf::new();
    dump.put_varuint(0);
    dump.put_varuint(8);
    dump.put_varuint(2);
    dump.put_u32(Dhcsr::ADDRESS);
    dump.put_u32(0x0008_0001); // lockup
    for (reg, value) in [
        (Reg::R0, 0xaaaa_0000u32),
        (Reg::R1, 1),
        (Reg::R2, 2),
        (Reg::R3, 3),
        (Reg::Sp, 0x2000_4000),
        (Reg::Lr, 0x2000_0181),
        (Reg::Pc, 0x0800_1234),
    ] {
        dump.put_varuint(0);
        dump.put_varuint(reg as u64);
        dump.put_u32(value);
    }
    queue_reply(&channel, API_TRANSFER, dump.as_slice());

    let request = CallRequest::new(0x2000_0100, 0x2000_0180, 0x2000_4000)
        .timeout(Duration::ZERO);
    match core.call(&mut bus, &request) {
        Err(SwdError::RpcTimeout(dump)) => {
            assert!(dump.dhcsr.is_lockup());
            assert_eq!(dump.pc, 0x0800_1234);
            let text = dump.to_string();
            assert!(text.contains("lockup"), "{text}");
            assert!(text.contains("pc=0x08001234"), "{text}");
        }
        other => panic!("expected RpcTimeout, got {other:?}"),
    }
}

#[test]
fn connect_checks_debug_port_id() {
    let (channel, mut bus, core) = target();
    let mut body = WireBuf::new();
    body.put_varuint(0);
    body.put_u32(0x6ba0_2477);
    queue_reply(&channel, API_CONNECT, body.as_slice());
    assert_eq!(core.connect(&mut bus, Some(0x6ba0_2477)).unwrap(), 0x6ba0_2477);

    let mut body = WireBuf::new();
    body.put_varuint(0);
    body.put_u32(0x0bc1_2477);
    queue_reply(&channel, API_CONNECT, body.as_slice());
    match core.connect(&mut bus, Some(0x6ba0_2477)) {
        Err(SwdError::UnexpectedIdr { actual: 0x0bc1_2477, .. }) => {}
        other => panic!("expected UnexpectedIdr, got {other:?}"),
    }
}

#[test]
fn retry_reports_expiry() {
    match retry(Duration::ZERO, "device erase", || Ok(false)) {
        Err(SwdError::Timeout("device erase")) => {}
        other => panic!("expected Timeout, got {other:?}"),
    }
    retry(Duration::from_secs(1), "instant", || Ok(true)).unwrap();
}

#[test]
fn soc_batches_compose() {
    use soc::{nrf53::Nrf53, Soc};

    let soc = Nrf53;
    let mut transfers = Vec::new();
    soc.append_gpio_config_transfers(4, true, &mut transfers);
    soc.append_gpio_write_transfers(4, true, &mut transfers);
    soc.append_input_read_transfers(&mut transfers);
    assert_eq!(transfers.len(), 3);
    assert!(matches!(
        transfers[0],
        drv_instruments::SwdTransfer::WriteMemoryWord { data: 0x10, .. }
    ));
}
