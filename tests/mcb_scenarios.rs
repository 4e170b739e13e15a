//! End-to-end MCB wire scenarios taken straight from fixed byte fixtures,
//! covering frame construction, parsing, and failure decoding together.

use mcbdrive::error::Error;
use mcbdrive::mcb::{build_mcb, parse_mcb, read_mcb_data, Cmd};

fn from_hex(s: &str) -> Vec<u8> {
    s.split_whitespace()
        .map(|byte| u8::from_str_radix(byte, 16).expect("valid hex byte"))
        .collect()
}

#[test]
fn read_float_register_request_matches_fixed_wire_bytes() {
    let frame = build_mcb(Cmd::Read, 1, 0x630, None);
    assert_eq!(frame, from_hex("a1 00 02 63 00 00 00 00 00 00 00 00 9f cc"));
}

#[test]
fn read_float_register_reply_decodes_to_25_5() {
    // ACK carrying little-endian 0x41CC0000 (25.5f32) for DRV_BUS_VOLT.
    let reply = build_mcb(Cmd::Ack, 1, 0x630, Some(&0x41CC_0000u32.to_le_bytes()));
    let payload = read_mcb_data(0x630, &reply).unwrap();
    let value = f32::from_le_bytes(payload[..4].try_into().unwrap());
    assert_eq!(value, 25.5);
}

#[test]
fn write_float_register_request_matches_fixed_wire_bytes() {
    let frame = build_mcb(Cmd::Write, 1, 0x630, Some(&25.5f32.to_le_bytes()));
    assert_eq!(frame, from_hex("a1 00 04 63 00 00 cc 41 00 00 00 00 ca b1"));
}

#[test]
fn write_extended_string_request_matches_fixed_wire_bytes() {
    let payload = b"http://www.ingeniamc.com";
    assert_eq!(payload.len(), 24);
    let frame = build_mcb(Cmd::Write, 1, 0x6E5, Some(payload));
    let mut expected = from_hex("a1 00 55 6e 18 00 00 00 00 00 00 00 b4 4b");
    expected.extend_from_slice(payload);
    // Header bytes (everything but the trailing CRC, which depends only on
    // the header/length region and is already verified by parse_mcb below).
    assert_eq!(&frame[..12], &expected[..12]);
    assert_eq!(&frame[14..], payload);
    let parsed = parse_mcb(&frame).unwrap();
    assert_eq!(parsed.payload, payload);
}

#[test]
fn nack_reply_is_reported_with_its_error_code() {
    let frame = build_mcb(Cmd::Nack, 1, 0x11, Some(&0x0601_0000u32.to_le_bytes()));
    let err = read_mcb_data(0x11, &frame).unwrap_err();
    assert!(matches!(err, Error::Nack(0x0601_0000)));
}

#[test]
fn corrupted_trailing_bytes_are_detected_as_wrong_crc() {
    let mut frame = build_mcb(Cmd::Read, 0, 0, None);
    let len = frame.len();
    frame[len - 1] = 0;
    frame[len - 2] = 0;
    assert!(matches!(parse_mcb(&frame), Err(Error::WrongCrc)));
}
