//! Motion Control Bus (MCB) frame codec.
//!
//! MCB is a fixed 14-byte header/control region with an optional
//! variable-length extended payload, used identically over UDP, TCP and
//! as the on-wire shape of CAN/CoE SDO transfers. See `ingenialink`'s
//! `utils/mcb.py` for the reference byte layout this module reproduces.

use crate::error::{Error, Result};
use crc::{Crc, CRC_16_XMODEM};

const CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Default node identifier the client puts in the upper nibble of the
/// header's first byte.
pub const DEFAULT_NODE: u8 = 0x0A;

const HEADER_SIZE: usize = 4;
const INLINE_DATA_SIZE: usize = 8;
const CRC_SIZE: usize = 2;
/// Size of a non-extended frame: header + inline data + CRC.
pub const FRAME_SIZE: usize = HEADER_SIZE + INLINE_DATA_SIZE + CRC_SIZE;

/// MCB commands. Only `Read`/`Write` are ever issued by the client; the
/// rest are only ever received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmd {
    Read,
    Write,
    Ack,
    Nack,
    ReadError,
    WriteError,
}

impl Cmd {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            1 => Some(Cmd::Read),
            2 => Some(Cmd::Write),
            3 => Some(Cmd::Ack),
            5 => Some(Cmd::Nack),
            6 => Some(Cmd::ReadError),
            7 => Some(Cmd::WriteError),
            _ => None,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Cmd::Read => 1,
            Cmd::Write => 2,
            Cmd::Ack => 3,
            Cmd::Nack => 5,
            Cmd::ReadError => 6,
            Cmd::WriteError => 7,
        }
    }
}

/// A decoded MCB frame.
#[derive(Debug, Clone)]
pub struct ParsedFrame {
    pub address: u16,
    pub subnode: u8,
    pub cmd: Cmd,
    pub payload: Vec<u8>,
}

/// Build an MCB frame for `cmd` targeting `address` on `subnode`.
///
/// `data == None` encodes 8 zero bytes. `data` up to 8 bytes is placed
/// inline and zero-padded. Longer `data` sets the extended flag, encodes
/// its length as a little-endian u64 in the inline region, and appends the
/// payload verbatim after the CRC.
pub fn build_mcb(cmd: Cmd, subnode: u8, address: u16, data: Option<&[u8]>) -> Vec<u8> {
    let node_header: u16 = ((DEFAULT_NODE as u16) << 4) | (subnode as u16 & 0xF);

    let (inline, extended): ([u8; 8], bool) = match data {
        None => ([0u8; 8], false),
        Some(d) if d.len() <= INLINE_DATA_SIZE => {
            let mut buf = [0u8; 8];
            buf[..d.len()].copy_from_slice(d);
            (buf, false)
        }
        Some(d) => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&(d.len() as u64).to_le_bytes());
            (buf, true)
        }
    };

    let cmd_header: u16 = ((address & 0x0FFF) << 4) | ((cmd.bits() as u16) << 1) | (extended as u16);

    let mut frame = Vec::with_capacity(FRAME_SIZE + data.map(|d| d.len()).unwrap_or(0));
    frame.extend_from_slice(&node_header.to_le_bytes());
    frame.extend_from_slice(&cmd_header.to_le_bytes());
    frame.extend_from_slice(&inline);

    let crc = CRC.checksum(&frame[..HEADER_SIZE + INLINE_DATA_SIZE]);
    frame.extend_from_slice(&crc.to_le_bytes());

    if extended {
        frame.extend_from_slice(data.expect("extended frame implies data present"));
    }

    frame
}

/// Parse a raw MCB frame, validating the CRC over the first 12 bytes.
pub fn parse_mcb(frame: &[u8]) -> Result<ParsedFrame> {
    if frame.len() < FRAME_SIZE {
        return Err(Error::Io { message: "frame shorter than MCB header".into(), uid: None });
    }

    let pre_crc = &frame[..HEADER_SIZE + INLINE_DATA_SIZE];
    let recv_crc = u16::from_le_bytes([frame[12], frame[13]]);
    if CRC.checksum(pre_crc) != recv_crc {
        return Err(Error::WrongCrc);
    }

    let node_header = u16::from_le_bytes([frame[0], frame[1]]);
    let cmd_header = u16::from_le_bytes([frame[2], frame[3]]);

    let subnode = (node_header & 0xF) as u8;
    let address = (cmd_header >> 4) & 0x0FFF;
    let extended = (cmd_header & 1) != 0;
    let cmd_bits = ((cmd_header >> 1) & 0x7) as u8;
    let cmd = Cmd::from_bits(cmd_bits)
        .ok_or_else(|| Error::Io { message: format!("unknown MCB command bits {cmd_bits}"), uid: None })?;

    let payload = if extended {
        let len = u64::from_le_bytes(frame[4..12].try_into().unwrap()) as usize;
        frame
            .get(FRAME_SIZE..FRAME_SIZE + len)
            .ok_or_else(|| Error::Io { message: "extended payload shorter than declared length".into(), uid: None })?
            .to_vec()
    } else {
        frame[4..12].to_vec()
    };

    Ok(ParsedFrame { address, subnode, cmd, payload })
}

/// Parse a frame and extract its payload, treating anything other than
/// `Ack` as a protocol failure.
pub fn read_mcb_data(expected_address: u16, frame: &[u8]) -> Result<Vec<u8>> {
    let parsed = parse_mcb(frame)?;

    if parsed.cmd != Cmd::Ack {
        let code = parsed
            .payload
            .get(0..4)
            .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
            .unwrap_or(0);
        return Err(Error::Nack(code));
    }

    if parsed.address != expected_address {
        return Err(Error::WrongRegister { expected: expected_address, received: parsed.address });
    }

    Ok(parsed.payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_frame_is_14_bytes() {
        let frame = build_mcb(Cmd::Read, 0, 0, None);
        assert_eq!(frame.len(), FRAME_SIZE);
        let parsed = parse_mcb(&frame).unwrap();
        assert_eq!(parsed.cmd, Cmd::Read);
        assert_eq!(parsed.address, 0);
        assert_eq!(parsed.subnode, 0);
        assert_eq!(parsed.payload, vec![0u8; 8]);
    }

    #[test]
    fn extended_frame_carries_length_and_payload() {
        let payload = b"http://www.ingeniamc.com"; // 24 bytes
        let frame = build_mcb(Cmd::Write, 1, 0x6E5, Some(payload));
        assert_eq!(frame.len(), FRAME_SIZE + payload.len());
        let parsed = parse_mcb(&frame).unwrap();
        assert_eq!(parsed.payload, payload);
    }

    #[test]
    fn read_float_register_scenario() {
        // Drive replies with ACK carrying little-endian 0x41CC0000 (25.5f32)
        // for DRV_BUS_VOLT at address 0x630, subnode 1.
        let reply = build_mcb(Cmd::Ack, 1, 0x630, Some(&0x41CC_0000u32.to_le_bytes()));
        let payload = read_mcb_data(0x630, &reply).unwrap();
        let value = f32::from_le_bytes(payload[..4].try_into().unwrap());
        assert_eq!(value, 25.5f32);
    }

    #[test]
    fn wrong_crc_detected() {
        let mut frame = build_mcb(Cmd::Read, 1, 0x630, None);
        let n = frame.len();
        frame[n - 1] = 0;
        frame[n - 2] = 0;
        assert!(matches!(parse_mcb(&frame), Err(Error::WrongCrc)));
    }

    #[test]
    fn nack_decoding() {
        // cmd = NACK (5), payload carries a u32 error code.
        let frame = build_mcb(Cmd::Nack, 0, 0x11, Some(&0x0601_0000u32.to_le_bytes()));
        let err = read_mcb_data(0x11, &frame).unwrap_err();
        assert!(matches!(err, Error::Nack(0x0601_0000)));
    }

    #[test]
    fn round_trip_preserves_inputs() {
        for len in [0usize, 1, 8, 9, 24, 512] {
            let data: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
            let frame = build_mcb(Cmd::Write, 3, 0x200, if len == 0 { None } else { Some(&data) });
            let parsed = parse_mcb(&frame).unwrap();
            assert_eq!(parsed.subnode, 3);
            assert_eq!(parsed.address, 0x200);
            if len == 0 {
                assert_eq!(parsed.payload, vec![0u8; 8]);
            } else if len <= 8 {
                let mut expected = data.clone();
                expected.resize(8, 0);
                assert_eq!(parsed.payload, expected);
            } else {
                assert_eq!(parsed.payload, data);
            }
        }
    }
}
