//! Transport framing
//!
//! Pure byte-level framing for each transport flavor, kept free of I/O so the
//! state machines are testable in isolation:
//!
//! - **MBAP** (TCP/UDP): `[txid:u16][protocol:u16][length:u16][unit:u8][pdu]`
//!   where `length` counts the unit byte plus the PDU.
//! - **RTU** (serial and RTU-over-TCP): `[unit:u8][pdu][crc_lo][crc_hi]`.
//!   On serial lines the frame boundary is inter-character silence; on stream
//!   sockets it is derived from the per-function length tables below.
//! - **ASCII** (serial): `':'` + two uppercase hex digits per byte + LRC +
//!   CR LF. No time-based gap rule.
//!
//! The transports own the sockets and feed bytes through these functions.

use std::time::Duration;

use crate::constants::*;
use crate::error::{ModbusError, ModbusResult};
use crate::wire::{crc16, lrc};

// ============================================================================
// MBAP (TCP/UDP)
// ============================================================================

/// Decoded MBAP header (the 6 bytes before the unit id).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Number of following bytes: unit id + PDU.
    pub length: u16,
}

impl MbapHeader {
    /// Parse the 6-byte header. The protocol id is preserved but not
    /// validated; anything but 0 is merely unusual.
    pub fn parse(bytes: &[u8]) -> ModbusResult<Self> {
        if bytes.len() < MBAP_HEADER_LEN {
            return Err(ModbusError::truncated("MBAP header shorter than 6 bytes"));
        }
        let header = Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
        };
        if header.length < 2 || header.length as usize > MAX_MBAP_LENGTH {
            return Err(ModbusError::protocol(format!(
                "MBAP length field {} outside 2..={}",
                header.length, MAX_MBAP_LENGTH
            )));
        }
        Ok(header)
    }
}

/// Encode a full MBAP frame around `pdu`.
pub fn encode_mbap(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + 1 + pdu.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
    frame.push(unit_id);
    frame.extend_from_slice(pdu);
    frame
}

/// Decode a complete MBAP datagram (header + body in one buffer), as UDP
/// endpoints receive it. Returns (transaction id, unit id, pdu).
pub fn decode_mbap(frame: &[u8]) -> ModbusResult<(u16, u8, Vec<u8>)> {
    let header = MbapHeader::parse(frame)?;
    let body = &frame[MBAP_HEADER_LEN..];
    if body.len() < header.length as usize {
        return Err(ModbusError::truncated(format!(
            "MBAP body has {} of {} declared bytes",
            body.len(),
            header.length
        )));
    }
    let body = &body[..header.length as usize];
    Ok((header.transaction_id, body[0], body[1..].to_vec()))
}

// ============================================================================
// RTU
// ============================================================================

/// Encode an RTU ADU: unit + pdu + CRC (low byte first).
pub fn encode_rtu(unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + pdu.len() + 2);
    frame.push(unit_id);
    frame.extend_from_slice(pdu);
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Validate the CRC of a complete RTU ADU and split it into (unit, pdu).
pub fn decode_rtu(frame: &[u8]) -> ModbusResult<(u8, Vec<u8>)> {
    if frame.len() < 4 {
        return Err(ModbusError::truncated(format!(
            "RTU frame of {} bytes",
            frame.len()
        )));
    }
    let data_len = frame.len() - 2;
    let received = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);
    let calculated = crc16(&frame[..data_len]);
    if received != calculated {
        return Err(ModbusError::checksum(format!(
            "CRC expected 0x{:04X}, got 0x{:04X}",
            calculated, received
        )));
    }
    Ok((frame[0], frame[1..data_len].to_vec()))
}

/// Minimum inter-frame silence for RTU: 3.5 character times of 11 bits each,
/// with a conservative 1.75 ms floor at 19200 baud and above.
pub fn frame_gap(baud_rate: u32) -> Duration {
    if baud_rate >= 19200 {
        Duration::from_micros(1750)
    } else {
        Duration::from_micros(38_500_000 / u64::from(baud_rate.max(1)))
    }
}

// ============================================================================
// RTU-over-TCP length derivation
// ============================================================================

/// Result of asking the length tables how long the current PDU is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduLength {
    /// The PDU spans exactly this many bytes (function byte included).
    Known(usize),
    /// More prefix bytes are needed before the length is determined.
    Partial,
    /// The function has a variable sub-encoding the tables cannot size
    /// (FC43/MEI); the caller must drain what the peer sent.
    Variable,
}

/// PDU length of a request ADU being assembled in `adu` (unit at index 0,
/// function at index 1). Streaming decoders call this after every byte.
pub fn request_pdu_len(adu: &[u8]) -> ModbusResult<PduLength> {
    if adu.len() < 2 {
        return Ok(PduLength::Partial);
    }
    let len = match adu[1] {
        FC_READ_COILS..=FC_WRITE_SINGLE_REGISTER => PduLength::Known(5),
        FC_WRITE_MULTIPLE_COILS | FC_WRITE_MULTIPLE_REGISTERS => {
            if adu.len() > 6 {
                PduLength::Known(6 + adu[6] as usize)
            } else {
                PduLength::Partial
            }
        }
        FC_READ_FILE_RECORD | FC_WRITE_FILE_RECORD => {
            if adu.len() > 2 {
                PduLength::Known(2 + adu[2] as usize)
            } else {
                PduLength::Partial
            }
        }
        FC_MASK_WRITE_REGISTER => PduLength::Known(7),
        FC_READ_WRITE_MULTIPLE_REGISTERS => {
            if adu.len() > 10 {
                PduLength::Known(10 + adu[10] as usize)
            } else {
                PduLength::Partial
            }
        }
        FC_READ_FIFO_QUEUE => PduLength::Known(3),
        FC_READ_DEVICE_ID => PduLength::Known(4),
        code => return Err(ModbusError::invalid_function(code)),
    };
    Ok(len)
}

/// PDU length of a response ADU being assembled in `adu` (unit at index 0,
/// function at index 1).
pub fn response_pdu_len(adu: &[u8]) -> ModbusResult<PduLength> {
    if adu.len() < 2 {
        return Ok(PduLength::Partial);
    }
    let fc = adu[1];
    if fc & EXCEPTION_FLAG != 0 {
        return Ok(PduLength::Known(2));
    }
    let len = match fc {
        FC_READ_COILS
        | FC_READ_DISCRETE_INPUTS
        | FC_READ_HOLDING_REGISTERS
        | FC_READ_INPUT_REGISTERS
        | FC_READ_FILE_RECORD
        | FC_WRITE_FILE_RECORD
        | FC_READ_WRITE_MULTIPLE_REGISTERS => {
            if adu.len() > 2 {
                PduLength::Known(2 + adu[2] as usize)
            } else {
                PduLength::Partial
            }
        }
        FC_WRITE_SINGLE_COIL
        | FC_WRITE_SINGLE_REGISTER
        | FC_WRITE_MULTIPLE_COILS
        | FC_WRITE_MULTIPLE_REGISTERS => PduLength::Known(5),
        FC_MASK_WRITE_REGISTER => PduLength::Known(7),
        FC_READ_FIFO_QUEUE => {
            if adu.len() > 3 {
                PduLength::Known(3 + u16::from_be_bytes([adu[2], adu[3]]) as usize)
            } else {
                PduLength::Partial
            }
        }
        // The MEI object list cannot be sized without walking it.
        FC_READ_DEVICE_ID => PduLength::Variable,
        code => return Err(ModbusError::invalid_function(code)),
    };
    Ok(len)
}

// ============================================================================
// ASCII
// ============================================================================

fn nibble_to_ascii(nibble: u8) -> u8 {
    if nibble < 10 {
        b'0' + nibble
    } else {
        b'A' + (nibble - 10)
    }
}

fn ascii_to_nibble(c: u8) -> ModbusResult<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(ModbusError::checksum(format!(
            "invalid ASCII hex character 0x{:02X}",
            c
        ))),
    }
}

/// Encode an ASCII ADU: ':' + hex(unit + pdu + lrc) + CR LF.
pub fn encode_ascii(unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(1 + pdu.len());
    raw.push(unit_id);
    raw.extend_from_slice(pdu);
    let check = lrc(&raw);

    let mut frame = Vec::with_capacity(raw.len() * 2 + 5);
    frame.push(b':');
    for &byte in raw.iter().chain(std::iter::once(&check)) {
        frame.push(nibble_to_ascii(byte >> 4));
        frame.push(nibble_to_ascii(byte & 0x0F));
    }
    frame.push(b'\r');
    frame.push(b'\n');
    frame
}

/// Decode a complete ASCII ADU (from ':' through CRLF) into (unit, pdu).
pub fn decode_ascii(frame: &[u8]) -> ModbusResult<(u8, Vec<u8>)> {
    // ":UUFFLL\r\n" is the shortest possible frame.
    if frame.len() < 9 {
        return Err(ModbusError::truncated(format!(
            "ASCII frame of {} bytes",
            frame.len()
        )));
    }
    if frame[0] != b':' {
        return Err(ModbusError::protocol("ASCII frame does not start with ':'"));
    }
    if frame[frame.len() - 2] != b'\r' || frame[frame.len() - 1] != b'\n' {
        return Err(ModbusError::truncated("ASCII frame does not end with CRLF"));
    }
    let hex = &frame[1..frame.len() - 2];
    if hex.len() % 2 != 0 {
        return Err(ModbusError::checksum("odd number of ASCII hex digits"));
    }

    let mut raw = Vec::with_capacity(hex.len() / 2);
    for pair in hex.chunks(2) {
        raw.push((ascii_to_nibble(pair[0])? << 4) | ascii_to_nibble(pair[1])?);
    }
    if raw.len() < 3 {
        return Err(ModbusError::truncated("ASCII frame too short after decode"));
    }

    let Some(received) = raw.pop() else {
        return Err(ModbusError::truncated("ASCII frame too short after decode"));
    };
    let calculated = lrc(&raw);
    if received != calculated {
        return Err(ModbusError::checksum(format!(
            "LRC expected 0x{:02X}, got 0x{:02X}",
            calculated, received
        )));
    }
    Ok((raw[0], raw[1..].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mbap_read_holding_registers_frame() {
        let pdu = [0x03, 0x00, 0x00, 0x00, 0x03];
        let frame = encode_mbap(0x0001, 0x01, &pdu);
        assert_eq!(
            frame,
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x03]
        );

        let (txid, unit, decoded) = decode_mbap(&frame).unwrap();
        assert_eq!(txid, 1);
        assert_eq!(unit, 1);
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn test_mbap_header_truncated() {
        assert!(matches!(
            MbapHeader::parse(&[0x00, 0x01, 0x00]),
            Err(ModbusError::Truncated { .. })
        ));
    }

    #[test]
    fn test_mbap_length_bounds() {
        // Length 1 cannot cover unit id + function byte.
        let err = MbapHeader::parse(&[0, 1, 0, 0, 0, 1]).unwrap_err();
        assert!(matches!(err, ModbusError::Protocol { .. }));

        // Length 300 exceeds the MBAP maximum of 254.
        let err = MbapHeader::parse(&[0, 1, 0, 0, 0x01, 0x2C]).unwrap_err();
        assert!(matches!(err, ModbusError::Protocol { .. }));
    }

    #[test]
    fn test_mbap_body_shorter_than_declared() {
        let mut frame = encode_mbap(7, 1, &[0x03, 0x00, 0x00, 0x00, 0x01]);
        frame.truncate(frame.len() - 2);
        assert!(matches!(
            decode_mbap(&frame),
            Err(ModbusError::Truncated { .. })
        ));
    }

    #[test]
    fn test_rtu_roundtrip() {
        let pdu = [0x05, 0x00, 0xAC, 0xFF, 0x00];
        let frame = encode_rtu(0x02, &pdu);
        assert_eq!(frame.len(), 8);
        assert_eq!(&frame[..6], &[0x02, 0x05, 0x00, 0xAC, 0xFF, 0x00]);

        let (unit, decoded) = decode_rtu(&frame).unwrap();
        assert_eq!(unit, 2);
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn test_rtu_single_bit_flip_rejected() {
        let frame = encode_rtu(0x01, &[0x03, 0x00, 0x00, 0x00, 0x03]);
        for byte in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(
                    matches!(
                        decode_rtu(&corrupted),
                        Err(ModbusError::Checksum { .. })
                    ),
                    "flip of byte {} bit {} was not caught",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_rtu_frame_too_short() {
        assert!(matches!(
            decode_rtu(&[0x01, 0x03, 0x00]),
            Err(ModbusError::Truncated { .. })
        ));
    }

    #[test]
    fn test_frame_gap() {
        // 9600 baud: 3.5 * 11 / 9600 s ≈ 4.01 ms
        let gap = frame_gap(9600);
        assert!(gap >= Duration::from_micros(4000) && gap <= Duration::from_micros(4100));
        // High speed lines clamp to the conservative floor.
        assert_eq!(frame_gap(19200), Duration::from_micros(1750));
        assert_eq!(frame_gap(115_200), Duration::from_micros(1750));
    }

    #[test]
    fn test_ascii_write_single_register_frame() {
        let pdu = [0x06, 0x00, 0x01, 0x00, 0x03];
        let frame = encode_ascii(0x11, &pdu);
        assert_eq!(frame, b":110600010003E5\r\n");

        let (unit, decoded) = decode_ascii(&frame).unwrap();
        assert_eq!(unit, 0x11);
        assert_eq!(decoded, pdu);
    }

    #[test]
    fn test_ascii_lowercase_hex_accepted() {
        let (unit, pdu) = decode_ascii(b":110600010003e5\r\n").unwrap();
        assert_eq!(unit, 0x11);
        assert_eq!(pdu, [0x06, 0x00, 0x01, 0x00, 0x03]);
    }

    #[test]
    fn test_ascii_bad_lrc_rejected() {
        assert!(matches!(
            decode_ascii(b":110600010003E4\r\n"),
            Err(ModbusError::Checksum { .. })
        ));
    }

    #[test]
    fn test_ascii_hex_digit_flip_rejected() {
        let frame = encode_ascii(0x11, &[0x06, 0x00, 0x01, 0x00, 0x03]);
        for i in 1..frame.len() - 2 {
            let mut corrupted = frame.clone();
            corrupted[i] = if corrupted[i] == b'0' { b'1' } else { b'0' };
            assert!(
                decode_ascii(&corrupted).is_err(),
                "corrupting hex digit {} was not caught",
                i
            );
        }
    }

    #[test]
    fn test_ascii_framing_errors() {
        assert!(decode_ascii(b"X10600010003E5\r\n").is_err());
        assert!(decode_ascii(b":110600010003E5\r\r").is_err());
        // Odd number of hex digits cannot form whole bytes.
        assert!(decode_ascii(b":11060001003E5\r\n").is_err());
        assert!(decode_ascii(b":11\r\n").is_err());
    }

    #[test]
    fn test_request_length_table() {
        assert_eq!(request_pdu_len(&[0x01]).unwrap(), PduLength::Partial);
        for fc in [0x01, 0x02, 0x03, 0x04, 0x05, 0x06] {
            assert_eq!(request_pdu_len(&[0x11, fc]).unwrap(), PduLength::Known(5));
        }
        assert_eq!(request_pdu_len(&[0x11, 0x0F]).unwrap(), PduLength::Partial);
        assert_eq!(
            request_pdu_len(&[0x11, 0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02]).unwrap(),
            PduLength::Known(8)
        );
        assert_eq!(
            request_pdu_len(&[0x11, 0x14, 0x0E]).unwrap(),
            PduLength::Known(16)
        );
        assert_eq!(request_pdu_len(&[0x11, 0x16]).unwrap(), PduLength::Known(7));
        assert_eq!(request_pdu_len(&[0x11, 0x18]).unwrap(), PduLength::Known(3));
        assert_eq!(request_pdu_len(&[0x11, 0x2B]).unwrap(), PduLength::Known(4));
        assert!(request_pdu_len(&[0x11, 0x63]).is_err());
    }

    #[test]
    fn test_response_length_table() {
        assert_eq!(response_pdu_len(&[0x01]).unwrap(), PduLength::Partial);
        assert_eq!(
            response_pdu_len(&[0x11, 0x01, 0x05]).unwrap(),
            PduLength::Known(7)
        );
        assert_eq!(
            response_pdu_len(&[0x11, 0x03, 0x06]).unwrap(),
            PduLength::Known(8)
        );
        for fc in [0x05, 0x06, 0x0F, 0x10] {
            assert_eq!(response_pdu_len(&[0x11, fc]).unwrap(), PduLength::Known(5));
        }
        assert_eq!(response_pdu_len(&[0x11, 0x16]).unwrap(), PduLength::Known(7));
        assert_eq!(
            response_pdu_len(&[0x11, 0x18, 0x00, 0x06]).unwrap(),
            PduLength::Known(9)
        );
        assert_eq!(
            response_pdu_len(&[0x11, 0x2B]).unwrap(),
            PduLength::Variable
        );
        // Exceptions are always two bytes, whatever the base function.
        assert_eq!(
            response_pdu_len(&[0x11, 0x83]).unwrap(),
            PduLength::Known(2)
        );
        assert_eq!(
            response_pdu_len(&[0x11, 0xAB]).unwrap(),
            PduLength::Known(2)
        );
    }
}
