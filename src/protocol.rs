//! Frame codec for the Vestwoods BMS serial protocol.
//!
//! Every message in both directions uses the same envelope:
//!
//! | Offset      | Size | Field                                  |
//! |-------------|------|----------------------------------------|
//! | 0           | 1    | start marker [`START_BYTE`]            |
//! | 1           | 1    | bus address                            |
//! | 2           | 1    | length, counts offsets `1..1+LEN`      |
//! | 3           | 1    | reserved, always `0x00`                |
//! | 4           | 2    | opcode, big-endian                     |
//! | 6           | P    | payload                                |
//! | 1+LEN       | 2    | CRC-16/MODBUS over `1..1+LEN`, big-endian |
//! | 3+LEN       | 1    | end marker [`END_BYTE`]                |
//!
//! BLE delivers a response across several notifications, so [`decode`] works
//! on an accumulating buffer and reports [`Error::Incomplete`] until the whole
//! frame is present.

use crate::Error;
use crc16::{State, MODBUS};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Address {
    Pack = 0x00,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    /// "read 1": pack, cell, temperature and alarm status.
    Status = 0x0001,
}

pub const START_BYTE: u8 = 0x7a;
pub const END_BYTE: u8 = 0xa7;
const RESERVED_BYTE: u8 = 0x00;

/// Bytes counted by LEN before the payload: address, length, reserved, opcode.
pub const BODY_HEADER_LENGTH: usize = 5;
const CHECKSUM_LENGTH: usize = 2;
/// Offset of the length byte inside a frame.
const LENGTH_OFFSET: usize = 2;
const OPCODE_OFFSET: usize = 4;
const PAYLOAD_OFFSET: usize = 6;
/// Largest payload a one-byte LEN can describe.
pub const MAX_PAYLOAD_LENGTH: usize = u8::MAX as usize - BODY_HEADER_LENGTH;

/// A complete, checksum-valid frame.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub address: u8,
    pub opcode: u16,
    pub payload: Vec<u8>,
    /// The frame exactly as received, start to end marker.
    pub raw: Vec<u8>,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("address", &self.address)
            .field("opcode", &format_args!("{:#06X}", self.opcode))
            .field("payload", &format_args!("{:02X?}", self.payload))
            .finish()
    }
}

/// CRC-16/MODBUS of the checksum-covered span.
pub fn checksum(span: &[u8]) -> u16 {
    State::<MODBUS>::calculate(span)
}

/// Total frame size for a given LEN value.
fn frame_length(length_field: usize) -> usize {
    1 + length_field + CHECKSUM_LENGTH + 1
}

/// Build a request frame. Payloads longer than [`MAX_PAYLOAD_LENGTH`] are truncated.
pub fn encode(address: Address, opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let payload = &payload[..payload.len().min(MAX_PAYLOAD_LENGTH)];
    let length_field = BODY_HEADER_LENGTH + payload.len();

    let mut tx_buffer = Vec::with_capacity(frame_length(length_field));
    tx_buffer.push(START_BYTE);
    tx_buffer.push(address as u8);
    tx_buffer.push(length_field as u8);
    tx_buffer.push(RESERVED_BYTE);
    tx_buffer.extend_from_slice(&(opcode as u16).to_be_bytes());
    tx_buffer.extend_from_slice(payload);

    let crc = checksum(&tx_buffer[1..]);
    tx_buffer.extend_from_slice(&crc.to_be_bytes());
    tx_buffer.push(END_BYTE);
    tx_buffer
}

/// The status query. Always `7A 00 05 00 00 01 0C E5 A7`.
pub fn encode_status_request() -> Vec<u8> {
    encode(Address::Pack, Opcode::Status, &[])
}

fn validate_checksum(frame: &[u8], length_field: usize) -> std::result::Result<(), Error> {
    let calculated = checksum(&frame[1..1 + length_field]);
    let received = u16::from_be_bytes([frame[1 + length_field], frame[2 + length_field]]);
    if calculated != received {
        log::warn!(
            "Invalid checksum - calculated={calculated:04X} received={received:04X} frame={frame:02X?}"
        );
        return Err(Error::Checksum {
            calculated,
            received,
        });
    }
    Ok(())
}

/// Parse the frame that starts at `frame[0]`.
fn decode_at(frame: &[u8]) -> std::result::Result<Frame, Error> {
    if frame.len() <= LENGTH_OFFSET {
        return Err(Error::Incomplete);
    }
    let length_field = usize::from(frame[LENGTH_OFFSET]);
    if length_field < BODY_HEADER_LENGTH {
        log::warn!("Invalid length field {length_field} in {frame:02X?}");
        return Err(Error::Framing("length field shorter than header"));
    }

    let total = frame_length(length_field);
    if frame.len() < total {
        return Err(Error::Incomplete);
    }
    let frame = &frame[..total];

    if frame[total - 1] != END_BYTE {
        log::warn!(
            "Missing end marker - expected={END_BYTE:02X} received={:02X} frame={frame:02X?}",
            frame[total - 1]
        );
        return Err(Error::Framing("missing end marker"));
    }

    validate_checksum(frame, length_field)?;

    Ok(Frame {
        address: frame[1],
        opcode: u16::from_be_bytes([frame[OPCODE_OFFSET], frame[OPCODE_OFFSET + 1]]),
        payload: frame[PAYLOAD_OFFSET..1 + length_field].to_vec(),
        raw: frame.to_vec(),
    })
}

/// Try to extract the first frame from an accumulating receive buffer.
///
/// Anything before the first start marker is skipped and anything after the
/// end marker is ignored. A start marker whose envelope turns out malformed
/// is dropped and decoding resumes at the next start marker. Returns
/// [`Error::Incomplete`] while more bytes are needed, [`Error::Framing`] for a
/// malformed envelope with no later start marker and [`Error::Checksum`] when
/// the CRC does not match.
pub fn decode(buffer: &[u8]) -> std::result::Result<Frame, Error> {
    let mut offset = 0;
    loop {
        let Some(start) = buffer[offset..].iter().position(|b| *b == START_BYTE) else {
            return Err(Error::Incomplete);
        };
        let start = offset + start;
        if start > 0 && offset == 0 {
            log::trace!("Skipping {start} bytes before start marker");
        }
        match decode_at(&buffer[start..]) {
            Err(Error::Framing(reason)) if buffer[start + 1..].contains(&START_BYTE) => {
                log::debug!("Resynchronizing after framing error at offset {start}: {reason}");
                offset = start + 1;
            }
            outcome => return outcome,
        }
    }
}
