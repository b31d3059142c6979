//! Frame encoding/decoding
//!
//! Implements the binary wire format shared by the whole actuator family:
//!
//! `0xFF 0xFF <ID> <LEN> <INSTR_OR_ERR> <PARAM>* <CHECKSUM>`
//!
//! where `LEN = param count + 2` and
//! `CHECKSUM = ~(ID + LEN + INSTR_OR_ERR + PARAM...) & 0xFF`.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{ProtocolError, HEADER_BYTE, MIN_FRAME_LEN};

/// Instruction opcodes accepted by the actuators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// Reachability check; reply carries no parameters
    Ping,
    /// Read a register range
    Read,
    /// Write a register range immediately
    Write,
    /// Stage a write to be applied by a later `Action`
    RegWrite,
    /// Apply all staged `RegWrite`s
    Action,
    /// Factory-reset the device's control table
    Reset,
    /// Broadcast register writes to several devices in one frame
    SyncWrite,
}

impl Instruction {
    /// Wire opcode for this instruction
    pub fn opcode(self) -> u8 {
        match self {
            Instruction::Ping => 0x01,
            Instruction::Read => 0x02,
            Instruction::Write => 0x03,
            Instruction::RegWrite => 0x04,
            Instruction::Action => 0x05,
            Instruction::Reset => 0x06,
            Instruction::SyncWrite => 0x83,
        }
    }
}

/// A decoded response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Responding device ID
    pub id: u8,
    /// Status byte; nonzero means the device flagged an error condition
    pub error: u8,
    /// Parameter bytes, in wire order
    pub params: Vec<u8>,
    /// Checksum byte as received (already verified)
    pub checksum: u8,
}

impl Frame {
    /// Encode an outbound command frame.
    ///
    /// The device ID and parameter count are passed through unchecked;
    /// sending an out-of-range ID is a caller error, not caught here.
    pub fn encode(id: u8, instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let length = params.len() as u8 + 2;
        let opcode = instruction.opcode();

        let mut bytes = Vec::with_capacity(params.len() + 6);
        bytes.extend_from_slice(&[HEADER_BYTE, HEADER_BYTE, id, length, opcode]);
        bytes.extend_from_slice(params);
        bytes.push(checksum(id, length, opcode, params));
        bytes
    }
}

/// Compute the frame checksum over (ID, LEN, INSTR/ERR, PARAM...).
pub fn checksum(id: u8, length: u8, instr_or_err: u8, params: &[u8]) -> u8 {
    let sum = params
        .iter()
        .fold(id as u32 + length as u32 + instr_or_err as u32, |acc, &b| {
            acc + b as u32
        });
    !(sum as u8)
}

/// Source of raw wire bytes for the decoder.
///
/// Implemented by [`super::Transport`]; tests substitute in-memory sources.
pub trait ByteSource {
    /// Number of bytes that can be read without blocking
    fn bytes_available(&mut self) -> Result<u32, ProtocolError>;

    /// Read one byte, blocking up to the source's configured timeout
    fn read_byte(&mut self) -> Result<u8, ProtocolError>;
}

/// Attempt to decode one frame from the byte source.
///
/// Returns `Ok(None)` when fewer than [`MIN_FRAME_LEN`] bytes are buffered.
/// The header is consumed byte-by-byte; a non-sync byte is consumed and
/// reported as [`ProtocolError::MalformedFrame`], so repeated calls re-search
/// the stream for the next header one byte at a time.
///
/// The checksum is verified here; a mismatching frame is consumed and
/// reported as [`ProtocolError::ChecksumMismatch`], never returned.
pub fn try_decode(src: &mut dyn ByteSource) -> Result<Option<Frame>, ProtocolError> {
    if (src.bytes_available()? as usize) < MIN_FRAME_LEN {
        return Ok(None);
    }

    for _ in 0..2 {
        let byte = src.read_byte()?;
        if byte != HEADER_BYTE {
            warn!("resync: discarding non-header byte {byte:#04x}");
            return Err(ProtocolError::MalformedFrame(format!(
                "expected header byte 0xFF, got {byte:#04x}"
            )));
        }
    }

    let id = src.read_byte()?;
    let length = src.read_byte()?;
    if length < 2 {
        return Err(ProtocolError::MalformedFrame(format!(
            "length byte {length} below minimum of 2"
        )));
    }
    let error = src.read_byte()?;

    let mut params = Vec::with_capacity(length as usize - 2);
    for _ in 0..length - 2 {
        params.push(src.read_byte()?);
    }

    let received = src.read_byte()?;
    let expected = checksum(id, length, error, &params);
    if received != expected {
        return Err(ProtocolError::ChecksumMismatch {
            expected,
            actual: received,
        });
    }

    Ok(Some(Frame {
        id,
        error,
        params,
        checksum: received,
    }))
}
