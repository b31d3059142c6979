//! Field interpretation
//!
//! Pure decode rules from raw response payloads to physical units, and the
//! inverse encode rules used by write operations. All multi-byte fields are
//! little-endian on the wire.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::registers::{
    CCW_ANGLE_LIMIT_L, CW_ANGLE_LIMIT_L, DEG_PER_TICK, LOAD_PERCENT_PER_TICK, MODEL_NUMBER_L,
    PRESENT_LOAD_L, PRESENT_POSITION_L, PRESENT_SPEED_L, PRESENT_TEMPERATURE, PRESENT_VOLTAGE,
    RPM_PER_TICK, SIGN_THRESHOLD,
};
use super::ProtocolError;

/// Round to two decimal places, matching the bus's reporting precision
pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn u16_field(op: &'static str, params: &[u8]) -> Result<u16, ProtocolError> {
    if params.len() < 2 {
        return Err(ProtocolError::ShortPayload {
            op,
            len: params.len(),
        });
    }
    Ok(LittleEndian::read_u16(&params[..2]))
}

fn u8_field(op: &'static str, params: &[u8]) -> Result<u8, ProtocolError> {
    params.first().copied().ok_or(ProtocolError::ShortPayload {
        op,
        len: params.len(),
    })
}

/// Signed-magnitude decode shared by speed and load: raw values above the
/// threshold run in the negative direction with magnitude `raw - threshold`.
fn signed_magnitude(raw: u16, scale: f64) -> f64 {
    if raw > SIGN_THRESHOLD {
        round2(-((raw - SIGN_THRESHOLD) as f64 * scale))
    } else {
        round2(raw as f64 * scale)
    }
}

/// Decode a position or angle-limit payload to degrees
pub fn decode_position(params: &[u8]) -> Result<f64, ProtocolError> {
    Ok(round2(u16_field("position", params)? as f64 * DEG_PER_TICK))
}

/// Decode a present-speed payload to signed RPM
pub fn decode_speed(params: &[u8]) -> Result<f64, ProtocolError> {
    Ok(signed_magnitude(u16_field("speed", params)?, RPM_PER_TICK))
}

/// Decode a present-load payload to signed percent of maximum torque
pub fn decode_load(params: &[u8]) -> Result<f64, ProtocolError> {
    Ok(signed_magnitude(
        u16_field("load", params)?,
        LOAD_PERCENT_PER_TICK,
    ))
}

/// Decode a supply-voltage payload to volts
pub fn decode_voltage(params: &[u8]) -> Result<f64, ProtocolError> {
    Ok(u8_field("voltage", params)? as f64 / 10.0)
}

/// Decode a temperature payload to degrees Celsius (unscaled on the wire)
pub fn decode_temperature(params: &[u8]) -> Result<f64, ProtocolError> {
    Ok(u8_field("temperature", params)? as f64)
}

/// Decode a model-number payload
pub fn decode_model_number(params: &[u8]) -> Result<f64, ProtocolError> {
    Ok(u16_field("model number", params)? as f64)
}

/// Encode a goal position in degrees to its (low, high) tick byte pair,
/// rounded to the nearest tick and clamped to the valid tick range
pub fn encode_position(degrees: f64) -> [u8; 2] {
    let ticks = (degrees / DEG_PER_TICK)
        .round()
        .clamp(0.0, SIGN_THRESHOLD as f64) as u16;
    ticks.to_le_bytes()
}

/// Encode a moving speed in RPM to its (low, high) tick byte pair
pub fn encode_speed(rpm: f64) -> [u8; 2] {
    let ticks = (rpm / RPM_PER_TICK).round().clamp(0.0, SIGN_THRESHOLD as f64) as u16;
    ticks.to_le_bytes()
}

/// Encode a torque limit in percent to its (low, high) tick byte pair
pub fn encode_torque_limit(percent: f64) -> [u8; 2] {
    let ticks = (percent / LOAD_PERCENT_PER_TICK)
        .round()
        .clamp(0.0, SIGN_THRESHOLD as f64) as u16;
    ticks.to_le_bytes()
}

/// Encode a voltage in volts to its raw decivolt byte
pub fn encode_voltage(volts: f64) -> u8 {
    (volts * 10.0).round() as u8
}

/// Logical "get" operations, recorded in each pending call and matched to a
/// decode rule via an exhaustive dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadOp {
    /// Reachability check; the reply has no payload
    Ping,
    /// Model number register
    ModelNumber,
    /// Present position in degrees
    PresentPosition,
    /// Present speed in signed RPM
    PresentSpeed,
    /// Present load in signed percent
    PresentLoad,
    /// Supply voltage in volts
    PresentVoltage,
    /// Temperature in degrees Celsius
    PresentTemperature,
    /// Clockwise angle limit in degrees
    CwAngleLimit,
    /// Counter-clockwise angle limit in degrees
    CcwAngleLimit,
}

impl ReadOp {
    /// Control-table (address, byte count) read by this operation.
    /// `Ping` is not a register read and has no entry.
    pub(crate) fn register(self) -> Option<(u8, u8)> {
        match self {
            ReadOp::Ping => None,
            ReadOp::ModelNumber => Some((MODEL_NUMBER_L, 2)),
            ReadOp::PresentPosition => Some((PRESENT_POSITION_L, 2)),
            ReadOp::PresentSpeed => Some((PRESENT_SPEED_L, 2)),
            ReadOp::PresentLoad => Some((PRESENT_LOAD_L, 2)),
            ReadOp::PresentVoltage => Some((PRESENT_VOLTAGE, 1)),
            ReadOp::PresentTemperature => Some((PRESENT_TEMPERATURE, 1)),
            ReadOp::CwAngleLimit => Some((CW_ANGLE_LIMIT_L, 2)),
            ReadOp::CcwAngleLimit => Some((CCW_ANGLE_LIMIT_L, 2)),
        }
    }

    /// Interpret a response payload for this operation into physical units
    pub fn interpret(self, params: &[u8]) -> Result<f64, ProtocolError> {
        match self {
            // A ping reply carries no payload; any answer means reachable.
            ReadOp::Ping => Ok(1.0),
            ReadOp::ModelNumber => decode_model_number(params),
            ReadOp::PresentPosition => decode_position(params),
            ReadOp::PresentSpeed => decode_speed(params),
            ReadOp::PresentLoad => decode_load(params),
            ReadOp::PresentVoltage => decode_voltage(params),
            ReadOp::PresentTemperature => decode_temperature(params),
            ReadOp::CwAngleLimit => decode_position(params),
            ReadOp::CcwAngleLimit => decode_position(params),
        }
    }
}

/// Per-device, per-register cache of the last encoded byte pair sent,
/// used to suppress retransmission of unchanged writes.
///
/// Owned by each bus instance; never process-global, so parallel bus
/// instances cannot interfere with each other.
#[derive(Debug, Default)]
pub struct WriteCache {
    last: HashMap<(u8, u8), [u8; 2]>,
}

impl WriteCache {
    /// Record the encoded bytes for (device, register) and report whether
    /// they differ from what was previously sent. The cache is updated
    /// regardless of the outcome.
    pub fn update(&mut self, id: u8, register: u8, bytes: [u8; 2]) -> bool {
        self.last.insert((id, register), bytes) != Some(bytes)
    }
}
