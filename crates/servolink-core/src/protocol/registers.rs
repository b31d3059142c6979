//! Control-table register addresses and scale constants
//!
//! Addresses follow the AX-family layout; 16-bit fields occupy a
//! low-byte/high-byte pair starting at the listed address.

/* EEPROM area */

/// Model number (2 bytes)
pub const MODEL_NUMBER_L: u8 = 0;
/// Clockwise angle limit (2 bytes)
pub const CW_ANGLE_LIMIT_L: u8 = 6;
/// Counter-clockwise angle limit (2 bytes)
pub const CCW_ANGLE_LIMIT_L: u8 = 8;

/* RAM area */

/// Torque enable flag (1 byte)
pub const TORQUE_ENABLE: u8 = 24;
/// LED on/off (1 byte)
pub const LED: u8 = 25;
/// Goal position (2 bytes)
pub const GOAL_POSITION_L: u8 = 30;
/// Moving speed (2 bytes)
pub const MOVING_SPEED_L: u8 = 32;
/// Torque limit (2 bytes)
pub const TORQUE_LIMIT_L: u8 = 34;
/// Present position (2 bytes)
pub const PRESENT_POSITION_L: u8 = 36;
/// Present speed, signed-magnitude (2 bytes)
pub const PRESENT_SPEED_L: u8 = 38;
/// Present load, signed-magnitude (2 bytes)
pub const PRESENT_LOAD_L: u8 = 40;
/// Present supply voltage, decivolts (1 byte)
pub const PRESENT_VOLTAGE: u8 = 42;
/// Present temperature, degrees Celsius (1 byte)
pub const PRESENT_TEMPERATURE: u8 = 43;
/// Moving flag (1 byte)
pub const MOVING: u8 = 46;

/* Scale constants */

/// Degrees per position/angle-limit tick
pub const DEG_PER_TICK: f64 = 0.088;

/// RPM per speed tick
pub const RPM_PER_TICK: f64 = 114.0 / 1023.0;

/// Percent load per load tick
pub const LOAD_PERCENT_PER_TICK: f64 = 100.0 / 1023.0;

/// Raw speed/load values above this threshold encode the negative direction;
/// the magnitude is `value - SIGN_THRESHOLD`.
pub const SIGN_THRESHOLD: u16 = 1023;
