//! Protocol errors

use thiserror::Error;

/// Errors that can occur during servo bus communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Underlying serial port failure
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// No byte arrived within the configured read timeout
    #[error("Read timed out waiting for device data")]
    Timeout,

    /// Construction-time configuration was invalid
    #[error("Transport not configured: {0}")]
    NotConfigured(String),

    /// Header mismatch or structurally impossible frame
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Received checksum does not match the one computed from the frame body
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Checksum computed from the received fields
        expected: u8,
        /// Checksum byte carried by the frame
        actual: u8,
    },

    /// Outstanding-call limit reached; the read was not issued
    #[error("Pending-call queue full ({0} calls outstanding)")]
    PendingQueueFull(usize),

    /// Response payload shorter than the operation's field width
    #[error("Response payload too short for {op}: {len} bytes")]
    ShortPayload {
        /// Operation whose decode failed
        op: &'static str,
        /// Number of parameter bytes actually received
        len: usize,
    },

    /// Shared bus state was poisoned by a panicked thread
    #[error("Bus state lock poisoned")]
    Poisoned,

    /// I/O error from the underlying channel
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
