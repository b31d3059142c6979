//! Servo Bus Protocol Communication
//!
//! Implements the half-duplex binary serial protocol for daisy-chained
//! servo actuators: frame codec, transport timing, background receive
//! loop, and FIFO call/response correlation.

mod bus;
pub mod channel;
mod correlator;
mod error;
mod frame;
pub mod registers;
pub mod serial;
mod transport;
pub mod values;

pub use bus::{BusConfig, BusState, ServoBus};
pub use channel::{Channel, SerialChannel};
pub use correlator::{CallToken, Correlator, PendingCall, Reading, StoreMode};
pub use error::ProtocolError;
pub use frame::{checksum, try_decode, ByteSource, Frame, Instruction};
pub use transport::Transport;
pub use values::ReadOp;

/// Default baud rate on the servo bus
pub const DEFAULT_BAUD_RATE: u32 = 1_000_000;

/// Default per-byte read timeout in milliseconds.
/// Bounds the worst-case latency of a cooperative receive-loop stop.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Line-driver settle delay after every send, in milliseconds.
/// The device needs this turnaround time before it starts answering.
pub const TX_SETTLE_DELAY_MS: u64 = 5;

/// Both sync bytes at the start of every frame
pub const HEADER_BYTE: u8 = 0xFF;

/// Device ID that addresses every servo on the bus at once
pub const BROADCAST_ID: u8 = 0xFE;

/// Highest normal (non-broadcast) device ID
pub const MAX_DEVICE_ID: u8 = 0xFD;

/// Minimum number of buffered bytes before a decode is attempted
pub const MIN_FRAME_LEN: usize = 5;
