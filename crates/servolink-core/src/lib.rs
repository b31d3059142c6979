//! # Servolink Core Library
//!
//! Core functionality for the Servolink servo bus driver.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Binary frame encoding/decoding for the half-duplex servo wire format
//! - A serial transport with direction-line control and settle timing
//! - A background receive loop with ordered or last-value frame storage
//! - FIFO correlation of outstanding reads to arriving response frames
//! - Physical-unit interpretation of servo register payloads
//!
//! ## Example
//!
//! ```rust,ignore
//! use servolink_core::protocol::{BusConfig, ReadOp, ServoBus};
//!
//! let mut bus = ServoBus::open(BusConfig {
//!     port_name: "/dev/ttyUSB0".to_string(),
//!     ..BusConfig::default()
//! })?;
//! bus.start();
//!
//! bus.read_present_position(1)?;
//! // ... later, once the response frame has been correlated:
//! if let Some(reading) = bus.latest(1, ReadOp::PresentPosition) {
//!     println!("joint 1 at {:.2} deg", reading.value);
//! }
//! ```

pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::protocol::{
        BusConfig, BusState, Frame, Instruction, ProtocolError, ReadOp, Reading, ServoBus,
        StoreMode,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
