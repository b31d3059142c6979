//! Transport driver
//!
//! Owns the serial channel and the optional half-duplex direction line,
//! sequences writes with the required settle delay, and serves bounded
//! single-byte reads to the decoder.

use std::time::Duration;
use tracing::trace;

use super::channel::Channel;
use super::frame::ByteSource;
use super::ProtocolError;

/// Byte written to the direction channel to assert transmit-enable
const DIRECTION_TX: u8 = 1;
/// Byte written to the direction channel to release the line for receive
const DIRECTION_RX: u8 = 0;

/// Serial transport with half-duplex timing
pub struct Transport {
    channel: Box<dyn Channel>,
    direction: Option<Box<dyn Channel>>,
    settle_delay: Duration,
    tx_bytes: u64,
    rx_bytes: u64,
    tx_frames: u64,
}

impl Transport {
    /// Build a transport over an open channel.
    ///
    /// Fails fast on a zero read timeout: a transport that can block forever
    /// on a silent device would also make the receive loop unstoppable.
    pub fn new(
        mut channel: Box<dyn Channel>,
        direction: Option<Box<dyn Channel>>,
        settle_delay: Duration,
        read_timeout: Duration,
    ) -> Result<Self, ProtocolError> {
        if read_timeout.is_zero() {
            return Err(ProtocolError::NotConfigured(
                "read timeout must be nonzero".to_string(),
            ));
        }
        channel.set_timeout(read_timeout)?;

        Ok(Self {
            channel,
            direction,
            settle_delay,
            tx_bytes: 0,
            rx_bytes: 0,
            tx_frames: 0,
        })
    }

    /// Send one encoded frame.
    ///
    /// Asserts the direction line around the write when one is configured,
    /// then blocks for the settle delay so the device has its physical
    /// turnaround time before any read is attempted. The delay is on every
    /// send and also coarsely serializes writes from multiple callers.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if let Some(dir) = self.direction.as_mut() {
            dir.write_all(&[DIRECTION_TX])?;
        }
        self.channel.write_all(bytes)?;
        self.channel.flush()?;
        if let Some(dir) = self.direction.as_mut() {
            dir.write_all(&[DIRECTION_RX])?;
        }

        self.tx_bytes = self.tx_bytes.saturating_add(bytes.len() as u64);
        self.tx_frames = self.tx_frames.saturating_add(1);
        trace!(len = bytes.len(), "frame sent, settling");

        std::thread::sleep(self.settle_delay);
        Ok(())
    }

    /// Discard any unread input
    pub fn clear_input(&mut self) -> Result<(), ProtocolError> {
        self.channel.clear_input_buffer().map_err(Into::into)
    }

    /// Cumulative (tx bytes, rx bytes, tx frames)
    pub fn counters(&self) -> (u64, u64, u64) {
        (self.tx_bytes, self.rx_bytes, self.tx_frames)
    }
}

impl ByteSource for Transport {
    fn bytes_available(&mut self) -> Result<u32, ProtocolError> {
        self.channel.bytes_to_read().map_err(Into::into)
    }

    fn read_byte(&mut self) -> Result<u8, ProtocolError> {
        let mut buf = [0u8; 1];
        loop {
            match self.channel.read(&mut buf) {
                Ok(0) => return Err(ProtocolError::Timeout),
                Ok(_) => {
                    self.rx_bytes = self.rx_bytes.saturating_add(1);
                    return Ok(buf[0]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    return Err(ProtocolError::Timeout)
                }
                Err(e) => return Err(ProtocolError::SerialError(e.to_string())),
            }
        }
    }
}
