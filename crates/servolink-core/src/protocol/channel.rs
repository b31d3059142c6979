//! Channel abstraction over the raw serial byte stream
//!
//! The transport owns exactly one data channel plus, optionally, a second
//! channel driving the half-duplex direction line. Tests inject in-memory
//! implementations of this trait.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Byte-stream channel with the primitives the transport needs
pub trait Channel: Read + Write + Send {
    /// Set the timeout bounding blocking reads
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard any buffered unread input
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Number of bytes available to read without blocking
    fn bytes_to_read(&mut self) -> io::Result<u32>;
}

/// Serial port wrapper implementing [`Channel`]
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an already-opened serial port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Channel for SerialChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port
            .set_timeout(timeout)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port
            .bytes_to_read()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}
