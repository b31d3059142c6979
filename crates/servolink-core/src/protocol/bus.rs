//! Bus client and receive loop
//!
//! Handles the bus lifecycle, command transmission, and the background
//! thread that drains the transport into the correlator.
//!
//! Concurrency model: the serial channel's read cursor is owned exclusively
//! by the receive thread, which is also the only consumer of the pending-call
//! and frame queues. Caller threads send frames (serialized through the
//! transport mutex and its settle delay) and read interpreted results.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

use super::channel::{Channel, SerialChannel};
use super::correlator::{Correlator, PendingCall, Reading, StoreMode};
use super::frame::{try_decode, Frame, Instruction};
use super::registers::{GOAL_POSITION_L, LED, MOVING_SPEED_L, TORQUE_ENABLE, TORQUE_LIMIT_L};
use super::serial::{clear_buffers, configure_port, open_port};
use super::transport::Transport;
use super::values::{encode_position, encode_speed, encode_torque_limit, ReadOp, WriteCache};
use super::{ProtocolError, BROADCAST_ID, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS, TX_SETTLE_DELAY_MS};

/// Bus lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusState {
    /// Created, receive loop not yet running
    Idle,
    /// Receive loop running
    Running,
    /// Receive loop stopped cooperatively
    Stopped,
}

/// Bus configuration
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Per-byte read timeout in milliseconds; bounds stop latency
    pub read_timeout_ms: u64,
    /// Settle delay after every send, in milliseconds
    pub settle_delay_ms: u64,
    /// Receive-loop sleep between polls when the line is quiet, in
    /// milliseconds
    pub poll_interval_ms: u64,
    /// Frame storage mode, fixed for the bus's lifetime
    pub store_mode: StoreMode,
    /// Maximum outstanding pending calls before new reads are rejected
    pub max_pending: usize,
    /// Maximum stored frames before the oldest unmatched one is dropped
    pub max_frames: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            settle_delay_ms: TX_SETTLE_DELAY_MS,
            poll_interval_ms: 2,
            store_mode: StoreMode::Ordered,
            max_pending: 64,
            max_frames: 64,
        }
    }
}

/// Client handle for one servo bus
pub struct ServoBus {
    transport: Arc<Mutex<Transport>>,
    correlator: Arc<Mutex<Correlator>>,
    stop: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
    write_cache: WriteCache,
    poll_interval: Duration,
    state: BusState,
}

impl ServoBus {
    /// Open a serial port and build a bus over it
    pub fn open(config: BusConfig) -> Result<Self, ProtocolError> {
        let mut port = open_port(&config.port_name, Some(config.baud_rate))?;
        configure_port(port.as_mut())?;
        clear_buffers(port.as_mut())?;
        Self::with_channel(Box::new(SerialChannel::new(port)), None, &config)
    }

    /// Build a bus over an already-open channel, with an optional
    /// direction-control channel for half-duplex line drivers.
    ///
    /// Fails fast on invalid configuration.
    pub fn with_channel(
        channel: Box<dyn Channel>,
        direction: Option<Box<dyn Channel>>,
        config: &BusConfig,
    ) -> Result<Self, ProtocolError> {
        if config.max_pending == 0 || config.max_frames == 0 {
            return Err(ProtocolError::NotConfigured(
                "queue bounds must be nonzero".to_string(),
            ));
        }
        let transport = Transport::new(
            channel,
            direction,
            Duration::from_millis(config.settle_delay_ms),
            Duration::from_millis(config.read_timeout_ms),
        )?;
        let correlator = Correlator::new(config.store_mode, config.max_pending, config.max_frames);

        Ok(Self {
            transport: Arc::new(Mutex::new(transport)),
            correlator: Arc::new(Mutex::new(correlator)),
            stop: Arc::new(AtomicBool::new(false)),
            rx_thread: None,
            write_cache: WriteCache::default(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            state: BusState::Idle,
        })
    }

    /// Current bus state
    pub fn state(&self) -> BusState {
        self.state
    }

    /// Spawn the background receive loop. Idempotent while running.
    pub fn start(&mut self) {
        if self.rx_thread.is_some() {
            return;
        }
        self.stop.store(false, Ordering::Relaxed);

        let transport = Arc::clone(&self.transport);
        let correlator = Arc::clone(&self.correlator);
        let stop = Arc::clone(&self.stop);
        let poll = self.poll_interval;

        self.rx_thread = Some(std::thread::spawn(move || {
            receive_loop(&transport, &correlator, &stop, poll);
        }));
        self.state = BusState::Running;
    }

    /// Request a cooperative stop and join the receive thread.
    ///
    /// Worst-case latency is one poll interval plus one read timeout.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.rx_thread.take() {
            let _ = handle.join();
            self.state = BusState::Stopped;
        }
    }

    /* Get operations: enqueue a request frame and record the pending call.
     * Results arrive asynchronously through the result table. */

    /// Reachability check for one device
    pub fn ping(&self, id: u8) -> Result<(), ProtocolError> {
        self.send_read(id, ReadOp::Ping)
    }

    /// Request the model number register
    pub fn read_model_number(&self, id: u8) -> Result<(), ProtocolError> {
        self.send_read(id, ReadOp::ModelNumber)
    }

    /// Request the present position
    pub fn read_present_position(&self, id: u8) -> Result<(), ProtocolError> {
        self.send_read(id, ReadOp::PresentPosition)
    }

    /// Request the present speed
    pub fn read_present_speed(&self, id: u8) -> Result<(), ProtocolError> {
        self.send_read(id, ReadOp::PresentSpeed)
    }

    /// Request the present load
    pub fn read_present_load(&self, id: u8) -> Result<(), ProtocolError> {
        self.send_read(id, ReadOp::PresentLoad)
    }

    /// Request the supply voltage
    pub fn read_present_voltage(&self, id: u8) -> Result<(), ProtocolError> {
        self.send_read(id, ReadOp::PresentVoltage)
    }

    /// Request the temperature
    pub fn read_present_temperature(&self, id: u8) -> Result<(), ProtocolError> {
        self.send_read(id, ReadOp::PresentTemperature)
    }

    /// Request the clockwise angle limit
    pub fn read_cw_angle_limit(&self, id: u8) -> Result<(), ProtocolError> {
        self.send_read(id, ReadOp::CwAngleLimit)
    }

    /// Request the counter-clockwise angle limit
    pub fn read_ccw_angle_limit(&self, id: u8) -> Result<(), ProtocolError> {
        self.send_read(id, ReadOp::CcwAngleLimit)
    }

    /// Latest interpreted value for a (device, operation) pair.
    /// `None` until a matching response has been correlated; readers may see
    /// stale values between refreshes.
    pub fn latest(&self, id: u8, op: ReadOp) -> Option<Reading> {
        self.correlator.lock().ok()?.latest(id, op)
    }

    /// Latest raw frame for a device (latest storage mode only)
    pub fn latest_frame(&self, id: u8) -> Option<Frame> {
        self.correlator.lock().ok()?.latest_frame(id).cloned()
    }

    /// Current (pending calls, stored frames) queue depths
    pub fn queue_depths(&self) -> (usize, usize) {
        self.correlator
            .lock()
            .map(|c| c.depths())
            .unwrap_or((0, 0))
    }

    /// Cumulative transport (tx bytes, rx bytes, tx frames)
    pub fn counters(&self) -> (u64, u64, u64) {
        self.transport
            .lock()
            .map(|t| t.counters())
            .unwrap_or((0, 0, 0))
    }

    /* Set operations: encode physical value to bytes and send immediately,
     * blocking for the send duration. */

    /// Command a goal position in degrees.
    ///
    /// An encoding identical to the last one sent to this device is
    /// suppressed (nothing is transmitted); the cache is updated either way.
    /// Returns whether a frame was actually sent.
    pub fn set_goal_position(&mut self, id: u8, degrees: f64) -> Result<bool, ProtocolError> {
        let bytes = encode_position(degrees);
        if !self.write_cache.update(id, GOAL_POSITION_L, bytes) {
            debug!(id, degrees, "goal position unchanged, write suppressed");
            return Ok(false);
        }
        self.write_u16(id, GOAL_POSITION_L, bytes)?;
        Ok(true)
    }

    /// Command a moving speed in RPM
    pub fn set_moving_speed(&mut self, id: u8, rpm: f64) -> Result<(), ProtocolError> {
        self.write_u16(id, MOVING_SPEED_L, encode_speed(rpm))
    }

    /// Command a torque limit in percent of maximum
    pub fn set_torque_limit(&mut self, id: u8, percent: f64) -> Result<(), ProtocolError> {
        self.write_u16(id, TORQUE_LIMIT_L, encode_torque_limit(percent))
    }

    /// Enable or disable torque output
    pub fn set_torque_enable(&mut self, id: u8, enabled: bool) -> Result<(), ProtocolError> {
        self.write_u8(id, TORQUE_ENABLE, enabled as u8)
    }

    /// Switch the status LED
    pub fn set_led(&mut self, id: u8, on: bool) -> Result<(), ProtocolError> {
        self.write_u8(id, LED, on as u8)
    }

    /// Stage a goal position to be applied by a later [`Self::action`]
    pub fn reg_write_goal_position(&mut self, id: u8, degrees: f64) -> Result<(), ProtocolError> {
        let [lo, hi] = encode_position(degrees);
        self.send_frame(&Frame::encode(
            id,
            Instruction::RegWrite,
            &[GOAL_POSITION_L, lo, hi],
        ))
    }

    /// Broadcast ACTION: all devices apply their staged writes at once
    pub fn action(&mut self) -> Result<(), ProtocolError> {
        self.send_frame(&Frame::encode(BROADCAST_ID, Instruction::Action, &[]))
    }

    /// Factory-reset one device's control table
    pub fn factory_reset(&mut self, id: u8) -> Result<(), ProtocolError> {
        self.send_frame(&Frame::encode(id, Instruction::Reset, &[]))
    }

    /// Command goal positions for several devices in one broadcast frame
    pub fn sync_write_positions(&mut self, targets: &[(u8, f64)]) -> Result<(), ProtocolError> {
        if targets.is_empty() {
            return Ok(());
        }
        let mut params = Vec::with_capacity(2 + targets.len() * 3);
        params.push(GOAL_POSITION_L);
        params.push(2); // bytes written per device
        for &(id, degrees) in targets {
            let [lo, hi] = encode_position(degrees);
            params.extend_from_slice(&[id, lo, hi]);
        }
        self.send_frame(&Frame::encode(BROADCAST_ID, Instruction::SyncWrite, &params))
    }

    /* Internals */

    fn send_read(&self, id: u8, op: ReadOp) -> Result<(), ProtocolError> {
        let bytes = match op.register() {
            Some((addr, count)) => Frame::encode(id, Instruction::Read, &[addr, count]),
            None => Frame::encode(id, Instruction::Ping, &[]),
        };

        // Record before sending so the response cannot outrun the record.
        // In latest storage mode nothing is recorded (no token).
        let token = {
            let mut correlator = self.correlator.lock().map_err(|_| ProtocolError::Poisoned)?;
            correlator.record_call(PendingCall { id, op })?
        };

        if let Err(e) = self.send_frame(&bytes) {
            // The request never hit the wire; don't leave a stale call behind
            if let Some(token) = token {
                if let Ok(mut correlator) = self.correlator.lock() {
                    correlator.retract(token);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    fn write_u16(&self, id: u8, addr: u8, [lo, hi]: [u8; 2]) -> Result<(), ProtocolError> {
        self.send_frame(&Frame::encode(id, Instruction::Write, &[addr, lo, hi]))
    }

    fn write_u8(&self, id: u8, addr: u8, value: u8) -> Result<(), ProtocolError> {
        self.send_frame(&Frame::encode(id, Instruction::Write, &[addr, value]))
    }

    fn send_frame(&self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let mut transport = self.transport.lock().map_err(|_| ProtocolError::Poisoned)?;
        transport.send(bytes)
    }
}

impl Drop for ServoBus {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Receive loop body: drain the transport into the correlator until the
/// stop flag is observed. Decode failures are local and recoverable; the
/// loop logs them and keeps running.
fn receive_loop(
    transport: &Arc<Mutex<Transport>>,
    correlator: &Arc<Mutex<Correlator>>,
    stop: &Arc<AtomicBool>,
    poll: Duration,
) {
    debug!("receive loop started");
    while !stop.load(Ordering::Relaxed) {
        let decoded = {
            let Ok(mut transport) = transport.lock() else {
                warn!("transport lock poisoned, receive loop exiting");
                break;
            };
            match try_decode(&mut *transport) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "discarding undecodable bytes");
                    None
                }
            }
        };

        match decoded {
            Some(frame) => {
                let Ok(mut correlator) = correlator.lock() else {
                    warn!("correlator lock poisoned, receive loop exiting");
                    break;
                };
                correlator.deposit(frame);
                correlator.pump();
            }
            None => std::thread::sleep(poll),
        }
    }
    debug!("receive loop stopped");
}
