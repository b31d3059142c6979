//! Call/response correlation
//!
//! Records which "get" operation was issued for which device, in issue
//! order, and binds each decoded response frame to the oldest pending call.
//!
//! Binding is strictly by arrival order, never by device ID: on the shared
//! half-duplex line, devices answer in request order, so the oldest pending
//! call always owns the oldest undelivered frame. If that assumption breaks
//! (it cannot, short of a misbehaving device), a response would be credited
//! to the wrong call; see `latest` readers for how staleness is tolerated.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

use super::frame::Frame;
use super::values::ReadOp;
use super::ProtocolError;

/// An outstanding "get" awaiting its response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCall {
    /// Device the request frame was addressed to
    pub id: u8,
    /// Which decode rule to apply when the response arrives
    pub op: ReadOp,
}

/// Handle identifying one recorded pending call, used to retract exactly
/// that call if its request frame never makes it onto the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallToken(u64);

/// How decoded frames are stored ahead of correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreMode {
    /// Ordered queue: one entry per response, supports multiple in-flight
    /// calls and FIFO correlation
    Ordered,
    /// Last-write-wins table keyed by device ID; frames are read raw via
    /// [`Correlator::latest_frame`] and never correlated
    Latest,
}

#[derive(Debug)]
enum FrameStore {
    Ordered(VecDeque<Frame>),
    Latest(HashMap<u8, Frame>),
}

/// Latest interpreted value for one (device, operation) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Physical-unit value produced by the operation's decode rule
    pub value: f64,
    /// Raw error bits from the response's status byte; zero means no error
    pub error_bits: u8,
}

impl Reading {
    /// Whether the device flagged an error condition in this response
    pub fn is_device_error(&self) -> bool {
        self.error_bits != 0
    }
}

/// Matches decoded frames to pending calls and maintains the result table.
///
/// Single-consumer: the receive loop owns the pump; callers only record
/// pending calls and read results.
#[derive(Debug)]
pub struct Correlator {
    pending: VecDeque<(CallToken, PendingCall)>,
    next_token: u64,
    frames: FrameStore,
    results: HashMap<(u8, ReadOp), Reading>,
    max_pending: usize,
    max_frames: usize,
}

impl Correlator {
    /// Create a correlator. The store mode is fixed for the transport's
    /// lifetime; both queues are bounded.
    pub fn new(mode: StoreMode, max_pending: usize, max_frames: usize) -> Self {
        let frames = match mode {
            StoreMode::Ordered => FrameStore::Ordered(VecDeque::new()),
            StoreMode::Latest => FrameStore::Latest(HashMap::new()),
        };
        Self {
            pending: VecDeque::new(),
            next_token: 0,
            frames,
            results: HashMap::new(),
            max_pending,
            max_frames,
        }
    }

    /// Record a pending call at send time.
    ///
    /// Rejects the call when the bound is reached; the caller must not send
    /// the request frame in that case. In latest mode nothing is recorded
    /// (frames are never correlated there, so a pending call would sit in
    /// the queue forever) and `Ok(None)` is returned.
    pub fn record_call(&mut self, call: PendingCall) -> Result<Option<CallToken>, ProtocolError> {
        if matches!(self.frames, FrameStore::Latest(_)) {
            return Ok(None);
        }
        if self.pending.len() >= self.max_pending {
            return Err(ProtocolError::PendingQueueFull(self.pending.len()));
        }
        let token = CallToken(self.next_token);
        self.next_token = self.next_token.wrapping_add(1);
        self.pending.push_back((token, call));
        Ok(Some(token))
    }

    /// Forget one recorded call, identified by its token (used when its
    /// request frame never made it onto the wire). Calls recorded by other
    /// threads in the meantime are untouched.
    pub(crate) fn retract(&mut self, token: CallToken) {
        if let Some(idx) = self.pending.iter().position(|(t, _)| *t == token) {
            self.pending.remove(idx);
        }
    }

    /// Deposit one decoded frame into the store.
    ///
    /// In ordered mode an over-full store drops its oldest unmatched frame;
    /// a frame arriving with nothing pending is still stored raw.
    pub fn deposit(&mut self, frame: Frame) {
        match &mut self.frames {
            FrameStore::Ordered(queue) => {
                if self.pending.is_empty() {
                    debug!(id = frame.id, "response with no pending call, storing raw");
                }
                if queue.len() >= self.max_frames {
                    if let Some(dropped) = queue.pop_front() {
                        warn!(
                            id = dropped.id,
                            "frame backlog full, dropping oldest unmatched frame"
                        );
                    }
                }
                queue.push_back(frame);
            }
            FrameStore::Latest(table) => {
                table.insert(frame.id, frame);
            }
        }
    }

    /// Drain matched (pending call, frame) pairs into the result table.
    ///
    /// No-op in latest mode. Unmatched leftovers on either side persist for
    /// the next pump.
    pub fn pump(&mut self) {
        let FrameStore::Ordered(queue) = &mut self.frames else {
            return;
        };

        while !self.pending.is_empty() && !queue.is_empty() {
            // Both nonempty, so both pops succeed
            let Some((_, call)) = self.pending.pop_front() else {
                break;
            };
            let Some(frame) = queue.pop_front() else {
                break;
            };

            match call.op.interpret(&frame.params) {
                Ok(value) => {
                    if frame.error != 0 {
                        warn!(
                            id = frame.id,
                            "device reported error bits {:#04x} in status byte", frame.error
                        );
                    }
                    self.results.insert(
                        (call.id, call.op),
                        Reading {
                            value,
                            error_bits: frame.error,
                        },
                    );
                }
                Err(e) => {
                    // Local and recoverable: log, drop the pair, keep going
                    warn!(id = call.id, op = ?call.op, error = %e, "failed to interpret response payload");
                }
            }
        }
    }

    /// Latest interpreted value for a (device, operation) pair.
    /// Absent until a matching response has been correlated.
    pub fn latest(&self, id: u8, op: ReadOp) -> Option<Reading> {
        self.results.get(&(id, op)).copied()
    }

    /// Latest raw frame for a device (latest mode only)
    pub fn latest_frame(&self, id: u8) -> Option<&Frame> {
        match &self.frames {
            FrameStore::Latest(table) => table.get(&id),
            FrameStore::Ordered(_) => None,
        }
    }

    /// Current (pending calls, stored frames) depths for backpressure
    /// monitoring
    pub fn depths(&self) -> (usize, usize) {
        let frames = match &self.frames {
            FrameStore::Ordered(queue) => queue.len(),
            FrameStore::Latest(table) => table.len(),
        };
        (self.pending.len(), frames)
    }
}
