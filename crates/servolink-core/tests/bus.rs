//! End-to-end bus tests over an in-memory channel

use servolink_core::protocol::{
    checksum, BusConfig, BusState, Channel, ProtocolError, ReadOp, ServoBus, StoreMode,
};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Shared in-memory wire: the test plays the device side
#[derive(Clone, Default)]
struct Wire {
    rx: Arc<Mutex<VecDeque<u8>>>,
    tx: Arc<Mutex<Vec<u8>>>,
}

impl Wire {
    /// Device answers: queue bytes for the host to read
    fn inject(&self, bytes: &[u8]) {
        self.rx.lock().unwrap().extend(bytes.iter().copied());
    }

    /// Everything the host has transmitted so far
    fn sent(&self) -> Vec<u8> {
        self.tx.lock().unwrap().clone()
    }

    fn channel(&self) -> MockChannel {
        MockChannel { wire: self.clone() }
    }
}

struct MockChannel {
    wire: Wire,
}

impl Read for MockChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let byte = self.wire.rx.lock().unwrap().pop_front();
        match byte {
            Some(b) => {
                buf[0] = b;
                Ok(1)
            }
            None => {
                // Emulate the serial driver's bounded blocking read
                std::thread::sleep(Duration::from_millis(2));
                Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
            }
        }
    }
}

impl Write for MockChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.wire.tx.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Channel for MockChannel {
    fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.wire.rx.lock().unwrap().clear();
        Ok(())
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        Ok(self.wire.rx.lock().unwrap().len() as u32)
    }
}

fn fast_config() -> BusConfig {
    BusConfig {
        settle_delay_ms: 0,
        poll_interval_ms: 1,
        read_timeout_ms: 20,
        ..BusConfig::default()
    }
}

fn running_bus(config: BusConfig) -> (ServoBus, Wire) {
    let wire = Wire::default();
    let mut bus =
        ServoBus::with_channel(Box::new(wire.channel()), None, &config).expect("valid config");
    bus.start();
    (bus, wire)
}

/// Build a device status frame for injection
fn status_frame(id: u8, error: u8, params: &[u8]) -> Vec<u8> {
    let length = params.len() as u8 + 2;
    let mut bytes = vec![0xFF, 0xFF, id, length, error];
    bytes.extend_from_slice(params);
    bytes.push(checksum(id, length, error, params));
    bytes
}

/// Poll until the condition holds or a deadline passes
fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn test_position_read_end_to_end() {
    let (bus, wire) = running_bus(fast_config());

    bus.read_present_position(1).unwrap();

    // The request frame is on the wire: READ of 2 bytes at the present
    // position register (36)
    let sent = wire.sent();
    assert_eq!(sent[..5], [0xFF, 0xFF, 1, 4, 0x02]);
    assert_eq!(sent[5], 36);
    assert_eq!(sent[6], 2);

    // Device answers with 512 ticks
    wire.inject(&status_frame(1, 0, &512u16.to_le_bytes()));

    assert!(wait_for(|| bus.latest(1, ReadOp::PresentPosition).is_some()));
    let reading = bus.latest(1, ReadOp::PresentPosition).unwrap();
    assert_eq!(reading.value, 45.06);
    assert!(!reading.is_device_error());
    assert_eq!(bus.queue_depths(), (0, 0));
}

#[test]
fn test_fifo_binding_is_by_arrival_order() {
    let (bus, wire) = running_bus(fast_config());

    // Calls issued for device 1 then device 2
    bus.read_present_position(1).unwrap();
    bus.read_present_position(2).unwrap();

    // Responses arrive in the opposite device order; FIFO correlation binds
    // the first frame to the first call regardless of device ID
    wire.inject(&status_frame(2, 0, &512u16.to_le_bytes()));
    wire.inject(&status_frame(1, 0, &1023u16.to_le_bytes()));

    assert!(wait_for(|| bus.latest(2, ReadOp::PresentPosition).is_some()));
    assert_eq!(bus.latest(1, ReadOp::PresentPosition).unwrap().value, 45.06);
    assert_eq!(bus.latest(2, ReadOp::PresentPosition).unwrap().value, 90.02);
}

#[test]
fn test_device_error_bits_are_surfaced() {
    let (bus, wire) = running_bus(fast_config());

    bus.read_present_temperature(3).unwrap();
    wire.inject(&status_frame(3, 0x04, &[85]));

    assert!(wait_for(|| bus
        .latest(3, ReadOp::PresentTemperature)
        .is_some()));
    let reading = bus.latest(3, ReadOp::PresentTemperature).unwrap();
    assert_eq!(reading.value, 85.0);
    assert_eq!(reading.error_bits, 0x04);
    assert!(reading.is_device_error());
}

#[test]
fn test_redundant_goal_position_write_suppressed() {
    let (mut bus, wire) = running_bus(fast_config());

    assert!(bus.set_goal_position(1, 90.0).unwrap());
    assert!(!bus.set_goal_position(1, 90.0).unwrap());
    // One WRITE frame: header(2) + id + len + instr + addr + lo + hi + checksum
    assert_eq!(wire.sent().len(), 9);

    assert!(bus.set_goal_position(1, 91.0).unwrap());
    assert_eq!(wire.sent().len(), 18);
}

#[test]
fn test_resync_skips_garbage_bytes() {
    let (bus, wire) = running_bus(fast_config());

    bus.read_present_voltage(1).unwrap();
    let mut noisy = vec![0x42, 0x13];
    noisy.extend_from_slice(&status_frame(1, 0, &[121]));
    wire.inject(&noisy);

    assert!(wait_for(|| bus.latest(1, ReadOp::PresentVoltage).is_some()));
    assert_eq!(bus.latest(1, ReadOp::PresentVoltage).unwrap().value, 12.1);
}

#[test]
fn test_checksum_mismatch_is_discarded() {
    let (bus, wire) = running_bus(fast_config());

    bus.read_present_position(1).unwrap();

    let mut corrupted = status_frame(1, 0, &100u16.to_le_bytes());
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0xFF;
    wire.inject(&corrupted);
    wire.inject(&status_frame(1, 0, &512u16.to_le_bytes()));

    // The corrupted frame must not be stored; the pending call binds the
    // first valid frame
    assert!(wait_for(|| bus.latest(1, ReadOp::PresentPosition).is_some()));
    assert_eq!(bus.latest(1, ReadOp::PresentPosition).unwrap().value, 45.06);
}

#[test]
fn test_ping_round_trip() {
    let (bus, wire) = running_bus(fast_config());

    bus.ping(7).unwrap();
    // PING request carries no parameters
    assert_eq!(wire.sent(), vec![0xFF, 0xFF, 7, 2, 0x01, 0xF5]);

    wire.inject(&status_frame(7, 0, &[]));
    assert!(wait_for(|| bus.latest(7, ReadOp::Ping).is_some()));
    assert_eq!(bus.latest(7, ReadOp::Ping).unwrap().value, 1.0);
}

#[test]
fn test_latest_mode_stores_raw_frames() {
    let config = BusConfig {
        store_mode: StoreMode::Latest,
        ..fast_config()
    };
    let (bus, wire) = running_bus(config);

    wire.inject(&status_frame(5, 0, &[0, 1]));
    wire.inject(&status_frame(5, 0, &[0, 2]));

    assert!(wait_for(|| {
        bus.latest_frame(5)
            .map(|f| f.params == vec![0, 2])
            .unwrap_or(false)
    }));
}

#[test]
fn test_latest_mode_reads_never_exhaust_pending_queue() {
    let config = BusConfig {
        store_mode: StoreMode::Latest,
        max_pending: 2,
        ..fast_config()
    };
    let (bus, wire) = running_bus(config);

    // Latest mode never correlates, so reads must not occupy pending slots;
    // well past the bound they all still go through
    for _ in 0..5 {
        bus.read_present_position(1).unwrap();
    }
    assert_eq!(bus.queue_depths().0, 0);

    wire.inject(&status_frame(1, 0, &512u16.to_le_bytes()));
    assert!(wait_for(|| bus.latest_frame(1).is_some()));
}

#[test]
fn test_pending_queue_bound() {
    let config = BusConfig {
        max_pending: 1,
        ..fast_config()
    };
    let (bus, wire) = running_bus(config);

    bus.read_present_position(1).unwrap();
    assert!(matches!(
        bus.read_present_position(2),
        Err(ProtocolError::PendingQueueFull(1))
    ));
    // The rejected read sent nothing: only the first request is on the wire
    assert_eq!(wire.sent().len(), 8);

    // Draining the queue unblocks new reads
    wire.inject(&status_frame(1, 0, &512u16.to_le_bytes()));
    assert!(wait_for(|| bus.queue_depths().0 == 0));
    bus.read_present_position(2).unwrap();
}

#[test]
fn test_cooperative_stop_is_bounded() {
    let (mut bus, _wire) = running_bus(fast_config());
    assert_eq!(bus.state(), BusState::Running);

    let start = Instant::now();
    bus.stop();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(bus.state(), BusState::Stopped);
}

#[test]
fn test_sync_write_broadcast_layout() {
    let (mut bus, wire) = running_bus(fast_config());

    bus.sync_write_positions(&[(1, 0.0), (2, 45.06)]).unwrap();

    let sent = wire.sent();
    // Broadcast header: 0xFF 0xFF 0xFE, len = params + 2
    assert_eq!(sent[..3], [0xFF, 0xFF, 0xFE]);
    assert_eq!(sent[4], 0x83);
    // Params: addr, width, then (id, lo, hi) per device
    assert_eq!(sent[5], 30);
    assert_eq!(sent[6], 2);
    assert_eq!(sent[7], 1);
    assert_eq!(sent[10], 2);
    assert_eq!(&sent[11..13], &512u16.to_le_bytes());
}
