//! End-to-end tests for the control loop: real UDP socket, recording PWM
//! sink, real (short-lived) stream processes.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fpv_controller::actuator::sink::PwmSink;
use fpv_controller::actuator::Actuator;
use fpv_controller::bridge::ControlBridge;
use fpv_controller::config::BridgeConfig;
use fpv_controller::stream::StreamSupervisor;
use tempfile::TempDir;

#[derive(Clone, Default)]
struct RecordingSink {
    pulses: Arc<Mutex<Vec<(u32, u32)>>>,
    disconnects: Arc<AtomicUsize>,
}

impl PwmSink for RecordingSink {
    fn set_frequency(&mut self, _pin: u32, _hz: u32) {}
    fn set_pulse_width(&mut self, pin: u32, us: u32) {
        self.pulses.lock().unwrap().push((pin, us));
    }
    fn disconnect(&mut self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    bridge: ControlBridge,
    pulses: Arc<Mutex<Vec<(u32, u32)>>>,
    disconnects: Arc<AtomicUsize>,
    sender: UdpSocket,
    target: std::net::SocketAddr,
    _dir: TempDir,
}

impl Harness {
    fn new(poll: Duration, timeout: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BridgeConfig::new(true);
        config.udp_port = 0;
        config.poll_interval = poll;
        config.no_data_timeout = timeout;
        config.default_stream_cmd = "true".to_string();
        config.stream_log = dir.path().join("stream.log");
        config.stream_work_dir = dir.path().to_path_buf();

        let sink = RecordingSink::default();
        let pulses = sink.pulses.clone();
        let disconnects = sink.disconnects.clone();
        let actuator = Actuator::new(Box::new(sink));
        let supervisor =
            StreamSupervisor::new(config.stream_log.clone(), config.stream_work_dir.clone());

        let bridge = ControlBridge::bind(config, actuator, supervisor).unwrap();
        let port = bridge.local_addr().unwrap().port();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = format!("127.0.0.1:{port}").parse().unwrap();

        // Drop the frequency-programming writes from construction.
        pulses.lock().unwrap().clear();

        Harness { bridge, pulses, disconnects, sender, target, _dir: dir }
    }

    fn send(&self, payload: &[u8]) {
        self.sender.send_to(payload, self.target).unwrap();
    }

    fn recorded_pulses(&self) -> Vec<(u32, u32)> {
        self.pulses.lock().unwrap().clone()
    }

    fn clear_pulses(&self) {
        self.pulses.lock().unwrap().clear();
    }

    fn neutral_writes(&self) -> usize {
        self.recorded_pulses().iter().filter(|(_, us)| *us == 0).count()
    }
}

#[test]
fn valid_frame_drives_all_channels() {
    let mut h = Harness::new(Duration::from_millis(50), Duration::from_millis(500));
    h.send(br#"{"yaw":1.0,"pitch":-1.0,"steer":0.0,"long":0.0}"#);
    h.bridge.step();

    let pulses = h.recorded_pulses();
    assert_eq!(pulses.len(), 6, "four axes plus two gimbal channels");
    assert!(pulses.contains(&(18, 2500)), "yaw at full deflection");
    assert!(pulses.contains(&(12, 500)), "pitch at full reverse");
    assert!(pulses.contains(&(19, 1450)), "throttle midpoint of ESC range");
}

#[test]
fn rejected_frame_leaves_actuator_untouched() {
    let mut h = Harness::new(Duration::from_millis(50), Duration::from_millis(500));
    h.send(br#"{"yaw":1.5}"#);
    h.bridge.step();
    assert!(h.recorded_pulses().is_empty(), "no partial application on reject");
}

#[test]
fn malformed_payloads_do_not_stop_the_loop() {
    let mut h = Harness::new(Duration::from_millis(50), Duration::from_millis(500));

    h.send(&[0xff, 0xfe, 0x00]);
    h.bridge.step();
    h.send(b"{broken json");
    h.bridge.step();
    assert!(h.recorded_pulses().is_empty());

    h.send(br#"{"yaw":0.5}"#);
    h.bridge.step();
    assert_eq!(h.recorded_pulses().len(), 6, "next datagram processed normally");
}

#[test]
fn fail_safe_fires_once_per_timeout_episode() {
    let mut h = Harness::new(Duration::from_millis(20), Duration::from_millis(200));
    h.send(b"{}");
    h.bridge.step();
    h.clear_pulses();

    // Idle for well past one timeout but short of two. The reference
    // timestamp resets when the fail-safe fires, so exactly one neutral
    // batch must appear despite many elapsed poll intervals.
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(320) {
        h.bridge.step();
    }
    assert_eq!(h.neutral_writes(), 6, "exactly one neutral() per episode");
}

#[test]
fn frame_arrival_ends_fail_safe() {
    let mut h = Harness::new(Duration::from_millis(20), Duration::from_millis(100));
    h.send(b"{}");
    h.bridge.step();
    h.clear_pulses();

    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(160) {
        h.bridge.step();
    }
    assert_eq!(h.neutral_writes(), 6, "fail-safe engaged");
    h.clear_pulses();

    h.send(br#"{"pitch":0.25}"#);
    h.bridge.step();
    assert_eq!(h.recorded_pulses().len(), 6, "frame applied after fail-safe");
    assert_eq!(h.neutral_writes(), 0);

    // Fresh frame re-armed the timer; an immediate poll must not re-fire.
    h.clear_pulses();
    h.bridge.step();
    assert_eq!(h.neutral_writes(), 0);
}

#[test]
fn stream_updates_follow_command_hash_changes() {
    let mut h = Harness::new(Duration::from_millis(50), Duration::from_millis(500));

    h.send(br#"{"stream_cmd":"sleep 30","stream_cmd_hash":"h1"}"#);
    h.bridge.step();
    let first_pid = h.bridge.supervisor().pid().expect("pipeline started");

    h.send(br#"{"stream_cmd":"sleep 30","stream_cmd_hash":"h1"}"#);
    h.bridge.step();
    assert_eq!(h.bridge.supervisor().pid(), Some(first_pid), "idempotent update");

    h.send(br#"{"stream_cmd":"sleep 30","stream_cmd_hash":"h2"}"#);
    h.bridge.step();
    let second_pid = h.bridge.supervisor().pid().expect("pipeline restarted");
    assert_ne!(second_pid, first_pid);

    // Drive the shutdown path so no pipeline outlives the test.
    let stop = AtomicBool::new(true);
    h.bridge.run(&stop);
    assert!(!h.bridge.supervisor().is_active());
}

#[test]
fn shutdown_teardown_runs_exactly_once() {
    let mut h = Harness::new(Duration::from_millis(20), Duration::from_millis(200));

    let stop = AtomicBool::new(true);
    h.bridge.run(&stop);

    assert!(!h.bridge.supervisor().is_active(), "stream stopped");
    assert_eq!(h.neutral_writes(), 6, "one neutral batch at teardown");
    assert_eq!(h.disconnects.load(Ordering::SeqCst), 1, "hardware released once");
}
