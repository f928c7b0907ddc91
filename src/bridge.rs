//! bridge.rs
//! The control loop: owns the UDP socket, decodes inbound frames, drives the
//! actuator and the stream supervisor, and enforces the fail-safe timeout.
//!
//! Single-threaded by design. The bounded-wait receive is the only
//! suspension point, so frame application, stream restarts and fail-safe
//! neutralization are strictly ordered; no locks needed.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{error, info, warn};
use socket2::{Domain, Protocol, Socket, Type};

use crate::actuator::Actuator;
use crate::codec;
use crate::config::{BridgeConfig, MAX_DATAGRAM};
use crate::stream::{StreamSpec, StreamSupervisor};

pub struct ControlBridge {
    socket: UdpSocket,
    actuator: Actuator,
    supervisor: StreamSupervisor,
    config: BridgeConfig,
    last_frame_at: Instant,
    fail_safe_engaged: bool,
}

impl ControlBridge {
    /// Bind the control socket with a bounded read timeout so the fail-safe
    /// deadline is evaluated at least once per poll interval.
    pub fn bind(
        config: BridgeConfig,
        actuator: Actuator,
        supervisor: StreamSupervisor,
    ) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.udp_port));
        socket.bind(&addr.into())?;
        socket.set_read_timeout(Some(config.poll_interval))?;
        let socket: UdpSocket = socket.into();

        info!("[Bridge] listening for control frames on {}", socket.local_addr()?);

        Ok(Self {
            socket,
            actuator,
            supervisor,
            config,
            last_frame_at: Instant::now(),
            fail_safe_engaged: false,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn supervisor(&self) -> &StreamSupervisor {
        &self.supervisor
    }

    /// Run until `shutdown` is set, then tear down exactly once.
    /// The flag may be flipped any number of times from the signal handler;
    /// teardown still runs a single time when the loop exits.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        let default_cmd = self.config.default_stream_cmd.clone();
        self.supervisor.start(&default_cmd);
        self.last_frame_at = Instant::now();

        while !shutdown.load(Ordering::Relaxed) {
            self.step();
        }

        info!("[Bridge] shutdown requested");
        self.supervisor.stop();
        self.actuator.neutral();
        self.actuator.disconnect();
        info!("[Bridge] PWM cleared and hardware connection closed");
    }

    /// One loop iteration: either a datagram or a poll timeout. No failure
    /// in here terminates the loop; the control channel stays available even
    /// when individual frames or the video pipeline misbehave.
    pub fn step(&mut self) {
        let mut buf = [0u8; MAX_DATAGRAM];
        match self.socket.recv_from(&mut buf) {
            Ok((len, _)) => {
                // Receipt itself re-arms the timer; validity is checked after.
                self.last_frame_at = Instant::now();
                if self.fail_safe_engaged {
                    info!("[Bridge] control frames resumed, leaving fail-safe");
                    self.fail_safe_engaged = false;
                }
                self.handle_datagram(&buf[..len]);
            }
            Err(e) if is_poll_timeout(&e) => self.check_fail_safe(),
            Err(e) => error!("[Bridge] socket receive failed: {e}"),
        }
    }

    fn handle_datagram(&mut self, payload: &[u8]) {
        match codec::decode(payload) {
            Ok(frame) => {
                self.actuator.apply(&frame);
                self.supervisor.update(&StreamSpec {
                    command: frame.stream_cmd,
                    hash: frame.stream_cmd_hash,
                });
            }
            Err(e) => {
                // Rejected frames leave the previous actuator state untouched.
                warn!(
                    "[Bridge] dropping frame ({e}): {}",
                    String::from_utf8_lossy(payload)
                );
            }
        }
    }

    fn check_fail_safe(&mut self) {
        if self.last_frame_at.elapsed() > self.config.no_data_timeout {
            warn!(
                "[Bridge] no control data for {:?}, stopping servo pulses",
                self.config.no_data_timeout
            );
            self.actuator.neutral();
            self.fail_safe_engaged = true;
            // Re-arm instead of re-firing on every poll. If the gap
            // persists, neutral is re-asserted once per full timeout
            // interval.
            self.last_frame_at = Instant::now();
        }
    }
}

fn is_poll_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
