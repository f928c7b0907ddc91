//! config.rs
//! Runtime configuration for the bridge, built once in `main` and passed by
//! value (constructor injection, no process-wide state).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// UDP port the control app sends frames to.
pub const UDP_PORT: u16 = 12346;
/// Largest accepted datagram; the control app emits well under this.
pub const MAX_DATAGRAM: usize = 1024;
/// Socket read timeout; bounds fail-safe detection latency.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Neutralize outputs after this long without a datagram.
pub const NO_DATA_TIMEOUT: Duration = Duration::from_millis(250);

/// Address of the pigpio daemon (pigpiod must be running).
pub const PIGPIOD_ADDR: &str = "127.0.0.1:8888";

/// Combined stdout/stderr of the stream pipeline, append mode.
pub const STREAM_LOG_PATH: &str = "/tmp/fpv_controller_stream.log";

/// Camera capture pipeline used until the control app overrides it.
pub const DEFAULT_STREAM_CMD: &str = "raspivid -pf baseline -awb cloud -fl -g 1 -w 320 -h 240 \
     --nopreview -fps 30/1 -t 0 -o - | \
     gst-launch-1.0 fdsrc ! h264parse ! rtph264pay ! \
     udpsink host=192.168.2.5 port=12345";

/// Synthetic source feeding the same RTP sink, for hosts without a camera.
pub const DRY_STREAM_CMD: &str = "gst-launch-1.0 videotestsrc is-live=true ! \
     video/x-raw,width=320,height=240,framerate=30/1 ! \
     x264enc tune=zerolatency bitrate=600 ! h264parse ! rtph264pay ! \
     udpsink host=192.168.2.5 port=12345";

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub dry_run: bool,
    pub udp_port: u16,
    pub poll_interval: Duration,
    pub no_data_timeout: Duration,
    pub default_stream_cmd: String,
    pub stream_log: PathBuf,
    /// Working directory for the stream pipeline, so relative resource
    /// references resolve next to the installed binary.
    pub stream_work_dir: PathBuf,
}

impl BridgeConfig {
    pub fn new(dry_run: bool) -> Self {
        let default_stream_cmd = if dry_run {
            DRY_STREAM_CMD.to_string()
        } else {
            DEFAULT_STREAM_CMD.to_string()
        };
        Self {
            dry_run,
            udp_port: UDP_PORT,
            poll_interval: POLL_INTERVAL,
            no_data_timeout: NO_DATA_TIMEOUT,
            default_stream_cmd,
            stream_log: PathBuf::from(STREAM_LOG_PATH),
            stream_work_dir: install_dir(),
        }
    }
}

fn install_dir() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}
