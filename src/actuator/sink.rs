//! sink.rs
//! PWM output sinks: pigpiod-backed hardware writes or a dry no-op.
//!
//! The pigpio daemon speaks a fixed 16-byte command protocol over TCP
//! (four little-endian u32 words: cmd, p1, p2, reserved; the reply echoes
//! the request with the result in the last word). Only three commands are
//! needed here: PFS (set PWM frequency), SERVO (set servo pulse width) and
//! HWVER (connectivity check at startup).

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use log::{debug, error, info};

const PI_CMD_PFS: u32 = 7;
const PI_CMD_SERVO: u32 = 8;
const PI_CMD_HWVER: u32 = 17;

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Capability interface over the physical output. Exactly two production
/// variants exist, chosen once at startup: hardware-backed or no-op.
/// Calls carry no error return; once connected the daemon is assumed
/// available and write failures are logged, not propagated.
pub trait PwmSink {
    fn set_frequency(&mut self, pin: u32, hz: u32);
    fn set_pulse_width(&mut self, pin: u32, width_us: u32);
    fn disconnect(&mut self);
}

/// Hardware sink: thin client for a running pigpiod.
pub struct PigpioSink {
    stream: TcpStream,
}

impl PigpioSink {
    /// Connect and verify the daemon answers. Failure here is fatal for the
    /// caller; there is no point running the bridge without outputs.
    pub fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(REPLY_TIMEOUT))?;
        let mut sink = Self { stream };
        let hwver = sink.command(PI_CMD_HWVER, 0, 0)?;
        info!("[PigpioSink] connected to pigpiod at {addr} (hardware rev {hwver:#x})");
        Ok(sink)
    }

    fn command(&mut self, cmd: u32, p1: u32, p2: u32) -> io::Result<i32> {
        let mut request = [0u8; 16];
        request[0..4].copy_from_slice(&cmd.to_le_bytes());
        request[4..8].copy_from_slice(&p1.to_le_bytes());
        request[8..12].copy_from_slice(&p2.to_le_bytes());
        self.stream.write_all(&request)?;

        let mut reply = [0u8; 16];
        self.stream.read_exact(&mut reply)?;
        Ok(i32::from_le_bytes([reply[12], reply[13], reply[14], reply[15]]))
    }

    /// Fire-and-forget command for the steady-state write path.
    fn issue(&mut self, name: &str, cmd: u32, p1: u32, p2: u32) {
        match self.command(cmd, p1, p2) {
            Ok(result) if result < 0 => {
                error!("[PigpioSink] {name}({p1}, {p2}) rejected by pigpiod: {result}");
            }
            Ok(_) => {}
            Err(e) => error!("[PigpioSink] {name}({p1}, {p2}) failed: {e}"),
        }
    }
}

impl PwmSink for PigpioSink {
    fn set_frequency(&mut self, pin: u32, hz: u32) {
        self.issue("set_frequency", PI_CMD_PFS, pin, hz);
    }

    fn set_pulse_width(&mut self, pin: u32, width_us: u32) {
        self.issue("set_pulse_width", PI_CMD_SERVO, pin, width_us);
    }

    fn disconnect(&mut self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("[PigpioSink] shutdown on close: {e}");
        }
    }
}

/// Dry-run sink: receives every call the hardware sink would, does nothing.
/// Keeps timing and logging identical with and without hardware.
pub struct DrySink;

impl PwmSink for DrySink {
    fn set_frequency(&mut self, pin: u32, hz: u32) {
        debug!("[DrySink] set_frequency(pin={pin}, hz={hz})");
    }

    fn set_pulse_width(&mut self, pin: u32, width_us: u32) {
        debug!("[DrySink] set_pulse_width(pin={pin}, us={width_us})");
    }

    fn disconnect(&mut self) {
        debug!("[DrySink] disconnect");
    }
}
