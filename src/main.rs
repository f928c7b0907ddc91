//! main.rs
//! Entry point: argument parsing, logger init, sink selection, signal
//! handling and control loop startup.

use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{error, info, warn};
use thread_priority::{set_current_thread_priority, ThreadPriority};

use fpv_controller::actuator::sink::{DrySink, PigpioSink, PwmSink};
use fpv_controller::actuator::Actuator;
use fpv_controller::bridge::ControlBridge;
use fpv_controller::config::{BridgeConfig, PIGPIOD_ADDR};
use fpv_controller::stream::StreamSupervisor;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn parse_args() -> bool {
    let mut dry_run = false;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--dry-run" => dry_run = true,
            other => {
                eprintln!("unknown argument: {other}");
                eprintln!("usage: fpv_controller [--dry-run]");
                process::exit(2);
            }
        }
    }
    dry_run
}

fn main() {
    env_logger::init();

    let dry_run = parse_args();
    let config = BridgeConfig::new(dry_run);

    let sink: Box<dyn PwmSink> = if dry_run {
        info!("running in --dry-run mode, no pigpio interaction");
        Box::new(DrySink)
    } else {
        match PigpioSink::connect(PIGPIOD_ADDR) {
            Ok(sink) => Box::new(sink),
            Err(e) => {
                error!("could not connect to pigpiod ({e}); make sure pigpiod is running");
                process::exit(1);
            }
        }
    };

    let actuator = Actuator::new(sink);
    let supervisor =
        StreamSupervisor::new(config.stream_log.clone(), config.stream_work_dir.clone());

    unsafe {
        libc::signal(libc::SIGINT, request_shutdown as libc::sighandler_t);
        libc::signal(libc::SIGTERM, request_shutdown as libc::sighandler_t);
    }

    if let Err(e) = set_current_thread_priority(ThreadPriority::Max) {
        warn!("could not raise control loop priority: {e:?}");
    }

    let mut bridge = match ControlBridge::bind(config, actuator, supervisor) {
        Ok(bridge) => bridge,
        Err(e) => {
            error!("failed to bind control socket: {e}");
            process::exit(1);
        }
    };

    bridge.run(&SHUTDOWN);
}
