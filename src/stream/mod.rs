//! stream/mod.rs
//! Supervision of the external video pipeline process.
//!
//! The pipeline is a multi-stage shell command (capture | parse | transport),
//! so it is launched as the leader of its own process group and torn down by
//! signaling the whole group; killing only the shell would leave the
//! downstream stages running as orphans.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

/// Grace window between SIGTERM and SIGKILL on the group.
const TERM_GRACE: Duration = Duration::from_secs(2);
const REAP_POLL: Duration = Duration::from_millis(20);

/// The currently desired video pipeline, as sent by the control app.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSpec {
    pub command: String,
    pub hash: String,
}

impl StreamSpec {
    /// True when no stream command was requested at all.
    pub fn is_unset(&self) -> bool {
        self.command.is_empty() && self.hash.is_empty()
    }
}

/// Owns at most one live pipeline process. Launch failures are logged and
/// swallowed; the control loop keeps running with no video rather than
/// crash.
pub struct StreamSupervisor {
    child: Option<Child>,
    last_applied: Option<StreamSpec>,
    log_path: PathBuf,
    work_dir: PathBuf,
}

impl StreamSupervisor {
    pub fn new(log_path: PathBuf, work_dir: PathBuf) -> Self {
        Self { child: None, last_applied: None, log_path, work_dir }
    }

    /// Replace whatever is running with `command`. Never runs two pipeline
    /// processes concurrently.
    pub fn start(&mut self, command: &str) {
        self.stop();
        info!("[Stream] starting pipeline: {command}");
        match self.spawn(command) {
            Ok(child) => {
                debug!("[Stream] pipeline pid {}", child.id());
                self.child = Some(child);
            }
            Err(e) => error!("[Stream] failed to launch pipeline: {e}"),
        }
    }

    fn spawn(&self, command: &str) -> io::Result<Child> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        let log_err = log.try_clone()?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .current_dir(&self.work_dir);

        // New session makes the shell the group leader, so the whole
        // pipeline can be signaled at once.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd.spawn()
    }

    /// Terminate the process group and reap the leader. No-op when idle;
    /// a group that already exited counts as success.
    pub fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let pgid = child.id() as libc::pid_t;
        debug!("[Stream] stopping pipeline group {pgid}");
        signal_group(pgid, libc::SIGTERM);

        let deadline = Instant::now() + TERM_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!("[Stream] pipeline exited: {status}");
                    return;
                }
                Ok(None) if Instant::now() >= deadline => {
                    warn!("[Stream] pipeline ignored SIGTERM, killing group {pgid}");
                    signal_group(pgid, libc::SIGKILL);
                    match child.wait() {
                        Ok(status) => info!("[Stream] pipeline killed: {status}"),
                        Err(e) => error!("[Stream] failed to reap pipeline: {e}"),
                    }
                    return;
                }
                Ok(None) => thread::sleep(REAP_POLL),
                Err(e) => {
                    error!("[Stream] failed to reap pipeline: {e}");
                    return;
                }
            }
        }
    }

    /// Restart only when the requested (command, hash) pair actually
    /// changed; the control app repeats the same pair on every frame.
    pub fn update(&mut self, spec: &StreamSpec) {
        if spec.is_unset() {
            return;
        }
        if self.last_applied.as_ref() == Some(spec) {
            return;
        }
        info!("[Stream] new stream spec (hash {})", spec.hash);
        self.last_applied = Some(spec.clone());
        let command = spec.command.clone();
        self.start(&command);
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    pub fn is_active(&self) -> bool {
        self.child.is_some()
    }
}

fn signal_group(pgid: libc::pid_t, signal: libc::c_int) {
    let rc = unsafe { libc::killpg(pgid, signal) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        // ESRCH: the group already exited, which is success for us
        if err.raw_os_error() != Some(libc::ESRCH) {
            error!("[Stream] killpg({pgid}, {signal}) failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn supervisor(dir: &tempfile::TempDir) -> StreamSupervisor {
        StreamSupervisor::new(dir.path().join("stream.log"), dir.path().to_path_buf())
    }

    #[test]
    fn stop_without_start_is_a_noop() {
        let dir = tempdir().unwrap();
        let mut sup = supervisor(&dir);
        sup.stop();
        sup.stop();
        assert!(!sup.is_active());
    }

    #[test]
    fn update_is_idempotent_for_identical_spec() {
        let dir = tempdir().unwrap();
        let mut sup = supervisor(&dir);
        let spec = StreamSpec { command: "sleep 30".into(), hash: "h1".into() };

        sup.update(&spec);
        let first_pid = sup.pid().expect("pipeline should be running");
        sup.update(&spec);
        assert_eq!(sup.pid(), Some(first_pid), "identical spec must not restart");

        sup.stop();
    }

    #[test]
    fn update_restarts_on_changed_hash() {
        let dir = tempdir().unwrap();
        let mut sup = supervisor(&dir);

        sup.update(&StreamSpec { command: "sleep 30".into(), hash: "h1".into() });
        let first_pid = sup.pid().expect("pipeline should be running");
        sup.update(&StreamSpec { command: "sleep 30".into(), hash: "h2".into() });
        let second_pid = sup.pid().expect("pipeline should be running");
        assert_ne!(first_pid, second_pid);

        sup.stop();
    }

    #[test]
    fn update_with_unset_spec_does_nothing() {
        let dir = tempdir().unwrap();
        let mut sup = supervisor(&dir);
        sup.update(&StreamSpec::default());
        assert!(!sup.is_active());
    }

    #[test]
    fn stop_after_process_already_exited_is_success() {
        let dir = tempdir().unwrap();
        let mut sup = supervisor(&dir);
        sup.start("true");
        thread::sleep(Duration::from_millis(200));
        sup.stop();
        assert!(!sup.is_active());
    }

    #[test]
    fn launch_failure_is_swallowed() {
        let dir = tempdir().unwrap();
        let mut sup = StreamSupervisor::new(
            dir.path().join("stream.log"),
            dir.path().join("does-not-exist"),
        );
        sup.start("sleep 30");
        assert!(!sup.is_active());
    }

    #[test]
    fn pipeline_output_is_appended_to_log() {
        let dir = tempdir().unwrap();
        let mut sup = supervisor(&dir);
        sup.start("echo first");
        thread::sleep(Duration::from_millis(200));
        sup.start("echo second");
        thread::sleep(Duration::from_millis(200));
        sup.stop();

        let log = std::fs::read_to_string(dir.path().join("stream.log")).unwrap();
        assert!(log.contains("first"));
        assert!(log.contains("second"));
    }
}
