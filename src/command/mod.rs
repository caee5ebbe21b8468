//! One external diagnostic process and the log file it writes to.
//!
//! A handle is started once and stopped once. While running it owns the parent's copy of the
//! log file; the child writes stdout and stderr straight into that file, so the collector never
//! relays any output itself.

mod terminate;

#[cfg(test)]
pub use terminate::mock;
pub use terminate::{SigtermTerminator, Terminator};

use crate::error::{LaunchError, TerminateError};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Configured,
    Running,
    Stopped,
    /// `start` was attempted and failed; the handle cannot be started again.
    Failed,
}

#[derive(Debug)]
pub struct CommandHandle {
    name: String,
    argv: Vec<String>,
    log_path: Option<PathBuf>,
    phase: Phase,
    child: Option<Child>,
    log: Option<File>,
}

impl CommandHandle {
    /// `log_path: None` discards the diagnostic's output.
    pub fn new(name: impl Into<String>, argv: Vec<String>, log_path: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            argv,
            log_path,
            phase: Phase::Configured,
            child: None,
            log: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    pub fn is_stopped(&self) -> bool {
        self.phase == Phase::Stopped
    }

    pub fn is_sink_open(&self) -> bool {
        self.log.is_some()
    }

    /// Open the log sink and spawn the process. Returns the child's pid without waiting.
    pub fn start(&mut self) -> Result<u32, LaunchError> {
        if self.phase != Phase::Configured {
            return Err(LaunchError::AlreadyStarted);
        }
        // Whatever happens below uses up the single start.
        self.phase = Phase::Failed;

        let (program, args) = self.argv.split_first().ok_or(LaunchError::EmptyCommand)?;

        let log = match self.log_path.as_deref() {
            Some(path) => Some(open_log(path)?),
            None => None,
        };
        let (stdout, stderr) = match (&log, self.log_path.as_deref()) {
            (Some(file), Some(path)) => (sink_for(file, path)?, sink_for(file, path)?),
            _ => (Stdio::null(), Stdio::null()),
        };

        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::null()).stdout(stdout).stderr(stderr);
        // Own process group: a Ctrl-C at the terminal reaches the collector only, which then
        // stops every diagnostic itself.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();
        info!(name = %self.name, pid, "Diagnostic started");

        self.child = Some(child);
        self.log = log;
        self.phase = Phase::Running;
        Ok(pid)
    }

    /// Request termination and release the log sink.
    ///
    /// The sink is closed even when the request fails. Does not wait for the process to exit.
    pub fn stop(&mut self, terminator: &dyn Terminator) -> Result<(), TerminateError> {
        match self.phase {
            Phase::Running => {}
            Phase::Stopped => return Err(TerminateError::AlreadyStopped),
            Phase::Configured | Phase::Failed => return Err(TerminateError::NotRunning),
        }
        self.phase = Phase::Stopped;

        let result = match self.child.as_mut() {
            Some(child) => request_termination(child, terminator),
            None => Err(TerminateError::NotRunning),
        };
        if let Err(e) = &result {
            warn!(name = %self.name, error = %e, "Termination request failed");
        }

        if self.log.take().is_some() {
            debug!(name = %self.name, "Log sink closed");
        }
        result
    }

    /// Non-blocking exit check; reaps the child once it has exited.
    pub fn try_status(&mut self) -> io::Result<Option<ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => child.try_wait(),
            None => Ok(None),
        }
    }

    /// Poll until the process exits or `deadline` passes. `Ok(None)` means it is still running.
    pub async fn wait_for_exit(&mut self, deadline: Instant) -> io::Result<Option<ExitStatus>> {
        loop {
            if let Some(status) = self.try_status()? {
                debug!(name = %self.name, %status, "Diagnostic exited");
                return Ok(Some(status));
            }
            if self.child.is_none() || Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }
}

impl Drop for CommandHandle {
    fn drop(&mut self) {
        if self.phase != Phase::Running {
            return;
        }
        if let Some(pid) = self.pid() {
            warn!(name = %self.name, pid, "Diagnostic dropped while running; terminating");
            let _ = SigtermTerminator.terminate(pid);
        }
    }
}

fn open_log(path: &Path) -> Result<File, LaunchError> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|source| LaunchError::LogSink {
            path: path.to_path_buf(),
            source,
        })
}

fn sink_for(file: &File, path: &Path) -> Result<Stdio, LaunchError> {
    file.try_clone()
        .map(Stdio::from)
        .map_err(|source| LaunchError::LogSink {
            path: path.to_path_buf(),
            source,
        })
}

fn request_termination(child: &mut Child, terminator: &dyn Terminator) -> Result<(), TerminateError> {
    let pid = child.id();
    match child.try_wait() {
        Ok(Some(status)) => Err(TerminateError::AlreadyExited { pid, status }),
        Ok(None) => terminator
            .terminate(pid)
            .map_err(|source| TerminateError::Signal { pid, source }),
        Err(source) => Err(TerminateError::Query { pid, source }),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::mock::RecordingTerminator;
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn deadline(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn test_start_writes_stdout_and_stderr_to_one_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("both.log");
        let mut handle = CommandHandle::new(
            "both",
            argv(&["sh", "-c", "echo out; echo err >&2; exec sleep 30"]),
            Some(log.clone()),
        );

        let pid = handle.start().unwrap();
        assert_eq!(handle.pid(), Some(pid));
        assert!(handle.is_running());
        assert!(handle.is_sink_open());
        assert!(log.exists());

        // Give the shell a moment to write before asking it to stop.
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.stop(&SigtermTerminator).unwrap();
        assert!(handle.wait_for_exit(deadline(5)).await.unwrap().is_some());

        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("out"));
        assert!(content.contains("err"));
    }

    #[test]
    fn test_start_truncates_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("t.log");
        std::fs::write(&log, "stale contents from an earlier run").unwrap();

        let mut handle = CommandHandle::new("t", argv(&["sleep", "30"]), Some(log.clone()));
        handle.start().unwrap();
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "");
        handle.stop(&SigtermTerminator).unwrap();
    }

    #[test]
    fn test_start_only_once() {
        let mut handle = CommandHandle::new("once", argv(&["sleep", "30"]), None);
        handle.start().unwrap();
        assert!(matches!(handle.start(), Err(LaunchError::AlreadyStarted)));
        handle.stop(&SigtermTerminator).unwrap();
        assert!(matches!(handle.start(), Err(LaunchError::AlreadyStarted)));
    }

    #[test]
    fn test_unwritable_log_fails_start_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in place of the log file cannot be opened for writing, even as root.
        let log = dir.path().join("busy.log");
        std::fs::create_dir(&log).unwrap();

        let mut handle = CommandHandle::new("busy", argv(&["sleep", "30"]), Some(log));
        let err = handle.start().unwrap_err();
        assert!(matches!(err, LaunchError::LogSink { .. }));
        assert!(err.to_string().contains("busy.log"));
        assert_eq!(handle.pid(), None);
        assert!(!handle.is_sink_open());
        assert!(matches!(handle.start(), Err(LaunchError::AlreadyStarted)));
    }

    #[test]
    fn test_missing_program_releases_sink() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("ghost.log");
        let mut handle = CommandHandle::new(
            "ghost",
            argv(&["/nonexistent/definitely-not-a-sampler"]),
            Some(log),
        );
        let err = handle.start().unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
        assert!(!handle.is_sink_open());
        assert!(matches!(
            handle.stop(&SigtermTerminator),
            Err(TerminateError::NotRunning)
        ));
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let mut handle = CommandHandle::new("empty", Vec::new(), None);
        assert!(matches!(handle.start(), Err(LaunchError::EmptyCommand)));
    }

    #[test]
    fn test_stop_before_start_is_rejected() {
        let mut handle = CommandHandle::new("idle", argv(&["sleep", "30"]), None);
        assert!(matches!(
            handle.stop(&SigtermTerminator),
            Err(TerminateError::NotRunning)
        ));
    }

    #[test]
    fn test_stop_releases_sink_once() {
        let dir = tempfile::tempdir().unwrap();
        let terminator = RecordingTerminator::new();
        let mut handle = CommandHandle::new(
            "twice",
            argv(&["sleep", "30"]),
            Some(dir.path().join("twice.log")),
        );
        let pid = handle.start().unwrap();

        handle.stop(&terminator).unwrap();
        assert!(!handle.is_sink_open());
        assert!(handle.is_stopped());

        assert!(matches!(
            handle.stop(&terminator),
            Err(TerminateError::AlreadyStopped)
        ));
        assert_eq!(terminator.requests(), vec![pid]);
    }

    #[test]
    fn test_failed_termination_still_closes_sink() {
        let dir = tempfile::tempdir().unwrap();
        let terminator = RecordingTerminator::new().failing_request(0);
        let mut handle = CommandHandle::new(
            "stubborn",
            argv(&["sleep", "30"]),
            Some(dir.path().join("stubborn.log")),
        );
        handle.start().unwrap();

        let err = handle.stop(&terminator).unwrap_err();
        assert!(matches!(err, TerminateError::Signal { .. }));
        assert!(!handle.is_sink_open());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_stop_after_exit_reports_already_exited() {
        let mut handle = CommandHandle::new("quick", argv(&["true"]), None);
        let pid = handle.start().unwrap();

        // Wait for the unreaped child to turn into a zombie; `stop` must notice it exited.
        let stat = format!("/proc/{pid}/stat");
        let exit = deadline(5);
        while Instant::now() < exit {
            let state = std::fs::read_to_string(&stat).unwrap_or_default();
            if state.contains(") Z ") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let err = handle.stop(&SigtermTerminator).unwrap_err();
        assert!(matches!(err, TerminateError::AlreadyExited { .. }));
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn test_wait_for_exit_times_out_without_killing() {
        // Ignores SIGTERM, so only the deadline ends the wait.
        let mut handle = CommandHandle::new(
            "deaf",
            argv(&["sh", "-c", "trap '' TERM; sleep 30 & wait"]),
            None,
        );
        let pid = handle.start().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.stop(&SigtermTerminator).unwrap();

        let status = handle
            .wait_for_exit(Instant::now() + Duration::from_millis(300))
            .await
            .unwrap();
        assert!(status.is_none());

        // Clean up the test child for real.
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
        assert!(handle.wait_for_exit(deadline(5)).await.unwrap().is_some());
    }
}
