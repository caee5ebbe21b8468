//! Collection session: one run from directory setup to the final tarball.
//!
//! The session walks `Created -> Started -> AwaitingSignal -> Stopped -> Archived -> Cleaned`
//! and refuses any call that would skip a step. Diagnostics are kept in configuration order
//! so reports come out the same way every run.

use super::archive;
use super::stop_signal::StopSignal;
use super::workdir;
use crate::command::{CommandHandle, SigtermTerminator, Terminator};
use crate::diagnostics;
use crate::error::{ArchiveError, ConfigError, SessionError};
use crate::model::{
    CollectConfig, ExitReport, Failure, SessionState, StartReport, Started, StopReason,
    StopReport,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Stand-in deadline for exit timeouts too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

pub struct CollectionSession {
    state: SessionState,
    archive_path: PathBuf,
    working_dir: PathBuf,
    handles: Vec<CommandHandle>,
    terminator: Box<dyn Terminator>,
}

impl CollectionSession {
    /// Validate paths, probe the archive, create the log directory and one handle per diagnostic.
    ///
    /// Nothing is created when validation fails; the archive probe is removed again if the
    /// log directory cannot be created.
    pub fn create(cfg: &CollectConfig) -> Result<Self, SessionError> {
        Self::with_terminator(cfg, Box::new(SigtermTerminator))
    }

    pub fn with_terminator(
        cfg: &CollectConfig,
        terminator: Box<dyn Terminator>,
    ) -> Result<Self, SessionError> {
        diagnostics::validate(&cfg.diagnostics, cfg.interval)?;
        let commands = cfg
            .diagnostics
            .iter()
            .map(|spec| Ok((spec.name.clone(), spec.render(cfg.interval)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        workdir::ensure_archive_absent(&cfg.archive_path)?;
        match cfg.working_dir.as_deref() {
            Some(dir) => workdir::ensure_workdir_absent(dir)?,
            None => workdir::ensure_root(&cfg.log_root)?,
        }

        workdir::probe_archive(&cfg.archive_path)?;
        let created = match cfg.working_dir.as_deref() {
            Some(dir) => workdir::create_explicit(dir),
            None => workdir::create_unique(&cfg.log_root),
        };
        let working_dir = match created {
            Ok(dir) => dir,
            Err(e) => {
                remove_probe(&cfg.archive_path);
                return Err(e.into());
            }
        };
        info!(
            workdir = %working_dir.display(),
            archive = %cfg.archive_path.display(),
            "Collection session created"
        );

        let handles = commands
            .into_iter()
            .map(|(name, argv)| {
                let log = working_dir.join(format!("{name}.log"));
                CommandHandle::new(name, argv, Some(log))
            })
            .collect();

        Ok(Self {
            state: SessionState::Created,
            archive_path: cfg.archive_path.clone(),
            working_dir,
            handles,
            terminator,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn handles(&self) -> &[CommandHandle] {
        &self.handles
    }

    /// Start every diagnostic. Failures are reported per name and never stop the others.
    pub fn start_all(&mut self) -> Result<StartReport, SessionError> {
        self.expect(SessionState::Created, "start diagnostics")?;

        let mut report = StartReport::default();
        for handle in &mut self.handles {
            match handle.start() {
                Ok(pid) => report.started.push(Started {
                    name: handle.name().to_string(),
                    pid,
                }),
                Err(error) => {
                    warn!(name = handle.name(), error = %error, "Diagnostic failed to start");
                    report.failed.push(Failure {
                        name: handle.name().to_string(),
                        error,
                    });
                }
            }
        }
        self.state = SessionState::Started;
        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            "Diagnostics launched"
        );
        Ok(report)
    }

    /// Block until `signal` fires. The session counts as stoppable even if waiting failed.
    pub async fn await_stop_signal<S: StopSignal>(
        &mut self,
        signal: &mut S,
    ) -> Result<StopReason, SessionError> {
        self.expect(SessionState::Started, "wait for the stop signal")?;
        self.state = SessionState::AwaitingSignal;

        let reason = signal.wait().await.map_err(SessionError::StopSignal)?;
        info!(reason = reason.to_message(), "Stop signal received");
        Ok(reason)
    }

    /// Ask every running diagnostic to terminate, continuing past individual failures.
    pub fn stop_all(&mut self) -> Result<StopReport, SessionError> {
        self.expect(SessionState::AwaitingSignal, "stop diagnostics")?;

        let mut report = StopReport::default();
        for handle in &mut self.handles {
            let name = handle.name().to_string();
            if !handle.is_running() {
                debug!(name = %name, "Diagnostic never started; nothing to stop");
                report.skipped.push(name);
                continue;
            }
            match handle.stop(self.terminator.as_ref()) {
                Ok(()) => report.stopped.push(name),
                Err(error) => report.failed.push(Failure { name, error }),
            }
        }
        self.state = SessionState::Stopped;
        Ok(report)
    }

    /// Give stopped diagnostics up to `timeout` in total to exit, so their last output is on
    /// disk before archiving. Never escalates beyond the termination request.
    pub async fn wait_for_exit(&mut self, timeout: Duration) -> Result<ExitReport, SessionError> {
        self.expect(SessionState::Stopped, "wait for diagnostics to exit")?;

        let now = tokio::time::Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now + FAR_FUTURE);
        let mut report = ExitReport::default();
        for handle in self.handles.iter_mut().filter(|h| h.is_stopped()) {
            let name = handle.name().to_string();
            match handle.wait_for_exit(deadline).await {
                Ok(Some(_)) => report.exited.push(name),
                Ok(None) => {
                    warn!(name = %name, "Diagnostic still running after exit timeout");
                    report.still_running.push(name);
                }
                Err(e) => {
                    warn!(name = %name, error = %e, "Cannot query diagnostic exit status");
                    report.still_running.push(name);
                }
            }
        }
        Ok(report)
    }

    /// Write the tarball, then delete the log directory.
    ///
    /// If writing fails the log directory is left untouched and the session stays `Stopped`.
    pub fn archive(&mut self) -> Result<PathBuf, SessionError> {
        self.expect(SessionState::Stopped, "archive")?;
        debug_assert!(self.handles.iter().all(|h| !h.is_sink_open()));

        if let Err(source) = archive::write_tar_gz(&self.working_dir, &self.archive_path) {
            remove_probe(&self.archive_path);
            return Err(ArchiveError::Write {
                path: self.archive_path.clone(),
                workdir: self.working_dir.clone(),
                source,
            }
            .into());
        }
        self.state = SessionState::Archived;
        info!(archive = %self.archive_path.display(), "Archive written");

        fs::remove_dir_all(&self.working_dir).map_err(|source| ArchiveError::Cleanup {
            path: self.archive_path.clone(),
            workdir: self.working_dir.clone(),
            source,
        })?;
        self.state = SessionState::Cleaned;
        debug!(workdir = %self.working_dir.display(), "Log directory removed");
        Ok(self.archive_path.clone())
    }

    /// Give up on archiving after a stop: drop the empty archive probe and keep the logs.
    /// Returns the log directory.
    pub fn abandon(self) -> Result<PathBuf, SessionError> {
        self.expect(SessionState::Stopped, "abandon the session")?;
        let untouched = fs::metadata(&self.archive_path)
            .map(|m| m.len() == 0)
            .unwrap_or(false);
        if untouched {
            remove_probe(&self.archive_path);
        }
        warn!(workdir = %self.working_dir.display(), "Collection abandoned; logs kept");
        Ok(self.working_dir.clone())
    }

    fn expect(&self, state: SessionState, op: &'static str) -> Result<(), SessionError> {
        if self.state != state {
            return Err(SessionError::InvalidTransition {
                op,
                state: self.state,
            });
        }
        Ok(())
    }
}

fn remove_probe(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        debug!(path = %path.display(), error = %e, "Archive file not removed");
    }
}
