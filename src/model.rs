use crate::diagnostics::DiagnosticSpec;
use crate::error::{LaunchError, TerminateError};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Everything a collection session needs, already merged from flags, profile and defaults.
#[derive(Debug, Clone)]
pub struct CollectConfig {
    pub archive_path: PathBuf,
    /// Explicit log directory; `None` means a fresh directory under `log_root`.
    pub working_dir: Option<PathBuf>,
    pub log_root: PathBuf,
    pub interval: u32,
    pub exit_timeout: Duration,
    pub diagnostics: Vec<DiagnosticSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Started,
    AwaitingSignal,
    Stopped,
    Archived,
    Cleaned,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Created => "created",
            SessionState::Started => "started",
            SessionState::AwaitingSignal => "awaiting the stop signal",
            SessionState::Stopped => "stopped",
            SessionState::Archived => "archived",
            SessionState::Cleaned => "cleaned",
        };
        f.write_str(s)
    }
}

/// Why the wait phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The operator typed the stop word.
    Operator,
    /// The operator input stream ended.
    InputClosed,
    /// A termination signal (interrupt, terminate, hangup or quit) reached the collector.
    Signal,
    /// The configured collection duration elapsed.
    Deadline,
    /// Stop requested without waiting (aborted runs).
    Immediate,
}

impl StopReason {
    pub fn to_message(self) -> &'static str {
        match self {
            StopReason::Operator => "stop requested by operator",
            StopReason::InputClosed => "operator input closed",
            StopReason::Signal => "interrupted by signal",
            StopReason::Deadline => "collection duration elapsed",
            StopReason::Immediate => "stopped immediately",
        }
    }
}

/// A per-diagnostic failure, kept next to the diagnostic's name.
#[derive(Debug)]
pub struct Failure<E> {
    pub name: String,
    pub error: E,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Started {
    pub name: String,
    pub pid: u32,
}

/// Outcome of starting every diagnostic, in configuration order.
#[derive(Debug, Default)]
pub struct StartReport {
    pub started: Vec<Started>,
    pub failed: Vec<Failure<LaunchError>>,
}

impl StartReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn nothing_started(&self) -> bool {
        self.started.is_empty()
    }
}

/// Outcome of stopping every diagnostic, in configuration order.
#[derive(Debug, Default)]
pub struct StopReport {
    pub stopped: Vec<String>,
    pub failed: Vec<Failure<TerminateError>>,
    /// Diagnostics that never started, so there was nothing to stop.
    pub skipped: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ExitReport {
    pub exited: Vec<String>,
    /// Still running when the wait deadline passed.
    pub still_running: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedMessage {
    pub name: String,
    pub message: String,
}

impl<E: fmt::Display> From<&Failure<E>> for NamedMessage {
    fn from(f: &Failure<E>) -> Self {
        Self {
            name: f.name.clone(),
            message: f.error.to_string(),
        }
    }
}

/// Final record of one collection run, rendered as text or JSON.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub started_utc: String,
    pub finished_utc: String,
    pub working_dir: PathBuf,
    pub archive: Option<PathBuf>,
    pub stop_reason: Option<StopReason>,
    pub started: Vec<Started>,
    pub failed_to_start: Vec<NamedMessage>,
    pub failed_to_stop: Vec<NamedMessage>,
    pub still_running: Vec<String>,
}

impl SessionSummary {
    pub fn has_partial_failures(&self) -> bool {
        !self.failed_to_start.is_empty()
            || !self.failed_to_stop.is_empty()
            || !self.still_running.is_empty()
    }
}

/// RFC 3339 timestamp of the current UTC time.
pub fn now_utc_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}
