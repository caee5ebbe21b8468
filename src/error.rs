//! Error taxonomy for collection sessions.
//!
//! Configuration errors happen before any diagnostic starts. Launch and terminate errors are
//! per diagnostic and get collected into reports. Archive errors leave the log directory in
//! place so nothing collected is lost.

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::model::SessionState;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("output archive '{}' already exists", .0.display())]
    ArchiveExists(PathBuf),

    #[error("cannot create output archive '{}': {source}", .path.display())]
    ArchiveNotCreatable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("log directory '{}' already exists", .0.display())]
    WorkdirExists(PathBuf),

    #[error("cannot create log directory '{}': {source}", .path.display())]
    WorkdirNotCreatable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("log root '{}' does not exist or is not a directory", .0.display())]
    MissingRoot(PathBuf),

    #[error("diagnostic '{0}' is configured more than once")]
    DuplicateName(String),

    #[error("'{0}' cannot be used as a diagnostic name")]
    InvalidName(String),

    #[error("command for '{name}' must contain exactly one {{interval}} placeholder")]
    Template { name: String },

    #[error("command for '{name}' cannot be split into arguments: {reason}")]
    Tokenize { name: String, reason: String },

    #[error("sampling interval must be at least one second")]
    Interval,

    #[error("no diagnostics configured")]
    NoDiagnostics,

    #[error("cannot read profile '{}': {source}", .path.display())]
    ProfileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid profile '{}': {source}", .path.display())]
    ProfileParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("diagnostic was already started")]
    AlreadyStarted,

    #[error("command line is empty")]
    EmptyCommand,

    #[error("cannot open log '{}': {source}", .path.display())]
    LogSink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Error, Debug)]
pub enum TerminateError {
    #[error("diagnostic is not running")]
    NotRunning,

    #[error("diagnostic was already stopped")]
    AlreadyStopped,

    #[error("process {pid} had already exited ({status})")]
    AlreadyExited { pid: u32, status: ExitStatus },

    #[error("cannot send termination request to process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error("cannot query status of process {pid}: {source}")]
    Query {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("cannot write archive '{}' (logs kept in '{}'): {source}", .path.display(), .workdir.display())]
    Write {
        path: PathBuf,
        workdir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("archive '{}' written but log directory '{}' could not be removed: {source}", .path.display(), .workdir.display())]
    Cleanup {
        path: PathBuf,
        workdir: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("cannot {op} while session is {state}")]
    InvalidTransition {
        op: &'static str,
        state: SessionState,
    },

    #[error("waiting for the stop signal failed: {0}")]
    StopSignal(#[source] io::Error),
}
