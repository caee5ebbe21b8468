//! Collection lifecycle orchestration.
//!
//! This module owns the session state machine (create, start, wait, stop, archive, clean up)
//! and the pieces it relies on: working directory setup, the tarball writer and the stop
//! signals. The CLI layer drives a session and renders its reports.

mod archive;
mod session;
mod stop_signal;
mod workdir;

pub(crate) use session::CollectionSession;
pub(crate) use stop_signal::{Deadline, FirstOf, Immediate, OsSignals, Sentinel, STOP_WORD};
