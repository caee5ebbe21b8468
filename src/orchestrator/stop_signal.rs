//! Ways for the operator to end the collection phase.
//!
//! The session only needs something it can wait on. The CLI combines a stdin stop word, OS
//! signals and an optional deadline with [`FirstOf`]; tests use [`Immediate`].

use crate::model::StopReason;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

pub const STOP_WORD: &str = "stop";

pub trait StopSignal {
    /// Resolve once collection should end.
    async fn wait(&mut self) -> io::Result<StopReason>;
}

/// Fires at once.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

impl StopSignal for Immediate {
    async fn wait(&mut self) -> io::Result<StopReason> {
        Ok(StopReason::Immediate)
    }
}

/// Fires after a fixed collection duration.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(pub Duration);

impl StopSignal for Deadline {
    async fn wait(&mut self) -> io::Result<StopReason> {
        tokio::time::sleep(self.0).await;
        Ok(StopReason::Deadline)
    }
}

/// Termination requests from the OS: SIGINT, SIGTERM, SIGHUP or SIGQUIT on unix, Ctrl-C or
/// console close on windows.
///
/// The handlers are registered by [`OsSignals::install`], not on first wait. From then on those
/// signals no longer kill the collector, and one that arrives before [`StopSignal::wait`] is
/// polled makes the wait return at once.
pub struct OsSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
    #[cfg(unix)]
    quit: tokio::signal::unix::Signal,
    #[cfg(windows)]
    ctrl_c: tokio::signal::windows::CtrlC,
    #[cfg(windows)]
    ctrl_close: tokio::signal::windows::CtrlClose,
}

impl OsSignals {
    /// Must be called from within a tokio runtime.
    pub fn install() -> io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
                hangup: signal(SignalKind::hangup())?,
                quit: signal(SignalKind::quit())?,
            })
        }
        #[cfg(windows)]
        {
            use tokio::signal::windows;
            Ok(Self {
                ctrl_c: windows::ctrl_c()?,
                ctrl_close: windows::ctrl_close()?,
            })
        }
    }
}

impl StopSignal for OsSignals {
    async fn wait(&mut self) -> io::Result<StopReason> {
        #[cfg(unix)]
        let name = tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.hangup.recv() => "SIGHUP",
            _ = self.quit.recv() => "SIGQUIT",
        };
        #[cfg(windows)]
        let name = tokio::select! {
            _ = self.ctrl_c.recv() => "CTRL_C",
            _ = self.ctrl_close.recv() => "CTRL_CLOSE",
        };

        debug!(signal = name, "Stop signal received from the OS");
        Ok(StopReason::Signal)
    }
}

/// Reads lines until one matches the stop word (trimmed, case-insensitive).
/// End of input also stops, since no stop word can arrive any more.
pub struct Sentinel<R> {
    reader: R,
    word: String,
    prompt: Option<Box<dyn FnMut() + Send>>,
}

impl<R: AsyncBufRead + Unpin> Sentinel<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            word: STOP_WORD.to_string(),
            prompt: None,
        }
    }

    /// Called before every read, so the operator is re-prompted after a wrong word.
    pub fn with_prompt(mut self, prompt: impl FnMut() + Send + 'static) -> Self {
        self.prompt = Some(Box::new(prompt));
        self
    }
}

impl<R: AsyncBufRead + Unpin> StopSignal for Sentinel<R> {
    async fn wait(&mut self) -> io::Result<StopReason> {
        let mut line = String::new();
        loop {
            if let Some(prompt) = self.prompt.as_mut() {
                prompt();
            }
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(StopReason::InputClosed);
            }
            let entered = line.trim();
            if entered.eq_ignore_ascii_case(&self.word) {
                return Ok(StopReason::Operator);
            }
            debug!(input = entered, "Ignoring operator input");
        }
    }
}

/// A signal that may be switched off; a disabled one never fires.
impl<S: StopSignal> StopSignal for Option<S> {
    async fn wait(&mut self) -> io::Result<StopReason> {
        match self {
            Some(inner) => inner.wait().await,
            None => futures::future::pending().await,
        }
    }
}

/// Whichever of two signals fires first.
pub struct FirstOf<A, B>(pub A, pub B);

impl<A: StopSignal, B: StopSignal> StopSignal for FirstOf<A, B> {
    async fn wait(&mut self) -> io::Result<StopReason> {
        let FirstOf(a, b) = self;
        tokio::select! {
            res = a.wait() => res,
            res = b.wait() => res,
        }
    }
}
