use crate::diagnostics::{self, Profile, DEFAULT_INTERVAL};
use crate::model::{
    now_utc_rfc3339, CollectConfig, ExitReport, NamedMessage, SessionSummary,
};
use crate::orchestrator::{
    CollectionSession, Deadline, FirstOf, Immediate, OsSignals, Sentinel, STOP_WORD,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{BufReader, Stdin};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const DEFAULT_LOG_ROOT: &str = "/var/crash";
const DEFAULT_EXIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "nfs-stats-gather",
    version,
    about = "Collect cluster statistics while a workload runs and bundle them into one tarball"
)]
pub struct Cli {
    /// Output tarball to create; must not exist
    #[arg(short = 'o', long = "output", required_unless_present = "list")]
    pub output: Option<PathBuf>,

    /// Log directory to create; must not exist. Defaults to a new directory under --log-root
    #[arg(short = 'd', long = "log-directory")]
    pub log_directory: Option<PathBuf>,

    /// Existing directory under which the default log directory is created
    #[arg(long, default_value = DEFAULT_LOG_ROOT)]
    pub log_root: PathBuf,

    /// Seconds between statistics samples [default: 30]
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    pub interval: Option<u32>,

    /// JSON profile with the diagnostics to run (replaces the built-in set)
    #[arg(long)]
    pub profile: Option<PathBuf>,

    /// Stop collecting automatically after this long (e.g. 30m)
    #[arg(long)]
    pub duration: Option<humantime::Duration>,

    /// Do not read the stop word from stdin; stop on a signal or --duration only
    #[arg(long)]
    pub no_prompt: bool,

    /// How long to wait for diagnostics to exit before archiving; 0s skips the wait [default: 5s]
    #[arg(long)]
    pub exit_timeout: Option<humantime::Duration>,

    /// Abort if any diagnostic fails to start
    #[arg(long)]
    pub strict: bool,

    /// Print the final summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Print the diagnostics that would run and exit
    #[arg(long)]
    pub list: bool,

    /// Enable debug logging on stderr
    #[arg(short, long)]
    pub verbose: bool,
}

pub async fn run(args: Cli) -> Result<()> {
    let profile = diagnostics::load_profile(args.profile.as_deref())
        .context("failed to load diagnostics profile")?;

    if args.list {
        return list_diagnostics(&args, &profile);
    }

    let cfg = build_config(&args, profile)?;
    let (out_tx, out_handle) = spawn_output_writer();
    let result = collect(&args, &cfg, &out_tx).await;
    drop(out_tx);
    let _ = out_handle.await;
    result
}

/// Build a `CollectConfig` from CLI arguments; flags win over the profile.
pub fn build_config(args: &Cli, profile: Profile) -> Result<CollectConfig> {
    let archive_path = args
        .output
        .clone()
        .context("an output tarball is required (-o/--output)")?;
    let interval = args
        .interval
        .or(profile.interval)
        .unwrap_or(DEFAULT_INTERVAL);
    let exit_timeout = args
        .exit_timeout
        .map(Duration::from)
        .or(profile.exit_timeout)
        .unwrap_or(DEFAULT_EXIT_TIMEOUT);

    Ok(CollectConfig {
        archive_path,
        working_dir: args.log_directory.clone(),
        log_root: args.log_root.clone(),
        interval,
        exit_timeout,
        diagnostics: profile.diagnostics,
    })
}

fn list_diagnostics(args: &Cli, profile: &Profile) -> Result<()> {
    let interval = args
        .interval
        .or(profile.interval)
        .unwrap_or(DEFAULT_INTERVAL);
    diagnostics::validate(&profile.diagnostics, interval)?;
    for spec in &profile.diagnostics {
        let argv = spec.render(interval)?;
        println!("{}: {}", spec.name, shell_words::join(&argv));
    }
    Ok(())
}

type OperatorSignal =
    FirstOf<Option<Sentinel<BufReader<Stdin>>>, FirstOf<OsSignals, Option<Deadline>>>;

/// Whether to wait for the stop word on stdin. Redirected or detached input (for example
/// under `nohup`) would end collection at once, so only a terminal is read.
fn reads_stop_word(args: &Cli, stdin_is_terminal: bool) -> bool {
    !args.no_prompt && stdin_is_terminal
}

/// Stop word on stdin (when read), the OS termination signals, or the collection duration.
fn operator_signal(
    args: &Cli,
    os_signals: OsSignals,
    out: mpsc::UnboundedSender<OutputLine>,
) -> OperatorSignal {
    let sentinel = reads_stop_word(args, std::io::stdin().is_terminal()).then(|| {
        Sentinel::new(BufReader::new(tokio::io::stdin())).with_prompt(move || {
            let _ = out.send(OutputLine::Stdout(format!(
                "When you are done with the workload type '{STOP_WORD}':"
            )));
        })
    });
    if sentinel.is_none() && !args.no_prompt {
        debug!("stdin is not a terminal; not reading the stop word");
    }
    let deadline = args.duration.map(|d| Deadline(d.into()));
    FirstOf(sentinel, FirstOf(os_signals, deadline))
}

async fn collect(
    args: &Cli,
    cfg: &CollectConfig,
    out: &mpsc::UnboundedSender<OutputLine>,
) -> Result<()> {
    let say = |msg: String| {
        let _ = out.send(OutputLine::Stdout(msg));
    };
    let started_utc = now_utc_rfc3339();
    // Registered before anything is spawned, so an early signal still ends in a clean stop.
    let os_signals = OsSignals::install().context("cannot install signal handlers")?;

    let mut session = CollectionSession::create(cfg).context("cannot set up collection")?;
    say(format!(
        "Created directory for logs: {}",
        session.working_dir().display()
    ));
    for handle in session.handles() {
        debug!(
            name = handle.name(),
            command = %shell_words::join(handle.argv()),
            log = ?handle.log_path(),
            "Diagnostic configured"
        );
    }

    say("Starting diagnostics...".into());
    let start = session.start_all()?;
    for s in &start.started {
        say(format!("\t* {}", s.name));
    }
    for f in &start.failed {
        let _ = out.send(OutputLine::Stderr(format!(
            "\t! {} failed to start: {}",
            f.name, f.error
        )));
    }

    // Abort when nothing runs, or on any launch failure under --strict.
    let abort = start.nothing_started() || (args.strict && !start.is_complete());
    let stop_reason = if abort {
        Some(session.await_stop_signal(&mut Immediate).await?)
    } else {
        if let Some(d) = args.duration {
            say(format!("Collecting for {d}"));
        }
        say("Now gathering statistics from the cluster...".into());
        let mut signal = operator_signal(args, os_signals, out.clone());
        match session.await_stop_signal(&mut signal).await {
            Ok(reason) => Some(reason),
            Err(e) => {
                warn!(error = %e, "Stop signal failed; stopping collection now");
                None
            }
        }
    };

    say("Terminating diagnostics...".into());
    let stop = session.stop_all()?;
    let exits = if cfg.exit_timeout.is_zero() {
        ExitReport::default()
    } else {
        session.wait_for_exit(cfg.exit_timeout).await?
    };
    debug!(
        stopped = stop.stopped.len(),
        exited = exits.exited.len(),
        "Diagnostics stopped"
    );

    let mut summary = SessionSummary {
        started_utc,
        finished_utc: String::new(),
        working_dir: session.working_dir().to_path_buf(),
        archive: None,
        stop_reason,
        started: start.started.clone(),
        failed_to_start: start.failed.iter().map(NamedMessage::from).collect(),
        failed_to_stop: stop.failed.iter().map(NamedMessage::from).collect(),
        still_running: exits.still_running,
    };

    if abort {
        let workdir = session.abandon()?;
        summary.finished_utc = now_utc_rfc3339();
        emit_summary(args, &summary, out)?;
        anyhow::bail!(
            "{} of {} diagnostics failed to start; logs kept in {}",
            start.failed.len(),
            start.failed.len() + start.started.len(),
            workdir.display()
        );
    }

    say(format!(
        "Creating archive: {}",
        session.archive_path().display()
    ));
    let archive = session.archive().context("cannot finish collection")?;
    debug!(state = %session.state(), "Collection finished");
    say("Deleted log directory".into());

    summary.archive = Some(archive);
    summary.finished_utc = now_utc_rfc3339();
    emit_summary(args, &summary, out)
}

fn emit_summary(
    args: &Cli,
    summary: &SessionSummary,
    out: &mpsc::UnboundedSender<OutputLine>,
) -> Result<()> {
    if args.json {
        let json = serde_json::to_string_pretty(summary)?;
        let _ = out.send(OutputLine::Stdout(json));
        return Ok(());
    }
    let text = crate::text_summary::build_text_summary(summary);
    let route = |line: String| {
        if summary.has_partial_failures() {
            OutputLine::Stderr(line)
        } else {
            OutputLine::Stdout(line)
        }
    };
    for line in text.lines {
        let _ = out.send(route(line));
    }
    Ok(())
}
