mod cli;
mod command;
mod diagnostics;
mod error;
mod model;
mod orchestrator;
mod telemetry;
mod text_summary;

use clap::Parser;

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();
    telemetry::init_tracing(args.verbose);

    // Exit explicitly: a stdin read still parked on the blocking pool would otherwise hold
    // up runtime shutdown.
    match cli::run(args).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
