//! Text summary builder for CLI output.
//!
//! Formats the end-of-run report: what ran, what failed, and where the archive is.

use crate::model::SessionSummary;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from the final session record.
pub(crate) fn build_text_summary(summary: &SessionSummary) -> TextSummary {
    let mut lines = Vec::new();

    if let Some(reason) = summary.stop_reason {
        lines.push(format!("Collection ended: {}", reason.to_message()));
    }
    lines.push(format!(
        "Collected {} diagnostic(s) from {} to {}",
        summary.started.len(),
        summary.started_utc,
        summary.finished_utc
    ));

    if !summary.failed_to_start.is_empty() {
        lines.push(format!(
            "Failed to start ({}):",
            summary.failed_to_start.len()
        ));
        for f in &summary.failed_to_start {
            lines.push(format!("\t* {}: {}", f.name, f.message));
        }
    }
    if !summary.failed_to_stop.is_empty() {
        lines.push(format!("Failed to stop ({}):", summary.failed_to_stop.len()));
        for f in &summary.failed_to_stop {
            lines.push(format!("\t* {}: {}", f.name, f.message));
        }
    }
    if !summary.still_running.is_empty() {
        lines.push(format!(
            "Still running after the exit timeout: {}",
            summary.still_running.join(", ")
        ));
    }

    match summary.archive.as_deref() {
        Some(archive) => {
            lines.push("Please send the following file to your storage support representative:".into());
            lines.push(archive.display().to_string());
        }
        None => lines.push(format!(
            "No archive written; logs kept in {}",
            summary.working_dir.display()
        )),
    }

    TextSummary { lines }
}
