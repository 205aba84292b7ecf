//! Colored CLI display utilities for supervisor output.
//!
//! This module renders progress and outcomes of supervised presses to the
//! terminal. [`ConsoleProgress`] is the [`ProgressSink`] the binary installs.

use std::io::{self, Write};
use std::path::Path;

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::pipeline::Job;
use crate::supervisor::{Outcome, PressReport, ProgressSink};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Format a progress line.
#[must_use]
pub fn format_progress(percent: u8) -> String {
    format!(
        "{} {} {:>3}%",
        timestamp().dimmed(),
        "[PROGRESS]".cyan().bold(),
        percent
    )
}

/// Format the final line of a press.
#[must_use]
pub fn format_outcome(outcome: Outcome) -> String {
    let label = "[PRESS]";
    let label = match outcome {
        Outcome::Succeeded => label.green().bold().to_string(),
        Outcome::Failed => label.red().bold().to_string(),
        Outcome::Cancelled | Outcome::TimedOut => label.yellow().bold().to_string(),
    };
    format!("{} {label} {outcome}", timestamp().dimmed())
}

/// Progress sink printing to a terminal (or any writer).
#[derive(Debug)]
pub struct ConsoleProgress<W = io::Stdout> {
    out: W,
    last: Option<u8>,
}

impl ConsoleProgress {
    /// Print to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::stdout()
    }
}

impl<W: Write> ConsoleProgress<W> {
    pub fn new(out: W) -> Self {
        Self { out, last: None }
    }

    /// Last percentage printed.
    #[must_use]
    pub fn last(&self) -> Option<u8> {
        self.last
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn print(&mut self, line: &str) {
        let _ = writeln!(self.out, "{line}");
        let _ = self.out.flush();
    }
}

impl<W: Write + Send> ProgressSink for ConsoleProgress<W> {
    fn on_progress(&mut self, percent: u8) {
        if self.last == Some(percent) {
            return;
        }
        self.last = Some(percent);
        self.print(&format_progress(percent));
    }

    fn on_finish(&mut self, outcome: Outcome) {
        if outcome.is_success() {
            self.on_progress(100);
        }
        self.print(&format_outcome(outcome));
    }
}

/// Print the summary of a finished press.
pub fn print_report(report: &PressReport) {
    let status = report
        .exit_status
        .map_or_else(|| "unknown".to_string(), |status| status.to_string());
    println!(
        "{} {} progress={}% worker={}",
        timestamp().dimmed(),
        "[REPORT]".blue().bold(),
        report.progress,
        status.dimmed()
    );
    if report.outcome.is_success() {
        print_artifact(&report.artifact);
    }
    let _ = io::stdout().flush();
}

fn print_artifact(path: &Path) {
    println!(
        "{} {} {}",
        timestamp().dimmed(),
        "[ARTIFACT]".green().bold(),
        path.display()
    );
}

/// Print that a job was picked up.
pub fn print_job_start(job: &Job) {
    println!(
        "{} {} id={} file={}",
        timestamp().dimmed(),
        "[JOB]".magenta().bold(),
        job.id,
        job.filename.cyan()
    );
    let _ = io::stdout().flush();
}

/// Print the service response to an upload.
pub fn print_published(response: &str) {
    println!(
        "{} {}\n{}",
        timestamp().dimmed(),
        "[UPLOAD]".green().bold(),
        response.dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), message);
}
