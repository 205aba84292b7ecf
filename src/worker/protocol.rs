//! The line protocol spoken with the pressy worker.
//!
//! Supervisor to worker, one ASCII line per command:
//!
//! ```text
//! press <filename>
//! state | {1} {2} {3}
//! quit
//! ```
//!
//! Worker to supervisor, one status line per query: `<result> <stage> <progress>`,
//! where `progress` is `N%` while running and a placeholder otherwise.

use std::fmt;
use std::str::FromStr;

/// Literal query line. The placeholder tokens are part of the wire format.
pub const QUERY_LINE: &str = "state | {1} {2} {3}";

/// A command written to the worker's stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start pressing the named file (relative to the worker's working dir).
    Press(String),
    /// Ask the worker for its current state.
    Query,
    /// Ask the worker to exit.
    Quit,
}

impl Command {
    /// Render the command as a newline-terminated protocol line.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }

    #[must_use]
    pub fn is_quit(&self) -> bool {
        matches!(self, Self::Quit)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Press(filename) => write!(f, "press {filename}"),
            Self::Query => f.write_str(QUERY_LINE),
            Self::Quit => f.write_str("quit"),
        }
    }
}

/// First field of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportResult {
    Ok,
    Fail,
}

/// Second field of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Run,
    Done,
    Fail,
}

/// Error for stdout lines that do not follow the protocol.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// The line did not split into exactly three fields.
    #[error("Expected 3 fields, found {found}: {line:?}")]
    FieldCount { line: String, found: usize },
    /// Three fields, but not a known result/stage combination.
    #[error("Unknown status line: {line:?}")]
    UnknownCombination { line: String },
}

/// One parsed status line.
///
/// Tokenization splits on any run of whitespace and requires exactly three
/// fields. `progress` is `None` when the field is not an integer percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusLine {
    pub result: ReportResult,
    pub stage: Stage,
    pub progress: Option<u8>,
}

impl FromStr for StatusLine {
    type Err = ProtocolViolation;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [result, stage, progress] = fields.as_slice() else {
            return Err(ProtocolViolation::FieldCount {
                line: line.to_string(),
                found: fields.len(),
            });
        };

        let unknown = || ProtocolViolation::UnknownCombination {
            line: line.to_string(),
        };

        let result = match *result {
            "ok" => ReportResult::Ok,
            "fail" => ReportResult::Fail,
            _ => return Err(unknown()),
        };
        let stage = match *stage {
            "run" => Stage::Run,
            "done" => Stage::Done,
            "fail" => Stage::Fail,
            // A failure report is honoured whatever its stage says.
            _ if result == ReportResult::Fail => Stage::Fail,
            _ => return Err(unknown()),
        };

        Ok(Self {
            result,
            stage,
            progress: parse_percent(progress),
        })
    }
}

/// Parse `N%` (or a bare `N`) into a percentage clamped to 100.
fn parse_percent(field: &str) -> Option<u8> {
    let value: u32 = field.strip_suffix('%').unwrap_or(field).parse().ok()?;
    Some(u8::try_from(value.min(100)).unwrap_or(100))
}

/// Normalized event derived from one status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Pressing in progress; `None` when the percentage was unreadable.
    Progress(Option<u8>),
    /// Pressing finished. Progress is implicitly 100.
    Completed,
    /// The worker reported a failure.
    Failed { stage: Stage },
}

/// Classify one stdout line.
///
/// # Errors
///
/// Returns `ProtocolViolation` for lines outside the protocol.
pub fn parse_line(line: &str) -> Result<WorkerEvent, ProtocolViolation> {
    let status: StatusLine = line.parse()?;
    match (status.result, status.stage) {
        (ReportResult::Fail, stage) => Ok(WorkerEvent::Failed { stage }),
        (ReportResult::Ok, Stage::Run) => Ok(WorkerEvent::Progress(status.progress)),
        (ReportResult::Ok, Stage::Done) => Ok(WorkerEvent::Completed),
        (ReportResult::Ok, Stage::Fail) => Err(ProtocolViolation::UnknownCombination {
            line: line.to_string(),
        }),
    }
}
