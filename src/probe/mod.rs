//! Probe module for network path diagnostics.
//!
//! Runs the platform trace utility and turns its report into loss findings.

mod parse;
mod runner;

pub use parse::*;
pub use runner::*;

use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("failed to start {program}: {reason}")]
    Spawn { program: String, reason: String },
    #[error("network diagnostic timed out after {0:?}")]
    Timeout(Duration),
    #[error("command failed: {0}")]
    Command(String),
    #[error("failed to read diagnostic output: {0}")]
    Io(String),
}

/// Outcome of one trace run.
///
/// When `error` is set the output is not usable and `raw_output` is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub raw_output: String,
    /// `None` when the process never exited on its own (spawn failure, timeout).
    pub exit_code: Option<i32>,
    pub error: Option<ProbeError>,
}

impl ProbeResult {
    pub fn completed(raw_output: String, exit_code: i32) -> Self {
        Self {
            raw_output,
            exit_code: Some(exit_code),
            error: None,
        }
    }

    pub fn failed(error: ProbeError, exit_code: Option<i32>) -> Self {
        Self {
            raw_output: String::new(),
            exit_code,
            error: Some(error),
        }
    }
}

/// The trace utility invocation, minus the destination.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl TraceCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Pick the trace utility for the host OS.
    ///
    /// Windows ships `pathping`; everything else is expected to have `mtr`.
    pub fn for_host(cycles: u32) -> Self {
        if cfg!(windows) {
            Self::pathping(cycles)
        } else {
            Self::mtr(cycles)
        }
    }

    pub fn pathping(cycles: u32) -> Self {
        let cycles = cycles.to_string();
        Self::new("pathping", &["-q", &cycles, "-p", "100"])
    }

    pub fn mtr(cycles: u32) -> Self {
        let cycles = cycles.to_string();
        Self::new("mtr", &["-r", "-n", "-c", &cycles])
    }

    /// Full argument list with the destination appended.
    pub fn args_for(&self, target: &str) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(target.to_string());
        args
    }
}
