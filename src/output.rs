use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{
    InfoResult, ListResult, ProgressEvent, ProgressSink, ProvisionResult, ValidationReport,
};
use crate::error::PedigreeError;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_validation(result: &ValidationReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_provision(result: &ProvisionResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_info(result: &InfoResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    /// Structured failures go to stdout so scripted callers can read them.
    /// Returns `false` for errors that have no JSON form.
    pub fn print_failure(error: &PedigreeError) -> io::Result<bool> {
        match error {
            PedigreeError::Validation(failure) => Self::print_json(failure).map(|_| true),
            PedigreeError::Provisioning(outcome) => Self::print_json(outcome).map(|_| true),
            _ => Ok(false),
        }
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress to the tracing subscriber.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}
