//! ETL error types
//!
//! Fatal conditions the pipeline can name precisely. Everything else
//! (driver failures, file I/O) travels as `anyhow::Error` with context.

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    /// No usable order/ship/required date in either source and no override
    #[error("No usable dates found in order sources to anchor the date dimension (pass --date-start/--date-end to override)")]
    NoDateAnchor,

    /// Override or observed bounds are inverted
    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    /// One or more hard consistency checks failed
    #[error("Consistency checks failed: {}", failures.join("; "))]
    InvariantViolation { failures: Vec<String> },

    /// Required configuration value missing
    #[error("Configuration error: {0} env var missing")]
    MissingConfig(&'static str),
}

pub type EtlResult<T> = Result<T, EtlError>;
