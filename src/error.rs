//! Error types for routing discordant mappings.
//!
//! Configuration, I/O, and skip-limit errors are fatal and abort the run.
//! Record format errors describe a single malformed input line; the engine counts and skips them.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type for routing operations.
pub type Result<T> = std::result::Result<T, RouterError>;

/// Error type for routing operations.
#[derive(Error, Debug)]
pub enum RouterError {
    /// The library profile table could not be opened or parsed.
    #[error("Invalid configuration file '{}': {reason}", path.display())]
    Config {
        /// Path to the configuration file.
        path: PathBuf,
        /// Explanation of the problem.
        reason: String,
    },

    /// A malformed alignment-pair line.
    #[error("Invalid record on line {line} of '{}': {reason}", path.display())]
    RecordFormat {
        /// Path to the input file.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// Explanation of the problem.
        reason: String,
    },

    /// A file could not be opened, read, or written.
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        /// The file being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Too many malformed records in an input file.
    #[error("Skipped {skipped} of {total} records in '{}' (limit {limit})", path.display())]
    SkipLimit {
        /// Path to the input file.
        path: PathBuf,
        /// Number of malformed records.
        skipped: usize,
        /// Number of records read.
        total: usize,
        /// Maximum allowed fraction of malformed records.
        limit: f64,
    },

    /// An operation was attempted in the wrong lifecycle state.
    #[error("Invalid router state: {0}")]
    InvalidState(String),
}

impl RouterError {
    /// Creates an I/O error for the given path.
    pub fn io<P: AsRef<Path>>(path: P, source: io::Error) -> Self {
        RouterError::Io { path: path.as_ref().to_path_buf(), source }
    }

    /// Creates a configuration error for the given path.
    pub fn config<P: AsRef<Path>>(path: P, reason: impl Into<String>) -> Self {
        RouterError::Config { path: path.as_ref().to_path_buf(), reason: reason.into() }
    }

    /// Returns `true` if the error should abort the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RouterError::RecordFormat { .. })
    }
}

//-----------------------------------------------------------------------------


//-----------------------------------------------------------------------------
