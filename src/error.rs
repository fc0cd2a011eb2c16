//! Error types for unarchive
//!
//! This module provides the error handling for the library, including:
//! - One variant per failure kind an extraction job can end in
//! - Stable machine-readable error codes
//! - A serializable summary used by reports and the CLI's JSON output

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for unarchive operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for unarchive
///
/// Every variant is terminal for the extraction job that produced it. Only
/// [`Error::Cancelled`] and [`Error::BudgetExceeded`] abort the whole run; see
/// [`Error::aborts_run`].
#[derive(Debug, Error)]
pub enum Error {
    /// Source path does not exist or cannot be opened
    #[error("cannot read {path}: {source}")]
    UnreadableFile {
        /// The file that could not be opened
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Decoder detected malformed internal structure
    #[error("corrupt archive {archive}: {reason}")]
    CorruptArchive {
        /// The archive being decoded
        archive: PathBuf,
        /// What the decoder complained about
        reason: String,
    },

    /// No decoder capability is available for this archive at runtime
    #[error("unsupported archive {archive}: {reason}")]
    UnsupportedFormat {
        /// The archive that could not be decoded
        archive: PathBuf,
        /// Why no decoder could handle it (e.g. "RAR support is not available")
        reason: String,
    },

    /// An entry would be written outside the designated output directory
    #[error("archive {archive} contains entry '{entry}' that escapes the output directory")]
    PathTraversal {
        /// The archive containing the offending entry
        archive: PathBuf,
        /// The entry name (or link target) as stored in the archive
        entry: String,
    },

    /// Recursion exceeded the configured depth cap
    #[error("nested archive {archive} is at depth {depth}, beyond the maximum of {max_depth}")]
    NestingTooDeep {
        /// The nested archive that was not extracted
        archive: PathBuf,
        /// Depth at which it was found (root archive is depth 0)
        depth: u32,
        /// Configured maximum depth
        max_depth: u32,
    },

    /// A nested archive has the same content as one of its ancestors
    #[error("nested archive {archive} is identical to its ancestor {ancestor}")]
    RecursiveArchive {
        /// The nested archive that was not extracted
        archive: PathBuf,
        /// The ancestor archive it duplicates
        ancestor: PathBuf,
    },

    /// Cumulative extracted bytes went over the configured budget
    #[error("extracting {archive} exceeded the budget of {limit} bytes")]
    BudgetExceeded {
        /// The archive being decoded when the budget ran out
        archive: PathBuf,
        /// Configured byte budget for the whole run
        limit: u64,
    },

    /// The run was cancelled through its cancellation token
    #[error("extraction cancelled")]
    Cancelled,

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "output_suffix")
        key: Option<String>,
    },

    /// External tool execution failed (unrar)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// I/O error while writing extracted output
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Error::UnreadableFile { .. } => "unreadable_file",
            Error::CorruptArchive { .. } => "corrupt_archive",
            Error::UnsupportedFormat { .. } => "unsupported_format",
            Error::PathTraversal { .. } => "path_traversal",
            Error::NestingTooDeep { .. } => "nesting_too_deep",
            Error::RecursiveArchive { .. } => "recursive_archive",
            Error::BudgetExceeded { .. } => "budget_exceeded",
            Error::Cancelled => "cancelled",
            Error::Config { .. } => "config_error",
            Error::ExternalTool(_) => "external_tool_error",
            Error::Io(_) => "io_error",
            Error::Other(_) => "internal_error",
        }
    }

    /// Whether this error ends the whole run rather than a single job
    ///
    /// Cancellation and the byte budget are run-wide: once either trips, no
    /// sibling archive can make progress either.
    pub fn aborts_run(&self) -> bool {
        matches!(self, Error::Cancelled | Error::BudgetExceeded { .. })
    }
}

/// Serializable error view used in reports and JSON output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// Machine-readable error code (e.g., "path_traversal")
    pub code: String,

    /// Human-readable error message
    pub message: String,
}

impl From<&Error> for ErrorSummary {
    fn from(error: &Error) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}
