//! Structured error handling and exit codes.

use serde::Serialize;

use crate::cache::CacheError;
use crate::scan::ScanError;
use crate::validate::ValidationError;

/// Exit codes for the dlcache binaries.
///
/// - 0: Success
/// - 1: General error (unexpected failure, bad configuration)
/// - 2: Not found (scan root, source file or cache entry missing)
/// - 3: Partial success (completed, but some files could not be removed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: the command completed normally.
    Success = 0,
    /// General error: an unexpected error occurred.
    GeneralError = 1,
    /// Not found: the requested path or entry does not exist.
    NotFound = 2,
    /// Partial success: completed but encountered non-fatal failures.
    PartialSuccess = 3,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "DC000",
            Self::GeneralError => "DC001",
            Self::NotFound => "DC002",
            Self::PartialSuccess => "DC003",
        }
    }

    /// Exit code for an error that escaped `run_app`.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        if let Some(ScanError::NotFound(_) | ScanError::NotADirectory(_)) =
            err.downcast_ref::<ScanError>()
        {
            return Self::NotFound;
        }
        if let Some(CacheError::Rejected {
            source: ValidationError::NotFound(_),
            ..
        }) = err.downcast_ref::<CacheError>()
        {
            return Self::NotFound;
        }
        Self::GeneralError
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "DC001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message, including its causes
    pub message: String,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{:#}", err),
        }
    }
}

/// Print `err` to stderr, as JSON when `json` is set.
pub fn report(err: &anyhow::Error, exit_code: ExitCode, json: bool) {
    if json {
        let structured = StructuredError::new(err, exit_code);
        if let Ok(text) = serde_json::to_string_pretty(&structured) {
            eprintln!("{}", text);
            return;
        }
    }
    eprintln!("[{}] Error: {:#}", exit_code.code_prefix(), err);
}
