//! Error types for Ringmaster
//!
//! Every failure aborts the current action. Nothing is rolled back; the
//! operator-facing contract is to re-run the action, so the variants carry
//! enough context (exit codes, captured output) to diagnose a failed run.

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum HaError {
    /// No viable ring device, ring0 network too large, no ring1 candidate, or
    /// invalid settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An invoked operation returned a non-busy nonzero status.
    #[error("Error ({code}) running '{command}': '{stdout}' '{stderr}'")]
    ExternalCommand {
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    /// Leader election or busy-retry budget exhausted.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Capture setup, filtering, or packet decoding failure.
    #[error("network capture error: {0}")]
    NetworkCapture(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HaError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        HaError::Configuration(msg.into())
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        HaError::NetworkCapture(msg.into())
    }

    /// Exit code of a failed external command, if this error carries one
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            HaError::ExternalCommand { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result alias used across the Ringmaster crates
pub type Result<T> = std::result::Result<T, HaError>;
