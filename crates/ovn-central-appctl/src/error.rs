//! Appctl error types.

use thiserror::Error;

/// Errors from running the OVN command line tools.
#[derive(Debug, Error)]
pub enum Error {
    /// The program could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program exited unsuccessfully.
    #[error("{command} exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    /// Output could not be interpreted.
    #[error("unexpected output: {0}")]
    Parse(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Diagnostics printed when the tools cannot reach a server socket.
const UNREACHABLE_MARKERS: &[&str] = &[
    "cannot connect",
    "database connection failed",
    "connection refused",
    "no such file or directory",
];

impl Error {
    /// Whether the target process could not be reached at all, as opposed to
    /// refusing the request.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Error::Spawn { .. } => true,
            Error::Command { stderr, .. } => {
                let stderr = stderr.to_lowercase();
                UNREACHABLE_MARKERS.iter().any(|m| stderr.contains(m))
            }
            Error::Parse(_) | Error::Io(_) => false,
        }
    }

    /// Diagnostic text of a failed command, or the error itself.
    pub fn detail(&self) -> String {
        match self {
            Error::Command { stderr, .. } if !stderr.trim().is_empty() => {
                stderr.trim().to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Result alias for appctl operations.
pub type Result<T> = std::result::Result<T, Error>;
