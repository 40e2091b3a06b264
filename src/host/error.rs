//! Error types for preparing and launching the test host

use std::path::PathBuf;
use std::time::Duration;

use crate::io::process::ProcessError;
use crate::session::SessionError;

// ============================================================================
// Host Errors
// ============================================================================

/// Errors raised while building, launching or connecting to the test host
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The project did not build or produced no test assembly
    #[error("Build failed; see build output for details")]
    BuildFailed,

    /// Host process management errors
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// Listener or socket errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The host never connected back
    #[error("Test host did not connect within {timeout:?}")]
    ConnectionTimeout { timeout: Duration },

    /// The handshake with the freshly launched host failed
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration validation and building errors
#[derive(Debug, thiserror::Error)]
pub enum HostConfigError {
    /// Missing required configuration field
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    /// Invalid path format or value
    #[error("Invalid path: {path} - {reason}")]
    InvalidPath { path: String, reason: String },

    /// Timeout outside the accepted range
    #[error("Invalid {name} timeout: {value:?} (max: {max:?})")]
    InvalidTimeout {
        name: String,
        value: Duration,
        max: Duration,
    },

    /// The project file could not be located or read
    #[error("Project error: {0}")]
    Project(#[from] ProjectError),
}

impl HostConfigError {
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Project Errors
// ============================================================================

/// Errors locating or reading the project file
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    /// No project file in the project directory
    #[error("No project file found in {directory}")]
    NoProjectFile { directory: PathBuf },

    /// More than one project file; the caller must pick a target path
    #[error("Multiple project files found in {directory}: {files:?}")]
    MultipleProjectFiles {
        directory: PathBuf,
        files: Vec<PathBuf>,
    },

    /// Reading the project file failed
    #[error("Failed to read project file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
