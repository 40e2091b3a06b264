//! Configuration for building and launching the test host
//!
//! Provides HostConfig with a validating builder. The test assembly path
//! is resolved from the project file when not given explicitly.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::host::build::BuildTool;
use crate::host::error::HostConfigError;
use crate::host::project::ProjectInfo;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default build tool executable
pub const DEFAULT_DOTNET_PATH: &str = "dotnet";

/// Default time the launched host has to connect back (30 seconds)
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Maximum allowed connection timeout (5 minutes)
pub const MAX_CONNECTION_TIMEOUT_SECS: u64 = 300;

// ============================================================================
// Core Configuration Types
// ============================================================================

/// Complete host configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Build tool executable
    pub dotnet_path: String,

    /// Arguments placed before every build tool subcommand
    pub base_args: Vec<String>,

    /// Directory holding the project file; build and host run here
    pub project_directory: PathBuf,

    /// Expected build artifact, which is also the test assembly
    pub target_path: PathBuf,

    /// How long the launched host has to connect back
    pub connection_timeout: Duration,
}

impl HostConfig {
    pub fn build_tool(&self) -> BuildTool {
        BuildTool::new(self.dotnet_path.clone(), self.base_args.clone())
    }
}

// ============================================================================
// Configuration Builder
// ============================================================================

/// Builder for HostConfig with validation and defaults
#[derive(Debug, Default)]
pub struct HostConfigBuilder {
    dotnet_path: Option<String>,
    base_args: Vec<String>,
    project_directory: Option<PathBuf>,
    target_path: Option<PathBuf>,
    connection_timeout: Option<Duration>,
}

impl HostConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the build tool executable
    pub fn dotnet_path(mut self, path: impl Into<String>) -> Self {
        self.dotnet_path = Some(path.into());
        self
    }

    /// Set arguments placed before every build tool subcommand
    pub fn base_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn project_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_directory = Some(path.into());
        self
    }

    /// Set the test assembly path; relative paths are taken from the
    /// project directory
    pub fn target_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.target_path = Some(path.into());
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Build the configuration with validation
    pub fn build(self) -> Result<HostConfig, HostConfigError> {
        let project_directory = self
            .project_directory
            .ok_or_else(|| HostConfigError::missing_field("project_directory"))?;
        Self::validate_project_directory(&project_directory)?;

        let dotnet_path = self
            .dotnet_path
            .unwrap_or_else(|| DEFAULT_DOTNET_PATH.to_string());
        Self::validate_dotnet_path(&dotnet_path)?;

        let connection_timeout = self
            .connection_timeout
            .unwrap_or(Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS));
        Self::validate_timeout(connection_timeout)?;

        let target_path = match self.target_path {
            Some(path) if path.is_relative() => project_directory.join(path),
            Some(path) => path,
            None => {
                let project = ProjectInfo::discover(&project_directory)?;
                let path = project.target_path();
                debug!(
                    "Resolved test assembly {} from {}",
                    path.display(),
                    project.project_file.display()
                );
                path
            }
        };

        Ok(HostConfig {
            dotnet_path,
            base_args: self.base_args,
            project_directory,
            target_path,
            connection_timeout,
        })
    }

    fn validate_project_directory(path: &Path) -> Result<(), HostConfigError> {
        if !path.is_dir() {
            return Err(HostConfigError::invalid_path(
                path.display().to_string(),
                "Project directory does not exist or is not a directory",
            ));
        }
        Ok(())
    }

    fn validate_dotnet_path(dotnet_path: &str) -> Result<(), HostConfigError> {
        if dotnet_path.is_empty() {
            return Err(HostConfigError::invalid_path(
                dotnet_path,
                "Build tool path cannot be empty",
            ));
        }
        if dotnet_path.contains('\0') {
            return Err(HostConfigError::invalid_path(
                dotnet_path,
                "Build tool path contains null character",
            ));
        }
        // Not checked for existence: it may only resolve through PATH
        Ok(())
    }

    fn validate_timeout(timeout: Duration) -> Result<(), HostConfigError> {
        let max = Duration::from_secs(MAX_CONNECTION_TIMEOUT_SECS);
        if timeout.is_zero() || timeout > max {
            return Err(HostConfigError::InvalidTimeout {
                name: "connection".to_string(),
                value: timeout,
                max,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_with_explicit_target() {
        let temp_dir = TempDir::new().unwrap();
        let config = HostConfigBuilder::new()
            .project_directory(temp_dir.path())
            .target_path("bin/Debug/net8.0/Tests.dll")
            .build()
            .unwrap();

        assert_eq!(config.dotnet_path, "dotnet");
        assert!(config.base_args.is_empty());
        assert_eq!(config.connection_timeout, Duration::from_secs(30));
        assert_eq!(
            config.target_path,
            temp_dir.path().join("bin/Debug/net8.0/Tests.dll")
        );
        assert_eq!(config.build_tool(), BuildTool::new("dotnet", Vec::new()));
    }

    #[test]
    fn test_target_resolved_from_project_file() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("Calc.Tests.csproj"),
            "<Project><PropertyGroup><TargetFramework>net8.0</TargetFramework></PropertyGroup></Project>",
        )
        .unwrap();

        let config = HostConfigBuilder::new()
            .project_directory(temp_dir.path())
            .build()
            .unwrap();
        assert_eq!(
            config.target_path,
            temp_dir.path().join("bin/Debug/net8.0/Calc.Tests.dll")
        );
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            HostConfigBuilder::new().build(),
            Err(HostConfigError::MissingField { .. })
        ));

        assert!(matches!(
            HostConfigBuilder::new()
                .project_directory("/nonexistent/project")
                .target_path("/tmp/Tests.dll")
                .build(),
            Err(HostConfigError::InvalidPath { .. })
        ));

        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            HostConfigBuilder::new()
                .project_directory(temp_dir.path())
                .target_path("Tests.dll")
                .dotnet_path("")
                .build(),
            Err(HostConfigError::InvalidPath { .. })
        ));
        assert!(matches!(
            HostConfigBuilder::new()
                .project_directory(temp_dir.path())
                .target_path("Tests.dll")
                .connection_timeout(Duration::from_secs(301))
                .build(),
            Err(HostConfigError::InvalidTimeout { .. })
        ));
        assert!(matches!(
            HostConfigBuilder::new()
                .project_directory(temp_dir.path())
                .build(),
            Err(HostConfigError::Project(_))
        ));
    }
}
