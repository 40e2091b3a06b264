use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

use crate::host::build::BuildTool;

/// First build tool release whose `build` restores implicitly
const IMPLICIT_RESTORE_VERSION: (u32, u32, u32) = (2, 0, 0);

#[derive(Error, Debug)]
pub enum BuildToolVersionError {
    #[error("Failed to execute build tool: {0}")]
    ExecutionFailed(String),
    #[error("Invalid version format: {0}")]
    InvalidFormat(String),
}

/// Version reported by `<tool> --version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildToolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub prerelease: Option<String>,
}

impl BuildToolVersion {
    /// Detect the version by running `--version`
    pub async fn detect(tool: &BuildTool) -> Result<Self, BuildToolVersionError> {
        let output = tool
            .command(&["--version"])
            .output()
            .await
            .map_err(|e| BuildToolVersionError::ExecutionFailed(e.to_string()))?;

        if !output.status.success() {
            return Err(BuildToolVersionError::ExecutionFailed(format!(
                "--version exited with {}",
                output.status
            )));
        }

        Self::parse(&String::from_utf8_lossy(&output.stdout))
    }

    /// Parse `major.minor.patch[-prerelease]` from the first non-empty line
    pub fn parse(output: &str) -> Result<Self, BuildToolVersionError> {
        static VERSION_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = VERSION_REGEX.get_or_init(|| {
            Regex::new(r"^(\d+)\.(\d+)\.(\d+)(?:-(\S+))?").expect("version regex is valid")
        });

        let line = output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default();

        let captures = regex
            .captures(line)
            .ok_or_else(|| BuildToolVersionError::InvalidFormat(line.to_string()))?;

        let number = |index: usize| {
            captures[index]
                .parse::<u32>()
                .map_err(|_| BuildToolVersionError::InvalidFormat(line.to_string()))
        };

        Ok(Self {
            major: number(1)?,
            minor: number(2)?,
            patch: number(3)?,
            prerelease: captures.get(4).map(|m| m.as_str().to_string()),
        })
    }

    /// Whether `build --no-restore` is understood; prerelease tags are ignored
    pub fn supports_no_restore(&self) -> bool {
        (self.major, self.minor, self.patch) >= IMPLICIT_RESTORE_VERSION
    }
}

impl fmt::Display for BuildToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(prerelease) = &self.prerelease {
            write!(f, "-{prerelease}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_release() {
        let version = BuildToolVersion::parse("8.0.100\n").unwrap();
        assert_eq!(
            version,
            BuildToolVersion {
                major: 8,
                minor: 0,
                patch: 100,
                prerelease: None
            }
        );
        assert_eq!(version.to_string(), "8.0.100");
    }

    #[test]
    fn test_parse_prerelease() {
        let version = BuildToolVersion::parse("\n  2.0.0-preview2-006497\n").unwrap();
        assert_eq!(version.prerelease.as_deref(), Some("preview2-006497"));
        assert!(version.supports_no_restore());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(BuildToolVersion::parse("").is_err());
        assert!(BuildToolVersion::parse("dotnet: command not found").is_err());
        assert!(BuildToolVersion::parse("8.0").is_err());
    }

    #[test]
    fn test_no_restore_threshold() {
        let at = |s: &str| BuildToolVersion::parse(s).unwrap().supports_no_restore();
        assert!(at("2.0.0"));
        assert!(at("2.1.4"));
        assert!(at("10.0.100"));
        assert!(!at("1.9.9"));
        assert!(!at("1.0.4"));
        assert!(!at("1.99.0-rc"));
    }

    #[tokio::test]
    async fn test_detect_runs_tool() {
        let tool = BuildTool::new(
            "sh",
            vec!["-c".to_string(), "echo 6.0.400".to_string(), "sh".to_string()],
        );
        let version = BuildToolVersion::detect(&tool).await.unwrap();
        assert_eq!(version.major, 6);
        assert_eq!(version.patch, 400);
    }

    #[tokio::test]
    async fn test_detect_reports_missing_tool() {
        let tool = BuildTool::new("/nonexistent/dotnet", Vec::new());
        assert!(matches!(
            BuildToolVersion::detect(&tool).await,
            Err(BuildToolVersionError::ExecutionFailed(_))
        ));
    }
}
