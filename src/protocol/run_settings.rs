//! RunSettings documents sent with discovery and run requests

use std::fmt;

/// Settings document describing how the host should discover or run tests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSettings {
    target_framework_version: Option<String>,
}

impl RunSettings {
    /// Build settings from an optional target framework moniker
    ///
    /// Empty or whitespace-only monikers count as absent. The value is
    /// inserted verbatim, so callers pass pre-sanitized monikers.
    pub fn new(target_framework_version: Option<&str>) -> Self {
        Self {
            target_framework_version: target_framework_version
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string),
        }
    }

    pub fn to_xml(&self) -> String {
        match &self.target_framework_version {
            None => "<RunSettings/>".to_string(),
            Some(version) => format!(
                "<RunSettings><RunConfiguration><TargetFrameworkVersion>{version}</TargetFrameworkVersion></RunConfiguration></RunSettings>"
            ),
        }
    }
}

impl fmt::Display for RunSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}
