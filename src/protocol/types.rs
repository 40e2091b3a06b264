//! Payload types carried by protocol messages
//!
//! Field names follow the host's PascalCase JSON. Host-internal fields on
//! test cases are kept opaque and sent back verbatim.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Test Cases
// ============================================================================

/// One discoverable test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestCase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Fully-qualified name, possibly with parameter data in parentheses
    pub fully_qualified_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_file_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<i32>,

    /// Host-internal fields, round-tripped untouched
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl TestCase {
    pub fn new(fully_qualified_name: impl Into<String>) -> Self {
        Self {
            id: None,
            fully_qualified_name: fully_qualified_name.into(),
            display_name: None,
            executor_uri: None,
            source: None,
            code_file_path: None,
            line_number: None,
            properties: Map::new(),
        }
    }

    /// Name with any parenthesized parameter suffix removed
    pub fn base_name(&self) -> &str {
        base_name(&self.fully_qualified_name)
    }
}

/// Truncate at the first `(` and trim surrounding whitespace
pub fn base_name(fully_qualified_name: &str) -> &str {
    let end = fully_qualified_name
        .find('(')
        .unwrap_or(fully_qualified_name.len());
    fully_qualified_name[..end].trim()
}

// ============================================================================
// Outcomes and Results
// ============================================================================

/// Outcome of one executed test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestOutcome {
    None,
    Passed,
    Failed,
    Skipped,
    NotFound,
}

impl TestOutcome {
    /// Numeric code used on the wire
    pub fn code(self) -> u8 {
        match self {
            TestOutcome::None => 0,
            TestOutcome::Passed => 1,
            TestOutcome::Failed => 2,
            TestOutcome::Skipped => 3,
            TestOutcome::NotFound => 4,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(TestOutcome::None),
            1 => Some(TestOutcome::Passed),
            2 => Some(TestOutcome::Failed),
            3 => Some(TestOutcome::Skipped),
            4 => Some(TestOutcome::NotFound),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(TestOutcome::None),
            "passed" => Some(TestOutcome::Passed),
            "failed" => Some(TestOutcome::Failed),
            "skipped" => Some(TestOutcome::Skipped),
            "notfound" => Some(TestOutcome::NotFound),
            _ => None,
        }
    }

    /// Lower-cased token reported to callers
    pub fn as_token(self) -> &'static str {
        match self {
            TestOutcome::None => "none",
            TestOutcome::Passed => "passed",
            TestOutcome::Failed => "failed",
            TestOutcome::Skipped => "skipped",
            TestOutcome::NotFound => "notfound",
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

impl Serialize for TestOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Accepts either the numeric code or the outcome name
impl<'de> Deserialize<'de> for TestOutcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => n
                .as_u64()
                .and_then(TestOutcome::from_code)
                .ok_or_else(|| de::Error::custom(format!("unknown test outcome code {n}"))),
            Value::String(s) => TestOutcome::from_name(&s)
                .ok_or_else(|| de::Error::custom(format!("unknown test outcome {s:?}"))),
            other => Err(de::Error::custom(format!(
                "expected test outcome, found {other}"
            ))),
        }
    }
}

/// One executed test case's outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestResult {
    pub test_case: TestCase,

    pub outcome: TestOutcome,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_stack_trace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Duration as the host formats it (`hh:mm:ss.fffffff`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Severity of a host-side test message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestMessageLevel {
    Informational,
    Warning,
    Error,
}

impl<'de> Deserialize<'de> for TestMessageLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let level = match Value::deserialize(deserializer)? {
            Value::Number(n) => match n.as_u64() {
                Some(0) => Some(TestMessageLevel::Informational),
                Some(1) => Some(TestMessageLevel::Warning),
                Some(2) => Some(TestMessageLevel::Error),
                _ => None,
            },
            Value::String(s) => match s.as_str() {
                "Informational" => Some(TestMessageLevel::Informational),
                "Warning" => Some(TestMessageLevel::Warning),
                "Error" => Some(TestMessageLevel::Error),
                _ => None,
            },
            _ => None,
        };
        level.ok_or_else(|| de::Error::custom("unknown test message level"))
    }
}

impl Serialize for TestMessageLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let code = match self {
            TestMessageLevel::Informational => 0,
            TestMessageLevel::Warning => 1,
            TestMessageLevel::Error => 2,
        };
        serializer.serialize_u8(code)
    }
}

/// Payload of `TestMessage`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestMessagePayload {
    pub message_level: TestMessageLevel,

    #[serde(default)]
    pub message: Option<String>,
}

// ============================================================================
// Run Events
// ============================================================================

/// Payload of `TestRunStatsChange`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestRunChangedPayload {
    #[serde(default)]
    pub new_test_results: Option<Vec<TestResult>>,
}

/// Payload of `ExecutionComplete`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestRunCompletePayload {
    #[serde(default)]
    pub test_run_complete_args: Option<TestRunCompleteArgs>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestRunCompleteArgs {
    #[serde(default)]
    pub is_canceled: bool,

    #[serde(default)]
    pub is_aborted: bool,

    #[serde(default)]
    pub elapsed_time_in_running_tests: Option<String>,
}

// ============================================================================
// Requests
// ============================================================================

/// Payload of `StartDiscovery`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DiscoveryRequestPayload {
    pub sources: Vec<String>,
    pub run_settings: String,
}

/// Payload of `TestRunSelectedTestCasesDefaultHost` and
/// `GetTestRunnerProcessStartInfoForRunSelected`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestRunRequestPayload {
    pub test_cases: Vec<TestCase>,
    pub run_settings: String,
    /// Only sent when asking for runner start info
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debugging_enabled: Option<bool>,
}

/// Reply to `GetTestRunnerProcessStartInfoForRunSelected`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestProcessStartInfo {
    #[serde(default)]
    pub file_name: Option<String>,

    #[serde(default)]
    pub arguments: Option<String>,

    #[serde(default)]
    pub working_directory: Option<String>,

    #[serde(default)]
    pub environment_variables: Option<HashMap<String, String>>,
}
