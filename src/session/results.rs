//! Records returned to callers of session operations

use serde::Serialize;
use std::collections::HashMap;

use crate::protocol::types::{TestOutcome, TestProcessStartInfo, TestResult};

/// How to start the test runner for the selected tests
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StartInfo {
    pub executable: String,
    pub arguments: String,
    pub working_directory: String,
    /// Only populated for debug start info
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub environment_variables: HashMap<String, String>,
}

impl StartInfo {
    pub fn from_host(info: TestProcessStartInfo, include_environment: bool) -> Self {
        Self {
            executable: info.file_name.unwrap_or_default(),
            arguments: info.arguments.unwrap_or_default(),
            working_directory: info.working_directory.unwrap_or_default(),
            environment_variables: if include_environment {
                info.environment_variables.unwrap_or_default()
            } else {
                HashMap::new()
            },
        }
    }
}

/// Outcome of one executed test, as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestOutcomeRecord {
    pub method_name: String,
    /// Lower-cased outcome token, e.g. `"failed"`
    pub outcome: String,
    pub error_message: Option<String>,
    pub error_stack_trace: Option<String>,
}

impl From<&TestResult> for TestOutcomeRecord {
    fn from(result: &TestResult) -> Self {
        Self {
            method_name: result.test_case.fully_qualified_name.clone(),
            outcome: result.outcome.as_token().to_string(),
            error_message: result.error_message.clone(),
            error_stack_trace: result.error_stack_trace.clone(),
        }
    }
}

/// Result of running the selected tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunTestsResult {
    pub results: Vec<TestOutcomeRecord>,
    /// True iff no result failed and the run was not aborted
    pub pass: bool,
    /// The event stream ended or was cancelled before execution completed
    pub aborted: bool,
}

impl RunTestsResult {
    /// Vacuous pass for a run with nothing to execute
    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            pass: true,
            aborted: false,
        }
    }

    pub fn completed(results: &[TestResult]) -> Self {
        Self {
            results: results.iter().map(TestOutcomeRecord::from).collect(),
            pass: !results.iter().any(|r| r.outcome == TestOutcome::Failed),
            aborted: false,
        }
    }

    pub fn aborted(results: &[TestResult]) -> Self {
        Self {
            results: results.iter().map(TestOutcomeRecord::from).collect(),
            pass: false,
            aborted: true,
        }
    }
}
