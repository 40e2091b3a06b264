//! Message envelope and host event decoding
//!
//! Every frame carries a JSON envelope `{"MessageType": tag, "Payload": ...}`.
//! The payload shape depends on the tag; [`HostEvent::decode`] turns an
//! envelope into a typed event, routing tags the loops do not consume to
//! [`HostEvent::Ignored`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::protocol::types::{
    TestCase, TestMessagePayload, TestResult, TestRunChangedPayload, TestRunCompletePayload,
};

/// Protocol version this client speaks
pub const PROTOCOL_VERSION: i32 = 1;

/// Message types exchanged with the test host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    VersionCheck,
    StartDiscovery,
    TestCasesFound,
    DiscoveryComplete,
    TestMessage,
    GetTestRunnerProcessStartInfoForRunSelected,
    CustomTestHostLaunchCallback,
    TestRunSelectedTestCasesDefaultHost,
    TestRunStatsChange,
    ExecutionComplete,
    /// Any tag this client does not know about
    Unknown(String),
}

impl MessageType {
    /// Tag used on the wire
    pub fn wire_tag(&self) -> &str {
        match self {
            MessageType::VersionCheck => "ProtocolVersion",
            MessageType::StartDiscovery => "TestDiscovery.Start",
            MessageType::TestCasesFound => "TestDiscovery.TestFound",
            MessageType::DiscoveryComplete => "TestDiscovery.Completed",
            MessageType::TestMessage => "TestSession.Message",
            MessageType::GetTestRunnerProcessStartInfoForRunSelected => {
                "TestExecution.GetTestRunnerProcessStartInfoForRunSelected"
            }
            MessageType::CustomTestHostLaunchCallback => {
                "TestExecution.CustomTestHostLaunchCallback"
            }
            MessageType::TestRunSelectedTestCasesDefaultHost => {
                "TestExecution.RunSelectedTestCasesDefaultHost"
            }
            MessageType::TestRunStatsChange => "TestExecution.StatsChange",
            MessageType::ExecutionComplete => "TestExecution.Completed",
            MessageType::Unknown(tag) => tag,
        }
    }

    pub fn from_wire_tag(tag: &str) -> Self {
        match tag {
            "ProtocolVersion" => MessageType::VersionCheck,
            "TestDiscovery.Start" => MessageType::StartDiscovery,
            "TestDiscovery.TestFound" => MessageType::TestCasesFound,
            "TestDiscovery.Completed" => MessageType::DiscoveryComplete,
            "TestSession.Message" => MessageType::TestMessage,
            "TestExecution.GetTestRunnerProcessStartInfoForRunSelected" => {
                MessageType::GetTestRunnerProcessStartInfoForRunSelected
            }
            "TestExecution.CustomTestHostLaunchCallback" => {
                MessageType::CustomTestHostLaunchCallback
            }
            "TestExecution.RunSelectedTestCasesDefaultHost" => {
                MessageType::TestRunSelectedTestCasesDefaultHost
            }
            "TestExecution.StatsChange" => MessageType::TestRunStatsChange,
            "TestExecution.Completed" => MessageType::ExecutionComplete,
            other => MessageType::Unknown(other.to_string()),
        }
    }
}

impl From<String> for MessageType {
    fn from(tag: String) -> Self {
        MessageType::from_wire_tag(&tag)
    }
}

impl From<MessageType> for String {
    fn from(message_type: MessageType) -> Self {
        message_type.wire_tag().to_string()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_tag())
    }
}

/// Protocol envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "MessageType")]
    pub message_type: MessageType,

    #[serde(rename = "Payload", default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Message {
    pub fn new(message_type: MessageType, payload: Option<Value>) -> Self {
        Self {
            message_type,
            payload,
        }
    }

    /// Deserialize the payload into `T`, treating a missing payload as `null`
    pub fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.payload {
            Some(payload) => T::deserialize(payload),
            None => T::deserialize(Value::Null),
        }
    }
}

/// Typed view of a message received during an event loop
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// Free-text diagnostic from the host
    TestMessage(TestMessagePayload),
    /// A batch of discovered test cases
    TestCasesFound(Vec<TestCase>),
    /// Discovery finished
    DiscoveryComplete,
    /// A batch of newly completed test results
    TestRunStatsChange(Vec<TestResult>),
    /// Execution finished; completion metadata when the host sent any
    ExecutionComplete(Option<TestRunCompletePayload>),
    /// A message no loop consumes
    Ignored(MessageType),
}

impl HostEvent {
    /// Decode an envelope into an event
    pub fn decode(message: &Message) -> Result<Self, serde_json::Error> {
        let event = match &message.message_type {
            MessageType::TestMessage => HostEvent::TestMessage(message.decode_payload()?),
            MessageType::TestCasesFound => {
                let cases: Option<Vec<TestCase>> = message.decode_payload()?;
                HostEvent::TestCasesFound(cases.unwrap_or_default())
            }
            MessageType::DiscoveryComplete => HostEvent::DiscoveryComplete,
            MessageType::TestRunStatsChange => {
                let changed: TestRunChangedPayload = message.decode_payload()?;
                HostEvent::TestRunStatsChange(changed.new_test_results.unwrap_or_default())
            }
            // Completion metadata is informational; a malformed payload still ends the run
            MessageType::ExecutionComplete => {
                HostEvent::ExecutionComplete(
                    message
                        .decode_payload::<Option<TestRunCompletePayload>>()
                        .ok()
                        .flatten(),
                )
            }
            other => HostEvent::Ignored(other.clone()),
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{TestMessageLevel, TestOutcome};
    use serde_json::json;

    #[test]
    fn test_wire_tags_are_stable() {
        let all = [
            MessageType::VersionCheck,
            MessageType::StartDiscovery,
            MessageType::TestCasesFound,
            MessageType::DiscoveryComplete,
            MessageType::TestMessage,
            MessageType::GetTestRunnerProcessStartInfoForRunSelected,
            MessageType::CustomTestHostLaunchCallback,
            MessageType::TestRunSelectedTestCasesDefaultHost,
            MessageType::TestRunStatsChange,
            MessageType::ExecutionComplete,
        ];
        for message_type in all {
            assert_eq!(
                MessageType::from_wire_tag(message_type.wire_tag()),
                message_type
            );
        }
        assert_eq!(MessageType::VersionCheck.wire_tag(), "ProtocolVersion");
    }

    #[test]
    fn test_unknown_tag_is_preserved() {
        let message: Message =
            serde_json::from_str(r#"{"MessageType":"TestSession.Terminate","Payload":null}"#)
                .unwrap();
        assert_eq!(
            message.message_type,
            MessageType::Unknown("TestSession.Terminate".to_string())
        );
        assert_eq!(message.payload, None);
        assert_eq!(
            HostEvent::decode(&message).unwrap(),
            HostEvent::Ignored(MessageType::Unknown("TestSession.Terminate".to_string()))
        );
    }

    #[test]
    fn test_envelope_serialization() {
        let message = Message::new(MessageType::VersionCheck, Some(json!(1)));
        let text = serde_json::to_string(&message).unwrap();
        assert_eq!(text, r#"{"MessageType":"ProtocolVersion","Payload":1}"#);

        let bare = Message::new(MessageType::DiscoveryComplete, None);
        assert_eq!(
            serde_json::to_string(&bare).unwrap(),
            r#"{"MessageType":"TestDiscovery.Completed"}"#
        );
    }

    #[test]
    fn test_decode_test_message() {
        let message = Message::new(
            MessageType::TestMessage,
            Some(json!({"MessageLevel": 2, "Message": "boom"})),
        );
        match HostEvent::decode(&message).unwrap() {
            HostEvent::TestMessage(payload) => {
                assert_eq!(payload.message_level, TestMessageLevel::Error);
                assert_eq!(payload.message.as_deref(), Some("boom"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_decode_stats_change() {
        let message = Message::new(
            MessageType::TestRunStatsChange,
            Some(json!({
                "NewTestResults": [
                    {"TestCase": {"FullyQualifiedName": "A.B"}, "Outcome": 2}
                ],
                "ActiveTests": []
            })),
        );
        match HostEvent::decode(&message).unwrap() {
            HostEvent::TestRunStatsChange(results) => {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].outcome, TestOutcome::Failed);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_decode_execution_complete_tolerates_bad_payload() {
        let message = Message::new(MessageType::ExecutionComplete, Some(json!("garbage")));
        assert_eq!(
            HostEvent::decode(&message).unwrap(),
            HostEvent::ExecutionComplete(None)
        );
    }

    #[test]
    fn test_decode_malformed_batch_is_an_error() {
        let message = Message::new(MessageType::TestCasesFound, Some(json!({"not": "a list"})));
        assert!(HostEvent::decode(&message).is_err());
    }

    #[test]
    fn test_missing_discovery_batch_is_empty() {
        let message = Message::new(MessageType::TestCasesFound, None);
        assert_eq!(
            HostEvent::decode(&message).unwrap(),
            HostEvent::TestCasesFound(Vec::new())
        );
    }
}
