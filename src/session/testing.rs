//! Scripted-host helpers for session tests

use bytes::BytesMut;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder};

use crate::diagnostics::{ChannelEmitter, DiagnosticEvent};
use crate::io::transport::{MockTransport, MockTransportHandle};
use crate::protocol::framing::FrameCodec;
use crate::protocol::message::{Message, MessageType, PROTOCOL_VERSION};
use crate::protocol::types::TestOutcome;
use crate::session::TestSession;

pub const TEST_ASSEMBLY: &str = "/work/Tests/bin/Debug/net8.0/Tests.dll";

/// Session under test plus the handles to observe it
pub struct Harness {
    pub session: TestSession<MockTransport>,
    pub handle: MockTransportHandle,
    pub events: mpsc::UnboundedReceiver<DiagnosticEvent>,
}

/// Encode one envelope the way the host would put it on the wire
pub fn frame(message_type: MessageType, payload: Option<Value>) -> Vec<u8> {
    let text = serde_json::to_string(&Message::new(message_type, payload)).unwrap();
    let mut dst = BytesMut::new();
    FrameCodec::new().encode(text.as_str(), &mut dst).unwrap();
    dst.to_vec()
}

pub fn version_reply(version: i32) -> Vec<u8> {
    frame(MessageType::VersionCheck, Some(json!(version)))
}

pub fn test_message(level: u8, text: &str) -> Vec<u8> {
    frame(
        MessageType::TestMessage,
        Some(json!({"MessageLevel": level, "Message": text})),
    )
}

pub fn test_cases_found(names: &[&str]) -> Vec<u8> {
    let cases: Vec<Value> = names
        .iter()
        .map(|name| {
            json!({
                "Id": format!("id-{name}"),
                "FullyQualifiedName": name,
                "ExecutorUri": "executor://xunit/VsTestRunner2/netcoreapp",
                "Source": TEST_ASSEMBLY,
            })
        })
        .collect();
    frame(MessageType::TestCasesFound, Some(Value::Array(cases)))
}

pub fn discovery_complete() -> Vec<u8> {
    frame(MessageType::DiscoveryComplete, Some(json!({"TotalTests": -1})))
}

pub fn stats_change(results: &[(&str, TestOutcome)]) -> Vec<u8> {
    let results: Vec<Value> = results
        .iter()
        .map(|(name, outcome)| {
            let failed = *outcome == TestOutcome::Failed;
            json!({
                "TestCase": {"FullyQualifiedName": name, "Source": TEST_ASSEMBLY},
                "Outcome": outcome.code(),
                "ErrorMessage": failed.then_some("Assert.True() Failure"),
                "ErrorStackTrace": failed.then_some("at Ns.T.Add() in T.cs:line 12"),
            })
        })
        .collect();
    frame(
        MessageType::TestRunStatsChange,
        Some(json!({"NewTestResults": results})),
    )
}

pub fn execution_complete() -> Vec<u8> {
    frame(
        MessageType::ExecutionComplete,
        Some(json!({
            "TestRunCompleteArgs": {
                "IsCanceled": false,
                "IsAborted": false,
                "ElapsedTimeInRunningTests": "00:00:00.4210000"
            }
        })),
    )
}

/// Mock host that answers the handshake, then replays `responses`
pub fn scripted(responses: Vec<Vec<u8>>) -> MockTransport {
    let mut all = vec![version_reply(PROTOCOL_VERSION)];
    all.extend(responses);
    MockTransport::with_responses(all)
}

/// Session bound to `transport`, handshake not yet done
pub fn connected(transport: MockTransport) -> Harness {
    let handle = transport.handle();
    let (emitter, events) = ChannelEmitter::new();
    Harness {
        session: TestSession::new(transport, TEST_ASSEMBLY, Arc::new(emitter)),
        handle,
        events,
    }
}

/// Session bound to `transport` with the handshake done
pub async fn checked(transport: MockTransport) -> Harness {
    let mut harness = connected(transport);
    harness.session.negotiate_version().await.unwrap();
    harness
}

/// Decode every envelope the session sent so far
pub fn decode_sent(handle: &MockTransportHandle) -> Vec<Message> {
    let mut buffer = BytesMut::new();
    for chunk in handle.sent() {
        buffer.extend_from_slice(&chunk);
    }

    let mut codec = FrameCodec::new();
    let mut messages = Vec::new();
    while let Some(text) = codec.decode(&mut buffer).unwrap() {
        messages.push(serde_json::from_str(&text).unwrap());
    }
    messages
}
