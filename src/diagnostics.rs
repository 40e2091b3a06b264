//! Diagnostic event emission
//!
//! Build output and host-side test messages flow to the caller through an
//! [`EventEmitter`]. Emitters are shared across tasks (build output is read
//! concurrently from two pipes), so implementations must be thread-safe.

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::protocol::types::{TestMessageLevel, TestMessagePayload};

/// Severity of a free-text diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Informational,
    Error,
}

/// Sink for diagnostics produced while preparing or talking to the host
pub trait EventEmitter: Send + Sync {
    /// A free-text line, e.g. one line of build output
    fn emit_message(&self, level: DiagnosticLevel, text: &str);

    /// A structured message forwarded from the test host
    fn emit_test_message(&self, payload: &TestMessagePayload);
}

/// Emitter writing everything to the `tracing` pipeline
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEmitter;

impl EventEmitter for TracingEmitter {
    fn emit_message(&self, level: DiagnosticLevel, text: &str) {
        match level {
            DiagnosticLevel::Informational => info!(target: "testhost::output", "{}", text),
            DiagnosticLevel::Error => error!(target: "testhost::output", "{}", text),
        }
    }

    fn emit_test_message(&self, payload: &TestMessagePayload) {
        let text = payload.message.as_deref().unwrap_or_default();
        match payload.message_level {
            TestMessageLevel::Informational => info!(target: "testhost::host", "{}", text),
            TestMessageLevel::Warning => warn!(target: "testhost::host", "{}", text),
            TestMessageLevel::Error => error!(target: "testhost::host", "{}", text),
        }
    }
}

/// One emitted diagnostic, as delivered by [`ChannelEmitter`]
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    Message { level: DiagnosticLevel, text: String },
    TestMessage(TestMessagePayload),
}

/// Emitter forwarding diagnostics over an unbounded channel
///
/// Sends never block; diagnostics emitted after the receiver is dropped
/// are discarded.
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    sender: mpsc::UnboundedSender<DiagnosticEvent>,
}

impl ChannelEmitter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DiagnosticEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventEmitter for ChannelEmitter {
    fn emit_message(&self, level: DiagnosticLevel, text: &str) {
        let _ = self.sender.send(DiagnosticEvent::Message {
            level,
            text: text.to_string(),
        });
    }

    fn emit_test_message(&self, payload: &TestMessagePayload) {
        let _ = self.sender.send(DiagnosticEvent::TestMessage(payload.clone()));
    }
}

/// Drain everything currently queued on a [`ChannelEmitter`] receiver
pub fn drain_events(receiver: &mut mpsc::UnboundedReceiver<DiagnosticEvent>) -> Vec<DiagnosticEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_emitter_preserves_order() {
        let (emitter, mut receiver) = ChannelEmitter::new();
        emitter.emit_message(DiagnosticLevel::Informational, "Restoring packages");
        emitter.emit_test_message(&TestMessagePayload {
            message_level: TestMessageLevel::Warning,
            message: Some("slow test".to_string()),
        });
        emitter.emit_message(DiagnosticLevel::Error, "error CS1002");

        let events = drain_events(&mut receiver);
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            DiagnosticEvent::Message {
                level: DiagnosticLevel::Informational,
                text: "Restoring packages".to_string()
            }
        );
        assert!(matches!(events[1], DiagnosticEvent::TestMessage(_)));
    }

    #[test]
    fn test_channel_emitter_survives_dropped_receiver() {
        let (emitter, receiver) = ChannelEmitter::new();
        drop(receiver);
        emitter.emit_message(DiagnosticLevel::Error, "nobody listening");
    }
}
