//! Result accumulation over host event streams
//!
//! Each operation folds decoded [`HostEvent`]s into its result until a
//! terminal event arrives. Folds are pure: diagnostics forwarding and I/O
//! live in the session's event loop, so these can be driven from a plain
//! iterator in tests.

use tracing::debug;

use crate::protocol::message::{HostEvent, MessageType};
use crate::protocol::types::{TestCase, TestResult, TestRunCompletePayload};

/// Whether the event loop keeps reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Done,
}

/// How an event loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum FoldOutcome<T> {
    /// The terminal event was observed
    Completed(T),
    /// The stream ended or was cancelled first; holds whatever was folded
    Interrupted(T),
}


/// Per-operation accumulator
pub trait EventFold {
    type Output;

    /// Fold one event and decide whether the loop continues
    fn apply(&mut self, event: HostEvent) -> Flow;

    /// Produce the accumulated output
    fn finish(self) -> Self::Output;
}

/// Drive a fold over an already-decoded sequence of events
pub fn fold_events<F, I>(mut fold: F, events: I) -> FoldOutcome<F::Output>
where
    F: EventFold,
    I: IntoIterator<Item = HostEvent>,
{
    for event in events {
        if fold.apply(event) == Flow::Done {
            return FoldOutcome::Completed(fold.finish());
        }
    }
    FoldOutcome::Interrupted(fold.finish())
}

// ============================================================================
// Discovery
// ============================================================================

/// Collects discovered test cases whose base name matches a method name
#[derive(Debug)]
pub struct DiscoveryFold {
    method_name: String,
    matches: Vec<TestCase>,
}

impl DiscoveryFold {
    pub fn new(method_name: impl Into<String>) -> Self {
        Self {
            method_name: method_name.into(),
            matches: Vec::new(),
        }
    }
}

impl EventFold for DiscoveryFold {
    type Output = Vec<TestCase>;

    fn apply(&mut self, event: HostEvent) -> Flow {
        match event {
            HostEvent::TestCasesFound(batch) => {
                let before = self.matches.len();
                self.matches.extend(
                    batch
                        .into_iter()
                        .filter(|case| case.base_name() == self.method_name),
                );
                debug!(
                    "Discovery batch matched {} test case(s) for {}",
                    self.matches.len() - before,
                    self.method_name
                );
                Flow::Continue
            }
            HostEvent::DiscoveryComplete => Flow::Done,
            _ => Flow::Continue,
        }
    }

    fn finish(self) -> Self::Output {
        self.matches
    }
}

// ============================================================================
// Run
// ============================================================================

/// Results and completion metadata of one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunAccumulation {
    pub results: Vec<TestResult>,
    pub completion: Option<TestRunCompletePayload>,
}

/// Collects test results until execution completes
#[derive(Debug, Default)]
pub struct RunFold {
    accumulation: RunAccumulation,
}

impl RunFold {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventFold for RunFold {
    type Output = RunAccumulation;

    fn apply(&mut self, event: HostEvent) -> Flow {
        match event {
            HostEvent::TestRunStatsChange(results) => {
                self.accumulation.results.extend(results);
                Flow::Continue
            }
            HostEvent::ExecutionComplete(completion) => {
                self.accumulation.completion = completion;
                Flow::Done
            }
            _ => Flow::Continue,
        }
    }

    fn finish(self) -> Self::Output {
        self.accumulation
    }
}

// ============================================================================
// Debug Launch
// ============================================================================

/// Waits for execution to complete after a debug launch callback
#[derive(Debug, Default)]
pub struct DebugLaunchFold;

impl EventFold for DebugLaunchFold {
    type Output = ();

    fn apply(&mut self, event: HostEvent) -> Flow {
        match event {
            HostEvent::ExecutionComplete(_) => Flow::Done,
            _ => Flow::Continue,
        }
    }

    fn finish(self) -> Self::Output {}
}

// ============================================================================
// Abandoned Operations
// ============================================================================

/// Skips what the host still sends for an abandoned operation
///
/// Ends at the abandoned operation's terminal event; yields how many events
/// were skipped.
#[derive(Debug)]
pub struct BacklogFold {
    terminal: MessageType,
    skipped: usize,
}

impl BacklogFold {
    pub fn new(terminal: MessageType) -> Self {
        Self {
            terminal,
            skipped: 0,
        }
    }
}

impl EventFold for BacklogFold {
    type Output = usize;

    fn apply(&mut self, event: HostEvent) -> Flow {
        let terminal = matches!(
            (&self.terminal, &event),
            (MessageType::DiscoveryComplete, HostEvent::DiscoveryComplete)
                | (MessageType::ExecutionComplete, HostEvent::ExecutionComplete(_))
        );
        if terminal {
            return Flow::Done;
        }
        self.skipped += 1;
        Flow::Continue
    }

    fn finish(self) -> Self::Output {
        self.skipped
    }
}
