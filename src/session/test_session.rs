//! Test host session
//!
//! A [`TestSession`] owns one message channel bound to one test host and
//! drives every protocol operation over it: the version handshake,
//! discovery, runner start info, debug launch and test runs. All receive
//! loops go through [`run_event_loop`] with an operation-specific fold.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, warn};

use crate::diagnostics::EventEmitter;
use crate::frameworks::TestFramework;
use crate::io::process::{ChildProcessManager, ProcessManager, StopMode};
use crate::io::transport::Transport;
use crate::log_timing;
use crate::protocol::channel::{ChannelError, MessageChannel};
use crate::protocol::message::{HostEvent, MessageType, PROTOCOL_VERSION};
use crate::protocol::run_settings::RunSettings;
use crate::protocol::types::{
    DiscoveryRequestPayload, TestCase, TestProcessStartInfo, TestRunRequestPayload,
};
use crate::session::error::SessionError;
use crate::session::fold::{
    BacklogFold, DebugLaunchFold, DiscoveryFold, EventFold, Flow, FoldOutcome, RunFold,
};
use crate::session::results::{RunTestsResult, StartInfo};
use crate::session::state::{SessionState, SessionStateCell};

/// Read host events until the fold is done, the stream fails, or `token` fires
///
/// `TestMessage` events are forwarded to the emitter before the fold sees
/// them. Messages whose payload does not match their tag are skipped.
pub async fn run_event_loop<T, F>(
    channel: &mut MessageChannel<T>,
    emitter: &dyn EventEmitter,
    mut fold: F,
    token: &CancellationToken,
) -> FoldOutcome<F::Output>
where
    T: Transport,
    F: EventFold,
{
    loop {
        if token.is_cancelled() {
            debug!("Event loop cancelled");
            return FoldOutcome::Interrupted(fold.finish());
        }

        let message = match channel.receive_cancellable(token).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("Event loop cancelled while waiting for the host");
                return FoldOutcome::Interrupted(fold.finish());
            }
            Err(ChannelError::Deserialization(e)) => {
                warn!("Skipping malformed host message: {}", e);
                continue;
            }
            Err(e) => {
                warn!("Event loop ended by read failure: {}", e);
                return FoldOutcome::Interrupted(fold.finish());
            }
        };

        let event = match HostEvent::decode(&message) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    "Skipping {} message with unexpected payload: {}",
                    message.message_type, e
                );
                continue;
            }
        };

        match &event {
            HostEvent::TestMessage(payload) => emitter.emit_test_message(payload),
            HostEvent::Ignored(message_type) => {
                debug!("Ignoring host message {}", message_type)
            }
            _ => {}
        }

        if fold.apply(event) == Flow::Done {
            return FoldOutcome::Completed(fold.finish());
        }
    }
}

/// Protocol session with one test host
pub struct TestSession<T: Transport> {
    /// Channel to the host; `None` once the session is torn down
    channel: Option<MessageChannel<T>>,

    /// Lifecycle state, shared with in-flight operation guards
    state: SessionStateCell,

    /// Sink for host test messages
    emitter: Arc<dyn EventEmitter>,

    /// Assembly the host discovers and runs tests from
    test_assembly: PathBuf,

    /// Host process, when this session launched it
    host_process: Option<ChildProcessManager>,

    /// Terminal event still owed by an operation whose loop was interrupted
    abandoned: Option<MessageType>,
}

impl<T: Transport> TestSession<T> {
    /// Bind a session to an established host connection
    pub fn new(
        transport: T,
        test_assembly: impl Into<PathBuf>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            channel: Some(MessageChannel::new(transport)),
            state: SessionStateCell::new(SessionState::Connected),
            emitter,
            test_assembly: test_assembly.into(),
            host_process: None,
            abandoned: None,
        }
    }

    /// Tie the host process lifetime to this session
    pub fn with_host_process(mut self, process: ChildProcessManager) -> Self {
        self.host_process = Some(process);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.channel
            .as_ref()
            .is_some_and(MessageChannel::is_connected)
    }

    // ------------------------------------------------------------------------
    // Version Handshake
    // ------------------------------------------------------------------------

    /// Exchange protocol versions with the host
    ///
    /// Any failure tears the session down.
    pub async fn negotiate_version(&mut self) -> Result<(), SessionError> {
        let current = self.state.get();
        if current != SessionState::Connected {
            return Err(SessionError::invalid_state(current, SessionState::Connected));
        }

        debug!("Negotiating protocol version {}", PROTOCOL_VERSION);
        self.send(MessageType::VersionCheck, Some(&PROTOCOL_VERSION))
            .await?;

        let received = self.channel_mut()?.receive().await;
        let reply = match received {
            Ok(reply) => reply,
            Err(e) => {
                error!("Version handshake failed: {}", e);
                self.teardown();
                return Err(e.into());
            }
        };

        let actual = match reply.decode_payload::<i32>() {
            Ok(actual) => actual,
            Err(e) => {
                error!("Undecodable version reply ({}): {}", reply.message_type, e);
                self.teardown();
                return Err(SessionError::decode("protocol version", e));
            }
        };

        if actual != PROTOCOL_VERSION {
            error!(
                "Host protocol version {} does not match {}",
                actual, PROTOCOL_VERSION
            );
            self.teardown();
            return Err(SessionError::ProtocolVersionMismatch {
                expected: PROTOCOL_VERSION,
                actual,
            });
        }

        self.state.set(SessionState::VersionChecked);
        info!("Test host speaks protocol version {}", actual);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    /// Discover the test cases whose base name equals `method_name`
    pub async fn discover(
        &mut self,
        method_name: &str,
        target_framework_version: Option<&str>,
    ) -> Result<Vec<TestCase>, SessionError> {
        self.discover_with_cancellation(
            method_name,
            target_framework_version,
            &CancellationToken::new(),
        )
        .await
    }

    /// Cancellable [`discover`](Self::discover)
    ///
    /// A read failure or cancellation yields an empty list, never a partial
    /// one.
    pub async fn discover_with_cancellation(
        &mut self,
        method_name: &str,
        target_framework_version: Option<&str>,
        token: &CancellationToken,
    ) -> Result<Vec<TestCase>, SessionError> {
        let _guard = self.state.begin_operation()?;
        let started = Instant::now();

        if !self.settle_abandoned(token).await? {
            return Ok(Vec::new());
        }
        let settings = RunSettings::new(target_framework_version);
        let cases = self.discover_matching(method_name, &settings, token).await?;

        log_timing!(Level::DEBUG, "discover", started.elapsed());
        Ok(cases)
    }

    async fn discover_matching(
        &mut self,
        method_name: &str,
        settings: &RunSettings,
        token: &CancellationToken,
    ) -> Result<Vec<TestCase>, SessionError> {
        let request = DiscoveryRequestPayload {
            sources: vec![self.test_assembly.display().to_string()],
            run_settings: settings.to_xml(),
        };
        self.send(MessageType::StartDiscovery, Some(&request)).await?;

        let emitter = Arc::clone(&self.emitter);
        let channel = self.channel_mut()?;
        let outcome =
            run_event_loop(channel, emitter.as_ref(), DiscoveryFold::new(method_name), token)
                .await;

        match outcome {
            FoldOutcome::Completed(cases) => {
                info!("Discovered {} test case(s) for {}", cases.len(), method_name);
                Ok(cases)
            }
            FoldOutcome::Interrupted(partial) => {
                warn!(
                    "Discovery for {} ended early, dropping {} partial match(es)",
                    method_name,
                    partial.len()
                );
                self.abandoned = Some(MessageType::DiscoveryComplete);
                Ok(Vec::new())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Runner Start Info
    // ------------------------------------------------------------------------

    /// How to start the test runner for `method_name`
    pub async fn get_run_start_info(
        &mut self,
        method_name: &str,
        framework: &str,
        target_framework_version: Option<&str>,
    ) -> Result<StartInfo, SessionError> {
        self.start_info(method_name, framework, target_framework_version, false)
            .await
    }

    /// Like [`get_run_start_info`](Self::get_run_start_info), with the
    /// environment the debuggee needs
    pub async fn get_debug_start_info(
        &mut self,
        method_name: &str,
        framework: &str,
        target_framework_version: Option<&str>,
    ) -> Result<StartInfo, SessionError> {
        self.start_info(method_name, framework, target_framework_version, true)
            .await
    }

    async fn start_info(
        &mut self,
        method_name: &str,
        framework: &str,
        target_framework_version: Option<&str>,
        include_environment: bool,
    ) -> Result<StartInfo, SessionError> {
        let framework = lookup_framework(framework)?;
        let _guard = self.state.begin_operation()?;
        let started = Instant::now();

        let token = CancellationToken::new();
        if !self.settle_abandoned(&token).await? {
            return Err(ChannelError::Transport(
                "host stream ended before an earlier operation finished".to_string(),
            )
            .into());
        }
        let settings = RunSettings::new(target_framework_version);
        let test_cases = self
            .discover_matching(method_name, &settings, &token)
            .await?;
        debug!(
            "Requesting {} runner start info for {} {} case(s)",
            framework.name,
            test_cases.len(),
            method_name
        );

        let request = TestRunRequestPayload {
            test_cases,
            run_settings: settings.to_xml(),
            debugging_enabled: Some(true),
        };
        self.send(
            MessageType::GetTestRunnerProcessStartInfoForRunSelected,
            Some(&request),
        )
        .await?;

        let reply = self.channel_mut()?.receive().await?;
        let info: TestProcessStartInfo = reply
            .decode_payload()
            .map_err(|e| SessionError::decode("test runner start info", e))?;

        log_timing!(Level::DEBUG, "start_info", started.elapsed());
        Ok(StartInfo::from_host(info, include_environment))
    }

    // ------------------------------------------------------------------------
    // Debug Launch
    // ------------------------------------------------------------------------

    /// Tell the host the debuggee was launched by this process and wait for
    /// execution to finish
    ///
    /// Ends silently when the host goes away or `token` fires.
    pub async fn debug_launch(&mut self, token: &CancellationToken) -> Result<(), SessionError> {
        let _guard = self.state.begin_operation()?;

        if !self.settle_abandoned(token).await? {
            debug!("Debug launch cancelled before the callback was sent");
            return Ok(());
        }
        let pid = std::process::id();
        debug!("Sending debug launch callback for PID {}", pid);
        self.send(MessageType::CustomTestHostLaunchCallback, Some(&pid))
            .await?;

        let emitter = Arc::clone(&self.emitter);
        let channel = self.channel_mut()?;
        let outcome = run_event_loop(channel, emitter.as_ref(), DebugLaunchFold, token).await;
        match outcome {
            FoldOutcome::Completed(()) => info!("Debug session completed"),
            FoldOutcome::Interrupted(()) => {
                debug!("Debug session ended before completion");
                self.abandoned = Some(MessageType::ExecutionComplete);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Test Runs
    // ------------------------------------------------------------------------

    /// Run every test case whose base name equals `method_name`
    pub async fn run_selected(
        &mut self,
        method_name: &str,
        framework: &str,
        target_framework_version: Option<&str>,
    ) -> Result<RunTestsResult, SessionError> {
        self.run_selected_with_cancellation(
            method_name,
            framework,
            target_framework_version,
            &CancellationToken::new(),
        )
        .await
    }

    /// Cancellable [`run_selected`](Self::run_selected)
    ///
    /// An interrupted run is reported as aborted with the results received
    /// so far.
    pub async fn run_selected_with_cancellation(
        &mut self,
        method_name: &str,
        framework: &str,
        target_framework_version: Option<&str>,
        token: &CancellationToken,
    ) -> Result<RunTestsResult, SessionError> {
        let framework = lookup_framework(framework)?;
        let _guard = self.state.begin_operation()?;
        let started = Instant::now();

        if !self.settle_abandoned(token).await? {
            info!("Run of {} cancelled before discovery", method_name);
            return Ok(RunTestsResult::aborted(&[]));
        }
        let settings = RunSettings::new(target_framework_version);
        let test_cases = self.discover_matching(method_name, &settings, token).await?;

        if token.is_cancelled() {
            info!("Run of {} cancelled during discovery", method_name);
            return Ok(RunTestsResult::aborted(&[]));
        }
        if test_cases.is_empty() {
            info!("No test cases match {}, nothing to run", method_name);
            return Ok(RunTestsResult::empty());
        }

        info!(
            "Running {} {} case(s) for {}",
            test_cases.len(),
            framework.name,
            method_name
        );
        let request = TestRunRequestPayload {
            test_cases,
            run_settings: settings.to_xml(),
            debugging_enabled: None,
        };
        self.send(MessageType::TestRunSelectedTestCasesDefaultHost, Some(&request))
            .await?;

        let emitter = Arc::clone(&self.emitter);
        let channel = self.channel_mut()?;
        let outcome = run_event_loop(channel, emitter.as_ref(), RunFold::new(), token).await;

        let result = match outcome {
            FoldOutcome::Completed(accumulation) => {
                if let Some(args) = accumulation
                    .completion
                    .as_ref()
                    .and_then(|c| c.test_run_complete_args.as_ref())
                {
                    info!(
                        canceled = args.is_canceled,
                        aborted = args.is_aborted,
                        elapsed = args.elapsed_time_in_running_tests.as_deref().unwrap_or(""),
                        "Test run completed"
                    );
                }
                RunTestsResult::completed(&accumulation.results)
            }
            FoldOutcome::Interrupted(accumulation) => {
                warn!(
                    "Run of {} aborted after {} result(s)",
                    method_name,
                    accumulation.results.len()
                );
                self.abandoned = Some(MessageType::ExecutionComplete);
                RunTestsResult::aborted(&accumulation.results)
            }
        };

        log_timing!(Level::INFO, "run_selected", started.elapsed());
        Ok(result)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Close the host connection and stop the host process
    pub async fn close(&mut self) -> Result<(), SessionError> {
        info!("Closing test host session");
        self.state.set(SessionState::Disconnected);

        if let Some(mut channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                warn!("Failed to close host connection: {}", e);
            }
        }

        if let Some(process) = self.host_process.as_mut() {
            if process.is_running() {
                if let Err(e) = process.stop(StopMode::Graceful).await {
                    warn!("Failed to stop test host: {}", e);
                }
            }
        }

        Ok(())
    }

    /// Skip the rest of an interrupted operation's events
    ///
    /// The host keeps streaming events for an operation after its loop gives
    /// up, so they are read up to that operation's terminal event before
    /// anything new is sent. False when the stream ends or `token` fires
    /// first; the backlog is then still owed.
    async fn settle_abandoned(&mut self, token: &CancellationToken) -> Result<bool, SessionError> {
        let Some(terminal) = self.abandoned.clone() else {
            return Ok(true);
        };
        debug!("Skipping host events up to {}", terminal);

        let emitter = Arc::clone(&self.emitter);
        let channel = self.channel_mut()?;
        let outcome =
            run_event_loop(channel, emitter.as_ref(), BacklogFold::new(terminal), token).await;
        match outcome {
            FoldOutcome::Completed(skipped) => {
                debug!("Skipped {} event(s) of an abandoned operation", skipped);
                self.abandoned = None;
                Ok(true)
            }
            FoldOutcome::Interrupted(_) => Ok(false),
        }
    }

    /// Drop the connection and kill the host after an unrecoverable error
    fn teardown(&mut self) {
        warn!("Tearing down test host session");
        self.state.set(SessionState::Disconnected);
        self.channel = None;
        if let Some(process) = self.host_process.as_mut() {
            process.kill_sync();
        }
    }

    async fn send<P: Serialize + Sync>(
        &mut self,
        message_type: MessageType,
        payload: Option<&P>,
    ) -> Result<(), SessionError> {
        let result = self.channel_mut()?.send(message_type, payload).await;
        match result {
            Ok(()) => Ok(()),
            Err(e @ ChannelError::Serialization(_)) => Err(e.into()),
            Err(e) => {
                error!("Failed to send to test host: {}", e);
                self.teardown();
                Err(e.into())
            }
        }
    }

    fn channel_mut(&mut self) -> Result<&mut MessageChannel<T>, SessionError> {
        self.channel.as_mut().ok_or(SessionError::InvalidState {
            current: SessionState::Disconnected,
            expected: SessionState::VersionChecked,
        })
    }
}

impl<T: Transport> Drop for TestSession<T> {
    fn drop(&mut self) {
        if let Some(process) = self.host_process.as_mut() {
            process.kill_sync();
        }
    }
}

fn lookup_framework(name: &str) -> Result<&'static TestFramework, SessionError> {
    TestFramework::lookup(name).ok_or_else(|| {
        warn!("Unknown test framework: {}", name);
        SessionError::UnknownTestFramework(name.to_string())
    })
}
