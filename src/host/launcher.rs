//! Test host launch
//!
//! The host is started as `<dotnet> vstest --Port:<port> --ParentProcessId:<pid>`
//! and connects back to a loopback listener owned by this process.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tracing::{Level, debug, info, warn};

use crate::diagnostics::{DiagnosticLevel, EventEmitter};
use crate::host::build::ProjectBuilder;
use crate::host::config::HostConfig;
use crate::host::error::HostError;
use crate::io::process::{ChildProcessManager, OutputStream, ProcessManager};
use crate::io::transport::SocketTransport;
use crate::log_timing;
use crate::session::TestSession;

/// Arguments that start the host and point it at `port`
pub fn host_arguments(port: u16, parent_pid: u32) -> Vec<String> {
    vec![
        "vstest".to_string(),
        format!("--Port:{port}"),
        format!("--ParentProcessId:{parent_pid}"),
    ]
}

/// Builds the project and starts connected host sessions
pub struct HostLauncher {
    config: HostConfig,
    emitter: Arc<dyn EventEmitter>,
}

impl HostLauncher {
    pub fn new(config: HostConfig, emitter: Arc<dyn EventEmitter>) -> Self {
        Self { config, emitter }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Build the project; true only when the test assembly was produced
    pub async fn prepare_host(&self) -> bool {
        ProjectBuilder::new(&self.config, Arc::clone(&self.emitter))
            .prepare_host()
            .await
    }

    /// Start the host and wait for it to connect
    ///
    /// The host is killed when it does not connect in time.
    pub async fn launch(&self) -> Result<(ChildProcessManager, TcpStream), HostError> {
        let started = Instant::now();
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let port = listener.local_addr()?.port();
        debug!("Listening for the test host on port {}", port);

        let tool = self.config.build_tool();
        let args = tool.arguments(&host_arguments(port, std::process::id()));
        let mut process = ChildProcessManager::new(
            tool.program().to_string(),
            args,
            Some(self.config.project_directory.clone()),
        );

        let emitter = Arc::clone(&self.emitter);
        process.on_output_line(move |stream, line| match stream {
            OutputStream::Stderr => emitter.emit_message(DiagnosticLevel::Error, &line),
            OutputStream::Stdout => debug!(target: "testhost::host", "{}", line),
        });
        process.start().await?;

        let timeout = self.config.connection_timeout;
        match tokio::time::timeout(timeout, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                info!("Test host connected from {}", peer);
                log_timing!(Level::DEBUG, "launch", started.elapsed());
                Ok((process, stream))
            }
            Ok(Err(e)) => {
                warn!("Failed to accept test host connection: {}", e);
                process.kill_sync();
                Err(e.into())
            }
            Err(_) => {
                warn!("Test host did not connect within {:?}", timeout);
                process.kill_sync();
                Err(HostError::ConnectionTimeout { timeout })
            }
        }
    }

    /// Launch the host and complete the version handshake
    pub async fn start_session(&self) -> Result<TestSession<SocketTransport>, HostError> {
        let (process, stream) = self.launch().await?;
        let mut session = TestSession::new(
            SocketTransport::new(stream),
            self.config.target_path.clone(),
            Arc::clone(&self.emitter),
        )
        .with_host_process(process);

        session.negotiate_version().await?;
        Ok(session)
    }

    /// Build unless `skip_build`, then start a session
    pub async fn prepare_and_start(
        &self,
        skip_build: bool,
    ) -> Result<TestSession<SocketTransport>, HostError> {
        if !skip_build && !self.prepare_host().await {
            return Err(HostError::BuildFailed);
        }
        self.start_session().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{ChannelEmitter, DiagnosticEvent, drain_events};
    use crate::host::config::HostConfigBuilder;
    use std::time::Duration;
    use tempfile::TempDir;

    fn launcher(dir: &TempDir, script: &str) -> (HostLauncher, tokio::sync::mpsc::UnboundedReceiver<DiagnosticEvent>) {
        let config = HostConfigBuilder::new()
            .dotnet_path("sh")
            .base_args(["-c", script, "sh"])
            .project_directory(dir.path())
            .target_path("Tests.dll")
            .connection_timeout(Duration::from_millis(500))
            .build()
            .unwrap();
        let (emitter, events) = ChannelEmitter::new();
        (HostLauncher::new(config, Arc::new(emitter)), events)
    }

    #[test]
    fn test_host_arguments() {
        assert_eq!(
            host_arguments(50123, 4242),
            vec!["vstest", "--Port:50123", "--ParentProcessId:4242"]
        );
    }

    #[tokio::test]
    async fn test_launch_times_out_and_forwards_stderr() {
        let temp_dir = TempDir::new().unwrap();
        let (launcher, mut events) = launcher(&temp_dir, "echo \"starting $1 $2\" >&2; sleep 5");

        match launcher.launch().await {
            Err(HostError::ConnectionTimeout { timeout }) => {
                assert_eq!(timeout, Duration::from_millis(500))
            }
            other => panic!("expected timeout: {:?}", other.map(|_| ())),
        }

        let events = drain_events(&mut events);
        assert!(events.iter().any(|event| matches!(
            event,
            DiagnosticEvent::Message { level: DiagnosticLevel::Error, text }
                if text.starts_with("starting vstest --Port:")
        )));
    }

    #[tokio::test]
    async fn test_build_failure_prevents_launch() {
        let temp_dir = TempDir::new().unwrap();
        let (launcher, _events) = launcher(&temp_dir, "exit 1");

        assert!(matches!(
            launcher.prepare_and_start(false).await,
            Err(HostError::BuildFailed)
        ));
    }

    #[tokio::test]
    async fn test_unstartable_host() {
        let temp_dir = TempDir::new().unwrap();
        let config = HostConfigBuilder::new()
            .dotnet_path("/nonexistent/dotnet")
            .project_directory(temp_dir.path())
            .target_path("Tests.dll")
            .build()
            .unwrap();
        let (emitter, _events) = ChannelEmitter::new();
        let launcher = HostLauncher::new(config, Arc::new(emitter));

        assert!(matches!(launcher.launch().await, Err(HostError::Process(_))));
    }

    #[cfg(feature = "dotnet-integration-tests")]
    #[tokio::test]
    async fn test_real_host_handshake() {
        let project = crate::test_utils::dotnet_test_project().await;
        let config = HostConfigBuilder::new()
            .dotnet_path(crate::test_utils::get_test_dotnet_path())
            .project_directory(project.path())
            .build()
            .unwrap();
        let (emitter, _events) = ChannelEmitter::new();
        let launcher = HostLauncher::new(config, Arc::new(emitter));

        let mut session = launcher.prepare_and_start(false).await.unwrap();
        let result = session
            .run_selected("Calc.Tests.CalcTests.Adds", "xunit", None)
            .await
            .unwrap();
        assert!(result.pass);
        assert_eq!(result.results.len(), 1);
        session.close().await.unwrap();
    }
}
