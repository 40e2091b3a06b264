//! Process management layer
//!
//! Handles the test host process lifecycle and output draining,
//! completely separate from transport concerns. The host talks to us over
//! a socket, so its stdio streams only carry diagnostics.

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

// ============================================================================
// Process State Management
// ============================================================================

/// How to stop a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Try graceful shutdown first (SIGTERM)
    Graceful,
    /// Force kill immediately (SIGKILL)
    Force,
}

/// Process lifecycle states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Process has not been started yet
    NotStarted,
    /// Process is currently running
    Running { pid: u32 },
    /// Process has exited or was stopped
    Stopped,
}

impl ProcessState {
    /// Get the process ID if the process is running
    pub fn pid(&self) -> Option<u32> {
        match self {
            ProcessState::Running { pid } => Some(*pid),
            _ => None,
        }
    }

    /// Check if the process is currently running
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running { .. })
    }
}

/// Which output stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Callback receiving one trimmed, non-empty output line
pub type OutputHandler = Arc<dyn Fn(OutputStream, String) + Send + Sync>;

/// How long a gracefully stopped process has before it is killed
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Read one line, replacing bytes that are not valid UTF-8
///
/// Returns `None` at end of stream. The line ending is stripped.
pub(crate) async fn read_line_lossy<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    let bytes = buf.as_slice();
    let line = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    Ok(Some(String::from_utf8_lossy(line).into_owned()))
}

// ============================================================================
// Process Management
// ============================================================================

/// Error types for process management
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Process not started")]
    NotStarted,

    #[error("Process already started")]
    AlreadyStarted,

    #[error("Failed to get process ID")]
    MissingPid,
}

/// Trait for managing external process lifecycle
#[async_trait]
pub trait ProcessManager: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Start the external process
    async fn start(&mut self) -> Result<(), Self::Error>;

    /// Stop the external process
    async fn stop(&mut self, mode: StopMode) -> Result<(), Self::Error>;

    /// Check if the process is currently running
    fn is_running(&self) -> bool;

    /// Synchronous force kill for Drop implementations
    fn kill_sync(&mut self);
}

/// Manages a child process spawned via Command
pub struct ChildProcessManager {
    /// Command to execute
    command: String,

    /// Command arguments
    args: Vec<String>,

    /// Working directory for the process (optional)
    working_directory: Option<PathBuf>,

    /// Thread-safe process state, shared with the wait task
    state: Arc<Mutex<ProcessState>>,

    /// Output line handler
    output_handler: Option<OutputHandler>,

    /// Output draining task handles
    output_tasks: Vec<JoinHandle<()>>,

    /// Process wait task handle
    wait_task: Option<JoinHandle<()>>,

    /// Grace period between SIGTERM and SIGKILL
    stop_timeout: Duration,
}

impl ChildProcessManager {
    /// Create a new child process manager
    pub fn new(command: String, args: Vec<String>, working_dir: Option<PathBuf>) -> Self {
        Self {
            command,
            args,
            working_directory: working_dir,
            state: Arc::new(Mutex::new(ProcessState::NotStarted)),
            output_handler: None,
            output_tasks: Vec::new(),
            wait_task: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Set how long a graceful stop waits before killing the process
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Install a handler for stdout/stderr lines
    ///
    /// Must be called before `start()`. Without a handler lines are only
    /// drained so the child never blocks on a full pipe.
    pub fn on_output_line<F>(&mut self, handler: F)
    where
        F: Fn(OutputStream, String) + Send + Sync + 'static,
    {
        self.output_handler = Some(Arc::new(handler));
    }

    /// Get current process state (thread-safe)
    pub fn get_state(&self) -> ProcessState {
        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        self.state.lock().unwrap().clone()
    }

    /// Get the process ID while running
    pub fn pid(&self) -> Option<u32> {
        self.get_state().pid()
    }

    /// Spawn a task draining one output pipe line by line
    fn spawn_output_drain<R>(&mut self, pipe: R, stream: OutputStream)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let handler = self.output_handler.clone();

        let task = tokio::spawn(async move {
            let mut reader = BufReader::new(pipe);
            let mut buf = Vec::new();
            loop {
                match read_line_lossy(&mut reader, &mut buf).await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        match &handler {
                            Some(handler) => handler(stream, line),
                            None => trace!("ChildProcessManager: {:?} drained: {}", stream, line),
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read process {:?}: {}", stream, e);
                        break;
                    }
                }
            }
            trace!("ChildProcessManager: {:?} draining finished", stream);
        });

        self.output_tasks.push(task);
    }

    /// Spawn the wait task that monitors child process exit
    fn spawn_wait_task(&mut self, mut child: Child) {
        let state = Arc::clone(&self.state);

        let task = tokio::spawn(async move {
            match child.wait().await {
                Ok(exit_status) => info!("Test host exited with status: {}", exit_status),
                Err(e) => error!("Error waiting for test host process: {}", e),
            }

            if let Ok(mut process_state) = state.lock() {
                *process_state = ProcessState::Stopped;
            }
        });

        self.wait_task = Some(task);
    }

    /// Wait for the wait task to observe the exit; false on timeout
    async fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        let Some(task) = self.wait_task.as_mut() else {
            return true;
        };
        match tokio::time::timeout(timeout, task).await {
            Ok(_) => {
                self.wait_task = None;
                true
            }
            Err(_) => false,
        }
    }

    fn abort_output_tasks(&mut self) {
        for task in self.output_tasks.drain(..) {
            task.abort();
        }
    }

    #[cfg(unix)]
    fn signal(pid: u32, mode: StopMode) {
        let signal = match mode {
            StopMode::Graceful => libc::SIGTERM,
            StopMode::Force => libc::SIGKILL,
        };
        // SAFETY: kill(2) has no memory-safety preconditions
        if unsafe { libc::kill(pid as libc::pid_t, signal) } == 0 {
            info!("Sent {:?} signal to process {}", mode, pid);
        }
    }

    #[cfg(not(unix))]
    fn signal(pid: u32, _mode: StopMode) {
        warn!("Process termination for PID {} not implemented on this platform", pid);
    }
}

#[async_trait]
impl ProcessManager for ChildProcessManager {
    type Error = ProcessError;

    async fn start(&mut self) -> Result<(), Self::Error> {
        if self.is_running() {
            return Err(ProcessError::AlreadyStarted);
        }

        info!("Starting process: {} {:?}", self.command, self.args);

        let mut command_builder = Command::new(&self.command);
        command_builder
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(working_dir) = &self.working_directory {
            command_builder.current_dir(working_dir);
        }

        let mut child = command_builder.spawn()?;

        let pid = child.id().ok_or(ProcessError::MissingPid)?;
        info!("Process started with PID: {}", pid);
        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        *self.state.lock().unwrap() = ProcessState::Running { pid };

        if let Some(stdout) = child.stdout.take() {
            self.spawn_output_drain(stdout, OutputStream::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_output_drain(stderr, OutputStream::Stderr);
        }

        self.spawn_wait_task(child);

        Ok(())
    }

    async fn stop(&mut self, mode: StopMode) -> Result<(), Self::Error> {
        let pid = self.get_state().pid().ok_or(ProcessError::NotStarted)?;

        match mode {
            StopMode::Graceful => info!("Gracefully stopping process with PID: {}", pid),
            StopMode::Force => info!("Force killing process with PID: {}", pid),
        }

        Self::signal(pid, mode);
        if !self.wait_for_exit(self.stop_timeout).await {
            if mode == StopMode::Graceful {
                warn!(
                    "Process {} still running after {:?}, killing it",
                    pid, self.stop_timeout
                );
                Self::signal(pid, StopMode::Force);
            }
            if !self.wait_for_exit(self.stop_timeout).await {
                error!("Process {} did not exit after SIGKILL", pid);
            }
        }
        self.abort_output_tasks();

        *self.state.lock().unwrap() = ProcessState::Stopped;

        Ok(())
    }

    fn is_running(&self) -> bool {
        self.get_state().is_running()
    }

    fn kill_sync(&mut self) {
        let Some(pid) = self.get_state().pid() else {
            return;
        };

        info!("Synchronously force killing process with PID: {}", pid);
        Self::signal(pid, StopMode::Force);
        self.abort_output_tasks();

        *self.state.lock().unwrap() = ProcessState::Stopped;
    }
}
