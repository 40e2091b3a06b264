//! Building the test project before the host is launched
//!
//! Build output is streamed to the emitter line by line while the build
//! runs: stdout as informational, stderr as error diagnostics.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{Level, debug, error, info, warn};

use crate::diagnostics::{DiagnosticLevel, EventEmitter};
use crate::host::config::HostConfig;
use crate::host::version::{BuildToolVersion, BuildToolVersionError};
use crate::io::process::read_line_lossy;
use crate::log_timing;

/// The build tool executable plus any fixed leading arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTool {
    program: String,
    base_args: Vec<String>,
}

impl BuildTool {
    pub fn new(program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Full argument list for one invocation
    pub fn arguments<S: AsRef<str>>(&self, args: &[S]) -> Vec<String> {
        self.base_args
            .iter()
            .cloned()
            .chain(args.iter().map(|arg| arg.as_ref().to_string()))
            .collect()
    }

    pub fn command<S: AsRef<str>>(&self, args: &[S]) -> Command {
        let mut command = Command::new(&self.program);
        command.args(self.arguments(args)).stdin(Stdio::null());
        command
    }

    pub async fn version(&self) -> Result<BuildToolVersion, BuildToolVersionError> {
        BuildToolVersion::detect(self).await
    }
}

/// Arguments of the build command for a tool of the given version
pub fn build_arguments(version: Option<&BuildToolVersion>) -> Vec<String> {
    let mut args = vec!["build".to_string()];
    if version.is_some_and(BuildToolVersion::supports_no_restore) {
        args.push("--no-restore".to_string());
    }
    args
}

/// Builds the project and checks that the test assembly was produced
pub struct ProjectBuilder {
    tool: BuildTool,
    project_directory: PathBuf,
    target_path: PathBuf,
    emitter: Arc<dyn EventEmitter>,
}

impl ProjectBuilder {
    pub fn new(config: &HostConfig, emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            tool: config.build_tool(),
            project_directory: config.project_directory.clone(),
            target_path: config.target_path.clone(),
            emitter,
        }
    }

    /// Build the project, forwarding output as it arrives
    ///
    /// Returns true only if the build exits with 0 and the test assembly
    /// exists afterwards.
    pub async fn prepare_host(&self) -> bool {
        let started = Instant::now();

        let version = match self.tool.version().await {
            Ok(version) => {
                debug!("Build tool version {}", version);
                Some(version)
            }
            Err(e) => {
                warn!("Could not detect build tool version: {}", e);
                self.emitter.emit_message(
                    DiagnosticLevel::Error,
                    &format!("Could not detect {} version: {}", self.tool.program(), e),
                );
                None
            }
        };

        let args = build_arguments(version.as_ref());
        info!(
            "Building {} with: {} {}",
            self.project_directory.display(),
            self.tool.program(),
            self.tool.arguments(&args).join(" ")
        );

        let succeeded = self.run_build(&args).await;
        log_timing!(Level::INFO, "prepare_host", started.elapsed());
        succeeded
    }

    async fn run_build(&self, args: &[String]) -> bool {
        let mut command = self.tool.command(args);
        command
            .current_dir(&self.project_directory)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to start build: {}", e);
                self.emitter.emit_message(
                    DiagnosticLevel::Error,
                    &format!("Failed to start {}: {}", self.tool.program(), e),
                );
                return false;
            }
        };

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(
                stdout,
                DiagnosticLevel::Informational,
                Arc::clone(&self.emitter),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(
                stderr,
                DiagnosticLevel::Error,
                Arc::clone(&self.emitter),
            ));
        }

        let status = child.wait().await;
        for reader in readers {
            if let Err(e) = reader.await {
                warn!("Build output reader failed: {}", e);
            }
        }

        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                error!("Build failed with {}", status);
                self.emitter.emit_message(
                    DiagnosticLevel::Error,
                    &format!("Build failed with {status}"),
                );
                return false;
            }
            Err(e) => {
                error!("Failed to wait for build: {}", e);
                self.emitter
                    .emit_message(DiagnosticLevel::Error, &format!("Build did not finish: {e}"));
                return false;
            }
        }

        if !self.target_path.exists() {
            error!(
                "Build succeeded but {} does not exist",
                self.target_path.display()
            );
            self.emitter.emit_message(
                DiagnosticLevel::Error,
                &format!("Test assembly not found: {}", self.target_path.display()),
            );
            return false;
        }

        info!("Build produced {}", self.target_path.display());
        true
    }
}

/// Forward every line of `pipe` to the emitter at `level`
///
/// Keeps reading through undecodable bytes so the build never sees a
/// closed pipe.
fn forward_lines<R>(
    pipe: R,
    level: DiagnosticLevel,
    emitter: Arc<dyn EventEmitter>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            match read_line_lossy(&mut reader, &mut buf).await {
                Ok(Some(line)) => emitter.emit_message(level, &line),
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read build output: {}", e);
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{ChannelEmitter, DiagnosticEvent, drain_events};
    use crate::host::config::HostConfigBuilder;
    use std::path::Path;
    use tempfile::TempDir;

    /// A fake build tool: `sh -c <script> sh <args...>`
    fn builder(
        dir: &Path,
        script: &str,
    ) -> (ProjectBuilder, tokio::sync::mpsc::UnboundedReceiver<DiagnosticEvent>) {
        let config = HostConfigBuilder::new()
            .dotnet_path("sh")
            .base_args(["-c", script, "sh"])
            .project_directory(dir)
            .target_path(dir.join("bin/Tests.dll"))
            .build()
            .unwrap();
        let (emitter, events) = ChannelEmitter::new();
        (ProjectBuilder::new(&config, Arc::new(emitter)), events)
    }

    fn messages(events: &[DiagnosticEvent], wanted: DiagnosticLevel) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                DiagnosticEvent::Message { level, text } if *level == wanted => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    const FAKE_TOOL: &str = r#"
if [ "$1" = "--version" ]; then echo 8.0.100; exit 0; fi
echo "args: $*"
echo "warning CS0168" >&2
mkdir -p bin && touch bin/Tests.dll
"#;

    #[test]
    fn test_build_arguments() {
        let modern = BuildToolVersion::parse("2.0.0").unwrap();
        let legacy = BuildToolVersion::parse("1.9.9").unwrap();
        assert_eq!(build_arguments(Some(&modern)), vec!["build", "--no-restore"]);
        assert_eq!(build_arguments(Some(&legacy)), vec!["build"]);
        assert_eq!(build_arguments(None), vec!["build"]);
    }

    #[tokio::test]
    async fn test_successful_build_forwards_output() {
        let temp_dir = TempDir::new().unwrap();
        let (builder, mut events) = builder(temp_dir.path(), FAKE_TOOL);

        assert!(builder.prepare_host().await);

        let events = drain_events(&mut events);
        assert_eq!(
            messages(&events, DiagnosticLevel::Informational),
            vec!["args: build --no-restore"]
        );
        assert_eq!(
            messages(&events, DiagnosticLevel::Error),
            vec!["warning CS0168"]
        );
    }

    #[tokio::test]
    async fn test_undecodable_output_keeps_build_alive() {
        let temp_dir = TempDir::new().unwrap();
        let (builder, mut events) = builder(
            temp_dir.path(),
            r#"if [ "$1" = "--version" ]; then echo 8.0.100; exit 0; fi
printf 'Erstellung \351rfolgreich\n'
i=0; while [ $i -lt 4000 ]; do echo "line $i"; i=$((i+1)); done
mkdir -p bin && touch bin/Tests.dll"#,
        );

        assert!(builder.prepare_host().await);
        let output = messages(&drain_events(&mut events), DiagnosticLevel::Informational);
        assert_eq!(output.len(), 4001);
        assert_eq!(output[0], "Erstellung \u{FFFD}rfolgreich");
        assert_eq!(output[4000], "line 3999");
    }

    #[tokio::test]
    async fn test_missing_artifact_fails() {
        let temp_dir = TempDir::new().unwrap();
        let (builder, mut events) = builder(
            temp_dir.path(),
            r#"if [ "$1" = "--version" ]; then echo 8.0.100; fi; exit 0"#,
        );

        assert!(!builder.prepare_host().await);
        let errors = messages(&drain_events(&mut events), DiagnosticLevel::Error);
        assert!(errors.iter().any(|e| e.starts_with("Test assembly not found")));
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_even_with_artifact() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("bin")).unwrap();
        std::fs::write(temp_dir.path().join("bin/Tests.dll"), "").unwrap();
        let (builder, mut events) = builder(
            temp_dir.path(),
            r#"if [ "$1" = "--version" ]; then echo 8.0.100; exit 0; fi; echo "error CS1002" >&2; exit 1"#,
        );

        assert!(!builder.prepare_host().await);
        let errors = messages(&drain_events(&mut events), DiagnosticLevel::Error);
        assert!(errors.contains(&"error CS1002".to_string()));
    }

    #[tokio::test]
    async fn test_version_failure_still_builds_without_no_restore() {
        let temp_dir = TempDir::new().unwrap();
        let (builder, mut events) = builder(
            temp_dir.path(),
            r#"if [ "$1" = "--version" ]; then exit 3; fi; echo "args: $*"; mkdir -p bin && touch bin/Tests.dll"#,
        );

        assert!(builder.prepare_host().await);
        let events = drain_events(&mut events);
        assert_eq!(
            messages(&events, DiagnosticLevel::Informational),
            vec!["args: build"]
        );
        assert_eq!(messages(&events, DiagnosticLevel::Error).len(), 1);
    }

    #[tokio::test]
    async fn test_unstartable_tool_fails() {
        let temp_dir = TempDir::new().unwrap();
        let config = HostConfigBuilder::new()
            .dotnet_path("/nonexistent/dotnet")
            .project_directory(temp_dir.path())
            .target_path(temp_dir.path().join("Tests.dll"))
            .build()
            .unwrap();
        let (emitter, mut events) = ChannelEmitter::new();
        let builder = ProjectBuilder::new(&config, Arc::new(emitter));

        assert!(!builder.prepare_host().await);
        assert!(!drain_events(&mut events).is_empty());
    }
}
