use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use testhost_session::host::{HostConfigBuilder, HostLauncher};
use testhost_session::logging::{LogConfig, init_logging};
use testhost_session::{EventEmitter, TestFramework, TracingEmitter};

/// CLI arguments for the test host client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the test project file (defaults to current directory)
    #[arg(long, value_name = "DIR")]
    project: Option<PathBuf>,

    /// Path to the dotnet executable
    #[arg(long, value_name = "PATH", env = "DOTNET_PATH", default_value = "dotnet")]
    dotnet_path: String,

    /// Test assembly (resolved from the project file when omitted)
    #[arg(long, value_name = "FILE")]
    target_path: Option<PathBuf>,

    /// Use the existing build output instead of building first
    #[arg(long)]
    no_build: bool,

    /// Seconds the test host has to connect back
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    connection_timeout: u64,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides TESTHOST_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Tests to operate on
#[derive(clap::Args, Debug)]
struct Selection {
    /// Fully-qualified test method name, without parameters
    method: String,

    /// Test framework: xunit, nunit or mstest
    #[arg(long, default_value = "xunit")]
    framework: String,

    /// Target framework moniker, e.g. net8.0
    #[arg(long, value_name = "TFM")]
    target_framework: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the test cases of a method
    Discover(Selection),
    /// Run the test cases of a method
    Run(Selection),
    /// Print how to start the test runner for a method
    RunInfo(Selection),
    /// Print how to start the test runner under a debugger
    DebugInfo(Selection),
    /// Report a debugger-launched test host and wait for it to finish
    DebugLaunch,
    /// List the supported test frameworks
    Frameworks,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_config = LogConfig::from_env().with_overrides(args.log_level, args.log_file);
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    if let Command::Frameworks = args.command {
        print_json(&TestFramework::all())?;
        return Ok(());
    }

    let project_directory = match args.project {
        Some(project) => project,
        None => std::env::current_dir()?,
    };

    let mut builder = HostConfigBuilder::new()
        .dotnet_path(args.dotnet_path)
        .project_directory(project_directory)
        .connection_timeout(Duration::from_secs(args.connection_timeout));
    if let Some(target_path) = args.target_path {
        builder = builder.target_path(target_path);
    }
    let config = builder.build()?;
    info!("Using test assembly {}", config.target_path.display());

    let emitter: Arc<dyn EventEmitter> = Arc::new(TracingEmitter);
    let launcher = HostLauncher::new(config, emitter);
    let mut session = launcher.prepare_and_start(args.no_build).await?;

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling");
            interrupt.cancel();
        }
    });

    let mut passed = true;
    match args.command {
        Command::Discover(selection) => {
            let cases = session
                .discover_with_cancellation(
                    &selection.method,
                    selection.target_framework.as_deref(),
                    &token,
                )
                .await?;
            print_json(&cases)?;
        }
        Command::Run(selection) => {
            let result = session
                .run_selected_with_cancellation(
                    &selection.method,
                    &selection.framework,
                    selection.target_framework.as_deref(),
                    &token,
                )
                .await?;
            passed = result.pass;
            print_json(&result)?;
        }
        Command::RunInfo(selection) => {
            let info = session
                .get_run_start_info(
                    &selection.method,
                    &selection.framework,
                    selection.target_framework.as_deref(),
                )
                .await?;
            print_json(&info)?;
        }
        Command::DebugInfo(selection) => {
            let info = session
                .get_debug_start_info(
                    &selection.method,
                    &selection.framework,
                    selection.target_framework.as_deref(),
                )
                .await?;
            print_json(&info)?;
        }
        Command::DebugLaunch => session.debug_launch(&token).await?,
        Command::Frameworks => {}
    }

    session.close().await?;

    if !passed {
        std::process::exit(1);
    }
    Ok(())
}
