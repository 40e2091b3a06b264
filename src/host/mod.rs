//! Host preparation and launch
//!
//! - **Config**: build tool, project directory, test assembly, timeouts
//! - **Project**: project file discovery and build output location
//! - **Build**: version-aware `build` with streamed output
//! - **Launcher**: starts the host on a loopback port and binds a session

pub mod build;
pub mod config;
pub mod error;
pub mod launcher;
pub mod project;
pub mod version;

pub use build::{BuildTool, ProjectBuilder, build_arguments};
pub use config::{HostConfig, HostConfigBuilder};
pub use error::{HostConfigError, HostError, ProjectError};
pub use launcher::{HostLauncher, host_arguments};
pub use project::ProjectInfo;
pub use version::{BuildToolVersion, BuildToolVersionError};
