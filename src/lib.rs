//! Client for the VSTest test host protocol
//!
//! Builds a .NET test project, launches the test host, and drives
//! discovery, runner start info, debug launch and test runs over the
//! host's length-prefixed JSON protocol.

pub mod diagnostics;
pub mod frameworks;
pub mod host;
pub mod io;
pub mod logging;
pub mod protocol;
pub mod session;

#[cfg(test)]
mod test_utils;

pub use diagnostics::{DiagnosticLevel, EventEmitter, TracingEmitter};
pub use frameworks::TestFramework;
pub use host::{HostConfig, HostConfigBuilder, HostError, HostLauncher};
pub use session::{RunTestsResult, SessionError, SessionState, StartInfo, TestSession};
