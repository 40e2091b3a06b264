//! Test host protocol session
//!
//! # Architecture
//!
//! - **TestSession**: owns the channel to one host and runs one operation at a time
//! - **Folds**: pure per-operation accumulators over decoded host events
//! - **State**: explicit lifecycle with a single in-flight operation guard
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut session = TestSession::new(transport, "bin/Debug/net8.0/Tests.dll", emitter);
//! session.negotiate_version().await?;
//!
//! let result = session.run_selected("Ns.Calc.Add", "xunit", Some("net8.0")).await?;
//! println!("passed: {}", result.pass);
//!
//! session.close().await?;
//! ```

pub mod error;
pub mod fold;
pub mod results;
pub mod state;
pub mod test_session;

#[cfg(test)]
pub mod testing;

pub use crate::session::error::SessionError;
pub use crate::session::fold::{EventFold, Flow, FoldOutcome, fold_events};
pub use crate::session::results::{RunTestsResult, StartInfo, TestOutcomeRecord};
pub use crate::session::state::SessionState;
pub use crate::session::test_session::{TestSession, run_event_loop};
