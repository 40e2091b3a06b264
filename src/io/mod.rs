//! I/O layer - Generic abstractions for process management and transport
//!
//! - **Transport**: Pure byte exchange with the test host
//! - **Process**: Test host process lifecycle with output draining
//!
//! Neither knows anything about message framing or the host protocol.

pub mod process;
pub mod transport;

pub use process::{
    ChildProcessManager, OutputStream, ProcessError, ProcessManager, ProcessState, StopMode,
};
pub use transport::{MockTransport, MockTransportHandle, SocketTransport, Transport};
