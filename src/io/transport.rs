//! Transport layer - Pure I/O abstraction for message exchange
//!
//! This module provides the core transport abstraction that handles
//! bidirectional byte exchange with the test host without knowledge of
//! message framing or process management.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{error, trace};

// ============================================================================
// Constants
// ============================================================================

/// Size of the read buffer for socket reading operations
const READ_BUFFER_SIZE: usize = 8192;

/// Core transport trait for bidirectional byte exchange
#[async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send a chunk of raw bytes
    async fn send(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Receive the next chunk of raw bytes
    ///
    /// Chunk boundaries carry no meaning; framing is the caller's concern.
    /// Implementations must be cancel-safe: dropping a pending `receive`
    /// must not lose bytes.
    async fn receive(&mut self) -> Result<Vec<u8>, Self::Error>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), Self::Error>;

    /// Check if transport is still active
    fn is_connected(&self) -> bool;
}

// ============================================================================
// Socket Transport Implementation
// ============================================================================

/// Error types for socket transport
#[derive(Debug, thiserror::Error)]
pub enum SocketTransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport is disconnected")]
    Disconnected,

    #[error("Channel error: {0}")]
    Channel(String),
}

/// Transport over the TCP connection the test host opens back to us
#[derive(Debug)]
pub struct SocketTransport {
    /// Channel feeding the writer task
    outbound_sender: Option<mpsc::UnboundedSender<Vec<u8>>>,

    /// Channel fed by the reader task
    inbound_receiver: Option<mpsc::UnboundedReceiver<Vec<u8>>>,

    /// Connection status
    connected: bool,
}

impl SocketTransport {
    /// Create a new SocketTransport from an accepted host connection
    pub fn new(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (outbound_sender, outbound_receiver) = mpsc::unbounded_channel();
        let (inbound_sender, inbound_receiver) = mpsc::unbounded_channel();

        // A single writer task serializes all sends
        tokio::spawn(Self::writer_task(write_half, outbound_receiver));
        tokio::spawn(Self::reader_task(read_half, inbound_sender));

        Self {
            outbound_sender: Some(outbound_sender),
            inbound_receiver: Some(inbound_receiver),
            connected: true,
        }
    }

    /// Background task that writes outbound chunks to the socket
    async fn writer_task(
        mut writer: OwnedWriteHalf,
        mut receiver: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        while let Some(chunk) = receiver.recv().await {
            trace!("SocketTransport: Writing chunk (length: {})", chunk.len());

            if let Err(e) = writer.write_all(&chunk).await {
                error!("Failed to write to test host socket: {}", e);
                break;
            }

            if let Err(e) = writer.flush().await {
                error!("Failed to flush test host socket: {}", e);
                break;
            }
        }

        let _ = writer.shutdown().await;
        trace!("SocketTransport: writer task finished");
    }

    /// Background task that forwards inbound chunks from the socket
    async fn reader_task(mut reader: OwnedReadHalf, sender: mpsc::UnboundedSender<Vec<u8>>) {
        let mut read_buffer = Box::new([0u8; READ_BUFFER_SIZE]);

        loop {
            match reader.read(read_buffer.as_mut()).await {
                Ok(0) => {
                    trace!("SocketTransport: test host closed the connection");
                    break;
                }
                Ok(n) => {
                    if sender.send(read_buffer[..n].to_vec()).is_err() {
                        trace!("SocketTransport: inbound receiver dropped, stopping reader");
                        return;
                    }
                }
                Err(e) => {
                    error!("Failed to read from test host socket: {}", e);
                    break;
                }
            }
        }

        trace!("SocketTransport: reader task finished");
    }
}

#[async_trait]
impl Transport for SocketTransport {
    type Error = SocketTransportError;

    async fn send(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(SocketTransportError::Disconnected);
        }

        let sender = self
            .outbound_sender
            .as_ref()
            .ok_or(SocketTransportError::Disconnected)?;

        sender
            .send(bytes.to_vec())
            .map_err(|e| SocketTransportError::Channel(e.to_string()))?;

        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>, Self::Error> {
        if !self.connected {
            return Err(SocketTransportError::Disconnected);
        }

        let receiver = self
            .inbound_receiver
            .as_mut()
            .ok_or(SocketTransportError::Disconnected)?;

        match receiver.recv().await {
            Some(chunk) => Ok(chunk),
            None => {
                self.connected = false;
                Err(SocketTransportError::Disconnected)
            }
        }
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        self.outbound_sender.take();
        self.inbound_receiver.take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Mock Transport Implementation
// ============================================================================

/// Error type for mock transport
#[derive(Debug, thiserror::Error)]
pub enum MockTransportError {
    #[error("Transport is disconnected")]
    Disconnected,
    #[error("No more responses available")]
    NoMoreResponses,
    #[error("Send rejected")]
    SendRejected,
}

/// Mock transport for testing - records sent chunks and replays responses
pub struct MockTransport {
    /// Chunks that were sent via this transport
    sent: Arc<Mutex<Vec<Vec<u8>>>>,

    /// Predefined chunks to return when receive() is called
    responses: Arc<Mutex<VecDeque<Vec<u8>>>>,

    /// When set, receive() waits forever once responses run out
    hang_when_empty: bool,

    /// When set, every send() fails
    reject_sends: bool,

    /// Connection status
    connected: bool,
}

/// Shared view of a [`MockTransport`] that survives moving the transport
/// into a session
#[derive(Clone)]
pub struct MockTransportHandle {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    responses: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            hang_when_empty: false,
            reject_sends: false,
            connected: true,
        }
    }

    /// Create a mock transport with predefined response chunks
    pub fn with_responses(responses: Vec<Vec<u8>>) -> Self {
        let transport = Self::new();
        transport.responses.lock().unwrap().extend(responses);
        transport
    }

    /// Make receive() pend instead of failing once responses are exhausted
    pub fn hang_when_empty(mut self) -> Self {
        self.hang_when_empty = true;
        self
    }

    /// Make every send() fail
    pub fn reject_sends(mut self) -> Self {
        self.reject_sends = true;
        self
    }

    /// Get a handle for inspecting traffic after the transport is moved
    pub fn handle(&self) -> MockTransportHandle {
        MockTransportHandle {
            sent: Arc::clone(&self.sent),
            responses: Arc::clone(&self.responses),
        }
    }

    /// Get all chunks that were sent via this transport
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

impl MockTransportHandle {
    /// Get all chunks that were sent via the transport
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    /// Queue another response chunk
    pub fn push_response(&self, chunk: Vec<u8>) {
        self.responses.lock().unwrap().push_back(chunk);
    }

    /// Check if there are more responses available
    pub fn has_responses(&self) -> bool {
        !self.responses.lock().unwrap().is_empty()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn send(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(MockTransportError::Disconnected);
        }
        if self.reject_sends {
            return Err(MockTransportError::SendRejected);
        }

        self.sent.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>, Self::Error> {
        if !self.connected {
            return Err(MockTransportError::Disconnected);
        }

        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(chunk) => Ok(chunk),
            None if self.hang_when_empty => std::future::pending().await,
            None => Err(MockTransportError::NoMoreResponses),
        }
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Tests
// ============================================================================
