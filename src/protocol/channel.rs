//! Message channel - JSON envelopes over framed transport
//!
//! Sits between the framing layer and the session: serializes outbound
//! envelopes, parses inbound ones, and races reads against cancellation.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{Level, trace};

use crate::io::transport::Transport;
use crate::log_host_message;
use crate::protocol::framing::{FrameCodecError, FramingError, MessageFraming};
use crate::protocol::message::{Message, MessageType};

/// Errors raised by the message channel
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Framing error: {0}")]
    Framing(#[from] FrameCodecError),

    #[error("Serialization error: {0}")]
    Serialization(serde_json::Error),

    #[error("Malformed message envelope: {0}")]
    Deserialization(serde_json::Error),
}

impl<E: std::error::Error + Send + Sync + 'static> From<FramingError<E>> for ChannelError {
    fn from(error: FramingError<E>) -> Self {
        match error {
            FramingError::Transport(e) => ChannelError::Transport(e.to_string()),
            FramingError::Codec(e) => ChannelError::Framing(e),
        }
    }
}

/// Typed message exchange with the test host
pub struct MessageChannel<T: Transport> {
    framing: MessageFraming<T>,
}

impl<T: Transport> MessageChannel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            framing: MessageFraming::new(transport),
        }
    }

    /// Send a message with an optional payload
    pub async fn send<P: Serialize>(
        &mut self,
        message_type: MessageType,
        payload: Option<&P>,
    ) -> Result<(), ChannelError> {
        let payload = payload
            .map(serde_json::to_value)
            .transpose()
            .map_err(ChannelError::Serialization)?;
        self.send_message(&Message::new(message_type, payload)).await
    }

    pub async fn send_message(&mut self, message: &Message) -> Result<(), ChannelError> {
        let text = serde_json::to_string(message).map_err(ChannelError::Serialization)?;
        log_host_message!(Level::DEBUG, "send", message.message_type, text.len());
        self.framing.send_frame(&text).await?;
        Ok(())
    }

    /// Receive the next message
    pub async fn receive(&mut self) -> Result<Message, ChannelError> {
        let text = self.framing.receive_frame().await?;
        let message: Message =
            serde_json::from_str(&text).map_err(ChannelError::Deserialization)?;
        log_host_message!(Level::DEBUG, "receive", message.message_type, text.len());
        Ok(message)
    }

    /// Receive the next message unless `token` fires first
    ///
    /// Returns `Ok(None)` on cancellation. A frame that was partially read
    /// stays buffered for the next call.
    pub async fn receive_cancellable(
        &mut self,
        token: &CancellationToken,
    ) -> Result<Option<Message>, ChannelError> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                trace!("MessageChannel: receive cancelled");
                Ok(None)
            }
            message = self.receive() => message.map(Some),
        }
    }

    pub async fn close(&mut self) -> Result<(), ChannelError> {
        self.framing.close().await?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.framing.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::transport::MockTransport;
    use bytes::BytesMut;
    use serde_json::json;
    use tokio_util::codec::Encoder;

    fn framed(text: &str) -> Vec<u8> {
        let mut dst = BytesMut::new();
        crate::protocol::framing::FrameCodec::new()
            .encode(text, &mut dst)
            .unwrap();
        dst.to_vec()
    }

    #[tokio::test]
    async fn test_send_wraps_payload_in_envelope() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let mut channel = MessageChannel::new(transport);

        channel
            .send(MessageType::VersionCheck, Some(&1))
            .await
            .unwrap();

        assert_eq!(
            handle.sent(),
            vec![framed(r#"{"MessageType":"ProtocolVersion","Payload":1}"#)]
        );
    }

    #[tokio::test]
    async fn test_receive_parses_envelope() {
        let transport = MockTransport::with_responses(vec![framed(
            r#"{"MessageType":"TestDiscovery.Completed","Payload":{"TotalTests":3}}"#,
        )]);
        let mut channel = MessageChannel::new(transport);

        let message = channel.receive().await.unwrap();
        assert_eq!(message.message_type, MessageType::DiscoveryComplete);
        assert_eq!(message.payload, Some(json!({"TotalTests": 3})));
    }

    #[tokio::test]
    async fn test_receive_rejects_malformed_envelope() {
        let transport = MockTransport::with_responses(vec![framed("not json")]);
        let mut channel = MessageChannel::new(transport);

        assert!(matches!(
            channel.receive().await,
            Err(ChannelError::Deserialization(_))
        ));
    }

    #[tokio::test]
    async fn test_receive_cancellable_returns_none_when_cancelled() {
        let transport = MockTransport::new().hang_when_empty();
        let mut channel = MessageChannel::new(transport);
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            canceller.cancel();
        });

        assert!(channel.receive_cancellable(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_transport_surfaces_as_transport_error() {
        let mut channel = MessageChannel::new(MockTransport::new());
        channel.close().await.unwrap();
        assert!(!channel.is_connected());
        assert!(matches!(
            channel.receive().await,
            Err(ChannelError::Transport(_))
        ));
    }
}
