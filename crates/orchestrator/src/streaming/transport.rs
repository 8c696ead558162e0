//! Delivery adapters
//!
//! The broadcaster only knows client ids. A [`StreamTransport`] maps an id to
//! an actual connection (SSE response, websocket, in-process channel).

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::events::StreamEvent;
use crate::error::TransportError;

const CLIENT_BUFFER: usize = 256;

/// Delivers one event to one client. Must not block on slow clients.
pub trait StreamTransport: Send + Sync {
    fn deliver(&self, client_id: &str, event: &StreamEvent) -> Result<(), TransportError>;
}

/// In-process transport backed by one bounded mpsc channel per client
#[derive(Default)]
pub struct ChannelTransport {
    clients: DashMap<String, mpsc::Sender<StreamEvent>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client and return the receiving end of its stream.
    /// Re-registering replaces the previous channel.
    pub fn connect(&self, client_id: impl Into<String>) -> mpsc::Receiver<StreamEvent> {
        let client_id = client_id.into();
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        self.clients.insert(client_id.clone(), tx);
        tracing::debug!(client_id = %client_id, "Client connected to channel transport");
        rx
    }

    /// [`connect`](Self::connect) as a `Stream`, for SSE bodies and
    /// websocket forwarders
    pub fn connect_stream(&self, client_id: impl Into<String>) -> ReceiverStream<StreamEvent> {
        ReceiverStream::new(self.connect(client_id))
    }

    pub fn disconnect(&self, client_id: &str) {
        self.clients.remove(client_id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

impl StreamTransport for ChannelTransport {
    fn deliver(&self, client_id: &str, event: &StreamEvent) -> Result<(), TransportError> {
        let sender = self
            .clients
            .get(client_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::ClientNotConnected(client_id.to_string()))?;

        match sender.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(client_id = %client_id, "Client stream is full, dropping client");
                self.clients.remove(client_id);
                Err(TransportError::ClientClosed(client_id.to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.clients.remove(client_id);
                Err(TransportError::ClientClosed(client_id.to_string()))
            }
        }
    }
}
