//! Client registry (component B): tracks every open `/cdp/<id>` socket.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::wire::Envelope;

/// A single frame queued for delivery to a client's socket.
#[derive(Debug, Clone)]
pub enum ClientFrame {
    Text(String),
    Binary(Bytes),
    Close { code: u16, reason: String },
}

impl ClientFrame {
    fn byte_len(&self) -> usize {
        match self {
            ClientFrame::Text(s) => s.len(),
            ClientFrame::Binary(b) => b.len(),
            ClientFrame::Close { .. } => 0,
        }
    }
}

/// One connected CDP client.
///
/// `id` is the relay-internal handle used everywhere in routing and
/// bookkeeping. `path_label` is the `<id>` segment of `/cdp/<id>` — per
/// spec it is logging-only and carries no session semantics, so two
/// clients may share the same label.
pub struct ClientHandle {
    pub id: String,
    pub path_label: String,
    tx: mpsc::UnboundedSender<ClientFrame>,
    queued_bytes: Arc<AtomicUsize>,
    backpressure_limit: usize,
    /// Set by a local `Target.setAutoAttach{autoAttach:true}` command.
    pub auto_attach: AtomicBool,
    /// Session ids this client currently observes as attached.
    pub sessions: DashSet<String>,
    /// Monotonic counter incremented once per frame enqueued toward this
    /// client, used to assert delivery ordering in tests.
    seq: AtomicU64,
}

impl ClientHandle {
    pub fn deliver_envelope(&self, envelope: &Envelope) -> Result<()> {
        let text = envelope.to_text()?;
        self.deliver(ClientFrame::Text(text))
    }

    /// Enqueue a frame for this client's writer task. Returns an error if
    /// the client's outbound buffer has exceeded the configured
    /// high-water mark; the caller (the router) is responsible for then
    /// calling [`ClientHandle::fail`].
    pub fn deliver(&self, frame: ClientFrame) -> Result<()> {
        let len = frame.byte_len();
        let buffered = self.queued_bytes.fetch_add(len, Ordering::SeqCst) + len;
        self.seq.fetch_add(1, Ordering::SeqCst);
        if buffered > self.backpressure_limit {
            return Err(Error::internal(format!(
                "client {} exceeded backpressure limit ({buffered} > {})",
                self.id, self.backpressure_limit
            )));
        }
        self.tx
            .send(frame)
            .map_err(|_| Error::client_not_found(self.id.clone()))
    }

    /// Close the client's socket with the given WebSocket close code and reason.
    pub fn fail(&self, code: u16, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(client = %self.id, code, %reason, "failing client connection");
        let _ = self.tx.send(ClientFrame::Close { code, reason });
    }

    /// Called by the writer task once a frame has actually gone out, so
    /// the backpressure accounting reflects the real buffer depth rather
    /// than the queued-but-unsent depth.
    pub fn note_sent(&self, frame: &ClientFrame) {
        self.queued_bytes
            .fetch_sub(frame.byte_len(), Ordering::SeqCst);
    }

    pub fn sequence(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }
}

/// Tracks every live client connection. One registry per relay process.
#[derive(Default)]
pub struct ClientRegistry {
    clients: DashMap<String, Arc<ClientHandle>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    pub fn register(
        &self,
        id: String,
        path_label: String,
        tx: mpsc::UnboundedSender<ClientFrame>,
        backpressure_limit: usize,
    ) -> Arc<ClientHandle> {
        let handle = Arc::new(ClientHandle {
            id: id.clone(),
            path_label,
            tx,
            queued_bytes: Arc::new(AtomicUsize::new(0)),
            backpressure_limit,
            auto_attach: AtomicBool::new(false),
            sessions: DashSet::new(),
            seq: AtomicU64::new(0),
        });
        self.clients.insert(id, handle.clone());
        handle
    }

    pub fn get(&self, id: &str) -> Option<Arc<ClientHandle>> {
        self.clients.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<ClientHandle>> {
        self.clients.remove(id).map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Snapshot of every connected client, for broadcast operations
    /// (target-lifecycle fan-out, shutdown).
    pub fn all(&self) -> Vec<Arc<ClientHandle>> {
        self.clients
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_client() -> (ClientRegistry, Arc<ClientHandle>, mpsc::UnboundedReceiver<ClientFrame>) {
        let registry = ClientRegistry::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = registry.register("c1".to_string(), "42".to_string(), tx, 1024);
        (registry, handle, rx)
    }

    #[test]
    fn register_and_lookup_roundtrip() {
        let (registry, handle, _rx) = registry_with_client();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("c1").unwrap().id, handle.id);
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn remove_drops_client() {
        let (registry, _handle, _rx) = registry_with_client();
        assert!(registry.remove("c1").is_some());
        assert!(registry.get("c1").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn deliver_enforces_backpressure_limit() {
        let registry = ClientRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = registry.register("c1".to_string(), "1".to_string(), tx, 8);

        handle.deliver(ClientFrame::Text("small".to_string())).unwrap();
        let err = handle
            .deliver(ClientFrame::Text("way too big for the buffer".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));

        assert!(rx.recv().await.is_some());
    }

    #[test]
    fn sequence_increments_per_frame() {
        let (_registry, handle, _rx) = registry_with_client();
        handle.deliver(ClientFrame::Text("a".to_string())).unwrap();
        handle.deliver(ClientFrame::Text("b".to_string())).unwrap();
        assert_eq!(handle.sequence(), 2);
    }
}
