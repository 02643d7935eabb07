//! Connected-client bookkeeping and message fan-out.

use ahash::AHashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::protocol::HmrMessage;

pub type ClientId = Uuid;

/// The server's view of one client connection.
pub trait ClientTransport: Send {
    fn is_open(&self) -> bool;

    fn send_text(&self, text: String) -> Result<()>;

    fn close(&self);
}

/// Clients are tracked once their transport is open. Clients that were added
/// before opening wait in `pending` until [`BroadcastChannel::client_opened`].
pub struct BroadcastChannel<T> {
    clients: AHashMap<ClientId, T>,
    pending: AHashMap<ClientId, T>,
}

impl<T> Default for BroadcastChannel<T> {
    fn default() -> Self {
        Self {
            clients: AHashMap::new(),
            pending: AHashMap::new(),
        }
    }
}

impl<T: ClientTransport> BroadcastChannel<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the client was tracked immediately.
    pub fn add_client(&mut self, id: ClientId, transport: T) -> bool {
        if transport.is_open() {
            self.connect(id, transport);
            true
        } else {
            debug!(client = %id, "client waiting for open");
            self.pending.insert(id, transport);
            false
        }
    }

    /// Open event for a client added while still connecting.
    pub fn client_opened(&mut self, id: ClientId) -> bool {
        match self.pending.remove(&id) {
            Some(transport) => {
                self.connect(id, transport);
                true
            }
            None => self.clients.contains_key(&id),
        }
    }

    fn connect(&mut self, id: ClientId, transport: T) {
        info!(client = %id, "client connected");
        self.clients.insert(id, transport);
    }

    /// Close event: forget the client without touching its transport.
    pub fn remove_client(&mut self, id: ClientId) -> Option<T> {
        self.pending.remove(&id);
        self.clients.remove(&id)
    }

    pub fn is_connected(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Send `message` to every open client and evict the rest.
    ///
    /// Returns the number of clients the frame was handed to.
    pub fn broadcast(&mut self, message: &HmrMessage) -> Result<usize> {
        let text = message.to_json()?;
        debug!(kind = message.kind(), clients = self.clients.len(), "broadcast");

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, transport) in &self.clients {
            if !transport.is_open() {
                dead.push(*id);
                continue;
            }
            match transport.send_text(text.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(client = %id, error = %e, "send failed");
                    dead.push(*id);
                }
            }
        }

        for id in dead {
            self.disconnect_client(id);
        }
        Ok(delivered)
    }

    pub fn disconnect_client(&mut self, id: ClientId) {
        if let Some(transport) = self.clients.remove(&id) {
            info!(client = %id, "disconnecting client");
            transport.close();
        }
    }

    pub fn disconnect_all(&mut self) {
        let ids: Vec<ClientId> = self.clients.keys().copied().collect();
        for id in ids {
            self.disconnect_client(id);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::HmrError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// In-memory transport recording every frame it was asked to send.
    #[derive(Clone, Default)]
    pub(crate) struct MockTransport {
        pub open: Arc<AtomicBool>,
        pub sent: Arc<Mutex<Vec<String>>>,
        pub closes: Arc<AtomicUsize>,
        pub fail_sends: Arc<AtomicBool>,
    }

    impl MockTransport {
        pub fn open() -> Self {
            let transport = Self::default();
            transport.open.store(true, Ordering::SeqCst);
            transport
        }

        pub fn frames(&self) -> Vec<String> {
            self.sent.lock().clone()
        }
    }

    impl ClientTransport for MockTransport {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn send_text(&self, text: String) -> Result<()> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(HmrError::TransportClosed);
            }
            self.sent.lock().push(text);
            Ok(())
        }

        fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_broadcast_delivers_to_open_and_evicts_closed() {
        let mut channel = BroadcastChannel::new();
        let alive = MockTransport::open();
        let dead = MockTransport::open();
        let alive_id = Uuid::new_v4();
        let dead_id = Uuid::new_v4();
        channel.add_client(alive_id, alive.clone());
        channel.add_client(dead_id, dead.clone());

        dead.open.store(false, Ordering::SeqCst);
        let delivered = channel.broadcast(&HmrMessage::update("/a.js")).unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(alive.frames(), vec![r#"{"type":"update","url":"/a.js"}"#]);
        assert!(dead.frames().is_empty());
        assert_eq!(dead.closes.load(Ordering::SeqCst), 1);
        assert!(!channel.is_connected(dead_id));

        // evicted clients are never retried
        dead.open.store(true, Ordering::SeqCst);
        channel.broadcast(&HmrMessage::Reload).unwrap();
        assert!(dead.frames().is_empty());
        assert_eq!(alive.frames().len(), 2);
    }

    #[test]
    fn test_failed_send_evicts() {
        let mut channel = BroadcastChannel::new();
        let flaky = MockTransport::open();
        flaky.fail_sends.store(true, Ordering::SeqCst);
        let id = Uuid::new_v4();
        channel.add_client(id, flaky.clone());

        assert_eq!(channel.broadcast(&HmrMessage::Reload).unwrap(), 0);
        assert!(channel.is_empty());
        assert_eq!(flaky.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pending_clients_wait_for_open() {
        let mut channel = BroadcastChannel::new();
        let transport = MockTransport::default();
        let id = Uuid::new_v4();

        assert!(!channel.add_client(id, transport.clone()));
        assert!(!channel.is_connected(id));
        channel.broadcast(&HmrMessage::Reload).unwrap();
        assert!(transport.frames().is_empty());

        transport.open.store(true, Ordering::SeqCst);
        assert!(channel.client_opened(id));
        assert!(channel.is_connected(id));
        assert_eq!(channel.broadcast(&HmrMessage::Reload).unwrap(), 1);
    }

    #[test]
    fn test_remove_and_disconnect_all() {
        let mut channel = BroadcastChannel::new();
        let a = MockTransport::open();
        let b = MockTransport::open();
        let a_id = Uuid::new_v4();
        channel.add_client(a_id, a.clone());
        channel.add_client(Uuid::new_v4(), b.clone());

        assert!(channel.remove_client(a_id).is_some());
        assert_eq!(a.closes.load(Ordering::SeqCst), 0);
        assert_eq!(channel.len(), 1);

        channel.disconnect_all();
        assert!(channel.is_empty());
        assert_eq!(b.closes.load(Ordering::SeqCst), 1);
    }
}
