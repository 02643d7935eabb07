//! Server side of the HMR protocol.
//!
//! The engine owns the dependency graph and the client set. It does not walk
//! the graph when a file changes: every change is broadcast as an `update`
//! and clients decide what to re-import based on their own accept boundaries.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::channel::{BroadcastChannel, ClientId, ClientTransport};
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::protocol::HmrMessage;

/// Called with a module id each time the watcher sees a change.
pub type ModuleChangeCallback = Box<dyn Fn(String) + Send + Sync>;

/// A source of module change notifications.
pub trait ModuleEventSource {
    /// Keeps the source alive; dropping it stops notifications.
    type Guard;

    fn register(self, emit: ModuleChangeCallback) -> Result<Self::Guard>;
}

pub type SharedEngine<T> = Arc<Mutex<HmrEngine<T>>>;

pub struct HmrEngine<T> {
    graph: DependencyGraph,
    channel: BroadcastChannel<T>,
}

impl<T> Default for HmrEngine<T> {
    fn default() -> Self {
        Self {
            graph: DependencyGraph::new(),
            channel: BroadcastChannel::default(),
        }
    }
}

impl<T: ClientTransport + 'static> HmrEngine<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared engine subscribed to `watcher`.
    pub fn start<W: ModuleEventSource>(watcher: W) -> Result<(SharedEngine<T>, W::Guard)> {
        let engine = Arc::new(Mutex::new(Self::new()));
        let weak: Weak<Mutex<Self>> = Arc::downgrade(&engine);

        let guard = watcher.register(Box::new(move |id| {
            if let Some(engine) = weak.upgrade() {
                engine.lock().handle_change(&id);
            }
        }))?;

        Ok((engine, guard))
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut DependencyGraph {
        &mut self.graph
    }

    pub fn client_count(&self) -> usize {
        self.channel.len()
    }

    /// Analyzer entry point.
    pub fn set_entry<S: AsRef<str>>(&mut self, id: &str, imports: &[S], hmr_enabled: bool) {
        self.graph.set_entry(id, imports, hmr_enabled);
    }

    pub fn handle_change(&mut self, id: &str) {
        info!(module = id, "module changed");
        self.broadcast_message(&HmrMessage::update(id));
    }

    pub fn reload_all(&mut self) -> usize {
        self.broadcast_message(&HmrMessage::Reload)
    }

    pub fn broadcast_message(&mut self, message: &HmrMessage) -> usize {
        match self.channel.broadcast(message) {
            Ok(delivered) => delivered,
            Err(e) => {
                warn!(error = %e, "failed to encode broadcast");
                0
            }
        }
    }

    pub fn add_client(&mut self, id: ClientId, transport: T) -> bool {
        self.channel.add_client(id, transport)
    }

    pub fn client_opened(&mut self, id: ClientId) -> bool {
        self.channel.client_opened(id)
    }

    pub fn client_closed(&mut self, id: ClientId) {
        if self.channel.remove_client(id).is_some() {
            info!(client = %id, "socket closed");
        }
    }

    pub fn client_error(&mut self, id: ClientId, error: &dyn std::fmt::Display) {
        warn!(client = %id, error = %error, "socket error");
    }

    /// Inbound frame from a client. Frames from clients that never opened
    /// are dropped.
    pub fn handle_inbound(&mut self, id: ClientId, text: &str) {
        if !self.channel.is_connected(id) {
            debug!(client = %id, "dropping frame from unopened client");
            return;
        }
        debug!(client = %id, frame = text, "received message");

        match HmrMessage::from_json(text) {
            Ok(HmrMessage::HotAccept { id: module }) => {
                self.graph.mark_accepted(&module);
            }
            Ok(other) => {
                debug!(client = %id, kind = other.kind(), "ignoring message");
            }
            Err(e) => {
                warn!(client = %id, error = %e, "malformed message");
            }
        }
    }

    pub fn disconnect_all_clients(&mut self) {
        self.channel.disconnect_all();
    }
}
