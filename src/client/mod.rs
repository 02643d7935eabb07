//! Client runtime: hot contexts, the outbound socket and update handling.
//!
//! Modules call [`HmrRuntime::install_hot_context`] when they evaluate and
//! register accept / dispose callbacks on the returned [`HotContext`]. The
//! connection task in [`remote`] feeds server frames into
//! [`HmrRuntime::handle_message`].

pub mod coordinator;
pub mod loader;
pub mod paths;
pub mod remote;
pub mod socket;
pub mod state;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::Result;

pub use coordinator::{UpdateCoordinator, UpdateOutcome};
pub use loader::{HttpModuleLoader, LoadedModule, ModuleLoader};
pub use paths::{module_id_from_url, resolve_dependency};
pub use remote::connect;
pub use socket::{HmrSocket, SocketSink};
pub use state::{AcceptHandler, AcceptedUpdate, HotContext, ModuleHandle, ModuleRegistry};

/// Performs a full page reload.
pub trait PageReloader: Send + Sync {
    fn reload(&self);
}

/// Reloader for headless runs: there is no page, so just say so.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReloader;

impl PageReloader for LogReloader {
    fn reload(&self) {
        warn!("full reload requested");
    }
}

pub struct HmrRuntime {
    config: ClientConfig,
    registry: ModuleRegistry,
    socket: Arc<HmrSocket>,
    coordinator: UpdateCoordinator,
    reloader: Arc<dyn PageReloader>,
}

impl HmrRuntime {
    pub fn new(
        config: ClientConfig,
        sink: impl SocketSink + 'static,
        loader: Arc<dyn ModuleLoader>,
        reloader: Arc<dyn PageReloader>,
    ) -> Self {
        let registry = ModuleRegistry::new();
        let coordinator = UpdateCoordinator::new(registry.clone(), loader, reloader.clone());
        Self {
            config,
            registry,
            socket: Arc::new(HmrSocket::new(sink)),
            coordinator,
            reloader,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn socket(&self) -> &Arc<HmrSocket> {
        &self.socket
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Hot context for the module at `full_url`.
    ///
    /// Re-evaluating a module gets back its existing, now locked, state.
    pub fn create_hot_context(&self, full_url: &str) -> Result<HotContext> {
        let id = module_id_from_url(full_url)?;
        let (handle, existed) = self.registry.acquire(&id);
        debug!(module = %id, existed, "hot context");
        Ok(HotContext::new(
            id,
            handle,
            self.registry.clone(),
            self.socket.clone(),
            self.reloader.clone(),
        ))
    }

    /// Like [`create_hot_context`](Self::create_hot_context), but only on a
    /// development host. Elsewhere modules get no hot api.
    pub fn install_hot_context(&self, full_url: &str) -> Result<Option<HotContext>> {
        if !self.config.is_dev_host() {
            debug!(origin = %self.config.origin, "not a dev host, hot api disabled");
            return Ok(None);
        }
        self.create_hot_context(full_url).map(Some)
    }

    pub async fn handle_message(&self, text: &str) -> UpdateOutcome {
        self.coordinator.handle_message(text).await
    }
}
