//! Applies inbound `update` / `reload` messages to the module registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::try_join_all;
use tracing::{debug, error, info, warn};

use super::loader::ModuleLoader;
use super::state::{AcceptedUpdate, ModuleRegistry};
use super::PageReloader;
use crate::error::{HmrError, Result};
use crate::protocol::HmrMessage;

/// What handling one inbound frame led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Empty, malformed or unrecognized frame
    Ignored,
    /// The module was hot-updated in place
    HotUpdated(String),
    /// A full reload was requested
    FullReload,
}

pub struct UpdateCoordinator {
    registry: ModuleRegistry,
    loader: Arc<dyn ModuleLoader>,
    reloader: Arc<dyn PageReloader>,
    last_generation: AtomicU64,
}

impl UpdateCoordinator {
    pub fn new(
        registry: ModuleRegistry,
        loader: Arc<dyn ModuleLoader>,
        reloader: Arc<dyn PageReloader>,
    ) -> Self {
        Self {
            registry,
            loader,
            reloader,
            last_generation: AtomicU64::new(0),
        }
    }

    pub async fn handle_message(&self, text: &str) -> UpdateOutcome {
        if text.is_empty() {
            return UpdateOutcome::Ignored;
        }
        let message = match HmrMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "ignoring malformed message");
                return UpdateOutcome::Ignored;
            }
        };
        debug!(kind = message.kind(), "message");

        match message {
            HmrMessage::Reload => {
                info!("message: reload");
                self.full_reload()
            }
            HmrMessage::Update { url } => {
                debug!(module = %url, registered = ?self.registry.ids(), "message: update");
                match self.apply_update(&url).await {
                    Ok(true) => {
                        info!(module = %url, "hot updated");
                        UpdateOutcome::HotUpdated(url)
                    }
                    Ok(false) => self.full_reload(),
                    Err(e) => {
                        error!(module = %url, error = %e, "hot update failed");
                        self.full_reload()
                    }
                }
            }
            HmrMessage::HotAccept { .. } | HmrMessage::Unknown => {
                debug!(frame = text, "message: unknown");
                UpdateOutcome::Ignored
            }
        }
    }

    /// Dispose, re-import and re-accept `id`.
    ///
    /// `Ok(false)` means the module cannot be hot-updated (never registered,
    /// or declined) and the caller must reload.
    pub async fn apply_update(&self, id: &str) -> Result<bool> {
        let Some(handle) = self.registry.lookup(id) else {
            return Ok(false);
        };
        let Some(plan) = self.registry.with_state(handle, |state| state.begin_update()) else {
            return Ok(false);
        };

        for dispose in plan.disposers {
            dispose().map_err(|source| HmrError::Callback {
                id: id.to_string(),
                source,
            })?;
        }

        let generation = self.next_generation();
        for entry in plan.entries {
            let loads = std::iter::once(id)
                .chain(entry.deps.iter().map(String::as_str))
                .map(|module| self.loader.load(module, generation));
            let mut modules = try_join_all(loads).await?;
            let module = modules.remove(0);

            entry
                .handler
                .invoke(AcceptedUpdate {
                    module,
                    deps: modules,
                })
                .map_err(|source| HmrError::Callback {
                    id: id.to_string(),
                    source,
                })?;
        }

        Ok(true)
    }

    fn full_reload(&self) -> UpdateOutcome {
        self.reloader.reload();
        UpdateOutcome::FullReload
    }

    /// Millisecond timestamp, bumped when needed so it strictly increases.
    fn next_generation(&self) -> u64 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let mut last = self.last_generation.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self.last_generation.compare_exchange_weak(
                last,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{CountingReloader, StaticLoader};

    fn coordinator() -> (UpdateCoordinator, ModuleRegistry, Arc<CountingReloader>) {
        let registry = ModuleRegistry::new();
        let reloader = Arc::new(CountingReloader::default());
        let coordinator = UpdateCoordinator::new(
            registry.clone(),
            Arc::new(StaticLoader::default()),
            reloader.clone(),
        );
        (coordinator, registry, reloader)
    }

    #[test]
    fn test_generations_strictly_increase() {
        let (coordinator, _, _) = coordinator();
        let a = coordinator.next_generation();
        let b = coordinator.next_generation();
        let c = coordinator.next_generation();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_unregistered_module_reloads() {
        let (coordinator, _, reloader) = coordinator();
        assert!(!coordinator.apply_update("/nope.js").await.unwrap());

        let outcome = coordinator
            .handle_message(r#"{"type":"update","url":"/nope.js"}"#)
            .await;
        assert_eq!(outcome, UpdateOutcome::FullReload);
        assert_eq!(reloader.count(), 1);
    }

    #[tokio::test]
    async fn test_reload_and_ignored_frames() {
        let (coordinator, _, reloader) = coordinator();

        assert_eq!(coordinator.handle_message("").await, UpdateOutcome::Ignored);
        assert_eq!(coordinator.handle_message("{oops").await, UpdateOutcome::Ignored);
        assert_eq!(
            coordinator.handle_message(r#"{"type":"ping"}"#).await,
            UpdateOutcome::Ignored
        );
        assert_eq!(
            coordinator
                .handle_message(r#"{"type":"hotAccept","id":"/a.js"}"#)
                .await,
            UpdateOutcome::Ignored
        );
        assert_eq!(reloader.count(), 0);

        assert_eq!(
            coordinator.handle_message(r#"{"type":"reload"}"#).await,
            UpdateOutcome::FullReload
        );
        assert_eq!(reloader.count(), 1);
    }

    #[tokio::test]
    async fn test_registered_module_without_callbacks_succeeds() {
        let (coordinator, registry, reloader) = coordinator();
        registry.acquire("/plain.js");

        assert!(coordinator.apply_update("/plain.js").await.unwrap());
        assert_eq!(reloader.count(), 0);
    }
}
