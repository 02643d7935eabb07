//! Per-module hot state and the registry that owns it.
//!
//! The registry is an arena: states live in a slot vector for the lifetime of
//! the page and are addressed by [`ModuleHandle`]. Re-acquiring an id never
//! creates a second state; it locks and returns the existing one.

use std::fmt;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::loader::LoadedModule;
use super::paths::resolve_dependency;
use super::socket::HmrSocket;
use super::PageReloader;
use crate::error::Result;
use crate::protocol::HmrMessage;

/// Arguments passed to an accept callback after a successful re-import.
#[derive(Debug, Clone)]
pub struct AcceptedUpdate {
    /// The updated module itself
    pub module: LoadedModule,
    /// The entry's declared dependencies, in declaration order
    pub deps: Vec<LoadedModule>,
}

pub type AcceptFn = Arc<dyn Fn(AcceptedUpdate) -> anyhow::Result<()> + Send + Sync>;
pub type DisposeCallback = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

#[derive(Clone)]
pub enum AcceptHandler {
    Noop,
    Callback(AcceptFn),
}

impl AcceptHandler {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(AcceptedUpdate) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        AcceptHandler::Callback(Arc::new(callback))
    }

    pub fn invoke(&self, update: AcceptedUpdate) -> anyhow::Result<()> {
        match self {
            AcceptHandler::Noop => Ok(()),
            AcceptHandler::Callback(callback) => callback(update),
        }
    }
}

/// `accept(true)`: accept without a callback.
impl From<bool> for AcceptHandler {
    fn from(_: bool) -> Self {
        AcceptHandler::Noop
    }
}

impl fmt::Debug for AcceptHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceptHandler::Noop => f.write_str("Noop"),
            AcceptHandler::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AcceptEntry {
    /// Resolved absolute module paths
    pub deps: Vec<String>,
    pub handler: AcceptHandler,
}

/// Work captured at the start of an applied update.
pub struct UpdatePlan {
    pub disposers: Vec<DisposeCallback>,
    pub entries: Vec<AcceptEntry>,
}

pub struct HotModuleState {
    id: String,
    data: Map<String, Value>,
    is_locked: bool,
    is_declined: bool,
    is_accepted: bool,
    accept_callbacks: Vec<AcceptEntry>,
    dispose_callbacks: Vec<DisposeCallback>,
}

impl HotModuleState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: Map::new(),
            is_locked: false,
            is_declined: false,
            is_accepted: false,
            accept_callbacks: Vec::new(),
            dispose_callbacks: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_locked(&self) -> bool {
        self.is_locked
    }

    pub fn is_declined(&self) -> bool {
        self.is_declined
    }

    pub fn is_accepted(&self) -> bool {
        self.is_accepted
    }

    pub fn accept_callbacks(&self) -> &[AcceptEntry] {
        &self.accept_callbacks
    }

    pub fn dispose_count(&self) -> usize {
        self.dispose_callbacks.len()
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.data
    }

    fn lock(&mut self) {
        self.is_locked = true;
    }

    /// Flag the state accepted. Returns `None` when locked, otherwise
    /// whether this was the first accept.
    fn mark_accepted(&mut self) -> Option<bool> {
        if self.is_locked {
            return None;
        }
        let first = !self.is_accepted;
        self.is_accepted = true;
        Some(first)
    }

    fn push_accept(&mut self, entry: AcceptEntry) {
        if !self.is_locked {
            self.accept_callbacks.push(entry);
        }
    }

    /// Take the dispose callbacks, reset `data` and snapshot the accept
    /// entries. `None` for declined modules.
    pub fn begin_update(&mut self) -> Option<UpdatePlan> {
        if self.is_declined {
            return None;
        }
        self.data = Map::new();
        Some(UpdatePlan {
            disposers: std::mem::take(&mut self.dispose_callbacks),
            entries: self.accept_callbacks.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle(usize);

#[derive(Default)]
struct RegistryInner {
    slots: Vec<HotModuleState>,
    index: AHashMap<String, ModuleHandle>,
}

/// Every hot state created on this page, keyed by module id.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `id` and whether the state already existed.
    /// An existing state is locked before it is returned.
    pub fn acquire(&self, id: &str) -> (ModuleHandle, bool) {
        let mut inner = self.inner.lock();
        if let Some(&handle) = inner.index.get(id) {
            inner.slots[handle.0].lock();
            debug!(module = id, "re-evaluated, locking previous hot state");
            return (handle, true);
        }

        let handle = ModuleHandle(inner.slots.len());
        inner.slots.push(HotModuleState::new(id));
        inner.index.insert(id.to_string(), handle);
        (handle, false)
    }

    pub fn lookup(&self, id: &str) -> Option<ModuleHandle> {
        self.inner.lock().index.get(id).copied()
    }

    /// Run `f` against a state. Never call back into the registry from `f`.
    pub fn with_state<R>(&self, handle: ModuleHandle, f: impl FnOnce(&mut HotModuleState) -> R) -> R {
        let mut inner = self.inner.lock();
        f(&mut inner.slots[handle.0])
    }

    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .slots
            .iter()
            .map(|state| state.id.clone())
            .collect()
    }
}

/// The `hot` api handed to one module evaluation.
#[derive(Clone)]
pub struct HotContext {
    id: String,
    handle: ModuleHandle,
    registry: ModuleRegistry,
    socket: Arc<HmrSocket>,
    reloader: Arc<dyn PageReloader>,
}

impl HotContext {
    pub(crate) fn new(
        id: String,
        handle: ModuleHandle,
        registry: ModuleRegistry,
        socket: Arc<HmrSocket>,
        reloader: Arc<dyn PageReloader>,
    ) -> Self {
        Self {
            id,
            handle,
            registry,
            socket,
            reloader,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handle(&self) -> ModuleHandle {
        self.handle
    }

    /// Accept updates to this module and the listed dependencies.
    ///
    /// The first accept announces the module to the server before anything
    /// else, so a dependency that fails to resolve still leaves the module
    /// announced. Dependencies are resolved relative to this module's id.
    /// Calls accumulate; a locked context ignores them.
    pub fn accept<I, S>(&self, deps: I, handler: impl Into<AcceptHandler>) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Some(first) = self.registry.with_state(self.handle, |state| state.mark_accepted())
        else {
            return Ok(());
        };
        if first {
            if let Err(e) = self.socket.send(HmrMessage::hot_accept(&self.id)) {
                warn!(module = %self.id, error = %e, "hotAccept queued for the next open");
            }
        }

        let deps = deps
            .into_iter()
            .map(|dep| resolve_dependency(&self.id, dep.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let entry = AcceptEntry {
            deps,
            handler: handler.into(),
        };
        self.registry
            .with_state(self.handle, |state| state.push_accept(entry));
        Ok(())
    }

    /// Accept updates to this module only.
    pub fn accept_self(&self, handler: impl Into<AcceptHandler>) -> Result<()> {
        self.accept(std::iter::empty::<&str>(), handler)
    }

    pub fn dispose<F>(&self, callback: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.registry
            .with_state(self.handle, |state| state.dispose_callbacks.push(Box::new(callback)));
    }

    pub fn decline(&self) {
        self.registry.with_state(self.handle, |state| state.is_declined = true);
    }

    /// Give up on hot updates and reload the page now.
    pub fn invalidate(&self) {
        warn!(module = %self.id, "module invalidated itself");
        self.reloader.reload();
    }

    pub fn is_locked(&self) -> bool {
        self.registry.with_state(self.handle, |state| state.is_locked)
    }

    pub fn is_accepted(&self) -> bool {
        self.registry.with_state(self.handle, |state| state.is_accepted)
    }

    pub fn is_declined(&self) -> bool {
        self.registry.with_state(self.handle, |state| state.is_declined)
    }

    pub fn accept_count(&self) -> usize {
        self.registry
            .with_state(self.handle, |state| state.accept_callbacks.len())
    }

    pub fn data(&self) -> Map<String, Value> {
        self.registry.with_state(self.handle, |state| state.data.clone())
    }

    pub fn set_data(&self, key: impl Into<String>, value: Value) {
        self.registry.with_state(self.handle, |state| {
            state.data.insert(key.into(), value);
        });
    }
}

impl fmt::Debug for HotContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotContext")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_locks_existing_state() {
        let registry = ModuleRegistry::new();
        let (first, existed) = registry.acquire("/a.js");
        assert!(!existed);
        assert!(!registry.with_state(first, |s| s.is_locked()));

        let (second, existed) = registry.acquire("/a.js");
        assert!(existed);
        assert_eq!(first, second);
        assert!(registry.with_state(first, |s| s.is_locked()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_mark_and_push_accept() {
        let mut state = HotModuleState::new("/a.js");
        let entry = AcceptEntry {
            deps: vec![],
            handler: AcceptHandler::Noop,
        };

        assert_eq!(state.mark_accepted(), Some(true));
        state.push_accept(entry.clone());
        assert_eq!(state.mark_accepted(), Some(false));
        state.push_accept(entry.clone());
        assert_eq!(state.accept_callbacks().len(), 2);

        state.lock();
        assert_eq!(state.mark_accepted(), None);
        state.push_accept(entry);
        assert_eq!(state.accept_callbacks().len(), 2);
        assert!(state.is_accepted());
    }

    #[test]
    fn test_begin_update() {
        let mut state = HotModuleState::new("/a.js");
        state.data_mut().insert("count".into(), Value::from(3));
        state.dispose_callbacks.push(Box::new(|| -> anyhow::Result<()> { Ok(()) }));
        state.mark_accepted();
        state.push_accept(AcceptEntry {
            deps: vec!["/b.js".into()],
            handler: AcceptHandler::Noop,
        });

        let plan = state.begin_update().unwrap();
        assert_eq!(plan.disposers.len(), 1);
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].deps, vec!["/b.js"]);
        assert!(state.data().is_empty());
        assert_eq!(state.dispose_count(), 0);
        // accept callbacks survive updates
        assert_eq!(state.accept_callbacks().len(), 1);

        state.is_declined = true;
        assert!(state.begin_update().is_none());
    }

    #[test]
    fn test_accept_handler_sentinel() {
        let handler = AcceptHandler::from(true);
        assert!(matches!(handler, AcceptHandler::Noop));
        let update = AcceptedUpdate {
            module: LoadedModule {
                id: "/a.js".into(),
                generation: 1,
                source: String::new(),
            },
            deps: vec![],
        };
        assert!(handler.invoke(update).is_ok());
    }
}
