//! # DX HMR - ESM Hot Module Replacement
//!
//! Development-time hot module replacement for ES module applications.
//!
//! ## Features
//!
//! - **Dependency graph**: importer / importee edges kept mutually consistent
//! - **Broadcast server**: file changes become `update` frames for every open client
//! - **Client runtime**: per-module `hot` contexts with accept / dispose / decline
//! - **Reload fallback**: anything that cannot be hot-swapped reloads the page
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dx_hmr::client::{self, AcceptHandler, HttpModuleLoader, LogReloader};
//! use dx_hmr::config::ClientConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::default();
//!     let loader = Arc::new(HttpModuleLoader::new(config.origin_url()?));
//!     let (runtime, connection) = client::connect(config, loader, Arc::new(LogReloader)).await?;
//!
//!     if let Some(hot) = runtime.install_hot_context("http://localhost:8080/src/app.js")? {
//!         hot.accept_self(AcceptHandler::new(|update| {
//!             println!("🔥 {} (generation {})", update.module.id, update.module.generation);
//!             Ok(())
//!         }))?;
//!     }
//!
//!     connection.await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod graph;
pub mod protocol;
pub mod server;
pub mod watcher;

// Re-export main types for library consumers
pub use client::{HmrRuntime, HotContext, UpdateOutcome};
pub use config::HmrConfig;
pub use error::{HmrError, Result};
pub use graph::{DependencyGraph, ModuleNode};
pub use protocol::HmrMessage;
pub use server::{HmrEngine, SharedEngine};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
