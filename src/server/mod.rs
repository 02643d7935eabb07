pub mod api;
pub mod channel;
pub mod engine;

use anyhow::Result;

use crate::config::ServerConfig;

pub use channel::{BroadcastChannel, ClientId, ClientTransport};
pub use engine::{HmrEngine, ModuleChangeCallback, ModuleEventSource, SharedEngine};

pub async fn start(config: ServerConfig) -> Result<()> {
    api::serve(config).await
}
