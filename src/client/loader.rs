//! Dynamic module loading for re-imports.

use futures::future::BoxFuture;
use futures::FutureExt;
use url::Url;

use crate::error::{HmrError, Result};

/// A freshly fetched module instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    pub id: String,
    /// Cache-busting generation the module was fetched with
    pub generation: u64,
    pub source: String,
}

/// Loads a module by id, bypassing caches with `generation`.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, id: &str, generation: u64) -> BoxFuture<'static, Result<LoadedModule>>;
}

/// Fetches `<origin><id>?mtime=<generation>` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpModuleLoader {
    client: reqwest::Client,
    origin: Url,
}

impl HttpModuleLoader {
    pub fn new(origin: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            origin,
        }
    }

    pub fn module_url(&self, id: &str, generation: u64) -> Result<Url> {
        let mut url = self
            .origin
            .join(id)
            .map_err(|e| HmrError::invalid_url(id, e))?;
        url.query_pairs_mut()
            .append_pair("mtime", &generation.to_string());
        Ok(url)
    }
}

impl ModuleLoader for HttpModuleLoader {
    fn load(&self, id: &str, generation: u64) -> BoxFuture<'static, Result<LoadedModule>> {
        let client = self.client.clone();
        let id = id.to_string();
        let url = self.module_url(&id, generation);

        async move {
            let url = url?;
            let response = client
                .get(url)
                .send()
                .await?
                .error_for_status()
                .map_err(|e| HmrError::module_load(&id, e))?;
            let source = response.text().await?;
            Ok(LoadedModule {
                id,
                generation,
                source,
            })
        }
        .boxed()
    }
}
