use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::loader::ModuleLoader;
use super::{HmrRuntime, PageReloader};
use crate::config::ClientConfig;
use crate::error::{with_retry, HmrError, Result, RetryPolicy};

/// Build a runtime and open its socket to the dev server in the background.
///
/// The runtime is usable straight away: hot contexts created before the
/// connection opens queue their announcements on the socket. The returned
/// handle finishes when the server closes the connection.
pub async fn connect(
    config: ClientConfig,
    loader: Arc<dyn ModuleLoader>,
    reloader: Arc<dyn PageReloader>,
) -> Result<(Arc<HmrRuntime>, JoinHandle<()>)> {
    let url = config.socket_url()?;
    let policy = RetryPolicy::with_attempts(config.connect_attempts);

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let runtime = Arc::new(HmrRuntime::new(config, out_tx, loader, reloader));

    let task_runtime = runtime.clone();
    let handle = tokio::spawn(async move {
        let runtime = task_runtime;
        let ws_stream = match with_retry(&policy, || {
            let url = url.clone();
            async move {
                let (stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
                Ok::<_, HmrError>(stream)
            }
        })
        .await
        {
            Ok(stream) => stream,
            Err(e) => {
                error!(url = %url, error = %e, "could not connect to hmr server");
                return;
            }
        };
        info!(url = %url, "connected to hmr server");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        // local -> remote
        let forward = tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        match runtime.socket().on_open() {
            Ok(flushed) => debug!(flushed, "socket open"),
            Err(e) => warn!(error = %e, "failed to flush queued messages"),
        }

        // remote -> local, one frame at a time so updates never overlap
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    runtime.handle_message(text.as_str()).await;
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "socket error");
                    break;
                }
            }
        }

        runtime.socket().on_close();
        forward.abort();
        info!(url = %url, "disconnected from hmr server");
    });

    Ok((runtime, handle))
}
