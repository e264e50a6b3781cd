//! HTTP endpoint serving challenge responses to ACME validators

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use certward_config::StorageConfig;

use crate::acme::ChallengeStore;

/// Build the challenge router
///
/// `GET /.well-known/acme-challenge/:token` answers with the stored key
/// authorization as `text/plain`, or 404. `GET /health` answers `ok`.
pub fn router(store: Arc<dyn ChallengeStore>) -> Router {
    Router::new()
        .route("/.well-known/acme-challenge/:token", get(serve_challenge))
        .route("/health", get(health))
        .with_state(store)
}

async fn serve_challenge(
    State(store): State<Arc<dyn ChallengeStore>>,
    Path(token): Path<String>,
) -> Response {
    let text_plain = [(header::CONTENT_TYPE, "text/plain")];

    match store.get(&token).await {
        Ok(Some(response)) => {
            trace!(token = %token, "Serving ACME challenge response");
            (StatusCode::OK, text_plain, response).into_response()
        }
        Ok(None) => {
            trace!(token = %token, "Unknown ACME challenge token");
            (StatusCode::NOT_FOUND, text_plain, "Not Found").into_response()
        }
        Err(e) => {
            warn!(token = %token, error = %e, "Challenge store lookup failed");
            (StatusCode::SERVICE_UNAVAILABLE, text_plain, "Challenge store unavailable")
                .into_response()
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn bind(listen: SocketAddr) -> Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind challenge endpoint on {}", listen))
}

/// Serve the challenge endpoint until `shutdown` resolves
pub async fn serve<F>(listen: SocketAddr, store: Arc<dyn ChallengeStore>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = bind(listen).await?;

    info!(address = %listen, "Challenge endpoint listening");

    axum::serve(listener, router(store))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Challenge endpoint failed")
}

/// Challenge endpoint running in a background task
#[derive(Debug)]
pub struct ChallengeEndpoint {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl ChallengeEndpoint {
    /// Bind and start serving; bind errors are reported here
    pub async fn start(listen: SocketAddr, store: Arc<dyn ChallengeStore>) -> Result<Self> {
        let listener = bind(listen).await?;
        let local_addr = listener
            .local_addr()
            .context("Failed to read challenge endpoint address")?;
        let (shutdown, stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            axum::serve(listener, router(store))
                .with_graceful_shutdown(async move {
                    let _ = stopped.await;
                })
                .await
        });

        info!(address = %local_addr, "Challenge endpoint listening");
        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for the server task
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.task
            .await
            .context("Challenge endpoint task panicked")?
            .context("Challenge endpoint failed")?;
        debug!(address = %self.local_addr, "Challenge endpoint stopped");
        Ok(())
    }
}

/// Endpoint a one-shot command must run itself.
///
/// Records in a memory store are visible to this process only, so nothing
/// else can serve them; a shared challenge directory is served by a separate
/// `serve` or `daemon` process and needs nothing here.
pub async fn in_process_endpoint(
    storage: &StorageConfig,
    listen: SocketAddr,
    store: Arc<dyn ChallengeStore>,
) -> Result<Option<ChallengeEndpoint>> {
    match storage.challenges {
        Some(_) => Ok(None),
        None => Ok(Some(ChallengeEndpoint::start(listen, store).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::{ChallengeProbe, HttpProbe, MemoryChallengeStore};

    const TOKEN: &str = "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJ-PCt92wr-oA";
    const KEY_AUTH: &str = "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJ-PCt92wr-oA.thumbprint";

    fn any_port() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test]
    async fn test_memory_store_gets_its_own_endpoint() {
        let store = MemoryChallengeStore::new();
        let storage = StorageConfig::default();
        assert!(storage.challenges.is_none());

        let endpoint = in_process_endpoint(&storage, any_port(), Arc::new(store.clone()))
            .await
            .unwrap()
            .expect("memory store needs an in-process endpoint");
        let host = endpoint.local_addr().to_string();
        let client = HttpProbe::new().unwrap();

        // Records written by this process are served by this process
        store.put(TOKEN, KEY_AUTH).await.unwrap();
        assert_eq!(client.fetch(&host, TOKEN).await.unwrap(), KEY_AUTH.as_bytes());

        endpoint.stop().await.unwrap();
        assert!(client.fetch(&host, TOKEN).await.is_err());
    }

    #[tokio::test]
    async fn test_shared_directory_needs_no_endpoint() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let storage = StorageConfig {
            challenges: Some(temp_dir.path().to_path_buf()),
            ..StorageConfig::default()
        };

        let endpoint = in_process_endpoint(
            &storage,
            any_port(),
            Arc::new(MemoryChallengeStore::new()),
        )
        .await
        .unwrap();
        assert!(endpoint.is_none());
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = tokio::net::TcpListener::bind(any_port()).await.unwrap();
        let addr = taken.local_addr().unwrap();

        let result = ChallengeEndpoint::start(addr, Arc::new(MemoryChallengeStore::new())).await;
        assert!(result.is_err());
    }
}
