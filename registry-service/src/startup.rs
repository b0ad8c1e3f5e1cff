use registry_core::error::AppError;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::RegistryConfig;
use crate::services::{build_storage, ProviderRegistry, Stores};
use crate::{build_router, AppState};

type ServerFuture = Pin<Box<dyn Future<Output = std::io::Result<()>> + Send>>;

pub struct Application {
    port: u16,
    server: ServerFuture,
    state: AppState,
}

/// Connects the configured backends and assembles the shared state.
pub async fn build_state(config: RegistryConfig) -> Result<AppState, AppError> {
    let stores = Stores::build(&config.database).await.map_err(|e| {
        tracing::error!("Failed to initialize {:?} stores: {}", config.database.backend, e);
        AppError::from(e)
    })?;

    let storage = build_storage(&config.storage).await.map_err(|e| {
        tracing::error!("Failed to initialize module storage: {}", e);
        e
    })?;

    let providers = ProviderRegistry::from_config(&config.providers);

    Ok(AppState {
        config: Arc::new(config),
        stores,
        storage,
        providers,
    })
}

impl Application {
    pub async fn build(config: RegistryConfig) -> Result<Self, AppError> {
        let port = config.server.port;
        let state = build_state(config).await?;
        Self::build_with_state(state, port, std::future::pending()).await
    }

    /// Binds `port` (0 picks a free one) and serves `state` until `shutdown` resolves.
    pub async fn build_with_state<S>(state: AppState, port: u16, shutdown: S) -> Result<Self, AppError>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let app = build_router(state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            port,
            backend = state.stores.modules.backend_type(),
            storage = state.storage.backing_store_name(),
            "Registry listening"
        );

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown);

        Ok(Self {
            port,
            server: Box::pin(server.into_future()),
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}
