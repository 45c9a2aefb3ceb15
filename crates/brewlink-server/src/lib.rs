pub mod api;
pub mod config;
pub mod device;
pub mod error;

use std::future::Future;
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{MatchedPath, Request};
use axum::http::{HeaderValue, Method};
use axum::routing::get;
use libbrewlink::{
    DirRecipeBook, Dispatcher, FsStorage, RecoveryReport, SessionEvents, SessionStore,
    StaticFirmware, recover,
};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{Span, info};

pub use config::{Args, Config};

/// Shared state behind every route.
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
    recovery: OnceLock<RecoveryReport>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            recovery: OnceLock::new(),
        }
    }

    /// Open durable storage and collaborators described by `config`.
    pub fn open(config: &Config) -> Result<Self> {
        let storage = FsStorage::open(&config.data_dir).with_context(|| {
            format!("failed to open data dir {}", config.data_dir.display())
        })?;
        let firmware =
            StaticFirmware::from_table(&config.firmware).context("invalid [firmware] table")?;
        let store = Arc::new(SessionStore::new(
            Arc::new(storage),
            config.lock_timeout,
            SessionEvents::new(config.event_capacity),
        ));
        let dispatcher = Dispatcher::new(
            store,
            Arc::new(DirRecipeBook::new(&config.recipes_dir)),
            Arc::new(firmware),
            config.register_policy,
        );
        Ok(Self::new(Arc::new(dispatcher)))
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn store(&self) -> &SessionStore {
        self.dispatcher.store()
    }

    /// Report from startup recovery, once it has finished.
    pub fn recovery(&self) -> Option<&RecoveryReport> {
        self.recovery.get()
    }

    pub fn is_ready(&self) -> bool {
        self.recovery.get().is_some()
    }

    /// Rebuild the live set from disk and open the device routes.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let report = recover(self.store())
            .await
            .context("session recovery failed")?;
        if self.recovery.set(report.clone()).is_err() {
            tracing::warn!("recovery ran more than once");
        }
        Ok(report)
    }
}

pub fn router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .route(
            "/API/{family}/{endpoint}",
            get(device::handle).post(device::handle),
        )
        .route("/api/sessions", get(api::sessions))
        .route("/api/devices/{device_id}/session", get(api::device_session))
        .route("/api/archive", get(api::archive_list))
        .route("/api/archive/{session_id}", get(api::archived_session))
        .route("/api/events", get(api::events))
        .route("/health", get(api::health))
        .route("/ready", get(api::ready))
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}

/// Span for one request. Records the route template, never the raw URI:
/// device ids travel in query strings and dashboard paths.
fn request_span(request: &Request) -> Span {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or("unmatched", MatchedPath::as_str);
    tracing::info_span!("http", method = %request.method(), route = %route)
}

pub fn build_cors(origins: &[String]) -> Result<CorsLayer> {
    if origins.iter().any(|o| o == "*") {
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any));
    }

    let mut headers = Vec::with_capacity(origins.len());
    for origin in origins {
        headers.push(
            HeaderValue::from_str(origin)
                .with_context(|| format!("invalid allow-origin value: {origin}"))?,
        );
    }

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(headers))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any))
}

/// Serve on `listener` until `shutdown` resolves.
///
/// The listener accepts connections while recovery runs; device routes
/// answer `busy` and `/ready` answers 503 until it completes. A recovery
/// failure stops the server.
pub async fn run(
    config: Config,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let state = Arc::new(AppState::open(&config)?);
    let app = router(Arc::clone(&state), build_cors(&config.allow_origins)?);
    let addr = listener.local_addr().context("listener has no local address")?;

    info!(
        "brewlink-server listening on http://{} policy={} data_dir={}",
        addr,
        config.register_policy,
        config.data_dir.display()
    );

    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    });

    if let Err(e) = state.recover().await {
        server.abort();
        return Err(e);
    }

    server
        .await
        .context("server task failed")?
        .context("server error")?;
    info!("brewlink-server stopped");
    Ok(())
}
