//! HTTP API server for the Claude Watch relay.
//!
//! Nests one router per resource (`pairing`, `approval`, `question`,
//! `progress`, `health`) over a shared [`ApiState`], the same
//! builder-then-`router()`-then-`run()`/`spawn()` shape the rest of this
//! pack's gateway-style services use.

pub mod approval;
pub mod health;
pub mod pairing;
pub mod progress;
pub mod question;
pub mod rate_limit;
pub mod stream;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::kv::MemoryKv;
use crate::pairing::PairingRegistry;
use crate::push::{HttpPushProvider, PushDispatcher};
use crate::queues::approval::ApprovalQueue;
use crate::queues::control::ControlStore;
use crate::queues::progress::ProgressStore;
use crate::queues::question::QuestionQueue;
use crate::Result;

/// Shared state for every relay API handler.
#[derive(Clone)]
pub struct ApiState {
    pub kv: MemoryKv,
    pub pairing: PairingRegistry<MemoryKv>,
    pub approvals: ApprovalQueue<MemoryKv>,
    pub questions: QuestionQueue<MemoryKv>,
    pub progress: ProgressStore<MemoryKv>,
    pub control: ControlStore<MemoryKv>,
    pub push: Option<Arc<PushDispatcher<HttpPushProvider>>>,
    pub rate_limiter: Option<rate_limit::SharedLimiter>,
    pub streams: Arc<stream::StreamRegistry>,
}

/// Builds an [`ApiServer`] over a fresh or supplied [`MemoryKv`].
pub struct ApiServerBuilder {
    kv: MemoryKv,
    port: u16,
    rate_limit_per_minute: Option<u32>,
    push: Option<Arc<PushDispatcher<HttpPushProvider>>>,
}

impl ApiServerBuilder {
    /// Start a builder over the given store, listening on `port`.
    #[must_use]
    pub fn new(kv: MemoryKv, port: u16) -> Self {
        Self { kv, port, rate_limit_per_minute: None, push: None }
    }

    /// Enable request-rate limiting at `requests_per_minute` (disabled by
    /// default, same as the teacher's cloud-mode-only limiter).
    #[must_use]
    pub fn rate_limit_per_minute(mut self, requests_per_minute: u32) -> Self {
        self.rate_limit_per_minute = Some(requests_per_minute);
        self
    }

    /// Wire a push dispatcher so new approvals/questions/progress can wake
    /// a backgrounded client.
    #[must_use]
    pub fn push(mut self, dispatcher: Arc<PushDispatcher<HttpPushProvider>>) -> Self {
        self.push = Some(dispatcher);
        self
    }

    /// Build the server.
    #[must_use]
    pub fn build(self) -> ApiServer {
        let rate_limiter = self.rate_limit_per_minute.map(rate_limit::create_limiter);

        let state = Arc::new(ApiState {
            pairing: PairingRegistry::new(self.kv.clone()),
            approvals: ApprovalQueue::new(self.kv.clone()),
            questions: QuestionQueue::new(self.kv.clone()),
            progress: ProgressStore::new(self.kv.clone()),
            control: ControlStore::new(self.kv.clone()),
            kv: self.kv,
            push: self.push,
            rate_limiter,
            streams: Arc::new(stream::StreamRegistry::default()),
        });

        ApiServer { state, port: self.port }
    }
}

/// The relay's HTTP server.
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    /// Build the router with all routes.
    fn router(&self) -> Router {
        let mut router = Router::new()
            .nest("/pair", pairing::router(self.state.clone()))
            .merge(approval::router(self.state.clone()))
            .merge(question::router(self.state.clone()))
            .merge(progress::router(self.state.clone()))
            .merge(stream::router(self.state.clone()))
            .merge(health::router())
            .merge(health::ready_router(self.state.clone()));

        if self.state.rate_limiter.is_some() {
            router = router.layer(axum::middleware::from_fn_with_state(
                self.state.clone(),
                rate_limit::rate_limit_middleware,
            ));
        }

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or run.
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind relay server: {e}")))?;

        tracing::info!(port = self.port, "relay server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("relay server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task.
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
