use axum::{
    extract::{Query as QueryParams, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    credentials::CredentialProvider,
    metrics,
    scrape::{ScrapeTarget, Scraper},
    BridgeError, Result,
};

struct Session {
    target: ScrapeTarget,
    scraper: Arc<Mutex<Scraper>>,
}

/// Scrape sessions by target name, plus what is needed to build new ones.
#[derive(Clone)]
pub struct ExporterState {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    client: reqwest::Client,
    endpoint: String,
    credentials: Arc<CredentialProvider>,
    shutdown: CancellationToken,
}

impl ExporterState {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        credentials: Arc<CredentialProvider>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            client,
            endpoint: endpoint.into(),
            credentials,
            shutdown,
        }
    }

    /// Replaces the target set. Sessions of unchanged targets are kept with their buffers.
    pub fn load_targets(&self, targets: Vec<ScrapeTarget>) {
        let mut sessions = self.sessions.write();
        let mut next = HashMap::with_capacity(targets.len());
        for target in targets {
            let session = match sessions.remove(&target.name) {
                Some(existing) if existing.target == target => existing,
                _ => Session {
                    scraper: Arc::new(Mutex::new(Scraper::new(
                        self.client.clone(),
                        self.endpoint.clone(),
                        target.clone(),
                        self.credentials.clone(),
                    ))),
                    target,
                },
            };
            next.insert(session.target.name.clone(), session);
        }
        *sessions = next;
        info!("Loaded {} scrape targets", sessions.len());
    }

    pub fn target_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn scraper(&self, name: &str) -> Option<Arc<Mutex<Scraper>>> {
        self.sessions
            .read()
            .get(name)
            .map(|session| session.scraper.clone())
    }
}

#[derive(Debug, Deserialize)]
pub struct ProbeParams {
    pub target: String,
}

pub fn exporter_router(state: ExporterState) -> Router {
    Router::new()
        .route("/probe", get(probe))
        .route("/metrics", get(self_metrics))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Scrapes one target. Concurrent probes of the same target queue on its session.
async fn probe(
    State(state): State<ExporterState>,
    QueryParams(params): QueryParams<ProbeParams>,
) -> Result<Response> {
    let scraper = state
        .scraper(&params.target)
        .ok_or_else(|| BridgeError::NotFound(format!("Target {} not found", params.target)))?;

    let mut scraper = scraper.lock().await;
    let cancel = state.shutdown.child_token();
    let mut body = Vec::new();
    let content_type = scraper.scrape(&cancel, &mut body).await?;

    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

async fn self_metrics() -> Result<Response> {
    let text = metrics::gather_text()?;
    Ok(([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], text).into_response())
}

async fn healthz() -> &'static str {
    "ok"
}
