use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chorus_config::Config;
use chorus_contracts::{
    contracts_manifest_v1, ContractsMetadata, FinalResponse, OutcomeKind, SpeechRequest,
    SpeechResponse, API_VERSION,
};
use chorus_kernel::LANGUAGES;
use serde_json::Value;
use tokio::sync::oneshot;

pub mod engines;
pub mod error;
pub mod journal;
pub mod orchestrator;
pub mod store;

pub use engines::{
    HttpNluEngine, HttpSpeechEngine, IntentResolver, NluEngine, ResolutionError, RetryPolicy,
    SpeechEngine, SynthesisError,
};
pub use error::{api_error, ApiError, ConversationError, ServerError};
pub use journal::{verify_journal_chain, ConversationJournal, JournalError, JournalRecord};
pub use orchestrator::Orchestrator;
pub use store::{
    AudioBackend, AudioStore, FsAudioStore, MemoryAudioStore, SpeechCache, SqliteAudioStore,
    StoreError,
};

pub async fn serve(cfg: Config) -> Result<(), ServerError> {
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| ServerError::ListenAddr(format!("{e}")))?;

    let app = build_app(cfg).await?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(ServerError::Bind)?;
    tracing::info!(
        event_name = "server.listening",
        listen_addr = %addr,
        "chorus server listening"
    );
    axum::serve(listener, app).await.map_err(ServerError::Serve)
}

/// Builds the router against the HTTP NLU and speech engines named in `cfg`.
pub async fn build_app(cfg: Config) -> Result<Router, ServerError> {
    let nlu: Arc<dyn NluEngine> = Arc::new(HttpNluEngine::new(&cfg.nlu)?);
    let speech: Arc<dyn SpeechEngine> = Arc::new(HttpSpeechEngine::new(&cfg.speech)?);
    build_app_with(cfg, nlu, speech).await
}

pub async fn build_app_with(
    cfg: Config,
    nlu: Arc<dyn NluEngine>,
    speech: Arc<dyn SpeechEngine>,
) -> Result<Router, ServerError> {
    let orchestrator = Orchestrator::from_config(&cfg, nlu, speech).await?;
    Ok(router(Arc::new(orchestrator)))
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/v1/conversations", post(conversations))
        .route("/v1/speech", post(speech))
        .route("/v1/contracts", get(contracts))
        .with_state(AppState { orchestrator })
}

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn contracts() -> Json<ContractsMetadata> {
    Json(contracts_metadata())
}

fn contracts_metadata() -> ContractsMetadata {
    let manifest = contracts_manifest_v1();
    ContractsMetadata {
        api_version: API_VERSION.to_string(),
        openapi_sha256: manifest.openapi_sha256.to_string(),
        contracts_set_sha256: manifest.contracts_set_sha256.to_string(),
        generated_at: manifest.generated_at.to_string(),
        schemas: manifest
            .schemas
            .iter()
            .map(|s| (s.path.to_string(), s.sha256.to_string()))
            .collect::<BTreeMap<_, _>>(),
        outcome_kinds: OutcomeKind::ALL.to_vec(),
        languages: LANGUAGES.iter().map(|l| l.name.to_string()).collect(),
    }
}

/// The pipeline runs in its own task; the response is sent as soon as the
/// terminal callback fires, while the cache write finishes in that task.
async fn conversations(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<FinalResponse>, ApiError> {
    let Json(raw) = body.map_err(|rejection| {
        api_error(
            StatusCode::BAD_REQUEST,
            "validation.malformed_body",
            rejection.body_text(),
        )
    })?;

    let (tx, rx) = oneshot::channel();
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator
            .process(&raw, move |result| {
                let _ = tx.send(result);
            })
            .await;
    });

    match rx.await {
        Ok(Ok(response)) => Ok(Json(response)),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "dispatch_error",
            "conversation task ended without answering",
        )),
    }
}

/// Standalone speech endpoint, answered the same way as conversations.
async fn speech(
    State(state): State<AppState>,
    body: Result<Json<SpeechRequest>, JsonRejection>,
) -> Result<Json<SpeechResponse>, ApiError> {
    let Json(request) = body.map_err(|rejection| {
        api_error(
            StatusCode::BAD_REQUEST,
            "validation.malformed_body",
            rejection.body_text(),
        )
    })?;

    let (tx, rx) = oneshot::channel();
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator
            .speak(&request, move |result| {
                let _ = tx.send(result);
            })
            .await;
    });

    match rx.await {
        Ok(Ok(response)) => Ok(Json(response)),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "dispatch_error",
            "speech task ended without answering",
        )),
    }
}
