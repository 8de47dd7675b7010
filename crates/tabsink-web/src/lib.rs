//! Axum JSON API over the query facade and sync engine.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

use tabsink_core::SourceStatus;
use tabsink_query::{QueryError, QueryFacade, RecordQuery};
use tabsink_sync::SyncEngine;

pub const CRATE_NAME: &str = "tabsink-web";

#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<QueryFacade>,
    pub engine: Arc<SyncEngine>,
}

impl AppState {
    pub fn new(facade: Arc<QueryFacade>, engine: Arc<SyncEngine>) -> Self {
        Self { facade, engine }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/sources", get(sources_handler))
        .route("/sources/{key}", get(source_detail_handler))
        .route("/sources/{key}/records", post(records_handler))
        .route("/sources/{key}/sync", post(sync_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving http api");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn healthz_handler() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

#[derive(Debug, Default, Deserialize)]
struct SourcesQuery {
    status: Option<String>,
}

async fn sources_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SourcesQuery>,
) -> Response {
    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => match SourceStatus::parse_str(raw) {
            Some(status) => Some(status),
            None => return bad_request(format!("unknown status {raw:?}")),
        },
    };
    match state.facade.list_sources(status).await {
        Ok(sources) => Json(sources).into_response(),
        Err(err) => query_error(err),
    }
}

async fn source_detail_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(key): AxumPath<String>,
) -> Response {
    match state.facade.get_source(&key).await {
        Ok(source) => Json(source).into_response(),
        Err(err) => query_error(err),
    }
}

async fn records_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(key): AxumPath<String>,
    Json(query): Json<RecordQuery>,
) -> Response {
    match state.facade.get_records(&key, &query).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => query_error(err),
    }
}

async fn sync_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(key): AxumPath<String>,
) -> Response {
    let source = match state.facade.resolve_source(&key).await {
        Ok(source) => source,
        Err(err) => return query_error(err),
    };
    match state.engine.sync_source(source.id).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => server_error(err.to_string()),
    }
}

fn query_error(err: QueryError) -> Response {
    match &err {
        QueryError::SourceNotFound { .. } => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": err.to_string() }))).into_response()
        }
        QueryError::UnknownField { .. } => bad_request(err.to_string()),
        QueryError::Store(_) => server_error(err.to_string()),
    }
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn server_error(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
        .into_response()
}
