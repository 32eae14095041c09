use anyhow::anyhow;
use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, State},
    response::Html,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    app_state::{read_status, AppState, Status},
    engine::store,
    error::AppError,
    ingest,
    models::{BuildOutcome, BuildReport, Document, QueryRequest, QueryResult},
    rag, render,
    session::SessionId,
};

/// Tamaño máximo de una subida de documentos.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Serialize)]
pub struct BuildResponse {
    report: BuildReport,
    outcome: BuildOutcome,
    message: String,
}

#[derive(Serialize)]
pub struct IndexInfo {
    exists: bool,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/api/build",
            post(build_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/query", post(query_handler))
        .route("/api/answer", get(answer_handler))
        .route("/api/graph", get(graph_handler))
        .route("/api/index", get(index_handler))
        .route("/api/status", get(status_handler))
        .route("/api/reset", post(reset_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(read_status(&state.status))
}

#[axum::debug_handler]
async fn index_handler(State(state): State<AppState>) -> Json<IndexInfo> {
    Json(IndexInfo {
        exists: store::index_exists(&state.config.working_dir).await,
    })
}

async fn read_documents(mut multipart: Multipart) -> Result<Vec<Document>, AppError> {
    let mut documents = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidUpload(e.to_string()))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        if filename.is_empty() {
            continue;
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::InvalidUpload(e.to_string()))?;
        documents.push(Document::new(filename, bytes.to_vec()));
    }
    Ok(documents)
}

async fn run_build(
    state: AppState,
    session_id: Uuid,
    documents: Vec<Document>,
) -> Result<BuildReport, AppError> {
    let _gate = state.engine_gate.lock().await;
    let handle = state.sessions.get_or_create(session_id);
    let mut session = handle.lock().await;
    let engine = state.engine_for(&mut session).await?;

    ingest::build_index(
        engine.as_ref(),
        &state.config.upload_dir,
        documents,
        &state.status,
    )
    .await
}

#[axum::debug_handler]
async fn build_handler(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
    multipart: Multipart,
) -> Result<Json<BuildResponse>, AppError> {
    let documents = read_documents(multipart).await?;
    if documents.is_empty() {
        return Err(AppError::NoDocuments);
    }
    info!("Construcción solicitada con {} documentos.", documents.len());

    // El lote sigue en su propia tarea aunque el cliente se desconecte.
    let report = tokio::spawn(run_build(state, session_id, documents))
        .await
        .map_err(|e| AppError::Engine(anyhow!("La construcción terminó inesperadamente: {e}")))??;

    Ok(Json(BuildResponse {
        outcome: report.outcome(),
        message: report.to_string(),
        report,
    }))
}

#[axum::debug_handler]
async fn query_handler(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResult>, AppError> {
    let handle = state.sessions.get_or_create(session_id);
    let result = rag::run_query(&state, &handle, request).await?;
    Ok(Json(result))
}

#[axum::debug_handler]
async fn answer_handler(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
) -> Json<Option<QueryResult>> {
    let Some(handle) = state.sessions.get(session_id) else {
        return Json(None);
    };
    let answer = handle.lock().await.last_answer.clone();
    Json(answer)
}

#[axum::debug_handler]
async fn graph_handler(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let _gate = state.engine_gate.lock().await;
    let rendered = render::render_graph_file(
        &state.config.graph_file_path(),
        &state.config.graph_html_path,
    )
    .await?;
    Ok(Html(rendered.html))
}

#[axum::debug_handler]
async fn reset_handler(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.reset().await?;
    Ok(Json(json!({ "message": "Datos eliminados correctamente." })))
}
