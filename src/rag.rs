//! Consulta RAG desde la interfaz.
//!
//! Flujo:
//!   1. Validar la pregunta y comprobar que el índice existe.
//!   2. Cargar (o reutilizar) el motor de la sesión sobre el working dir.
//!   3. Pasar modo y forma de respuesta tal cual al motor.
//!   4. Guardar la respuesta como la última de la sesión.

use chrono::Utc;
use tracing::info;

use crate::{
    app_state::AppState,
    engine::{store, QueryParam},
    error::AppError,
    models::{QueryRequest, QueryResult},
    session::SessionHandle,
};

pub async fn run_query(
    state: &AppState,
    session: &SessionHandle,
    request: QueryRequest,
) -> Result<QueryResult, AppError> {
    let question = request.question.trim();
    if question.is_empty() {
        return Err(AppError::EmptyQuestion);
    }

    let _gate = state.engine_gate.lock().await;
    if !store::index_exists(&state.config.working_dir).await {
        return Err(AppError::IndexNotBuilt);
    }

    let mut session = session.lock().await;
    let engine = state.engine_for(&mut session).await?;

    let param = QueryParam {
        mode: request.mode,
        response_type: request.response_type,
        top_k: request.top_k.unwrap_or(state.config.query_top_k).max(1),
    };
    info!("Consulta en modo '{}' ({}): {}", param.mode, param.response_type, question);

    let answer = engine
        .query(question, &param)
        .await
        .map_err(AppError::Engine)?;

    let result = QueryResult {
        answer,
        mode: param.mode,
        response_type: param.response_type,
        answered_at: Utc::now(),
    };
    session.last_answer = Some(result.clone());
    Ok(result)
}
