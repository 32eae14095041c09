//! Errores visibles para el usuario y su traducción a respuestas HTTP.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Sube al menos un fichero de texto antes de construir la base de datos.")]
    NoDocuments,

    #[error("Escribe una pregunta.")]
    EmptyQuestion,

    #[error("Falta la cabecera x-session-id o no es un UUID válido.")]
    MissingSession,

    #[error("Subida inválida: {0}")]
    InvalidUpload(String),

    #[error("No existe ninguna base de datos RAG. Construye la base de datos primero.")]
    IndexNotBuilt,

    #[error("No se encontró el fichero del grafo. Construye la base de datos primero.")]
    GraphNotFound,

    #[error("Error del motor RAG: {0:#}")]
    Engine(anyhow::Error),

    #[error("Error de E/S: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NoDocuments | Self::EmptyQuestion | Self::MissingSession | Self::InvalidUpload(_) => {
                (StatusCode::BAD_REQUEST, "warning")
            }
            Self::IndexNotBuilt => (StatusCode::CONFLICT, "warning"),
            Self::GraphNotFound => (StatusCode::NOT_FOUND, "not_found"),
            Self::Engine(_) | Self::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "error"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            error!("{}", self);
        }
        (status, Json(json!({ "error": self.to_string(), "kind": kind }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_map_to_expected_status() {
        assert_eq!(AppError::NoDocuments.status_and_kind().0, StatusCode::BAD_REQUEST);
        assert_eq!(AppError::IndexNotBuilt.status_and_kind(), (StatusCode::CONFLICT, "warning"));
        assert_eq!(AppError::GraphNotFound.status_and_kind(), (StatusCode::NOT_FOUND, "not_found"));
        assert_eq!(
            AppError::Engine(anyhow::anyhow!("boom")).status_and_kind().0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn engine_error_message_keeps_the_cause_chain() {
        let err = AppError::Engine(anyhow::anyhow!("timeout").context("llamada al LLM"));
        let msg = err.to_string();
        assert!(msg.contains("llamada al LLM"));
        assert!(msg.contains("timeout"));
    }
}
