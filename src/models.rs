//! Modelos de dominio compartidos entre la API, los orquestadores y el motor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Documento subido por el usuario: nombre de fichero y bytes crudos.
#[derive(Debug, Clone)]
pub struct Document {
    pub filename: String,
    pub content: Vec<u8>,
}

impl Document {
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }
}

/// Estrategia de recuperación que usa el motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Entidades cercanas a la pregunta y su vecindario.
    Local,
    /// Relaciones cercanas a la pregunta.
    Global,
    #[default]
    Hybrid,
    /// Sólo búsqueda vectorial sobre chunks.
    Naive,
    /// Grafo + vectores.
    Mix,
}

impl std::fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::Global => "global",
            Self::Hybrid => "hybrid",
            Self::Naive => "naive",
            Self::Mix => "mix",
        };
        f.write_str(name)
    }
}

/// Forma de la respuesta que se pide al LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResponseType {
    #[default]
    #[serde(rename = "Multiple Paragraphs")]
    MultipleParagraphs,
    #[serde(rename = "Single Paragraph")]
    SingleParagraph,
    #[serde(rename = "Bullet Points")]
    BulletPoints,
}

impl std::fmt::Display for ResponseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::MultipleParagraphs => "Multiple Paragraphs",
            Self::SingleParagraph => "Single Paragraph",
            Self::BulletPoints => "Bullet Points",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default)]
    pub mode: RetrievalMode,
    #[serde(default)]
    pub response_type: ResponseType,
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// Respuesta mostrada al usuario; sólo vive en la sesión.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub answer: String,
    pub mode: RetrievalMode,
    pub response_type: ResponseType,
    pub answered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentFailure {
    pub filename: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildOutcome {
    Success,
    Partial,
    Failure,
}

/// Resultado de una construcción del índice por lotes.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub total: usize,
    pub processed: usize,
    pub processed_files: Vec<String>,
    pub failures: Vec<DocumentFailure>,
}

impl BuildReport {
    pub fn outcome(&self) -> BuildOutcome {
        if self.processed == self.total {
            BuildOutcome::Success
        } else if self.processed == 0 {
            BuildOutcome::Failure
        } else {
            BuildOutcome::Partial
        }
    }
}

impl std::fmt::Display for BuildReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.outcome() {
            BuildOutcome::Success => write!(
                f,
                "Base de datos construida con {} documentos.",
                self.processed
            ),
            BuildOutcome::Partial => write!(
                f,
                "Base de datos construida parcialmente: {} de {} documentos ingeridos, {} con error.",
                self.processed,
                self.total,
                self.failures.len()
            ),
            BuildOutcome::Failure => write!(
                f,
                "No se pudo ingerir ninguno de los {} documentos.",
                self.total
            ),
        }
    }
}
