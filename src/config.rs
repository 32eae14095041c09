//! Carga y gestión de configuración de la aplicación (rutas, LLM y embeddings).

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    fn default_chat_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Gemini => "gemini-2.5-flash",
        }
    }
}

/// Origen de los embeddings: modelo local (ONNX) o API remota de OpenAI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmbeddingBackend {
    Local,
    OpenAI,
}

impl EmbeddingBackend {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "openai" => Ok(Self::OpenAI),
            other => Err(anyhow!("Proveedor de embeddings no soportado: {other}")),
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Self::Local => "sentence-transformers/all-MiniLM-L6-v2",
            Self::OpenAI => "text-embedding-3-small",
        }
    }

    fn default_dim(&self) -> usize {
        match self {
            Self::Local => 384,
            Self::OpenAI => 1536,
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub open_browser: bool,
    pub frontend_dir: PathBuf,

    /// Directorio persistente del índice y del fichero GraphML.
    pub working_dir: PathBuf,
    /// Directorio de staging para documentos pendientes de ingesta.
    pub upload_dir: PathBuf,
    /// Ruta fija del HTML del grafo renderizado.
    pub graph_html_path: PathBuf,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,

    pub embedding_backend: EmbeddingBackend,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub embedding_batch_size: usize,

    pub chunk_max_chars: usize,
    pub query_top_k: usize,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());
        let open_browser = env::var("OPEN_BROWSER")
            .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);
        let frontend_dir = path_var("FRONTEND_DIR", "frontend");

        let working_dir = path_var("WORKING_DIR", "./rag-working-dir");
        let upload_dir = path_var("UPLOAD_DIR", "./uploads");
        let graph_html_path = path_var("GRAPH_HTML_PATH", "graph/knowledge_graph.html");

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;
        let llm_chat_model = env::var("LLM_CHAT_MODEL")
            .unwrap_or_else(|_| llm_provider.default_chat_model().to_string());

        let embedding_backend_str =
            env::var("EMBEDDING_PROVIDER").unwrap_or_else(|_| "local".to_string());
        let embedding_backend = EmbeddingBackend::from_str(&embedding_backend_str)?;
        let embedding_model = env::var("EMBEDDING_MODEL")
            .unwrap_or_else(|_| embedding_backend.default_model().to_string());
        let embedding_dim = usize_var("EMBEDDING_DIM", embedding_backend.default_dim())?;
        let embedding_batch_size = usize_var("EMBEDDING_BATCH_SIZE", 32)?;

        let chunk_max_chars = usize_var("CHUNK_MAX_CHARS", 1200)?;
        let query_top_k = usize_var("QUERY_TOP_K", 10)?;

        if embedding_batch_size == 0 || chunk_max_chars == 0 || query_top_k == 0 {
            return Err(anyhow!(
                "EMBEDDING_BATCH_SIZE, CHUNK_MAX_CHARS y QUERY_TOP_K deben ser mayores que 0"
            ));
        }

        Ok(Self {
            server_addr,
            open_browser,
            frontend_dir,
            working_dir,
            upload_dir,
            graph_html_path,
            llm_provider,
            llm_chat_model,
            embedding_backend,
            embedding_model,
            embedding_dim,
            embedding_batch_size,
            chunk_max_chars,
            query_top_k,
        })
    }

    /// Ruta del fichero GraphML que el motor escribe dentro del working dir.
    pub fn graph_file_path(&self) -> PathBuf {
        crate::engine::store::graph_file_path(&self.working_dir)
    }
}

fn path_var(key: &str, default: &str) -> PathBuf {
    PathBuf::from(env::var(key).unwrap_or_else(|_| default.to_string()))
}

fn usize_var(key: &str, default: usize) -> Result<usize> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} debe ser un entero positivo, recibido '{raw}'")),
        Err(_) => Ok(default),
    }
}
