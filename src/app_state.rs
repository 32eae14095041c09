use std::io::ErrorKind;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::{
    config::AppConfig,
    embedding::EmbeddingProvider,
    engine::{GraphRagEngine, RagEngine},
    error::AppError,
    llm::LanguageModel,
    session::{Session, SessionStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub llm: Arc<dyn LanguageModel>,
    pub sessions: SessionStore,
    pub status: SharedStatus,
    /// Una sola operación del motor (build, query, reset) a la vez.
    pub engine_gate: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
}

pub type SharedStatus = Arc<Mutex<Status>>;

pub fn update_status(status: &SharedStatus, f: impl FnOnce(&mut Status)) {
    let mut guard = status.lock().unwrap_or_else(|p| p.into_inner());
    f(&mut guard);
}

pub fn read_status(status: &SharedStatus) -> Status {
    status.lock().unwrap_or_else(|p| p.into_inner()).clone()
}

impl AppState {
    pub fn new(
        config: AppConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            config,
            embedder,
            llm,
            sessions: SessionStore::default(),
            status: Arc::new(Mutex::new(Status {
                is_busy: false,
                message: "Servidor listo.".to_string(),
                progress: 0.0,
            })),
            engine_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Devuelve el motor de la sesión, inicializándolo sobre el working dir si
    /// todavía no se cargó (o si un reset lo descartó).
    pub async fn engine_for(&self, session: &mut Session) -> Result<Arc<dyn RagEngine>, AppError> {
        if let Some(engine) = &session.engine {
            return Ok(engine.clone());
        }
        let engine = GraphRagEngine::initialize(
            &self.config.working_dir,
            self.embedder.clone(),
            self.llm.clone(),
            self.config.chunk_max_chars,
        )
        .await
        .map_err(AppError::Engine)?;
        let engine: Arc<dyn RagEngine> = Arc::new(engine);
        session.engine = Some(engine.clone());
        Ok(engine)
    }

    /// Borra índice, staging y HTML del grafo, y descarta los motores cargados.
    pub async fn reset(&self) -> Result<(), AppError> {
        let _gate = self.engine_gate.lock().await;

        remove_path(&self.config.working_dir).await?;
        remove_path(&self.config.upload_dir).await?;
        remove_path(&self.config.graph_html_path).await?;
        self.sessions.clear_engines().await;

        update_status(&self.status, |s| {
            s.is_busy = false;
            s.progress = 0.0;
            s.message = "Datos eliminados. Listo para una nueva base de datos.".to_string();
        });
        info!("Reset completado: working dir, staging y grafo eliminados.");
        Ok(())
    }
}

/// Elimina un fichero o directorio. Que no exista no es un error.
async fn remove_path(path: &Path) -> Result<(), AppError> {
    let result = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
