//! Adaptador de embeddings: `(textos) -> matriz de vectores`.
//!
//! Dos implementaciones intercambiables detrás de [`EmbeddingProvider`]:
//!   - [`LocalEmbedder`]: modelo sentence-transformers ejecutado con fastembed (ONNX).
//!   - [`RemoteEmbedder`]: API de embeddings de OpenAI vía Rig, por lotes. Si un lote
//!     falla se sustituye por vectores a cero en lugar de abortar la petición
//!     completa (degradación documentada: se pierde precisión, no disponibilidad).

use std::future::Future;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use fastembed::{InitOptions, TextEmbedding};
use tracing::{info, warn};

use crate::config::{AppConfig, EmbeddingBackend};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Devuelve un vector por texto, en el mismo orden. Entrada vacía => salida vacía.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Construye el proveedor configurado.
pub fn from_config(cfg: &AppConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match cfg.embedding_backend {
        EmbeddingBackend::Local => {
            Arc::new(LocalEmbedder::new(&cfg.embedding_model, cfg.embedding_dim)?)
        }
        EmbeddingBackend::OpenAI => Arc::new(RemoteEmbedder::new(
            &cfg.embedding_model,
            cfg.embedding_dim,
            cfg.embedding_batch_size,
        )?),
    };
    info!(
        "Embeddings: modelo '{}' ({} dimensiones).",
        provider.model_name(),
        provider.dimension()
    );
    Ok(provider)
}

// ---------------------------------------------------------------------
// LOCAL (fastembed)
// ---------------------------------------------------------------------

fn local_model_spec(name: &str) -> Option<(fastembed::EmbeddingModel, usize)> {
    let short = name.rsplit('/').next().unwrap_or(name);
    match short.to_lowercase().as_str() {
        "all-minilm-l6-v2" => Some((fastembed::EmbeddingModel::AllMiniLML6V2, 384)),
        "all-minilm-l12-v2" => Some((fastembed::EmbeddingModel::AllMiniLML12V2, 384)),
        "bge-small-en-v1.5" => Some((fastembed::EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Some((fastembed::EmbeddingModel::BGEBaseENV15, 768)),
        _ => None,
    }
}

pub struct LocalEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dim: usize,
}

impl LocalEmbedder {
    /// Carga el modelo (lo descarga la primera vez).
    pub fn new(model_name: &str, expected_dim: usize) -> Result<Self> {
        let (model_kind, dim) = local_model_spec(model_name)
            .ok_or_else(|| anyhow!("Modelo de embeddings local no soportado: {model_name}"))?;
        if dim != expected_dim {
            return Err(anyhow!(
                "EMBEDDING_DIM={expected_dim} no coincide con el modelo {model_name} ({dim})"
            ));
        }

        let options = InitOptions::new(model_kind).with_show_download_progress(true);
        let model = TextEmbedding::try_new(options)
            .map_err(|e| anyhow!("No se pudo inicializar el modelo de embeddings: {e}"))?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name: model_name.to_string(),
            dim,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // La inferencia ONNX es CPU intensiva: fuera del runtime async.
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            let model = model
                .lock()
                .map_err(|_| anyhow!("El modelo de embeddings quedó envenenado"))?;
            model
                .embed(texts, None)
                .map_err(|e| anyhow!("Fallo calculando embeddings: {e}"))
        })
        .await
        .context("La tarea de embeddings terminó inesperadamente")?
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

// ---------------------------------------------------------------------
// REMOTO (OpenAI vía Rig)
// ---------------------------------------------------------------------

pub struct RemoteEmbedder {
    model_name: String,
    dim: usize,
    batch_size: usize,
}

impl RemoteEmbedder {
    pub fn new(model_name: &str, dim: usize, batch_size: usize) -> Result<Self> {
        std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("Falta OPENAI_API_KEY para los embeddings remotos"))?;
        Ok(Self {
            model_name: model_name.to_string(),
            dim,
            batch_size: batch_size.max(1),
        })
    }

    async fn embed_batch_openai(&self, batch: Vec<String>) -> Result<Vec<Vec<f32>>> {
        use rig::client::{EmbeddingsClient as _, ProviderClient as _};
        use rig::embeddings::EmbeddingModel as _;
        use rig::providers::openai;

        let client = openai::Client::from_env();
        let embedding_model = client.embedding_model(&self.model_name);
        let embeddings = embedding_model.embed_texts(batch).await?;

        Ok(embeddings
            .into_iter()
            .map(|e| e.vec.into_iter().map(|x| x as f32).collect())
            .collect())
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(embed_in_batches(texts, self.batch_size, self.dim, |batch| {
            self.embed_batch_openai(batch)
        })
        .await)
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Trocea `texts` en lotes de `batch_size` y llama a `embed_batch` para cada uno.
/// Un lote que falla (o devuelve un número de vectores incorrecto) se rellena
/// con vectores a cero de dimensión `dim`.
pub async fn embed_in_batches<F, Fut>(
    texts: &[String],
    batch_size: usize,
    dim: usize,
    mut embed_batch: F,
) -> Vec<Vec<f32>>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = Result<Vec<Vec<f32>>>>,
{
    let mut all = Vec::with_capacity(texts.len());
    for (i, batch) in texts.chunks(batch_size.max(1)).enumerate() {
        match embed_batch(batch.to_vec()).await {
            Ok(vectors) if vectors.len() == batch.len() => all.extend(vectors),
            Ok(vectors) => {
                warn!(
                    "Lote de embeddings {i}: se esperaban {} vectores y llegaron {}. Se rellena con ceros.",
                    batch.len(),
                    vectors.len()
                );
                all.extend(std::iter::repeat(vec![0.0; dim]).take(batch.len()));
            }
            Err(e) => {
                warn!("Lote de embeddings {i} falló: {e:#}. Se rellena con ceros.");
                all.extend(std::iter::repeat(vec![0.0; dim]).take(batch.len()));
            }
        }
    }
    all
}
