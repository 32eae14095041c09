//! Motor RAG: ingesta de documentos y consultas multi-modo sobre el working dir.
//!
//! Flujo de ingesta:
//!   1. Deduplicación por hash del contenido.
//!   2. Troceado por párrafos y embeddings de los chunks.
//!   3. Extracción de entidades y relaciones con el LLM, chunk a chunk.
//!   4. Fusión en el grafo, embeddings de los nodos/aristas modificados.
//!   5. Persistencia de los stores y del GraphML.
//!
//! Flujo de consulta: embedding de la pregunta → contexto según el modo
//! (`retrieve`) → respuesta del LLM con la forma pedida.

pub mod chunk;
pub mod extract;
pub mod retrieve;
pub mod store;

#[cfg(test)]
pub mod testing;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::embedding::EmbeddingProvider;
use crate::llm::LanguageModel;
use crate::models::{ResponseType, RetrievalMode};

use self::store::{compute_id, ChunkRecord, DocRecord, IndexStore};

/// Respuesta fija cuando no se recupera ningún contexto.
pub const NO_CONTEXT_ANSWER: &str =
    "Lo siento, no puedo responder a esa pregunta con la información indexada. [sin contexto]";

#[derive(Debug, Clone)]
pub struct QueryParam {
    pub mode: RetrievalMode,
    pub response_type: ResponseType,
    pub top_k: usize,
}

#[derive(Debug, Clone, Default)]
pub struct InsertStats {
    pub doc_id: String,
    pub duplicate: bool,
    pub chunks: usize,
    pub entities: usize,
    pub relations: usize,
}

/// Puntos de entrada del motor que usan los orquestadores.
#[async_trait]
pub trait RagEngine: Send + Sync {
    /// Ingiere el texto completo de un documento.
    async fn insert(&self, text: &str) -> Result<InsertStats>;

    /// Responde a la pregunta con el modo y la forma indicados.
    async fn query(&self, question: &str, param: &QueryParam) -> Result<String>;
}

pub struct GraphRagEngine {
    working_dir: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LanguageModel>,
    chunk_max_chars: usize,
}

impl GraphRagEngine {
    /// Prepara el working dir. No crea el índice: eso ocurre con la primera ingesta.
    pub async fn initialize(
        working_dir: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
        chunk_max_chars: usize,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(working_dir)
            .await
            .with_context(|| format!("No se pudo crear el working dir {}", working_dir.display()))?;
        info!("Motor RAG inicializado sobre {}", working_dir.display());
        Ok(Self {
            working_dir: working_dir.to_path_buf(),
            embedder,
            llm,
            chunk_max_chars,
        })
    }

    async fn embed_expected(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self.embedder.embed(texts).await?;
        if vectors.len() != texts.len() {
            return Err(anyhow!(
                "Número de embeddings ({}) distinto al número de textos ({})",
                vectors.len(),
                texts.len()
            ));
        }
        Ok(vectors)
    }

    /// Los vectores guardados tienen que venir del mismo modelo de embeddings.
    fn ensure_dimension(&self, store: &IndexStore, produced: usize) -> Result<()> {
        match store.stored_dimension() {
            Some(stored) if stored != produced => bail!(
                "El índice en {} usa embeddings de dimensión {stored} y {} produce {produced}. \
                 Borra los datos (reset) y reconstruye la base de datos.",
                self.working_dir.display(),
                self.embedder.model_name()
            ),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RagEngine for GraphRagEngine {
    async fn insert(&self, text: &str) -> Result<InsertStats> {
        let content = text.trim();
        if content.is_empty() {
            warn!("Documento vacío; no hay nada que indexar.");
            return Ok(InsertStats::default());
        }

        let doc_id = compute_id("doc-", content);
        let mut store = IndexStore::load(&self.working_dir).await?;
        if store.docs.contains_key(&doc_id) {
            info!("Documento {doc_id} ya indexado, se omite.");
            return Ok(InsertStats {
                doc_id,
                duplicate: true,
                ..Default::default()
            });
        }

        // --- Fase 1: chunks y embeddings ---
        let chunk_texts = chunk::split_into_chunks(content, self.chunk_max_chars);
        let chunk_vectors = self.embed_expected(&chunk_texts).await?;
        if let Some(first) = chunk_vectors.first() {
            self.ensure_dimension(&store, first.len())?;
        }
        let chunks: Vec<ChunkRecord> = chunk_texts
            .into_iter()
            .zip(chunk_vectors)
            .enumerate()
            .map(|(order, (content, embedding))| ChunkRecord {
                id: compute_id("chunk-", &content),
                doc_id: doc_id.clone(),
                order,
                content,
                embedding,
            })
            .collect();

        // --- Fase 2: extracción de entidades y relaciones ---
        let mut extractions = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            info!("{doc_id}: extrayendo conocimiento del chunk {}/{}", i + 1, chunks.len());
            let response = self
                .llm
                .complete(extract::EXTRACTION_PROMPT, &chunk.content)
                .await
                .context("Fallo del LLM durante la extracción")?;
            extractions.push((chunk.id.clone(), extract::parse_extraction(&response)));
        }

        // --- Fase 3: fusión en el grafo y embeddings de lo modificado ---
        let (entity_keys, relation_keys) = store.merge_extractions(&extractions);

        let entity_texts: Vec<String> = entity_keys
            .iter()
            .map(|k| store.entities[k].embedding_text())
            .collect();
        let entity_vectors = self.embed_expected(&entity_texts).await?;
        for (key, vector) in entity_keys.iter().zip(entity_vectors) {
            if let Some(entity) = store.entities.get_mut(key) {
                entity.embedding = vector;
            }
        }

        let relation_texts: Vec<String> = relation_keys
            .iter()
            .map(|k| store.relations[k].embedding_text())
            .collect();
        let relation_vectors = self.embed_expected(&relation_texts).await?;
        for (key, vector) in relation_keys.iter().zip(relation_vectors) {
            if let Some(relation) = store.relations.get_mut(key) {
                relation.embedding = vector;
            }
        }

        // --- Fase 4: persistencia ---
        let stats = InsertStats {
            doc_id: doc_id.clone(),
            duplicate: false,
            chunks: chunks.len(),
            entities: entity_keys.len(),
            relations: relation_keys.len(),
        };
        store.docs.insert(
            doc_id.clone(),
            DocRecord {
                summary: content.chars().take(100).collect(),
                chunk_ids: chunks.iter().map(|c| c.id.clone()).collect(),
                created_at: Utc::now(),
            },
        );
        for chunk in chunks {
            store.chunks.insert(chunk.id.clone(), chunk);
        }
        store.save(&self.working_dir).await?;

        info!(
            "Ingerido {} con {} chunks, {} entidades y {} relaciones.",
            doc_id, stats.chunks, stats.entities, stats.relations
        );
        Ok(stats)
    }

    async fn query(&self, question: &str, param: &QueryParam) -> Result<String> {
        let store = IndexStore::load(&self.working_dir).await?;
        if store.docs.is_empty() {
            bail!(
                "El índice en {} está vacío; construye la base de datos primero",
                self.working_dir.display()
            );
        }

        let query_vector = self
            .embed_expected(&[question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No se pudo generar el embedding de la pregunta"))?;
        self.ensure_dimension(&store, query_vector.len())?;

        let context = retrieve::build_context(&store, &query_vector, param.mode, param.top_k);
        if context.is_empty() {
            info!("Consulta en modo {} sin contexto relevante.", param.mode);
            return Ok(NO_CONTEXT_ANSWER.to_string());
        }

        let system_prompt = rag_system_prompt(param.response_type, &context.render());
        self.llm.complete(&system_prompt, question).await
    }
}

fn rag_system_prompt(response_type: ResponseType, context: &str) -> String {
    format!(
        r#"Eres un asistente experto que responde preguntas sobre los documentos indexados.
Sólo puedes usar la información suministrada en el contexto, que contiene entidades y relaciones
de un grafo de conocimiento y fragmentos de los documentos originales.
Si el contexto no contiene la respuesta, di explícitamente que no la sabes.
Responde en el mismo idioma que la pregunta.

Formato de respuesta: {response_type}

Contexto:
{context}"#
    )
}
