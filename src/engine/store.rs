//! Almacenamiento del índice en el working dir.
//!
//! Ficheros:
//!   - `kv_store_full_docs.json`     documentos ingeridos (clave: hash del contenido)
//!   - `kv_store_text_chunks.json`   chunks con su embedding
//!   - `vdb_entities.json`           entidades (nodos) con su embedding
//!   - `vdb_relationships.json`      relaciones (aristas) con su embedding
//!   - `graph_chunk_entity_relation.graphml`  grafo exportado para visualización

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::engine::extract::{normalize_name, normalize_type, ExtractionResult};
use crate::graph::{Attributes, KnowledgeGraph};

const DOCS_FILE: &str = "kv_store_full_docs.json";
const CHUNKS_FILE: &str = "kv_store_text_chunks.json";
const ENTITIES_FILE: &str = "vdb_entities.json";
const RELATIONS_FILE: &str = "vdb_relationships.json";
const GRAPH_FILE: &str = "graph_chunk_entity_relation.graphml";

/// Separador entre fragmentos de descripción/origen acumulados.
pub const GRAPH_FIELD_SEP: &str = "<SEP>";

pub fn graph_file_path(working_dir: &Path) -> PathBuf {
    working_dir.join(GRAPH_FILE)
}

/// El índice existe cuando al menos una ingesta se ha persistido.
pub async fn index_exists(working_dir: &Path) -> bool {
    tokio::fs::try_exists(working_dir.join(DOCS_FILE))
        .await
        .unwrap_or(false)
}

/// Identificador estable derivado del contenido.
pub fn compute_id(prefix: &str, content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let hex: String = digest.iter().take(16).map(|b| format!("{b:02x}")).collect();
    format!("{prefix}{hex}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocRecord {
    pub summary: String,
    pub chunk_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub doc_id: String,
    pub order: usize,
    pub content: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub name: String,
    pub entity_type: String,
    pub description: String,
    pub source_ids: BTreeSet<String>,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

impl EntityRecord {
    pub fn embedding_text(&self) -> String {
        format!("{}\n{}", self.name, self.description)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationRecord {
    pub source: String,
    pub target: String,
    pub description: String,
    pub keywords: String,
    pub weight: f32,
    pub source_ids: BTreeSet<String>,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

impl RelationRecord {
    pub fn key(&self) -> String {
        relation_key(&self.source, &self.target)
    }

    pub fn embedding_text(&self) -> String {
        format!(
            "{}\t{}\n{}\n{}",
            self.keywords, self.source, self.target, self.description
        )
    }
}

/// Clave de una relación no dirigida: los extremos en orden.
pub fn relation_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}{GRAPH_FIELD_SEP}{b}")
    } else {
        format!("{b}{GRAPH_FIELD_SEP}{a}")
    }
}

/// Añade `fragment` a un campo acumulado si aún no está.
fn merge_field(existing: &mut String, fragment: &str) {
    let fragment = fragment.trim();
    if fragment.is_empty() || existing.split(GRAPH_FIELD_SEP).any(|f| f == fragment) {
        return;
    }
    if !existing.is_empty() {
        existing.push_str(GRAPH_FIELD_SEP);
    }
    existing.push_str(fragment);
}

#[derive(Debug, Default)]
pub struct IndexStore {
    pub docs: BTreeMap<String, DocRecord>,
    pub chunks: BTreeMap<String, ChunkRecord>,
    pub entities: BTreeMap<String, EntityRecord>,
    pub relations: BTreeMap<String, RelationRecord>,
}

impl IndexStore {
    /// Carga los stores presentes; los ausentes quedan vacíos.
    pub async fn load(working_dir: &Path) -> Result<Self> {
        Ok(Self {
            docs: load_json(&working_dir.join(DOCS_FILE)).await?,
            chunks: load_json(&working_dir.join(CHUNKS_FILE)).await?,
            entities: load_json(&working_dir.join(ENTITIES_FILE)).await?,
            relations: load_json(&working_dir.join(RELATIONS_FILE)).await?,
        })
    }

    /// Persiste todos los stores y reescribe el GraphML.
    /// El store de documentos se escribe el último: marca el índice como existente.
    pub async fn save(&self, working_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(working_dir)
            .await
            .with_context(|| format!("No se pudo crear {}", working_dir.display()))?;
        save_json(&working_dir.join(CHUNKS_FILE), &self.chunks).await?;
        save_json(&working_dir.join(ENTITIES_FILE), &self.entities).await?;
        save_json(&working_dir.join(RELATIONS_FILE), &self.relations).await?;
        self.to_knowledge_graph()
            .write(&graph_file_path(working_dir))
            .await?;
        save_json(&working_dir.join(DOCS_FILE), &self.docs).await?;
        Ok(())
    }

    /// Dimensión de los vectores guardados, si hay alguno.
    pub fn stored_dimension(&self) -> Option<usize> {
        self.chunks
            .values()
            .map(|c| c.embedding.len())
            .find(|len| *len > 0)
    }

    /// Fusiona las extracciones de varios chunks en el grafo.
    /// Devuelve las claves de las entidades y relaciones modificadas.
    pub fn merge_extractions(
        &mut self,
        extractions: &[(String, ExtractionResult)],
    ) -> (Vec<String>, Vec<String>) {
        let mut touched_entities = BTreeSet::new();
        let mut touched_relations = BTreeSet::new();

        for (chunk_id, extraction) in extractions {
            for entity in &extraction.entities {
                let name = normalize_name(&entity.name);
                self.upsert_entity(&name, &entity.entity_type, &entity.description, chunk_id);
                touched_entities.insert(name);
            }

            for rel in &extraction.relations {
                let source = normalize_name(&rel.source);
                let target = normalize_name(&rel.target);
                // Extremos no extraídos como entidades: se crean como UNKNOWN.
                for endpoint in [&source, &target] {
                    if !self.entities.contains_key(endpoint) {
                        self.upsert_entity(endpoint, "", &rel.description, chunk_id);
                        touched_entities.insert(endpoint.clone());
                    }
                }

                let key = relation_key(&source, &target);
                let record = self.relations.entry(key.clone()).or_insert_with(|| RelationRecord {
                    source: source.clone(),
                    target: target.clone(),
                    description: String::new(),
                    keywords: String::new(),
                    weight: 0.0,
                    source_ids: BTreeSet::new(),
                    embedding: Vec::new(),
                });
                merge_field(&mut record.description, &rel.description);
                for keyword in rel.keywords.split(',') {
                    let keyword = keyword.trim();
                    if !keyword.is_empty() && !record.keywords.split(", ").any(|k| k == keyword) {
                        if !record.keywords.is_empty() {
                            record.keywords.push_str(", ");
                        }
                        record.keywords.push_str(keyword);
                    }
                }
                record.weight += rel.strength;
                record.source_ids.insert(chunk_id.clone());
                touched_relations.insert(key);
            }
        }

        (
            touched_entities.into_iter().collect(),
            touched_relations.into_iter().collect(),
        )
    }

    fn upsert_entity(&mut self, name: &str, entity_type: &str, description: &str, chunk_id: &str) {
        let record = self
            .entities
            .entry(name.to_string())
            .or_insert_with(|| EntityRecord {
                name: name.to_string(),
                entity_type: "UNKNOWN".to_string(),
                description: String::new(),
                source_ids: BTreeSet::new(),
                embedding: Vec::new(),
            });
        let entity_type = normalize_type(entity_type);
        if record.entity_type == "UNKNOWN" {
            record.entity_type = entity_type;
        }
        merge_field(&mut record.description, description);
        record.source_ids.insert(chunk_id.to_string());
    }

    /// Entidades como nodos y relaciones como aristas, con sus atributos descriptivos.
    pub fn to_knowledge_graph(&self) -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::new();
        for entity in self.entities.values() {
            graph.upsert_node(
                &entity.name,
                Attributes::from([
                    ("entity_type".to_string(), entity.entity_type.clone()),
                    ("description".to_string(), entity.description.clone()),
                    ("source_id".to_string(), join_ids(&entity.source_ids)),
                ]),
            );
        }
        for rel in self.relations.values() {
            graph.add_edge(
                &rel.source,
                &rel.target,
                Attributes::from([
                    ("weight".to_string(), rel.weight.to_string()),
                    ("description".to_string(), rel.description.clone()),
                    ("keywords".to_string(), rel.keywords.clone()),
                    ("source_id".to_string(), join_ids(&rel.source_ids)),
                ]),
            );
        }
        graph
    }
}

fn join_ids(ids: &BTreeSet<String>) -> String {
    ids.iter().cloned().collect::<Vec<_>>().join(GRAPH_FIELD_SEP)
}

async fn load_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .with_context(|| format!("Store corrupto: {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e).with_context(|| format!("No se pudo leer {}", path.display())),
    }
}

async fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("No se pudo escribir {}", path.display()))
}
