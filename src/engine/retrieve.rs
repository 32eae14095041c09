//! Recuperación de contexto según el modo de consulta.
//!
//! - `naive`:  chunks más cercanos a la pregunta.
//! - `local`:  entidades más cercanas + sus relaciones + chunks de origen.
//! - `global`: relaciones más cercanas + sus extremos + chunks de origen.
//! - `hybrid`: `local` ∪ `global`.
//! - `mix`:    `hybrid` ∪ `naive`.

use std::collections::HashSet;

use crate::engine::store::{ChunkRecord, EntityRecord, IndexStore, RelationRecord};
use crate::models::RetrievalMode;

/// Por debajo de esta similitud coseno un elemento no se considera relevante.
pub const COSINE_THRESHOLD: f32 = 0.2;

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn rank<'a, T, F>(items: impl IntoIterator<Item = &'a T>, vector: F, query: &[f32], top_k: usize) -> Vec<&'a T>
where
    T: 'a,
    F: Fn(&T) -> &[f32],
{
    let mut scored: Vec<(f32, &T)> = items
        .into_iter()
        .map(|item| (cosine_similarity(vector(item), query), item))
        .filter(|(score, _)| *score >= COSINE_THRESHOLD)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().take(top_k).map(|(_, item)| item).collect()
}

/// Contexto recuperado para una pregunta.
#[derive(Debug, Default)]
pub struct QueryContext<'a> {
    pub entities: Vec<&'a EntityRecord>,
    pub relations: Vec<&'a RelationRecord>,
    pub chunks: Vec<&'a ChunkRecord>,
}

impl<'a> QueryContext<'a> {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty() && self.chunks.is_empty()
    }

    fn push_entity(&mut self, entity: &'a EntityRecord) {
        if !self.entities.iter().any(|e| e.name == entity.name) {
            self.entities.push(entity);
        }
    }

    fn push_relation(&mut self, relation: &'a RelationRecord) {
        if !self.relations.iter().any(|r| r.key() == relation.key()) {
            self.relations.push(relation);
        }
    }

    fn push_chunk(&mut self, chunk: &'a ChunkRecord) {
        if !self.chunks.iter().any(|c| c.id == chunk.id) {
            self.chunks.push(chunk);
        }
    }

    fn absorb(&mut self, other: QueryContext<'a>) {
        other.entities.into_iter().for_each(|e| self.push_entity(e));
        other.relations.into_iter().for_each(|r| self.push_relation(r));
        other.chunks.into_iter().for_each(|c| self.push_chunk(c));
    }

    /// Texto que se inyecta en el prompt del LLM.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.entities.is_empty() {
            out.push_str("-----Entidades-----\nnombre | tipo | descripción\n");
            for e in &self.entities {
                out.push_str(&format!("{} | {} | {}\n", e.name, e.entity_type, e.description));
            }
            out.push('\n');
        }
        if !self.relations.is_empty() {
            out.push_str("-----Relaciones-----\norigen | destino | palabras clave | descripción\n");
            for r in &self.relations {
                out.push_str(&format!(
                    "{} | {} | {} | {}\n",
                    r.source, r.target, r.keywords, r.description
                ));
            }
            out.push('\n');
        }
        if !self.chunks.is_empty() {
            out.push_str("-----Fuentes-----\n");
            for c in &self.chunks {
                out.push_str(&c.content);
                out.push_str("\n---\n");
            }
        }
        out
    }
}

pub fn build_context<'a>(
    store: &'a IndexStore,
    query: &[f32],
    mode: RetrievalMode,
    top_k: usize,
) -> QueryContext<'a> {
    match mode {
        RetrievalMode::Naive => naive_context(store, query, top_k),
        RetrievalMode::Local => local_context(store, query, top_k),
        RetrievalMode::Global => global_context(store, query, top_k),
        RetrievalMode::Hybrid => {
            let mut ctx = local_context(store, query, top_k);
            ctx.absorb(global_context(store, query, top_k));
            ctx
        }
        RetrievalMode::Mix => {
            let mut ctx = local_context(store, query, top_k);
            ctx.absorb(global_context(store, query, top_k));
            ctx.absorb(naive_context(store, query, top_k));
            ctx
        }
    }
}

fn naive_context<'a>(store: &'a IndexStore, query: &[f32], top_k: usize) -> QueryContext<'a> {
    QueryContext {
        chunks: rank(store.chunks.values(), |c| c.embedding.as_slice(), query, top_k),
        ..Default::default()
    }
}

fn local_context<'a>(store: &'a IndexStore, query: &[f32], top_k: usize) -> QueryContext<'a> {
    let mut ctx = QueryContext::default();
    let entities = rank(store.entities.values(), |e| e.embedding.as_slice(), query, top_k);
    let names: HashSet<&str> = entities.iter().map(|e| e.name.as_str()).collect();

    let mut related: Vec<&RelationRecord> = store
        .relations
        .values()
        .filter(|r| names.contains(r.source.as_str()) || names.contains(r.target.as_str()))
        .collect();
    related.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    related.into_iter().take(top_k).for_each(|r| ctx.push_relation(r));

    for entity in &entities {
        for chunk_id in &entity.source_ids {
            if let Some(chunk) = store.chunks.get(chunk_id) {
                if ctx.chunks.len() < top_k {
                    ctx.push_chunk(chunk);
                }
            }
        }
    }
    entities.into_iter().for_each(|e| ctx.push_entity(e));
    ctx
}

fn global_context<'a>(store: &'a IndexStore, query: &[f32], top_k: usize) -> QueryContext<'a> {
    let mut ctx = QueryContext::default();
    let relations = rank(store.relations.values(), |r| r.embedding.as_slice(), query, top_k);

    for relation in &relations {
        for endpoint in [&relation.source, &relation.target] {
            if let Some(entity) = store.entities.get(endpoint) {
                ctx.push_entity(entity);
            }
        }
        for chunk_id in &relation.source_ids {
            if let Some(chunk) = store.chunks.get(chunk_id) {
                if ctx.chunks.len() < top_k {
                    ctx.push_chunk(chunk);
                }
            }
        }
    }
    relations.into_iter().for_each(|r| ctx.push_relation(r));
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn chunk(id: &str, content: &str, embedding: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            doc_id: "doc".to_string(),
            order: 0,
            content: content.to_string(),
            embedding,
        }
    }

    fn sample_store() -> IndexStore {
        let mut store = IndexStore::default();
        store.chunks.insert("c1".into(), chunk("c1", "texto del trigo", vec![1.0, 0.0, 0.0]));
        store.chunks.insert("c2".into(), chunk("c2", "texto del arroz", vec![0.0, 1.0, 0.0]));
        store.chunks.insert("c3".into(), chunk("c3", "texto de la roya", vec![0.0, 0.0, 1.0]));

        store.entities.insert(
            "TRIGO".into(),
            EntityRecord {
                name: "TRIGO".into(),
                entity_type: "CONCEPT".into(),
                description: "Cereal".into(),
                source_ids: BTreeSet::from(["c1".to_string()]),
                embedding: vec![0.0, 1.0, 0.0],
            },
        );
        store.entities.insert(
            "ROYA".into(),
            EntityRecord {
                name: "ROYA".into(),
                entity_type: "EVENT".into(),
                description: "Hongo".into(),
                source_ids: BTreeSet::from(["c3".to_string()]),
                embedding: vec![0.0, 0.0, 1.0],
            },
        );
        store.relations.insert(
            "ROYA<SEP>TRIGO".into(),
            RelationRecord {
                source: "TRIGO".into(),
                target: "ROYA".into(),
                description: "La roya ataca al trigo".into(),
                keywords: "plaga".into(),
                weight: 3.0,
                source_ids: BTreeSet::from(["c3".to_string()]),
                embedding: vec![1.0, 0.0, 0.0],
            },
        );
        store
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn naive_uses_only_chunks() {
        let store = sample_store();
        let ctx = build_context(&store, &[1.0, 0.0, 0.0], RetrievalMode::Naive, 5);
        assert!(ctx.entities.is_empty() && ctx.relations.is_empty());
        assert_eq!(ctx.chunks.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["c1"]);
    }

    #[test]
    fn local_starts_from_entities() {
        let store = sample_store();
        let ctx = build_context(&store, &[0.0, 1.0, 0.0], RetrievalMode::Local, 5);
        assert_eq!(ctx.entities.len(), 1);
        assert_eq!(ctx.entities[0].name, "TRIGO");
        assert_eq!(ctx.relations.len(), 1);
        assert_eq!(ctx.chunks[0].id, "c1");
    }

    #[test]
    fn global_starts_from_relations() {
        let store = sample_store();
        let ctx = build_context(&store, &[1.0, 0.0, 0.0], RetrievalMode::Global, 5);
        assert_eq!(ctx.relations.len(), 1);
        assert_eq!(ctx.entities.len(), 2);
        assert_eq!(ctx.chunks[0].id, "c3");
    }

    #[test]
    fn mix_adds_vector_chunks_to_graph_context() {
        let store = sample_store();
        let hybrid = build_context(&store, &[1.0, 0.0, 0.0], RetrievalMode::Hybrid, 5);
        let mix = build_context(&store, &[1.0, 0.0, 0.0], RetrievalMode::Mix, 5);
        assert!(!hybrid.chunks.iter().any(|c| c.id == "c1"));
        assert!(mix.chunks.iter().any(|c| c.id == "c1"));
        assert_eq!(mix.relations.len(), 1);
    }

    #[test]
    fn unrelated_query_gives_empty_context() {
        let mut store = sample_store();
        store.chunks.clear();
        let ctx = build_context(&store, &[-1.0, -1.0, -1.0], RetrievalMode::Mix, 5);
        assert!(ctx.is_empty());
        assert!(ctx.render().is_empty());
    }
}
