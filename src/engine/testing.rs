//! Dobles de prueba deterministas para el embedder y el LLM.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;

use crate::embedding::EmbeddingProvider;
use crate::engine::extract::EXTRACTION_PROMPT;
use crate::llm::LanguageModel;

/// Bolsa de palabras con hashing FNV-1a: textos con palabras comunes quedan cerca.
pub struct FakeEmbedder {
    pub dim: usize,
}

impl Default for FakeEmbedder {
    fn default() -> Self {
        Self { dim: 1024 }
    }
}

fn fnv1a(word: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in word.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0; self.dim];
                for w in words(text) {
                    v[(fnv1a(&w) % self.dim as u64) as usize] += 1.0;
                }
                v
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        "fake-bow"
    }
}

/// LLM falso: en extracción toma como entidades las palabras en mayúscula
/// (más de dos letras) y relaciona las consecutivas; en consultas devuelve
/// una respuesta fija y guarda el prompt de sistema.
#[derive(Default)]
pub struct FakeLlm {
    fail_on: Option<String>,
    calls: AtomicUsize,
    last_system_prompt: Mutex<Option<String>>,
}

impl FakeLlm {
    pub fn failing_on(needle: &str) -> Self {
        Self {
            fail_on: Some(needle.to_string()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_system_prompt(&self) -> Option<String> {
        self.last_system_prompt.lock().unwrap().clone()
    }

    fn extract(text: &str) -> String {
        let mut names: Vec<String> = Vec::new();
        for raw in text.split(|c: char| !c.is_alphanumeric()) {
            let capitalised = raw.chars().next().is_some_and(char::is_uppercase);
            if capitalised && raw.chars().count() > 2 && !names.iter().any(|n| n == raw) {
                names.push(raw.to_string());
            }
        }
        let entities: Vec<_> = names
            .iter()
            .map(|n| json!({"name": n, "type": "concept", "description": format!("{n} mencionado en el texto")}))
            .collect();
        let relations: Vec<_> = names
            .windows(2)
            .map(|pair| {
                json!({
                    "source": pair[0],
                    "target": pair[1],
                    "description": format!("{} y {} aparecen juntos", pair[0], pair[1]),
                    "keywords": "coaparición",
                    "strength": 2
                })
            })
            .collect();
        json!({ "entities": entities, "relations": relations }).to_string()
    }
}

#[async_trait]
impl LanguageModel for FakeLlm {
    async fn complete(&self, system_prompt: &str, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(needle) = &self.fail_on {
            if prompt.contains(needle.as_str()) {
                bail!("Error simulado del proveedor LLM");
            }
        }
        if system_prompt == EXTRACTION_PROMPT {
            return Ok(format!("```json\n{}\n```", Self::extract(prompt)));
        }
        *self.last_system_prompt.lock().unwrap() = Some(system_prompt.to_string());
        Ok(format!("RESPUESTA a: {prompt}"))
    }
}
