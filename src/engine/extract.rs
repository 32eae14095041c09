//! Extracción de entidades y relaciones de un chunk mediante el LLM.

use serde::Deserialize;
use tracing::warn;

pub const EXTRACTION_PROMPT: &str = r#"
Tu tarea es analizar el texto y extraer entidades y relaciones para un grafo de conocimiento.
- Identifica entidades y clasifícalas en una de estas categorías: 'PERSON', 'ORGANIZATION', 'GEO', 'EVENT', 'CONCEPT', 'TECHNOLOGY'.
- Para cada entidad da una descripción breve basada sólo en el texto.
- Identifica relaciones entre esas entidades: origen, destino, una descripción de por qué están relacionadas,
  unas palabras clave de alto nivel que resuman la relación y una fuerza entre 1 y 10.

La salida DEBE ser un único objeto JSON válido con dos claves: "entities" y "relations".
- "entities": lista de objetos con "name", "type" y "description".
- "relations": lista de objetos con "source", "target", "description", "keywords" y "strength".

Si no encuentras nada, devuelve listas vacías. No incluyas explicaciones, solo el JSON.
"#;

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(rename = "type", default)]
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedRelation {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: String,
    #[serde(default = "default_strength")]
    pub strength: f32,
}

fn default_strength() -> f32 {
    1.0
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExtractionResult {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub relations: Vec<ExtractedRelation>,
}

/// Interpreta la respuesta del LLM. Una respuesta ilegible produce un resultado
/// vacío para no detener la ingesta del documento.
pub fn parse_extraction(response: &str) -> ExtractionResult {
    let trimmed = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let json = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    };

    match serde_json::from_str::<ExtractionResult>(json) {
        Ok(mut result) => {
            result.entities.retain(|e| !normalize_name(&e.name).is_empty());
            result.relations.retain(|r| {
                let (s, t) = (normalize_name(&r.source), normalize_name(&r.target));
                !s.is_empty() && !t.is_empty() && s != t
            });
            result
        }
        Err(e) => {
            warn!(
                "No se pudo parsear el JSON de extracción para un chunk. Error: {}. Respuesta LLM: '{}'",
                e, response
            );
            ExtractionResult::default()
        }
    }
}

/// Nombre canónico de una entidad: sin comillas ni espacios sobrantes, en mayúsculas.
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Tipo canónico; vacío pasa a `UNKNOWN`.
pub fn normalize_type(entity_type: &str) -> String {
    let t = normalize_name(entity_type);
    if t.is_empty() {
        "UNKNOWN".to_string()
    } else {
        t
    }
}
