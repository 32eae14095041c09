//! Visualización del grafo de conocimiento como documento HTML interactivo.
//!
//! Cada nodo recibe un color aleatorio y el atributo `description` de nodos y
//! aristas pasa a `title` (tooltip). Los datos se incrustan como JSON y se
//! dibujan con vis-network.

use std::path::Path;

use anyhow::Result;
use rand::Rng;
use serde::Serialize;
use tracing::info;

use crate::error::AppError;
use crate::graph::KnowledgeGraph;

#[derive(Debug, Clone, Serialize)]
pub struct VisNode {
    pub id: String,
    pub label: String,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisEdge {
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RenderedGraph {
    pub html: String,
    pub node_count: usize,
    pub edge_count: usize,
}

pub fn random_color<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("#{:06x}", rng.gen_range(0..=0xFF_FFFF_u32))
}

/// Convierte el grafo en nodos/aristas de vis-network.
pub fn to_vis<R: Rng + ?Sized>(graph: &KnowledgeGraph, rng: &mut R) -> (Vec<VisNode>, Vec<VisEdge>) {
    let nodes = graph
        .nodes()
        .map(|n| VisNode {
            id: n.id.clone(),
            label: n.id.clone(),
            color: random_color(&mut *rng),
            title: n.attrs.get("description").cloned(),
            group: n.attrs.get("entity_type").cloned(),
        })
        .collect();
    let edges = graph
        .edges()
        .map(|(source, target, e)| VisEdge {
            from: source.to_string(),
            to: target.to_string(),
            title: e.attrs.get("description").cloned(),
            value: e.attrs.get("weight").and_then(|w| w.parse().ok()),
        })
        .collect();
    (nodes, edges)
}

/// JSON seguro para incrustar en un `<script>`.
fn script_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?.replace('<', "\\u003c"))
}

pub fn render_html<R: Rng + ?Sized>(graph: &KnowledgeGraph, rng: &mut R) -> Result<RenderedGraph> {
    let (nodes, edges) = to_vis(graph, rng);
    let html = format!(
        r#"<!DOCTYPE html>
<html lang="es">
<head>
<meta charset="utf-8">
<title>Grafo de conocimiento</title>
<script src="https://unpkg.com/vis-network@9.1.9/standalone/umd/vis-network.min.js"></script>
<style>
  html, body {{ margin: 0; padding: 0; height: 100%; }}
  #knowledge-graph {{ width: 100%; height: 100vh; border: 1px solid lightgray; }}
</style>
</head>
<body>
<div id="knowledge-graph"></div>
<script type="application/json" id="graph-nodes">{nodes}</script>
<script type="application/json" id="graph-edges">{edges}</script>
<script>
  var nodes = new vis.DataSet(JSON.parse(document.getElementById("graph-nodes").textContent));
  var edges = new vis.DataSet(JSON.parse(document.getElementById("graph-edges").textContent));
  var container = document.getElementById("knowledge-graph");
  var options = {{
    physics: {{ stabilization: {{ iterations: 200 }} }},
    interaction: {{ hover: true, tooltipDelay: 100 }},
    nodes: {{ shape: "dot", size: 12 }},
    edges: {{ smooth: false, scaling: {{ min: 1, max: 6 }} }}
  }};
  new vis.Network(container, {{ nodes: nodes, edges: edges }}, options);
</script>
</body>
</html>
"#,
        nodes = script_json(&nodes)?,
        edges = script_json(&edges)?,
    );

    Ok(RenderedGraph {
        html,
        node_count: graph.node_count(),
        edge_count: graph.edge_count(),
    })
}

/// Lee el GraphML, genera el HTML y lo guarda en `output_path`.
pub async fn render_graph_file(graph_path: &Path, output_path: &Path) -> Result<RenderedGraph, AppError> {
    if !tokio::fs::try_exists(graph_path).await.unwrap_or(false) {
        return Err(AppError::GraphNotFound);
    }

    let graph = KnowledgeGraph::read(graph_path).await.map_err(AppError::Engine)?;
    let rendered = {
        let mut rng = rand::thread_rng();
        render_html(&graph, &mut rng).map_err(AppError::Engine)?
    };

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(output_path, &rendered.html).await?;

    info!(
        "Grafo renderizado en {} ({} nodos, {} aristas).",
        output_path.display(),
        rendered.node_count,
        rendered.edge_count
    );
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Attributes;
    use rand::{rngs::StdRng, SeedableRng};

    fn sample_graph() -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::new();
        graph.upsert_node(
            "TRIGO",
            Attributes::from([("description".into(), "Cereal </script> de invierno".into())]),
        );
        graph.upsert_node("ROYA", Attributes::new());
        graph.upsert_node("AGUA", Attributes::new());
        graph.add_edge(
            "TRIGO",
            "ROYA",
            Attributes::from([("description".into(), "plaga".into()), ("weight".into(), "3".into())]),
        );
        graph
    }

    fn embedded_array(html: &str, id: &str) -> Vec<serde_json::Value> {
        let open = format!(r#"<script type="application/json" id="{id}">"#);
        let start = html.find(&open).unwrap() + open.len();
        let end = start + html[start..].find("</script>").unwrap();
        serde_json::from_str(&html[start..end]).unwrap()
    }

    #[test]
    fn one_element_per_node_and_edge_with_tooltips() {
        let mut rng = StdRng::seed_from_u64(7);
        let rendered = render_html(&sample_graph(), &mut rng).unwrap();
        assert_eq!((rendered.node_count, rendered.edge_count), (3, 1));

        let nodes = embedded_array(&rendered.html, "graph-nodes");
        let edges = embedded_array(&rendered.html, "graph-edges");
        assert_eq!(nodes.len(), 3);
        assert_eq!(edges.len(), 1);

        let trigo = nodes.iter().find(|n| n["id"] == "TRIGO").unwrap();
        assert_eq!(trigo["title"], "Cereal </script> de invierno");
        assert!(nodes.iter().find(|n| n["id"] == "ROYA").unwrap().get("title").is_none());
        assert_eq!(edges[0]["title"], "plaga");
        assert_eq!(edges[0]["value"], 3.0);
    }

    #[test]
    fn colors_are_hex_rgb() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let color = random_color(&mut rng);
            assert_eq!(color.len(), 7);
            assert!(color.starts_with('#'));
            assert!(u32::from_str_radix(&color[1..], 16).is_ok());
        }
    }

    #[tokio::test]
    async fn missing_graph_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let result = render_graph_file(
            &dir.path().join("graph_chunk_entity_relation.graphml"),
            &dir.path().join("out/knowledge_graph.html"),
        )
        .await;
        assert!(matches!(result, Err(AppError::GraphNotFound)));
    }

    #[tokio::test]
    async fn rendering_twice_gives_two_complete_documents() {
        let dir = tempfile::tempdir().unwrap();
        let graph_path = dir.path().join("graph.graphml");
        sample_graph().write(&graph_path).await.unwrap();

        let out_a = dir.path().join("graph/a.html");
        let out_b = dir.path().join("graph/b.html");
        let a = render_graph_file(&graph_path, &out_a).await.unwrap();
        let b = render_graph_file(&graph_path, &out_b).await.unwrap();

        for (rendered, path) in [(&a, &out_a), (&b, &out_b)] {
            let on_disk = tokio::fs::read_to_string(path).await.unwrap();
            assert_eq!(on_disk, rendered.html);
            assert!(on_disk.starts_with("<!DOCTYPE html>"));
            assert!(on_disk.trim_end().ends_with("</html>"));
            assert_eq!(embedded_array(&on_disk, "graph-nodes").len(), 3);
            assert_eq!(embedded_array(&on_disk, "graph-edges").len(), 1);
        }
    }
}
