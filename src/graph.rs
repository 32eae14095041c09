//! Grafo de conocimiento atribuido (entidades y relaciones) y su formato GraphML.
//!
//! El motor lo escribe tras cada ingesta en
//! `<working_dir>/graph_chunk_entity_relation.graphml`; el renderizador lo lee.
//! Los atributos se guardan como texto, igual que en el fichero.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

pub type Attributes = BTreeMap<String, String>;

const GRAPHML_NS: &str = "http://graphml.graphdrawing.org/xmlns";
const GRAPHML_SCHEMA_LOCATION: &str =
    "http://graphml.graphdrawing.org/xmlns http://graphml.graphdrawing.org/xmlns/1.0/graphml.xsd";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeData {
    pub id: String,
    pub attrs: Attributes,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeData {
    pub attrs: Attributes,
}

#[derive(Debug, Default)]
pub struct KnowledgeGraph {
    graph: UnGraph<NodeData, EdgeData>,
    index: HashMap<String, NodeIndex>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserta el nodo o fusiona sus atributos si ya existe.
    pub fn upsert_node(&mut self, id: &str, attrs: Attributes) -> NodeIndex {
        if let Some(&idx) = self.index.get(id) {
            self.graph[idx].attrs.extend(attrs);
            return idx;
        }
        let idx = self.graph.add_node(NodeData {
            id: id.to_string(),
            attrs,
        });
        self.index.insert(id.to_string(), idx);
        idx
    }

    /// Añade una arista; los extremos desconocidos se crean sin atributos.
    pub fn add_edge(&mut self, source: &str, target: &str, attrs: Attributes) {
        let a = self.upsert_node(source, Attributes::new());
        let b = self.upsert_node(target, Attributes::new());
        self.graph.add_edge(a, b, EdgeData { attrs });
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    #[cfg(test)]
    pub fn node(&self, id: &str) -> Option<&NodeData> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeData> {
        self.graph.node_indices().map(move |idx| &self.graph[idx])
    }

    /// Aristas como `(origen, destino, datos)`.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str, &EdgeData)> {
        self.graph.edge_references().map(move |e| {
            (
                self.graph[e.source()].id.as_str(),
                self.graph[e.target()].id.as_str(),
                e.weight(),
            )
        })
    }

    // ---------------------------------------------------------------------
    // GraphML
    // ---------------------------------------------------------------------

    pub fn to_graphml(&self) -> Result<String> {
        let node_keys: BTreeSet<&str> = self
            .nodes()
            .flat_map(|n| n.attrs.keys().map(String::as_str))
            .collect();
        let edge_keys: BTreeSet<&str> = self
            .edges()
            .flat_map(|(_, _, e)| e.attrs.keys().map(String::as_str))
            .collect();

        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
        writer.write_event(Event::Start(BytesStart::new("graphml").with_attributes([
            ("xmlns", GRAPHML_NS),
            ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"),
            ("xsi:schemaLocation", GRAPHML_SCHEMA_LOCATION),
        ])))?;

        let mut key_ids: HashMap<(&str, &str), String> = HashMap::new();
        for (domain, keys) in [("node", &node_keys), ("edge", &edge_keys)] {
            for &name in keys.iter() {
                let id = format!("d{}", key_ids.len());
                let attr_type = if name == "weight" { "double" } else { "string" };
                writer.write_event(Event::Empty(BytesStart::new("key").with_attributes([
                    ("id", id.as_str()),
                    ("for", domain),
                    ("attr.name", name),
                    ("attr.type", attr_type),
                ])))?;
                key_ids.insert((domain, name), id);
            }
        }

        writer.write_event(Event::Start(
            BytesStart::new("graph").with_attributes([("edgedefault", "undirected")]),
        ))?;
        for node in self.nodes() {
            let start = BytesStart::new("node").with_attributes([("id", node.id.as_str())]);
            write_element(&mut writer, start, "node", &node.attrs, &key_ids)?;
        }
        for (source, target, edge) in self.edges() {
            let start = BytesStart::new("edge").with_attributes([("source", source), ("target", target)]);
            write_element(&mut writer, start, "edge", &edge.attrs, &key_ids)?;
        }
        writer.write_event(Event::End(BytesEnd::new("graph")))?;
        writer.write_event(Event::End(BytesEnd::new("graphml")))?;

        let mut xml = String::from_utf8(writer.into_inner()).context("GraphML generado no es UTF-8")?;
        xml.push('\n');
        Ok(xml)
    }

    pub fn from_graphml(xml: &str) -> Result<Self> {
        enum Open {
            Nothing,
            Node(String, Attributes),
            Edge(String, String, Attributes),
        }

        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut graph = Self::new();
        let mut key_names: HashMap<String, String> = HashMap::new();
        let mut open = Open::Nothing;
        let mut data_key: Option<String> = None;
        let mut data_text = String::new();

        loop {
            let event = reader
                .read_event()
                .with_context(|| format!("GraphML inválido en la posición {}", reader.buffer_position()))?;
            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let self_closing = matches!(event, Event::Empty(_));
                    match e.name().as_ref() {
                        b"key" => {
                            if let (Some(id), Some(name)) = (attr(e, b"id")?, attr(e, b"attr.name")?) {
                                key_names.insert(id, name);
                            }
                        }
                        b"node" => {
                            let id = required_attr(e, b"id", "node")?;
                            if self_closing {
                                graph.upsert_node(&id, Attributes::new());
                            } else {
                                open = Open::Node(id, Attributes::new());
                            }
                        }
                        b"edge" => {
                            let source = required_attr(e, b"source", "edge")?;
                            let target = required_attr(e, b"target", "edge")?;
                            if self_closing {
                                graph.add_edge(&source, &target, Attributes::new());
                            } else {
                                open = Open::Edge(source, target, Attributes::new());
                            }
                        }
                        b"data" => {
                            let key = required_attr(e, b"key", "data")?;
                            data_text.clear();
                            if self_closing {
                                store_data(&mut open, &key_names, key, String::new());
                            } else {
                                data_key = Some(key);
                            }
                        }
                        _ => {}
                    }
                }
                Event::Text(t) => {
                    if data_key.is_some() {
                        data_text.push_str(&t.unescape()?);
                    }
                }
                Event::CData(c) => {
                    if data_key.is_some() {
                        data_text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                    }
                }
                Event::End(e) => match e.name().as_ref() {
                    b"data" => {
                        if let Some(key) = data_key.take() {
                            store_data(&mut open, &key_names, key, std::mem::take(&mut data_text));
                        }
                    }
                    b"node" | b"edge" => match std::mem::replace(&mut open, Open::Nothing) {
                        Open::Node(id, attrs) => {
                            graph.upsert_node(&id, attrs);
                        }
                        Open::Edge(source, target, attrs) => graph.add_edge(&source, &target, attrs),
                        Open::Nothing => {}
                    },
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        fn store_data(open: &mut Open, key_names: &HashMap<String, String>, key: String, value: String) {
            let name = key_names.get(&key).cloned().unwrap_or(key);
            match open {
                Open::Node(_, attrs) | Open::Edge(_, _, attrs) => {
                    attrs.insert(name, value);
                }
                Open::Nothing => {}
            }
        }

        Ok(graph)
    }

    pub async fn read(path: &Path) -> Result<Self> {
        let xml = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("No se pudo leer {}", path.display()))?;
        Self::from_graphml(&xml).with_context(|| format!("No se pudo interpretar {}", path.display()))
    }

    pub async fn write(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, self.to_graphml()?)
            .await
            .with_context(|| format!("No se pudo escribir {}", path.display()))
    }
}

/// `<node>`/`<edge>` con un `<data>` por atributo; vacío si no tiene ninguno.
fn write_element(
    writer: &mut Writer<Vec<u8>>,
    start: BytesStart<'_>,
    domain: &str,
    attrs: &Attributes,
    key_ids: &HashMap<(&str, &str), String>,
) -> Result<()> {
    if attrs.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }
    writer.write_event(Event::Start(start))?;
    for (name, value) in attrs {
        let key = key_ids
            .get(&(domain, name.as_str()))
            .ok_or_else(|| anyhow!("Atributo '{name}' sin <key> declarada"))?;
        writer.write_event(Event::Start(
            BytesStart::new("data").with_attributes([("key", key.as_str())]),
        ))?;
        writer.write_event(Event::Text(BytesText::new(value)))?;
        writer.write_event(Event::End(BytesEnd::new("data")))?;
    }
    writer.write_event(Event::End(BytesEnd::new(domain)))?;
    Ok(())
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for a in e.attributes() {
        let a = a?;
        if a.key.as_ref() == name {
            return Ok(Some(a.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn required_attr(e: &BytesStart<'_>, name: &[u8], element: &str) -> Result<String> {
    attr(e, name)?.ok_or_else(|| {
        anyhow!(
            "Elemento <{element}> sin atributo '{}'",
            String::from_utf8_lossy(name)
        )
    })
}
