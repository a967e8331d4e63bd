//! Declarative per-label schema consumed by the layout registry.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{GraphError, Result};

use super::types::Value;

/// A declared property key with an optional default value.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertySpec {
    /// Property key.
    pub key: String,
    /// Value reported when the property is unset. Values equal to it are not persisted.
    pub default: Option<Value>,
}

impl PropertySpec {
    /// Declares a property without a default.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            default: None,
        }
    }

    /// Declares a property with a default value.
    pub fn with_default(key: impl Into<String>, default: Value) -> Self {
        Self {
            key: key.into(),
            default: Some(default),
        }
    }
}

/// Schema of one edge label.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeSchema {
    /// Edge label.
    pub label: String,
    /// Declared edge properties.
    pub properties: Vec<PropertySpec>,
}

impl EdgeSchema {
    /// Starts an edge schema with no properties.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            properties: Vec::new(),
        }
    }

    /// Adds a property without a default.
    pub fn property(mut self, key: impl Into<String>) -> Self {
        self.properties.push(PropertySpec::new(key));
        self
    }

    /// Adds a property with a default.
    pub fn property_with_default(mut self, key: impl Into<String>, default: Value) -> Self {
        self.properties.push(PropertySpec::with_default(key, default));
        self
    }
}

/// Schema of one node label.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeSchema {
    /// Node label.
    pub label: String,
    /// Declared node properties.
    pub properties: Vec<PropertySpec>,
    /// Edge labels allowed to leave nodes of this label.
    pub out_edges: Vec<String>,
    /// Edge labels allowed to arrive at nodes of this label.
    pub in_edges: Vec<String>,
}

impl NodeSchema {
    /// Starts a node schema with no properties or edges.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            properties: Vec::new(),
            out_edges: Vec::new(),
            in_edges: Vec::new(),
        }
    }

    /// Adds a property without a default.
    pub fn property(mut self, key: impl Into<String>) -> Self {
        self.properties.push(PropertySpec::new(key));
        self
    }

    /// Adds a property with a default.
    pub fn property_with_default(mut self, key: impl Into<String>, default: Value) -> Self {
        self.properties.push(PropertySpec::with_default(key, default));
        self
    }

    /// Allows outgoing edges with `label`.
    pub fn out_edge(mut self, label: impl Into<String>) -> Self {
        self.out_edges.push(label.into());
        self
    }

    /// Allows incoming edges with `label`.
    pub fn in_edge(mut self, label: impl Into<String>) -> Self {
        self.in_edges.push(label.into());
        self
    }
}

/// Full graph schema: node labels and edge labels.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
    /// Node label schemas.
    pub nodes: Vec<NodeSchema>,
    /// Edge label schemas.
    pub edges: Vec<EdgeSchema>,
}

impl Schema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node label.
    pub fn node(mut self, node: NodeSchema) -> Self {
        self.nodes.push(node);
        self
    }

    /// Adds an edge label.
    pub fn edge(mut self, edge: EdgeSchema) -> Self {
        self.edges.push(edge);
        self
    }

    /// Parses a schema from its TOML form.
    ///
    /// ```toml
    /// [[node]]
    /// label = "Person"
    /// properties = ["name", "age"]
    /// out_edges = ["Knows"]
    /// in_edges = ["Knows"]
    /// defaults = { age = 0 }
    ///
    /// [[edge]]
    /// label = "Knows"
    /// properties = ["since"]
    /// ```
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw: RawSchema = toml::from_str(contents)
            .map_err(|err| GraphError::Config(format!("invalid schema: {err}")))?;
        raw.into_schema()
    }

    /// Reads and parses a TOML schema file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|err| {
            GraphError::Config(format!("failed to read schema {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSchema {
    #[serde(default, rename = "node")]
    nodes: Vec<RawNode>,
    #[serde(default, rename = "edge")]
    edges: Vec<RawEdge>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawNode {
    label: String,
    #[serde(default)]
    properties: Vec<String>,
    #[serde(default)]
    out_edges: Vec<String>,
    #[serde(default)]
    in_edges: Vec<String>,
    #[serde(default)]
    defaults: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEdge {
    label: String,
    #[serde(default)]
    properties: Vec<String>,
    #[serde(default)]
    defaults: BTreeMap<String, toml::Value>,
}

impl RawSchema {
    fn into_schema(self) -> Result<Schema> {
        let mut schema = Schema::new();
        for node in self.nodes {
            let properties = convert_properties(&node.label, node.properties, node.defaults)?;
            schema.nodes.push(NodeSchema {
                label: node.label,
                properties,
                out_edges: node.out_edges,
                in_edges: node.in_edges,
            });
        }
        for edge in self.edges {
            let properties = convert_properties(&edge.label, edge.properties, edge.defaults)?;
            schema.edges.push(EdgeSchema {
                label: edge.label,
                properties,
            });
        }
        Ok(schema)
    }
}

fn convert_properties(
    label: &str,
    keys: Vec<String>,
    mut defaults: BTreeMap<String, toml::Value>,
) -> Result<Vec<PropertySpec>> {
    let mut specs = Vec::with_capacity(keys.len());
    for key in keys {
        let default = match defaults.remove(&key) {
            Some(raw) => Some(convert_default(label, &key, raw)?),
            None => None,
        };
        specs.push(PropertySpec { key, default });
    }
    if let Some(key) = defaults.keys().next() {
        return Err(GraphError::Config(format!(
            "label '{label}' declares a default for undeclared property '{key}'"
        )));
    }
    Ok(specs)
}

fn convert_default(label: &str, key: &str, raw: toml::Value) -> Result<Value> {
    Ok(match raw {
        toml::Value::Boolean(v) => Value::Bool(v),
        toml::Value::Integer(v) => Value::I64(v),
        toml::Value::Float(v) => Value::F64(v),
        toml::Value::String(v) => Value::from(v),
        toml::Value::Array(items) => Value::List(
            items
                .into_iter()
                .map(|item| convert_default(label, key, item))
                .collect::<Result<Vec<_>>>()?,
        ),
        other => {
            return Err(GraphError::Config(format!(
                "unsupported default for {label}.{key}: {}",
                other.type_str()
            )))
        }
    })
}
