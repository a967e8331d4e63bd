#![allow(missing_docs)]

use std::sync::Arc;

use spillgraph::storage::catalog::StringTable;
use spillgraph::storage::store::{META_LIBRARY_VERSION, META_STORAGE_FORMAT_VERSION};
use spillgraph::storage::{Codec, LayoutRegistry, NodeBody, NoopMetrics};
use spillgraph::{
    Direction, EdgeSchema, Graph, GraphError, GraphOptions, NodeId, NodeSchema, Result, Schema,
    Value,
};
use tempfile::tempdir;

fn schema() -> Schema {
    Schema::new()
        .node(
            NodeSchema::new("Sample")
                .property("text")
                .property("small")
                .property("wide")
                .property("ratio")
                .property("flags")
                .property("samples")
                .property("mixed")
                .property("partner")
                .property_with_default("status", Value::from("active"))
                .property_with_default("weight", Value::F64(1.0))
                .out_edge("Link")
                .in_edge("Link"),
        )
        .edge(
            EdgeSchema::new("Link")
                .property("note")
                .property_with_default("strength", Value::I16(5)),
        )
}

fn codec(schema: &Schema) -> Result<(Arc<LayoutRegistry>, Codec)> {
    let registry = Arc::new(LayoutRegistry::from_schema(schema)?);
    let codec = Codec::new(
        Arc::clone(&registry),
        Arc::new(StringTable::new()),
        Arc::new(NoopMetrics),
    );
    Ok((registry, codec))
}

fn sample_values() -> Vec<(&'static str, Value)> {
    vec![
        ("text", Value::from("grüße")),
        ("small", Value::I8(-7)),
        ("wide", Value::I64(i64::MIN + 1)),
        ("ratio", Value::F32(0.25)),
        ("flags", Value::BoolArray(vec![true, false, true])),
        ("samples", Value::I32Array(vec![1, -2, 3])),
        (
            "mixed",
            Value::List(vec![Value::Char('x'), Value::I16(9), Value::from("y")]),
        ),
        ("partner", Value::NodeRef(NodeId(3))),
    ]
}

#[test]
fn codec_preserves_properties_and_adjacency() -> Result<()> {
    let schema = schema();
    let (registry, codec) = codec(&schema)?;
    let layout = Arc::clone(registry.require("Sample")?);

    let mut body = NodeBody::new(NodeId(7), layout);
    for (key, value) in sample_values() {
        body.set_property(key, value)?;
    }
    body.add_edge(Direction::Out, "Link", NodeId(8), &[("note", Value::from("a"))])?;
    body.add_edge(Direction::Out, "Link", NodeId(9), &[("strength", Value::I16(1))])?;
    body.add_edge(Direction::In, "Link", NodeId(8), &[])?;

    let decoded = codec.decode(&codec.encode(&body)?)?;
    assert_eq!(decoded.id(), NodeId(7));
    assert_eq!(decoded.label(), "Sample");
    for (key, value) in sample_values() {
        assert_eq!(decoded.property(key)?, Some(&value), "property {key}");
    }
    assert_eq!(decoded.property("status")?, Some(&Value::from("active")));

    let out: Vec<_> = decoded.edges(Direction::Out, None).map(|e| e.neighbor).collect();
    assert_eq!(out, vec![NodeId(8), NodeId(9)]);
    assert_eq!(
        decoded.edge_property(Direction::Out, "Link", 0, "note")?,
        Some(&Value::from("a"))
    );
    assert_eq!(
        decoded.edge_property(Direction::Out, "Link", 0, "strength")?,
        Some(&Value::I16(5))
    );
    assert_eq!(
        decoded.edge_property(Direction::Out, "Link", 1, "strength")?,
        Some(&Value::I16(1))
    );
    assert_eq!(decoded.degree(Direction::In, Some("Link")), 1);
    Ok(())
}

#[test]
fn values_equal_to_defaults_are_not_written() -> Result<()> {
    let schema = schema();
    let (registry, codec) = codec(&schema)?;
    let layout = registry.require("Sample")?;

    let untouched = NodeBody::new(NodeId(1), Arc::clone(layout));
    let mut explicit = NodeBody::new(NodeId(1), Arc::clone(layout));
    explicit.set_property("status", Value::from("active"))?;
    explicit.set_property("weight", Value::F64(1.0))?;
    let mut changed = NodeBody::new(NodeId(1), Arc::clone(layout));
    changed.set_property("weight", Value::F64(2.5))?;

    let baseline = codec.encode(&untouched)?;
    assert_eq!(codec.encode(&explicit)?, baseline);
    let changed_bytes = codec.encode(&changed)?;
    assert!(changed_bytes.len() > baseline.len());

    let decoded = codec.decode(&baseline)?;
    assert_eq!(decoded.property("weight")?, Some(&Value::F64(1.0)));
    assert_eq!(
        codec.decode(&changed_bytes)?.property("weight")?,
        Some(&Value::F64(2.5))
    );
    Ok(())
}

#[test]
fn reopen_restores_nodes_edges_and_metadata() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("graph.db");
    let schema = schema();
    {
        let graph = Graph::open(&schema, GraphOptions::new().storage_path(&path))?;
        let a = graph.add_node("Sample", &sample_values())?;
        let b = graph.add_node("Sample", &[("text", Value::from("b"))])?;
        graph.add_edge("Link", a, b, &[("note", Value::from("ab"))])?;
        graph.close()?;
    }

    let graph = Graph::open(&schema, GraphOptions::new().storage_path(&path))?;
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count()?, 1);
    let a = graph.node(NodeId(0)).expect("node 0 present");
    for (key, value) in sample_values() {
        assert_eq!(graph.property(a, key)?, Some(value));
    }
    let edges = graph.edges(a, Direction::Out, Some("Link"))?;
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].dst.id(), NodeId(1));
    assert_eq!(graph.edge_property(&edges[0], "note")?, Some(Value::from("ab")));

    let store = graph.store();
    assert_eq!(store.meta_int(META_STORAGE_FORMAT_VERSION)?, Some(1));
    assert_eq!(
        store.meta_text(META_LIBRARY_VERSION)?.as_deref(),
        Some(env!("CARGO_PKG_VERSION"))
    );
    assert!(graph.node(NodeId(5)).is_none());
    Ok(())
}

#[test]
fn storage_version_mismatch_refuses_to_open() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("graph.db");
    let schema = schema();
    Graph::open(&schema, GraphOptions::new().storage_path(&path))?.close()?;

    let conn = rusqlite::Connection::open(&path)?;
    conn.execute(
        "UPDATE meta SET value = 99 WHERE key = ?1",
        [META_STORAGE_FORMAT_VERSION],
    )?;
    drop(conn);

    match Graph::open(&schema, GraphOptions::new().storage_path(&path)) {
        Err(GraphError::StorageVersionMismatch { stored, expected }) => {
            assert_eq!(stored, 99);
            assert_eq!(expected, 1);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("graph opened over a foreign storage version"),
    }
    Ok(())
}
