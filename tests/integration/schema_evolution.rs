#![allow(missing_docs)]

use spillgraph::{
    Direction, EdgeSchema, Graph, GraphError, GraphOptions, NodeId, NodeSchema, Result, Schema,
    Value,
};
use tempfile::tempdir;

fn narrow() -> Schema {
    Schema::new()
        .node(NodeSchema::new("Thing1").property("name").out_edge("Connection1"))
        .node(NodeSchema::new("Thing2").property("name").in_edge("Connection1"))
        .edge(EdgeSchema::new("Connection1").property("name"))
}

fn wide() -> Schema {
    Schema::new()
        .node(
            NodeSchema::new("Thing1")
                .property("name")
                .property_with_default("size", Value::I64(0))
                .out_edge("Connection2")
                .out_edge("Connection1"),
        )
        .node(
            NodeSchema::new("Thing2")
                .property("name")
                .in_edge("Connection1")
                .in_edge("Connection2"),
        )
        .edge(
            EdgeSchema::new("Connection1")
                .property("weight")
                .property("name"),
        )
        .edge(EdgeSchema::new("Connection2"))
}

fn options(path: &std::path::Path) -> GraphOptions {
    GraphOptions::new().storage_path(path)
}

#[test]
fn wider_schema_loads_and_narrower_one_refuses() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("evolve.db");
    {
        let graph = Graph::open(&narrow(), options(&path))?;
        let a = graph.add_node("Thing1", &[("name", Value::from("a"))])?;
        let b = graph.add_node("Thing2", &[("name", Value::from("b"))])?;
        graph.add_edge("Connection1", a, b, &[("name", Value::from("x"))])?;
        graph.close()?;
    }

    {
        let graph = Graph::open(&wide(), options(&path))?;
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count()?, 1);
        let a = graph.node(NodeId(0)).expect("Thing1 present");
        let b = graph.node(NodeId(1)).expect("Thing2 present");
        assert_eq!(graph.label(a)?, "Thing1");
        assert_eq!(graph.property(a, "name")?, Some(Value::from("a")));
        assert_eq!(graph.property(a, "size")?, Some(Value::I64(0)));

        let edges = graph.edges(a, Direction::Out, Some("Connection1"))?;
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].dst, b);
        assert_eq!(graph.edge_property(&edges[0], "name")?, Some(Value::from("x")));
        assert_eq!(graph.edge_property(&edges[0], "weight")?, Some(Value::Null));
        assert_eq!(graph.neighbors(b, Direction::In, None)?, vec![a]);

        graph.add_edge("Connection2", a, b, &[])?;
        assert_eq!(graph.edge_count()?, 2);
        graph.close()?;
    }

    match Graph::open(&narrow(), options(&path)) {
        Err(err) => assert!(err.is_backward_compatibility(), "unexpected error: {err}"),
        Ok(_) => panic!("narrow schema opened data written under the wide one"),
    }

    let graph = Graph::open(&wide(), options(&path))?;
    assert_eq!(graph.edge_count()?, 2);
    Ok(())
}

#[test]
fn dropped_label_is_a_compatibility_error() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("labels.db");
    Graph::open(&narrow(), options(&path))?.close()?;

    let without_thing2 = Schema::new()
        .node(NodeSchema::new("Thing1").property("name"))
        .edge(EdgeSchema::new("Connection1").property("name"));
    assert!(matches!(
        Graph::open(&without_thing2, options(&path)),
        Err(GraphError::BackwardCompatibility(_))
    ));
    Ok(())
}

#[test]
fn dropped_property_is_a_compatibility_error() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("props.db");
    Graph::open(&wide(), options(&path))?.close()?;

    let schema = Schema::new()
        .node(
            NodeSchema::new("Thing1")
                .property("name")
                .out_edge("Connection2")
                .out_edge("Connection1"),
        )
        .node(
            NodeSchema::new("Thing2")
                .property("name")
                .in_edge("Connection1")
                .in_edge("Connection2"),
        )
        .edge(
            EdgeSchema::new("Connection1")
                .property("weight")
                .property("name"),
        )
        .edge(EdgeSchema::new("Connection2"));
    assert!(matches!(
        Graph::open(&schema, options(&path)),
        Err(GraphError::BackwardCompatibility(_))
    ));
    Ok(())
}
