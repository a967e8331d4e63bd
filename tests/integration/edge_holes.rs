#![allow(missing_docs)]

use std::sync::Arc;

use spillgraph::storage::{LayoutRegistry, NodeBody};
use spillgraph::{
    Direction, EdgeSchema, Graph, GraphOptions, NodeId, NodeSchema, Result, Schema, Value,
};

fn schema() -> Schema {
    Schema::new()
        .node(
            NodeSchema::new("Hub")
                .out_edge("Road")
                .out_edge("Rail")
                .in_edge("Road"),
        )
        .edge(EdgeSchema::new("Road").property("km"))
        .edge(EdgeSchema::new("Rail").property("line").property("stops"))
}

fn live(body: &NodeBody, label: &str) -> Result<Vec<(NodeId, Vec<Value>)>> {
    let keys: Vec<Arc<str>> = body
        .layout()
        .edge_property_keys(label)
        .map(|keys| keys.to_vec())
        .unwrap_or_default();
    let mut out = Vec::new();
    for edge in body.edges(Direction::Out, Some(label)) {
        let mut props = Vec::with_capacity(keys.len());
        for key in &keys {
            let value = body
                .edge_property(Direction::Out, label, edge.index, key)?
                .cloned()
                .unwrap_or(Value::Null);
            props.push(value);
        }
        out.push((edge.neighbor, props));
    }
    Ok(out)
}

#[test]
fn holes_do_not_disturb_neighbouring_blocks() -> Result<()> {
    let registry = LayoutRegistry::from_schema(&schema())?;
    let mut body = NodeBody::new(NodeId(0), Arc::clone(registry.require("Hub")?));

    for i in 1..=5u64 {
        body.add_edge(Direction::Out, "Road", NodeId(i), &[("km", Value::I32(i as i32))])?;
    }
    for i in 10..13u64 {
        body.add_edge(
            Direction::Out,
            "Rail",
            NodeId(i),
            &[("line", Value::from(format!("L{i}"))), ("stops", Value::I8(i as i8))],
        )?;
    }
    body.add_edge(Direction::In, "Road", NodeId(42), &[])?;
    let rail_before = live(&body, "Rail")?;

    assert!(body.remove_edge_at(Direction::Out, "Road", 2)?);
    assert!(!body.remove_edge_at(Direction::Out, "Road", 2)?);
    assert!(body.has_holes());
    let added = body.add_edge(Direction::Out, "Road", NodeId(6), &[("km", Value::I32(6))])?;
    assert_eq!(added, 5);

    assert_eq!(live(&body, "Rail")?, rail_before);
    let roads: Vec<NodeId> = live(&body, "Road")?.into_iter().map(|(n, _)| n).collect();
    assert_eq!(roads, [1, 2, 4, 5, 6].map(NodeId).to_vec());
    assert_eq!(body.neighbor_at(Direction::In, "Road", 0), Some(NodeId(42)));

    let road_before = live(&body, "Road")?;
    body.remove_edge_at(Direction::Out, "Rail", 0)?;
    body.remove_edge_at(Direction::Out, "Road", 4)?;
    let road_before: Vec<_> = road_before
        .into_iter()
        .filter(|(n, _)| *n != NodeId(5))
        .collect();
    let rail_before = live(&body, "Rail")?;

    let trimmed = body.trim();
    assert!(!trimmed.has_holes());
    assert_eq!(live(&trimmed, "Road")?, road_before);
    assert_eq!(live(&trimmed, "Rail")?, rail_before);
    assert_eq!(trimmed.degree(Direction::Out, None), 6);
    assert_eq!(trimmed.degree(Direction::In, None), 1);
    assert!(trimmed.approx_bytes() <= body.approx_bytes());
    Ok(())
}

#[test]
fn graph_trim_keeps_both_endpoints_in_step() -> Result<()> {
    let graph = Graph::open(&schema(), GraphOptions::new())?;
    let hub = graph.add_node("Hub", &[])?;
    let spokes: Vec<_> = (0..6)
        .map(|_| graph.add_node("Hub", &[]))
        .collect::<Result<_>>()?;
    let mut roads = Vec::new();
    for (i, spoke) in spokes.iter().enumerate() {
        roads.push(graph.add_edge("Road", hub, *spoke, &[("km", Value::I32(i as i32))])?);
    }
    for edge in [&roads[1], &roads[3]] {
        assert!(graph.remove_edge(edge)?);
    }
    graph.trim(hub)?;

    let after = graph.edges(hub, Direction::Out, Some("Road"))?;
    let dsts: Vec<_> = after.iter().map(|e| e.dst).collect();
    assert_eq!(dsts, vec![spokes[0], spokes[2], spokes[4], spokes[5]]);
    for (position, edge) in after.iter().enumerate() {
        assert_eq!(edge.index, position);
    }
    let km: Vec<_> = after
        .iter()
        .map(|e| graph.edge_property(e, "km"))
        .collect::<Result<_>>()?;
    assert_eq!(
        km,
        [0, 2, 4, 5].map(|k| Some(Value::I32(k))).to_vec()
    );

    let incoming = graph.edges(spokes[4], Direction::In, Some("Road"))?;
    assert_eq!(incoming, vec![after[2].clone()]);
    graph.set_edge_property(&incoming[0], "km", Value::I32(40))?;
    graph.drain()?;
    assert_eq!(graph.edge_property(&after[2], "km")?, Some(Value::I32(40)));
    assert_eq!(graph.edge_count()?, 4);
    Ok(())
}
