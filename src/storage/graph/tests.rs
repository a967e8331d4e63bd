use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use super::*;
use crate::storage::metrics::CounterMetrics;
use crate::storage::refs::Evictable;
use crate::storage::schema::{EdgeSchema, NodeSchema};
use crate::storage::types::Value;
use crate::types::Direction;

fn schema() -> Schema {
    Schema::new()
        .node(
            NodeSchema::new("Person")
                .property("name")
                .property_with_default("age", Value::I32(0))
                .out_edge("Knows")
                .in_edge("Knows"),
        )
        .node(NodeSchema::new("City").property("name").in_edge("LivesIn"))
        .edge(EdgeSchema::new("Knows").property("since"))
        .edge(EdgeSchema::new("LivesIn"))
}

fn options() -> GraphOptions {
    GraphOptions::new()
        .worker_threads(2)
        .monitor_interval(Duration::from_millis(5))
}

#[test]
fn nodes_survive_drain_and_rehydrate() -> Result<()> {
    let graph = Graph::open(&schema(), options())?;
    let ada = graph.add_node("Person", &[("name", Value::from("Ada"))])?;
    let bob = graph.add_node("Person", &[("name", Value::from("Bob"))])?;
    graph.add_edge("Knows", ada, bob, &[("since", Value::I64(1840))])?;

    graph.drain()?;
    assert!(!graph.is_resident(ada));
    assert!(!graph.is_resident(bob));
    assert_eq!(graph.resident_bytes(), 0);

    assert_eq!(graph.property(ada, "name")?, Some(Value::from("Ada")));
    assert!(graph.is_resident(ada));
    assert_eq!(graph.property(ada, "age")?, Some(Value::I32(0)));
    assert_eq!(graph.edge_count()?, 1);
    assert!(!graph.is_resident(bob), "edge_count does not rehydrate");
    let knows = graph.edges(bob, Direction::In, Some("Knows"))?;
    assert_eq!(knows.len(), 1);
    assert_eq!(graph.edge_property(&knows[0], "since")?, Some(Value::I64(1840)));
    graph.close()
}

#[test]
fn unknown_label_and_disallowed_edge_fail_fast() -> Result<()> {
    let graph = Graph::open(&schema(), options())?;
    let ada = graph.add_node("Person", &[])?;
    let paris = graph.add_node("City", &[])?;
    assert!(matches!(
        graph.add_node("Robot", &[]),
        Err(GraphError::SchemaViolation(_))
    ));
    assert!(matches!(
        graph.add_edge("Knows", ada, paris, &[]),
        Err(GraphError::SchemaViolation(_))
    ));
    assert!(matches!(
        graph.add_edge("LivesIn", ada, paris, &[]),
        Err(GraphError::SchemaViolation(_))
    ));
    assert_eq!(graph.degree(ada, Direction::Out, None)?, 0);
    assert!(matches!(
        graph.set_property(ada, "email", Value::from("a@b")),
        Err(GraphError::SchemaViolation(_))
    ));
    Ok(())
}

#[test]
fn remove_node_removes_incident_edges() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let graph = Graph::open(&schema(), options().metrics(metrics.clone()))?;
    let a = graph.add_node("Person", &[])?;
    let b = graph.add_node("Person", &[])?;
    let c = graph.add_node("Person", &[])?;
    graph.add_edge("Knows", a, b, &[])?;
    graph.add_edge("Knows", b, a, &[])?;
    graph.add_edge("Knows", a, b, &[])?;
    graph.add_edge("Knows", c, b, &[])?;
    graph.add_edge("Knows", a, a, &[])?;
    assert_eq!(graph.edge_count()?, 5);

    graph.remove_node(a)?;
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count()?, 1);
    assert_eq!(graph.neighbors(b, Direction::In, None)?, vec![c]);
    assert!(graph.neighbors(b, Direction::Out, None)?.is_empty());
    assert!(matches!(
        graph.property(a, "name"),
        Err(GraphError::NodeNotFound(_))
    ));
    assert_eq!(CounterMetrics::get(&metrics.edges_removed), 4);
    assert_eq!(CounterMetrics::get(&metrics.nodes_removed), 1);
    Ok(())
}

#[test]
fn parallel_edges_pair_up_across_endpoints() -> Result<()> {
    let graph = Graph::open(&schema(), options())?;
    let a = graph.add_node("Person", &[])?;
    let b = graph.add_node("Person", &[])?;
    let first = graph.add_edge("Knows", a, b, &[("since", Value::I64(1))])?;
    let second = graph.add_edge("Knows", a, b, &[("since", Value::I64(2))])?;

    assert!(graph.remove_edge(&first)?);
    assert!(!graph.remove_edge(&first)?);
    let incoming = graph.edges(b, Direction::In, None)?;
    assert_eq!(incoming, vec![second.clone()]);
    assert_eq!(graph.edge_property(&incoming[0], "since")?, Some(Value::I64(2)));

    graph.set_edge_property(&second, "since", Value::I64(3))?;
    graph.drain()?;
    assert_eq!(graph.edge_property(&second, "since")?, Some(Value::I64(3)));
    graph.trim(a)?;
    let outgoing = graph.edges(a, Direction::Out, None)?;
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0].index, 0);
    assert_eq!(graph.edge_property(&outgoing[0], "since")?, Some(Value::I64(3)));
    Ok(())
}

#[test]
fn close_persists_resident_bodies_without_overflow() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("no-overflow.db");
    {
        let graph = Graph::open(&schema(), options().storage_path(&path).overflow(false))?;
        let a = graph.add_node("Person", &[("name", Value::from("Ada"))])?;
        graph.drain()?;
        assert!(graph.is_resident(a));
        graph.close()?;
        assert!(matches!(graph.add_node("Person", &[]), Err(GraphError::Closed)));
    }
    let graph = Graph::open(&schema(), options().storage_path(&path))?;
    let a = graph.node(NodeId(0)).expect("node rehydrated");
    assert!(!graph.is_resident(a));
    assert_eq!(graph.property(a, "name")?, Some(Value::from("Ada")));
    let b = graph.add_node("Person", &[])?;
    assert_eq!(b.id(), NodeId(1));
    Ok(())
}

#[test]
fn removal_after_eviction_deletes_stored_row() -> Result<()> {
    let graph = Graph::open(&schema(), options())?;
    let a = graph.add_node("Person", &[])?;
    graph.drain()?;
    assert!(graph.store().read(a.id())?.is_some());
    graph.remove_node(a)?;
    assert!(graph.store().read(a.id())?.is_none());
    assert_eq!(graph.node_count(), 0);
    Ok(())
}

#[test]
fn explicit_ids_advance_the_allocator() -> Result<()> {
    let graph = Graph::open(&schema(), options())?;
    graph.add_node_with_id(NodeId(41), "Person", &[])?;
    assert!(matches!(
        graph.add_node_with_id(NodeId(41), "Person", &[]),
        Err(GraphError::Invalid(_))
    ));
    assert_eq!(graph.add_node("Person", &[])?.id(), NodeId(42));
    assert_eq!(graph.nodes_by_label("Person")?.len(), 2);
    assert!(graph.nodes_by_label("City")?.is_empty());
    Ok(())
}

#[test]
fn unencodable_body_stays_resident_while_others_clear() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let graph = Graph::open(&schema(), options().metrics(metrics.clone()))?;
    let good = graph.add_node("Person", &[("name", Value::from("Ada"))])?;
    let bad = graph.add_node("Person", &[])?;
    let dangling = Value::NodeRef(NodeId(u64::MAX));
    graph.set_property(bad, "name", dangling.clone())?;

    graph.drain()?;
    assert!(!graph.is_resident(good));
    assert!(graph.is_resident(bad));
    let report = graph.eviction_report();
    assert!(report.cleared >= 1);
    assert_eq!(report.failed, 1);
    assert_eq!(CounterMetrics::get(&metrics.eviction_failures), 1);

    assert_eq!(graph.property(bad, "name")?, Some(dangling));
    assert_eq!(graph.property(good, "name")?, Some(Value::from("Ada")));
    assert!(graph.store().read(bad.id())?.is_none());

    graph.set_property(bad, "name", Value::from("Bob"))?;
    let retry = Evictable::evict(&*graph.arena, &[bad.id()]);
    assert_eq!(retry.cleared, 1);
    assert!(!graph.is_resident(bad));
    assert_eq!(graph.property(bad, "name")?, Some(Value::from("Bob")));
    Ok(())
}

#[test]
fn direct_eviction_skips_removed_and_clears_clean_bodies() -> Result<()> {
    let graph = Graph::open(&schema(), options())?;
    let a = graph.add_node("Person", &[("name", Value::from("Ada"))])?;
    let b = graph.add_node("Person", &[])?;
    graph.drain()?;

    assert_eq!(graph.property(a, "name")?, Some(Value::from("Ada")));
    let clean = Evictable::evict(&*graph.arena, &[a.id()]);
    assert_eq!(clean.cleared, 1);
    assert_eq!(graph.resident_bytes(), 0);

    graph.remove_node(b)?;
    let gone = Evictable::evict(&*graph.arena, &[b.id(), a.id()]);
    assert_eq!(gone.skipped, 2);
    assert_eq!(gone.cleared, 0);
    Ok(())
}

#[test]
fn failed_index_write_leaves_no_node_behind() -> Result<()> {
    let graph = Graph::open(&schema(), options())?;
    graph.create_index("name")?;
    graph.add_node("Person", &[("name", Value::from("Ada"))])?;
    let before = graph.resident_bytes();

    let result = graph.add_node("Person", &[("name", Value::NodeRef(NodeId(u64::MAX)))]);
    assert!(matches!(result, Err(GraphError::Serialization(_))));
    assert_eq!(graph.node_count(), 1);
    assert!(graph.node(NodeId(1)).is_none());
    assert_eq!(graph.resident_bytes(), before);
    assert_eq!(graph.lookup("name", &Value::from("Ada"))?.len(), 1);
    Ok(())
}

#[test]
fn trim_returns_freed_bytes_to_the_budget() -> Result<()> {
    let graph = Graph::open(&schema(), options())?;
    let hub = graph.add_node("Person", &[])?;
    let mut knows = Vec::new();
    for year in 0..6 {
        let spoke = graph.add_node("Person", &[])?;
        knows.push(graph.add_edge("Knows", hub, spoke, &[("since", Value::I64(year))])?);
    }
    for edge in &knows[..4] {
        assert!(graph.remove_edge(edge)?);
    }
    graph.drain()?;
    assert_eq!(graph.degree(hub, Direction::Out, None)?, 2);
    let before = graph.resident_bytes();

    graph.trim(hub)?;
    let after = graph.resident_bytes();
    assert!(after < before, "trim kept {after} of {before} bytes");
    let charged: usize = graph
        .arena
        .all_slots()
        .iter()
        .map(|slot| slot.charged.load(Ordering::Acquire))
        .sum();
    assert_eq!(charged, after);
    Ok(())
}
