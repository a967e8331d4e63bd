#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use proptest::prelude::*;
use spillgraph::{
    Graph, GraphError, GraphOptions, NodeHandle, NodeId, NodeSchema, Result, Schema, Value,
};
use tempfile::tempdir;

const COLORS: [&str; 3] = ["red", "green", "blue"];

fn schema() -> Schema {
    Schema::new()
        .node(NodeSchema::new("Item").property("color").property("size"))
        .node(NodeSchema::new("Tag").property("color"))
}

fn options() -> GraphOptions {
    GraphOptions::new()
        .worker_threads(1)
        .monitor_interval(Duration::from_millis(5))
}

#[derive(Clone, Debug)]
enum Op {
    Add(Option<usize>),
    Set(usize, usize),
    Unset(usize),
    Remove(usize),
    Drain,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => proptest::option::of(0..COLORS.len()).prop_map(Op::Add),
        4 => (any::<usize>(), 0..COLORS.len()).prop_map(|(n, c)| Op::Set(n, c)),
        2 => any::<usize>().prop_map(Op::Unset),
        2 => any::<usize>().prop_map(Op::Remove),
        1 => Just(Op::Drain),
    ]
}

fn expected(model: &BTreeMap<NodeId, Option<usize>>, color: usize) -> BTreeSet<NodeId> {
    model
        .iter()
        .filter(|(_, c)| **c == Some(color))
        .map(|(id, _)| *id)
        .collect()
}

fn run(ops: &[Op], index_first: bool) -> Result<()> {
    let graph = Graph::open(&schema(), options())?;
    if index_first {
        graph.create_index("color")?;
    }
    let mut live: Vec<NodeHandle> = Vec::new();
    let mut model: BTreeMap<NodeId, Option<usize>> = BTreeMap::new();

    for op in ops {
        match *op {
            Op::Add(color) => {
                let props: Vec<(&str, Value)> = color
                    .map(|c| vec![("color", Value::from(COLORS[c]))])
                    .unwrap_or_default();
                let handle = graph.add_node("Item", &props)?;
                live.push(handle);
                model.insert(handle.id(), color);
            }
            Op::Set(n, c) if !live.is_empty() => {
                let handle = live[n % live.len()];
                graph.set_property(handle, "color", Value::from(COLORS[c]))?;
                model.insert(handle.id(), Some(c));
            }
            Op::Unset(n) if !live.is_empty() => {
                let handle = live[n % live.len()];
                graph.remove_property(handle, "color")?;
                model.insert(handle.id(), None);
            }
            Op::Remove(n) if !live.is_empty() => {
                let handle = live.swap_remove(n % live.len());
                graph.remove_node(handle)?;
                model.remove(&handle.id());
            }
            Op::Drain => graph.drain()?,
            _ => {}
        }
    }

    if !index_first {
        graph.create_index("color")?;
    }
    for (c, color) in COLORS.iter().enumerate() {
        assert_eq!(
            graph.lookup("color", &Value::from(*color))?,
            expected(&model, c),
            "lookup({color}) after {ops:?}"
        );
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn maintained_index_matches_model(ops in proptest::collection::vec(op(), 1..64)) {
        run(&ops, true).unwrap();
    }

    #[test]
    fn backfilled_index_matches_model(ops in proptest::collection::vec(op(), 1..64)) {
        run(&ops, false).unwrap();
    }
}

#[test]
fn lookup_without_index_is_an_error() -> Result<()> {
    let graph = Graph::open(&schema(), options())?;
    graph.add_node("Item", &[("size", Value::I32(3))])?;
    assert!(matches!(
        graph.lookup("size", &Value::I32(3)),
        Err(GraphError::IndexMissing(_))
    ));
    assert_eq!(graph.create_index("size")?, 1);
    assert_eq!(graph.lookup("size", &Value::I32(3))?.len(), 1);
    assert!(graph.lookup("size", &Value::I64(3))?.is_empty());
    assert!(graph.drop_index("size")?);
    assert!(!graph.drop_index("size")?);
    assert!(matches!(
        graph.lookup("size", &Value::I32(3)),
        Err(GraphError::IndexMissing(_))
    ));
    Ok(())
}

#[test]
fn index_spans_labels_and_survives_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("indexed.db");
    let red = Value::from("red");
    let (item, tag) = {
        let graph = Graph::open(&schema(), options().storage_path(&path))?;
        let item = graph.add_node("Item", &[("color", red.clone())])?;
        graph.create_index("color")?;
        let tag = graph.add_node("Tag", &[("color", red.clone())])?;
        graph.add_node("Item", &[("color", Value::from("blue"))])?;
        graph.close()?;
        (item.id(), tag.id())
    };

    let graph = Graph::open(&schema(), options().storage_path(&path))?;
    assert_eq!(graph.indexed_keys(), vec!["color".to_string()]);
    assert_eq!(graph.lookup("color", &red)?, BTreeSet::from([item, tag]));

    let tag = graph.node(tag).expect("tag reloaded");
    graph.remove_node(tag)?;
    assert_eq!(graph.lookup("color", &red)?, BTreeSet::from([item]));
    Ok(())
}
