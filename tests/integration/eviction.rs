#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use spillgraph::{
    CounterMetrics, Direction, EdgeSchema, Graph, GraphOptions, NodeHandle, NodeSchema, Result,
    Schema, Value,
};
use tempfile::tempdir;

fn schema() -> Schema {
    Schema::new()
        .node(
            NodeSchema::new("Doc")
                .property("title")
                .property("body")
                .property_with_default("rank", Value::I32(0))
                .out_edge("Cites")
                .in_edge("Cites"),
        )
        .edge(EdgeSchema::new("Cites").property("weight"))
}

fn pressured(metrics: Arc<CounterMetrics>) -> GraphOptions {
    GraphOptions::new()
        .memory_budget_bytes(16 * 1024)
        .heap_threshold(0.5)
        .eviction_batch_size(32)
        .worker_threads(2)
        .monitor_interval(Duration::from_millis(2))
        .metrics(metrics)
}

fn populate(graph: &Graph, count: usize) -> Result<Vec<NodeHandle>> {
    let mut handles = Vec::with_capacity(count);
    for i in 0..count {
        let handle = graph.add_node(
            "Doc",
            &[
                ("title", Value::from(format!("doc-{i}"))),
                ("body", Value::from("x".repeat(64))),
                ("rank", Value::I32(i as i32 % 7)),
            ],
        )?;
        if let Some(prev) = handles.last().copied() {
            graph.add_edge("Cites", handle, prev, &[("weight", Value::F64(i as f64))])?;
        }
        handles.push(handle);
    }
    Ok(handles)
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn monitor_evicts_under_memory_pressure() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let graph = Graph::open(&schema(), pressured(metrics.clone()))?;
    let handles = populate(&graph, 400)?;

    assert!(
        wait_for(|| CounterMetrics::get(&metrics.nodes_evicted) > 0),
        "no eviction happened under pressure"
    );
    assert!(handles.iter().any(|h| !graph.is_resident(*h)));
    assert_eq!(graph.node_count(), 400);
    assert_eq!(graph.edge_count()?, 399);
    graph.close()
}

#[test]
fn reads_are_unaffected_by_eviction() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let graph = Graph::open(&schema(), pressured(metrics.clone()))?;
    let handles = populate(&graph, 200)?;
    graph.drain()?;
    assert!(handles.iter().all(|h| !graph.is_resident(*h)));

    for (i, handle) in handles.iter().enumerate() {
        assert_eq!(
            graph.property(*handle, "title")?,
            Some(Value::from(format!("doc-{i}")))
        );
        assert_eq!(graph.property(*handle, "rank")?, Some(Value::I32(i as i32 % 7)));
        if i > 0 {
            let cites = graph.edges(*handle, Direction::Out, Some("Cites"))?;
            assert_eq!(cites.len(), 1);
            assert_eq!(cites[0].dst, handles[i - 1]);
            assert_eq!(
                graph.edge_property(&cites[0], "weight")?,
                Some(Value::F64(i as f64))
            );
        }
    }
    assert!(CounterMetrics::get(&metrics.nodes_rehydrated) >= 200);
    assert_eq!(graph.node_count(), 200);
    assert_eq!(graph.edge_count()?, 199);
    Ok(())
}

#[test]
fn writes_after_rehydration_survive_the_next_eviction() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let graph = Graph::open(&schema(), pressured(metrics))?;
    let handles = populate(&graph, 50)?;
    graph.drain()?;

    for handle in &handles {
        graph.set_property(*handle, "rank", Value::I32(99))?;
    }
    graph.drain()?;
    for handle in &handles {
        assert!(!graph.is_resident(*handle));
        assert_eq!(graph.property(*handle, "rank")?, Some(Value::I32(99)));
    }
    Ok(())
}

#[test]
fn concurrent_access_during_eviction() -> Result<()> {
    let dir = tempdir()?;
    let metrics = Arc::new(CounterMetrics::default());
    let graph = Graph::open(
        &schema(),
        pressured(metrics.clone()).storage_path(dir.path().join("docs.db")),
    )?;
    let handles = populate(&graph, 256)?;

    thread::scope(|scope| -> Result<()> {
        let mut workers = Vec::new();
        for worker in 0..4usize {
            let graph = &graph;
            let handles = &handles;
            workers.push(scope.spawn(move || -> Result<()> {
                for round in 0..5 {
                    for (i, handle) in handles.iter().enumerate().skip(worker).step_by(4) {
                        let rank = (round * 10 + worker) as i32;
                        graph.set_property(*handle, "rank", Value::I32(rank))?;
                        assert_eq!(graph.property(*handle, "rank")?, Some(Value::I32(rank)));
                        assert_eq!(
                            graph.property(*handle, "title")?,
                            Some(Value::from(format!("doc-{i}")))
                        );
                    }
                }
                Ok(())
            }));
        }
        for worker in workers {
            worker.join().expect("worker panicked")?;
        }
        Ok(())
    })?;

    for (i, handle) in handles.iter().enumerate() {
        let worker = i % 4;
        assert_eq!(
            graph.property(*handle, "rank")?,
            Some(Value::I32((40 + worker) as i32))
        );
    }
    assert_eq!(graph.edge_count()?, 255);
    let report = graph.eviction_report();
    assert_eq!(report.failed, 0);
    graph.close()
}
