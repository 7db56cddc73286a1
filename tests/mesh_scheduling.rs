use wiremesh::prelude::*;
use wiremesh::shards::channels::{Broadcast, Complete, Consume, Listen, Produce};
use wiremesh::shards::core::{Add, Const, Get, Pause, Set};
use wiremesh::{ComposeError, MemoryTelemetry, Telemetry};
use std::sync::Arc;
use std::time::Duration;

fn mesh(name: &str) -> Mesh {
    Mesh::new(MeshConfig::new(name).workers(2)).unwrap()
}

fn drain_ints(mesh: &Mesh, channel: &str) -> Vec<Var> {
    let queue = mesh
        .channels()
        .get_and_init_mpmc(channel, &TypeInfo::Int, false)
        .unwrap();
    let mut values = Vec::new();
    while let wiremesh::core::channels::mpmc::RecvOutcome::Value(v) = queue.try_recv() {
        values.push(v);
    }
    values
}

#[test]
fn constant_plus_operand_runs_to_seven() {
    let mesh = mesh("arith");
    let wire = Wire::new("add")
        .with_shard(Const::new(5))
        .with_shard(Add::new(2))
        .into_shared();

    mesh.schedule(&wire, Var::None).unwrap();
    let results = mesh.wait_all();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].state, WireState::Stopped);
    assert_eq!(results[0].output, Var::Int(7));
    assert_eq!(wire.lock().unwrap().state(), WireState::Stopped);
}

#[test]
fn missing_variable_is_named_and_the_wire_never_runs() {
    let mesh = mesh("vars");
    let wire = Wire::new("reader")
        .with_shard(Get::new("threshold"))
        .with_shard(Add::new(1))
        .into_shared();

    match mesh.schedule(&wire, Var::None) {
        Err(MeshError::Compose {
            wire: name,
            source: ComposeError::MissingVariable { name: variable, .. },
        }) => {
            assert_eq!(name, "reader");
            assert_eq!(variable, "threshold");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(wire.lock().unwrap().state(), WireState::Unscheduled);
    assert!(mesh.wait_all().is_empty());

    mesh.set_variable("threshold", 41, true);
    mesh.schedule(&wire, Var::None).unwrap();
    assert_eq!(mesh.wait_all()[0].output, Var::Int(42));
}

#[test]
fn closing_a_channel_ends_a_waiting_consumer() {
    let mesh = mesh("queue");
    let consumer = Wire::new("worker")
        .looped(true)
        .with_shard(Consume::new("jobs", TypeInfo::Int))
        .with_shard(Add::new(100))
        .with_shard(Produce::new("done"))
        .into_shared();
    let handle = mesh.schedule(&consumer, Var::None).unwrap();
    assert!(handle.state().is_active());

    let producer = Wire::new("feeder")
        .with_shard(Const::new(1))
        .with_shard(Produce::new("jobs"))
        .with_shard(Add::new(1))
        .with_shard(Produce::new("jobs"))
        .with_shard(Complete::new("jobs"))
        .into_shared();
    mesh.schedule(&producer, Var::None).unwrap();

    let results = mesh.wait_all();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.state == WireState::Stopped));
    assert_eq!(handle.result().unwrap().output, Var::None);
    assert_eq!(drain_ints(&mesh, "done"), vec![Var::Int(101), Var::Int(102)]);
}

#[test]
fn broadcast_reaches_every_listener() {
    let mesh = mesh("fanout");
    let listeners: Vec<SharedWire> = (0..3)
        .map(|i| {
            Wire::new(format!("listener-{i}"))
                .looped(true)
                .with_shard(Listen::new("ticks", TypeInfo::Int))
                .with_shard(Produce::new("heard"))
                .into_shared()
        })
        .collect();
    for wire in &listeners {
        mesh.schedule(wire, Var::None).unwrap();
    }

    let publisher = Wire::new("clock")
        .with_shard(Const::new(7))
        .with_shard(Broadcast::new("ticks"))
        .with_shard(Complete::new("ticks"))
        .into_shared();
    mesh.schedule(&publisher, Var::None).unwrap();

    let results = mesh.wait_all();
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r.state == WireState::Stopped));
    assert_eq!(drain_ints(&mesh, "heard"), vec![Var::Int(7); 3]);
}

#[test]
fn composition_is_deterministic_and_memoized() {
    let mesh = mesh("compose");
    let wire = Wire::new("typed")
        .with_shard(Add::new(1))
        .with_shard(Set::new("total"))
        .into_shared();

    let first = mesh.compose(&wire, TypeInfo::Int).unwrap();
    let second = mesh.compose(&wire, TypeInfo::Int).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.output_type, TypeInfo::Int);
    assert_eq!(first.exposed[0].name, "total");

    let floats = mesh.compose(&wire, TypeInfo::Float);
    assert!(floats.is_err());
    assert!(wire.lock().unwrap().composed().is_none());
    assert_eq!(mesh.compose(&wire, TypeInfo::Int).unwrap(), first);
}

#[test]
fn stop_interrupts_a_sleeping_wire() {
    let mesh = mesh("sleepers");
    let wire = Wire::new("nap")
        .with_shard(Pause::new(3600.0))
        .with_shard(Add::new(1))
        .into_shared();
    let handle = mesh.schedule(&wire, 1).unwrap();
    handle.stop();
    let result = mesh.block_on(handle.wait()).unwrap();
    assert_eq!(result.state, WireState::Stopped);
    assert_ne!(result.output, Var::Int(2));
}

#[test]
fn telemetry_records_each_activation() {
    let telemetry = Arc::new(MemoryTelemetry::new());
    let mesh = mesh("traced").with_telemetry(telemetry.clone());
    let wire = Wire::new("traced")
        .with_shard(Const::new(1))
        .with_shard(Add::new(1))
        .into_shared();
    mesh.schedule(&wire, Var::None).unwrap();
    mesh.wait_all();

    let shards: Vec<String> = telemetry.snapshot().iter().map(|t| t.shard.clone()).collect();
    assert_eq!(shards, ["Const", "Math.Add"]);
}

#[tokio::test]
async fn handles_can_be_awaited_from_another_runtime() {
    let mesh = mesh("async");
    let wire = Wire::new("double")
        .with_shard(Add::new(20))
        .into_shared();
    let handle = mesh.schedule(&wire, 22).unwrap();
    let result = handle.wait().await;
    assert_eq!(result.output, Var::Int(42));
    assert_eq!(mesh.wait_all_async().await.len(), 1);
}

#[tokio::test]
async fn dropping_a_mesh_inside_async_code_ends_its_runs() {
    let mesh = mesh("dropped");
    let wire = Wire::new("napper")
        .looped(true)
        .with_shard(Pause::new(10.0))
        .into_shared();
    let handle = mesh.schedule(&wire, Var::None).unwrap();
    drop(mesh);

    let result = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap();
    assert_eq!(result.state, WireState::Stopped);
    assert!(!wire.lock().unwrap().is_mid_run());

    let other = Mesh::new(MeshConfig::new("other").workers(1)).unwrap();
    let again = other.schedule(&wire, Var::None).unwrap();
    again.stop();
    let result = tokio::time::timeout(Duration::from_secs(5), again.wait())
        .await
        .unwrap();
    assert_eq!(result.state, WireState::Stopped);
}
