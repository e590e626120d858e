//! Worker pool behaviour with in-process workers.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedReceiver;
use zoomorph_policy::{LearnOutcome, LearnRequest, LearnSink, MlpFactory, ModelSpec};
use zoomorph_types::{Action, EntityId, Experience, LearnHyperparams};
use zoomorph_workers::{PoolConfig, PoolError, WorkerMode, WorkerPool};

fn in_process(workers: usize) -> WorkerPool {
    let config = PoolConfig {
        workers,
        mode: WorkerMode::InProcess,
        ..PoolConfig::default()
    };
    WorkerPool::start(&config, Arc::new(MlpFactory)).unwrap()
}

fn spec() -> ModelSpec {
    ModelSpec {
        input_size: 3,
        hidden_size: 4,
        hidden_layers: 1,
        output_size: Action::COUNT,
        seed: 1,
    }
}

fn recv(rx: &mut UnboundedReceiver<LearnOutcome>) -> LearnOutcome {
    let deadline = Instant::now().checked_add(Duration::from_secs(5)).unwrap();
    loop {
        if let Ok(outcome) = rx.try_recv() {
            return outcome;
        }
        assert!(Instant::now() < deadline, "no outcome within 5s");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn load_is_balanced() {
    let mut pool = in_process(3);
    let mut channels = Vec::new();
    for _ in 0..7 {
        channels.push(pool.register(EntityId::new(), spec()).unwrap());
    }
    let load = pool.load();
    assert_eq!(load.iter().sum::<usize>(), 7);
    assert!(load.iter().all(|&n| n <= 3), "load {load:?}");
    pool.shutdown(Duration::from_secs(5));
}

#[test]
fn double_registration_is_rejected() {
    let mut pool = in_process(1);
    let agent_id = EntityId::new();
    let _channels = pool.register(agent_id, spec()).unwrap();
    assert!(matches!(
        pool.register(agent_id, spec()),
        Err(PoolError::AlreadyRegistered { .. })
    ));
    pool.shutdown(Duration::from_secs(5));
}

#[test]
fn learn_request_round_trips() {
    let mut pool = in_process(2);
    let agent_id = EntityId::new();
    let mut channels = pool.register(agent_id, spec()).unwrap();

    channels
        .requests
        .submit(LearnRequest {
            hyperparams: LearnHyperparams::default(),
            batch: vec![Experience {
                state: vec![0.1, 0.2, 0.3],
                action: 1,
                reward: 0.5,
                next_state: vec![0.1, 0.2, 0.4],
            }],
            indices: vec![6],
        })
        .unwrap();

    match recv(&mut channels.results) {
        LearnOutcome::Trained(output) => {
            assert_eq!(output.errors.keys().copied().collect::<Vec<_>>(), vec![6]);
        }
        LearnOutcome::Failed { message } => panic!("training failed: {message}"),
    }
    pool.shutdown(Duration::from_secs(5));
}

#[test]
fn unregister_frees_a_slot() {
    let mut pool = in_process(2);
    let first = EntityId::new();
    let _a = pool.register(first, spec()).unwrap();
    let _b = pool.register(EntityId::new(), spec()).unwrap();
    assert_eq!(pool.load(), vec![1, 1]);

    let freed = pool.assignment(first).unwrap();
    pool.unregister(first).unwrap();
    assert_eq!(pool.load().get(freed).copied(), Some(0));
    assert!(matches!(
        pool.unregister(first),
        Err(PoolError::NotRegistered { .. })
    ));

    let _c = pool.register(EntityId::new(), spec()).unwrap();
    assert_eq!(pool.load(), vec![1, 1]);
    pool.shutdown(Duration::from_secs(5));
}

#[test]
fn shutdown_is_graceful() {
    let mut pool = in_process(3);
    let _channels = pool.register(EntityId::new(), spec()).unwrap();
    let report = pool.shutdown(Duration::from_secs(5));
    assert_eq!(report.graceful, 3);
    assert_eq!(report.forced, 0);
    assert_eq!(pool.worker_count(), 0);
}

#[test]
fn zero_workers_is_an_error() {
    let config = PoolConfig {
        workers: 0,
        mode: WorkerMode::InProcess,
        ..PoolConfig::default()
    };
    assert!(matches!(
        WorkerPool::start(&config, Arc::new(MlpFactory)),
        Err(PoolError::NoWorkers)
    ));
}
