// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! End-to-end scheduling scenarios driving Store + Registry + Rule Engine
//! + Scheduler + Gateway with [`NullRunnerDriver`], no real network I/O.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use teo_core::config::EngineConfig;
use teo_core::model::{
    Execution, ExecutionStatus, LoadBalancingRule, Runner, RunnerHealth, RunnerStatus, RuleConfig, RuleKind,
};
use teo_registry::RunnerRegistry;
use teo_scheduler::{
    DriverGateway, DriverRegistry, EventBus, NoopNotifier, NullRunnerDriver, Scheduler, SchedulerMetrics,
};
use teo_store::{MemoryBackend, Store};

fn sample_execution(priority: u8) -> Execution {
    Execution {
        execution_id: teo_core::ids::new_id("exec"),
        test_suite: "smoke".to_string(),
        environment: "staging".to_string(),
        branch: None,
        commit: None,
        requested_by: None,
        priority,
        estimated_duration_ms: None,
        requested_runner_type: None,
        requested_runner_id: None,
        status: ExecutionStatus::Queued,
        assigned_runner_id: None,
        total_shards: 1,
        shard_results: Default::default(),
        aggregated_results: None,
        created_at: 0,
        assigned_at: None,
        started_at: None,
        completed_at: None,
        webhook_url: None,
        metadata: HashMap::new(),
        terminal_reason: None,
    }
}

fn sample_runner(max_concurrent: u32) -> Runner {
    Runner {
        runner_id: 0,
        name: "runner".to_string(),
        runner_type: "docker".to_string(),
        endpoint_url: "http://runner.local".to_string(),
        health_check_url: None,
        webhook_url: "http://runner.local/webhook".to_string(),
        capabilities: HashSet::new(),
        max_concurrent_jobs: max_concurrent,
        priority: 50,
        status: RunnerStatus::Active,
        health: RunnerHealth::Healthy,
        last_health_check_at: None,
        metadata: HashMap::new(),
    }
}

async fn build_scheduler(store: Store, registry: Arc<RunnerRegistry>) -> Scheduler {
    let (events, _ticks) = EventBus::new(128);
    let drivers = Arc::new(DriverRegistry::new().register(Box::new(NullRunnerDriver::new("docker"))));
    let gateway = Arc::new(DriverGateway::new(
        store.clone(),
        registry.clone(),
        drivers,
        events.clone(),
        Arc::new(NoopNotifier),
        5,
        Duration::from_millis(1),
    ));
    let metrics = Arc::new(SchedulerMetrics::new(&prometheus::Registry::new()).unwrap());
    Scheduler::new(store, registry, gateway, events, EngineConfig::default(), metrics)
}

#[tokio::test]
async fn capacity_invariant_holds_under_two_queued_executions() {
    let store = Store::new(Arc::new(MemoryBackend::new())).await.unwrap();
    let registry = RunnerRegistry::bootstrap(store.clone()).await.unwrap();

    let runner = registry.register(sample_runner(1)).await.unwrap();
    let e1 = store.enqueue(sample_execution(50)).await.unwrap();
    let e2 = store.enqueue(sample_execution(50)).await.unwrap();

    let scheduler = build_scheduler(store.clone(), registry.clone()).await;
    scheduler.tick().await;

    let reloaded1 = store.get_execution(&e1.execution_id).await.unwrap();
    let reloaded2 = store.get_execution(&e2.execution_id).await.unwrap();
    let assigned_count = [&reloaded1, &reloaded2]
        .iter()
        .filter(|e| e.status == ExecutionStatus::Assigned)
        .count();
    assert_eq!(assigned_count, 1, "exactly one execution should be assigned to a runner at capacity 1");
    assert_eq!(registry.inflight(runner), 1);

    // Finalize the assigned one; the other becomes assignable on the next tick.
    let (assigned, queued) = if reloaded1.status == ExecutionStatus::Assigned {
        (reloaded1, reloaded2)
    } else {
        (reloaded2, reloaded1)
    };
    store
        .finalize(&assigned.execution_id, ExecutionStatus::Completed, None, None)
        .await
        .unwrap();
    registry.mark_released(runner);

    scheduler.tick().await;
    let reloaded_queued = store.get_execution(&queued.execution_id).await.unwrap();
    assert_eq!(reloaded_queued.status, ExecutionStatus::Assigned);
}

#[tokio::test]
async fn round_robin_rule_alternates_across_two_runners() {
    let store = Store::new(Arc::new(MemoryBackend::new())).await.unwrap();
    let registry = RunnerRegistry::bootstrap(store.clone()).await.unwrap();

    let r1 = registry.register(sample_runner(10)).await.unwrap();
    let r2 = registry.register(sample_runner(10)).await.unwrap();

    store
        .register_rule(LoadBalancingRule {
            rule_id: 0,
            name: "rr".to_string(),
            active: true,
            priority: 100,
            kind: RuleKind::RoundRobin,
            test_suite_pattern: None,
            environment_pattern: None,
            runner_type_filter: None,
            config: RuleConfig::default(),
            round_robin_cursor: 0,
        })
        .await
        .unwrap();

    let mut execution_ids = Vec::new();
    for _ in 0..6 {
        let e = store.enqueue(sample_execution(50)).await.unwrap();
        execution_ids.push(e.execution_id);
    }

    let scheduler = build_scheduler(store.clone(), registry.clone()).await;
    scheduler.tick().await;

    let mut assigned_runners = Vec::new();
    for id in &execution_ids {
        let exec = store.get_execution(id).await.unwrap();
        assigned_runners.push(exec.assigned_runner_id.expect("every execution should be assigned"));
    }

    let expected: Vec<u64> = (0..6).map(|i| if i % 2 == 0 { r1 } else { r2 }).collect();
    assert_eq!(assigned_runners, expected, "round-robin should alternate r1, r2, r1, r2, ...");
}
