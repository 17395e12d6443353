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

//! Drives `POST /webhooks/runner` end to end through the real `axum`
//! router (spec §6.2/§4.7/§8), with no real network I/O: a `MemoryBackend`
//! Store and no `webhook_url` on any execution so client-webhook delivery
//! never fires.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use teo_core::config::EngineConfig;
use teo_core::model::{Execution, ExecutionStatus, Runner, RunnerHealth, RunnerStatus};
use teo_registry::RunnerRegistry;
use teo_scheduler::{DriverRegistry, EventBus};
use teo_store::{MemoryBackend, Store};
use teo_webhook::{router, AppState};

fn sample_execution(total_shards: u32) -> Execution {
    Execution {
        execution_id: teo_core::ids::new_id("exec"),
        test_suite: "smoke".to_string(),
        environment: "staging".to_string(),
        branch: None,
        commit: None,
        requested_by: None,
        priority: 50,
        estimated_duration_ms: None,
        requested_runner_type: None,
        requested_runner_id: None,
        status: ExecutionStatus::Queued,
        assigned_runner_id: None,
        total_shards,
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

fn sample_runner() -> Runner {
    Runner {
        runner_id: 0,
        name: "runner".to_string(),
        runner_type: "docker".to_string(),
        endpoint_url: "http://runner.local".to_string(),
        health_check_url: None,
        webhook_url: "http://runner.local/webhook".to_string(),
        capabilities: HashSet::new(),
        max_concurrent_jobs: 4,
        priority: 50,
        status: RunnerStatus::Active,
        health: RunnerHealth::Healthy,
        last_health_check_at: None,
        metadata: HashMap::new(),
    }
}

async fn build_app() -> (axum::Router, Store, Arc<RunnerRegistry>) {
    let store = Store::new(Arc::new(MemoryBackend::new())).await.unwrap();
    let registry = RunnerRegistry::bootstrap(store.clone()).await.unwrap();
    let (events, _ticks) = EventBus::new(128);
    let state = AppState::new(
        store.clone(),
        registry.clone(),
        Arc::new(DriverRegistry::new()),
        events,
        EngineConfig::default(),
        &prometheus::Registry::new(),
    );
    (router(state), store, registry)
}

async fn post_webhook(app: &axum::Router, body: Value, authed: bool) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/runner")
        .header(header::CONTENT_TYPE, "application/json");
    if authed {
        builder = builder.header(header::AUTHORIZATION, "Bearer test-secret");
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn missing_bearer_token_is_rejected() {
    let (app, store, _registry) = build_app().await;
    let exec = store.enqueue(sample_execution(1)).await.unwrap();

    let (status, _) = post_webhook(
        &app,
        json!({ "execution_id": exec.execution_id, "type": "running" }),
        false,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn happy_path_single_shard_finalizes_completed() {
    // Scenario S1: single-shard execution, running then final -> completed.
    let (app, store, registry) = build_app().await;
    let runner_id = registry.register(sample_runner()).await.unwrap();
    let exec = store.enqueue(sample_execution(1)).await.unwrap();
    store.assign(&exec.execution_id, runner_id).await.unwrap();
    registry.mark_assigned(runner_id);

    let (status, _) = post_webhook(
        &app,
        json!({ "execution_id": exec.execution_id, "type": "running" }),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post_webhook(
        &app,
        json!({
            "execution_id": exec.execution_id,
            "type": "final",
            "shard_id": 1,
            "status": "passed",
            "results": { "total": 10, "passed": 10, "failed": 0, "skipped": 0 },
        }),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let reloaded = store.get_execution(&exec.execution_id).await.unwrap();
    assert_eq!(reloaded.status, ExecutionStatus::Completed);
    let aggregated = reloaded.aggregated_results.unwrap();
    assert_eq!(aggregated.total, 10);
    assert_eq!(aggregated.failed, 0);
    assert_eq!(registry.inflight(runner_id), 0, "allocation released on finalize");
}

#[tokio::test]
async fn sharded_aggregation_reports_failed_on_any_failure() {
    // Scenario S2: 4-shard execution with one failing shard.
    let (app, store, registry) = build_app().await;
    let runner_id = registry.register(sample_runner()).await.unwrap();
    let exec = store.enqueue(sample_execution(4)).await.unwrap();
    store.assign(&exec.execution_id, runner_id).await.unwrap();

    let shard_results = [(25, 23, 2, 0), (25, 25, 0, 0), (25, 20, 5, 0), (25, 25, 0, 0)];
    for (i, (total, passed, failed, skipped)) in shard_results.iter().enumerate() {
        let (status, _) = post_webhook(
            &app,
            json!({
                "execution_id": exec.execution_id,
                "type": "shard-complete",
                "shard_id": i + 1,
                "status": if *failed > 0 { "failed" } else { "passed" },
                "results": { "total": total, "passed": passed, "failed": failed, "skipped": skipped },
            }),
            true,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let reloaded = store.get_execution(&exec.execution_id).await.unwrap();
    assert_eq!(reloaded.status, ExecutionStatus::Failed);
    let aggregated = reloaded.aggregated_results.unwrap();
    assert_eq!(aggregated.total, 100);
    assert_eq!(aggregated.passed, 93);
    assert_eq!(aggregated.failed, 7);
    assert_eq!(aggregated.failed_tests.len(), 0);
}

#[tokio::test]
async fn shard_index_out_of_range_is_bad_request() {
    let (app, store, registry) = build_app().await;
    let runner_id = registry.register(sample_runner()).await.unwrap();
    let exec = store.enqueue(sample_execution(2)).await.unwrap();
    store.assign(&exec.execution_id, runner_id).await.unwrap();

    let (status, _) = post_webhook(
        &app,
        json!({
            "execution_id": exec.execution_id,
            "type": "shard-complete",
            "shard_id": 3,
            "status": "passed",
            "results": { "total": 1, "passed": 1, "failed": 0, "skipped": 0 },
        }),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn late_webhook_after_cancel_is_rejected_with_conflict() {
    // Scenario S5: execution cancelled, then a stale `final` webhook
    // arrives — orchestrator must 409 and leave the cancelled state alone.
    let (app, store, registry) = build_app().await;
    let runner_id = registry.register(sample_runner()).await.unwrap();
    let exec = store.enqueue(sample_execution(1)).await.unwrap();
    store.assign(&exec.execution_id, runner_id).await.unwrap();
    store.mark_started(&exec.execution_id, 100).await.unwrap();
    store.cancel(&exec.execution_id).await.unwrap();

    let (status, _) = post_webhook(
        &app,
        json!({
            "execution_id": exec.execution_id,
            "type": "final",
            "shard_id": 1,
            "status": "passed",
            "results": { "total": 10, "passed": 10, "failed": 0, "skipped": 0 },
        }),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let reloaded = store.get_execution(&exec.execution_id).await.unwrap();
    assert_eq!(reloaded.status, ExecutionStatus::Cancelled, "state must remain cancelled");
}

#[tokio::test]
async fn stale_running_webhook_after_terminal_is_rejected() {
    let (app, store, registry) = build_app().await;
    let runner_id = registry.register(sample_runner()).await.unwrap();
    let exec = store.enqueue(sample_execution(1)).await.unwrap();
    store.assign(&exec.execution_id, runner_id).await.unwrap();
    store
        .finalize(&exec.execution_id, ExecutionStatus::Error, None, Some("driver_unavailable".into()))
        .await
        .unwrap();

    let (status, _) = post_webhook(
        &app,
        json!({ "execution_id": exec.execution_id, "type": "running" }),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}
