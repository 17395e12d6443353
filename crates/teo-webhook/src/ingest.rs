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

//! `POST /webhooks/runner`: the single ingest point every runner callback
//! passes through. State transitions are applied directly against the
//! already-idempotent `Store` methods, so duplicate or out-of-order
//! deliveries resolve for free through `Store`'s own CAS semantics rather
//! than a separate dedup layer here.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use teo_core::error::{StoreError, TeoError};
use teo_core::events::DomainEvent;
use teo_core::ids::timestamp_millis;
use teo_core::model::{Artifacts, ExecutionStatus, FailedTest, ShardResult, ShardStatus};
use teo_scheduler::SchedulerSignal;
use tracing::{info, warn};

use crate::aggregate::aggregate;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookResults {
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub passed: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub skipped: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookShardStatus {
    Passed,
    Failed,
    Error,
    Cancelled,
}

#[derive(Debug, Deserialize)]
pub struct RunnerWebhookPayload {
    pub execution_id: String,
    #[serde(rename = "type")]
    pub kind: WebhookKind,
    pub shard_id: Option<u32>,
    #[serde(default)]
    pub status: Option<WebhookShardStatus>,
    pub results: Option<WebhookResults>,
    #[serde(default)]
    pub failed_tests: Vec<FailedTest>,
    pub artifacts: Option<Artifacts>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WebhookKind {
    Running,
    ShardComplete,
    Final,
}

fn bearer_token_present(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("Bearer "))
        .unwrap_or(false)
}

/// `POST /webhooks/runner`.
///
/// Authentication here only checks that a bearer token is present, not
/// that it matches a specific runner's secret — `Runner` carries no
/// secret field, and per-runner credential issuance sits with the
/// upstream auth layer the orchestrator's core deliberately excludes.
pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RunnerWebhookPayload>,
) -> Result<StatusCode, ApiError> {
    if !bearer_token_present(&headers) {
        return Err(ApiError(TeoError::Validation(
            "missing Authorization: Bearer token".to_string(),
        )));
    }

    let outcome = match payload.kind {
        WebhookKind::Running => handle_running(&state, &payload).await,
        WebhookKind::ShardComplete | WebhookKind::Final => handle_shard_or_final(&state, &payload).await,
    };

    match &outcome {
        Ok(label) => state.metrics.ingest_outcomes.with_label_values(&[label]).inc(),
        Err(e) => {
            let label = match e.0 {
                TeoError::Validation(_) => "rejected",
                TeoError::Store(StoreError::Conflict(_)) => "stale",
                TeoError::Store(StoreError::Transient(_)) => "transient",
                _ => "error",
            };
            state.metrics.ingest_outcomes.with_label_values(&[label]).inc();
        }
    }

    outcome.map(|_| StatusCode::OK)
}

async fn handle_running(state: &AppState, payload: &RunnerWebhookPayload) -> Result<&'static str, ApiError> {
    match state.store.mark_started(&payload.execution_id, timestamp_millis() as u64).await {
        Ok(exec) => {
            state.events.publish(DomainEvent::ExecutionStarted {
                execution_id: exec.execution_id.clone(),
                at: exec.started_at.unwrap_or_default(),
            });
            Ok("started")
        }
        Err(StoreError::Conflict(msg)) => {
            warn!(execution_id = %payload.execution_id, msg, "stale running webhook rejected");
            Err(StoreError::Conflict(msg).into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn handle_shard_or_final(
    state: &AppState,
    payload: &RunnerWebhookPayload,
) -> Result<&'static str, ApiError> {
    let shard_index = payload.shard_id.unwrap_or(1);
    let status = match &payload.status {
        Some(WebhookShardStatus::Passed) => ShardStatus::Passed,
        Some(WebhookShardStatus::Failed) => ShardStatus::Failed,
        Some(WebhookShardStatus::Error) => ShardStatus::Error,
        Some(WebhookShardStatus::Cancelled) => ShardStatus::Cancelled,
        None => ShardStatus::Error,
    };

    let results = payload.results.as_ref();
    let shard_result = ShardResult {
        status,
        total: results.map(|r| r.total).unwrap_or(0),
        passed: results.map(|r| r.passed).unwrap_or(0),
        failed: results.map(|r| r.failed).unwrap_or(0),
        skipped: results.map(|r| r.skipped).unwrap_or(0),
        failed_tests: payload.failed_tests.clone(),
        artifact_refs: payload.artifacts.clone(),
    };

    let exec = match state
        .store
        .record_shard(&payload.execution_id, shard_index, shard_result)
        .await
    {
        Ok(exec) => exec,
        Err(StoreError::Conflict(msg)) => {
            warn!(execution_id = %payload.execution_id, msg, "webhook for terminal execution rejected");
            return Err(StoreError::Conflict(msg).into());
        }
        // record_shard's only PreconditionFailed is an out-of-range shard
        // index; spec §4.7/§8 calls for 400, not the 409 the rest of the
        // Store's PreconditionFailed cases map to.
        Err(StoreError::PreconditionFailed(msg)) => {
            return Err(TeoError::Validation(msg).into());
        }
        Err(e) => return Err(e.into()),
    };

    state.events.publish(DomainEvent::ShardCompleted {
        execution_id: exec.execution_id.clone(),
        shard_index,
        at: timestamp_millis() as u64,
    });

    if !exec.has_all_shards() {
        return Ok("accepted");
    }

    let (final_status, aggregated) = aggregate(&exec);
    let reason = match final_status {
        ExecutionStatus::Error => Some("shard_error_or_missing".to_string()),
        _ => None,
    };

    match state
        .store
        .finalize(&exec.execution_id, final_status, Some(aggregated.clone()), reason.clone())
        .await
    {
        Ok(finalized) => {
            if let Some(runner_id) = finalized.assigned_runner_id {
                state.registry.mark_released(runner_id);
            }
            state.events.publish(DomainEvent::ExecutionCompleted {
                execution_id: finalized.execution_id.clone(),
                status: finalized.status,
                aggregated: finalized.aggregated_results.clone(),
                reason: finalized.terminal_reason.clone(),
                at: finalized.completed_at.unwrap_or_default(),
            });
            state.events.signal(SchedulerSignal::ExecutionCompleted);
            state.dispatcher.spawn(finalized);
            info!(execution_id = %payload.execution_id, ?final_status, "execution finalized from webhook");
            Ok("finalized")
        }
        Err(StoreError::Conflict(msg)) => {
            // Already finalized by a concurrent duplicate delivery, the sweeper,
            // or a client cancellation racing this webhook (spec §4.7, S5).
            Err(StoreError::Conflict(msg).into())
        }
        Err(e) => Err(e.into()),
    }
}
