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

//! Client-facing HTTP API: submit/inspect/cancel executions, manage
//! runners and load-balancing rules, and read queue status.

use std::collections::{HashMap, HashSet};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use teo_core::error::TeoError;
use teo_core::events::DomainEvent;
use teo_core::ids::{new_id, timestamp_millis};
use teo_core::model::{
    Execution, ExecutionStatus, LoadBalancingRule, Runner, RunnerStatus, RuleConfig, RuleKind,
};
use teo_scheduler::SchedulerSignal;
use teo_store::ExecutionFilter;

use crate::error::ApiError;
use crate::state::AppState;

// -- POST /executions ---------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateExecutionRequest {
    pub test_suite: String,
    pub environment: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
    pub estimated_duration_ms: Option<u64>,
    pub requested_runner_type: Option<String>,
    pub requested_runner_id: Option<u64>,
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub requested_by: Option<String>,
    pub webhook_url: Option<String>,
    #[serde(default = "default_total_shards")]
    pub total_shards: u32,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_priority() -> u8 {
    50
}

fn default_total_shards() -> u32 {
    1
}

#[derive(Debug, Serialize)]
pub struct CreateExecutionResponse {
    pub execution_id: String,
    pub status: ExecutionStatus,
}

pub async fn create_execution(
    State(state): State<AppState>,
    Json(req): Json<CreateExecutionRequest>,
) -> Result<(StatusCode, Json<CreateExecutionResponse>), ApiError> {
    if req.test_suite.trim().is_empty() {
        return Err(ApiError(TeoError::Validation("test_suite must not be empty".into())));
    }
    if req.environment.trim().is_empty() {
        return Err(ApiError(TeoError::Validation("environment must not be empty".into())));
    }
    if req.total_shards == 0 {
        return Err(ApiError(TeoError::Validation("total_shards must be >= 1".into())));
    }
    if req.priority > 100 {
        return Err(ApiError(TeoError::Validation("priority must be in 0..=100".into())));
    }

    let exec = Execution {
        execution_id: new_id("exec"),
        test_suite: req.test_suite,
        environment: req.environment,
        branch: req.branch,
        commit: req.commit,
        requested_by: req.requested_by,
        priority: req.priority,
        estimated_duration_ms: req.estimated_duration_ms,
        requested_runner_type: req.requested_runner_type,
        requested_runner_id: req.requested_runner_id,
        status: ExecutionStatus::Queued,
        assigned_runner_id: None,
        total_shards: req.total_shards,
        shard_results: Default::default(),
        aggregated_results: None,
        created_at: 0,
        assigned_at: None,
        started_at: None,
        completed_at: None,
        webhook_url: req.webhook_url,
        metadata: req.metadata,
        terminal_reason: None,
    };

    let enqueued = state.store.enqueue(exec).await?;
    state.events.publish(DomainEvent::ExecutionQueued {
        execution_id: enqueued.execution_id.clone(),
        at: enqueued.created_at,
    });
    state.events.signal(SchedulerSignal::ExecutionQueued);

    Ok((
        StatusCode::CREATED,
        Json(CreateExecutionResponse {
            execution_id: enqueued.execution_id,
            status: enqueued.status,
        }),
    ))
}

// -- GET /executions/{id} ------------------------------------------------

pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Execution>, ApiError> {
    Ok(Json(state.store.get_execution(&id).await?))
}

// -- POST /executions/{id}/cancel ---------------------------------------

pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let exec = state.store.cancel(&id).await?;
    if let Some(runner_id) = exec.assigned_runner_id {
        if let Some(runner) = state.registry.get(runner_id) {
            let drivers = state.drivers.clone();
            let execution_id = exec.execution_id.clone();
            let endpoint = runner.endpoint_url.clone();
            let runner_type = runner.runner_type.clone();
            tokio::spawn(async move {
                if let Some(driver) = drivers.get(&runner_type) {
                    driver.cancel(&execution_id, &endpoint).await;
                }
            });
        }
        state.registry.mark_released(runner_id);
    }
    state.events.publish(DomainEvent::ExecutionCompleted {
        execution_id: exec.execution_id.clone(),
        status: exec.status,
        aggregated: exec.aggregated_results.clone(),
        reason: exec.terminal_reason.clone(),
        at: exec.completed_at.unwrap_or_default(),
    });
    state.dispatcher.spawn(exec);
    Ok(StatusCode::OK)
}

// -- GET /executions ------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    pub test_suite: Option<String>,
    pub environment: Option<String>,
    pub status: Option<ExecutionStatus>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_page_limit")]
    pub limit: usize,
}

fn default_page_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct ListExecutionsResponse {
    pub executions: Vec<Execution>,
    pub page: PageInfo,
}

#[derive(Debug, Serialize)]
pub struct PageInfo {
    pub offset: usize,
    pub limit: usize,
    pub total: usize,
}

pub async fn list_executions(
    State(state): State<AppState>,
    Query(q): Query<ListExecutionsQuery>,
) -> Result<Json<ListExecutionsResponse>, ApiError> {
    let filter = ExecutionFilter {
        test_suite: q.test_suite,
        environment: q.environment,
        status: q.status,
        requested_runner_type: None,
        requested_runner_id: None,
    };
    let page = state.store.list_executions(&filter, q.offset, q.limit).await?;
    Ok(Json(ListExecutionsResponse {
        page: PageInfo {
            offset: q.offset,
            limit: q.limit,
            total: page.total,
        },
        executions: page.items,
    }))
}

// -- POST /runners --------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateRunnerRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub runner_type: String,
    pub endpoint_url: String,
    pub webhook_url: String,
    #[serde(default)]
    pub capabilities: HashSet<String>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_jobs: u32,
    #[serde(default)]
    pub priority: i32,
    pub health_check_url: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_max_concurrent() -> u32 {
    1
}

#[derive(Debug, Serialize)]
pub struct CreateRunnerResponse {
    pub runner_id: u64,
}

pub async fn create_runner(
    State(state): State<AppState>,
    Json(req): Json<CreateRunnerRequest>,
) -> Result<(StatusCode, Json<CreateRunnerResponse>), ApiError> {
    if req.name.trim().is_empty() || req.endpoint_url.trim().is_empty() || req.webhook_url.trim().is_empty() {
        return Err(ApiError(TeoError::Validation(
            "name, endpoint_url and webhook_url are required".into(),
        )));
    }

    let runner = Runner {
        runner_id: 0,
        name: req.name,
        runner_type: req.runner_type,
        endpoint_url: req.endpoint_url,
        health_check_url: req.health_check_url,
        webhook_url: req.webhook_url,
        capabilities: req.capabilities,
        max_concurrent_jobs: req.max_concurrent_jobs,
        priority: req.priority,
        status: RunnerStatus::Active,
        health: teo_core::model::RunnerHealth::Unknown,
        last_health_check_at: None,
        metadata: req.metadata,
    };

    let runner_id = state.registry.register(runner).await?;
    state.events.publish(DomainEvent::RunnerRegistered {
        runner_id,
        at: timestamp_millis() as u64,
    });
    Ok((StatusCode::CREATED, Json(CreateRunnerResponse { runner_id })))
}

// -- PATCH /runners/{id} --------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PatchRunnerRequest {
    pub name: Option<String>,
    pub endpoint_url: Option<String>,
    pub webhook_url: Option<String>,
    pub capabilities: Option<HashSet<String>>,
    pub max_concurrent_jobs: Option<u32>,
    pub priority: Option<i32>,
    pub health_check_url: Option<String>,
}

pub async fn patch_runner(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(req): Json<PatchRunnerRequest>,
) -> Result<Json<Runner>, ApiError> {
    let runner = state
        .registry
        .update(id, |r| {
            if let Some(v) = req.name {
                r.name = v;
            }
            if let Some(v) = req.endpoint_url {
                r.endpoint_url = v;
            }
            if let Some(v) = req.webhook_url {
                r.webhook_url = v;
            }
            if let Some(v) = req.capabilities {
                r.capabilities = v;
            }
            if let Some(v) = req.max_concurrent_jobs {
                r.max_concurrent_jobs = v;
            }
            if let Some(v) = req.priority {
                r.priority = v;
            }
            if req.health_check_url.is_some() {
                r.health_check_url = req.health_check_url;
            }
        })
        .await?;
    Ok(Json(runner))
}

// -- POST /runners/{id}/{pause|resume|decommission} -----------------------

pub async fn pause_runner(State(state): State<AppState>, Path(id): Path<u64>) -> Result<StatusCode, ApiError> {
    state.registry.set_status(id, RunnerStatus::Paused).await?;
    Ok(StatusCode::OK)
}

pub async fn resume_runner(State(state): State<AppState>, Path(id): Path<u64>) -> Result<StatusCode, ApiError> {
    state.registry.set_status(id, RunnerStatus::Active).await?;
    Ok(StatusCode::OK)
}

pub async fn decommission_runner(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    state.registry.set_status(id, RunnerStatus::Decommissioned).await?;
    Ok(StatusCode::OK)
}

// -- GET /runners -----------------------------------------------------------

pub async fn list_runners(State(state): State<AppState>) -> Json<Vec<Runner>> {
    Json(state.registry.list())
}

// -- POST /rules ------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub name: String,
    pub kind: RuleKind,
    #[serde(default)]
    pub priority: i32,
    pub test_suite_pattern: Option<String>,
    pub environment_pattern: Option<String>,
    pub runner_type_filter: Option<String>,
    #[serde(default)]
    pub config: RuleConfig,
}

#[derive(Debug, Serialize)]
pub struct CreateRuleResponse {
    pub rule_id: u64,
}

pub async fn create_rule(
    State(state): State<AppState>,
    Json(req): Json<CreateRuleRequest>,
) -> Result<(StatusCode, Json<CreateRuleResponse>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError(TeoError::Validation("name is required".into())));
    }
    let rule = LoadBalancingRule {
        rule_id: 0,
        name: req.name,
        active: true,
        priority: req.priority,
        kind: req.kind,
        test_suite_pattern: req.test_suite_pattern,
        environment_pattern: req.environment_pattern,
        runner_type_filter: req.runner_type_filter,
        config: req.config,
        round_robin_cursor: 0,
    };
    let rule = state.store.register_rule(rule).await?;
    state.events.publish(DomainEvent::RuleConfigured {
        rule_id: rule.rule_id,
        at: timestamp_millis() as u64,
    });
    Ok((StatusCode::CREATED, Json(CreateRuleResponse { rule_id: rule.rule_id })))
}

// -- GET /queue/status --------------------------------------------------

#[derive(Debug, Serialize)]
pub struct QueueStatusResponse {
    pub queued: u64,
    pub assigned: u64,
    pub running: u64,
    pub runners: RunnerSummary,
}

#[derive(Debug, Serialize)]
pub struct RunnerSummary {
    pub active: u64,
    pub total_capacity: u64,
    pub utilization_rate: f64,
}

pub async fn queue_status(State(state): State<AppState>) -> Result<Json<QueueStatusResponse>, ApiError> {
    let queued = state
        .store
        .claim_candidates(usize::MAX, &ExecutionFilter::default())
        .await?
        .len() as u64;

    let all = state
        .store
        .list_executions(&ExecutionFilter::default(), 0, usize::MAX)
        .await?
        .items;
    let assigned = all.iter().filter(|e| e.status == ExecutionStatus::Assigned).count() as u64;
    let running = all.iter().filter(|e| e.status == ExecutionStatus::Running).count() as u64;

    let runners = state.registry.list();
    let active = runners.iter().filter(|r| r.status == RunnerStatus::Active).count() as u64;
    let total_capacity: u64 = runners
        .iter()
        .filter(|r| r.status == RunnerStatus::Active)
        .map(|r| r.max_concurrent_jobs as u64)
        .sum();
    let in_use: u64 = runners
        .iter()
        .filter(|r| r.status == RunnerStatus::Active)
        .map(|r| state.registry.inflight(r.runner_id) as u64)
        .sum();
    let utilization_rate = if total_capacity == 0 {
        0.0
    } else {
        in_use as f64 / total_capacity as f64
    };

    Ok(Json(QueueStatusResponse {
        queued,
        assigned,
        running,
        runners: RunnerSummary {
            active,
            total_capacity,
            utilization_rate,
        },
    }))
}

// -- GET /health ----------------------------------------------------------

/// Readiness check: reflects Store reachability, distinct from the
/// internal admin listener's plain liveness `/healthz`.
pub async fn health(State(state): State<AppState>) -> StatusCode {
    match state.store.list_runners().await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
