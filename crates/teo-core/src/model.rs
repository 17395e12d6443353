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

//! Entities of the orchestrator's data model (spec §3).

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Lifecycle status of an [`Execution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Queued,
    Assigned,
    Running,
    Completed,
    Failed,
    Error,
    Cancelled,
}

impl ExecutionStatus {
    /// Once an execution is in one of these states it never leaves it
    /// (invariant 4 / property P2).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Error
                | ExecutionStatus::Cancelled
        )
    }
}

/// One shard's reported outcome (spec §3, `shard_results`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardResult {
    pub status: ShardStatus,
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub failed_tests: Vec<FailedTest>,
    pub artifact_refs: Option<Artifacts>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStatus {
    Passed,
    Failed,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTest {
    pub title: String,
    pub file: String,
    pub error: String,
    #[serde(default)]
    pub retry: Option<u32>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifacts {
    #[serde(default)]
    pub report_url: Option<String>,
    #[serde(default)]
    pub logs_url: Option<String>,
    #[serde(default)]
    pub screenshots_url: Option<String>,
}

/// The aggregated outcome written exactly once at finalization
/// (invariant 4, spec §4.7 "Aggregation rule").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResults {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub failed_tests: Vec<FailedTest>,
}

/// A single user request to run a test suite, potentially sharded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: String,
    pub test_suite: String,
    pub environment: String,
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub requested_by: Option<String>,
    pub priority: u8,
    pub estimated_duration_ms: Option<u64>,
    pub requested_runner_type: Option<String>,
    pub requested_runner_id: Option<u64>,
    pub status: ExecutionStatus,
    pub assigned_runner_id: Option<u64>,
    pub total_shards: u32,
    pub shard_results: BTreeMap<u32, ShardResult>,
    pub aggregated_results: Option<AggregatedResults>,
    pub created_at: u64,
    pub assigned_at: Option<u64>,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub webhook_url: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Free-form reason recorded on terminal states (spec §7, "every
    /// terminal state has a reason string").
    pub terminal_reason: Option<String>,
}

impl Execution {
    /// Whether every shard index in `1..=total_shards` has a recorded result.
    pub fn has_all_shards(&self) -> bool {
        (1..=self.total_shards).all(|idx| self.shard_results.contains_key(&idx))
    }
}

/// Lifecycle status of a [`Runner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerStatus {
    Active,
    Paused,
    Decommissioned,
}

/// Health as observed by the Health Prober (C9), orthogonal to [`RunnerStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerHealth {
    Healthy,
    Unhealthy,
    Unknown,
}

/// An externally-managed test runner registered with the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    pub runner_id: u64,
    pub name: String,
    pub runner_type: String,
    pub endpoint_url: String,
    pub health_check_url: Option<String>,
    pub webhook_url: String,
    pub capabilities: HashSet<String>,
    pub max_concurrent_jobs: u32,
    pub priority: i32,
    pub status: RunnerStatus,
    pub health: RunnerHealth,
    pub last_health_check_at: Option<u64>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Lifecycle state of a [`ResourceAllocation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationState {
    Allocated,
    Released,
}

/// A live capacity reservation on a runner for one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub allocation_id: String,
    pub execution_id: String,
    pub runner_id: u64,
    pub cpu_allocated: f64,
    pub memory_allocated: f64,
    pub state: AllocationState,
    pub allocated_at: u64,
    pub released_at: Option<u64>,
}

/// Strategy a [`LoadBalancingRule`] applies once matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    PriorityBased,
    ResourceBased,
    RoundRobin,
    Affinity,
    TypeFilter,
}

/// A predicate + strategy used by the Rule Engine (C5) to pick a runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancingRule {
    pub rule_id: u64,
    pub name: String,
    pub active: bool,
    pub priority: i32,
    pub kind: RuleKind,
    pub test_suite_pattern: Option<String>,
    pub environment_pattern: Option<String>,
    pub runner_type_filter: Option<String>,
    pub config: RuleConfig,
    /// Persisted cursor for `round-robin`, over candidates sorted by
    /// `runner_id`. Persisted so restarts don't reset fairness (spec §5,
    /// §9 open question 1).
    pub round_robin_cursor: u64,
}

/// Kind-specific configuration for a [`LoadBalancingRule`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Required capability set for `kind = affinity`.
    #[serde(default)]
    pub required_capabilities: HashSet<String>,
    /// Restriction type for `kind = type-filter`.
    #[serde(default)]
    pub runner_type: Option<String>,
}

/// An append-only health observation (spec §3, `RunnerHealthSample`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerHealthSample {
    pub runner_id: u64,
    pub checked_at: u64,
    pub health: RunnerHealth,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}
