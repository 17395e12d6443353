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

//! The Store facade (C2, spec §4.1): the only write path for every
//! durable entity. Every write op here is a short, single-keyspace-lock
//! (or small multi-keyspace) transaction over a [`KeyValueStore`], giving
//! serializable-equivalent semantics regardless of which backend is
//! plugged in underneath.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use teo_core::error::StoreError;
use teo_core::ids::timestamp_millis;
use teo_core::model::{
    AggregatedResults, AllocationState, Execution, ExecutionStatus, LoadBalancingRule, Runner,
    RunnerHealth, RunnerHealthSample, RunnerStatus, ShardResult,
};

use crate::backend::{KeyValueStore, Keyspace, Operation};

/// Optional filters accepted by [`Store::claim_candidates`] and
/// [`Store::list_executions`].
#[derive(Debug, Default, Clone)]
pub struct ExecutionFilter {
    pub requested_runner_type: Option<String>,
    pub requested_runner_id: Option<u64>,
    pub test_suite: Option<String>,
    pub environment: Option<String>,
    pub status: Option<ExecutionStatus>,
}

impl ExecutionFilter {
    fn matches(&self, exec: &Execution) -> bool {
        if let Some(t) = &self.requested_runner_type {
            if exec.requested_runner_type.as_deref() != Some(t.as_str()) {
                return false;
            }
        }
        if let Some(id) = self.requested_runner_id {
            if exec.requested_runner_id != Some(id) {
                return false;
            }
        }
        if let Some(s) = &self.test_suite {
            if &exec.test_suite != s {
                return false;
            }
        }
        if let Some(e) = &self.environment {
            if &exec.environment != e {
                return false;
            }
        }
        if let Some(status) = self.status {
            if exec.status != status {
                return false;
            }
        }
        true
    }
}

/// Page of results returned by [`Store::list_executions`].
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

/// Result of [`Store::status_counts`].
#[derive(Debug, Default, Clone, Copy)]
pub struct QueueCounts {
    pub queued: u64,
    pub assigned: u64,
    pub running: u64,
}

fn now() -> u64 {
    timestamp_millis() as u64
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::Transient(format!("encode error: {e}")))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Transient(format!("decode error: {e}")))
}

/// The durable Store. Cloning is cheap (shares the backend `Arc`).
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn KeyValueStore>,
    next_runner_id: Arc<AtomicU64>,
    next_rule_id: Arc<AtomicU64>,
}

impl Store {
    /// Build a Store over `backend`, restoring the runner/rule id counters
    /// from whatever is already persisted so restarts never reissue an id.
    pub async fn new(backend: Arc<dyn KeyValueStore>) -> Result<Self, StoreError> {
        let mut max_runner_id = 0u64;
        for (key, _) in backend.scan(Keyspace::Runners).await? {
            if let Ok(id) = key.parse::<u64>() {
                max_runner_id = max_runner_id.max(id);
            }
        }
        let mut max_rule_id = 0u64;
        for (key, _) in backend.scan(Keyspace::Rules).await? {
            if let Ok(id) = key.parse::<u64>() {
                max_rule_id = max_rule_id.max(id);
            }
        }
        Ok(Self {
            backend,
            next_runner_id: Arc::new(AtomicU64::new(max_runner_id + 1)),
            next_rule_id: Arc::new(AtomicU64::new(max_rule_id + 1)),
        })
    }

    async fn get_execution_raw(&self, execution_id: &str) -> Result<Execution, StoreError> {
        let bytes = self
            .backend
            .get(Keyspace::Executions, execution_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("execution {execution_id}")))?;
        decode(&bytes)
    }

    async fn get_runner_raw(&self, runner_id: u64) -> Result<Runner, StoreError> {
        let bytes = self
            .backend
            .get(Keyspace::Runners, &runner_id.to_string())
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("runner {runner_id}")))?;
        decode(&bytes)
    }

    /// Insert a new Execution with `status = queued` (spec §4.1 `enqueue`).
    pub async fn enqueue(&self, mut exec: Execution) -> Result<Execution, StoreError> {
        exec.status = ExecutionStatus::Queued;
        exec.created_at = now();
        self.backend
            .put(Keyspace::Executions, &exec.execution_id, encode(&exec)?)
            .await?;
        Ok(exec)
    }

    /// CAS any pre-terminal status to `cancelled`, releasing any live
    /// allocation in the same transaction.
    pub async fn cancel(&self, execution_id: &str) -> Result<Execution, StoreError> {
        let _lock = self
            .backend
            .lock_many(vec![
                (Keyspace::Executions, execution_id.to_string()),
                (Keyspace::Allocations, execution_id.to_string()),
            ])
            .await;

        let mut exec = self.get_execution_raw(execution_id).await?;
        if exec.status.is_terminal() {
            return Err(StoreError::PreconditionFailed(format!(
                "execution {execution_id} already terminal ({:?})",
                exec.status
            )));
        }
        exec.status = ExecutionStatus::Cancelled;
        exec.completed_at = Some(now());
        exec.terminal_reason = Some("cancelled by client".to_string());

        let mut ops = vec![(
            Keyspace::Executions,
            execution_id.to_string(),
            Operation::Put(encode(&exec)?),
        )];

        if let Some(alloc_bytes) = self.backend.get(Keyspace::Allocations, execution_id).await? {
            let mut alloc: teo_core::model::ResourceAllocation = decode(&alloc_bytes)?;
            if alloc.state == AllocationState::Allocated {
                alloc.state = AllocationState::Released;
                alloc.released_at = Some(now());
                ops.push((
                    Keyspace::Allocations,
                    execution_id.to_string(),
                    Operation::Put(encode(&alloc)?),
                ));
            }
        }

        self.backend.apply_txn(ops).await?;
        Ok(exec)
    }

    /// Up to `limit` queued executions ordered by `(priority DESC, created_at ASC)`.
    pub async fn claim_candidates(
        &self,
        limit: usize,
        filter: &ExecutionFilter,
    ) -> Result<Vec<Execution>, StoreError> {
        let mut all: Vec<Execution> = self
            .backend
            .scan(Keyspace::Executions)
            .await?
            .into_iter()
            .filter_map(|(_, v)| decode::<Execution>(&v).ok())
            .filter(|e| e.status == ExecutionStatus::Queued)
            .filter(|e| filter.matches(e))
            .collect();

        all.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        all.truncate(limit);
        Ok(all)
    }

    /// Atomically bind `execution_id` to `runner_id`: CAS `queued -> assigned`,
    /// insert a [`teo_core::model::ResourceAllocation`], and re-check
    /// invariant 1 (capacity) against the runner's `max_concurrent_jobs`.
    pub async fn assign(
        &self,
        execution_id: &str,
        runner_id: u64,
    ) -> Result<Execution, StoreError> {
        let _lock = self
            .backend
            .lock_many(vec![
                (Keyspace::Executions, execution_id.to_string()),
                (Keyspace::Runners, runner_id.to_string()),
                (Keyspace::Allocations, execution_id.to_string()),
            ])
            .await;

        let mut exec = self.get_execution_raw(execution_id).await?;
        if exec.status != ExecutionStatus::Queued {
            return Err(StoreError::PreconditionFailed(format!(
                "execution {execution_id} is not queued (status={:?})",
                exec.status
            )));
        }

        let runner = self.get_runner_raw(runner_id).await?;
        if runner.status != RunnerStatus::Active {
            return Err(StoreError::PreconditionFailed(format!(
                "runner {runner_id} is not active"
            )));
        }
        if runner.health == RunnerHealth::Unhealthy {
            return Err(StoreError::PreconditionFailed(format!(
                "runner {runner_id} is unhealthy"
            )));
        }

        let inflight = self.count_inflight(runner_id).await?;
        if inflight >= runner.max_concurrent_jobs {
            return Err(StoreError::PreconditionFailed(format!(
                "runner {runner_id} at capacity ({inflight}/{})",
                runner.max_concurrent_jobs
            )));
        }

        exec.status = ExecutionStatus::Assigned;
        exec.assigned_runner_id = Some(runner_id);
        exec.assigned_at = Some(now());

        let allocation = teo_core::model::ResourceAllocation {
            allocation_id: teo_core::ids::new_id("alloc"),
            execution_id: execution_id.to_string(),
            runner_id,
            cpu_allocated: 1.0,
            memory_allocated: 512.0,
            state: AllocationState::Allocated,
            allocated_at: now(),
            released_at: None,
        };

        self.backend
            .apply_txn(vec![
                (
                    Keyspace::Executions,
                    execution_id.to_string(),
                    Operation::Put(encode(&exec)?),
                ),
                (
                    Keyspace::Allocations,
                    execution_id.to_string(),
                    Operation::Put(encode(&allocation)?),
                ),
            ])
            .await?;

        Ok(exec)
    }

    /// Count executions currently bound to `runner_id` in `{assigned, running}`
    /// — the authoritative check behind invariant 1, independent of the
    /// Registry's cached counters (spec §5: "the Store is authoritative").
    async fn count_inflight(&self, runner_id: u64) -> Result<u32, StoreError> {
        let count = self
            .backend
            .scan(Keyspace::Executions)
            .await?
            .into_iter()
            .filter_map(|(_, v)| decode::<Execution>(&v).ok())
            .filter(|e| {
                e.assigned_runner_id == Some(runner_id)
                    && matches!(e.status, ExecutionStatus::Assigned | ExecutionStatus::Running)
            })
            .count();
        Ok(count as u32)
    }

    /// CAS `assigned -> running`; idempotent if already running.
    pub async fn mark_started(&self, execution_id: &str, at: u64) -> Result<Execution, StoreError> {
        let _lock = self
            .backend
            .lock_many(vec![(Keyspace::Executions, execution_id.to_string())])
            .await;

        let mut exec = self.get_execution_raw(execution_id).await?;
        match exec.status {
            ExecutionStatus::Running => return Ok(exec),
            ExecutionStatus::Assigned => {}
            other => {
                return Err(StoreError::Conflict(format!(
                    "execution {execution_id} cannot start from status {other:?}"
                )))
            }
        }
        exec.status = ExecutionStatus::Running;
        exec.started_at = Some(at);
        self.backend
            .put(Keyspace::Executions, execution_id, encode(&exec)?)
            .await?;
        Ok(exec)
    }

    /// Idempotent upsert of a shard result; rejects an out-of-range index.
    pub async fn record_shard(
        &self,
        execution_id: &str,
        shard_index: u32,
        result: ShardResult,
    ) -> Result<Execution, StoreError> {
        let _lock = self
            .backend
            .lock_many(vec![(Keyspace::Executions, execution_id.to_string())])
            .await;

        let mut exec = self.get_execution_raw(execution_id).await?;
        if exec.status.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "execution {execution_id} already terminal"
            )));
        }
        if shard_index == 0 || shard_index > exec.total_shards {
            return Err(StoreError::PreconditionFailed(format!(
                "shard index {shard_index} out of range 1..={}",
                exec.total_shards
            )));
        }
        exec.shard_results.insert(shard_index, result);
        self.backend
            .put(Keyspace::Executions, execution_id, encode(&exec)?)
            .await?;
        Ok(exec)
    }

    /// CAS `running -> terminal`, releasing any live allocation in the same
    /// transaction. Idempotent if the execution is already terminal with an
    /// identical `(status, aggregated)`.
    pub async fn finalize(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        aggregated: Option<AggregatedResults>,
        reason: Option<String>,
    ) -> Result<Execution, StoreError> {
        assert!(status.is_terminal(), "finalize requires a terminal status");

        let _lock = self
            .backend
            .lock_many(vec![
                (Keyspace::Executions, execution_id.to_string()),
                (Keyspace::Allocations, execution_id.to_string()),
            ])
            .await;

        let mut exec = self.get_execution_raw(execution_id).await?;
        if exec.status.is_terminal() {
            if exec.status == status && exec.aggregated_results == aggregated {
                return Ok(exec);
            }
            return Err(StoreError::Conflict(format!(
                "execution {execution_id} already terminal ({:?})",
                exec.status
            )));
        }

        exec.status = status;
        exec.aggregated_results = aggregated;
        exec.completed_at = Some(now());
        exec.terminal_reason = reason;

        let mut ops = vec![(
            Keyspace::Executions,
            execution_id.to_string(),
            Operation::Put(encode(&exec)?),
        )];

        if let Some(alloc_bytes) = self.backend.get(Keyspace::Allocations, execution_id).await? {
            let mut alloc: teo_core::model::ResourceAllocation = decode(&alloc_bytes)?;
            if alloc.state == AllocationState::Allocated {
                alloc.state = AllocationState::Released;
                alloc.released_at = Some(now());
                ops.push((
                    Keyspace::Allocations,
                    execution_id.to_string(),
                    Operation::Put(encode(&alloc)?),
                ));
            }
        }

        self.backend.apply_txn(ops).await?;
        Ok(exec)
    }

    pub async fn get_execution(&self, execution_id: &str) -> Result<Execution, StoreError> {
        self.get_execution_raw(execution_id).await
    }

    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Page<Execution>, StoreError> {
        let mut all: Vec<Execution> = self
            .backend
            .scan(Keyspace::Executions)
            .await?
            .into_iter()
            .filter_map(|(_, v)| decode::<Execution>(&v).ok())
            .filter(|e| filter.matches(e))
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = all.len();
        let items = all.into_iter().skip(offset).take(limit).collect();
        Ok(Page { items, total })
    }

    // -- Runners ------------------------------------------------------

    pub async fn register_runner(&self, mut runner: Runner) -> Result<Runner, StoreError> {
        let id = self.next_runner_id.fetch_add(1, Ordering::SeqCst);
        runner.runner_id = id;
        self.backend
            .put(Keyspace::Runners, &id.to_string(), encode(&runner)?)
            .await?;
        Ok(runner)
    }

    pub async fn get_runner(&self, runner_id: u64) -> Result<Runner, StoreError> {
        self.get_runner_raw(runner_id).await
    }

    pub async fn list_runners(&self) -> Result<Vec<Runner>, StoreError> {
        let mut runners: Vec<Runner> = self
            .backend
            .scan(Keyspace::Runners)
            .await?
            .into_iter()
            .filter_map(|(_, v)| decode::<Runner>(&v).ok())
            .collect();
        runners.sort_by_key(|r| r.runner_id);
        Ok(runners)
    }

    /// Apply a partial update via `patch`, which receives the current
    /// runner and mutates it in place.
    pub async fn update_runner(
        &self,
        runner_id: u64,
        patch: impl FnOnce(&mut Runner) + Send,
    ) -> Result<Runner, StoreError> {
        let _lock = self
            .backend
            .lock_many(vec![(Keyspace::Runners, runner_id.to_string())])
            .await;
        let mut runner = self.get_runner_raw(runner_id).await?;
        patch(&mut runner);
        self.backend
            .put(Keyspace::Runners, &runner_id.to_string(), encode(&runner)?)
            .await?;
        Ok(runner)
    }

    pub async fn update_runner_health(
        &self,
        runner_id: u64,
        health: RunnerHealth,
        sample: RunnerHealthSample,
    ) -> Result<Runner, StoreError> {
        let runner = self
            .update_runner(runner_id, |r| {
                r.health = health;
                r.last_health_check_at = Some(sample.checked_at);
            })
            .await?;

        let key = format!("{runner_id}/{}", sample.checked_at);
        self.backend
            .put(Keyspace::HealthSamples, &key, encode(&sample)?)
            .await?;
        Ok(runner)
    }

    pub async fn list_health_samples(
        &self,
        runner_id: u64,
    ) -> Result<Vec<RunnerHealthSample>, StoreError> {
        let prefix = format!("{runner_id}/");
        let mut samples: Vec<RunnerHealthSample> = self
            .backend
            .scan(Keyspace::HealthSamples)
            .await?
            .into_iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(_, v)| decode(&v).ok())
            .collect();
        samples.sort_by_key(|s| s.checked_at);
        Ok(samples)
    }

    // -- Rules ----------------------------------------------------------

    pub async fn register_rule(&self, mut rule: LoadBalancingRule) -> Result<LoadBalancingRule, StoreError> {
        let id = self.next_rule_id.fetch_add(1, Ordering::SeqCst);
        rule.rule_id = id;
        self.backend
            .put(Keyspace::Rules, &id.to_string(), encode(&rule)?)
            .await?;
        Ok(rule)
    }

    pub async fn get_rule(&self, rule_id: u64) -> Result<LoadBalancingRule, StoreError> {
        let bytes = self
            .backend
            .get(Keyspace::Rules, &rule_id.to_string())
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("rule {rule_id}")))?;
        decode(&bytes)
    }

    pub async fn list_rules(&self) -> Result<Vec<LoadBalancingRule>, StoreError> {
        let mut rules: Vec<LoadBalancingRule> = self
            .backend
            .scan(Keyspace::Rules)
            .await?
            .into_iter()
            .filter_map(|(_, v)| decode::<LoadBalancingRule>(&v).ok())
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.rule_id.cmp(&b.rule_id)));
        Ok(rules)
    }

    /// Persist the round-robin cursor advance for `rule_id`. Called by the
    /// Scheduler only after a selection from that rule is actually
    /// committed (spec §4.4, "advance cursor only when a selection is
    /// actually committed").
    pub async fn advance_round_robin_cursor(
        &self,
        rule_id: u64,
        new_cursor: u64,
    ) -> Result<(), StoreError> {
        let _lock = self
            .backend
            .lock_many(vec![(Keyspace::Rules, rule_id.to_string())])
            .await;
        let mut rule = self.get_rule(rule_id).await?;
        rule.round_robin_cursor = new_cursor;
        self.backend
            .put(Keyspace::Rules, &rule_id.to_string(), encode(&rule)?)
            .await?;
        Ok(())
    }

    pub async fn set_rule_active(&self, rule_id: u64, active: bool) -> Result<LoadBalancingRule, StoreError> {
        let _lock = self
            .backend
            .lock_many(vec![(Keyspace::Rules, rule_id.to_string())])
            .await;
        let mut rule = self.get_rule(rule_id).await?;
        rule.active = active;
        self.backend
            .put(Keyspace::Rules, &rule_id.to_string(), encode(&rule)?)
            .await?;
        Ok(rule)
    }

    /// Executions with `started_at` set but still non-terminal, for the
    /// completion-timeout sweeper to evaluate against its own deadline.
    pub async fn running_executions(&self) -> Result<Vec<Execution>, StoreError> {
        Ok(self
            .backend
            .scan(Keyspace::Executions)
            .await?
            .into_iter()
            .filter_map(|(_, v)| decode::<Execution>(&v).ok())
            .filter(|e| e.started_at.is_some() && !e.status.is_terminal())
            .collect())
    }

    /// Counts of executions in `{queued, assigned, running}`, the Scheduler's
    /// periodic `QueueDepthSampled` sample and `GET /queue/status`'s source
    /// of truth alike.
    pub async fn status_counts(&self) -> Result<QueueCounts, StoreError> {
        let mut counts = QueueCounts::default();
        for (_, v) in self.backend.scan(Keyspace::Executions).await? {
            let Ok(exec) = decode::<Execution>(&v) else { continue };
            match exec.status {
                ExecutionStatus::Queued => counts.queued += 1,
                ExecutionStatus::Assigned => counts.assigned += 1,
                ExecutionStatus::Running => counts.running += 1,
                _ => {}
            }
        }
        Ok(counts)
    }

    /// Delete every terminal execution whose `completed_at` is older than
    /// `cutoff` (epoch millis). Returns the number of rows removed.
    pub async fn prune_terminal_before(&self, cutoff: u64) -> Result<usize, StoreError> {
        let stale: Vec<String> = self
            .backend
            .scan(Keyspace::Executions)
            .await?
            .into_iter()
            .filter_map(|(_, v)| decode::<Execution>(&v).ok())
            .filter(|e| e.status.is_terminal() && e.completed_at.map(|c| c < cutoff).unwrap_or(false))
            .map(|e| e.execution_id)
            .collect();

        for id in &stale {
            self.backend.delete(Keyspace::Executions, id).await?;
            self.backend.delete(Keyspace::Allocations, id).await?;
        }
        Ok(stale.len())
    }

    /// All execution ids currently bound to a runner in `{assigned, running}`
    /// — used by [`crate::sweeper`] and the Registry resync path (spec §5).
    pub async fn inflight_execution_ids(&self, runner_id: u64) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .backend
            .scan(Keyspace::Executions)
            .await?
            .into_iter()
            .filter_map(|(_, v)| decode::<Execution>(&v).ok())
            .filter(|e| {
                e.assigned_runner_id == Some(runner_id)
                    && matches!(e.status, ExecutionStatus::Assigned | ExecutionStatus::Running)
            })
            .map(|e| e.execution_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use std::collections::{BTreeMap, HashMap, HashSet as Set};
    use teo_core::ids::new_id;

    async fn fresh_store() -> Store {
        Store::new(Arc::new(MemoryBackend::new())).await.unwrap()
    }

    fn sample_execution(suite: &str) -> Execution {
        Execution {
            execution_id: new_id("exec"),
            test_suite: suite.to_string(),
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
            total_shards: 1,
            shard_results: BTreeMap::new(),
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
            capabilities: Set::new(),
            max_concurrent_jobs: max_concurrent,
            priority: 50,
            status: RunnerStatus::Active,
            health: RunnerHealth::Unknown,
            last_health_check_at: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn enqueue_then_claim_orders_by_priority_then_fifo() {
        let store = fresh_store().await;
        let mut low = sample_execution("smoke");
        low.priority = 10;
        let low = store.enqueue(low).await.unwrap();

        let mut high = sample_execution("smoke");
        high.priority = 90;
        let high = store.enqueue(high).await.unwrap();

        let candidates = store
            .claim_candidates(10, &ExecutionFilter::default())
            .await
            .unwrap();
        assert_eq!(candidates[0].execution_id, high.execution_id);
        assert_eq!(candidates[1].execution_id, low.execution_id);
    }

    #[tokio::test]
    async fn assign_enforces_capacity_invariant() {
        let store = fresh_store().await;
        let runner = store.register_runner(sample_runner(1)).await.unwrap();

        let e1 = store.enqueue(sample_execution("smoke")).await.unwrap();
        let e2 = store.enqueue(sample_execution("smoke")).await.unwrap();

        store.assign(&e1.execution_id, runner.runner_id).await.unwrap();
        let err = store
            .assign(&e2.execution_id, runner.runner_id)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn assign_rejects_unhealthy_runner() {
        let store = fresh_store().await;
        let mut runner = sample_runner(4);
        runner.health = RunnerHealth::Unhealthy;
        let runner = store.register_runner(runner).await.unwrap();
        let exec = store.enqueue(sample_execution("smoke")).await.unwrap();

        let err = store
            .assign(&exec.execution_id, runner.runner_id)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn finalize_releases_allocation_and_is_idempotent() {
        let store = fresh_store().await;
        let runner = store.register_runner(sample_runner(2)).await.unwrap();
        let exec = store.enqueue(sample_execution("smoke")).await.unwrap();
        store.assign(&exec.execution_id, runner.runner_id).await.unwrap();
        store.mark_started(&exec.execution_id, 100).await.unwrap();

        let aggregated = AggregatedResults {
            total: 10,
            passed: 10,
            failed: 0,
            skipped: 0,
            failed_tests: vec![],
        };
        let finalized = store
            .finalize(
                &exec.execution_id,
                ExecutionStatus::Completed,
                Some(aggregated.clone()),
                None,
            )
            .await
            .unwrap();
        assert_eq!(finalized.status, ExecutionStatus::Completed);

        // Idempotent replay of the identical finalize.
        let replay = store
            .finalize(
                &exec.execution_id,
                ExecutionStatus::Completed,
                Some(aggregated),
                None,
            )
            .await
            .unwrap();
        assert_eq!(replay.status, ExecutionStatus::Completed);

        // A second, different finalize attempt is rejected.
        let err = store
            .finalize(&exec.execution_id, ExecutionStatus::Failed, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn record_shard_rejects_out_of_range_index() {
        let store = fresh_store().await;
        let mut exec = sample_execution("smoke");
        exec.total_shards = 2;
        let exec = store.enqueue(exec).await.unwrap();

        let result = ShardResult {
            status: teo_core::model::ShardStatus::Passed,
            total: 1,
            passed: 1,
            failed: 0,
            skipped: 0,
            failed_tests: vec![],
            artifact_refs: None,
        };
        let err = store
            .record_shard(&exec.execution_id, 3, result)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn cancel_is_rejected_once_terminal() {
        let store = fresh_store().await;
        let exec = store.enqueue(sample_execution("smoke")).await.unwrap();
        store
            .finalize(&exec.execution_id, ExecutionStatus::Error, None, Some("x".into()))
            .await
            .unwrap();

        let err = store.cancel(&exec.execution_id).await.unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn round_robin_cursor_persists() {
        let store = fresh_store().await;
        let rule = store
            .register_rule(LoadBalancingRule {
                rule_id: 0,
                name: "rr".to_string(),
                active: true,
                priority: 0,
                kind: teo_core::model::RuleKind::RoundRobin,
                test_suite_pattern: None,
                environment_pattern: None,
                runner_type_filter: None,
                config: Default::default(),
                round_robin_cursor: 0,
            })
            .await
            .unwrap();

        store.advance_round_robin_cursor(rule.rule_id, 3).await.unwrap();
        let reloaded = store.get_rule(rule.rule_id).await.unwrap();
        assert_eq!(reloaded.round_robin_cursor, 3);
    }
}
