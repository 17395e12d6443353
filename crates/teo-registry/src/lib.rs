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

//! The Runner Registry (component C4, spec §4.3): the authoritative
//! in-memory view of runners with cached per-runner load counters that
//! mirror the Store. The Store remains the source of truth; the Registry
//! is a fast, resyncable cache the Scheduler consults on every tick
//! without paying a Store round-trip per candidate.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use teo_core::error::StoreError;
use teo_core::model::{Execution, Runner, RunnerHealth, RunnerStatus};
use teo_store::Store;
use tracing::warn;

/// Cached view of a single runner: its last-known metadata plus an
/// in-process inflight counter.
struct CachedRunner {
    runner: Runner,
    inflight: AtomicU32,
}

/// In-memory registry of runners, backed by `teo_store::Store`.
pub struct RunnerRegistry {
    store: Store,
    runners: DashMap<u64, CachedRunner>,
}

impl RunnerRegistry {
    /// Construct a registry and rebuild its counters from the Store (spec
    /// §4.3, "On boot, Registry rebuilds its counters from the Store").
    pub async fn bootstrap(store: Store) -> Result<Arc<Self>, StoreError> {
        let registry = Arc::new(Self {
            store,
            runners: DashMap::new(),
        });
        registry.resync().await?;
        Ok(registry)
    }

    /// Rebuild every cached runner and inflight counter from the Store.
    /// Called on boot and after any Store error observed by this registry
    /// (spec §5).
    pub async fn resync(&self) -> Result<(), StoreError> {
        self.runners.clear();
        for runner in self.store.list_runners().await? {
            let inflight = self.store.inflight_execution_ids(runner.runner_id).await?.len() as u32;
            self.runners.insert(
                runner.runner_id,
                CachedRunner {
                    runner,
                    inflight: AtomicU32::new(inflight),
                },
            );
        }
        Ok(())
    }

    /// Resync after a Store call fails, so a transient error never leaves
    /// the cache silently stale. Logs and returns the original error either
    /// way.
    async fn resync_on_error(&self, err: StoreError) -> StoreError {
        warn!(?err, "store error observed by registry, resyncing cache");
        if let Err(resync_err) = self.resync().await {
            warn!(?resync_err, "registry resync after store error also failed");
        }
        err
    }

    /// Register a new runner with the Store and cache it.
    pub async fn register(&self, spec: Runner) -> Result<u64, StoreError> {
        let runner = match self.store.register_runner(spec).await {
            Ok(runner) => runner,
            Err(e) => return Err(self.resync_on_error(e).await),
        };
        let id = runner.runner_id;
        self.runners.insert(
            id,
            CachedRunner {
                runner,
                inflight: AtomicU32::new(0),
            },
        );
        Ok(id)
    }

    /// Apply a partial update to a runner via the Store, refreshing the cache.
    pub async fn update(
        &self,
        runner_id: u64,
        patch: impl FnOnce(&mut Runner) + Send,
    ) -> Result<Runner, StoreError> {
        let runner = match self.store.update_runner(runner_id, patch).await {
            Ok(runner) => runner,
            Err(e) => return Err(self.resync_on_error(e).await),
        };
        if let Some(mut cached) = self.runners.get_mut(&runner_id) {
            cached.runner = runner.clone();
        }
        Ok(runner)
    }

    pub async fn set_status(&self, runner_id: u64, status: RunnerStatus) -> Result<Runner, StoreError> {
        self.update(runner_id, |r| r.status = status).await
    }

    /// Record a health observation: updates the Store (which appends a
    /// sample) and the cache. Returns `true` if health flipped.
    pub async fn set_health(
        &self,
        runner_id: u64,
        health: RunnerHealth,
        sample: teo_core::model::RunnerHealthSample,
    ) -> Result<bool, StoreError> {
        let previous = self
            .runners
            .get(&runner_id)
            .map(|c| c.runner.health)
            .unwrap_or(RunnerHealth::Unknown);
        let runner = match self.store.update_runner_health(runner_id, health, sample).await {
            Ok(runner) => runner,
            Err(e) => return Err(self.resync_on_error(e).await),
        };
        if let Some(mut cached) = self.runners.get_mut(&runner_id) {
            cached.runner = runner;
        }
        Ok(previous != health)
    }

    /// Snapshot of every cached runner.
    pub fn list(&self) -> Vec<Runner> {
        let mut runners: Vec<Runner> = self.runners.iter().map(|e| e.runner.clone()).collect();
        runners.sort_by_key(|r| r.runner_id);
        runners
    }

    pub fn get(&self, runner_id: u64) -> Option<Runner> {
        self.runners.get(&runner_id).map(|c| c.runner.clone())
    }

    pub fn inflight(&self, runner_id: u64) -> u32 {
        self.runners
            .get(&runner_id)
            .map(|c| c.inflight.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Increment the cached inflight counter after a Store `assign` commits.
    pub fn mark_assigned(&self, runner_id: u64) {
        if let Some(cached) = self.runners.get(&runner_id) {
            cached.inflight.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Decrement the cached inflight counter after an execution bound to
    /// `runner_id` reaches a terminal state and its allocation is released.
    pub fn mark_released(&self, runner_id: u64) {
        if let Some(cached) = self.runners.get(&runner_id) {
            cached
                .inflight
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                    Some(v.saturating_sub(1))
                })
                .ok();
        }
    }

    /// Candidate runners for `item`, satisfying spec §4.3: active,
    /// healthy-or-unknown, under capacity, and matching any requested type
    /// or id filter on the execution. Ordering is left to the Rule Engine.
    pub fn candidates_for(&self, item: &Execution) -> Vec<Runner> {
        self.runners
            .iter()
            .filter(|entry| entry.runner.status == RunnerStatus::Active)
            .filter(|entry| {
                matches!(entry.runner.health, RunnerHealth::Healthy | RunnerHealth::Unknown)
            })
            .filter(|entry| entry.inflight.load(Ordering::SeqCst) < entry.runner.max_concurrent_jobs)
            .filter(|entry| {
                item.requested_runner_type
                    .as_deref()
                    .map(|t| t == entry.runner.runner_type)
                    .unwrap_or(true)
            })
            .filter(|entry| {
                item.requested_runner_id
                    .map(|id| id == entry.runner.runner_id)
                    .unwrap_or(true)
            })
            .map(|entry| entry.runner.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc as StdArc;
    use teo_core::model::ExecutionStatus;
    use teo_store::MemoryBackend;

    fn sample_runner(runner_type: &str, max: u32) -> Runner {
        Runner {
            runner_id: 0,
            name: "r".to_string(),
            runner_type: runner_type.to_string(),
            endpoint_url: "http://x".to_string(),
            health_check_url: None,
            webhook_url: "http://x/webhook".to_string(),
            capabilities: HashSet::new(),
            max_concurrent_jobs: max,
            priority: 0,
            status: RunnerStatus::Active,
            health: RunnerHealth::Healthy,
            last_health_check_at: None,
            metadata: HashMap::new(),
        }
    }

    fn sample_execution() -> Execution {
        Execution {
            execution_id: "exec_1".into(),
            test_suite: "smoke".into(),
            environment: "staging".into(),
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

    #[tokio::test]
    async fn candidates_excludes_full_and_unhealthy_runners() {
        let store = Store::new(StdArc::new(MemoryBackend::new())).await.unwrap();
        let registry = RunnerRegistry::bootstrap(store).await.unwrap();

        let healthy = registry.register(sample_runner("docker", 1)).await.unwrap();
        let mut unhealthy_spec = sample_runner("docker", 1);
        unhealthy_spec.health = RunnerHealth::Unhealthy;
        let _unhealthy = registry.register(unhealthy_spec).await.unwrap();

        registry.mark_assigned(healthy);
        let candidates = registry.candidates_for(&sample_execution());
        assert!(candidates.is_empty(), "full and unhealthy runners excluded");

        registry.mark_released(healthy);
        let candidates = registry.candidates_for(&sample_execution());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].runner_id, healthy);
    }

    #[tokio::test]
    async fn candidates_respect_requested_runner_type() {
        let store = Store::new(StdArc::new(MemoryBackend::new())).await.unwrap();
        let registry = RunnerRegistry::bootstrap(store).await.unwrap();
        registry.register(sample_runner("docker", 4)).await.unwrap();
        registry.register(sample_runner("jenkins", 4)).await.unwrap();

        let mut item = sample_execution();
        item.requested_runner_type = Some("jenkins".to_string());
        let candidates = registry.candidates_for(&item);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].runner_type, "jenkins");
    }
}
