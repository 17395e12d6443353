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

//! The Scheduler (component C6): one logical loop, periodic plus
//! edge-triggered, that drains queued executions onto candidate runners.

use std::sync::Arc;

use teo_core::config::EngineConfig;
use teo_core::error::StoreError;
use teo_core::events::DomainEvent;
use teo_core::ids::timestamp_millis;
use teo_registry::RunnerRegistry;
use teo_rules::{select, RunnerCandidate, Selection};
use teo_store::{ExecutionFilter, Store};
use tracing::{debug, info, instrument, warn};

use crate::event_loop::{EventBus, SchedulerSignal, TickReceiver};
use crate::gateway::DriverGateway;
use crate::metrics::SchedulerMetrics;

pub struct Scheduler {
    store: Store,
    registry: Arc<RunnerRegistry>,
    gateway: Arc<DriverGateway>,
    events: EventBus,
    config: EngineConfig,
    metrics: Arc<SchedulerMetrics>,
}

impl Scheduler {
    pub fn new(
        store: Store,
        registry: Arc<RunnerRegistry>,
        gateway: Arc<DriverGateway>,
        events: EventBus,
        config: EngineConfig,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            store,
            registry,
            gateway,
            events,
            config,
            metrics,
        }
    }

    /// Run the tick loop until the process shuts down. Combines a fixed
    /// period with edge-triggered extra ticks, debounced so a burst of
    /// signals collapses into one extra tick (spec §4.5).
    pub async fn run(self: Arc<Self>, mut ticks: TickReceiver) {
        let mut interval = tokio::time::interval(self.config.sched_tick);
        let debounce = self.config.sched_debounce;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                Some(_signal) = ticks.0.recv() => {
                    tokio::time::sleep(debounce).await;
                    while ticks.0.try_recv().is_ok() {}
                    self.tick().await;
                }
            }
        }
    }

    /// One scheduling pass: claim up to `sched_batch` queued executions and
    /// attempt to assign each to a candidate runner.
    #[instrument(skip(self))]
    pub async fn tick(&self) {
        let started = std::time::Instant::now();
        self.metrics.active_runners.set(
            self.registry
                .list()
                .iter()
                .filter(|r| r.status == teo_core::model::RunnerStatus::Active)
                .count() as f64,
        );
        self.sample_queue_depth().await;

        let items = match self
            .store
            .claim_candidates(self.config.sched_batch, &ExecutionFilter::default())
            .await
        {
            Ok(items) => items,
            Err(e) => {
                warn!(?e, "failed to claim scheduling candidates this tick");
                return;
            }
        };
        if items.is_empty() {
            self.metrics.tick_duration_seconds.observe(started.elapsed().as_secs_f64());
            return;
        }
        debug!(count = items.len(), "scheduling tick claimed candidates");

        let mut rules = match self.store.list_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(?e, "failed to load rules this tick, proceeding with none active");
                Vec::new()
            }
        };

        for item in items {
            self.try_assign(&item, &mut rules).await;
        }
        self.metrics.tick_duration_seconds.observe(started.elapsed().as_secs_f64());
    }

    /// Publish a `QueueDepthSampled` event with the Store's authoritative
    /// counts (spec §4.2) and refresh the `queue_depth` gauge from the same
    /// sample, rather than the batch-truncated count of what this tick
    /// actually claimed.
    async fn sample_queue_depth(&self) {
        match self.store.status_counts().await {
            Ok(counts) => {
                self.metrics.queue_depth.set(counts.queued as f64);
                self.events.publish(DomainEvent::QueueDepthSampled {
                    queued: counts.queued,
                    assigned: counts.assigned,
                    running: counts.running,
                    at: timestamp_millis() as u64,
                });
            }
            Err(e) => warn!(?e, "failed to sample queue depth this tick"),
        }
    }

    /// `rules` is mutated in place so a round-robin cursor advance from
    /// assigning one item in this tick is visible to the next item's
    /// selection, even though the persisted value is only written once the
    /// Store confirms the assignment.
    async fn try_assign(&self, item: &teo_core::model::Execution, rules: &mut [teo_core::model::LoadBalancingRule]) {
        let mut attempts = 0u32;
        loop {
            let candidate_runners = self.registry.candidates_for(item);
            if candidate_runners.is_empty() {
                debug!(execution_id = %item.execution_id, "no candidate runners, leaving queued");
                return;
            }

            let candidates: Vec<RunnerCandidate> = candidate_runners
                .into_iter()
                .map(|runner| {
                    let inflight = self.registry.inflight(runner.runner_id);
                    RunnerCandidate {
                        load_score: inflight as f64,
                        runner,
                        inflight,
                    }
                })
                .collect();

            let selection = select(item, &candidates, rules);
            let runner_id = match selection {
                Selection::NoSuitable => {
                    debug!(execution_id = %item.execution_id, "rule engine found no suitable runner");
                    return;
                }
                Selection::Assign { runner_id, .. } => runner_id,
            };

            match self.store.assign(&item.execution_id, runner_id).await {
                Ok(assigned) => {
                    self.registry.mark_assigned(runner_id);
                    self.metrics.assignments_total.inc();
                    if let Selection::Assign {
                        round_robin_advance: Some((rule_id, new_cursor)),
                        ..
                    } = selection
                    {
                        if let Some(rule) = rules.iter_mut().find(|r| r.rule_id == rule_id) {
                            rule.round_robin_cursor = new_cursor;
                        }
                        if let Err(e) = self.store.advance_round_robin_cursor(rule_id, new_cursor).await {
                            warn!(?e, rule_id, "failed to persist round-robin cursor advance");
                        }
                    }
                    self.events.publish(DomainEvent::ExecutionAssigned {
                        execution_id: assigned.execution_id.clone(),
                        runner_id,
                        at: assigned.assigned_at.unwrap_or_default(),
                    });
                    info!(execution_id = %assigned.execution_id, runner_id, "execution assigned");
                    let gateway = Arc::clone(&self.gateway);
                    tokio::spawn(async move { gateway.dispatch(assigned).await });
                    return;
                }
                Err(StoreError::PreconditionFailed(reason)) => {
                    attempts += 1;
                    if attempts >= self.config.sched_assign_retries {
                        debug!(execution_id = %item.execution_id, reason, attempts, "giving up assignment this tick");
                        return;
                    }
                    debug!(execution_id = %item.execution_id, reason, attempts, "assign raced, retrying");
                }
                Err(e) => {
                    warn!(execution_id = %item.execution_id, ?e, "assign failed with a non-retryable store error");
                    return;
                }
            }
        }
    }
}

/// Wire an `ExecutionQueued`/`ExecutionCompleted`/`RunnerHealthChanged`
/// event into an edge-triggered scheduler signal, per spec §4.5's
/// "additional triggers" list.
pub fn signal_for_event(event: &DomainEvent) -> Option<SchedulerSignal> {
    match event {
        DomainEvent::ExecutionQueued { .. } => Some(SchedulerSignal::ExecutionQueued),
        DomainEvent::ExecutionCompleted { .. } => Some(SchedulerSignal::ExecutionCompleted),
        DomainEvent::RunnerHealthChanged { health, .. }
            if *health == teo_core::model::RunnerHealth::Healthy =>
        {
            Some(SchedulerSignal::RunnerBecameHealthy)
        }
        _ => None,
    }
}
