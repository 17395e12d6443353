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

//! Driver Gateway (component C7): routes an assigned execution to the
//! adapter matching its runner's type, retrying transient failures with
//! exponential backoff before giving up and finalizing the execution as
//! `error`. Stateless across executions — every call is independent.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use teo_core::error::DriverError;
use teo_core::model::Execution;
use teo_registry::RunnerRegistry;
use teo_store::Store;
use tracing::{error, info, warn};

use crate::driver::{DriverRegistry, ExecutionCtx};
use crate::event_loop::EventBus;
use crate::notify::ClientNotifier;

pub struct DriverGateway {
    store: Store,
    registry: Arc<RunnerRegistry>,
    drivers: Arc<DriverRegistry>,
    events: EventBus,
    notifier: Arc<dyn ClientNotifier>,
    start_retries: u32,
    start_backoff_base: Duration,
}

impl DriverGateway {
    pub fn new(
        store: Store,
        registry: Arc<RunnerRegistry>,
        drivers: Arc<DriverRegistry>,
        events: EventBus,
        notifier: Arc<dyn ClientNotifier>,
        start_retries: u32,
        start_backoff_base: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            drivers,
            events,
            notifier,
            start_retries,
            start_backoff_base,
        }
    }

    /// Dispatch `exec` (already `assigned` in the Store) to its runner's
    /// adapter. Runs to completion on its own spawned task — the Scheduler
    /// never awaits this.
    pub async fn dispatch(&self, exec: Execution) {
        let Some(runner_id) = exec.assigned_runner_id else {
            error!(execution_id = %exec.execution_id, "dispatch called on an unassigned execution");
            return;
        };
        let Some(runner) = self.registry.get(runner_id) else {
            warn!(execution_id = %exec.execution_id, runner_id, "assigned runner vanished from registry");
            self.finalize_failed(&exec.execution_id, "runner_not_found").await;
            return;
        };
        let Some(driver) = self.drivers.get(&runner.runner_type) else {
            error!(runner_type = %runner.runner_type, "no driver registered for runner type");
            self.finalize_failed(&exec.execution_id, "no_driver_for_runner_type").await;
            return;
        };

        let ctx = ExecutionCtx {
            execution_id: exec.execution_id.clone(),
            runner_endpoint: runner.endpoint_url.clone(),
            webhook_url: runner.webhook_url.clone(),
            shard_count: exec.total_shards,
            test_suite: exec.test_suite.clone(),
            environment: exec.environment.clone(),
            branch: exec.branch.clone(),
            commit: exec.commit.clone(),
            metadata: exec.metadata.clone(),
        };

        let mut attempt = 0u32;
        loop {
            match driver.start(&ctx).await {
                Ok(_started) => {
                    info!(execution_id = %exec.execution_id, runner_id, attempt, "driver accepted start request");
                    return;
                }
                Err(e) if e.is_retryable() && attempt < self.start_retries => {
                    attempt += 1;
                    let backoff = jittered_backoff(self.start_backoff_base, attempt);
                    warn!(execution_id = %exec.execution_id, attempt, ?e, "driver start failed, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    error!(execution_id = %exec.execution_id, ?e, "driver start failed permanently");
                    self.finalize_failed(&exec.execution_id, &classify(&e)).await;
                    return;
                }
            }
        }
    }

    async fn finalize_failed(&self, execution_id: &str, reason: &str) {
        let runner_id = match self.store.get_execution(execution_id).await {
            Ok(e) => e.assigned_runner_id,
            Err(e) => {
                error!(execution_id, ?e, "failed to reload execution before finalizing driver failure");
                None
            }
        };

        match self
            .store
            .finalize(
                execution_id,
                teo_core::model::ExecutionStatus::Error,
                None,
                Some(reason.to_string()),
            )
            .await
        {
            Ok(exec) => {
                if let Some(runner_id) = runner_id {
                    self.registry.mark_released(runner_id);
                }
                self.events.publish(teo_core::events::DomainEvent::ExecutionCompleted {
                    execution_id: exec.execution_id.clone(),
                    status: exec.status,
                    aggregated: exec.aggregated_results.clone(),
                    reason: exec.terminal_reason.clone(),
                    at: exec.completed_at.unwrap_or_default(),
                });
                self.events.signal(crate::event_loop::SchedulerSignal::ExecutionCompleted);
                self.notifier.notify(exec);
            }
            Err(e) => {
                // Already terminal (e.g. client cancelled it meanwhile) — not an error.
                warn!(execution_id, ?e, "could not finalize after driver failure, execution already terminal");
            }
        }
    }
}

/// Exponential backoff with full jitter: draws uniformly from `[0, cap]`
/// rather than sleeping the full computed delay every time, so a batch of
/// executions that all started retrying in the same tick don't retry in
/// lockstep and hammer the runner again together.
fn jittered_backoff(base: Duration, attempt: u32) -> Duration {
    let cap = base * 2u32.pow(attempt.min(10));
    let millis = rand::thread_rng().gen_range(0..=cap.as_millis().max(1) as u64);
    Duration::from_millis(millis)
}

fn classify(e: &DriverError) -> String {
    match e {
        DriverError::BadRequest(_) => "driver_bad_request".to_string(),
        DriverError::Unauthorized(_) => "driver_unauthorized".to_string(),
        DriverError::Unavailable(_) => "driver_unavailable".to_string(),
        DriverError::Transient(_) => "driver_transient".to_string(),
    }
}
