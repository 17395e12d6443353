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

//! Two periodic background tasks that don't fit the main tick loop:
//! the completion-timeout sweeper (finalizes executions stuck past
//! `T_exec_max`) and the retention pruner (drops terminal rows past
//! `EXEC_RETENTION_SECS`).

use std::sync::Arc;
use std::time::Duration;

use teo_core::events::DomainEvent;
use teo_core::ids::timestamp_millis;
use teo_core::model::ExecutionStatus;
use teo_registry::RunnerRegistry;
use teo_store::Store;
use tracing::{info, warn};

use crate::event_loop::EventBus;
use crate::notify::ClientNotifier;

pub struct CompletionSweeper {
    store: Store,
    registry: Arc<RunnerRegistry>,
    events: EventBus,
    notifier: Arc<dyn ClientNotifier>,
    exec_max: Duration,
    period: Duration,
}

impl CompletionSweeper {
    pub fn new(
        store: Store,
        registry: Arc<RunnerRegistry>,
        events: EventBus,
        notifier: Arc<dyn ClientNotifier>,
        exec_max: Duration,
        period: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            notifier,
            exec_max,
            period,
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.period);
        loop {
            interval.tick().await;
            self.sweep().await;
        }
    }

    async fn sweep(&self) {
        let running = match self.store.running_executions().await {
            Ok(r) => r,
            Err(e) => {
                warn!(?e, "completion sweeper failed to list running executions");
                return;
            }
        };

        let now = timestamp_millis() as u64;
        let deadline_ms = self.exec_max.as_millis() as u64;

        for exec in running {
            let Some(started_at) = exec.started_at else { continue };
            if now.saturating_sub(started_at) < deadline_ms {
                continue;
            }

            match self
                .store
                .finalize(
                    &exec.execution_id,
                    ExecutionStatus::Error,
                    None,
                    Some("timeout".to_string()),
                )
                .await
            {
                Ok(finalized) => {
                    info!(execution_id = %finalized.execution_id, "execution timed out, finalized as error");
                    if let Some(runner_id) = finalized.assigned_runner_id {
                        self.registry.mark_released(runner_id);
                    }
                    self.events.publish(DomainEvent::ExecutionCompleted {
                        execution_id: finalized.execution_id.clone(),
                        status: finalized.status,
                        aggregated: finalized.aggregated_results.clone(),
                        reason: finalized.terminal_reason.clone(),
                        at: finalized.completed_at.unwrap_or(now),
                    });
                    self.notifier.notify(finalized);
                }
                Err(e) => {
                    warn!(execution_id = %exec.execution_id, ?e, "failed to finalize timed-out execution");
                }
            }
        }
    }
}

pub struct RetentionPruner {
    store: Store,
    retention: Duration,
    period: Duration,
}

impl RetentionPruner {
    pub fn new(store: Store, retention: Duration, period: Duration) -> Self {
        Self {
            store,
            retention,
            period,
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.period);
        loop {
            interval.tick().await;
            let cutoff = (timestamp_millis() as u64).saturating_sub(self.retention.as_millis() as u64);
            match self.store.prune_terminal_before(cutoff).await {
                Ok(0) => {}
                Ok(n) => info!(pruned = n, "retention pruner removed expired executions"),
                Err(e) => warn!(?e, "retention pruner failed"),
            }
        }
    }
}
