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

//! Health Prober (component C9): a periodic round over every active
//! runner with a `health_check_url`, fanning probes out concurrently.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use teo_core::ids::timestamp_millis;
use teo_core::model::{RunnerHealth, RunnerHealthSample, RunnerStatus};
use teo_registry::RunnerRegistry;
use tracing::{info, warn};

use crate::event_loop::{EventBus, SchedulerSignal};

pub struct HealthProber {
    registry: Arc<RunnerRegistry>,
    events: EventBus,
    client: reqwest::Client,
    period: Duration,
}

impl HealthProber {
    pub fn new(registry: Arc<RunnerRegistry>, events: EventBus, probe_timeout: Duration, period: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(probe_timeout)
            .build()
            .expect("reqwest client config is static and valid");
        Self {
            registry,
            events,
            client,
            period,
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.period);
        loop {
            interval.tick().await;
            self.round().await;
        }
    }

    async fn round(&self) {
        let runners: Vec<_> = self
            .registry
            .list()
            .into_iter()
            .filter(|r| r.status == RunnerStatus::Active)
            .collect();

        let probes = runners.into_iter().map(|runner| async move {
            let checked_at = timestamp_millis() as u64;
            let Some(url) = runner.health_check_url.clone() else {
                return;
            };

            let started = std::time::Instant::now();
            let (health, error) = match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => (RunnerHealth::Healthy, None),
                Ok(resp) => (RunnerHealth::Unhealthy, Some(format!("status {}", resp.status()))),
                Err(e) => (RunnerHealth::Unhealthy, Some(e.to_string())),
            };
            let latency_ms = Some(started.elapsed().as_millis() as u64);

            let sample = RunnerHealthSample {
                runner_id: runner.runner_id,
                checked_at,
                health,
                latency_ms,
                error,
            };

            match self.registry.set_health(runner.runner_id, health, sample).await {
                Ok(flipped) if flipped => {
                    info!(runner_id = runner.runner_id, ?health, "runner health changed");
                    self.events.publish(teo_core::events::DomainEvent::RunnerHealthChanged {
                        runner_id: runner.runner_id,
                        health,
                        at: checked_at,
                    });
                    if health == RunnerHealth::Healthy {
                        self.events.signal(SchedulerSignal::RunnerBecameHealthy);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(runner_id = runner.runner_id, ?e, "failed to record health sample"),
            }
        });

        join_all(probes).await;
    }
}
