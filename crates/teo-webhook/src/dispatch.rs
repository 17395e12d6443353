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

//! Outbound completion webhook delivery to a client's `webhook_url`, with
//! bounded retries on top of `reqwest`. Delivery is at-least-once and
//! fire-and-forget from every caller's point of view — a client is expected
//! to dedupe on `execution_id`.
//!
//! [`ClientWebhookDispatcher`] also implements `teo_scheduler::ClientNotifier`
//! so the Driver Gateway and completion sweeper can reach it without
//! `teo-scheduler` depending on this crate (spec §6.3: every path an
//! execution goes terminal fires the client webhook, not just the webhook
//! ingest path).

use std::sync::Arc;

use rand::Rng;
use serde::Serialize;
use teo_core::config::EngineConfig;
use teo_core::model::{AggregatedResults, Execution, ExecutionStatus, FailedTest};
use tracing::{info, warn};

use crate::metrics::WebhookMetrics;

#[derive(Serialize)]
struct ClientWebhookBody<'a> {
    execution_id: &'a str,
    status: ExecutionStatus,
    results: Option<&'a AggregatedResults>,
    failed_tests: Vec<&'a FailedTest>,
    started_at: Option<u64>,
    completed_at: Option<u64>,
    metadata: &'a std::collections::HashMap<String, serde_json::Value>,
}

#[derive(Clone)]
pub struct ClientWebhookDispatcher {
    config: EngineConfig,
    metrics: Arc<WebhookMetrics>,
    client: reqwest::Client,
}

impl ClientWebhookDispatcher {
    pub fn new(config: EngineConfig, metrics: Arc<WebhookMetrics>, client: reqwest::Client) -> Self {
        Self { config, metrics, client }
    }

    /// Spawn a detached task delivering the completion webhook, if `exec`
    /// has a `webhook_url`. No-op otherwise.
    pub fn spawn(&self, exec: Execution) {
        let Some(url) = exec.webhook_url.clone() else {
            return;
        };
        let this = self.clone();
        tokio::spawn(async move {
            this.deliver(&url, &exec).await;
        });
    }

    async fn deliver(&self, url: &str, exec: &Execution) {
        let body = ClientWebhookBody {
            execution_id: &exec.execution_id,
            status: exec.status,
            results: exec.aggregated_results.as_ref(),
            failed_tests: exec
                .aggregated_results
                .as_ref()
                .map(|r| r.failed_tests.iter().collect())
                .unwrap_or_default(),
            started_at: exec.started_at,
            completed_at: exec.completed_at,
            metadata: &exec.metadata,
        };

        let retries = self.config.client_webhook_retries;
        let mut attempt = 0u32;
        loop {
            match self.client.post(url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    self.metrics.client_webhook_deliveries.inc();
                    info!(execution_id = %exec.execution_id, url, "client webhook delivered");
                    return;
                }
                Ok(resp) => {
                    warn!(execution_id = %exec.execution_id, status = %resp.status(), attempt, "client webhook rejected");
                }
                Err(e) => {
                    warn!(execution_id = %exec.execution_id, ?e, attempt, "client webhook request failed");
                }
            }

            if attempt >= retries {
                self.metrics.client_webhook_failures.inc();
                warn!(execution_id = %exec.execution_id, url, "client webhook exhausted retry budget");
                return;
            }
            attempt += 1;
            let cap = std::time::Duration::from_millis(200) * 2u32.pow(attempt.min(10));
            let millis = rand::thread_rng().gen_range(0..=cap.as_millis().max(1) as u64);
            tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
        }
    }
}

impl teo_scheduler::ClientNotifier for ClientWebhookDispatcher {
    fn notify(&self, exec: Execution) {
        self.spawn(exec);
    }
}
