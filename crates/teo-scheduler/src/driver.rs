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

//! The `RunnerDriver` capability (component C7's adapter seam): a single
//! `start` operation each concrete CI/CD adapter implements. The core
//! crates never depend on a concrete adapter, only on this trait.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use teo_core::error::DriverError;

/// Everything an adapter needs to ask a runner to start one execution.
#[derive(Debug, Clone)]
pub struct ExecutionCtx {
    pub execution_id: String,
    pub runner_endpoint: String,
    pub webhook_url: String,
    pub shard_count: u32,
    pub test_suite: String,
    pub environment: String,
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// The external runner accepted the request. This does not mean tests
/// have started running — that's signalled later by a `running` webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverStarted;

/// A single capability every CI/CD adapter implements (spec §6.4). The
/// concrete GitHub Actions/Azure DevOps/Jenkins/GitLab/Docker adapters
/// live outside this crate's dependency surface entirely; only the trait
/// and two reference adapters for development/testing live here.
#[async_trait]
pub trait RunnerDriver: Send + Sync {
    /// Adapter kind, matched against `runner.runner_type`.
    fn kind(&self) -> &str;

    async fn start(&self, ctx: &ExecutionCtx) -> Result<DriverStarted, DriverError>;

    /// Best-effort request to stop a running execution. Never awaited by
    /// the Scheduler's hot path; failures are logged, not propagated.
    async fn cancel(&self, _execution_id: &str, _runner_endpoint: &str) {}
}

/// Dispatches to the adapter registered for a runner's `runner_type`.
/// Unknown types are treated as a permanent adapter failure.
pub struct DriverRegistry {
    drivers: HashMap<String, Box<dyn RunnerDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    pub fn register(mut self, driver: Box<dyn RunnerDriver>) -> Self {
        self.drivers.insert(driver.kind().to_string(), driver);
        self
    }

    pub fn get(&self, runner_type: &str) -> Option<&dyn RunnerDriver> {
        self.drivers.get(runner_type).map(|b| b.as_ref())
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Always accepts immediately. Used by tests and local demos in place of
/// any "simulate completion" shim — it never fabricates a completion, it
/// only ever reports that the (fictitious) runner accepted the start
/// request; a test then drives webhooks itself.
pub struct NullRunnerDriver {
    kind: String,
}

impl NullRunnerDriver {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }
}

#[async_trait]
impl RunnerDriver for NullRunnerDriver {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn start(&self, _ctx: &ExecutionCtx) -> Result<DriverStarted, DriverError> {
        Ok(DriverStarted)
    }
}

/// POSTs a JSON start payload to the runner's `endpoint_url`, classifying
/// the HTTP outcome into the `{BadRequest, Unauthorized, Unavailable,
/// Transient}` taxonomy from spec §6.4.
pub struct HttpRunnerDriver {
    kind: String,
    client: reqwest::Client,
}

impl HttpRunnerDriver {
    pub fn new(kind: impl Into<String>, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("reqwest client config is static and valid");
        Self {
            kind: kind.into(),
            client,
        }
    }
}

#[derive(serde::Serialize)]
struct StartPayload<'a> {
    execution_id: &'a str,
    webhook_url: &'a str,
    shard_count: u32,
    suite: &'a str,
    environment: &'a str,
    branch: &'a Option<String>,
    commit: &'a Option<String>,
    metadata: &'a HashMap<String, serde_json::Value>,
}

#[async_trait]
impl RunnerDriver for HttpRunnerDriver {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn start(&self, ctx: &ExecutionCtx) -> Result<DriverStarted, DriverError> {
        let payload = StartPayload {
            execution_id: &ctx.execution_id,
            webhook_url: &ctx.webhook_url,
            shard_count: ctx.shard_count,
            suite: &ctx.test_suite,
            environment: &ctx.environment,
            branch: &ctx.branch,
            commit: &ctx.commit,
            metadata: &ctx.metadata,
        };

        let response = self
            .client
            .post(&ctx.runner_endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    DriverError::Unavailable(e.to_string())
                } else {
                    DriverError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(DriverStarted)
        } else if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            Err(DriverError::Unauthorized(format!("runner returned {status}")))
        } else if status.is_client_error() {
            Err(DriverError::BadRequest(format!("runner returned {status}")))
        } else if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            Err(DriverError::Unavailable(format!("runner returned {status}")))
        } else {
            Err(DriverError::Transient(format!("runner returned {status}")))
        }
    }

    async fn cancel(&self, execution_id: &str, runner_endpoint: &str) {
        let url = format!("{runner_endpoint}/cancel/{execution_id}");
        if let Err(e) = self.client.post(&url).send().await {
            tracing::warn!(execution_id, %e, "best-effort cancel request failed");
        }
    }
}
