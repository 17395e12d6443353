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

//! Engine-wide tunables (spec §6.7). Kept as one explicit struct rather
//! than a dynamic config map, per spec §9's "dynamic config objects with
//! free-form keys" re-architecture note.

use std::time::Duration;

/// Configuration consumed by the Scheduler, Driver Gateway, Health Prober
/// and Webhook Ingest. `teo-server` is the only crate that reads the
/// process environment; every other crate just takes an `EngineConfig`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Scheduler tick period (`SCHED_TICK_MS`).
    pub sched_tick: Duration,
    /// Health prober period (`HEALTH_TICK_MS`).
    pub health_tick: Duration,
    /// Health probe request timeout (`HEALTH_PROBE_TIMEOUT_MS`).
    pub health_probe_timeout: Duration,
    /// Execution completion timeout (`EXEC_MAX_MS`).
    pub exec_max: Duration,
    /// Terminal-execution retention window (`EXEC_RETENTION_SECS`).
    pub exec_retention: Duration,
    /// Driver start retry budget (`DRIVER_START_RETRIES`).
    pub driver_start_retries: u32,
    /// Driver start backoff base (`DRIVER_START_BACKOFF_MS`).
    pub driver_start_backoff: Duration,
    /// Client completion-webhook retry budget (`CLIENT_WEBHOOK_RETRIES`).
    pub client_webhook_retries: u32,
    /// Scheduler claim batch size, `K` in spec §4.5 (`SCHED_BATCH`).
    pub sched_batch: usize,
    /// Per-tick assign retry cap, `N_assign` in spec §4.5 (`SCHED_ASSIGN_RETRIES`).
    pub sched_assign_retries: u32,
    /// Per-subscriber event buffer limit (`EVENT_BUS_QUEUE_LIMIT`).
    pub event_bus_queue_limit: usize,
    /// Debounce window collapsing bursts of edge-triggered ticks (spec §4.5).
    pub sched_debounce: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sched_tick: Duration::from_millis(5_000),
            health_tick: Duration::from_millis(30_000),
            health_probe_timeout: Duration::from_millis(5_000),
            exec_max: Duration::from_millis(1_800_000),
            exec_retention: Duration::from_secs(604_800),
            driver_start_retries: 5,
            driver_start_backoff: Duration::from_millis(200),
            client_webhook_retries: 3,
            sched_batch: 64,
            sched_assign_retries: 3,
            event_bus_queue_limit: 1024,
            sched_debounce: Duration::from_millis(50),
        }
    }
}
