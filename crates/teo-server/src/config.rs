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

//! Process-wide settings: the one explicit struct enumerating every key in
//! the environment table, rather than a dynamic config object with
//! free-form keys. `teo-server` is the only crate that reads the process
//! environment; every other crate just takes an already-built
//! [`EngineConfig`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use teo_core::config::EngineConfig;
use tracing::warn;

const KNOWN_KEYS: &[&str] = &[
    "TEO_BIND_ADDR",
    "TEO_ADMIN_BIND_ADDR",
    "TEO_DATA_DIR",
    "SCHED_TICK_MS",
    "HEALTH_TICK_MS",
    "HEALTH_PROBE_TIMEOUT_MS",
    "EXEC_MAX_MS",
    "EXEC_RETENTION_SECS",
    "DRIVER_START_RETRIES",
    "DRIVER_START_BACKOFF_MS",
    "CLIENT_WEBHOOK_RETRIES",
    "SCHED_BATCH",
    "SCHED_ASSIGN_RETRIES",
    "EVENT_BUS_QUEUE_LIMIT",
    "RUST_LOG",
];

/// Everything the process needs to boot: the two listener addresses, the
/// optional durable store path, and the `EngineConfig` consumed by every
/// other crate.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    pub admin_bind_addr: SocketAddr,
    pub data_dir: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl Settings {
    /// Builds settings from CLI overrides (already resolved against their
    /// own `env = "..."` attributes by `clap`) layered over the remaining
    /// `EngineConfig` tunables read directly from the environment, then
    /// validates the result once at startup.
    pub fn resolve(bind_addr: SocketAddr, admin_bind_addr: SocketAddr, data_dir: Option<PathBuf>) -> Result<Self> {
        warn_on_unknown_teo_keys();
        let engine = engine_config_from_env();
        let settings = Self { bind_addr, admin_bind_addr, data_dir, engine };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.engine.sched_tick.is_zero() {
            bail!("SCHED_TICK_MS must be greater than zero");
        }
        if self.engine.health_tick.is_zero() {
            bail!("HEALTH_TICK_MS must be greater than zero");
        }
        if self.engine.exec_max.is_zero() {
            bail!("EXEC_MAX_MS must be greater than zero");
        }
        if self.engine.sched_batch == 0 {
            bail!("SCHED_BATCH must be greater than zero");
        }
        if self.engine.event_bus_queue_limit == 0 {
            bail!("EVENT_BUS_QUEUE_LIMIT must be greater than zero");
        }
        Ok(())
    }
}

/// Any process environment variable prefixed `TEO_` that isn't one of the
/// keys this binary actually reads is logged and ignored rather than
/// silently accepted, so a typo'd override doesn't vanish unnoticed.
fn warn_on_unknown_teo_keys() {
    for (key, _) in std::env::vars() {
        if key.starts_with("TEO_") && !KNOWN_KEYS.contains(&key.as_str()) {
            warn!(key, "unrecognized TEO_ environment variable, ignoring");
        }
    }
}

fn engine_config_from_env() -> EngineConfig {
    let default = EngineConfig::default();
    EngineConfig {
        sched_tick: millis("SCHED_TICK_MS", default.sched_tick),
        health_tick: millis("HEALTH_TICK_MS", default.health_tick),
        health_probe_timeout: millis("HEALTH_PROBE_TIMEOUT_MS", default.health_probe_timeout),
        exec_max: millis("EXEC_MAX_MS", default.exec_max),
        exec_retention: secs("EXEC_RETENTION_SECS", default.exec_retention),
        driver_start_retries: number("DRIVER_START_RETRIES", default.driver_start_retries),
        driver_start_backoff: millis("DRIVER_START_BACKOFF_MS", default.driver_start_backoff),
        client_webhook_retries: number("CLIENT_WEBHOOK_RETRIES", default.client_webhook_retries),
        sched_batch: number("SCHED_BATCH", default.sched_batch),
        sched_assign_retries: number("SCHED_ASSIGN_RETRIES", default.sched_assign_retries),
        event_bus_queue_limit: number("EVENT_BUS_QUEUE_LIMIT", default.event_bus_queue_limit),
        sched_debounce: default.sched_debounce,
    }
}

fn millis(key: &str, default: Duration) -> Duration {
    Duration::from_millis(number(key, default.as_millis() as u64))
}

fn secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(number(key, default.as_secs()))
}

fn number<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, raw, "failed to parse environment variable, using default");
            default
        }),
        Err(_) => default,
    }
}
