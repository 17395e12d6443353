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

//! The Test Execution Orchestrator process entrypoint: the only place in
//! the workspace that reads the environment (spec §6.7) or the command
//! line. Everything else takes an already-built [`EngineConfig`] and a
//! `Store` handle.

mod config;
mod supervise;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use prometheus::Registry;
use teo_registry::RunnerRegistry;
use teo_scheduler::{
    ClientNotifier, CompletionSweeper, DriverGateway, DriverRegistry, EventBus, HealthProber, HttpRunnerDriver,
    RetentionPruner, Scheduler, SchedulerMetrics,
};
use teo_store::{MemoryBackend, SledBackend, Store};
use teo_webhook::AppState;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Well-known runner types the Driver Gateway ships an `HttpRunnerDriver`
/// for out of the box (spec §1: "the concrete CI/CD adapters ... are
/// adapters behind a single `RunnerDriver` capability"). Each POSTs the
/// same generic start payload to the runner's `endpoint_url`; a deployment
/// needing a richer adapter registers its own `RunnerDriver` impl here.
const BUILTIN_RUNNER_TYPES: &[&str] = &["github-actions", "azure-devops", "jenkins", "gitlab-ci", "docker", "local"];

#[derive(Parser, Debug)]
#[command(name = "teo-server", about = "Test Execution Orchestrator")]
struct Args {
    /// Address the client-facing API and webhook ingest listen on.
    #[arg(long, env = "TEO_BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind_addr: SocketAddr,

    /// Address the Prometheus/health admin listener binds to.
    #[arg(long, env = "TEO_ADMIN_BIND_ADDR", default_value = "127.0.0.1:9090")]
    admin_bind_addr: SocketAddr,

    /// Directory for the durable sled store. Omit to run against an
    /// in-memory store (data lost on restart; fine for local demos).
    #[arg(long, env = "TEO_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let settings = config::Settings::resolve(args.bind_addr, args.admin_bind_addr, args.data_dir)
        .context("invalid configuration")?;
    let engine_config = settings.engine.clone();
    info!(bind_addr = %settings.bind_addr, admin_bind_addr = %settings.admin_bind_addr, data_dir = ?settings.data_dir, "starting teo-server");

    let backend: Arc<dyn teo_store::KeyValueStore> = match &settings.data_dir {
        Some(path) => {
            info!(path = %path.display(), "using durable sled store");
            Arc::new(SledBackend::open(path).context("failed to open sled store")?)
        }
        None => {
            info!("no TEO_DATA_DIR configured, using in-memory store");
            Arc::new(MemoryBackend::new())
        }
    };
    let store = Store::new(backend).await.context("failed to initialize store")?;
    let registry = RunnerRegistry::bootstrap(store.clone())
        .await
        .context("failed to bootstrap runner registry")?;

    let (events, ticks) = EventBus::new(engine_config.event_bus_queue_limit);

    let metrics_registry = Registry::new();
    let scheduler_metrics =
        Arc::new(SchedulerMetrics::new(&metrics_registry).context("failed to register scheduler metrics")?);

    let mut drivers = DriverRegistry::new();
    for runner_type in BUILTIN_RUNNER_TYPES {
        drivers = drivers.register(Box::new(HttpRunnerDriver::new(
            *runner_type,
            Duration::from_secs(10),
        )));
    }
    let drivers = Arc::new(drivers);

    // Built before the Driver Gateway and completion sweeper so both can be
    // handed the same `ClientWebhookDispatcher` (wrapped as a
    // `ClientNotifier`) instead of each registering their own
    // `WebhookMetrics` against `metrics_registry`, which would panic on the
    // second registration.
    let state = AppState::new(
        store.clone(),
        registry.clone(),
        drivers.clone(),
        events.clone(),
        engine_config.clone(),
        &metrics_registry,
    );
    let notifier: Arc<dyn ClientNotifier> = Arc::new(state.dispatcher.clone());

    let gateway = Arc::new(DriverGateway::new(
        store.clone(),
        registry.clone(),
        drivers,
        events.clone(),
        notifier.clone(),
        engine_config.driver_start_retries,
        engine_config.driver_start_backoff,
    ));

    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        registry.clone(),
        gateway,
        events.clone(),
        engine_config.clone(),
        scheduler_metrics,
    ));
    // The Scheduler owns the tick-signal receiver outright, so it can't be
    // cleanly recreated after a panic (the paired sender lives inside the
    // Event Bus for the process's whole lifetime); left as a plain spawn
    // rather than wrapped in `supervise::spawn_supervised`.
    tokio::spawn(scheduler.run(ticks));

    // Forward the edge-triggered events the Scheduler cares about (spec
    // §4.5) onto its tick-signal channel. The Event Bus and the Scheduler
    // are deliberately decoupled: anything publishing a `DomainEvent`
    // doesn't need to know a Scheduler even exists.
    {
        let events_for_bridge = events.clone();
        supervise::spawn_supervised("event-bridge", move || {
            let events_for_bridge = events_for_bridge.clone();
            let mut subscriber = events_for_bridge.subscribe();
            async move {
                loop {
                    match subscriber.recv().await {
                        Ok(event) => {
                            if let Some(signal) = teo_scheduler::scheduler::signal_for_event(&event) {
                                events_for_bridge.signal(signal);
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }

    let health_prober = Arc::new(HealthProber::new(
        registry.clone(),
        events.clone(),
        engine_config.health_probe_timeout,
        engine_config.health_tick,
    ));
    supervise::spawn_supervised("health-prober", {
        let health_prober = health_prober.clone();
        move || health_prober.clone().run()
    });

    let sweeper = Arc::new(CompletionSweeper::new(
        store.clone(),
        registry.clone(),
        events.clone(),
        notifier,
        engine_config.exec_max,
        Duration::from_secs(30),
    ));
    supervise::spawn_supervised("completion-sweeper", {
        let sweeper = sweeper.clone();
        move || sweeper.clone().run()
    });

    let pruner = Arc::new(RetentionPruner::new(
        store.clone(),
        engine_config.exec_retention,
        Duration::from_secs(3600),
    ));
    supervise::spawn_supervised("retention-pruner", {
        let pruner = pruner.clone();
        move || pruner.clone().run()
    });

    let api_app = teo_webhook::router(state.clone());
    let admin_app = teo_webhook::admin_router(state, metrics_registry);

    let api_listener = TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind client API on {}", settings.bind_addr))?;
    let admin_listener = TcpListener::bind(settings.admin_bind_addr)
        .await
        .with_context(|| format!("failed to bind admin listener on {}", settings.admin_bind_addr))?;

    info!(addr = %settings.bind_addr, "client API + webhook ingest listening");
    info!(addr = %settings.admin_bind_addr, "admin listener (metrics, healthz) listening");

    let api_server = axum::serve(api_listener, api_app);
    let admin_server = axum::serve(admin_listener, admin_app);

    tokio::try_join!(
        async { api_server.await.context("client API server terminated unexpectedly") },
        async { admin_server.await.context("admin server terminated unexpectedly") },
    )?;

    Ok(())
}
