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

//! Client-facing HTTP API (spec §6.1), the runner webhook ingest (spec
//! §6.2) and the internal admin listener, assembled into the two `axum`
//! routers `teo-server` binds to separate ports.

pub mod admin;
pub mod aggregate;
pub mod api;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod state;

use axum::routing::{get, patch, post};
use axum::Router;
use prometheus::Registry;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// The client-facing API plus the runner webhook ingest endpoint, on one
/// router so both share the same connection pool and tracing layer.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/executions", post(api::create_execution).get(api::list_executions))
        .route(
            "/executions/:id",
            get(api::get_execution),
        )
        .route("/executions/:id/cancel", post(api::cancel_execution))
        .route("/runners", post(api::create_runner).get(api::list_runners))
        .route("/runners/:id", patch(api::patch_runner))
        .route("/runners/:id/pause", post(api::pause_runner))
        .route("/runners/:id/resume", post(api::resume_runner))
        .route("/runners/:id/decommission", post(api::decommission_runner))
        .route("/rules", post(api::create_rule))
        .route("/queue/status", get(api::queue_status))
        .route("/health", get(api::health))
        .route("/webhooks/runner", post(ingest::handle))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The internal admin listener: Prometheus exposition plus a plain
/// liveness probe, bound to a separate port so metrics scraping never
/// competes with the client API's connection pool (spec §9, ambient
/// observability carried regardless of the spec's feature Non-goals).
pub fn admin_router(state: AppState, registry: Registry) -> Router {
    admin::router(state, registry)
}
