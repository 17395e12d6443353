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

//! Shared application state handed to every axum handler.

use std::sync::Arc;

use prometheus::Registry;
use teo_core::config::EngineConfig;
use teo_registry::RunnerRegistry;
use teo_scheduler::{DriverRegistry, EventBus};
use teo_store::Store;

use crate::dispatch::ClientWebhookDispatcher;
use crate::metrics::WebhookMetrics;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub registry: Arc<RunnerRegistry>,
    pub drivers: Arc<DriverRegistry>,
    pub events: EventBus,
    pub config: EngineConfig,
    pub metrics: Arc<WebhookMetrics>,
    pub webhook_client: reqwest::Client,
    pub dispatcher: ClientWebhookDispatcher,
}

impl AppState {
    pub fn new(
        store: Store,
        registry: Arc<RunnerRegistry>,
        drivers: Arc<DriverRegistry>,
        events: EventBus,
        config: EngineConfig,
        registry_handle: &Registry,
    ) -> Self {
        let metrics = Arc::new(WebhookMetrics::new(registry_handle).expect("metric registration is static"));
        let webhook_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("reqwest client config is static and valid");
        let dispatcher = ClientWebhookDispatcher::new(config.clone(), metrics.clone(), webhook_client.clone());
        Self {
            store,
            registry,
            drivers,
            events,
            config,
            metrics,
            webhook_client,
            dispatcher,
        }
    }
}
