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

use prometheus::{register_counter_vec_with_registry, register_counter_with_registry, CounterVec, Counter, Registry};

pub struct WebhookMetrics {
    pub ingest_outcomes: CounterVec,
    pub client_webhook_deliveries: Counter,
    pub client_webhook_failures: Counter,
}

impl WebhookMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            ingest_outcomes: register_counter_vec_with_registry!(
                "teo_webhook_ingest_total",
                "Runner webhook deliveries by outcome",
                &["outcome"],
                registry
            )?,
            client_webhook_deliveries: register_counter_with_registry!(
                "teo_client_webhook_deliveries_total",
                "Completion webhooks delivered to clients",
                registry
            )?,
            client_webhook_failures: register_counter_with_registry!(
                "teo_client_webhook_failures_total",
                "Completion webhooks that exhausted their retry budget",
                registry
            )?,
        })
    }
}
