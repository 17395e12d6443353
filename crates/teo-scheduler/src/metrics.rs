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

//! Scheduler-side metrics, registered into a shared `prometheus::Registry`
//! so `teo-server`'s admin listener can expose them all at one `/metrics`
//! endpoint.

use prometheus::{
    register_counter_with_registry, register_gauge_with_registry,
    register_histogram_with_registry, Counter, Gauge, Histogram, Registry,
};

pub struct SchedulerMetrics {
    pub tick_duration_seconds: Histogram,
    pub assignments_total: Counter,
    pub queue_depth: Gauge,
    pub active_runners: Gauge,
}

impl SchedulerMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            tick_duration_seconds: register_histogram_with_registry!(
                "teo_scheduler_tick_duration_seconds",
                "Duration of one scheduler tick",
                vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0],
                registry
            )?,
            assignments_total: register_counter_with_registry!(
                "teo_scheduler_assignments_total",
                "Count of executions successfully assigned to a runner",
                registry
            )?,
            queue_depth: register_gauge_with_registry!(
                "teo_scheduler_queue_depth",
                "Number of executions currently queued",
                registry
            )?,
            active_runners: register_gauge_with_registry!(
                "teo_scheduler_active_runners",
                "Number of runners with status=active",
                registry
            )?,
        })
    }
}
