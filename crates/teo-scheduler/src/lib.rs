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

//! Scheduler, Driver Gateway, Health Prober, Event Bus and the background
//! sweepers — everything that turns a queued execution into a dispatched
//! one and keeps the runner fleet's health current.

pub mod driver;
pub mod event_loop;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod notify;
pub mod scheduler;
pub mod sweeper;

pub use driver::{DriverRegistry, DriverStarted, ExecutionCtx, HttpRunnerDriver, NullRunnerDriver, RunnerDriver};
pub use event_loop::{EventBus, SchedulerSignal, TickReceiver};
pub use gateway::DriverGateway;
pub use health::HealthProber;
pub use metrics::SchedulerMetrics;
pub use notify::{ClientNotifier, NoopNotifier};
pub use scheduler::Scheduler;
pub use sweeper::{CompletionSweeper, RetentionPruner};
