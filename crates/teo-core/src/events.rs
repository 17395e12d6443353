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

//! The domain-event schema published on the Event Bus (C3, spec §4.2).

use serde::{Deserialize, Serialize};

use crate::model::{AggregatedResults, ExecutionStatus, RunnerHealth};

/// A single domain event, tagged by kind, always carrying the affected
/// entity id, its new state and a timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DomainEvent {
    ExecutionQueued {
        execution_id: String,
        at: u64,
    },
    ExecutionAssigned {
        execution_id: String,
        runner_id: u64,
        at: u64,
    },
    ExecutionStarted {
        execution_id: String,
        at: u64,
    },
    ShardCompleted {
        execution_id: String,
        shard_index: u32,
        at: u64,
    },
    ExecutionCompleted {
        execution_id: String,
        status: ExecutionStatus,
        aggregated: Option<AggregatedResults>,
        reason: Option<String>,
        at: u64,
    },
    RunnerRegistered {
        runner_id: u64,
        at: u64,
    },
    RunnerHealthChanged {
        runner_id: u64,
        health: RunnerHealth,
        at: u64,
    },
    RuleConfigured {
        rule_id: u64,
        at: u64,
    },
    QueueDepthSampled {
        queued: u64,
        assigned: u64,
        running: u64,
        at: u64,
    },
}

impl DomainEvent {
    /// The entity id this event is about, used to keep per-entity delivery
    /// order (spec §4.2, "best-effort ordered per entity").
    pub fn entity_key(&self) -> String {
        match self {
            DomainEvent::ExecutionQueued { execution_id, .. }
            | DomainEvent::ExecutionAssigned { execution_id, .. }
            | DomainEvent::ExecutionStarted { execution_id, .. }
            | DomainEvent::ShardCompleted { execution_id, .. }
            | DomainEvent::ExecutionCompleted { execution_id, .. } => execution_id.clone(),
            DomainEvent::RunnerRegistered { runner_id, .. }
            | DomainEvent::RunnerHealthChanged { runner_id, .. } => {
                format!("runner:{runner_id}")
            }
            DomainEvent::RuleConfigured { rule_id, .. } => format!("rule:{rule_id}"),
            DomainEvent::QueueDepthSampled { at, .. } => format!("queue-depth:{at}"),
        }
    }
}
