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

//! The Live Event Bus (component C3): a single `publish`, a typed
//! `subscribe`, and an internal signal channel the Scheduler listens on to
//! take an edge-triggered tick without the publisher ever blocking.

use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use teo_core::events::DomainEvent;

/// A reason the Scheduler should run an extra tick outside its regular
/// period, raised by whichever component observed the edge.
#[derive(Debug, Clone)]
pub enum SchedulerSignal {
    ExecutionQueued,
    ExecutionCompleted,
    RunnerBecameHealthy,
}

/// Fan-out hub for [`DomainEvent`]s plus the internal tick-signal channel.
/// Cloning is cheap; every clone shares the same broadcast sender and tick
/// sender.
#[derive(Clone)]
pub struct EventBus {
    events: broadcast::Sender<DomainEvent>,
    ticks: mpsc::Sender<SchedulerSignal>,
}

/// The Scheduler's half of the tick-signal channel.
pub struct TickReceiver(pub mpsc::Receiver<SchedulerSignal>);

impl EventBus {
    /// `queue_limit` bounds each subscriber's lagged buffer (spec §4.2,
    /// `EVENT_BUS_QUEUE_LIMIT`); overflow surfaces as `RecvError::Lagged`
    /// to the subscriber rather than blocking the publisher.
    pub fn new(queue_limit: usize) -> (Self, TickReceiver) {
        let (events, _) = broadcast::channel(queue_limit.max(1));
        let (ticks, tick_rx) = mpsc::channel(queue_limit.max(1));
        (Self { events, ticks }, TickReceiver(tick_rx))
    }

    /// Publish a domain event. Never blocks: a subscriber that falls behind
    /// observes a `Lagged` error on its next `recv` instead of stalling the
    /// publisher.
    pub fn publish(&self, event: DomainEvent) {
        // `send` only errors when there are no subscribers; that's a
        // perfectly normal state (no UI attached) so it's not logged.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.events.subscribe()
    }

    /// Raise an edge-triggered scheduler signal. Best-effort: if the
    /// Scheduler's inbox is full it already has a tick pending, so the
    /// signal is dropped rather than awaited.
    pub fn signal(&self, signal: SchedulerSignal) {
        if self.ticks.try_send(signal).is_err() {
            warn!("scheduler signal channel full, dropping edge-triggered tick");
        }
    }
}
