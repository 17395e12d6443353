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

//! A seam for the client completion webhook (spec §6.3), so the Driver
//! Gateway and the completion sweeper can notify a client on every path an
//! execution goes terminal without this crate depending on `teo-webhook`.

use teo_core::model::Execution;

/// Notified with the finalized `Execution` on every terminal transition.
/// `teo-webhook` is the only implementor; it spawns the outbound delivery
/// itself, so this call never blocks its caller.
pub trait ClientNotifier: Send + Sync {
    fn notify(&self, exec: Execution);
}

/// Used wherever a notifier is optional (tests, local demos without a
/// configured client webhook path).
pub struct NoopNotifier;

impl ClientNotifier for NoopNotifier {
    fn notify(&self, _exec: Execution) {}
}
