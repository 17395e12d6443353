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

//! A restart-on-panic wrapper for the long-lived background loops spawned
//! from the composition root (Scheduler, Health Prober, the sweepers),
//! so a single task panic cannot take the process down (spec §5's
//! "never aborts a long-running execution due to its own transient
//! failure", extended here to the tasks themselves).

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Spawn `make_task` in a loop: if the resulting future's task panics,
/// log it and respawn after an exponentially growing backoff (capped at
/// [`MAX_BACKOFF`]) rather than letting the panic propagate to the rest
/// of the process. None of these loops are expected to return normally;
/// if one does, it's treated the same as a panic and restarted.
pub fn spawn_supervised<F, Fut>(name: &'static str, mut make_task: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut backoff = Duration::from_millis(500);
        loop {
            let handle = tokio::spawn(make_task());
            match handle.await {
                Ok(()) => {
                    warn!(task = name, "supervised task exited, restarting");
                }
                Err(e) if e.is_panic() => {
                    error!(task = name, "supervised task panicked, restarting");
                }
                Err(e) => {
                    warn!(task = name, ?e, "supervised task was cancelled, restarting");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    });
}
