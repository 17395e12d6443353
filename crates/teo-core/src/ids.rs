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

//! Monotonic time and unique identifiers (component C1).

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Generate a new globally-unique, client-visible id with the given prefix
/// (e.g. `exec`, `alloc`). Uniqueness comes from a v4 UUID; ordering for
/// display and scheduling is carried separately by each entity's own
/// `created_at`/`allocated_at` timestamp, not by the id's lexical order.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_prefixed() {
        let a = new_id("exec");
        let b = new_id("exec");
        assert_ne!(a, b);
        assert!(a.starts_with("exec_"));
        assert!(b.starts_with("exec_"));
    }

    #[test]
    fn timestamp_is_monotonic_enough() {
        let a = timestamp_millis();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = timestamp_millis();
        assert!(b >= a);
    }
}
