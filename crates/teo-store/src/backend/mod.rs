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

//! The `KeyValueStore` abstraction the [`crate::store::Store`] facade is
//! built on. Splitting the keyspaced KV primitive from the higher-level
//! Store contract lets the orchestrator run single-node on an in-memory
//! backend in tests and demos, or durably on an embedded `sled` tree,
//! without the Store facade itself knowing which.

pub mod memory;
#[cfg(feature = "sled")]
pub mod sled_backend;

use async_trait::async_trait;
use std::collections::HashSet;
use teo_core::error::StoreError;

/// Logical partitions within the backend, mirroring the entity groups in
/// spec §3 / §6.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyspace {
    Executions,
    Runners,
    Allocations,
    Rules,
    HealthSamples,
}

impl Keyspace {
    fn as_str(self) -> &'static str {
        match self {
            Keyspace::Executions => "executions",
            Keyspace::Runners => "runners",
            Keyspace::Allocations => "allocations",
            Keyspace::Rules => "rules",
            Keyspace::HealthSamples => "health_samples",
        }
    }
}

/// A write operation bundled into a transaction via [`KeyValueStore::apply_txn`].
#[derive(Debug)]
pub enum Operation {
    Put(Vec<u8>),
    Delete,
}

/// An RAII handle released by dropping it. Backends that lock per-key use
/// this to guarantee the lock is freed even if the critical section
/// returns early via `?`.
pub trait Lock: Send + Sync {}

/// A keyspaced key/value interface with transactional multi-key writes
/// and per-key locking, the seam every Store write op (spec §4.1) is built
/// from.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, keyspace: Keyspace, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn scan(&self, keyspace: Keyspace) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    async fn scan_keys(&self, keyspace: Keyspace) -> Result<HashSet<String>, StoreError>;

    async fn put(&self, keyspace: Keyspace, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    async fn delete(&self, keyspace: Keyspace, key: &str) -> Result<(), StoreError>;

    /// Apply every operation or none. Implementations hold the relevant
    /// per-key locks (acquired in sorted order, see
    /// [`KeyValueStore::lock_many`]) for the duration of the write.
    async fn apply_txn(
        &self,
        ops: Vec<(Keyspace, String, Operation)>,
    ) -> Result<(), StoreError>;

    /// Acquire exclusive locks on the given keys, always in sorted
    /// `(keyspace, key)` order, so concurrent multi-key transactions (e.g.
    /// `assign`, which touches both `Executions` and `Runners`) can never
    /// deadlock against each other.
    async fn lock_many(&self, keys: Vec<(Keyspace, String)>) -> Box<dyn Lock>;
}

pub(crate) fn sort_key(keyspace: Keyspace, key: &str) -> String {
    format!("{}/{}", keyspace.as_str(), key)
}
