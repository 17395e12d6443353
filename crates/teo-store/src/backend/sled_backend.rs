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

//! Durable [`KeyValueStore`] backend over an embedded `sled` tree. Used by
//! `teo-server` whenever `TEO_DATA_DIR` is configured; keeps executions,
//! runners and rules (including round-robin cursors) across restarts.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use sled::Transactional;
use teo_core::error::StoreError;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{sort_key, KeyValueStore, Keyspace, Lock, Operation};

pub struct SledBackend {
    db: sled::Db,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SledBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)
            .map_err(|e| StoreError::Transient(format!("failed to open sled db: {e}")))?;
        Ok(Self {
            db,
            locks: DashMap::new(),
        })
    }

    fn tree_name(keyspace: Keyspace) -> &'static str {
        match keyspace {
            Keyspace::Executions => "executions",
            Keyspace::Runners => "runners",
            Keyspace::Allocations => "allocations",
            Keyspace::Rules => "rules",
            Keyspace::HealthSamples => "health_samples",
        }
    }

    fn tree(&self, keyspace: Keyspace) -> Result<sled::Tree, StoreError> {
        self.db
            .open_tree(Self::tree_name(keyspace))
            .map_err(|e| StoreError::Transient(format!("failed to open sled tree: {e}")))
    }

    fn lock_for(&self, sorted: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(sorted.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

struct SledLock {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl Lock for SledLock {}

#[async_trait]
impl KeyValueStore for SledBackend {
    async fn get(&self, keyspace: Keyspace, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let tree = self.tree(keyspace)?;
        let key = key.to_string();
        tokio::task::spawn_blocking(move || tree.get(key.as_bytes()))
            .await
            .map_err(|e| StoreError::Transient(format!("sled task join error: {e}")))?
            .map(|opt| opt.map(|v| v.to_vec()))
            .map_err(|e| StoreError::Transient(format!("sled get error: {e}")))
    }

    async fn scan(&self, keyspace: Keyspace) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let tree = self.tree(keyspace)?;
        tokio::task::spawn_blocking(move || {
            tree.iter()
                .map(|res| {
                    res.map(|(k, v)| {
                        (String::from_utf8_lossy(&k).into_owned(), v.to_vec())
                    })
                })
                .collect::<Result<Vec<_>, sled::Error>>()
        })
        .await
        .map_err(|e| StoreError::Transient(format!("sled task join error: {e}")))?
        .map_err(|e| StoreError::Transient(format!("sled scan error: {e}")))
    }

    async fn scan_keys(&self, keyspace: Keyspace) -> Result<HashSet<String>, StoreError> {
        Ok(self.scan(keyspace).await?.into_iter().map(|(k, _)| k).collect())
    }

    async fn put(&self, keyspace: Keyspace, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let tree = self.tree(keyspace)?;
        let key = key.to_string();
        tokio::task::spawn_blocking(move || tree.insert(key.as_bytes(), value))
            .await
            .map_err(|e| StoreError::Transient(format!("sled task join error: {e}")))?
            .map(|_| ())
            .map_err(|e| StoreError::Transient(format!("sled put error: {e}")))
    }

    async fn delete(&self, keyspace: Keyspace, key: &str) -> Result<(), StoreError> {
        let tree = self.tree(keyspace)?;
        let key = key.to_string();
        tokio::task::spawn_blocking(move || tree.remove(key.as_bytes()))
            .await
            .map_err(|e| StoreError::Transient(format!("sled task join error: {e}")))?
            .map(|_| ())
            .map_err(|e| StoreError::Transient(format!("sled delete error: {e}")))
    }

    async fn apply_txn(
        &self,
        ops: Vec<(Keyspace, String, Operation)>,
    ) -> Result<(), StoreError> {
        let keys: Vec<(Keyspace, String)> =
            ops.iter().map(|(ks, k, _)| (*ks, k.clone())).collect();
        let _lock = self.lock_many(keys).await;

        // Distinct keyspaces touched, in stable order, so each op can be
        // resolved back to its tree's index inside the transaction closure.
        let mut keyspaces: Vec<Keyspace> = Vec::new();
        for (ks, _, _) in &ops {
            if !keyspaces.contains(ks) {
                keyspaces.push(*ks);
            }
        }
        let trees: Vec<sled::Tree> = keyspaces.iter().map(|ks| self.tree(*ks)).collect::<Result<_, _>>()?;

        tokio::task::spawn_blocking(move || {
            let tree_refs: Vec<&sled::Tree> = trees.iter().collect();
            tree_refs
                .as_slice()
                .transaction(|txn_trees| {
                    for (keyspace, key, op) in &ops {
                        let idx = keyspaces.iter().position(|k| k == keyspace).expect("keyspace indexed above");
                        let txn_tree = &txn_trees[idx];
                        match op {
                            Operation::Put(value) => {
                                txn_tree.insert(key.as_bytes(), value.clone())?;
                            }
                            Operation::Delete => {
                                txn_tree.remove(key.as_bytes())?;
                            }
                        }
                    }
                    Ok(())
                })
                .map_err(|e: sled::transaction::TransactionError<()>| {
                    StoreError::Transient(format!("sled transaction error: {e}"))
                })
        })
        .await
        .map_err(|e| StoreError::Transient(format!("sled task join error: {e}")))?
    }

    async fn lock_many(&self, mut keys: Vec<(Keyspace, String)>) -> Box<dyn Lock> {
        keys.sort_by(|a, b| sort_key(a.0, &a.1).cmp(&sort_key(b.0, &b.1)));
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for (keyspace, key) in keys {
            let sorted = sort_key(keyspace, &key);
            let mutex = self.lock_for(&sorted);
            guards.push(mutex.lock_owned().await);
        }
        Box::new(SledLock { _guards: guards })
    }
}
