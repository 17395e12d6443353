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

//! Process-local [`KeyValueStore`] backend. Default for tests, demos and
//! single-node operation without a `--data-dir`.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use teo_core::error::StoreError;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{sort_key, KeyValueStore, Keyspace, Lock, Operation};

/// In-memory backend: a map keyed by `(keyspace, key)` plus a lazily
/// created mutex per key used for [`KeyValueStore::lock_many`].
#[derive(Default)]
pub struct MemoryBackend {
    data: DashMap<(Keyspace, String), Vec<u8>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, sorted: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(sorted.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

struct MemoryLock {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl Lock for MemoryLock {}

#[async_trait]
impl KeyValueStore for MemoryBackend {
    async fn get(&self, keyspace: Keyspace, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.get(&(keyspace, key.to_string())).map(|v| v.clone()))
    }

    async fn scan(&self, keyspace: Keyspace) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.key().0 == keyspace)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect())
    }

    async fn scan_keys(&self, keyspace: Keyspace) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.key().0 == keyspace)
            .map(|entry| entry.key().1.clone())
            .collect())
    }

    async fn put(&self, keyspace: Keyspace, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.data.insert((keyspace, key.to_string()), value);
        Ok(())
    }

    async fn delete(&self, keyspace: Keyspace, key: &str) -> Result<(), StoreError> {
        self.data.remove(&(keyspace, key.to_string()));
        Ok(())
    }

    async fn apply_txn(
        &self,
        ops: Vec<(Keyspace, String, Operation)>,
    ) -> Result<(), StoreError> {
        let keys: Vec<(Keyspace, String)> =
            ops.iter().map(|(ks, k, _)| (*ks, k.clone())).collect();
        let _lock = self.lock_many(keys).await;

        for (keyspace, key, op) in ops {
            match op {
                Operation::Put(value) => {
                    self.data.insert((keyspace, key), value);
                }
                Operation::Delete => {
                    self.data.remove(&(keyspace, key));
                }
            }
        }
        Ok(())
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
        Box::new(MemoryLock { _guards: guards })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_and_get_roundtrip() {
        let backend = MemoryBackend::new();
        backend
            .put(Keyspace::Executions, "exec-1", b"hello".to_vec())
            .await
            .unwrap();
        let got = backend.get(Keyspace::Executions, "exec-1").await.unwrap();
        assert_eq!(got, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get(Keyspace::Runners, "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn txn_applies_all_or_nothing_atomically() {
        let backend = MemoryBackend::new();
        backend
            .apply_txn(vec![
                (Keyspace::Executions, "a".into(), Operation::Put(b"1".to_vec())),
                (Keyspace::Runners, "b".into(), Operation::Put(b"2".to_vec())),
            ])
            .await
            .unwrap();
        assert_eq!(
            backend.get(Keyspace::Executions, "a").await.unwrap(),
            Some(b"1".to_vec())
        );
        assert_eq!(
            backend.get(Keyspace::Runners, "b").await.unwrap(),
            Some(b"2".to_vec())
        );
    }

    #[tokio::test]
    async fn locks_are_mutually_exclusive() {
        let backend = Arc::new(MemoryBackend::new());
        let lock1 = backend
            .lock_many(vec![(Keyspace::Executions, "x".into())])
            .await;

        let backend2 = backend.clone();
        let handle = tokio::spawn(async move {
            let start = std::time::Instant::now();
            let _lock2 = backend2
                .lock_many(vec![(Keyspace::Executions, "x".into())])
                .await;
            start.elapsed()
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(lock1);
        let elapsed = handle.await.unwrap();
        assert!(elapsed >= std::time::Duration::from_millis(15));
    }
}
