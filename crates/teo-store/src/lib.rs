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

//! Transactional persistence for every durable orchestrator entity
//! (component C2, spec §4.1), built over a pluggable keyspaced
//! [`backend::KeyValueStore`] the way a scheduler workspace separates its
//! state trait from the backend that implements it.

pub mod backend;
pub mod store;

pub use backend::memory::MemoryBackend;
#[cfg(feature = "sled")]
pub use backend::sled_backend::SledBackend;
pub use backend::{KeyValueStore, Keyspace};
pub use store::{ExecutionFilter, Page, QueueCounts, Store};
