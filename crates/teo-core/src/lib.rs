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

//! Core domain types, error taxonomy and event schema for the Test
//! Execution Orchestrator. This crate has no I/O dependencies; every
//! other crate in the workspace builds on top of it the way
//! `ballista-core` anchors the rest of a scheduler workspace.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod model;
pub mod pattern;

pub use error::{DriverError, Result, StoreError, TeoError};
