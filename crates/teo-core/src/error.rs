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

//! Error taxonomy shared by every crate in the orchestrator.
//!
//! [`StoreError`] enumerates the four failure kinds the Store contract
//! (spec §4.1) is allowed to return. [`TeoError`] is the outward-facing
//! taxonomy from spec §7 (Validation / Precondition / Transient /
//! External-Permanent / Policy / Timeout) that every other crate converts
//! its failures into.

use std::fmt;

use thiserror::Error;

/// The result type used throughout the orchestrator.
pub type Result<T, E = TeoError> = std::result::Result<T, E>;

/// Failures a [`crate::store`]-shaped backend may return from a write operation.
///
/// `Transient` is the only kind callers should retry automatically; the
/// others indicate the operation cannot succeed without a different
/// request or a state change elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient store error: {0}")]
    Transient(String),
}

impl StoreError {
    /// Whether a caller may retry this failure with bounded backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Classification of a [`crate::driver::RunnerDriver::start`] failure (spec §6.4).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("driver rejected request: {0}")]
    BadRequest(String),

    #[error("driver rejected credentials: {0}")]
    Unauthorized(String),

    #[error("driver unavailable: {0}")]
    Unavailable(String),

    #[error("transient driver error: {0}")]
    Transient(String),
}

impl DriverError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DriverError::Unavailable(_) | DriverError::Transient(_))
    }
}

/// The orchestrator-wide error taxonomy (spec §7).
#[derive(Debug, Error)]
pub enum TeoError {
    /// Client input failed schema validation or referenced an unknown entity.
    #[error("validation error: {0}")]
    Validation(String),

    /// A Store failure, retained with its original kind.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A driver adapter failure, retained with its original kind.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// No candidate runner existed for a queue item; never fatal, the item
    /// stays queued (spec §7, "Policy").
    #[error("no suitable runner for execution {0}")]
    NoSuitableRunner(String),

    /// An execution or probe exceeded its configured deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A terminal failure an operator should be alerted to (driver kept
    /// rejecting requests, a runner kept posting invalid webhooks).
    #[error("external permanent failure: {0}")]
    ExternalPermanent(String),
}

impl TeoError {
    pub fn validation(msg: impl fmt::Display) -> Self {
        TeoError::Validation(msg.to_string())
    }
}
