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

//! One `IntoResponse` impl mapping [`TeoError`] to HTTP status codes, so
//! every handler's error mapping lives in a single place instead of being
//! duplicated per-handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use teo_core::error::{StoreError, TeoError};

pub struct ApiError(pub TeoError);

impl From<TeoError> for ApiError {
    fn from(e: TeoError) -> Self {
        ApiError(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError(TeoError::Store(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            TeoError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            TeoError::Store(StoreError::NotFound(msg)) => (StatusCode::NOT_FOUND, msg.clone()),
            TeoError::Store(StoreError::PreconditionFailed(msg)) => (StatusCode::CONFLICT, msg.clone()),
            TeoError::Store(StoreError::Conflict(msg)) => (StatusCode::CONFLICT, msg.clone()),
            TeoError::Store(StoreError::Transient(msg)) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            TeoError::Driver(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            TeoError::NoSuitableRunner(msg) => (StatusCode::ACCEPTED, msg.clone()),
            TeoError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg.clone()),
            TeoError::ExternalPermanent(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
