// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Retry, backoff, and idempotency helpers.
//!
//! This crate contains the loops and policies used to make remote calls
//! resilient to transient failures. It is transport-agnostic: the caller
//! supplies a closure performing one attempt, and gets back a single retrying
//! entry point.
//!
//! * [retry_loop] retries unary calls.
//! * [resumable_stream] reopens server-streaming calls from the last item
//!   received.
//! * [retry_policy], [backoff_policy], and [idempotency] define the decisions
//!   made by the loops.
//! * [options] holds per-client and per-request configuration.

/// An alias of [std::result::Result] where the error is always [crate::error::Error].
///
/// This is the result type used by all functions wrapping RPCs.
pub type Result<T> = std::result::Result<T, crate::error::Error>;

/// The core error types used by the loops.
pub mod error;

pub mod backoff_policy;
pub mod exponential_backoff;
pub mod idempotency;
pub mod options;
pub mod resumable_stream;
pub mod retry_loop;
pub mod retry_policy;
pub mod retry_result;
pub mod retry_state;

#[cfg(test)]
mod mock_rng;
