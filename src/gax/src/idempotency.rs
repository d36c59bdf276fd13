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

//! Defines the idempotency classification and policies to compute it.
//!
//! A request is [idempotent] if it is safe to send it more than once. For
//! example, reads and lists are always idempotent. A write is idempotent if it
//! carries a client-assigned unique id, or some precondition that makes any
//! repeated attempt fail once the first attempt succeeded.
//!
//! The retry loops only retry transient errors for idempotent requests. A
//! transient failure may happen *after* the service applied the request, in
//! that case retrying a non-idempotent request risks duplicating its side
//! effects.
//!
//! The classification is computed once per request, before the first attempt,
//! and it does not change across attempts.
//!
//! # Example
//! ```
//! # use google_cloud_resilience::idempotency::*;
//! #[derive(Debug)]
//! struct CreateThing { request_id: Option<String> }
//!
//! impl RequestIdempotency for CreateThing {
//!     fn idempotency(&self) -> Idempotency {
//!         Idempotency::from(self.request_id.is_some())
//!     }
//! }
//!
//! let request = CreateThing { request_id: Some("abc-123".into()) };
//! assert_eq!(Strict.is_idempotent(&request), Idempotency::Idempotent);
//! let request = CreateThing { request_id: None };
//! assert_eq!(Strict.is_idempotent(&request), Idempotency::NotIdempotent);
//! assert_eq!(AlwaysRetry.is_idempotent(&request), Idempotency::Idempotent);
//! ```
//!
//! [idempotent]: https://en.wikipedia.org/wiki/Idempotence

/// Whether a request is safe to attempt more than once.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Idempotency {
    /// Repeating the request has no additional side effects.
    Idempotent,
    /// Repeating the request may duplicate its side effects.
    #[default]
    NotIdempotent,
}

impl Idempotency {
    pub fn is_idempotent(&self) -> bool {
        matches!(self, Self::Idempotent)
    }
}

impl std::convert::From<bool> for Idempotency {
    fn from(value: bool) -> Self {
        if value {
            Self::Idempotent
        } else {
            Self::NotIdempotent
        }
    }
}

/// Request types implement this trait to describe their own idempotency.
///
/// The implementation must be a pure function of the request contents. For
/// example, the presence of a client-assigned request id, or whether the
/// operation only reads data.
pub trait RequestIdempotency {
    fn idempotency(&self) -> Idempotency;
}

/// Classifies requests of type `R` as idempotent or not.
pub trait IdempotencyPolicy<R>: Send + Sync + std::fmt::Debug {
    /// Classify `request`.
    ///
    /// The retry loops call this once per logical call, before the first
    /// attempt.
    fn is_idempotent(&self, request: &R) -> Idempotency;
}

/// Trusts the request to classify itself.
///
/// This is the recommended policy. Requests that cannot prove they are safe
/// to retry are not retried on ambiguous failures.
#[derive(Clone, Debug, Default)]
pub struct Strict;

impl<R: RequestIdempotency> IdempotencyPolicy<R> for Strict {
    fn is_idempotent(&self, request: &R) -> Idempotency {
        request.idempotency()
    }
}

/// Treats all requests as idempotent.
///
/// Some applications manage their resources in a way where repeated writes
/// are harmless, for example, because each object is written by a single
/// process. Those applications may prefer to retry all transient failures.
#[derive(Clone, Debug, Default)]
pub struct AlwaysRetry;

impl<R> IdempotencyPolicy<R> for AlwaysRetry {
    fn is_idempotent(&self, _request: &R) -> Idempotency {
        Idempotency::Idempotent
    }
}

/// Creates a policy from a closure.
///
/// # Example
/// ```
/// # use google_cloud_resilience::idempotency::*;
/// struct Mutation { server_timestamp: bool }
/// let policy = from_fn(|m: &Mutation| Idempotency::from(!m.server_timestamp));
/// assert_eq!(policy.is_idempotent(&Mutation { server_timestamp: true }), Idempotency::NotIdempotent);
/// ```
pub fn from_fn<R, F>(f: F) -> FromFn<F>
where
    F: Fn(&R) -> Idempotency + Send + Sync,
{
    FromFn(f)
}

/// The policy returned by [from_fn].
#[derive(Clone)]
pub struct FromFn<F>(F);

impl<F> std::fmt::Debug for FromFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FromFn").finish_non_exhaustive()
    }
}

impl<R, F> IdempotencyPolicy<R> for FromFn<F>
where
    F: Fn(&R) -> Idempotency + Send + Sync,
{
    fn is_idempotent(&self, request: &R) -> Idempotency {
        (self.0)(request)
    }
}
