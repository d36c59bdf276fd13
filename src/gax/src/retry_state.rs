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

//! Defines types to query retry and backoff policies.

use crate::idempotency::Idempotency;
use std::time::Instant;

/// The input into retry and backoff policy queries.
///
/// Policies are immutable and shared by many calls. Each logical call creates
/// its own `RetryState`, starting with zero attempts, and the loops update it
/// as they make attempts. Driving one call through failures never changes
/// the state observed by any other call.
///
/// This struct may gain new fields in future versions of the library.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct RetryState {
    /// Whether the request is safe to retry.
    ///
    /// Computed once, before the first attempt, by an
    /// [IdempotencyPolicy][crate::idempotency::IdempotencyPolicy].
    pub idempotency: Idempotency,

    /// The start time for this retry loop.
    pub start: Instant,

    /// The number of times the request has been attempted.
    pub attempt_count: u32,
}

impl RetryState {
    /// Create a new instance.
    pub fn new(idempotency: Idempotency) -> Self {
        Self::default().set_idempotency(idempotency)
    }

    /// Update the idempotency.
    pub fn set_idempotency(mut self, v: Idempotency) -> Self {
        self.idempotency = v;
        self
    }

    /// Update the start time, useful in mocks.
    pub fn set_start<T: Into<Instant>>(mut self, v: T) -> Self {
        self.start = v.into();
        self
    }

    /// Update the attempt count, useful in mocks.
    pub fn set_attempt_count<T: Into<u32>>(mut self, v: T) -> Self {
        self.attempt_count = v.into();
        self
    }
}

impl std::default::Default for RetryState {
    fn default() -> Self {
        Self {
            idempotency: Idempotency::NotIdempotent,
            start: tokio::time::Instant::now().into_std(),
            attempt_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults() {
        let state = RetryState::default();
        assert_eq!(state.attempt_count, 0);
        assert_eq!(state.idempotency, Idempotency::NotIdempotent);
    }

    #[test]
    fn setters() {
        let start = Instant::now() - Duration::from_secs(5);
        let state = RetryState::new(Idempotency::Idempotent)
            .set_start(start)
            .set_attempt_count(3_u32);
        assert_eq!(state.idempotency, Idempotency::Idempotent);
        assert_eq!(state.start, start);
        assert_eq!(state.attempt_count, 3);
    }

    #[test]
    fn independent_states() {
        let prototype = RetryState::new(Idempotency::Idempotent);
        let mut call = prototype.clone();
        call.attempt_count += 5;
        assert_eq!(prototype.attempt_count, 0);
        assert_eq!(call.attempt_count, 5);
    }
}
