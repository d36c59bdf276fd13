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

//! Defines traits for retry policies and some common implementations.
//!
//! The retry loops automatically retry calls when they fail due to transient
//! errors and the request is idempotent, that is, it is safe to perform the
//! request more than once.
//!
//! A retry policy classifies errors as permanent or transient, and decides
//! how many transient errors (or how much time) the loop may spend before it
//! gives up. Policies are immutable and may be shared by many calls; the
//! progress of each call lives in its own [RetryState].
//!
//! The base policies ([Recommended], [AlwaysRetry], [NeverRetry]) classify
//! errors. The decorators ([LimitedErrorCount], [LimitedElapsedTime]) bound
//! the loop. Use [RetryPolicyExt] to compose them.
//!
//! # Example
//! ```
//! # use google_cloud_resilience::retry_policy::*;
//! use std::time::Duration;
//! let policy = Recommended
//!     .with_attempt_limit(5)
//!     .with_time_limit(Duration::from_secs(30));
//! ```

use crate::error::Error;
use crate::retry_result::RetryResult;
use crate::retry_state::RetryState;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Determines how errors are handled in the retry loops.
///
/// Implementations must be thread safe, as the same policy may be used by many
/// concurrent calls.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// Query the retry policy after an error.
    ///
    /// # Parameters
    /// * `state` - the state of the retry loop, including the number of
    ///   attempts so far (counting the attempt that just failed).
    /// * `error` - the last error received from a request. Not all are server
    ///   errors. The client library may have been unable to send or complete
    ///   the request before the server returned an error.
    fn on_error(&self, state: &RetryState, error: Error) -> RetryResult;

    /// Returns true if the policy does not allow any further attempts.
    ///
    /// The loops check this before each retry. It is never checked before the
    /// first attempt: the loops always make at least one attempt.
    fn is_exhausted(&self, _state: &RetryState) -> bool {
        false
    }

    /// Returns true if `error` should never be retried.
    ///
    /// The default implementation uses [Error::is_transient].
    fn is_permanent_failure(&self, error: &Error) -> bool {
        !error.is_transient()
    }

    /// The remaining time in the retry policy.
    ///
    /// For policies based on time, this returns the remaining time in the
    /// policy. The retry loop can use this value to adjust the next RPC
    /// timeout. For policies that are not time based this returns `None`.
    fn remaining_time(&self, _state: &RetryState) -> Option<Duration> {
        None
    }

    /// Query the policy after a long-running operation is still in progress.
    ///
    /// The polling loops treat an operation that is still running like a
    /// transient failure. Return `Some(error)` to stop polling.
    fn on_in_progress(&self, _state: &RetryState, _operation_name: &str) -> Option<Error> {
        None
    }
}

/// A helper type to use [RetryPolicy] in client and request options.
#[derive(Clone)]
pub struct RetryPolicyArg(pub(crate) Arc<dyn RetryPolicy>);

impl<T> std::convert::From<T> for RetryPolicyArg
where
    T: RetryPolicy + 'static,
{
    fn from(value: T) -> Self {
        Self(Arc::new(value))
    }
}

impl std::convert::From<Arc<dyn RetryPolicy>> for RetryPolicyArg {
    fn from(value: Arc<dyn RetryPolicy>) -> Self {
        Self(value)
    }
}

impl std::convert::From<RetryPolicyArg> for Arc<dyn RetryPolicy> {
    fn from(value: RetryPolicyArg) -> Arc<dyn RetryPolicy> {
        value.0
    }
}

/// Extension trait for [RetryPolicy]
pub trait RetryPolicyExt: RetryPolicy + Sized {
    /// Decorate a [RetryPolicy] to limit the total elapsed time in the retry
    /// loop.
    ///
    /// While the time spent in the retry loop (including time in backoff) is
    /// less than the prescribed duration the `on_error()` method returns the
    /// results of the inner policy. After that time it returns
    /// [Exhausted][RetryResult::Exhausted] if the inner policy returns
    /// [Continue][RetryResult::Continue].
    ///
    /// # Example
    /// ```
    /// # use google_cloud_resilience::retry_policy::*;
    /// # use google_cloud_resilience::retry_state::RetryState;
    /// use std::time::{Duration, Instant};
    /// let policy = Recommended.with_time_limit(Duration::from_secs(10));
    /// let state = RetryState::default().set_start(Instant::now() - Duration::from_secs(20));
    /// assert!(policy.is_exhausted(&state));
    /// ```
    fn with_time_limit(self, maximum_duration: Duration) -> LimitedElapsedTime<Self> {
        LimitedElapsedTime::custom(self, maximum_duration)
    }

    /// Decorate a [RetryPolicy] to limit the number of failures.
    ///
    /// The policy permits a retry while the number of failures is less than
    /// or equal to `maximum_failures`. That is, a call makes at most
    /// `maximum_failures + 1` attempts.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_resilience::retry_policy::*;
    /// # use google_cloud_resilience::retry_state::RetryState;
    /// let policy = Recommended.with_attempt_limit(3);
    /// assert!(!policy.is_exhausted(&RetryState::default().set_attempt_count(3_u32)));
    /// assert!(policy.is_exhausted(&RetryState::default().set_attempt_count(4_u32)));
    /// ```
    fn with_attempt_limit(self, maximum_failures: u32) -> LimitedErrorCount<Self> {
        LimitedErrorCount::custom(self, maximum_failures)
    }
}

impl<T: RetryPolicy> RetryPolicyExt for T {}

/// Retries transient errors.
///
/// This policy should be decorated to limit the number of retry attempts or
/// the duration of the retry loop. Transient errors are classified by
/// [Error::is_transient]. All other errors are permanent.
///
/// # Example
/// ```
/// # use google_cloud_resilience::retry_policy::*;
/// # use google_cloud_resilience::error::{Error, rpc::{Code, Status}};
/// # use google_cloud_resilience::retry_state::RetryState;
/// let policy = Recommended;
/// let state = RetryState::default();
/// assert!(policy.on_error(&state, transient_error()).is_continue());
/// assert!(policy.on_error(&state, permanent_error()).is_permanent());
///
/// fn transient_error() -> Error { Error::service(Status::default().set_code(Code::Unavailable)) }
/// fn permanent_error() -> Error { Error::service(Status::default().set_code(Code::NotFound)) }
/// ```
#[derive(Clone, Debug, Default)]
pub struct Recommended;

impl RetryPolicy for Recommended {
    fn on_error(&self, _state: &RetryState, error: Error) -> RetryResult {
        if self.is_permanent_failure(&error) {
            return RetryResult::Permanent(error);
        }
        RetryResult::Continue(error)
    }
}

/// A retry policy that retries all errors.
///
/// Even permanent service errors are retried. This is only useful when
/// decorated with a limit, for example in tests or in applications that know
/// their service returns misleading status codes.
#[derive(Clone, Debug, Default)]
pub struct AlwaysRetry;

impl RetryPolicy for AlwaysRetry {
    fn on_error(&self, _state: &RetryState, error: Error) -> RetryResult {
        RetryResult::Continue(error)
    }

    fn is_permanent_failure(&self, _error: &Error) -> bool {
        false
    }
}

/// A retry policy that never retries.
///
/// The call is attempted exactly once. Transient failures are reported as
/// exhausted, permanent failures are reported unchanged.
#[derive(Clone, Debug, Default)]
pub struct NeverRetry;

impl RetryPolicy for NeverRetry {
    fn on_error(&self, _state: &RetryState, error: Error) -> RetryResult {
        RetryResult::Exhausted(error)
    }

    fn is_exhausted(&self, _state: &RetryState) -> bool {
        true
    }

    fn on_in_progress(&self, state: &RetryState, operation_name: &str) -> Option<Error> {
        Some(Error::exhausted(Exhausted::new(
            operation_name,
            "attempt count",
            state.attempt_count.to_string(),
            "0".to_string(),
        )))
    }
}

/// A retry policy decorator that limits the total time in the retry loop.
///
/// This policy decorates an inner policy and limits the duration of retry
/// loops. While the time spent in the retry loop (including time in backoff)
/// is less than the prescribed duration the `on_error()` method returns the
/// results of the inner policy. After that time it returns
/// [Exhausted][RetryResult::Exhausted] if the inner policy returns
/// [Continue][RetryResult::Continue].
///
/// The `remaining_time()` function returns the remaining time. This is always
/// [Duration::ZERO] once or after the policy's expiration time is reached.
///
/// # Parameters
/// * `P` - the inner retry policy, defaults to [Recommended].
#[derive(Debug)]
pub struct LimitedElapsedTime<P = Recommended>
where
    P: RetryPolicy,
{
    inner: P,
    maximum_duration: Duration,
}

impl LimitedElapsedTime {
    /// Creates a new instance, with the default inner policy.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_resilience::retry_policy::*;
    /// use std::time::Duration;
    /// let policy = LimitedElapsedTime::new(Duration::from_secs(10));
    /// ```
    pub fn new(maximum_duration: Duration) -> Self {
        Self {
            inner: Recommended,
            maximum_duration,
        }
    }
}

impl<P> LimitedElapsedTime<P>
where
    P: RetryPolicy,
{
    /// Creates a new instance with a custom inner policy.
    pub fn custom(inner: P, maximum_duration: Duration) -> Self {
        Self {
            inner,
            maximum_duration,
        }
    }

    fn elapsed(&self, state: &RetryState) -> Duration {
        now().saturating_duration_since(state.start)
    }

    fn expired(&self, state: &RetryState) -> bool {
        self.elapsed(state) >= self.maximum_duration
    }

    fn in_progress_impl(&self, state: &RetryState, operation_name: &str) -> Option<Error> {
        if !self.expired(state) {
            return None;
        }
        Some(Error::exhausted(Exhausted::new(
            operation_name,
            "elapsed time",
            format!("{:?}", self.elapsed(state)),
            format!("{:?}", self.maximum_duration),
        )))
    }
}

impl<P> RetryPolicy for LimitedElapsedTime<P>
where
    P: RetryPolicy + 'static,
{
    fn on_error(&self, state: &RetryState, error: Error) -> RetryResult {
        match self.inner.on_error(state, error) {
            RetryResult::Permanent(e) => RetryResult::Permanent(e),
            RetryResult::Exhausted(e) => RetryResult::Exhausted(e),
            RetryResult::Continue(e) => {
                if self.expired(state) {
                    RetryResult::Exhausted(e)
                } else {
                    RetryResult::Continue(e)
                }
            }
        }
    }

    fn is_exhausted(&self, state: &RetryState) -> bool {
        self.inner.is_exhausted(state) || self.expired(state)
    }

    fn is_permanent_failure(&self, error: &Error) -> bool {
        self.inner.is_permanent_failure(error)
    }

    fn remaining_time(&self, state: &RetryState) -> Option<Duration> {
        let remaining = self.maximum_duration.saturating_sub(self.elapsed(state));
        self.inner
            .remaining_time(state)
            .map(|inner| std::cmp::min(inner, remaining))
            .or(Some(remaining))
    }

    fn on_in_progress(&self, state: &RetryState, operation_name: &str) -> Option<Error> {
        self.inner
            .on_in_progress(state, operation_name)
            .or_else(|| self.in_progress_impl(state, operation_name))
    }
}

/// A retry policy decorator that limits the number of failures.
///
/// This policy decorates an inner policy and limits the total number of
/// failures. While the number of failures is less than or equal to the limit
/// the `on_error()` method returns the results of the inner policy. Past the
/// limit it returns [Exhausted][RetryResult::Exhausted] if the inner policy
/// returns [Continue][RetryResult::Continue].
///
/// A policy configured for `N` failures allows `N + 1` attempts.
///
/// # Parameters
/// * `P` - the inner retry policy, defaults to [Recommended].
#[derive(Debug)]
pub struct LimitedErrorCount<P = Recommended>
where
    P: RetryPolicy,
{
    inner: P,
    maximum_failures: u32,
}

impl LimitedErrorCount {
    /// Creates a new instance, with the default inner policy.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_resilience::retry_policy::*;
    /// let policy = LimitedErrorCount::new(3);
    /// ```
    pub fn new(maximum_failures: u32) -> Self {
        Self {
            inner: Recommended,
            maximum_failures,
        }
    }
}

impl<P> LimitedErrorCount<P>
where
    P: RetryPolicy,
{
    /// Creates a new instance with a custom inner policy.
    pub fn custom(inner: P, maximum_failures: u32) -> Self {
        Self {
            inner,
            maximum_failures,
        }
    }

    fn exceeded(&self, state: &RetryState) -> bool {
        state.attempt_count > self.maximum_failures
    }

    fn in_progress_impl(&self, state: &RetryState, operation_name: &str) -> Option<Error> {
        if !self.exceeded(state) {
            return None;
        }
        Some(Error::exhausted(Exhausted::new(
            operation_name,
            "attempt count",
            state.attempt_count.to_string(),
            self.maximum_failures.to_string(),
        )))
    }
}

impl<P> RetryPolicy for LimitedErrorCount<P>
where
    P: RetryPolicy,
{
    fn on_error(&self, state: &RetryState, error: Error) -> RetryResult {
        match self.inner.on_error(state, error) {
            RetryResult::Permanent(e) => RetryResult::Permanent(e),
            RetryResult::Exhausted(e) => RetryResult::Exhausted(e),
            RetryResult::Continue(e) => {
                if self.exceeded(state) {
                    RetryResult::Exhausted(e)
                } else {
                    RetryResult::Continue(e)
                }
            }
        }
    }

    fn is_exhausted(&self, state: &RetryState) -> bool {
        self.inner.is_exhausted(state) || self.exceeded(state)
    }

    fn is_permanent_failure(&self, error: &Error) -> bool {
        self.inner.is_permanent_failure(error)
    }

    fn remaining_time(&self, state: &RetryState) -> Option<Duration> {
        self.inner.remaining_time(state)
    }

    fn on_in_progress(&self, state: &RetryState, operation_name: &str) -> Option<Error> {
        self.inner
            .on_in_progress(state, operation_name)
            .or_else(|| self.in_progress_impl(state, operation_name))
    }
}

/// The source of the error returned when a polling loop exhausts its policy.
#[derive(thiserror::Error, Debug)]
#[error(
    "polling loop for {operation_name} exhausted, {limit_name} value ({value}) exceeds limit ({limit})"
)]
pub struct Exhausted {
    operation_name: String,
    limit_name: &'static str,
    value: String,
    limit: String,
}

impl Exhausted {
    pub fn new(
        operation_name: &str,
        limit_name: &'static str,
        value: String,
        limit: String,
    ) -> Self {
        Self {
            operation_name: operation_name.to_string(),
            limit_name,
            value,
            limit,
        }
    }

    /// The name of the operation that was being polled.
    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::rpc::{Code, Status};
    use crate::idempotency::Idempotency;
    use std::error::Error as _;
    use test_case::test_case;

    mockall::mock! {
        #[derive(Debug)]
        Policy {}
        impl RetryPolicy for Policy {
            fn on_error(&self, state: &RetryState, error: Error) -> RetryResult;
            fn is_exhausted(&self, state: &RetryState) -> bool;
            fn is_permanent_failure(&self, error: &Error) -> bool;
            fn remaining_time(&self, state: &RetryState) -> Option<Duration>;
            fn on_in_progress(&self, state: &RetryState, operation_name: &str) -> Option<Error>;
        }
    }

    fn transient_error() -> Error {
        Error::service(
            Status::default()
                .set_code(Code::Unavailable)
                .set_message("try-again"),
        )
    }

    fn permanent_error() -> Error {
        Error::service(
            Status::default()
                .set_code(Code::PermissionDenied)
                .set_message("uh-oh"),
        )
    }

    fn attempts(count: u32) -> RetryState {
        RetryState::new(Idempotency::Idempotent).set_attempt_count(count)
    }

    fn started(ago: Duration) -> RetryState {
        RetryState::new(Idempotency::Idempotent).set_start(now() - ago)
    }

    // Verify `RetryPolicyArg` can be converted from the desired types.
    #[test]
    fn retry_policy_arg() {
        let policy = LimitedErrorCount::new(3);
        let _ = RetryPolicyArg::from(policy);

        let policy: Arc<dyn RetryPolicy> = Arc::new(LimitedErrorCount::new(3));
        let arg = RetryPolicyArg::from(policy);
        let _: Arc<dyn RetryPolicy> = arg.into();
    }

    #[test_case(Code::Unavailable, true)]
    #[test_case(Code::DeadlineExceeded, true)]
    #[test_case(Code::Aborted, true)]
    #[test_case(Code::ResourceExhausted, true)]
    #[test_case(Code::Internal, true)]
    #[test_case(Code::Unknown, true)]
    #[test_case(Code::InvalidArgument, false)]
    #[test_case(Code::NotFound, false)]
    #[test_case(Code::AlreadyExists, false)]
    #[test_case(Code::PermissionDenied, false)]
    #[test_case(Code::Unauthenticated, false)]
    #[test_case(Code::FailedPrecondition, false)]
    #[test_case(Code::OutOfRange, false)]
    #[test_case(Code::Unimplemented, false)]
    #[test_case(Code::DataLoss, false)]
    #[test_case(Code::Cancelled, false)]
    fn recommended(code: Code, transient: bool) {
        let p = Recommended;
        let error = Error::service(Status::default().set_code(code));
        assert_eq!(p.is_permanent_failure(&error), !transient, "{code:?}");
        let flow = p.on_error(&attempts(1), error);
        assert_eq!(flow.is_continue(), transient, "{flow:?}");
        assert_eq!(flow.is_permanent(), !transient, "{flow:?}");

        assert!(!p.is_exhausted(&attempts(1_000)));
        assert!(p.remaining_time(&attempts(1)).is_none());
        assert!(p.on_in_progress(&attempts(1_000), "op").is_none());
    }

    #[test_case(Error::io("broken pipe"), true)]
    #[test_case(Error::timeout("slow"), true)]
    #[test_case(Error::deser("bad"), false)]
    #[test_case(Error::other("what"), false)]
    fn recommended_error_kinds(error: Error, transient: bool) {
        let flow = Recommended.on_error(&attempts(1), error);
        assert_eq!(flow.is_continue(), transient, "{flow:?}");
    }

    #[test]
    fn always_retry() {
        let p = AlwaysRetry;
        assert!(!p.is_permanent_failure(&permanent_error()));
        assert!(p.on_error(&attempts(1), permanent_error()).is_continue());
        assert!(p.on_error(&attempts(1), transient_error()).is_continue());
        assert!(!p.is_exhausted(&attempts(1_000)));
    }

    #[test]
    fn never_retry() {
        let p = NeverRetry;
        assert!(p.on_error(&attempts(1), transient_error()).is_exhausted());
        assert!(p.is_permanent_failure(&permanent_error()));
        assert!(p.is_exhausted(&attempts(0)));
        let err = p.on_in_progress(&attempts(1), "op-name");
        assert!(err.as_ref().is_some_and(|e| e.is_exhausted()), "{err:?}");
    }

    #[test]
    fn limited_error_count() {
        let policy = LimitedErrorCount::new(3);
        for count in 1..=3 {
            let flow = policy.on_error(&attempts(count), transient_error());
            assert!(flow.is_continue(), "{count} {flow:?}");
            assert!(!policy.is_exhausted(&attempts(count)), "{count}");
        }
        let flow = policy.on_error(&attempts(4), transient_error());
        assert!(flow.is_exhausted(), "{flow:?}");
        assert!(policy.is_exhausted(&attempts(4)));

        let flow = policy.on_error(&attempts(1), permanent_error());
        assert!(flow.is_permanent(), "{flow:?}");
        assert!(policy.is_permanent_failure(&permanent_error()));
    }

    #[test]
    fn limited_error_count_zero() {
        let policy = LimitedErrorCount::new(0);
        assert!(!policy.is_exhausted(&attempts(0)));
        let flow = policy.on_error(&attempts(1), transient_error());
        assert!(flow.is_exhausted(), "{flow:?}");
    }

    #[test]
    fn limited_error_count_inner_permanent() {
        let mut mock = MockPolicy::new();
        mock.expect_on_error()
            .times(2)
            .returning(|_, e| RetryResult::Permanent(e));
        let policy = LimitedErrorCount::custom(mock, 2);

        let flow = policy.on_error(&attempts(1), transient_error());
        assert!(flow.is_permanent(), "{flow:?}");

        let flow = policy.on_error(&attempts(5), transient_error());
        assert!(flow.is_permanent(), "{flow:?}");
    }

    #[test]
    fn limited_error_count_inner_exhausted() {
        let mut mock = MockPolicy::new();
        mock.expect_on_error()
            .times(1)
            .returning(|_, e| RetryResult::Exhausted(e));
        let policy = LimitedErrorCount::custom(mock, 2);

        let flow = policy.on_error(&attempts(1), transient_error());
        assert!(flow.is_exhausted(), "{flow:?}");
    }

    #[test]
    fn limited_error_count_forwards() {
        let mut mock = MockPolicy::new();
        mock.expect_is_permanent_failure()
            .times(1)
            .return_const(true);
        mock.expect_remaining_time()
            .times(1)
            .return_const(Some(Duration::from_secs(123)));
        mock.expect_is_exhausted().times(1).return_const(true);
        let policy = LimitedErrorCount::custom(mock, 3);

        assert!(policy.is_permanent_failure(&transient_error()));
        assert_eq!(
            policy.remaining_time(&attempts(1)),
            Some(Duration::from_secs(123))
        );
        assert!(policy.is_exhausted(&attempts(1)));
    }

    #[test]
    fn limited_error_count_in_progress() {
        let mut mock = MockPolicy::new();
        mock.expect_on_in_progress()
            .times(3)
            .returning(|_, _| None);
        let policy = LimitedErrorCount::custom(mock, 2);

        assert!(policy.on_in_progress(&attempts(1), "op").is_none());
        assert!(policy.on_in_progress(&attempts(2), "op").is_none());
        let err = policy.on_in_progress(&attempts(3), "op-name");
        let err = err.expect("exhausted after the limit");
        assert!(err.is_exhausted(), "{err:?}");
        let exhausted = err.source().and_then(|e| e.downcast_ref::<Exhausted>());
        assert!(
            exhausted.is_some_and(|e| e.operation_name() == "op-name"),
            "{err:?}"
        );
        assert!(err.to_string().contains("op-name"), "{err}");
        assert!(err.to_string().contains("attempt count"), "{err}");
    }

    #[test]
    fn limited_error_count_in_progress_inner_error() {
        let mut mock = MockPolicy::new();
        mock.expect_on_in_progress()
            .times(1)
            .returning(|_, _| Some(Error::other("inner says stop")));
        let policy = LimitedErrorCount::custom(mock, 100);
        let err = policy.on_in_progress(&attempts(1), "op");
        assert!(
            err.as_ref()
                .is_some_and(|e| e.to_string().contains("inner says stop")),
            "{err:?}"
        );
    }

    #[test]
    fn limited_time() {
        let policy = LimitedElapsedTime::new(Duration::from_secs(60));

        let state = started(Duration::from_secs(10));
        let flow = policy.on_error(&state, transient_error());
        assert!(flow.is_continue(), "{flow:?}");
        assert!(!policy.is_exhausted(&state));

        let state = started(Duration::from_secs(70));
        let flow = policy.on_error(&state, transient_error());
        assert!(flow.is_exhausted(), "{flow:?}");
        assert!(policy.is_exhausted(&state));

        let flow = policy.on_error(&started(Duration::ZERO), permanent_error());
        assert!(flow.is_permanent(), "{flow:?}");
    }

    #[test]
    fn limited_time_unbounded() {
        let policy = LimitedElapsedTime::new(Duration::MAX);

        let state = started(Duration::from_secs(3600));
        let flow = policy.on_error(&state, transient_error());
        assert!(flow.is_continue(), "{flow:?}");
        assert!(!policy.is_exhausted(&state));
        assert!(policy.on_in_progress(&state, "op").is_none());
        let remaining = policy.remaining_time(&state);
        assert!(
            remaining.is_some_and(|r| r > Duration::from_secs(3600)),
            "{remaining:?}"
        );
    }

    #[test]
    fn limited_time_inner_breaks() {
        let mut mock = MockPolicy::new();
        mock.expect_on_error()
            .times(2)
            .returning(|_, e| RetryResult::Permanent(e));
        let policy = LimitedElapsedTime::custom(mock, Duration::from_secs(60));

        let flow = policy.on_error(&started(Duration::from_secs(10)), transient_error());
        assert!(flow.is_permanent(), "{flow:?}");
        let flow = policy.on_error(&started(Duration::from_secs(70)), transient_error());
        assert!(flow.is_permanent(), "{flow:?}");
    }

    #[test]
    fn limited_time_remaining_inner_longer() {
        let mut mock = MockPolicy::new();
        mock.expect_remaining_time()
            .times(1)
            .returning(|_| Some(Duration::from_secs(3600)));
        let policy = LimitedElapsedTime::custom(mock, Duration::from_secs(60));

        let remaining = policy.remaining_time(&started(Duration::from_secs(50)));
        assert!(
            remaining.is_some_and(|r| r <= Duration::from_secs(10)),
            "{remaining:?}"
        );
    }

    #[test]
    fn limited_time_remaining_inner_shorter() {
        let mut mock = MockPolicy::new();
        mock.expect_remaining_time()
            .times(1)
            .returning(|_| Some(Duration::from_secs(5)));
        let policy = LimitedElapsedTime::custom(mock, Duration::from_secs(60));

        let remaining = policy.remaining_time(&started(Duration::from_secs(10)));
        assert_eq!(remaining, Some(Duration::from_secs(5)));
    }

    #[test]
    fn limited_time_remaining_expired() {
        let policy = LimitedElapsedTime::new(Duration::from_secs(60));
        let remaining = policy.remaining_time(&started(Duration::from_secs(70)));
        assert_eq!(remaining, Some(Duration::ZERO));
    }

    #[test]
    fn limited_time_in_progress() {
        let policy = LimitedElapsedTime::new(Duration::from_secs(60));
        assert!(
            policy
                .on_in_progress(&started(Duration::from_secs(10)), "op")
                .is_none()
        );
        let err = policy.on_in_progress(&started(Duration::from_secs(70)), "op-name");
        let err = err.expect("exhausted after the deadline");
        assert!(err.is_exhausted(), "{err:?}");
        assert!(err.to_string().contains("elapsed time"), "{err}");
    }

    #[test]
    fn composed() {
        let policy = Recommended
            .with_attempt_limit(2)
            .with_time_limit(Duration::from_secs(60));
        let state = started(Duration::from_secs(1)).set_attempt_count(2_u32);
        assert!(policy.on_error(&state, transient_error()).is_continue());
        let state = state.set_attempt_count(3_u32);
        assert!(policy.on_error(&state, transient_error()).is_exhausted());
        assert!(policy.is_exhausted(&state));

        let state = started(Duration::from_secs(61)).set_attempt_count(1_u32);
        assert!(policy.on_error(&state, transient_error()).is_exhausted());
    }

    #[test]
    fn shared_policy_independent_calls() {
        // One policy, two calls: exhausting the first call does not affect
        // the second.
        let policy = Arc::new(LimitedErrorCount::new(1));
        let mut first = attempts(0);
        first.attempt_count += 1;
        assert!(policy.on_error(&first, transient_error()).is_continue());
        first.attempt_count += 1;
        assert!(policy.on_error(&first, transient_error()).is_exhausted());

        let second = attempts(1);
        assert!(policy.on_error(&second, transient_error()).is_continue());
    }
}
