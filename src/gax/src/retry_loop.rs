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

//! The retry loop for unary calls.
//!
//! The loop runs one attempt at a time. After a failure it classifies the
//! error, consults the retry policy, waits for the delay prescribed by the
//! backoff policy, and tries again. It returns exactly one result per call:
//! the first successful response, a permanent error, or an exhausted error
//! wrapping the last transient error.

use crate::Result;
use crate::backoff_policy::BackoffPolicy;
use crate::error::Error;
use crate::idempotency::{Idempotency, IdempotencyPolicy};
use crate::options::RequestOptions;
use crate::retry_policy::RetryPolicy;
use crate::retry_result::RetryResult;
use crate::retry_state::RetryState;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Per-call context for the retry, streaming, and polling loops.
///
/// The location is a free-form description of the call site, such as the
/// name of the RPC. It only appears in logs. The cancellation token lets the
/// caller abort the call: cancelling it while an attempt is in flight, or
/// while the loop sleeps, stops the loop with a
/// [cancelled][Error::is_cancelled] error.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    location: String,
    cancel: CancellationToken,
}

impl CallContext {
    /// Creates a new context with a fresh cancellation token.
    pub fn new<T: Into<String>>(location: T) -> Self {
        Self {
            location: location.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the cancellation token.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_resilience::retry_loop::CallContext;
    /// use tokio_util::sync::CancellationToken;
    /// let token = CancellationToken::new();
    /// let context = CallContext::new("GetBook").with_cancellation(token.child_token());
    /// token.cancel();
    /// assert!(context.cancellation().is_cancelled());
    /// ```
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The error returned when this call is cancelled.
    pub fn cancelled_error(&self) -> Error {
        Error::cancelled(format!("call to {} cancelled", self.location))
    }
}

/// Runs the retry loop for a given function.
///
/// This function calls `inner` until (1) it returns a successful response,
/// (2) it returns a permanent error, (3) the request is not idempotent and
/// the error is transient, (4) the retry policy is exhausted, or (5) the
/// call is cancelled. `inner` receives the remaining time in the retry
/// policy, if any.
///
/// In between calls the function waits the amount of time prescribed by the
/// backoff policy, using `sleep` to implement any sleep.
pub async fn retry_loop<F, S, Response>(
    inner: F,
    sleep: S,
    idempotency: Idempotency,
    retry_policy: Arc<dyn RetryPolicy>,
    backoff_policy: Arc<dyn BackoffPolicy>,
    context: CallContext,
) -> Result<Response>
where
    F: AsyncFnMut(Option<Duration>) -> Result<Response> + Send,
    S: AsyncFn(Duration) -> () + Send,
{
    retry_loop_with_callback(
        inner,
        sleep,
        idempotency,
        retry_policy,
        backoff_policy,
        context,
        |_, _, _| {},
    )
    .await
}

/// Runs the retry loop for a given function with a callback for retries.
///
/// Same as [retry_loop]. The `on_retry` callback is called before sleeping,
/// with the attempt count, the error, and the delay.
pub async fn retry_loop_with_callback<F, S, OnRetry, Response>(
    inner: F,
    sleep: S,
    idempotency: Idempotency,
    retry_policy: Arc<dyn RetryPolicy>,
    backoff_policy: Arc<dyn BackoffPolicy>,
    context: CallContext,
    on_retry: OnRetry,
) -> Result<Response>
where
    F: AsyncFnMut(Option<Duration>) -> Result<Response> + Send,
    S: AsyncFn(Duration) -> () + Send,
    OnRetry: FnMut(u32, &Error, Duration) + Send,
{
    let span = tracing::info_span!("retry_loop", location = context.location());
    run(
        inner,
        sleep,
        idempotency,
        retry_policy,
        backoff_policy,
        context,
        on_retry,
    )
    .instrument(span)
    .await
}

async fn run<F, S, OnRetry, Response>(
    mut inner: F,
    sleep: S,
    idempotency: Idempotency,
    retry_policy: Arc<dyn RetryPolicy>,
    backoff_policy: Arc<dyn BackoffPolicy>,
    context: CallContext,
    mut on_retry: OnRetry,
) -> Result<Response>
where
    F: AsyncFnMut(Option<Duration>) -> Result<Response> + Send,
    S: AsyncFn(Duration) -> () + Send,
    OnRetry: FnMut(u32, &Error, Duration) + Send,
{
    let mut state = RetryState::new(idempotency);
    loop {
        let remaining_time = retry_policy.remaining_time(&state);
        state.attempt_count += 1;
        let result = tokio::select! {
            biased;
            _ = context.cancel.cancelled() => return Err(context.cancelled_error()),
            r = inner(remaining_time) => r,
        };
        let error = match result {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };
        let error = match classify_error(retry_policy.as_ref(), &state, error) {
            RetryResult::Permanent(e) => return Err(e),
            RetryResult::Exhausted(e) => return Err(exhausted(&state, e)),
            RetryResult::Continue(e) => e,
        };

        let delay = backoff_policy.on_failure(&state);
        if retry_policy
            .remaining_time(&state)
            .is_some_and(|remaining| remaining < delay)
        {
            return Err(exhausted(&state, error));
        }
        on_retry(state.attempt_count, &error, delay);
        tracing::debug!(
            attempt_count = state.attempt_count,
            ?delay,
            "retrying after transient error: {error}"
        );
        tokio::select! {
            biased;
            _ = context.cancel.cancelled() => return Err(context.cancelled_error()),
            _ = sleep(delay) => {},
        };
        if retry_policy.is_exhausted(&state) {
            return Err(exhausted(&state, error));
        }
    }
}

/// Applies the retry decision pipeline to a failed attempt.
///
/// The streaming and polling loops share this classification with
/// [retry_loop]:
/// * permanent failures return [RetryResult::Permanent] with the error
///   unchanged,
/// * transient failures for non-idempotent requests also return
///   [RetryResult::Permanent], the caller sees the underlying error,
/// * all other errors are decided by [RetryPolicy::on_error].
///
/// `state.attempt_count` must already count the failed attempt.
pub fn classify_error(
    retry_policy: &dyn RetryPolicy,
    state: &RetryState,
    error: Error,
) -> RetryResult {
    if retry_policy.is_permanent_failure(&error) {
        return RetryResult::Permanent(error);
    }
    if !state.idempotency.is_idempotent() {
        tracing::warn!(
            attempt_count = state.attempt_count,
            "not retrying transient error for a non-idempotent request: {error}"
        );
        return RetryResult::Permanent(error);
    }
    retry_policy.on_error(state, error)
}

pub(crate) fn exhausted(state: &RetryState, last: Error) -> Error {
    tracing::warn!(
        attempt_count = state.attempt_count,
        "retry policy exhausted, last error: {last}"
    );
    Error::exhausted(last)
}

/// A helper to compute the time remaining in a retry loop, given the attempt
/// timeout and the overall timeout.
pub fn effective_timeout(
    options: &RequestOptions,
    remaining_time: Option<Duration>,
) -> Option<Duration> {
    match (options.attempt_timeout(), remaining_time) {
        (None, None) => None,
        (None, Some(t)) => Some(t),
        (Some(t), None) => Some(*t),
        (Some(a), Some(r)) => Some(*std::cmp::min(a, &r)),
    }
}

/// Runs a unary call through the retry loop, resolving any unset option to
/// its default.
///
/// The idempotency comes from `options` if set, otherwise from
/// `idempotency_policy`. Use [Strict][crate::idempotency::Strict] to let the
/// request classify itself.
/// Each attempt receives a copy of the request and is bounded by
/// [effective_timeout]. Attempts that exceed it fail with a
/// [timeout][Error::is_timeout] error, which is transient.
///
/// # Example
/// ```
/// # use google_cloud_resilience::*;
/// # use google_cloud_resilience::idempotency::{Idempotency, RequestIdempotency, Strict};
/// # use google_cloud_resilience::options::RequestOptions;
/// # use google_cloud_resilience::retry_loop::{CallContext, call_with_retry};
/// # use std::time::Duration;
/// #[derive(Clone)]
/// struct GetBook { name: String }
/// impl RequestIdempotency for GetBook {
///     fn idempotency(&self) -> Idempotency { Idempotency::Idempotent }
/// }
///
/// async fn get_book(request: GetBook) -> Result<String> {
///     call_with_retry(
///         request,
///         async |r: GetBook, _timeout: Option<Duration>| Ok(r.name),
///         &Strict,
///         RequestOptions::default(),
///         CallContext::new("GetBook"),
///     )
///     .await
/// }
/// ```
pub async fn call_with_retry<Request, F, Response>(
    request: Request,
    call: F,
    idempotency_policy: &dyn IdempotencyPolicy<Request>,
    options: RequestOptions,
    context: CallContext,
) -> Result<Response>
where
    Request: Clone + Send + Sync,
    F: AsyncFn(Request, Option<Duration>) -> Result<Response> + Send + Sync,
{
    let idempotency = options
        .idempotency()
        .unwrap_or_else(|| idempotency_policy.is_idempotent(&request));
    let retry_policy = options
        .retry_policy()
        .clone()
        .unwrap_or_else(crate::options::default_retry_policy);
    let backoff_policy = options
        .backoff_policy()
        .clone()
        .unwrap_or_else(crate::options::default_backoff_policy);
    let inner = async |remaining: Option<Duration>| {
        let timeout = effective_timeout(&options, remaining);
        let attempt = call(request.clone(), timeout);
        match timeout {
            None => attempt.await,
            Some(t) => tokio::time::timeout(t, attempt)
                .await
                .unwrap_or_else(|e| Err(Error::timeout(e))),
        }
    };
    let sleep = async |d| tokio::time::sleep(d).await;
    retry_loop(
        inner,
        sleep,
        idempotency,
        retry_policy,
        backoff_policy,
        context,
    )
    .await
}
