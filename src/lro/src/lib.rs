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

//! Types and functions to make LROs easier to use and to require less boilerplate.
//!
//! Occasionally, a service may need to expose a method that takes a
//! significant amount of time to complete. In these situations, it is often
//! better to return an object representing the work, and let the caller wait
//! for it. This object is known as a long-running operation.
//!
//! The service returns the operation name when the work starts. A poller
//! queries the operation until it completes, waiting between queries as
//! prescribed by a backoff policy, and bounded by a retry policy.
//!
//! # Example
//! ```
//! # use google_cloud_resilience_lro::*;
//! # use gax::Result;
//! async fn create_database() -> Result<String> {
//!     let start = async || Ok(Operation::new("op-001", OperationStatus::Running));
//!     let query = |name: String| async move {
//!         Ok(Operation::new(name, OperationStatus::Succeeded("db-001".to_string())))
//!     };
//!     let cancel = |_name: String| async { Ok(()) };
//!     new_poller(start, query, cancel).until_done().await
//! }
//! ```

use futures::Stream;
use gax::Result;
use gax::backoff_policy::{BackoffPolicy, BackoffPolicyArg};
use gax::error::Error;
use gax::error::rpc::Status;
use gax::idempotency::Idempotency;
use gax::options::ClientConfig;
use gax::retry_loop::CallContext;
use gax::retry_policy::{RetryPolicy, RetryPolicyArg};
use gax::retry_state::RetryState;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The result of polling a long-running operation once.
#[derive(Debug)]
pub enum PollingResult<R> {
    /// The operation is still in progress.
    InProgress,
    /// The operation completed. This includes the result.
    Completed(Result<R>),
    /// An error trying to poll the operation.
    ///
    /// The error is retryable and the poller will query the operation again.
    PollingError(Error),
}

/// The state of a long-running operation as reported by the service.
#[derive(Clone, Debug, PartialEq)]
pub enum OperationStatus<R> {
    Running,
    Succeeded(R),
    Failed(Status),
}

/// A long-running operation with a typed result.
#[derive(Clone, Debug, PartialEq)]
pub struct Operation<R> {
    name: String,
    status: OperationStatus<R>,
}

impl<R> Operation<R> {
    pub fn new<T: Into<String>>(name: T, status: OperationStatus<R>) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }

    /// The name of the operation, used to query or cancel it.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> &OperationStatus<R> {
        &self.status
    }

    pub fn done(&self) -> bool {
        !matches!(self.status, OperationStatus::Running)
    }
}

/// The trait implemented by LRO helpers.
pub trait Poller<R> {
    /// Query the current status of the long-running operation.
    ///
    /// The first call starts the operation or queries it right away. Every
    /// other call waits for the backoff policy before querying. Returns
    /// `None` once the operation has completed.
    fn poll(&mut self) -> impl Future<Output = Option<PollingResult<R>>>;

    /// Poll the long-running operation until it completes.
    fn until_done(self) -> impl Future<Output = Result<R>>;

    /// Convert a poller to a [Stream].
    fn into_stream(self) -> impl Stream<Item = PollingResult<R>>;
}

/// Creates a poller for a new long-running operation.
///
/// `start` initiates the operation, `query` gets its status by name, and
/// `cancel` asks the service to cancel it. The poller calls `cancel` only if
/// the caller cancels the poller while the operation is in progress.
pub fn new_poller<R, S, SF, Q, QF, C, CF>(
    start: S,
    query: Q,
    cancel: C,
) -> OperationPoller<R, S, Q, C>
where
    S: FnOnce() -> SF,
    SF: Future<Output = Result<Operation<R>>>,
    Q: Fn(String) -> QF,
    QF: Future<Output = Result<Operation<R>>>,
    C: Fn(String) -> CF,
    CF: Future<Output = Result<()>> + Send + 'static,
{
    OperationPoller::new(Some(start), None, query, cancel)
}

type NoStart<R> = fn() -> std::future::Ready<Result<Operation<R>>>;

/// Creates a poller for an operation started elsewhere.
///
/// Use this to wait for an operation created by a previous run of the
/// application, or by a different process.
pub fn resume_poller<R, Q, QF, C, CF>(
    name: impl Into<String>,
    query: Q,
    cancel: C,
) -> OperationPoller<R, NoStart<R>, Q, C>
where
    Q: Fn(String) -> QF,
    QF: Future<Output = Result<Operation<R>>>,
    C: Fn(String) -> CF,
    CF: Future<Output = Result<()>> + Send + 'static,
{
    OperationPoller::new(None, Some(name.into()), query, cancel)
}

/// The [Poller] returned by [new_poller] and [resume_poller].
pub struct OperationPoller<R, S, Q, C> {
    start: Option<S>,
    query: Q,
    cancel: C,
    operation: Option<String>,
    backoff_pending: bool,
    state: RetryState,
    retry_policy: Arc<dyn RetryPolicy>,
    backoff_policy: Arc<dyn BackoffPolicy>,
    context: CallContext,
    response: PhantomData<fn() -> R>,
}

impl<R, S, Q, C> OperationPoller<R, S, Q, C> {
    fn new(start: Option<S>, operation: Option<String>, query: Q, cancel: C) -> Self {
        let config = ClientConfig::default();
        let context = CallContext::new(operation.as_deref().unwrap_or("long-running operation"));
        Self {
            start,
            query,
            cancel,
            operation,
            backoff_pending: false,
            state: RetryState::new(Idempotency::Idempotent),
            retry_policy: config.retry_policy(),
            backoff_policy: config.backoff_policy(),
            context,
            response: PhantomData,
        }
    }

    /// Sets the policy that bounds the polling loop and classifies errors.
    pub fn with_retry_policy<V: Into<RetryPolicyArg>>(mut self, v: V) -> Self {
        self.retry_policy = v.into().into();
        self
    }

    /// Sets the policy that controls the delay between queries.
    pub fn with_backoff_policy<V: Into<BackoffPolicyArg>>(mut self, v: V) -> Self {
        self.backoff_policy = v.into().into();
        self
    }

    /// Sets the token used to cancel the polling loop.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.context = self.context.with_cancellation(token);
        self
    }
}

impl<R, S, SF, Q, QF, C, CF> OperationPoller<R, S, Q, C>
where
    S: FnOnce() -> SF,
    SF: Future<Output = Result<Operation<R>>>,
    Q: Fn(String) -> QF,
    QF: Future<Output = Result<Operation<R>>>,
    C: Fn(String) -> CF,
    CF: Future<Output = Result<()>> + Send + 'static,
{
    async fn poll_impl(&mut self) -> Option<PollingResult<R>> {
        if let Some(start) = self.start.take() {
            self.state.attempt_count += 1;
            let result = tokio::select! {
                biased;
                _ = self.context.cancellation().cancelled() => {
                    return Some(PollingResult::Completed(Err(self.context.cancelled_error())));
                },
                r = start() => r,
            };
            let (op, poll) = details::handle_start(result);
            self.on_tick(op);
            return Some(poll);
        }
        let name = self.operation.take()?;
        if self.backoff_pending {
            let delay = self.backoff_policy.on_failure(&self.state);
            tracing::debug!(operation = name, ?delay, "waiting before next poll");
            tokio::select! {
                biased;
                _ = self.context.cancellation().cancelled() => {
                    return Some(PollingResult::Completed(Err(self.cancel_operation(name))));
                },
                _ = tokio::time::sleep(delay) => {},
            };
        }
        self.state.attempt_count += 1;
        let result = tokio::select! {
            biased;
            _ = self.context.cancellation().cancelled() => {
                return Some(PollingResult::Completed(Err(self.cancel_operation(name))));
            },
            r = (self.query)(name.clone()) => r,
        };
        let (op, poll) =
            details::handle_poll(self.retry_policy.as_ref(), &self.state, name, result);
        self.on_tick(op);
        Some(poll)
    }

    fn on_tick(&mut self, operation: Option<String>) {
        if let Some(name) = operation
            .as_deref()
            .filter(|n| *n != self.context.location())
        {
            let token = self.context.cancellation().clone();
            self.context = CallContext::new(name).with_cancellation(token);
        }
        self.backoff_pending = operation.is_some();
        self.operation = operation;
    }

    /// Sends a best-effort cancel request for `name`.
    ///
    /// The request runs in the background, its result is only logged.
    fn cancel_operation(&mut self, name: String) -> Error {
        self.backoff_pending = false;
        let pending = (self.cancel)(name.clone());
        tokio::spawn(async move {
            if let Err(e) = pending.await {
                tracing::warn!("cannot cancel operation {name}: {e}");
            }
        });
        self.context.cancelled_error()
    }
}

impl<R, S, SF, Q, QF, C, CF> Poller<R> for OperationPoller<R, S, Q, C>
where
    S: FnOnce() -> SF,
    SF: Future<Output = Result<Operation<R>>>,
    Q: Fn(String) -> QF,
    QF: Future<Output = Result<Operation<R>>>,
    C: Fn(String) -> CF,
    CF: Future<Output = Result<()>> + Send + 'static,
{
    async fn poll(&mut self) -> Option<PollingResult<R>> {
        let span = tracing::info_span!("lro_poll", operation = self.context.location());
        tracing::Instrument::instrument(self.poll_impl(), span).await
    }

    async fn until_done(mut self) -> Result<R> {
        while let Some(p) = self.poll().await {
            match p {
                // Keep polling
                PollingResult::InProgress | PollingResult::PollingError(_) => {}
                PollingResult::Completed(r) => return r,
            }
        }
        Err(Error::other("polling loop terminated without a result"))
    }

    fn into_stream(self) -> impl Stream<Item = PollingResult<R>> {
        use futures::stream::unfold;
        unfold(Some(self), move |state| async move {
            if let Some(mut poller) = state {
                if let Some(pr) = poller.poll().await {
                    return Some((pr, Some(poller)));
                }
            };
            None
        })
    }
}

mod details;
