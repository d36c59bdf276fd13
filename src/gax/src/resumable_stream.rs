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

//! Resumes server-streaming calls after transient failures.
//!
//! A server-streaming call may break in the middle of the stream. Reopening
//! the stream with the original request would deliver the same items again.
//! Instead, each request type describes how to continue after the last item
//! it received, via [ResumableRequest], and the stream is reopened from that
//! position.
//!
//! The retry and backoff policies decide whether and when to reopen the
//! stream, exactly as they do for unary calls. Receiving an item resets the
//! failure count, so the retry policy limits the number of consecutive
//! failures without progress.

use crate::Result;
use crate::backoff_policy::BackoffPolicy;
use crate::error::Error;
use crate::idempotency::Idempotency;
use crate::retry_loop::{CallContext, classify_error, exhausted};
use crate::retry_policy::RetryPolicy;
use crate::retry_result::RetryResult;
use crate::retry_state::RetryState;
use futures::{Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tracing::Instrument;

/// Request types for resumable streams implement this trait.
///
/// # Example
/// ```
/// # use google_cloud_resilience::resumable_stream::ResumableRequest;
/// #[derive(Clone)]
/// struct ReadObject { name: String, offset: u64 }
/// struct Chunk { offset: u64, data: Vec<u8> }
///
/// impl ResumableRequest<Chunk> for ReadObject {
///     fn resume_from(&mut self, item: &Chunk) {
///         self.offset = item.offset + item.data.len() as u64;
///     }
/// }
/// ```
pub trait ResumableRequest<Item> {
    /// Update the request to continue after `item`.
    ///
    /// Called before `item` is delivered to the application.
    fn resume_from(&mut self, item: &Item);
}

/// Creates a stream that reopens the underlying call after transient failures.
///
/// `factory` opens the stream for a given request. It is called once before
/// the first item is requested, and again after each retryable failure with
/// the request updated to resume after the last delivered item.
///
/// The returned stream is lazy: nothing happens until it is polled. It
/// yields each item as soon as it arrives. A permanent error, a transient
/// error for a non-idempotent request, an exhausted retry policy, or a
/// cancellation is yielded once, and then the stream ends.
pub fn resumable_stream<Request, Item, F, Fut, S>(
    request: Request,
    factory: F,
    idempotency: Idempotency,
    retry_policy: Arc<dyn RetryPolicy>,
    backoff_policy: Arc<dyn BackoffPolicy>,
    context: CallContext,
) -> impl Stream<Item = Result<Item>>
where
    Request: ResumableRequest<Item> + Clone,
    F: Fn(Request) -> Fut,
    Fut: Future<Output = Result<S>>,
    S: Stream<Item = Result<Item>> + Unpin,
{
    let span = tracing::info_span!("resumable_stream", location = context.location());
    let resumable = Resumable {
        request,
        factory,
        stream: None,
        state: RetryState::new(idempotency),
        retry_policy,
        backoff_policy,
        context,
    };
    futures::stream::unfold(Some(resumable), move |state| {
        let span = span.clone();
        async move {
            let mut resumable = state?;
            match resumable.next().instrument(span).await? {
                Ok(item) => Some((Ok(item), Some(resumable))),
                Err(e) => Some((Err(e), None)),
            }
        }
    })
}

struct Resumable<Request, F, S> {
    request: Request,
    factory: F,
    stream: Option<S>,
    state: RetryState,
    retry_policy: Arc<dyn RetryPolicy>,
    backoff_policy: Arc<dyn BackoffPolicy>,
    context: CallContext,
}

impl<Request, Item, F, Fut, S> Resumable<Request, F, S>
where
    Request: ResumableRequest<Item> + Clone,
    F: Fn(Request) -> Fut,
    Fut: Future<Output = Result<S>>,
    S: Stream<Item = Result<Item>> + Unpin,
{
    async fn next(&mut self) -> Option<Result<Item>> {
        loop {
            if self.stream.is_none() {
                let open = tokio::select! {
                    biased;
                    _ = self.context.cancellation().cancelled() => {
                        return Some(Err(self.context.cancelled_error()));
                    },
                    r = (self.factory)(self.request.clone()) => r,
                };
                match open {
                    Ok(s) => self.stream = Some(s),
                    Err(e) => {
                        if let Err(e) = self.on_failure(e).await {
                            return Some(Err(e));
                        }
                        continue;
                    }
                }
            }
            let Some(stream) = self.stream.as_mut() else {
                return None;
            };
            let next = tokio::select! {
                biased;
                _ = self.context.cancellation().cancelled() => {
                    self.stream = None;
                    return Some(Err(self.context.cancelled_error()));
                },
                n = stream.next() => n,
            };
            match next {
                None => return None,
                Some(Ok(item)) => {
                    self.request.resume_from(&item);
                    self.state.attempt_count = 0;
                    return Some(Ok(item));
                }
                Some(Err(e)) => {
                    self.stream = None;
                    if let Err(e) = self.on_failure(e).await {
                        return Some(Err(e));
                    }
                }
            }
        }
    }

    /// Returns `Ok(())` if the stream should be reopened.
    async fn on_failure(&mut self, error: Error) -> Result<()> {
        self.state.attempt_count += 1;
        let error = match classify_error(self.retry_policy.as_ref(), &self.state, error) {
            RetryResult::Permanent(e) => return Err(e),
            RetryResult::Exhausted(e) => return Err(exhausted(&self.state, e)),
            RetryResult::Continue(e) => e,
        };
        let delay = self.backoff_policy.on_failure(&self.state);
        if self
            .retry_policy
            .remaining_time(&self.state)
            .is_some_and(|remaining| remaining < delay)
        {
            return Err(exhausted(&self.state, error));
        }
        tracing::debug!(
            attempt_count = self.state.attempt_count,
            ?delay,
            "reopening stream after transient error: {error}"
        );
        tokio::select! {
            biased;
            _ = self.context.cancellation().cancelled() => {
                return Err(self.context.cancelled_error());
            },
            _ = tokio::time::sleep(delay) => {},
        };
        if self.retry_policy.is_exhausted(&self.state) {
            return Err(exhausted(&self.state, error));
        }
        Ok(())
    }
}
