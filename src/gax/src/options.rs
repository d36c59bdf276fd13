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

//! Client configuration and per request options.
//!
//! While the defaults are intended to work for most applications, it is
//! sometimes necessary to change the configuration. Applications sometimes
//! change the timeout for a specific call, or change the retry configuration.
//!
//! [ClientConfig] holds the defaults for all the calls made by a client.
//! [RequestOptions] holds the overrides for a single call. Use
//! [ClientConfig::request_options] to combine both before starting a call.
//! [RetryConfig] describes the numeric tunables in a form that can be loaded
//! from a configuration file.

use crate::backoff_policy::{BackoffPolicy, BackoffPolicyArg};
use crate::exponential_backoff::{self, ExponentialBackoff, ExponentialBackoffBuilder, Jitter};
use crate::idempotency::Idempotency;
use crate::retry_policy::{Recommended, RetryPolicy, RetryPolicyArg, RetryPolicyExt};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_RETRY_DURATION: Duration = Duration::from_secs(600);

/// A set of options configuring a single request.
///
/// Unset options use the client defaults, see [ClientConfig::request_options].
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    idempotency: Option<Idempotency>,
    attempt_timeout: Option<Duration>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    backoff_policy: Option<Arc<dyn BackoffPolicy>>,
}

impl RequestOptions {
    /// Gets the idempotency override.
    pub fn idempotency(&self) -> Option<Idempotency> {
        self.idempotency
    }

    /// Overrides the idempotency computed from the request.
    ///
    /// Only idempotent requests are retried after a transient failure. Some
    /// applications know a request is safe to repeat even though the request
    /// itself cannot show it.
    pub fn set_idempotency(&mut self, value: Idempotency) {
        self.idempotency = Some(value);
    }

    /// Set the idempotency for the request unless it is already set.
    ///
    /// If [set_idempotency][Self::set_idempotency] was already called this
    /// method has no effect.
    pub fn set_default_idempotency(&mut self, default: Idempotency) {
        self.idempotency.get_or_insert(default);
    }

    /// Sets the per-attempt timeout.
    ///
    /// When using a retry loop, this affects the timeout for each attempt. The
    /// overall timeout for a request is set by the retry policy.
    pub fn set_attempt_timeout<T: Into<Duration>>(&mut self, v: T) {
        self.attempt_timeout = Some(v.into());
    }

    /// Gets the current per-attempt timeout.
    pub fn attempt_timeout(&self) -> &Option<Duration> {
        &self.attempt_timeout
    }

    /// Get the current retry policy override, if any.
    pub fn retry_policy(&self) -> &Option<Arc<dyn RetryPolicy>> {
        &self.retry_policy
    }

    /// Sets the retry policy configuration.
    pub fn set_retry_policy<V: Into<RetryPolicyArg>>(&mut self, v: V) {
        self.retry_policy = Some(v.into().into());
    }

    /// Get the current backoff policy override, if any.
    pub fn backoff_policy(&self) -> &Option<Arc<dyn BackoffPolicy>> {
        &self.backoff_policy
    }

    /// Sets the backoff policy configuration.
    pub fn set_backoff_policy<V: Into<BackoffPolicyArg>>(&mut self, v: V) {
        self.backoff_policy = Some(v.into().into());
    }
}

/// Implementations of this trait provide setters to configure request options.
///
/// Request builders hold the request and its [RequestOptions]. Implement
/// [RequestBuilder][internal::RequestBuilder] to get these setters.
pub trait RequestOptionsBuilder: internal::RequestBuilder {
    /// Overrides the idempotency of the request.
    fn with_idempotency(self, v: Idempotency) -> Self;

    /// Sets the per-attempt timeout.
    fn with_attempt_timeout<V: Into<Duration>>(self, v: V) -> Self;

    /// Sets the retry policy configuration.
    fn with_retry_policy<V: Into<RetryPolicyArg>>(self, v: V) -> Self;

    /// Sets the backoff policy configuration.
    fn with_backoff_policy<V: Into<BackoffPolicyArg>>(self, v: V) -> Self;
}

pub mod internal {
    //! Types used by request builders to access their options.
    use super::RequestOptions;

    pub trait RequestBuilder {
        fn request_options(&mut self) -> &mut RequestOptions;
    }
}

impl<T> RequestOptionsBuilder for T
where
    T: internal::RequestBuilder,
{
    fn with_idempotency(mut self, v: Idempotency) -> Self {
        self.request_options().set_idempotency(v);
        self
    }

    fn with_attempt_timeout<V: Into<Duration>>(mut self, v: V) -> Self {
        self.request_options().set_attempt_timeout(v);
        self
    }

    fn with_retry_policy<V: Into<RetryPolicyArg>>(mut self, v: V) -> Self {
        self.request_options().set_retry_policy(v);
        self
    }

    fn with_backoff_policy<V: Into<BackoffPolicyArg>>(mut self, v: V) -> Self {
        self.request_options().set_backoff_policy(v);
        self
    }
}

/// Configure a client.
///
/// A client is a struct used to make calls to a service. Each call uses the
/// defaults set here unless its [RequestOptions] override them.
///
/// # Example
/// ```
/// # use google_cloud_resilience::options::ClientConfig;
/// # use google_cloud_resilience::retry_policy::*;
/// use std::time::Duration;
/// let config = ClientConfig::new()
///     .set_retry_policy(Recommended.with_attempt_limit(5))
///     .set_attempt_timeout(Duration::from_secs(30));
/// ```
#[derive(Clone, Debug, Default)]
pub struct ClientConfig {
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    backoff_policy: Option<Arc<dyn BackoffPolicy>>,
    attempt_timeout: Option<Duration>,
}

impl ClientConfig {
    /// Returns a default [ClientConfig].
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the retry policy.
    pub fn set_retry_policy<V: Into<RetryPolicyArg>>(mut self, v: V) -> Self {
        self.retry_policy = Some(v.into().into());
        self
    }

    /// Configure the retry backoff policy.
    pub fn set_backoff_policy<V: Into<BackoffPolicyArg>>(mut self, v: V) -> Self {
        self.backoff_policy = Some(v.into().into());
        self
    }

    /// Configure the default per-attempt timeout.
    pub fn set_attempt_timeout<V: Into<Duration>>(mut self, v: V) -> Self {
        self.attempt_timeout = Some(v.into());
        self
    }

    /// The retry policy used by calls that do not override it.
    ///
    /// Without any configuration this is [Recommended] limited to 10 minutes.
    pub fn retry_policy(&self) -> Arc<dyn RetryPolicy> {
        self.retry_policy
            .clone()
            .unwrap_or_else(default_retry_policy)
    }

    /// The backoff policy used by calls that do not override it.
    ///
    /// Without any configuration this is [ExponentialBackoff::default].
    pub fn backoff_policy(&self) -> Arc<dyn BackoffPolicy> {
        self.backoff_policy
            .clone()
            .unwrap_or_else(default_backoff_policy)
    }

    /// Fills any option not set in `options` with the client defaults.
    pub fn request_options(&self, mut options: RequestOptions) -> RequestOptions {
        if options.retry_policy.is_none() {
            options.retry_policy = Some(self.retry_policy());
        }
        if options.backoff_policy.is_none() {
            options.backoff_policy = Some(self.backoff_policy());
        }
        if options.attempt_timeout.is_none() {
            options.attempt_timeout = self.attempt_timeout;
        }
        options
    }
}

pub(crate) fn default_retry_policy() -> Arc<dyn RetryPolicy> {
    Arc::new(Recommended.with_time_limit(DEFAULT_RETRY_DURATION))
}

pub(crate) fn default_backoff_policy() -> Arc<dyn BackoffPolicy> {
    Arc::new(ExponentialBackoff::default())
}

/// The numeric tunables of the retry and backoff policies.
///
/// Durations are expressed in milliseconds. Missing fields use the defaults.
///
/// # Example
/// ```
/// # use google_cloud_resilience::options::RetryConfig;
/// let config: RetryConfig = serde_json::from_str(r#"{
///     "maxFailures": 5,
///     "initialDelay": 100,
///     "maximumDelay": 5000,
///     "jitter": "full"
/// }"#)?;
/// let retry = config.retry_policy();
/// let backoff = config.backoff_policy()?;
/// # Ok::<(), anyhow::Error>(())
/// ```
#[serde_with::serde_as]
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    /// The number of failures tolerated before giving up.
    pub max_failures: Option<u32>,
    /// The total time spent in the retry loop, including backoff.
    #[serde_as(as = "Option<serde_with::DurationMilliSeconds<u64>>")]
    pub max_duration: Option<Duration>,
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub initial_delay: Duration,
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub maximum_delay: Duration,
    pub scaling: f64,
    pub jitter: Jitter,
}

impl RetryConfig {
    /// Builds the retry policy: [Recommended] with the configured limits.
    pub fn retry_policy(&self) -> Arc<dyn RetryPolicy> {
        match (self.max_failures, self.max_duration) {
            (None, None) => Arc::new(Recommended),
            (Some(n), None) => Arc::new(Recommended.with_attempt_limit(n)),
            (None, Some(d)) => Arc::new(Recommended.with_time_limit(d)),
            (Some(n), Some(d)) => Arc::new(Recommended.with_attempt_limit(n).with_time_limit(d)),
        }
    }

    /// Builds the backoff policy, validating the parameters.
    pub fn backoff_policy(&self) -> Result<ExponentialBackoff, exponential_backoff::Error> {
        ExponentialBackoffBuilder::new()
            .with_initial_delay(self.initial_delay)
            .with_maximum_delay(self.maximum_delay)
            .with_scaling(self.scaling)
            .with_jitter(self.jitter)
            .build()
    }
}

impl std::default::Default for RetryConfig {
    fn default() -> Self {
        let backoff = ExponentialBackoff::default();
        Self {
            max_failures: None,
            max_duration: Some(DEFAULT_RETRY_DURATION),
            initial_delay: backoff.initial_delay(),
            maximum_delay: backoff.maximum_delay(),
            scaling: backoff.scaling(),
            jitter: backoff.jitter(),
        }
    }
}
