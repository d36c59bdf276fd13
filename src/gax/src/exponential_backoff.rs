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

//! Common implements for exponential backoff.
//!
//! This module provides an implementation of truncated [exponential backoff]
//! with configurable jitter. It implements the [BackoffPolicy] trait.
//!
//! [BackoffPolicy]: crate::backoff_policy::BackoffPolicy
//! [exponential backoff]: https://en.wikipedia.org/wiki/Exponential_backoff

use crate::retry_state::RetryState;
use std::time::Duration;

const MAXIMUM_SCALING: f64 = 32.0;
const MINIMUM_CLAMPED_SCALING: f64 = 1.1;

/// The error type for exponential backoff creation.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("the scaling value ({0}) should be > 1.0")]
    InvalidScalingFactor(f64),
    #[error("the initial delay ({0:?}) should be greater than zero")]
    InvalidInitialDelay(Duration),
    #[error(
        "the maximum delay ({maximum:?}) should be greater than or equal to the initial delay ({initial:?})"
    )]
    EmptyRange {
        maximum: Duration,
        initial: Duration,
    },
}

/// Controls how the computed delay is randomized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Jitter {
    /// Use the computed delay unchanged. Mostly useful in tests.
    None,
    /// Pick a delay uniformly in `[delay / 2, delay]`.
    #[default]
    Half,
    /// Pick a delay uniformly in `[0, delay]`.
    Full,
}

/// Implements truncated exponential backoff with jitter.
#[derive(Clone, Debug)]
pub struct ExponentialBackoffBuilder {
    initial_delay: Duration,
    maximum_delay: Duration,
    scaling: f64,
    jitter: Jitter,
}

impl ExponentialBackoffBuilder {
    /// Creates a builder with the default parameters.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_resilience::exponential_backoff::Error;
    /// # use google_cloud_resilience::exponential_backoff::ExponentialBackoffBuilder;
    /// use std::time::Duration;
    ///
    /// let policy = ExponentialBackoffBuilder::new()
    ///         .with_initial_delay(Duration::from_millis(100))
    ///         .with_maximum_delay(Duration::from_secs(5))
    ///         .with_scaling(4.0)
    ///         .build()?;
    /// # Ok::<(), Error>(())
    /// ```
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            maximum_delay: Duration::from_secs(60),
            scaling: 2.0,
            jitter: Jitter::default(),
        }
    }

    /// Change the initial delay.
    pub fn with_initial_delay<V: Into<Duration>>(mut self, v: V) -> Self {
        self.initial_delay = v.into();
        self
    }

    /// Change the maximum delay.
    pub fn with_maximum_delay<V: Into<Duration>>(mut self, v: V) -> Self {
        self.maximum_delay = v.into();
        self
    }

    /// Change the scaling factor in this backoff policy.
    pub fn with_scaling<V: Into<f64>>(mut self, v: V) -> Self {
        self.scaling = v.into();
        self
    }

    /// Change the jitter applied to each delay.
    pub fn with_jitter(mut self, v: Jitter) -> Self {
        self.jitter = v;
        self
    }

    /// Creates a new exponential backoff policy.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_resilience::exponential_backoff::Error;
    /// # use google_cloud_resilience::exponential_backoff::ExponentialBackoffBuilder;
    /// # use google_cloud_resilience::backoff_policy::BackoffPolicy;
    /// # use google_cloud_resilience::retry_state::RetryState;
    /// use std::time::Duration;
    /// let backoff = ExponentialBackoffBuilder::new()
    ///     .with_initial_delay(Duration::from_secs(5))
    ///     .with_maximum_delay(Duration::from_secs(50))
    ///     .with_scaling(2.0)
    ///     .build()?;
    /// let p = backoff.on_failure(&RetryState::default().set_attempt_count(1_u32));
    /// assert!(p <= Duration::from_secs(5));
    /// let p = backoff.on_failure(&RetryState::default().set_attempt_count(2_u32));
    /// assert!(p <= Duration::from_secs(10));
    /// # Ok::<(), Error>(())
    /// ```
    pub fn build(self) -> Result<ExponentialBackoff, Error> {
        if self.scaling.is_nan() || self.scaling <= 1.0 {
            return Err(Error::InvalidScalingFactor(self.scaling));
        }
        if self.initial_delay.is_zero() {
            return Err(Error::InvalidInitialDelay(self.initial_delay));
        }
        if self.maximum_delay < self.initial_delay {
            return Err(Error::EmptyRange {
                maximum: self.maximum_delay,
                initial: self.initial_delay,
            });
        }
        Ok(ExponentialBackoff {
            initial_delay: self.initial_delay,
            maximum_delay: self.maximum_delay,
            scaling: self.scaling,
            jitter: self.jitter,
        })
    }

    /// Creates a new exponential backoff policy clamping the ranges towards
    /// recommended values.
    ///
    /// The maximum delay is clamped first, to be between one millisecond and
    /// one day (both inclusive). The upper value is hardly useful, typically
    /// the retry policy would expire earlier than such a long backoff.
    ///
    /// Then the initial delay is clamped to be between one millisecond and the
    /// maximum delay.
    ///
    /// Finally, the scaling factor is clamped to the `[1.1, 32.0]` range. A
    /// `NaN` scaling factor is replaced by the default.
    ///
    /// # Example
    /// ```
    /// # use google_cloud_resilience::exponential_backoff::ExponentialBackoffBuilder;
    /// # use google_cloud_resilience::backoff_policy::BackoffPolicy;
    /// # use google_cloud_resilience::retry_state::RetryState;
    /// use std::time::Duration;
    /// let backoff = ExponentialBackoffBuilder::new().with_scaling(0.5).clamp();
    /// assert!(backoff.on_failure(&RetryState::default().set_attempt_count(1_u32)) > Duration::ZERO);
    /// ```
    pub fn clamp(self) -> ExponentialBackoff {
        let scaling = if self.scaling.is_nan() {
            2.0
        } else {
            self.scaling.clamp(MINIMUM_CLAMPED_SCALING, MAXIMUM_SCALING)
        };
        let maximum_delay = self
            .maximum_delay
            .clamp(Duration::from_millis(1), Duration::from_secs(24 * 60 * 60));
        let initial_delay = self
            .initial_delay
            .clamp(Duration::from_millis(1), maximum_delay);
        ExponentialBackoff {
            initial_delay,
            maximum_delay,
            scaling,
            jitter: self.jitter,
        }
    }
}

impl Default for ExponentialBackoffBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Implements truncated exponential backoff.
///
/// The policy holds no mutable state. The delay is a function of the attempt
/// count in the [RetryState], which each call creates fresh.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    maximum_delay: Duration,
    scaling: f64,
    jitter: Jitter,
}

impl ExponentialBackoff {
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn maximum_delay(&self) -> Duration {
        self.maximum_delay
    }

    pub fn scaling(&self) -> f64 {
        self.scaling
    }

    pub fn jitter(&self) -> Jitter {
        self.jitter
    }

    /// The delay before jitter: `min(maximum, initial * scaling^(attempt - 1))`.
    fn delay(&self, attempt_count: u32) -> Duration {
        let exp = std::cmp::min(i32::MAX as u32, attempt_count) as i32;
        let exp = exp.saturating_sub(1);
        let scaling = self.scaling.powi(exp);
        if scaling >= self.maximum_delay.div_duration_f64(self.initial_delay) {
            self.maximum_delay
        } else {
            // .mul_f64() cannot assert because (1) we guarantee scaling >= 1.0,
            // and (2) we just checked that
            //     self.initial_delay * scaling < maximum_delay.
            self.initial_delay.mul_f64(scaling)
        }
    }

    fn delay_with_jitter(&self, attempt_count: u32, rng: &mut impl rand::Rng) -> Duration {
        let delay = self.delay(attempt_count);
        match self.jitter {
            Jitter::None => delay,
            Jitter::Full => rng.random_range(Duration::ZERO..=delay),
            Jitter::Half => {
                let half = delay / 2;
                half + rng.random_range(Duration::ZERO..=(delay - half))
            }
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            maximum_delay: Duration::from_secs(60),
            scaling: 2.0,
            jitter: Jitter::default(),
        }
    }
}

impl crate::backoff_policy::BackoffPolicy for ExponentialBackoff {
    fn on_failure(&self, state: &RetryState) -> Duration {
        self.delay_with_jitter(state.attempt_count, &mut rand::rng())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff_policy::BackoffPolicy;
    use crate::mock_rng::MockRng;
    use test_case::test_case;

    fn state(attempt_count: u32) -> RetryState {
        RetryState::default().set_attempt_count(attempt_count)
    }

    #[test]
    fn exponential_build_errors() {
        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::ZERO)
            .with_maximum_delay(Duration::from_secs(5))
            .build();
        assert!(matches!(b, Err(Error::InvalidInitialDelay(_))), "{b:?}");
        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_secs(10))
            .with_maximum_delay(Duration::from_secs(5))
            .build();
        assert!(matches!(b, Err(Error::EmptyRange { .. })), "{b:?}");
    }

    #[test_case(-1.0)]
    #[test_case(0.0)]
    #[test_case(0.5)]
    #[test_case(1.0)]
    #[test_case(f64::NAN)]
    fn exponential_build_invalid_scaling(scaling: f64) {
        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_maximum_delay(Duration::from_secs(60))
            .with_scaling(scaling)
            .build();
        assert!(matches!(b, Err(Error::InvalidScalingFactor(_))), "{b:?}");
    }

    #[test]
    fn exponential_build_limits() {
        let r = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_maximum_delay(Duration::MAX)
            .build();
        assert!(r.is_ok(), "{r:?}");

        let r = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_nanos(1))
            .with_maximum_delay(Duration::MAX)
            .with_scaling(1.000001)
            .build();
        assert!(r.is_ok(), "{r:?}");
    }

    #[test]
    fn exponential_builder_defaults() {
        let r = ExponentialBackoffBuilder::new().build();
        assert!(r.is_ok(), "{r:?}");
        let r = ExponentialBackoffBuilder::default().build();
        assert!(r.is_ok(), "{r:?}");
    }

    #[test_case(Duration::from_secs(1), Duration::MAX, 0.5; "scaling below range")]
    #[test_case(Duration::from_secs(1), Duration::MAX, 1_000_000.0; "scaling over range")]
    #[test_case(Duration::from_secs(1), Duration::MAX, f64::NAN; "scaling is nan")]
    #[test_case(Duration::from_secs(1), Duration::MAX, 8.0; "max over range")]
    #[test_case(Duration::from_secs(1), Duration::ZERO, 8.0; "max below range")]
    #[test_case(Duration::from_secs(10), Duration::ZERO, 8.0; "init over range")]
    #[test_case(Duration::ZERO, Duration::ZERO, 8.0; "init below range")]
    fn exponential_clamp(init: Duration, max: Duration, scaling: f64) {
        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(init)
            .with_maximum_delay(max)
            .with_scaling(scaling)
            .clamp();
        assert_eq!(
            b.scaling.clamp(MINIMUM_CLAMPED_SCALING, MAXIMUM_SCALING),
            b.scaling
        );
        assert_eq!(
            b.initial_delay
                .clamp(Duration::from_millis(1), b.maximum_delay),
            b.initial_delay
        );
        assert_eq!(
            b.maximum_delay
                .clamp(b.initial_delay, Duration::from_secs(24 * 60 * 60)),
            b.maximum_delay
        );
    }

    #[test]
    fn exponential_scaling() {
        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_maximum_delay(Duration::from_secs(4))
            .with_scaling(2.0)
            .build()
            .expect("should succeed with the hard-coded test values");

        assert_eq!(b.delay(1), Duration::from_secs(1));
        assert_eq!(b.delay(2), Duration::from_secs(2));
        assert_eq!(b.delay(3), Duration::from_secs(4));
        assert_eq!(b.delay(4), Duration::from_secs(4));
        assert_eq!(b.delay(u32::MAX), Duration::from_secs(4));
    }

    #[test_case(1.5)]
    #[test_case(2.0)]
    #[test_case(3.7)]
    #[test_case(32.0)]
    fn exponential_delay_is_monotonic(scaling: f64) {
        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_millis(10))
            .with_maximum_delay(Duration::from_secs(30))
            .with_scaling(scaling)
            .build()
            .expect("should succeed with the hard-coded test values");
        let mut previous = Duration::ZERO;
        for attempt in 1..100 {
            let delay = b.delay(attempt);
            assert!(delay >= previous, "{attempt} {delay:?} {previous:?}");
            assert!(delay <= Duration::from_secs(30), "{attempt} {delay:?}");
            previous = delay;
        }
        assert_eq!(previous, Duration::from_secs(30));
    }

    #[test]
    fn exponential_no_jitter() {
        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_maximum_delay(Duration::from_millis(1000))
            .with_scaling(2.0)
            .with_jitter(Jitter::None)
            .build()
            .expect("should succeed with the hard-coded test values");
        assert_eq!(b.on_failure(&state(1)), Duration::from_millis(100));
        assert_eq!(b.on_failure(&state(2)), Duration::from_millis(200));
        assert_eq!(b.on_failure(&state(3)), Duration::from_millis(400));
        assert_eq!(b.on_failure(&state(4)), Duration::from_millis(800));
        assert_eq!(b.on_failure(&state(5)), Duration::from_millis(1000));
    }

    #[test]
    fn exponential_full_jitter() {
        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_secs(10))
            .with_maximum_delay(Duration::from_secs(10))
            .with_jitter(Jitter::Full)
            .build()
            .expect("should succeed with the hard-coded test values");

        let mut rng = MockRng::new(1);
        assert_eq!(b.delay_with_jitter(1, &mut rng), Duration::ZERO);

        let mut rng = MockRng::new(u64::MAX);
        assert_eq!(b.delay_with_jitter(3, &mut rng), Duration::from_secs(10));
    }

    #[test]
    fn exponential_half_jitter() {
        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_maximum_delay(Duration::from_secs(4))
            .with_scaling(2.0)
            .with_jitter(Jitter::Half)
            .build()
            .expect("should succeed with the hard-coded test values");

        let mut rng = MockRng::new(1);
        assert_eq!(b.delay_with_jitter(1, &mut rng), Duration::from_millis(500));
        let mut rng = MockRng::new(1);
        assert_eq!(b.delay_with_jitter(3, &mut rng), Duration::from_secs(2));

        let mut rng = MockRng::new(u64::MAX);
        assert_eq!(b.delay_with_jitter(1, &mut rng), Duration::from_secs(1));
        let mut rng = MockRng::new(u64::MAX);
        assert_eq!(b.delay_with_jitter(4, &mut rng), Duration::from_secs(4));
    }

    #[test_case(Jitter::Half, 2)]
    #[test_case(Jitter::Full, 1)]
    fn on_failure_in_range(jitter: Jitter, divisor: u32) {
        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_maximum_delay(Duration::from_secs(4))
            .with_scaling(2.0)
            .with_jitter(jitter)
            .build()
            .expect("should succeed with the hard-coded test values");

        for attempt in 1..=6 {
            let want = b.delay(attempt);
            let lower = if divisor == 1 { Duration::ZERO } else { want / divisor };
            let d = b.on_failure(&state(attempt));
            assert!(lower <= d && d <= want, "{attempt} {d:?} {want:?}");
            assert!(d <= Duration::from_secs(4), "{d:?}");
        }
    }

    #[test]
    fn default() {
        let b = ExponentialBackoff::default();
        assert_eq!(b.jitter, Jitter::Half);

        let mut rng = MockRng::new(u64::MAX);
        let next = 2 * b.delay_with_jitter(1, &mut rng);

        let mut rng = MockRng::new(u64::MAX);
        assert_eq!(b.delay_with_jitter(2, &mut rng), next);
        let next = 2 * next;

        let mut rng = MockRng::new(u64::MAX);
        assert_eq!(b.delay_with_jitter(3, &mut rng), next);
    }

    #[test]
    fn shared_between_calls() {
        // The policy holds no counters, two calls starting at the same time
        // observe the same un-jittered sequence.
        let b = ExponentialBackoffBuilder::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_maximum_delay(Duration::from_secs(1))
            .with_jitter(Jitter::None)
            .build()
            .expect("should succeed with the hard-coded test values");
        let first: Vec<_> = (1..=3).map(|a| b.on_failure(&state(a))).collect();
        let second: Vec<_> = (1..=3).map(|a| b.on_failure(&state(a))).collect();
        assert_eq!(first, second);
    }
}
