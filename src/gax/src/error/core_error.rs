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

use super::rpc::Status;
use std::error::Error as StdError;

type BoxError = Box<dyn StdError + Send + Sync>;

/// The core error returned by the retry, streaming, and polling loops.
///
/// Errors come from multiple sources. The service may return an error, the
/// transport may fail to deliver the request or the response, the attempt may
/// time out, the retry policy may be exhausted, or the caller may cancel the
/// call.
///
/// Most applications will just return the error or log it. Some applications
/// need to tell "gave up after N attempts" apart from "the service rejected
/// the request". This type offers predicates for each kind, and exhausted
/// errors preserve the last error as their [source][std::error::Error::source].
///
/// # Example
/// ```
/// use google_cloud_resilience::error::Error;
/// match example_function() {
///     Err(e) if e.is_exhausted() => { println!("gave up retrying {e}"); },
///     Err(e) if e.status().is_some() => { println!("the service said no {e}"); },
///     Err(e) => { println!("some other error {e}"); },
///     Ok(_) => { println!("success, how boring"); },
/// }
///
/// fn example_function() -> Result<String, Error> {
///     // ... details omitted ...
///     # use google_cloud_resilience::error::rpc::{Code, Status};
///     # Err(Error::service(Status::default().set_code(Code::NotFound).set_message("NOT FOUND")))
/// }
/// ```
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<BoxError>,
}

impl Error {
    /// Creates an error with the information returned by the service.
    ///
    /// # Example
    /// ```
    /// use google_cloud_resilience::error::Error;
    /// use google_cloud_resilience::error::rpc::{Code, Status};
    /// let status = Status::default().set_code(Code::NotFound).set_message("NOT FOUND");
    /// let error = Error::service(status.clone());
    /// assert_eq!(error.status(), Some(&status));
    /// ```
    pub fn service(status: Status) -> Self {
        Self {
            kind: ErrorKind::Service(Box::new(status)),
            source: None,
        }
    }

    /// Creates an error representing a timeout.
    pub fn timeout<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            source: Some(source.into()),
        }
    }

    /// The attempt could not be completed before its deadline.
    ///
    /// This is always a client-side generated error. The request may or may
    /// not have reached the service, so it may or may not be safe to attempt
    /// the request again.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Creates an error representing an exhausted policy.
    ///
    /// The retry loops use the last error as the source.
    ///
    /// # Example
    /// ```
    /// use std::error::Error as _;
    /// use google_cloud_resilience::error::Error;
    /// let error = Error::exhausted("too many retry attempts");
    /// assert!(error.is_exhausted());
    /// assert!(error.source().is_some());
    /// ```
    pub fn exhausted<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Exhausted,
            source: Some(source.into()),
        }
    }

    /// The request could not complete before the retry policy expired.
    ///
    /// The retry loop gave up on a retryable error, because the policy only
    /// allows a limited number of attempts or a limited amount of time. Use
    /// [last_error][Error::last_error] to examine the error that caused the
    /// final attempt to fail.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.kind, ErrorKind::Exhausted)
    }

    /// Returns the error that caused the last attempt to fail, if this is an
    /// exhausted error wrapping an [Error].
    pub fn last_error(&self) -> Option<&Error> {
        match self.kind {
            ErrorKind::Exhausted => self
                .source
                .as_ref()
                .and_then(|e| e.downcast_ref::<Error>()),
            _ => None,
        }
    }

    /// Creates an error representing a cancelled call.
    pub fn cancelled<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            source: Some(source.into()),
        }
    }

    /// The caller cancelled the call before it completed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Creates an error representing an I/O problem.
    ///
    /// Use this for errors detected while sending the request or receiving
    /// the response, before any status was received from the service.
    pub fn io<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Io,
            source: Some(source.into()),
        }
    }

    /// A problem sending the request or receiving the response.
    pub fn is_io(&self) -> bool {
        matches!(self.kind, ErrorKind::Io)
    }

    /// Creates an error representing a deserialization problem.
    pub fn deser<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Deserialization,
            source: Some(source.into()),
        }
    }

    /// The response could not be deserialized.
    ///
    /// Retrying is unlikely to help, the same response would fail the same way.
    pub fn is_deserialization(&self) -> bool {
        matches!(self.kind, ErrorKind::Deserialization)
    }

    /// Creates an unclassified error.
    pub fn other<T: Into<BoxError>>(source: T) -> Self {
        Self {
            kind: ErrorKind::Other,
            source: Some(source.into()),
        }
    }

    /// The [Status] returned by the service, if any.
    pub fn status(&self) -> Option<&Status> {
        match &self.kind {
            ErrorKind::Service(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    /// Returns true if the error may go away if the request is attempted
    /// again.
    ///
    /// Service errors are classified by their [Code][super::rpc::Code]. I/O
    /// errors and timeouts are transient. Exhausted, cancelled,
    /// deserialization, and unclassified errors are not.
    pub fn is_transient(&self) -> bool {
        match &self.kind {
            ErrorKind::Service(s) => s.code.is_transient(),
            ErrorKind::Io | ErrorKind::Timeout => true,
            ErrorKind::Exhausted
            | ErrorKind::Cancelled
            | ErrorKind::Deserialization
            | ErrorKind::Other => false,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.kind, &self.source) {
            (ErrorKind::Service(s), _) => {
                write!(
                    f,
                    "the service reports an error with code {} described as: {}",
                    s.code, s.message
                )
            }
            (ErrorKind::Timeout, Some(e)) => {
                write!(f, "the request exceeded the request deadline {e}")
            }
            (ErrorKind::Exhausted, Some(e)) => {
                write!(f, "the retry policy is exhausted, last error: {e}")
            }
            (ErrorKind::Cancelled, Some(e)) => write!(f, "the call was cancelled: {e}"),
            (ErrorKind::Io, Some(e)) => write!(f, "the transport reports an error: {e}"),
            (ErrorKind::Deserialization, Some(e)) => {
                write!(f, "cannot deserialize the response {e}")
            }
            (ErrorKind::Other, Some(e)) => {
                write!(f, "an unclassified problem making a request: {e}")
            }
            (_, None) => unreachable!("no constructor allows this"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error))
    }
}

/// The type of error held by an [Error] instance.
#[derive(Debug)]
enum ErrorKind {
    Service(Box<Status>),
    Io,
    Timeout,
    Exhausted,
    Cancelled,
    Deserialization,
    /// A uncategorized error.
    Other,
}
