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

//! Simplifies the implementation of `OperationPoller`

use super::*;
use gax::retry_loop::classify_error;
use gax::retry_policy::RetryPolicy;
use gax::retry_result::RetryResult;
use gax::retry_state::RetryState;

pub(crate) fn handle_start<R>(result: Result<Operation<R>>) -> (Option<String>, PollingResult<R>) {
    match result {
        Err(e) => (None, PollingResult::Completed(Err(e))),
        Ok(op) => handle_common(op),
    }
}

pub(crate) fn handle_poll<R>(
    retry_policy: &dyn RetryPolicy,
    state: &RetryState,
    operation_name: String,
    result: Result<Operation<R>>,
) -> (Option<String>, PollingResult<R>) {
    match result {
        Err(e) => handle_polling_error(classify_error(retry_policy, state, e), operation_name),
        Ok(op) => {
            let (name, result) = handle_common(op);
            match &result {
                PollingResult::InProgress => {
                    match retry_policy.on_in_progress(state, &operation_name) {
                        None => (name, result),
                        Some(e) => (None, PollingResult::Completed(Err(e))),
                    }
                }
                PollingResult::Completed(_) | PollingResult::PollingError(_) => (name, result),
            }
        }
    }
}

fn handle_polling_error<R>(
    flow: RetryResult,
    operation_name: String,
) -> (Option<String>, PollingResult<R>) {
    match flow {
        RetryResult::Continue(e) => (Some(operation_name), PollingResult::PollingError(e)),
        RetryResult::Permanent(e) => (None, PollingResult::Completed(Err(e))),
        RetryResult::Exhausted(e) => {
            tracing::warn!("polling loop for {operation_name} exhausted, last error: {e}");
            (None, PollingResult::Completed(Err(Error::exhausted(e))))
        }
    }
}

fn handle_common<R>(op: Operation<R>) -> (Option<String>, PollingResult<R>) {
    match op.status {
        OperationStatus::Running => (Some(op.name), PollingResult::InProgress),
        OperationStatus::Succeeded(r) => (None, PollingResult::Completed(Ok(r))),
        OperationStatus::Failed(status) => {
            (None, PollingResult::Completed(Err(Error::service(status))))
        }
    }
}
