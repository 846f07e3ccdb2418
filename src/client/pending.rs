// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::warn;

use crate::network::Frame;
use crate::{AppError, AppResult};

/// Resolution channel for one in-flight request. Consuming the sender is
/// what makes every entry resolve exactly once.
pub type ResponseCallback = oneshot::Sender<AppResult<Frame>>;

#[derive(Debug)]
pub struct PendingRequest {
    submitted_at: Instant,
    timeout: Duration,
    callback: ResponseCallback,
}

impl PendingRequest {
    fn new(timeout: Duration, callback: ResponseCallback) -> Self {
        PendingRequest {
            submitted_at: Instant::now(),
            timeout,
            callback,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.submitted_at) >= self.timeout
    }

    pub fn resolve(self, result: AppResult<Frame>) {
        // the caller may have stopped waiting, that is its business
        let _ = self.callback.send(result);
    }
}

/// Per-connection map from correlation id to the waiting caller.
///
/// Mutated by three concurrent actors: the send path inserting, the receive
/// path resolving and the sweeper evicting. Removal from the map is the
/// arbiter; whichever actor removes an entry owns its callback, so an entry
/// is resolved by a matching response, by timeout, or by connection failure,
/// whichever wins the race.
#[derive(Debug, Default)]
pub struct PendingRequestTable {
    entries: DashMap<u64, PendingRequest>,
}

impl PendingRequestTable {
    pub fn new() -> Self {
        PendingRequestTable {
            entries: DashMap::new(),
        }
    }

    pub fn insert(&self, msg_id: u64, timeout: Duration, callback: ResponseCallback) {
        self.entries
            .insert(msg_id, PendingRequest::new(timeout, callback));
    }

    pub fn take(&self, msg_id: u64) -> Option<PendingRequest> {
        self.entries.remove(&msg_id).map(|(_, request)| request)
    }

    /// Resolves the entry for `msg_id` with a response frame. Returns false
    /// for an unmatched id (already timed out and removed, or never sent);
    /// per protocol policy that is logged and dropped, not an error.
    pub fn complete(&self, msg_id: u64, frame: Frame) -> bool {
        match self.take(msg_id) {
            Some(request) => {
                request.resolve(Ok(frame));
                true
            }
            None => {
                warn!(
                    "unmatched reply msg_id {}, waiting count {}",
                    msg_id,
                    self.entries.len()
                );
                false
            }
        }
    }

    pub fn fail(&self, msg_id: u64, error: AppError) -> bool {
        match self.take(msg_id) {
            Some(request) => {
                request.resolve(Err(error));
                true
            }
            None => false,
        }
    }

    /// Fails every entry, used when the owning connection is lost. Entries
    /// racing in from the send path after this drain are covered by the
    /// sender's own liveness re-check.
    pub fn fail_all<F>(&self, make_error: F) -> usize
    where
        F: Fn() -> AppError,
    {
        let msg_ids: Vec<u64> = self.entries.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;
        for msg_id in msg_ids {
            if self.fail(msg_id, make_error()) {
                failed += 1;
            }
        }
        failed
    }

    /// Fails every entry older than its timeout. Holds only short-lived
    /// per-shard locks; never waits on I/O.
    pub fn sweep_expired(&self) -> Vec<u64> {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| *entry.key())
            .collect();

        let mut swept = Vec::new();
        for msg_id in expired {
            // the matching response may have just won the race, the remove
            // result decides
            if let Some(request) = self.take(msg_id) {
                request.resolve(Err(AppError::RequestTimeout(format!(
                    "request timed out, msg_id={}",
                    msg_id
                ))));
                swept.push(msg_id);
            }
        }
        swept
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
