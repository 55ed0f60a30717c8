// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! `Handle`: the public facade. Owns the replica registry and quorum size,
//! validates caller input, and dispatches `put`/`get` to `ProposerRound`
//! and `Reader`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::instrument;

use crate::ballot::{Ballot, Clock, SystemClock};
use crate::error::TransientError;
use crate::proposer::{Outcome, ProposerRound};
use crate::reader::{ReadOutcome, Reader};
use crate::store::{ReplicaStore, SqliteReplicaStore};

/// A caller-supplied cutoff for one `put`/`get` call. A replica contacted
/// after the deadline has elapsed is treated as non-responding without
/// attempting the call — partial quorums are never silently promoted to
/// success.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Deadline(Instant::now() + timeout)
    }

    pub(crate) fn has_elapsed(&self) -> bool {
        Instant::now() >= self.0
    }
}

/// Owns the replica registry (immutable after construction) and the
/// derived quorum size. Every `put`/`get` call acquires its
/// own per-replica connections through the `ReplicaStore` trait; `Handle`
/// itself holds no live connection.
pub struct Handle {
    replicas: Vec<Arc<dyn ReplicaStore>>,
    quorum: usize,
    clock: Box<dyn Clock>,
    client_id: u16,
}

impl Handle {
    /// Opens (or creates) one `SqliteReplicaStore` per endpoint, ensures
    /// the `kvlog` schema exists on each, and computes
    /// `quorum = floor(N/2) + 1`. Fails if any replica's schema creation
    /// fails — there is no valid partially-constructed `Handle`.
    pub fn construct(replica_endpoints: &[String]) -> Result<Self, TransientError> {
        let mut replicas: Vec<Arc<dyn ReplicaStore>> = Vec::with_capacity(replica_endpoints.len());
        for endpoint in replica_endpoints {
            let store = SqliteReplicaStore::open(endpoint)?;
            store.ensure_schema()?;
            replicas.push(Arc::new(store));
        }
        Ok(Self::from_replicas(replicas))
    }

    /// Builds a `Handle` directly from already-constructed replica stores,
    /// bypassing schema bootstrap. Used by tests running against an
    /// in-memory `ReplicaStore` double.
    pub fn from_replicas(replicas: Vec<Arc<dyn ReplicaStore>>) -> Self {
        let quorum = replicas.len() / 2 + 1;
        let client_id: u16 = rand::thread_rng().gen_range(0..(1u16 << 11));
        Self {
            replicas,
            quorum,
            clock: Box::new(SystemClock),
            client_id,
        }
    }

    /// Overrides the `Clock` a `Handle` draws ballots from. Used by tests
    /// that need deterministic ballot ordering.
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Runs the full Promise/Accept/Learn protocol to bind `value` to
    /// `(key, version)`.
    #[instrument(level = "info", skip(self, key, value), fields(version))]
    pub fn put(&self, key: &[u8], version: u64, value: &[u8]) -> Outcome {
        self.put_with_deadline(key, version, value, None)
    }

    /// As [`Handle::put`], but every `ReplicaStore` call contacted after
    /// `deadline` elapses is skipped and counted as non-responding.
    pub fn put_with_deadline(
        &self,
        key: &[u8],
        version: u64,
        value: &[u8],
        deadline: Option<Deadline>,
    ) -> Outcome {
        if key.is_empty() || value.is_empty() || version < 1 {
            return Outcome::InvalidInput;
        }
        let ballot = Ballot::new(self.clock.as_ref(), self.client_id);
        ProposerRound::run(
            &self.replicas,
            self.quorum,
            key,
            version,
            value,
            ballot.as_u64(),
            deadline,
        )
    }

    /// Best-effort auto-versioning: reads the current highest learned
    /// version for `key` and proposes `version = V* + 1`. Not part of the
    /// safety-critical core: two concurrent callers can both observe the
    /// same `V*` and race for
    /// `V*+1`, in which case exactly one wins `Ok` and the other observes
    /// `Resolved` or a quorum failure. Callers that need a guaranteed
    /// unique version must supply one themselves.
    pub fn put_next(&self, key: &[u8], value: &[u8]) -> Outcome {
        if key.is_empty() || value.is_empty() {
            return Outcome::InvalidInput;
        }
        let next_version = match Reader::get(&self.replicas, self.quorum, key, None) {
            ReadOutcome::Ok(version, _, _) => version + 1,
            ReadOutcome::NotFound => 1,
            ReadOutcome::NoQuorum(count) => return Outcome::NoPromiseQuorum(count),
        };
        self.put(key, next_version, value)
    }

    /// Locates the highest learned version for `key` and performs
    /// read-repair before returning.
    #[instrument(level = "info", skip(self, key))]
    pub fn get(&self, key: &[u8]) -> ReadOutcome {
        self.get_with_deadline(key, None)
    }

    /// As [`Handle::get`], but every `ReplicaStore` call contacted after
    /// `deadline` elapses is skipped and counted as non-responding.
    pub fn get_with_deadline(&self, key: &[u8], deadline: Option<Deadline>) -> ReadOutcome {
        if key.is_empty() {
            return ReadOutcome::NoQuorum(0);
        }
        Reader::get(&self.replicas, self.quorum, key, deadline)
    }
}
