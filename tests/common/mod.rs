// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! Shared test support: an in-memory `ReplicaStore` double for the
//! property-based harness and a deterministic `Clock` for pinning ballot
//! ordering in scenario tests.
//!
//! The double implements the identical `ReplicaStore` trait the
//! production `SqliteReplicaStore` implements, so properties checked
//! against it are properties of the real row-state machine, not of a
//! separate model.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use kvpaxos::{Clock, PromiseResult, ReplicaStore, TransientError};
use rand::Rng;

#[derive(Clone, Default)]
struct Row {
    promised_seq: Option<u64>,
    accepted_seq: Option<u64>,
    value: Option<Vec<u8>>,
}

/// An in-process `ReplicaStore` backed by a `Mutex<HashMap<..>>`, with an
/// optional per-call failure probability used to simulate a flaky
/// backend.
pub struct MemoryReplicaStore {
    rows: Mutex<HashMap<(Vec<u8>, u64), Row>>,
    fail_rate: f64,
}

impl MemoryReplicaStore {
    pub fn new() -> Self {
        Self::with_fail_rate(0.0)
    }

    pub fn with_fail_rate(fail_rate: f64) -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            fail_rate,
        }
    }

    fn maybe_fail(&self) -> Result<(), TransientError> {
        if self.fail_rate > 0.0 && rand::thread_rng().gen_bool(self.fail_rate.min(1.0)) {
            Err(TransientError::Unavailable("injected fault".to_string()))
        } else {
            Ok(())
        }
    }

    /// Raw `(promised_seq, accepted_seq, value)` for one row, bypassing
    /// fault injection, for test assertions.
    pub fn snapshot(&self, key: &[u8], version: u64) -> Option<(Option<u64>, Option<u64>, Option<Vec<u8>>)> {
        let rows = self.rows.lock().unwrap();
        rows.get(&(key.to_vec(), version))
            .map(|r| (r.promised_seq, r.accepted_seq, r.value.clone()))
    }

    /// Every version currently stored for `key`, for pruning assertions.
    pub fn versions_for(&self, key: &[u8]) -> Vec<u64> {
        let rows = self.rows.lock().unwrap();
        let mut versions: Vec<u64> = rows
            .keys()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| *v)
            .collect();
        versions.sort_unstable();
        versions
    }
}

impl ReplicaStore for MemoryReplicaStore {
    fn ensure_schema(&self) -> Result<(), TransientError> {
        Ok(())
    }

    fn promise(&self, key: &[u8], version: u64, ballot: u64) -> Result<PromiseResult, TransientError> {
        self.maybe_fail()?;
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .entry((key.to_vec(), version))
            .or_insert_with(|| Row {
                promised_seq: Some(0),
                accepted_seq: Some(0),
                value: None,
            });

        if row.promised_seq.is_none() && row.accepted_seq.is_none() {
            let value = row.value.clone().expect("LEARNED row must carry a value (I4)");
            return Ok(PromiseResult::Learned(value));
        }

        let promised_seq = row.promised_seq.unwrap_or(0);
        if promised_seq >= ballot {
            return Ok(PromiseResult::Rejected);
        }

        let accepted_seq = row.accepted_seq.unwrap_or(0);
        let value = row.value.clone();
        row.promised_seq = Some(ballot);
        Ok(PromiseResult::Promised { accepted_seq, value })
    }

    fn accept(&self, key: &[u8], version: u64, ballot: u64, value: &[u8]) -> Result<bool, TransientError> {
        self.maybe_fail()?;
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&(key.to_vec(), version)) {
            Some(row) if row.promised_seq == Some(ballot) => {
                row.accepted_seq = Some(ballot);
                row.value = Some(value.to_vec());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn learn(&self, key: &[u8], version: u64, ballot: u64) -> Result<bool, TransientError> {
        self.maybe_fail()?;
        let mut rows = self.rows.lock().unwrap();
        rows.retain(|(k, v), _| k != key || *v >= version);
        match rows.get_mut(&(key.to_vec(), version)) {
            Some(row)
                if row.promised_seq == Some(ballot)
                    && row.accepted_seq == Some(ballot)
                    && row.value.is_some() =>
            {
                row.promised_seq = None;
                row.accepted_seq = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn highest_learned(&self, key: &[u8]) -> Result<Option<(u64, Vec<u8>)>, TransientError> {
        self.maybe_fail()?;
        let rows = self.rows.lock().unwrap();
        let best = rows
            .iter()
            .filter(|((k, _), row)| k == key && row.promised_seq.is_none() && row.accepted_seq.is_none())
            .map(|((_, v), row)| (*v, row.value.clone().expect("LEARNED row must carry a value (I4)")))
            .max_by_key(|(v, _)| *v);
        Ok(best)
    }

    fn repair(&self, key: &[u8], version: u64, value: &[u8]) -> Result<(), TransientError> {
        self.maybe_fail()?;
        let mut rows = self.rows.lock().unwrap();
        rows.retain(|(k, v), _| k != key || *v > version);
        rows.insert(
            (key.to_vec(), version),
            Row {
                promised_seq: None,
                accepted_seq: None,
                value: Some(value.to_vec()),
            },
        );
        Ok(())
    }
}

/// A `Clock` whose `now_seq()` never changes, so every `Ballot` drawn
/// within a test carries the same seconds component and only the
/// client-id term varies. Used to pin ballot ordering in scenario tests.
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_seq(&self) -> u64 {
        self.0
    }
}
