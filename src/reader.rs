// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! `Reader`: locates the highest learned version across a quorum and
//! performs read-repair before returning.

use std::sync::Arc;

use tracing::warn;

use crate::facade::Deadline;
use crate::store::ReplicaStore;

/// Outcome of one `Reader::get` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `(version, value, replica_count)`: the value learned at `version`,
    /// now held by at least `replica_count >= quorum` replicas.
    Ok(u64, Vec<u8>, usize),
    /// No replica holds a LEARNED row for this key.
    NotFound,
    /// Fewer than `quorum` replicas responded, either to the initial fetch
    /// or to read-repair.
    NoQuorum(usize),
}

pub struct Reader;

impl Reader {
    pub fn get(
        replicas: &[Arc<dyn ReplicaStore>],
        quorum: usize,
        key: &[u8],
        deadline: Option<Deadline>,
    ) -> ReadOutcome {
        // Step 1: fan out highest_learned; replicas that fail, hold
        // nothing for this key, or are contacted past `deadline`
        // contribute version 0.
        let responses: Vec<Option<Result<Option<(u64, Vec<u8>)>, crate::error::TransientError>>> =
            std::thread::scope(|scope| {
                let handles: Vec<_> = replicas
                    .iter()
                    .map(|replica| {
                        if deadline.is_some_and(|d| d.has_elapsed()) {
                            None
                        } else {
                            let replica = replica.clone();
                            Some(scope.spawn(move || replica.highest_learned(key)))
                        }
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.map(|h| h.join().expect("highest_learned worker panicked")))
                    .collect()
            });

        let responded = responses.iter().filter(|r| matches!(r, Some(Ok(_)))).count();
        for (index, response) in responses.iter().enumerate() {
            if let Some(Err(e)) = response {
                warn!(replica = index, error = %e, "replica did not respond to highest_learned");
            }
        }

        if responded < quorum {
            return ReadOutcome::NoQuorum(responded);
        }

        let v_star = responses
            .iter()
            .filter_map(|r| match r {
                Some(Ok(Some((version, _)))) => Some(*version),
                _ => None,
            })
            .max()
            .unwrap_or(0);

        if v_star == 0 {
            return ReadOutcome::NotFound;
        }

        let value = responses
            .iter()
            .find_map(|r| match r {
                Some(Ok(Some((version, value)))) if *version == v_star => Some(value.clone()),
                _ => None,
            })
            .expect("a replica reporting v_star must carry its value");

        // Step 5: read-repair every replica not already known to hold
        // v_star, including ones that failed the initial fetch.
        let repair_targets: Vec<(usize, Arc<dyn ReplicaStore>)> = replicas
            .iter()
            .cloned()
            .enumerate()
            .filter(|(i, _)| !matches!(responses[*i], Some(Ok(Some((v, _)))) if v == v_star))
            .collect();

        let already_current = replicas.len() - repair_targets.len();

        let repaired: usize = std::thread::scope(|scope| {
            let value_ref = &value;
            let handles: Vec<_> = repair_targets
                .iter()
                .filter(|_| !deadline.is_some_and(|d| d.has_elapsed()))
                .map(|(_, replica)| {
                    let replica = replica.clone();
                    let value = value_ref.clone();
                    scope.spawn(move || replica.repair(key, v_star, &value))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("repair worker panicked"))
                .filter(|r| r.is_ok())
                .count()
        });

        let held = already_current + repaired;
        if held < quorum {
            ReadOutcome::NoQuorum(held)
        } else {
            ReadOutcome::Ok(v_star, value, held)
        }
    }
}
