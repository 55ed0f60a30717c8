// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! `ProposerRound`: one Promise/Accept/Learn pass for a single
//! `(key, version, candidate)` triple.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::facade::Deadline;
use crate::store::{PromiseResult, ReplicaStore};

/// Outcome of one `ProposerRound::run` call. A round produces exactly one
/// of these, never a partial mix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The caller's candidate was chosen and learned by a quorum.
    Ok(u64),
    /// A prior incomplete round's value was learned instead of the
    /// caller's candidate.
    Resolved(Vec<u8>),
    /// Some replica reported the pair was already closed before this round
    /// could even promise.
    AlreadyLearned(Vec<u8>),
    /// Empty key, empty candidate, or non-positive version.
    InvalidInput,
    NoPromiseQuorum(usize),
    NoAcceptQuorum(usize),
    NoLearnQuorum(usize),
}

/// Executes one Promise/Accept/Learn pass. Holds no state beyond the
/// in-memory tally for this single call; every replica handle is borrowed
/// only for the duration of `run`.
pub struct ProposerRound;

impl ProposerRound {
    /// Runs the full three-phase protocol for `(key, version, candidate)`
    /// at `ballot` against `replicas`, requiring `quorum` agreeing replicas
    /// per phase.
    pub fn run(
        replicas: &[Arc<dyn ReplicaStore>],
        quorum: usize,
        key: &[u8],
        version: u64,
        candidate: &[u8],
        ballot: u64,
        deadline: Option<Deadline>,
    ) -> Outcome {
        if key.is_empty() || candidate.is_empty() || version < 1 {
            return Outcome::InvalidInput;
        }

        // --- Phase 1: Promise ---
        let mut order: Vec<&Arc<dyn ReplicaStore>> = replicas.iter().collect();
        order.shuffle(&mut rand::thread_rng());

        let promise_responses: Vec<PromiseResult> = std::thread::scope(|scope| {
            let handles: Vec<_> = order
                .iter()
                .filter(|_| !deadline.is_some_and(|d| d.has_elapsed()))
                .map(|replica| {
                    let replica = (*replica).clone();
                    scope.spawn(move || replica.promise(key, version, ballot))
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|h| match h.join().expect("promise worker panicked") {
                    Ok(result) => Some(result),
                    Err(e) => {
                        warn!(error = %e, "replica did not respond to Promise");
                        None
                    }
                })
                .collect()
        });

        if let Some(value) = promise_responses.iter().find_map(|r| match r {
            PromiseResult::Learned(v) => Some(v.clone()),
            _ => None,
        }) {
            debug!("Promise phase observed an already-learned value; aborting round");
            return Outcome::AlreadyLearned(value);
        }

        let tally: Vec<(u64, Option<Vec<u8>>)> = promise_responses
            .into_iter()
            .filter_map(|r| match r {
                PromiseResult::Promised { accepted_seq, value } => Some((accepted_seq, value)),
                PromiseResult::Rejected => None,
                PromiseResult::Learned(_) => unreachable!("handled above"),
            })
            .collect();

        if tally.len() < quorum {
            return Outcome::NoPromiseQuorum(tally.len());
        }

        // Value-adoption rule: adopt the highest accepted_seq seen; ties are
        // safe because tied proposals carry the same value by prior-round
        // safety.
        let adopted = tally
            .iter()
            .max_by_key(|(accepted_seq, _)| *accepted_seq)
            .cloned();
        let (adopted_seq, proposal): (u64, Vec<u8>) = match adopted {
            Some((seq, Some(value))) if seq > 0 => (seq, value),
            _ => (0, candidate.to_vec()),
        };

        // --- Phase 2: Accept ---
        order.shuffle(&mut rand::thread_rng());
        let accept_count: usize = std::thread::scope(|scope| {
            let proposal_ref = &proposal;
            let handles: Vec<_> = order
                .iter()
                .filter(|_| !deadline.is_some_and(|d| d.has_elapsed()))
                .map(|replica| {
                    let replica = (*replica).clone();
                    let value = proposal_ref.clone();
                    scope.spawn(move || replica.accept(key, version, ballot, &value))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("accept worker panicked"))
                .filter(|r| match r {
                    Ok(true) => true,
                    Ok(false) => false,
                    Err(e) => {
                        warn!(error = %e, "replica did not respond to Accept");
                        false
                    }
                })
                .count()
        });

        if accept_count < quorum {
            return Outcome::NoAcceptQuorum(accept_count);
        }

        // --- Phase 3: Learn ---
        order.shuffle(&mut rand::thread_rng());
        let learn_count: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = order
                .iter()
                .filter(|_| !deadline.is_some_and(|d| d.has_elapsed()))
                .map(|replica| {
                    let replica = (*replica).clone();
                    scope.spawn(move || replica.learn(key, version, ballot))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("learn worker panicked"))
                .filter(|r| match r {
                    Ok(true) => true,
                    Ok(false) => false,
                    Err(e) => {
                        warn!(error = %e, "replica did not respond to Learn");
                        false
                    }
                })
                .count()
        });

        if learn_count < quorum {
            return Outcome::NoLearnQuorum(learn_count);
        }

        if adopted_seq == 0 {
            Outcome::Ok(version)
        } else {
            Outcome::Resolved(proposal)
        }
    }
}
