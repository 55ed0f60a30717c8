// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! Error type at the `ReplicaStore` boundary.
//!
//! Everything above `ReplicaStore` (the proposer round, the reader, the
//! facade) treats a `TransientError` as "this replica did not respond" and
//! folds it into a quorum count rather than propagating it; see the
//! propagation policy in the crate-level docs.

/// A single replica's backend failed to service one call.
///
/// `TransientError` never crosses the public `Handle` surface: it is only
/// returned by `ReplicaStore` methods, and the protocol layer absorbs it.
#[derive(thiserror::Error, Debug)]
pub enum TransientError {
    #[error("backend I/O error: {0}")]
    Backend(#[from] rusqlite::Error),

    #[error("connection pool exhausted or poisoned: {0}")]
    Pool(#[from] r2d2::Error),

    /// A non-SQLite `ReplicaStore` failed or injected a fault. Used by the
    /// in-memory test double (see `tests/common`) to exercise the "replica
    /// did not respond" path without a real backend.
    #[error("replica unavailable: {0}")]
    Unavailable(String),
}
