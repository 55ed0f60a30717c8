// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! A strongly consistent, replicated, versioned key-value store built on
//! independent SQL backends, using single-decree Paxos executed once per
//! `(key, version)` pair.
//!
//! There is no long-lived server process: every [`Handle`] runs the
//! Promise/Accept/Learn protocol directly against a set of
//! [`ReplicaStore`] handles supplied at construction time.

mod ballot;
mod error;
mod facade;
mod proposer;
mod reader;
mod store;

pub use ballot::{Ballot, Clock, SystemClock};
pub use error::TransientError;
pub use facade::{Deadline, Handle};
pub use proposer::{Outcome, ProposerRound};
pub use reader::{ReadOutcome, Reader};
pub use store::{PromiseResult, ReplicaStore, SqliteReplicaStore};
