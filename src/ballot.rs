// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! Ballot numbers and their wall-clock source.

use std::time::{SystemTime, UNIX_EPOCH};

/// Bits reserved in a [`Ballot`] for the client discriminator.
///
/// `seconds_since_epoch * CLIENT_SPACE + client_id` keeps ballots strictly
/// increasing for a single client tick-over-tick while letting distinct
/// concurrent clients drawing the same second still land on distinct
/// ballots most of the time.
const CLIENT_SPACE: u64 = 1 << 12;

/// Source of the wall-clock reading a new [`Ballot`] is drawn from.
///
/// Abstracted behind a trait so tests can pin ballot ordering instead of
/// depending on real time.
pub trait Clock: Send + Sync {
    /// Seconds since an arbitrary fixed epoch. Only required to be
    /// non-decreasing across calls on one `Clock` instance.
    fn now_seq(&self) -> u64;
}

/// The default [`Clock`]: the real wall clock, in seconds since the Unix
/// epoch.
#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_seq(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_secs()
    }
}

/// A monotonically increasing proposal number, compared as an unsigned
/// integer across the whole protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ballot(u64);

impl Ballot {
    /// Draws a new ballot for one `ProposerRound`, common to every replica
    /// contacted during that round.
    pub fn new(clock: &dyn Clock, client_id: u16) -> Self {
        Ballot(clock.now_seq() * CLIENT_SPACE + (client_id as u64 % CLIENT_SPACE))
    }

    /// The raw ordinal, as stored in `promised_seq`/`accepted_seq` columns.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Reconstructs a `Ballot` previously read back from storage.
    pub fn from_u64(raw: u64) -> Self {
        Ballot(raw)
    }
}
