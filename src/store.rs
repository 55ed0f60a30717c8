// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! `ReplicaStore`: the per-backend shim the consensus core runs against.
//!
//! Each `ReplicaStore` wraps one independent SQL backend holding a local
//! shard of the `kvlog` relation. The trait groups the Promise/Accept/Learn
//! primitives into five methods, one per protocol phase-step, so the
//! read-then-conditional-write inside a phase step runs as a single local
//! transaction on a single replica.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OptionalExtension;
use tracing::instrument;

use crate::error::TransientError;

/// What a replica reported during the Promise phase for one `(key, version)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromiseResult {
    /// The pair is already closed and immutable; `value` is the final
    /// value. Authoritative: the proposer round aborts as soon as any
    /// replica reports this.
    Learned(Vec<u8>),
    /// This replica promised the requested ballot. `accepted_seq` is 0 and
    /// `value` is `None` if nothing had been accepted yet on this row.
    Promised {
        accepted_seq: u64,
        value: Option<Vec<u8>>,
    },
    /// This replica had already promised an equal-or-higher ballot and took
    /// no action.
    Rejected,
}

/// The scoped, transactional interface the consensus core runs against one
/// backend. Implementations own exactly one replica's local state; they are
/// never shared between concurrent `ProposerRound`/`Reader` invocations
/// beyond read-only fan-out.
pub trait ReplicaStore: Send + Sync {
    /// Idempotent `CREATE TABLE IF NOT EXISTS`. Called once per replica by
    /// `Handle::construct`.
    fn ensure_schema(&self) -> Result<(), TransientError>;

    /// Phase 1 (Promise) for one replica.
    fn promise(&self, key: &[u8], version: u64, ballot: u64) -> Result<PromiseResult, TransientError>;

    /// Phase 2 (Accept) for one replica. Returns whether this replica
    /// actually recorded `(ballot, value)` — i.e. `promised_seq == ballot`
    /// held at the time of the conditional update.
    fn accept(&self, key: &[u8], version: u64, ballot: u64, value: &[u8]) -> Result<bool, TransientError>;

    /// Phase 3 (Learn) for one replica: prunes rows for earlier versions of
    /// the same key, then conditionally closes this row. Returns whether
    /// this replica actually transitioned to LEARNED.
    fn learn(&self, key: &[u8], version: u64, ballot: u64) -> Result<bool, TransientError>;

    /// Highest LEARNED `(version, value)` for `key`, if any.
    fn highest_learned(&self, key: &[u8]) -> Result<Option<(u64, Vec<u8>)>, TransientError>;

    /// Read-repair write: prune rows for `key` at or below `version`, then
    /// insert a fresh LEARNED row at `(key, version, value)`.
    fn repair(&self, key: &[u8], version: u64, value: &[u8]) -> Result<(), TransientError>;
}

/// A `ReplicaStore` backed by a pooled SQLite connection, one physical
/// database file (or `:memory:`) per replica.
pub struct SqliteReplicaStore {
    endpoint: String,
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteReplicaStore {
    /// Opens (or creates) the SQLite database at `endpoint` and builds a
    /// connection pool around it. Does not itself create the `kvlog`
    /// table; call [`ReplicaStore::ensure_schema`] for that.
    pub fn open(endpoint: &str) -> Result<Self, TransientError> {
        let manager = SqliteConnectionManager::file(endpoint);
        let pool = Pool::new(manager)?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            pool,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ReplicaStore for SqliteReplicaStore {
    #[instrument(level = "debug", skip(self))]
    fn ensure_schema(&self) -> Result<(), TransientError> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kvlog (
                key BLOB NOT NULL,
                version INTEGER NOT NULL,
                promised_seq INTEGER,
                accepted_seq INTEGER,
                value BLOB,
                PRIMARY KEY (key, version)
            );",
        )?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self, key, value), fields(version, ballot))]
    fn promise(&self, key: &[u8], version: u64, ballot: u64) -> Result<PromiseResult, TransientError> {
        let version = version as i64;
        let ballot = ballot as i64;
        let mut conn = self.pool.get()?;
        let txn = conn.transaction()?;

        txn.execute(
            "INSERT OR IGNORE INTO kvlog (key, version, promised_seq, accepted_seq, value)
             VALUES (?1, ?2, 0, 0, NULL)",
            rusqlite::params![key, version],
        )?;

        let row: (Option<i64>, Option<i64>, Option<Vec<u8>>) = txn.query_row(
            "SELECT promised_seq, accepted_seq, value FROM kvlog WHERE key = ?1 AND version = ?2",
            rusqlite::params![key, version],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;
        let (promised_seq, accepted_seq, value) = row;

        if promised_seq.is_none() && accepted_seq.is_none() {
            let value = value.expect("LEARNED row must carry a value (I4)");
            txn.commit()?;
            return Ok(PromiseResult::Learned(value));
        }

        let promised_seq = promised_seq.unwrap_or(0);
        if promised_seq >= ballot {
            txn.rollback()?;
            return Ok(PromiseResult::Rejected);
        }

        txn.execute(
            "UPDATE kvlog SET promised_seq = ?1 WHERE key = ?2 AND version = ?3",
            rusqlite::params![ballot, key, version],
        )?;
        txn.commit()?;

        Ok(PromiseResult::Promised {
            accepted_seq: accepted_seq.unwrap_or(0) as u64,
            value,
        })
    }

    #[instrument(level = "debug", skip(self, key, value), fields(version, ballot))]
    fn accept(&self, key: &[u8], version: u64, ballot: u64, value: &[u8]) -> Result<bool, TransientError> {
        let version = version as i64;
        let ballot = ballot as i64;
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE kvlog SET accepted_seq = ?1, value = ?2
             WHERE key = ?3 AND version = ?4 AND promised_seq = ?5",
            rusqlite::params![ballot, value, key, version, ballot],
        )?;
        Ok(changed == 1)
    }

    #[instrument(level = "debug", skip(self, key), fields(version, ballot))]
    fn learn(&self, key: &[u8], version: u64, ballot: u64) -> Result<bool, TransientError> {
        let version_i = version as i64;
        let ballot = ballot as i64;
        let mut conn = self.pool.get()?;
        let txn = conn.transaction()?;

        txn.execute(
            "DELETE FROM kvlog WHERE key = ?1 AND version < ?2",
            rusqlite::params![key, version_i],
        )?;

        let changed = txn.execute(
            "UPDATE kvlog SET promised_seq = NULL, accepted_seq = NULL
             WHERE key = ?1 AND version = ?2 AND promised_seq = ?3 AND accepted_seq = ?3
                   AND value IS NOT NULL",
            rusqlite::params![key, version_i, ballot],
        )?;
        txn.commit()?;
        Ok(changed == 1)
    }

    #[instrument(level = "debug", skip(self, key))]
    fn highest_learned(&self, key: &[u8]) -> Result<Option<(u64, Vec<u8>)>, TransientError> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT version, value FROM kvlog
                 WHERE key = ?1 AND promised_seq IS NULL AND accepted_seq IS NULL
                 ORDER BY version DESC LIMIT 1",
                rusqlite::params![key],
                |r| {
                    let version: i64 = r.get(0)?;
                    let value: Vec<u8> = r.get(1)?;
                    Ok((version as u64, value))
                },
            )
            .optional()?;
        Ok(row)
    }

    #[instrument(level = "debug", skip(self, key, value), fields(version))]
    fn repair(&self, key: &[u8], version: u64, value: &[u8]) -> Result<(), TransientError> {
        let version = version as i64;
        let mut conn = self.pool.get()?;
        let txn = conn.transaction()?;
        txn.execute(
            "DELETE FROM kvlog WHERE key = ?1 AND version <= ?2",
            rusqlite::params![key, version],
        )?;
        txn.execute(
            "INSERT INTO kvlog (key, version, promised_seq, accepted_seq, value)
             VALUES (?1, ?2, NULL, NULL, ?3)",
            rusqlite::params![key, version, value],
        )?;
        txn.commit()?;
        Ok(())
    }
}

impl SqliteReplicaStore {
    /// Whether any row at all exists for `(key, version)`, regardless of
    /// its PROMISED/ACCEPTED/LEARNED state. Not part of the `ReplicaStore`
    /// contract; exposed for integration tests asserting that old versions
    /// are actually pruned rather than merely unreachable.
    pub fn row_exists(&self, key: &[u8], version: u64) -> Result<bool, TransientError> {
        let version = version as i64;
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM kvlog WHERE key = ?1 AND version = ?2",
            rusqlite::params![key, version],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }
}
