//! The boundary to the disk-resident inverted index, treated as an
//! opaque collaborator (physical posting-list layout is
//! explicitly out of scope). Only the write entry point the indexer
//! calls, and the retry-on-`DatabaseModifiedError` read-path helper, live
//! here.

use std::time::Duration;
use xapi_schema::IndexedDocument;
use xapi_types::{Error, Result};

/// A single xapiand database (shard). Implementations own the real
/// posting-list store; this crate only ever calls `replace_document_term`
/// under the per-database lock.
pub trait Database: Send {
    /// Replaces the document whose unique term is `term_id` with `doc`.
    /// `commit` requests an immediate commit instead of leaving it to the
    /// debounced committer; `wal` requests a write-ahead-log record
    /// (replication input) alongside the posting-list mutation.
    fn replace_document_term(&mut self, term_id: &str, doc: &IndexedDocument, commit: bool, wal: bool) -> Result<()>;

    /// Reopens the database, used between retries on
    /// `Error::DatabaseModified`.
    fn reopen(&mut self) -> Result<()> {
        Ok(())
    }

    /// Fetches the currently-stored payload for `term_id`, used to seed
    /// the optimistic-concurrency guard's first snapshot for a document
    /// neither the preparer pool nor the `documents` map has seen yet.
    /// `None` means the document does not exist yet (a fresh insert).
    fn get_document(&self, _term_id: &str) -> Result<Option<xapi_data::Data>> {
        Ok(None)
    }
}

/// Runs `op` against `db`, reopening and retrying up to `retries` times
/// whenever it fails with `Error::DatabaseModified` (the read-path
/// retry policy; `NetworkTimeoutError` is left to surface as
/// `Error::NetworkTimeout` unchanged).
///
/// `DatabaseModified` is purely a retry control signal: if the budget is
/// exhausted it is translated to `Error::DatabaseNotAvailable` rather
/// than escaping as-is: it should remain a control
/// signal inside a retry loop and never escape".
pub fn with_retries<T>(
    db: &mut dyn Database,
    retries: usize,
    mut op: impl FnMut(&mut dyn Database) -> Result<T>,
) -> Result<T> {
    let mut attempt = 0;
    loop {
        match op(db) {
            Ok(value) => return Ok(value),
            Err(Error::DatabaseModified) if attempt < retries => {
                attempt += 1;
                db.reopen()?;
            }
            Err(Error::DatabaseModified) => {
                return Err(Error::DatabaseNotAvailable(format!(
                    "database still modified after {retries} retries"
                )))
            }
            Err(other) => return Err(other),
        }
    }
}

/// Debounce/force-commit accounting shared by the committer-style
/// workers: tracks the last activity and last forced-flush
/// instants so a caller can decide whether idle-debounce or max-force
/// has elapsed. Kept separate from any real clock/timer so it is
/// deterministically testable; callers feed it `Instant`s.
#[derive(Debug, Clone, Copy)]
pub struct DebounceState {
    pub last_activity: std::time::Instant,
    pub last_forced: std::time::Instant,
}

impl DebounceState {
    pub fn new(now: std::time::Instant) -> Self {
        DebounceState { last_activity: now, last_forced: now }
    }

    pub fn touch(&mut self, now: std::time::Instant) {
        self.last_activity = now;
    }

    /// Whether a debounced flush should fire at `now`. `idle` is the
    /// debounce window to wait once activity stops; `busy` bounds how
    /// long sustained activity can keep postponing a flush before the
    /// `min_force`/`max_force` window takes over: no forced flush before
    /// `min_force` has elapsed since the last one, but one is mandatory
    /// once `max_force` has elapsed, regardless of ongoing activity.
    pub fn should_flush(
        &self,
        now: std::time::Instant,
        idle: Duration,
        busy: Duration,
        min_force: Duration,
        max_force: Duration,
    ) -> bool {
        let since_activity = now.duration_since(self.last_activity);
        let since_forced = now.duration_since(self.last_forced);
        if since_forced >= max_force {
            return true;
        }
        if since_activity >= idle {
            return true;
        }
        since_forced >= min_force && since_activity >= busy
    }

    pub fn mark_flushed(&mut self, now: std::time::Instant) {
        self.last_forced = now;
        self.last_activity = now;
    }
}
