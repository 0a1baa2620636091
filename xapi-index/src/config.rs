//! In-process tunables for the indexing pipeline and its debounced
//! workers. Not a config-file format — parsing configuration from disk
//! is out of scope here — just the literal constants the reference
//! implementation hardcodes, collected as `Default`-able struct fields
//! rather than free constants.

use std::time::Duration;

/// One row of the §6 timeout table: how long a debounced worker waits
/// idle before acting, and the bounds on how long it can be kept waiting
/// by a busy stream of requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerTimeouts {
    pub throttle: Duration,
    pub debounce: Duration,
    pub busy: Duration,
    pub min_force: Duration,
    pub max_force: Duration,
}

impl WorkerTimeouts {
    pub const fn millis(throttle: u64, debounce: u64, busy: u64, min_force: u64, max_force: u64) -> Self {
        WorkerTimeouts {
            throttle: Duration::from_millis(throttle),
            debounce: Duration::from_millis(debounce),
            busy: Duration::from_millis(busy),
            min_force: Duration::from_millis(min_force),
            max_force: Duration::from_millis(max_force),
        }
    }

    /// `committer`: throttle 0, debounce 1s busy / 3s idle, force window
    /// 8s-10s.
    pub const fn committer() -> Self {
        WorkerTimeouts::millis(0, 1000, 3000, 8000, 10000)
    }

    pub const fn fsyncher() -> Self {
        WorkerTimeouts::millis(1000, 500, 800, 2500, 3500)
    }

    pub const fn db_updater() -> Self {
        WorkerTimeouts::millis(1000, 100, 500, 4900, 5100)
    }

    pub const fn trigger_replication() -> Self {
        WorkerTimeouts::millis(1000, 100, 500, 4900, 5100)
    }
}

/// Implementation constants for the preparer/indexer pipeline and the
/// schema/database retry budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// `N` — number of `DocPreparer` workers in the pool.
    pub doc_preparers: usize,
    /// `B` — the `DocIndexer` coordinator's bulk buffer size.
    pub bulk_buffer_size: usize,
    /// Counting-semaphore capacity throttling in-flight prepare batches.
    pub limit_max: usize,
    /// Batch size the indexer releases permits in, to cut lock churn.
    pub limit_signal: usize,
    /// Read-path retry budget on `DatabaseModifiedError`.
    pub db_retries: usize,
    /// Bound on foreign-schema resolution recursion (mirrors
    /// `xapi_schema::schema::MAX_SCHEMA_RECURSION`; kept here too since
    /// the pipeline is the caller that enforces it against a real
    /// foreign-document getter).
    pub max_schema_recursion: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            doc_preparers: 4,
            bulk_buffer_size: 100,
            limit_max: 16,
            limit_signal: 8,
            db_retries: 3,
            max_schema_recursion: xapi_schema::schema::MAX_SCHEMA_RECURSION,
        }
    }
}
