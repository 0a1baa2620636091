//! The indexing pipeline, concurrency/resource model and dump file
//! format: the preparer -> ready-queue -> indexer
//! write path with optimistic concurrency, the debounced background
//! workers (committer, fsyncher, db-updater, trigger-replication), and
//! the single-file dump format used to snapshot metadata/schema/
//! documents.
//!
//! The disk-resident posting-list store itself is an opaque collaborator
//! this crate only defines the [`database::Database`]
//! boundary it calls through, never its internals.

pub mod config;
pub mod database;
pub mod documents;
pub mod dump;
pub mod pipeline;
pub mod semaphore;
pub mod worker;

pub use config::{Config, WorkerTimeouts};
pub use database::{with_retries, Database, DebounceState};
pub use documents::{DocumentKey, DocumentsChangeSeq, SetOutcome};
pub use pipeline::{index_bulk, BulkItem, BulkReport};
pub use semaphore::Semaphore;
pub use worker::{spawn as spawn_debounced_worker, DebouncedAction, WorkerHandle};
