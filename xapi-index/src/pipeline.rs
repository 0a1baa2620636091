//! The preparer -> ready-queue -> indexer pipeline: a
//! `DocIndexer` coordinator batches incoming objects into bulk buffers of
//! size `B`, throttled by a counting semaphore; a pool of `DocPreparer`
//! workers compile each object against the schema and apply the
//! optimistic-concurrency guard; a single indexer task applies the
//! winning documents to the database under its lock.

use crate::config::Config;
use crate::database::Database;
use crate::documents::{DocumentKey, DocumentsChangeSeq, SetOutcome};
use crate::semaphore::Semaphore;
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use xapi_data::{CtType, Data, Locator, LocatorType};
use xapi_schema::{Endpoint, SchemaService};
use xapi_types::Value;

/// One object submitted for indexing, optionally carrying a caller-known
/// document id (absent for an auto-assigned id).
#[derive(Debug, Clone)]
pub struct BulkItem {
    pub doc_id: Option<String>,
    pub object: Value,
}

impl BulkItem {
    pub fn new(object: Value) -> Self {
        BulkItem { doc_id: None, object }
    }

    pub fn with_id(doc_id: impl Into<String>, object: Value) -> Self {
        BulkItem { doc_id: Some(doc_id.into()), object }
    }
}

enum ReadyItem {
    /// Prepared tuple `(term_id, document)`, winner of the optimistic
    /// concurrency check and ready for `replace_document_term`.
    Prepared { term_id: String, doc: xapi_schema::IndexedDocument },
    /// Sentinel enqueued on preparation failure or exhausted CAS
    /// retries, so the processed counter still advances.
    Empty,
}

/// Tally of a bulk run, surfaced for the caller: a `total` count plus
/// the indexed/failed split.
#[derive(Debug, Clone, Copy, Default)]
pub struct BulkReport {
    pub total: usize,
    pub indexed: usize,
    pub failed: usize,
}

fn main_locator(value: &Value) -> xapi_types::Result<Locator> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| xapi_types::Error::Serialisation(format!("could not serialise document body: {e}")))?;
    let mut locator = Locator::new(CtType::empty(), LocatorType::CompressedInplace);
    locator.set_data(bytes);
    Ok(locator)
}

/// Builds the pending `Data` snapshot this write would install: the main
/// msgpack-ish (here JSON) object locator — "at most one
/// locator with empty content-type" invariant.
fn pending_data(value: &Value) -> xapi_types::Result<Data> {
    let mut data = Data::new();
    data.push(main_locator(value)?);
    data.flush();
    Ok(data)
}

/// Runs one bulk-indexing pass over `items` against `endpoint`'s schema,
/// applying winners to `db` under its lock.
///
/// This function owns the full pipeline lifetime for one batch (the
/// `DocIndexer` coordinator, the `doc_preparers`-sized preparer pool, and
/// the single indexer consumer all run as scoped threads for the
/// duration of the call) since the HTTP-level bulk-request boundary that
/// would otherwise own a longer-lived coordinator is out of scope (spec
/// §1).
pub fn index_bulk(
    items: Vec<BulkItem>,
    schema_service: &SchemaService,
    endpoint: &Endpoint,
    db: &Mutex<Box<dyn Database>>,
    documents: &DocumentsChangeSeq,
    db_path: &str,
    config: &Config,
) -> BulkReport {
    let total = items.len();
    let bulk_buffer_size = config.bulk_buffer_size.max(1);

    let (prepare_tx, prepare_rx) = bounded::<BulkItem>(bulk_buffer_size);
    let (ready_tx, ready_rx) = bounded::<ReadyItem>(bulk_buffer_size * 2);
    let semaphore = Semaphore::new(config.limit_max);

    let indexed = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for worker_id in 0..config.doc_preparers {
            let prepare_rx = prepare_rx.clone();
            let ready_tx = ready_tx.clone();
            scope.spawn(move || prepare_loop(worker_id, &prepare_rx, &ready_tx, schema_service, endpoint, db, documents, db_path, config));
        }
        drop(prepare_rx);
        drop(ready_tx);

        // `items` and `prepare_tx` are consumed by value here (not
        // `move`-captured wholesale), so `semaphore` stays borrowed and
        // usable by `indexer_loop` below. `prepare_tx` drops when the
        // coordinator thread ends, closing the prepare channel so the
        // preparer pool's `recv()` loops observe end-of-input.
        scope.spawn(|| coordinator_loop(items, bulk_buffer_size, &semaphore, prepare_tx));

        indexer_loop(&ready_rx, db, &semaphore, config.limit_signal, &indexed, &failed);
    });

    BulkReport { total, indexed: indexed.load(Ordering::SeqCst), failed: failed.load(Ordering::SeqCst) }
}

/// `DocIndexer`: buffers objects up to `bulk_buffer_size`, then
/// bulk-enqueues them to the preparer pool, acquiring one semaphore
/// permit per flushed batch to cap in-flight batches at `limit_max`.
fn coordinator_loop(
    items: Vec<BulkItem>,
    bulk_buffer_size: usize,
    semaphore: &Semaphore,
    prepare_tx: crossbeam_channel::Sender<BulkItem>,
) {
    let mut buffer = Vec::with_capacity(bulk_buffer_size);
    for item in items {
        buffer.push(item);
        if buffer.len() >= bulk_buffer_size {
            flush_buffer(&mut buffer, semaphore, &prepare_tx);
        }
    }
    if !buffer.is_empty() {
        flush_buffer(&mut buffer, semaphore, &prepare_tx);
    }
    // `prepare_tx` drops here, closing the channel.
}

fn flush_buffer(buffer: &mut Vec<BulkItem>, semaphore: &Semaphore, prepare_tx: &crossbeam_channel::Sender<BulkItem>) {
    semaphore.acquire();
    for item in buffer.drain(..) {
        if prepare_tx.send(item).is_err() {
            break;
        }
    }
}

/// `DocPreparer`: compiles each dequeued object against the schema,
/// guards the result with the optimistic-concurrency CAS, and enqueues
/// either the winning `(term_id, document)` or the `Empty` sentinel.
#[allow(clippy::too_many_arguments)]
fn prepare_loop(
    _worker_id: usize,
    prepare_rx: &crossbeam_channel::Receiver<BulkItem>,
    ready_tx: &crossbeam_channel::Sender<ReadyItem>,
    schema_service: &SchemaService,
    endpoint: &Endpoint,
    db: &Mutex<Box<dyn Database>>,
    documents: &DocumentsChangeSeq,
    db_path: &str,
    config: &Config,
) {
    while let Ok(item) = prepare_rx.recv() {
        let outcome = prepare_one(&item, schema_service, endpoint, db, documents, db_path, config);
        let ready = match outcome {
            Ok(Some((term_id, doc))) => ReadyItem::Prepared { term_id, doc },
            Ok(None) => ReadyItem::Empty,
            Err(err) => {
                tracing::warn!(error = %err, "document preparation failed, enqueuing sentinel");
                ReadyItem::Empty
            }
        };
        if ready_tx.send(ready).is_err() {
            break;
        }
    }
}

/// Compiles one object and applies the optimistic-concurrency CAS,
/// retrying re-compilation up to `config.db_retries` times on a lost
/// race before surfacing `DocVersionConflict` (a
/// loser either retries and succeeds or surfaces the conflict).
fn prepare_one(
    item: &BulkItem,
    schema_service: &SchemaService,
    endpoint: &Endpoint,
    db: &Mutex<Box<dyn Database>>,
    documents: &DocumentsChangeSeq,
    db_path: &str,
    config: &Config,
) -> xapi_types::Result<Option<(String, xapi_schema::IndexedDocument)>> {
    let mut attempts = 0;
    loop {
        let indexed_doc = schema_service.index(endpoint, &item.object, item.doc_id.as_deref())?;
        if indexed_doc.term_id.is_empty() {
            return Ok(None);
        }

        let key = DocumentKey::new(db_path, indexed_doc.term_id.clone());
        let new_data = pending_data(&indexed_doc.data)?;
        let expected = documents.get(&key, || {
            db.lock().get_document(&indexed_doc.term_id).ok().flatten().unwrap_or_default()
        });

        match documents.set(&key, new_data, &expected) {
            SetOutcome::Accepted => return Ok(Some((indexed_doc.term_id.clone(), indexed_doc))),
            SetOutcome::Rejected(_current) if attempts < config.db_retries => {
                attempts += 1;
                continue;
            }
            SetOutcome::Rejected(_current) => {
                return Err(xapi_types::Error::DocVersionConflict {
                    id: indexed_doc.term_id.clone(),
                    expected: "observed snapshot".into(),
                    found: "concurrently-installed snapshot".into(),
                })
            }
        }
    }
}

/// The single indexer task: dequeues ready items in FIFO order and
/// applies winners under the database lock, releasing semaphore permits
/// back in batches of `limit_signal` to bound lock/condvar churn.
fn indexer_loop(
    ready_rx: &crossbeam_channel::Receiver<ReadyItem>,
    db: &Mutex<Box<dyn Database>>,
    semaphore: &Semaphore,
    limit_signal: usize,
    indexed: &AtomicUsize,
    failed: &AtomicUsize,
) {
    let mut since_release = 0usize;
    while let Ok(item) = ready_rx.recv() {
        match item {
            ReadyItem::Empty => {
                failed.fetch_add(1, Ordering::SeqCst);
            }
            ReadyItem::Prepared { term_id, doc } => {
                let mut guard = db.lock();
                match guard.replace_document_term(&term_id, &doc, false, false) {
                    Ok(()) => {
                        indexed.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(err) => {
                        tracing::error!(error = %err, %term_id, "replace_document_term failed");
                        failed.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }
        since_release += 1;
        if since_release >= limit_signal.max(1) {
            semaphore.release(since_release);
            since_release = 0;
        }
    }
    if since_release > 0 {
        semaphore.release(since_release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use xapi_schema::ForeignLoader;

    struct NoopLoader;
    impl ForeignLoader for NoopLoader {
        fn load_document(&self, _endpoint: &Endpoint) -> xapi_types::Result<Value> {
            Err(xapi_types::Error::NotFound("no foreign documents".into()))
        }
    }

    struct FakeDb {
        applied: std::sync::Arc<std::sync::Mutex<Vec<(String, Value)>>>,
    }
    impl Database for FakeDb {
        fn replace_document_term(
            &mut self,
            term_id: &str,
            doc: &xapi_schema::IndexedDocument,
            _commit: bool,
            _wal: bool,
        ) -> xapi_types::Result<()> {
            self.applied.lock().unwrap().push((term_id.to_string(), doc.data.clone()));
            Ok(())
        }
    }

    #[test]
    fn bulk_indexes_all_items() {
        let loader = NoopLoader;
        let schema_service = SchemaService::new(&loader);
        let endpoint = Endpoint::new("people");
        let applied = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let db: Mutex<Box<dyn Database>> = Mutex::new(Box::new(FakeDb { applied: applied.clone() }));
        let documents = DocumentsChangeSeq::new();
        let config = Config { doc_preparers: 2, bulk_buffer_size: 3, ..Config::default() };

        let items: Vec<BulkItem> = (0..10)
            .map(|i| BulkItem::with_id(format!("id{i}"), json!({"name": format!("user{i}"), "age": 20 + i})))
            .collect();

        let report = index_bulk(items, &schema_service, &endpoint, &db, &documents, "people", &config);
        assert_eq!(report.total, 10);
        assert_eq!(report.indexed, 10);
        assert_eq!(report.failed, 0);
        assert_eq!(applied.lock().unwrap().len(), 10);
    }

    #[test]
    fn unparseable_object_becomes_a_sentinel_failure() {
        let loader = NoopLoader;
        let schema_service = SchemaService::new(&loader);
        let endpoint = Endpoint::new("people");
        let applied = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let db: Mutex<Box<dyn Database>> = Mutex::new(Box::new(FakeDb { applied }));
        let documents = DocumentsChangeSeq::new();
        let config = Config::default();

        // A bare scalar is not a JSON object, so `Schema::index` errors.
        let items = vec![BulkItem::with_id("bad", json!("not-an-object"))];
        let report = index_bulk(items, &schema_service, &endpoint, &db, &documents, "people", &config);
        assert_eq!(report.total, 1);
        assert_eq!(report.indexed, 0);
        assert_eq!(report.failed, 1);
    }
}
