//! The schema service: translates a user object into terms/values/data for
//! a given field path, persists and retrieves schema snapshots, and
//! resolves foreign schema references.

pub mod alloc;
pub mod detect;
pub mod field_spec;
pub mod schema;
pub mod text;

pub use detect::DetectionFlags;
pub use field_spec::{ConcreteType, FieldKind, FieldSpec, IndexFlags, StemStrategy, StopStrategy};
pub use schema::{
    namespace_compound_text, CasOutcome, Endpoint, IndexedDocument, Schema, SchemaBody, SchemasLru, Term,
    MAX_SCHEMA_RECURSION, NAMESPACE_PREFIX,
};

use std::collections::HashSet;
use std::sync::Arc;
use xapi_types::{Error, Result};

/// The external collaborator that fetches another index's document by id
/// (out of scope here — only the trait boundary is defined).
/// `Sync` so a [`SchemaService`] built on it can be shared across the
/// preparer pool's worker threads.
pub trait ForeignLoader: Sync {
    fn load_document(&self, endpoint: &Endpoint) -> Result<serde_json::Value>;
}

/// Ties a [`SchemasLru`] to a [`ForeignLoader`] to implement the full
/// `get`/`set`/`drop`/`index` contract.
pub struct SchemaService<'a> {
    pub lru: SchemasLru,
    pub loader: &'a dyn ForeignLoader,
}

impl<'a> SchemaService<'a> {
    pub fn new(loader: &'a dyn ForeignLoader) -> Self {
        SchemaService { lru: SchemasLru::new(), loader }
    }

    /// Loads the current snapshot for `endpoint.path`. If the local entry
    /// is a foreign stub, resolves it (bounded by [`MAX_SCHEMA_RECURSION`]
    /// and cycle detection); any load failure is absorbed and the local
    /// (unresolved) snapshot returned instead.
    pub fn get(&self, endpoint: &Endpoint, require_foreign: bool) -> (Arc<Schema>, Option<String>) {
        let local = self.lru.get(&endpoint.path);
        match &local.body {
            SchemaBody::Foreign { endpoint: foreign_ep } => {
                let mut context = HashSet::new();
                match self.resolve_foreign(foreign_ep, &mut context) {
                    Ok(resolved) => (Arc::new(resolved), Some(foreign_ep.clone())),
                    Err(_) => (local, Some(foreign_ep.clone())),
                }
            }
            SchemaBody::Local { .. } => {
                let synthesised = if require_foreign {
                    Some(schema::resolve_default_endpoint(&endpoint.path, true, None).unwrap())
                } else {
                    None
                };
                (local, synthesised)
            }
        }
    }

    /// Resolves `endpoint_str` to a usable [`Schema`]: fetches the target
    /// document via the loader, then reads its `schema` metadata key
    /// (see `xapi_types::reserved::SCHEMA_FIELD_NAME`). That key is
    /// either a foreign stub (`{"_endpoint": "..."}`, followed
    /// recursively) or a serialised [`Schema`] snapshot (deserialised
    /// directly); an absent or malformed key surfaces as an error the
    /// caller absorbs, returning the local unresolved schema instead.
    fn resolve_foreign(&self, endpoint_str: &str, context: &mut HashSet<String>) -> Result<Schema> {
        if context.len() > MAX_SCHEMA_RECURSION {
            return Err(Error::ForeignSchema(format!("maximum recursion reached resolving {endpoint_str}")));
        }
        if !context.insert(endpoint_str.to_string()) {
            return Err(Error::ForeignSchema(format!("cyclic schema reference detected: {endpoint_str}")));
        }
        let endpoint = Endpoint::parse(endpoint_str)?;
        let obj = self.loader.load_document(&endpoint)?;
        let schema_value = obj
            .get(xapi_types::reserved::SCHEMA_FIELD_NAME)
            .ok_or_else(|| Error::ForeignSchema(format!("'{endpoint_str}' carries no schema metadata")))?;

        if let Some(nested) = schema_value.get("_endpoint").and_then(|v| v.as_str()) {
            return self.resolve_foreign(nested, context);
        }

        serde_json::from_value(schema_value.clone())
            .map_err(|e| Error::ForeignSchema(format!("'{endpoint_str}' schema metadata is malformed: {e}")))
    }

    /// CAS-installs `new` at `endpoint.path`.
    pub fn set(&self, endpoint: &Endpoint, expected: &Arc<Schema>, new: Arc<Schema>) -> bool {
        matches!(self.lru.set(&endpoint.path, expected, new), CasOutcome::Accepted)
    }

    /// CAS-removes the snapshot at `endpoint.path`.
    pub fn drop(&self, endpoint: &Endpoint, expected: &Arc<Schema>) -> bool {
        self.lru.drop(&endpoint.path, expected)
    }

    /// The main write path: compiles `object` against the current
    /// snapshot at `endpoint.path` and installs the resulting schema via
    /// CAS, retrying on a concurrent writer the way the source's
    /// side-effect-free-until-final-store CAS loop does.
    pub fn index(&self, endpoint: &Endpoint, object: &serde_json::Value, doc_id: Option<&str>) -> Result<IndexedDocument> {
        loop {
            let current = self.lru.get(&endpoint.path);
            if current.is_foreign() {
                return Err(Error::ForeignSchema("cannot index directly against a foreign schema".into()));
            }
            let (new_schema, doc) = schema::index(&current, object, doc_id)?;
            match self.lru.set(&endpoint.path, &current, Arc::new(new_schema)) {
                CasOutcome::Accepted => return Ok(doc),
                CasOutcome::Rejected(_) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NoopLoader;
    impl ForeignLoader for NoopLoader {
        fn load_document(&self, _endpoint: &Endpoint) -> Result<serde_json::Value> {
            Err(Error::NotFound("no foreign documents in this test".into()))
        }
    }

    #[test]
    fn service_index_round_trips_through_cas() {
        let loader = NoopLoader;
        let service = SchemaService::new(&loader);
        let endpoint = Endpoint::new("people");
        let doc = service.index(&endpoint, &json!({"name": "Alice", "age": 30}), Some("a")).unwrap();
        assert_eq!(doc.term_id, "Qa");
        let (snapshot, _) = service.get(&endpoint, false);
        assert!(snapshot.field("name").is_some());
    }

    #[test]
    fn foreign_load_failure_is_absorbed() {
        let loader = NoopLoader;
        let service = SchemaService::new(&loader);
        let endpoint = Endpoint::new("people");
        let current = service.lru.get(&endpoint.path);
        service.set(&endpoint, &current, Arc::new(Schema::foreign("other/idx".to_string())));
        let (_, foreign_ref) = service.get(&endpoint, false);
        assert_eq!(foreign_ref.as_deref(), Some("other/idx"));
    }
}
