//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use mockito::{Matcher, Server};
use nexus_store::{Context, NexusStore, Resource, StoreConfig, StoreMetadata};
use serde_json::{json, Value};

pub const BUCKET: &str = "test/kgforge";
pub const TOKEN: &str = "token";

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times: subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

#[allow(dead_code)]
pub fn config(server: &Server) -> StoreConfig {
    StoreConfig::new(server.url(), BUCKET).with_token(TOKEN)
}

#[allow(dead_code)]
pub fn model_context() -> Context {
    Context::new(json!({
        "@context": {
            "@base": "http://data.net",
            "@vocab": "http://example.org/vocab/",
            "Person": "http://schema.org/Person",
            "Building": "http://schema.org/Building",
            "name": "http://schema.org/name",
        }
    }))
    .unwrap()
}

/// A store over `test/kgforge` served by `server`, built without the project lookup.
#[allow(dead_code)]
pub fn store(server: &Server) -> NexusStore {
    init_logging();
    let project = Context::from_project(
        Some("http://data.net"),
        Some("http://vocab.net"),
        [("datashapes", "https://neuroshapes.org/dash/")],
    );
    NexusStore::with_context(config(server), project, Some(model_context())).unwrap()
}

/// Matches exactly `path`, with or without a query string.
#[allow(dead_code)]
pub fn path(path: &str) -> Matcher {
    Matcher::Regex(format!(r"^{}(\?.*)?$", regex::escape(path)))
}

/// Same encoding as the store uses for path segments.
#[allow(dead_code)]
pub fn quote(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Server answer for a write on `id` at `rev`.
#[allow(dead_code)]
pub fn metadata_payload(server: &Server, id: &str, rev: u64) -> Value {
    json!({
        "@context": ["https://bluebrain.github.io/nexus/contexts/metadata.json"],
        "@id": id,
        "_self": format!("{}/resources/{BUCKET}/_/{}", server.url(), quote(id)),
        "_rev": rev,
        "_deprecated": false,
        "_project": format!("{}/projects/{BUCKET}", server.url()),
        "_constrainedBy": "https://bluebrain.github.io/nexus/schemas/unconstrained.json",
        "_createdAt": "2024-03-01T10:00:00Z",
        "_updatedAt": "2024-03-01T10:00:00Z",
    })
}

#[allow(dead_code)]
pub fn person(name: &str) -> Resource {
    Resource::new().with("type", "Person").with("name", name)
}

/// A person already known to the store at `rev`.
#[allow(dead_code)]
pub fn registered_person(id: &str, rev: u64) -> Resource {
    let mut resource = Resource::with_id(id)
        .with("type", "Person")
        .with("name", "Jane");
    resource.store_metadata = Some(StoreMetadata {
        rev: Some(rev),
        ..Default::default()
    });
    resource.synchronized = true;
    resource
}
