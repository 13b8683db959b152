//! Shared fixtures for unit tests

use serde_json::json;

use crate::{
    config::StoreConfig,
    context::Context,
    resource::{Resource, StoreMetadata},
    service::Service,
    store::NexusStore,
};

pub const NEXUS: &str = "https://nexus-instance.org";
pub const BUCKET: &str = "test/kgforge";
pub const TOKEN: &str = "token";

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn test_config() -> StoreConfig {
    StoreConfig::new(NEXUS, BUCKET).with_token(TOKEN)
}

pub fn test_service() -> Service {
    init_logging();
    Service::new(test_config()).expect("test configuration is valid")
}

/// A store over the `test/kgforge` project, built without contacting the server.
pub fn test_store() -> NexusStore {
    init_logging();
    NexusStore::with_context(test_config(), nexus_context(), Some(model_context()))
        .expect("test configuration is valid")
}

/// The context a model would provide: a base, a vocab, one prefix and a few terms.
pub fn model_context() -> Context {
    Context::new(json!({
        "@context": {
            "@base": "http://data.net",
            "@vocab": "http://example.org/vocab/",
            "datashapes": "https://neuroshapes.org/dash/",
            "Person": "http://schema.org/Person",
            "Building": "http://schema.org/Building",
            "name": "http://schema.org/name",
            "affiliation": {"@id": "http://schema.org/affiliation", "@type": "@id"},
        }
    }))
    .expect("valid model context")
}

/// The context of the `test/kgforge` project as the server describes it.
pub fn nexus_context() -> Context {
    Context::from_project(
        Some("http://data.net"),
        Some("http://vocab.net"),
        [("datashapes", "https://neuroshapes.org/dash/")],
    )
}

pub fn store_context() -> Context {
    Context::from_project(
        Some("https://nexus-instance.org/test/kgforge/_/"),
        Some("https://nexus-instance.org/test/kgforge/"),
        [("nxv", "https://bluebrain.github.io/nexus/vocabulary/")],
    )
}

/// Terms used by the query builder tests. `type` maps to an unexpanded `rdf:type`.
pub fn querying_context() -> Context {
    Context::new(json!({
        "@context": {
            "@vocab": "http://example.org/vocab/",
            "contribution": {"@id": "https://neuroshapes.org/contribution", "@type": "@id"},
            "agent": {"@id": "http://www.w3.org/ns/prov#agent", "@type": "@id"},
            "type": "rdf:type",
            "Person": "http://schema.org/Person",
            "address": "http://schema.org/address",
            "name": "http://schema.org/name",
            "postalCode": "http://schema.org/postalCode",
            "streetAddress": "http://schema.org/streetAddress",
            "deprecated": "https://bluebrain.github.io/nexus/vocabulary/deprecated",
            "identifier": {"@type": "@id", "@id": "http://schema.org/identifier"},
            "affiliation": {"@id": "http://schema.org/affiliation", "@type": "@id"},
        }
    }))
    .expect("valid querying context")
}

/// A building as returned by a successful registration, at revision 1.
pub fn registered_building() -> Resource {
    let mut building = Resource::with_id("http://data.net/5ee3c6b8-9bb4-4d52-a1ae-36a2e8b8c0f1")
        .with("type", "Building")
        .with("name", "The Empire State Building");
    building.context = Some(model_context().payload_context());
    building.store_metadata = Some(StoreMetadata {
        rev: Some(1),
        deprecated: Some(false),
        updated_by: Some("http://integration.kgforge.test".to_string()),
        constrained_by: Some("http://schema.org/Building".to_string()),
        ..Default::default()
    });
    building.synchronized = true;
    building
}
