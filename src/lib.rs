//! # nexus-store
//!
//! A client for Nexus-like knowledge graph stores: register, retrieve, update, tag, deprecate and
//! search JSON-LD resources over the store's HTTP API.
//!
//! ## Overview
//!
//! A [`NexusStore`] talks to one bucket (`organisation/project`) of a deployment. It keeps each
//! [`Resource`] in step with the server: after every operation the resource carries the store
//! metadata the server returned (`_rev`, `_self`, `_project`, ...), a `synchronized` flag and the
//! outcome of its last action.
//!
//! ### Key Features
//!
//! - **Batched writes**: every write has a batch flavour; requests share one connection pool, run
//!   concurrently up to `max_connection`, and each resource records its own success or failure
//! - **Query translation**: store-agnostic [`Filter`]s become SPARQL or Elasticsearch queries
//! - **Context aware**: short names are expanded through JSON-LD [`Context`]s, and [`Resolver`]s
//!   map free text to entity IRIs
//! - **Files**: uploads, streamed downloads and lazy attachments executed at registration time
//!
//! ## Architecture
//!
//! - **[`store`]**: the [`NexusStore`] façade (CRUD, retrieve, search, files, uri rewriting)
//! - **[`service`]**: HTTP plumbing shared by every operation: URLs, headers, batch execution,
//!   error classification and metadata synchronization
//! - **[`query`]**: the filter model and both query builders
//! - **[`resource`]**: resources, their properties and store metadata
//! - **[`context`]**: JSON-LD context handling
//! - **[`config`]**: store configuration, loadable from TOML
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nexus_store::{Filter, NexusStore, Resource, SearchParams, StoreConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StoreConfig::new("https://nexus.example.org/v1", "my-org/my-project")
//!         .with_token("...");
//!     let store = NexusStore::connect(config, None).await?;
//!
//!     let mut person = Resource::new().with("type", "Person").with("name", "Jane Doe");
//!     store.register(&mut person, None).await?;
//!     assert!(person.synchronized);
//!
//!     store.tag(&mut person, "v1.0").await?;
//!     let again = store.retrieve(person.id.as_deref().unwrap_or_default(), None, false, true).await?;
//!     println!("{:?}", again.rev());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod query;
pub mod resource;
pub mod service;
pub mod store;

pub use config::{StoreConfig, StoreConfigProvider, TomlConfigProvider};
pub use context::Context;
pub use error::*;
pub use query::{Filter, FilterOperator, FilterValue, Resolver, SearchEndpoint, SearchParams};
pub use resource::{LazyAction, Property, Resource, StoreMetadata};
pub use store::{NexusStore, Resources, Version};
