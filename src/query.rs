//! Store-agnostic filters and their translation into SPARQL and Elasticsearch queries.

pub mod elastic;
pub mod filter;
pub mod sparql;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use elastic::{ElasticOptions, ElasticQueryBuilder};
pub use filter::{filters_from_map, DataCategory, Filter, FilterInput, FilterOperator, FilterValue};
pub use sparql::{create_select_query, rewrite_sparql, SparqlQueryBuilder};

pub const DEFAULT_LIMIT: usize = 100;
pub const DEFAULT_OFFSET: usize = 0;

/// Maps free text (a label, a name) to the IRI of a known entity. Consulted by the query
/// builders for filter values the context does not know.
pub trait Resolver: Send + Sync {
    fn resolve(&self, text: &str) -> Option<String>;
}

impl<F> Resolver for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn resolve(&self, text: &str) -> Option<String> {
        self(text)
    }
}

/// Ask each resolver in turn.
pub(crate) fn resolve_with(resolvers: &[&dyn Resolver], text: &str) -> Option<String> {
    resolvers.iter().find_map(|resolver| resolver.resolve(text))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchEndpoint {
    #[default]
    Sparql,
    #[serde(alias = "elasticsearch")]
    Elastic,
}

impl fmt::Display for SearchEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchEndpoint::Sparql => f.write_str("sparql"),
            SearchEndpoint::Elastic => f.write_str("elastic"),
        }
    }
}

impl FromStr for SearchEndpoint {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sparql" => Ok(SearchEndpoint::Sparql),
            "elastic" | "elasticsearch" => Ok(SearchEndpoint::Elastic),
            other => Err(StoreError::Configuration(format!(
                "unknown search endpoint '{other}', expected one of: sparql, elastic"
            ))),
        }
    }
}

/// Options of [`crate::NexusStore::search`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    /// Log the generated query.
    pub debug: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub deprecated: bool,
    pub cross_bucket: bool,
    /// Restrict a cross-bucket search to this `organisation/project`.
    pub bucket: Option<String>,
    pub search_in_graph: bool,
    pub distinct: bool,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub search_endpoint: SearchEndpoint,
    pub retrieve_source: bool,
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams {
            debug: false,
            limit: Some(DEFAULT_LIMIT),
            offset: None,
            deprecated: false,
            cross_bucket: false,
            bucket: None,
            search_in_graph: true,
            distinct: false,
            includes: Vec::new(),
            excludes: Vec::new(),
            search_endpoint: SearchEndpoint::Sparql,
            retrieve_source: true,
        }
    }
}

impl SearchParams {
    /// Reject option combinations no endpoint can honour.
    pub fn check(&self) -> Result<(), StoreError> {
        if self.bucket.is_some() && !self.cross_bucket {
            return Err(StoreError::NotSupported(
                "the bucket option is only available with cross_bucket=true".to_string(),
            ));
        }
        if self.search_endpoint == SearchEndpoint::Sparql
            && (!self.includes.is_empty() || !self.excludes.is_empty())
        {
            return Err(StoreError::NotSupported(
                "field inclusion and exclusion are not supported when using SPARQL".to_string(),
            ));
        }
        Ok(())
    }
}
