//! JSON-LD context handling: just enough to map short names to IRIs and back.
//!
//! Remote context resolution is left to the caller; a [`Context`] is built from an already
//! fetched document or from a project's API mappings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::StoreError;

/// A named entry of a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub name: String,
    pub id: String,
    /// The declared `@type` coercion, e.g. `@id` for IRI valued properties.
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    iri: Option<String>,
    document: Value,
    terms: BTreeMap<String, Term>,
    prefixes: BTreeMap<String, String>,
    base: Option<String>,
    vocab: Option<String>,
}

/// True when `s` parses as a URL with both a scheme and a host.
pub fn is_valid_url(s: &str) -> bool {
    Url::parse(s)
        .map(|url| url.has_host() && !url.cannot_be_a_base())
        .unwrap_or(false)
}

impl Context {
    /// Build a context from a document of the form `{"@context": ...}` or from the bare
    /// context object. Nested arrays are merged in order; string entries (remote contexts) are
    /// kept in the document but contribute no terms.
    pub fn new(document: Value) -> Result<Context, StoreError> {
        let document = if document.get("@context").is_some() {
            document
        } else if document.is_object() || document.is_array() {
            let mut wrapped = Map::new();
            wrapped.insert("@context".to_string(), document);
            Value::Object(wrapped)
        } else {
            return Err(StoreError::Configuration(format!(
                "a context must be a JSON object or array, got {document}"
            )));
        };
        let mut ctx = Context {
            document: document.clone(),
            ..Default::default()
        };
        if let Some(inner) = document.get("@context") {
            ctx.load(inner)?;
        }
        ctx.expand_term_ids();
        Ok(ctx)
    }

    pub fn with_iri(iri: impl Into<String>, document: Value) -> Result<Context, StoreError> {
        let mut ctx = Context::new(document)?;
        ctx.iri = Some(iri.into());
        Ok(ctx)
    }

    /// Build the context of a store project from its `base`, `vocab` and API mappings
    /// (`prefix` -> `namespace`).
    pub fn from_project<'a, I>(base: Option<&str>, vocab: Option<&str>, mappings: I) -> Context
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut inner = Map::new();
        if let Some(base) = base {
            inner.insert("@base".to_string(), Value::String(base.to_string()));
        }
        if let Some(vocab) = vocab {
            inner.insert("@vocab".to_string(), Value::String(vocab.to_string()));
        }
        for (prefix, namespace) in mappings {
            inner.insert(prefix.to_string(), Value::String(namespace.to_string()));
        }
        let mut ctx = Context {
            document: Value::Object(Map::from_iter([(
                "@context".to_string(),
                Value::Object(inner.clone()),
            )])),
            ..Default::default()
        };
        ctx.load_object(&inner);
        ctx.expand_term_ids();
        ctx
    }

    fn load(&mut self, value: &Value) -> Result<(), StoreError> {
        match value {
            Value::Object(map) => {
                self.load_object(map);
                Ok(())
            }
            Value::Array(items) => {
                for item in items {
                    self.load(item)?;
                }
                Ok(())
            }
            Value::String(remote) => {
                tracing::debug!("[Context] not resolving remote context {remote}");
                Ok(())
            }
            Value::Null => Ok(()),
            other => Err(StoreError::Configuration(format!(
                "unsupported context entry {other}"
            ))),
        }
    }

    fn load_object(&mut self, map: &Map<String, Value>) {
        for (key, value) in map.iter() {
            match (key.as_str(), value) {
                ("@base", Value::String(base)) => self.base = Some(base.clone()),
                ("@vocab", Value::String(vocab)) => self.vocab = Some(vocab.clone()),
                (k, _) if k.starts_with('@') => {}
                (k, Value::String(id)) => {
                    if !k.contains(':') && (id.ends_with('/') || id.ends_with('#')) {
                        self.prefixes.insert(k.to_string(), id.clone());
                    }
                    self.terms.insert(
                        k.to_string(),
                        Term {
                            name: k.to_string(),
                            id: id.clone(),
                            kind: None,
                        },
                    );
                }
                (k, Value::Object(definition)) => {
                    let id = definition.get("@id").and_then(Value::as_str);
                    let kind = definition
                        .get("@type")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    if let Some(id) = id {
                        if definition.get("@prefix").and_then(Value::as_bool) == Some(true) {
                            self.prefixes.insert(k.to_string(), id.to_string());
                        }
                        self.terms.insert(
                            k.to_string(),
                            Term {
                                name: k.to_string(),
                                id: id.to_string(),
                                kind,
                            },
                        );
                    }
                }
                _ => {}
            }
        }
    }

    /// Expand compact term ids (`schema:name`) once every prefix is known.
    fn expand_term_ids(&mut self) {
        let prefixes = self.prefixes.clone();
        for term in self.terms.values_mut() {
            if let Some((prefix, local)) = term.id.split_once(':') {
                if let Some(namespace) = prefixes.get(prefix) {
                    term.id = format!("{namespace}{local}");
                }
            }
        }
    }

    pub fn iri(&self) -> Option<&str> {
        self.iri.as_deref()
    }

    pub fn is_http_iri(&self) -> bool {
        self.iri
            .as_deref()
            .map(|iri| iri.starts_with("http"))
            .unwrap_or(false)
    }

    /// The full document, `{"@context": ...}`.
    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    pub fn vocab(&self) -> Option<&str> {
        self.vocab.as_deref()
    }

    pub fn has_vocab(&self) -> bool {
        self.vocab.is_some()
    }

    pub fn prefixes(&self) -> &BTreeMap<String, String> {
        &self.prefixes
    }

    pub fn terms(&self) -> &BTreeMap<String, Term> {
        &self.terms
    }

    pub fn term(&self, name: &str) -> Option<&Term> {
        self.terms.get(name)
    }

    /// Reverse lookup: the term whose IRI is `iri`.
    pub fn find_term(&self, iri: &str) -> Option<&Term> {
        self.terms.values().find(|term| term.id == iri)
    }

    /// True when `value` is a compact IRI over a known prefix.
    pub fn is_curie(&self, value: &str) -> bool {
        value
            .split_once(':')
            .map(|(prefix, local)| !local.starts_with("//") && self.prefixes.contains_key(prefix))
            .unwrap_or(false)
    }

    /// Expand a prefix, term, compact IRI or absolute IRI. Unknown bare names fall back to
    /// `@vocab` when one is declared.
    pub fn expand(&self, value: &str) -> Option<String> {
        if let Some(namespace) = self.prefixes.get(value) {
            return Some(namespace.clone());
        }
        if let Some(term) = self.terms.get(value) {
            return Some(term.id.clone());
        }
        if let Some((prefix, local)) = value.split_once(':') {
            if let Some(namespace) = self.prefixes.get(prefix) {
                return Some(format!("{namespace}{local}"));
            }
            if is_valid_url(value) {
                return Some(value.to_string());
            }
            return None;
        }
        self.vocab.as_ref().map(|vocab| format!("{vocab}{value}"))
    }

    /// Resolve an identifier against the context: absolute IRIs are returned as is, compact IRIs
    /// are expanded, anything else is resolved against `@base`.
    pub fn resolve_iri(&self, id: &str) -> String {
        if is_valid_url(id) {
            return id.to_string();
        }
        if self.is_curie(id) {
            if let Some(expanded) = self.expand(id) {
                return expanded;
            }
        }
        match self.base.as_deref().map(Url::parse) {
            Some(Ok(base)) => base
                .join(id)
                .map(|url| url.to_string())
                .unwrap_or_else(|_| id.to_string()),
            _ => id.to_string(),
        }
    }

    /// The value to embed as `@context` in payloads: the remote IRI when there is one, else the
    /// inline context.
    pub fn payload_context(&self) -> Value {
        match self.iri.as_deref() {
            Some(iri) if self.is_http_iri() => Value::String(iri.to_string()),
            _ => self
                .document
                .get("@context")
                .cloned()
                .unwrap_or(Value::Null),
        }
    }
}
