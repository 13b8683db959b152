use std::{
    collections::BTreeMap,
    fs::read_to_string,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

pub const DEFAULT_MAX_CONNECTION: i64 = 50;
pub const DEFAULT_VERSIONED_ID_TEMPLATE: &str = "{id}?rev={rev}";
pub const DEFAULT_LD_JSON: &str = "application/ld+json";
pub const NEXUS_NAMESPACE: &str = "https://bluebrain.github.io/nexus/vocabulary/";
pub const NEXUS_METADATA_CONTEXT: &str = "https://bluebrain.github.io/nexus/contexts/metadata.json";

fn default_max_connection() -> i64 {
    DEFAULT_MAX_CONNECTION
}

fn default_versioned_id_template() -> String {
    DEFAULT_VERSIONED_ID_TEMPLATE.to_string()
}

fn default_ld_json() -> String {
    DEFAULT_LD_JSON.to_string()
}

fn default_download_accept() -> String {
    "*/*".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataContextConfig {
    pub iri: String,
    /// Inline metadata context document. When absent the built-in Nexus metadata terms are used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Value>,
}

impl Default for MetadataContextConfig {
    fn default() -> Self {
        MetadataContextConfig {
            iri: NEXUS_METADATA_CONTEXT.to_string(),
            document: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VocabularyConfig {
    pub metadata: MetadataContextConfig,
    pub namespace: String,
    pub project_property: String,
    pub deprecated_property: String,
    pub revision_property: String,
}

impl Default for VocabularyConfig {
    fn default() -> Self {
        VocabularyConfig {
            metadata: MetadataContextConfig::default(),
            namespace: NEXUS_NAMESPACE.to_string(),
            project_property: format!("{NEXUS_NAMESPACE}project"),
            deprecated_property: format!("{NEXUS_NAMESPACE}deprecated"),
            revision_property: format!("{NEXUS_NAMESPACE}rev"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparqlEndpointConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElasticEndpointConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// The view whose mapping is fetched when no inline `mapping` is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<Value>,
    #[serde(default = "default_keyword_field")]
    pub default_str_keyword_field: Option<String>,
}

fn default_keyword_field() -> Option<String> {
    Some("keyword".to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchEndpointsConfig {
    #[serde(default)]
    pub sparql: SparqlEndpointConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elastic: Option<ElasticEndpointConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesConfig {
    #[serde(rename = "Accept")]
    pub accept: String,
}

/// Everything needed to talk to one bucket (`organisation/project`) of a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_max_connection")]
    pub max_connection: i64,
    #[serde(default = "default_versioned_id_template")]
    pub versioned_id_template: String,
    #[serde(default)]
    pub vocabulary: VocabularyConfig,
    #[serde(default)]
    pub searchendpoints: SearchEndpointsConfig,
    #[serde(rename = "Content-Type", default = "default_ld_json")]
    pub content_type: String,
    #[serde(rename = "Accept", default = "default_ld_json")]
    pub accept: String,
    #[serde(default = "FilesConfig::upload")]
    pub files_upload: FilesConfig,
    #[serde(default = "FilesConfig::download")]
    pub files_download: FilesConfig,
    /// Extra query parameters per operation (`register`, `update`, `tag`, `deprecate`,
    /// `retrieve`, `download`).
    #[serde(default)]
    pub params: BTreeMap<String, BTreeMap<String, Value>>,
}

impl FilesConfig {
    fn upload() -> FilesConfig {
        FilesConfig {
            accept: default_ld_json(),
        }
    }

    fn download() -> FilesConfig {
        FilesConfig {
            accept: default_download_accept(),
        }
    }
}

impl StoreConfig {
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>) -> StoreConfig {
        StoreConfig {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            token: None,
            max_connection: DEFAULT_MAX_CONNECTION,
            versioned_id_template: default_versioned_id_template(),
            vocabulary: VocabularyConfig::default(),
            searchendpoints: SearchEndpointsConfig::default(),
            content_type: default_ld_json(),
            accept: default_ld_json(),
            files_upload: FilesConfig::upload(),
            files_download: FilesConfig::download(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> StoreConfig {
        self.token = Some(token.into());
        self
    }

    pub fn from_toml_str(content: &str) -> Result<StoreConfig, StoreError> {
        let config: StoreConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(value: Value) -> Result<StoreConfig, StoreError> {
        let config: StoreConfig = serde_json::from_value(value)
            .map_err(|e| StoreError::Configuration(format!("invalid store configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Fail early on settings the store cannot work with.
    pub fn validate(&self) -> Result<(), StoreError> {
        self.organisation_project()?;
        if self.max_connection <= 0 {
            return Err(StoreError::Configuration(format!(
                "max_connection value should be strictly positive ({} provided)",
                self.max_connection
            )));
        }
        if !self.versioned_id_template.contains("{id}") {
            return Err(StoreError::Configuration(format!(
                "versioned_id_template '{}' must contain an {{id}} placeholder",
                self.versioned_id_template
            )));
        }
        Ok(())
    }

    /// Split `bucket` into its organisation and project.
    pub fn organisation_project(&self) -> Result<(String, String), StoreError> {
        match self.bucket.split_once('/') {
            Some((org, project))
                if !org.is_empty() && !project.is_empty() && !project.contains('/') =>
            {
                Ok((org.to_string(), project.to_string()))
            }
            _ => Err(StoreError::Configuration(format!(
                "malformed bucket parameter '{}', expected 'organisation/project'",
                self.bucket
            ))),
        }
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }

    /// Query parameters configured for `operation`, rendered as strings.
    pub fn params_for(&self, operation: &str) -> Vec<(String, String)> {
        self.params
            .get(operation)
            .map(|params| {
                params
                    .iter()
                    .map(|(k, v)| {
                        let v = match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), v)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fill in the versioned id template.
    pub fn versioned_id(&self, id: &str, rev: u64) -> String {
        self.versioned_id_template
            .replace("{id}", id)
            .replace("{rev}", &rev.to_string())
    }
}

/// A source of store configuration.
pub trait StoreConfigProvider: Send + Sync {
    fn load(&self) -> Result<StoreConfig, StoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }
}

impl StoreConfigProvider for TomlConfigProvider {
    fn load(&self) -> Result<StoreConfig, StoreError> {
        tracing::debug!("Attempting to read store configuration from: {:?}", &self.path);
        if !self.path.exists() {
            return Err(StoreError::Configuration(format!(
                "configuration file {:?} not found",
                self.path
            )));
        }
        StoreConfig::from_toml_str(&get_content(&self.path)?)
    }
}

pub fn get_content<P: AsRef<Path>>(path: P) -> Result<String, StoreError> {
    tracing::debug!("Reading {:?}", path.as_ref());
    Ok(read_to_string(path)?)
}
