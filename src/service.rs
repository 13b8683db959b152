//! HTTP plumbing shared by every store operation: URLs, headers, request preparation, bounded
//! concurrent batches, error classification and metadata synchronization.

use std::path::{Path, PathBuf};

use futures::{future::join_all, stream::FuturesUnordered, StreamExt};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    multipart, Client as HttpClient, Method, Response,
};
use serde_json::{json, Map, Value};
use tokio::{io::AsyncWriteExt, sync::OnceCell, sync::Semaphore};

use crate::{
    config::StoreConfig,
    context::Context,
    error::{ErrorKind, StoreError},
    resource::{Action, LazyAction, Property, Resource, StoreMetadata},
};

pub const UNCONSTRAINED_SCHEMA: &str =
    "https://bluebrain.github.io/nexus/schemas/unconstrained.json";
pub const DEFAULT_SPARQL_INDEX: &str =
    "https://bluebrain.github.io/nexus/vocabulary/defaultSparqlIndex";
pub const DEFAULT_ELASTIC_INDEX: &str =
    "https://bluebrain.github.io/nexus/vocabulary/defaultElasticSearchIndex";

/// Metadata keys bound by SPARQL searches that retrieve sources.
pub const STORE_METADATA_KEYS: [&str; 12] = [
    "_constrainedBy",
    "_createdAt",
    "_createdBy",
    "_deprecated",
    "_incoming",
    "_outgoing",
    "_project",
    "_rev",
    "_schemaProject",
    "_self",
    "_updatedAt",
    "_updatedBy",
];

/// Form-encode a path segment: `/` and `:` are escaped, spaces become `+`.
pub fn quote_plus(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

pub fn unquote(s: &str) -> String {
    percent_encoding::percent_decode_str(s)
        .decode_utf8_lossy()
        .into_owned()
}

/// `ResourceNotFound` -> `resource not found`.
fn split_camel_case(s: &str) -> String {
    let mut words = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() && i > 0 {
            words.push(' ');
        }
        words.extend(c.to_lowercase());
    }
    words
}

fn format_message(msg: &str) -> String {
    let msg = msg.trim().trim_end_matches('.');
    let mut chars = msg.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A readable reason extracted from a store error body.
pub fn error_message(body: &Value) -> Option<String> {
    let mut messages = Vec::new();
    for key in ["reason", "details"] {
        if let Some(text) = body.get(key).and_then(Value::as_str) {
            messages.push(format_message(text));
        }
    }
    if messages.is_empty() {
        if let Some(kind) = body.get("@type").and_then(Value::as_str) {
            messages.push(split_camel_case(kind));
        }
    }
    (!messages.is_empty()).then(|| messages.join("\n"))
}

/// Turn a non-success response into an error of `kind`.
pub async fn check_response(response: Response, kind: ErrorKind) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|body| error_message(&body))
        .unwrap_or_else(|| {
            if text.trim().is_empty() {
                status.to_string()
            } else {
                format!("{status}: {text}")
            }
        });
    Err(StoreError::from_kind(kind, message))
}

/// The JSON body of a successful response. Empty bodies read as `null`.
pub async fn json_response(response: Response, kind: ErrorKind) -> Result<Value, StoreError> {
    let response = check_response(response, kind).await?;
    let text = response
        .text()
        .await
        .map_err(|e| StoreError::from(e).rewrap(kind))?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| StoreError::from(e).rewrap(kind))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchAction {
    Create,
    Update,
    Tag,
    Deprecate,
    Fetch,
}

impl BatchAction {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            BatchAction::Create => ErrorKind::Registration,
            BatchAction::Update => ErrorKind::Updating,
            BatchAction::Tag => ErrorKind::Tagging,
            BatchAction::Deprecate => ErrorKind::Deprecation,
            BatchAction::Fetch => ErrorKind::Querying,
        }
    }
}

/// A fully prepared request; owns everything it needs so it can run detached from the resource.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub index: usize,
    pub method: Method,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub index: usize,
    pub response: Result<Value, StoreError>,
}

/// Preconditions checked before any resource is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub id_required: bool,
    pub required_synchronized: Option<bool>,
    pub execute_actions: bool,
}

/// Reference to an uploaded file, as stored in the property that attached it.
pub fn file_reference(response: &Value) -> Resource {
    let mut reference = Resource::new().with("type", "DataDownload");
    reference.id = response
        .get("@id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let copy = [
        ("_self", "contentUrl"),
        ("_filename", "name"),
        ("_mediaType", "encodingFormat"),
    ];
    for (from, to) in copy {
        if let Some(value) = response.get(from).filter(|v| !v.is_null()) {
            reference
                .properties
                .insert(to.to_string(), Property::Value(value.clone()));
        }
    }
    if let Some(bytes) = response.get("_bytes").filter(|v| v.is_number()) {
        reference.properties.insert(
            "contentSize".to_string(),
            Property::Value(json!({"unitCode": "bytes", "value": bytes})),
        );
    }
    if let Some(digest) = response.get("_digest").filter(|v| v.is_object()) {
        reference.properties.insert(
            "digest".to_string(),
            Property::Value(json!({
                "algorithm": digest.get("_algorithm"),
                "value": digest.get("_value"),
            })),
        );
    }
    reference
}

fn default_metadata_context(namespace: &str, iri: &str) -> Result<Context, StoreError> {
    let mut inner = Map::new();
    inner.insert("nxv".to_string(), Value::String(namespace.to_string()));
    for key in STORE_METADATA_KEYS {
        let local = key.trim_start_matches('_');
        inner.insert(key.to_string(), json!({"@id": format!("{namespace}{local}")}));
    }
    for key in ["_filename", "_mediaType", "_bytes", "_digest", "_location", "_uuid"] {
        let local = key.trim_start_matches('_');
        inner.insert(key.to_string(), json!({"@id": format!("{namespace}{local}")}));
    }
    Context::with_iri(iri, json!({"@context": inner}))
}

pub struct Service {
    pub(crate) config: StoreConfig,
    pub endpoint: String,
    pub organisation: String,
    pub project: String,
    pub max_connection: usize,
    pub url_resources: String,
    pub url_files: String,
    pub url_resolver: String,
    pub url_project: String,
    pub sparql_endpoint: String,
    pub elastic_endpoint: String,
    pub elastic_view: String,
    pub default_str_keyword_field: Option<String>,
    pub metadata_context: Context,
    pub project_property: String,
    pub deprecated_property: String,
    pub revision_property: String,
    elastic_mapping: OnceCell<Option<Value>>,
    client: HttpClient,
    headers: HeaderMap,
    headers_sparql: HeaderMap,
    headers_elastic: HeaderMap,
    headers_upload: HeaderMap,
    headers_download: HeaderMap,
}

impl Service {
    pub fn new(config: StoreConfig) -> Result<Service, StoreError> {
        config.validate()?;
        let (organisation, project) = config.organisation_project()?;
        let endpoint = config.endpoint().to_string();
        let bucket = format!("{}/{}", quote_plus(&organisation), quote_plus(&project));

        let sparql_endpoint = config
            .searchendpoints
            .sparql
            .endpoint
            .clone()
            .unwrap_or_else(|| {
                format!(
                    "{endpoint}/views/{bucket}/{}/sparql",
                    quote_plus(DEFAULT_SPARQL_INDEX)
                )
            });
        let elastic = config.searchendpoints.elastic.clone().unwrap_or_default();
        let elastic_view = format!(
            "{endpoint}/views/{bucket}/{}",
            quote_plus(elastic.view.as_deref().unwrap_or(DEFAULT_ELASTIC_INDEX))
        );
        let elastic_endpoint = elastic
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("{elastic_view}/_search"));
        let default_str_keyword_field = match config.searchendpoints.elastic {
            Some(_) => elastic.default_str_keyword_field.clone(),
            None => Some("keyword".to_string()),
        };
        let elastic_mapping = match elastic.mapping {
            Some(mapping) => OnceCell::new_with(Some(Some(mapping))),
            None => OnceCell::new(),
        };

        let vocabulary = &config.vocabulary;
        let metadata_context = match &vocabulary.metadata.document {
            Some(document) => Context::with_iri(&vocabulary.metadata.iri, document.clone())?,
            None => default_metadata_context(&vocabulary.namespace, &vocabulary.metadata.iri)?,
        };

        let client = HttpClient::builder()
            .build()
            .map_err(|e| StoreError::Configuration(format!("cannot build HTTP client: {e}")))?;

        let auth = match &config.token {
            Some(token) if !token.is_empty() => {
                Some(HeaderValue::from_str(&format!("Bearer {token}"))?)
            }
            _ => None,
        };
        let headers_with = |pairs: &[(reqwest::header::HeaderName, &str)]| {
            let mut headers = HeaderMap::new();
            for (name, value) in pairs {
                headers.insert(name.clone(), HeaderValue::from_str(value)?);
            }
            if let Some(auth) = &auth {
                headers.insert(AUTHORIZATION, auth.clone());
            }
            Ok::<HeaderMap, StoreError>(headers)
        };
        let headers = headers_with(&[
            (CONTENT_TYPE, config.content_type.as_str()),
            (ACCEPT, config.accept.as_str()),
        ])?;
        let headers_sparql = headers_with(&[
            (CONTENT_TYPE, "application/sparql-query"),
            (ACCEPT, "application/sparql-results+json"),
        ])?;
        let headers_elastic = headers_with(&[
            (CONTENT_TYPE, "application/json"),
            (ACCEPT, "application/json"),
        ])?;
        let headers_upload = headers_with(&[(ACCEPT, config.files_upload.accept.as_str())])?;
        let headers_download = headers_with(&[(ACCEPT, config.files_download.accept.as_str())])?;

        Ok(Service {
            url_resources: format!("{endpoint}/resources/{bucket}"),
            url_files: format!("{endpoint}/files/{bucket}"),
            url_resolver: format!("{endpoint}/resolvers/{bucket}"),
            url_project: format!("{endpoint}/projects/{organisation}/{project}"),
            max_connection: config.max_connection as usize,
            project_property: vocabulary.project_property.clone(),
            deprecated_property: vocabulary.deprecated_property.clone(),
            revision_property: vocabulary.revision_property.clone(),
            sparql_endpoint,
            elastic_endpoint,
            elastic_view,
            default_str_keyword_field,
            elastic_mapping,
            metadata_context,
            endpoint,
            organisation,
            project,
            client,
            headers,
            headers_sparql,
            headers_elastic,
            headers_upload,
            headers_download,
            config,
        })
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// `<endpoint>/projects/<bucket>`, the value of `_project` for resources of `bucket`.
    pub fn project_url(&self, bucket: Option<&str>) -> String {
        match bucket {
            Some(bucket) => format!("{}/projects/{bucket}", self.endpoint),
            None => self.url_project.clone(),
        }
    }

    pub(crate) fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Check the preconditions of `operation` for every resource, then run pending lazy actions
    /// when asked to. Fails on the first resource that does not qualify.
    #[tracing::instrument(skip(self, resources))]
    pub async fn verify(
        &self,
        resources: &mut [Resource],
        operation: &str,
        kind: ErrorKind,
        check: Verification,
    ) -> Result<(), StoreError> {
        for resource in resources.iter() {
            if check.id_required && resource.id.is_none() {
                return Err(StoreError::from_kind(
                    kind,
                    format!("{operation}: resource should have an id"),
                ));
            }
            if let Some(required) = check.required_synchronized {
                if resource.synchronized != required {
                    let negation = if required { "" } else { "not " };
                    return Err(StoreError::from_kind(
                        kind,
                        format!("{operation}: resource should {negation}be synchronized"),
                    ));
                }
            }
            if !check.execute_actions && resource.has_pending_actions() {
                return Err(StoreError::from_kind(
                    kind,
                    format!(
                        "{operation}: resource has lazy actions which need to be executed before"
                    ),
                ));
            }
        }
        if check.execute_actions {
            for resource in resources.iter_mut() {
                self.execute_lazy_actions(resource)
                    .await
                    .map_err(|e| e.rewrap(kind))?;
            }
        }
        Ok(())
    }

    /// Upload every attached file and replace the attachment with a reference to it.
    pub async fn execute_lazy_actions(&self, resource: &mut Resource) -> Result<(), StoreError> {
        for (location, action) in resource.pending_actions() {
            match action {
                LazyAction::Attach { path, content_type } => {
                    tracing::debug!("[Service::execute_lazy_actions] uploading {:?}", path);
                    let response = self.upload_file(&path, content_type.as_deref()).await?;
                    resource.replace_at(&location, file_reference(&response).into());
                }
            }
        }
        Ok(())
    }

    /// `url` for `resource` under `schema_id`, else its `_constrainedBy` schema unless that is the
    /// unconstrained one, else `_`; with the `rev` param.
    pub fn prepare_uri(
        &self,
        resource: &Resource,
        schema_id: Option<&str>,
    ) -> Result<(String, Vec<(String, String)>), StoreError> {
        let id = resource
            .id
            .as_deref()
            .ok_or_else(|| StoreError::Validation("resource should have an id".to_string()))?;
        let schema = match (schema_id, resource.constrained_by()) {
            (Some(schema), _) => quote_plus(schema),
            (None, Some(constrained)) if constrained != UNCONSTRAINED_SCHEMA => {
                quote_plus(constrained)
            }
            _ => "_".to_string(),
        };
        let url = format!("{}/{schema}/{}", self.url_resources, quote_plus(id));
        let params = resource
            .rev()
            .map(|rev| vec![("rev".to_string(), rev.to_string())])
            .unwrap_or_default();
        Ok((url, params))
    }

    /// The tags endpoint of `resource`, the tag body and the `rev` param.
    pub fn prepare_tag(
        &self,
        resource: &Resource,
        value: &str,
    ) -> Result<(String, Value, Vec<(String, String)>), StoreError> {
        let (url, params) = self.prepare_uri(resource, None)?;
        let data = json!({"tag": value, "rev": resource.rev()});
        Ok((format!("{url}/tags"), data, params))
    }

    pub fn create_request(
        &self,
        index: usize,
        resource: &Resource,
        schema_id: Option<&str>,
        context: &Value,
    ) -> Result<BatchRequest, StoreError> {
        let schema = schema_id.map(quote_plus).unwrap_or_else(|| "_".to_string());
        let (method, url) = match resource.id.as_deref() {
            Some(id) => (
                Method::PUT,
                format!("{}/{schema}/{}", self.url_resources, quote_plus(id)),
            ),
            None => (Method::POST, format!("{}/{schema}", self.url_resources)),
        };
        Ok(BatchRequest {
            index,
            method,
            url,
            params: self.config.params_for("register"),
            body: Some(resource.to_jsonld(context)?),
        })
    }

    pub fn update_request(
        &self,
        index: usize,
        resource: &Resource,
        schema_id: Option<&str>,
        context: &Value,
    ) -> Result<BatchRequest, StoreError> {
        let (url, mut params) = self.prepare_uri(resource, schema_id)?;
        params.extend(self.config.params_for("update"));
        Ok(BatchRequest {
            index,
            method: Method::PUT,
            url,
            params,
            body: Some(resource.to_jsonld(context)?),
        })
    }

    pub fn tag_request(
        &self,
        index: usize,
        resource: &Resource,
        value: &str,
    ) -> Result<BatchRequest, StoreError> {
        let (url, data, mut params) = self.prepare_tag(resource, value)?;
        params.extend(self.config.params_for("tag"));
        Ok(BatchRequest {
            index,
            method: Method::POST,
            url,
            params,
            body: Some(data),
        })
    }

    pub fn deprecate_request(
        &self,
        index: usize,
        resource: &Resource,
    ) -> Result<BatchRequest, StoreError> {
        let (url, mut params) = self.prepare_uri(resource, None)?;
        params.extend(self.config.params_for("deprecate"));
        Ok(BatchRequest {
            index,
            method: Method::DELETE,
            url,
            params,
            body: None,
        })
    }

    /// Fetch a resource found by a search, from the project recorded in its metadata.
    pub fn fetch_request(
        &self,
        index: usize,
        resource: &Resource,
        retrieve_source: bool,
    ) -> Result<BatchRequest, StoreError> {
        let id = resource
            .id
            .as_deref()
            .ok_or_else(|| StoreError::Querying("search result without an id".to_string()))?;
        let base = match resource.store_metadata.as_ref().and_then(StoreMetadata::bucket) {
            Some((org, project)) => format!(
                "{}/resources/{}/{}",
                self.endpoint,
                quote_plus(&org),
                quote_plus(&project)
            ),
            None => self.url_resources.clone(),
        };
        let mut url = format!("{base}/_/{}", quote_plus(id));
        if retrieve_source {
            url.push_str("/source");
        }
        let mut params = self.config.params_for("retrieve");
        if let Some(rev) = resource.rev() {
            params.push(("rev".to_string(), rev.to_string()));
        }
        Ok(BatchRequest {
            index,
            method: Method::GET,
            url,
            params,
            body: None,
        })
    }

    /// Run one prepared request and decode its JSON answer.
    pub async fn send(&self, request: &BatchRequest, kind: ErrorKind) -> Result<Value, StoreError> {
        tracing::debug!("[Service::send] {} {}", request.method, request.url);
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(self.headers.clone());
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(body) = &request.body {
            builder = builder.body(serde_json::to_vec(body)?);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| StoreError::from(e).rewrap(kind))?;
        json_response(response, kind).await
    }

    /// Send `requests` concurrently, at most `max_connection` at a time, on the calling task.
    /// `apply` sees each result as soon as it completes; a failure never stops the batch.
    /// Results are returned in submission order.
    #[tracing::instrument(skip(self, requests, apply))]
    pub async fn batch_request<F>(
        &self,
        requests: Vec<BatchRequest>,
        action: BatchAction,
        mut apply: F,
    ) -> Vec<BatchResult>
    where
        F: FnMut(&BatchResult),
    {
        let kind = action.error_kind();
        let semaphore = Semaphore::new(self.max_connection);
        let semaphore = &semaphore;
        let mut pending = requests
            .into_iter()
            .map(|request| async move {
                let response = match semaphore.acquire().await {
                    Ok(_permit) => self.send(&request, kind).await,
                    Err(e) => Err(StoreError::from_kind(kind, format!("{e}"))),
                };
                BatchResult {
                    index: request.index,
                    response: response.map_err(|e| e.rewrap(kind)),
                }
            })
            .collect::<FuturesUnordered<_>>();

        let mut results = Vec::with_capacity(pending.len());
        while let Some(result) = pending.next().await {
            if let Err(e) = &result.response {
                tracing::warn!(
                    "[Service::batch_request] {:?} #{} failed: {}",
                    action,
                    result.index,
                    e
                );
            }
            apply(&result);
            results.push(result);
        }
        results.sort_by_key(|result| result.index);
        results
    }

    /// Build a resource from a store payload: `_` keys become its metadata and the store's own
    /// metadata context is dropped from `@context`.
    pub fn to_resource(&self, payload: &Value) -> Result<Resource, StoreError> {
        let mut resource = Resource::from_json(payload)?;
        resource.context = payload
            .get("@context")
            .and_then(|context| self.strip_metadata_context(context));
        let metadata = StoreMetadata::from_payload(payload)?;
        if metadata != StoreMetadata::default() {
            resource.store_metadata = Some(metadata);
        }
        Ok(resource)
    }

    fn strip_metadata_context(&self, context: &Value) -> Option<Value> {
        let iri = self.metadata_context.iri().unwrap_or_default();
        match context {
            Value::Array(items) => {
                let mut kept: Vec<Value> = items
                    .iter()
                    .filter(|item| item.as_str() != Some(iri))
                    .cloned()
                    .collect();
                match kept.len() {
                    0 => None,
                    1 => kept.pop(),
                    _ => Some(Value::Array(kept)),
                }
            }
            Value::String(s) if s == iri => None,
            other => Some(other.clone()),
        }
    }

    /// Record the outcome of `operation` on `resource`. Success syncs metadata and sets the
    /// flags as given; failure leaves metadata alone, clears both flags and keeps the error.
    pub fn synchronize_resource(
        &self,
        resource: &mut Resource,
        response: Result<&Value, &StoreError>,
        operation: &str,
        synchronized: bool,
        validated: bool,
    ) {
        let metadata = response
            .map_err(Clone::clone)
            .and_then(StoreMetadata::from_payload);
        self.apply_metadata(resource, metadata, operation, synchronized, validated);
    }

    pub(crate) fn apply_metadata(
        &self,
        resource: &mut Resource,
        metadata: Result<StoreMetadata, StoreError>,
        operation: &str,
        synchronized: bool,
        validated: bool,
    ) {
        match metadata {
            Ok(metadata) => {
                resource.store_metadata = Some(metadata);
                resource.synchronized = synchronized;
                resource.validated = validated;
                resource.last_action = Some(Action::new(operation, Ok(())));
            }
            Err(error) => {
                resource.synchronized = false;
                resource.validated = false;
                resource.last_action = Some(Action::new(operation, Err(&error)));
            }
        }
    }

    pub async fn get_json(
        &self,
        url: &str,
        params: &[(String, String)],
        kind: ErrorKind,
    ) -> Result<Value, StoreError> {
        let response = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .query(params)
            .send()
            .await
            .map_err(|e| StoreError::from(e).rewrap(kind))?;
        json_response(response, kind).await
    }

    pub async fn post_sparql(&self, query: &str) -> Result<Value, StoreError> {
        let kind = ErrorKind::Querying;
        let response = self
            .client
            .post(&self.sparql_endpoint)
            .headers(self.headers_sparql.clone())
            .body(query.to_string())
            .send()
            .await
            .map_err(|e| StoreError::from(e).rewrap(kind))?;
        json_response(response, kind).await
    }

    pub async fn post_elastic(&self, query: &Value) -> Result<Value, StoreError> {
        let kind = ErrorKind::Querying;
        let response = self
            .client
            .post(&self.elastic_endpoint)
            .headers(self.headers_elastic.clone())
            .body(serde_json::to_vec(query)?)
            .send()
            .await
            .map_err(|e| StoreError::from(e).rewrap(kind))?;
        json_response(response, kind).await
    }

    /// The index mapping of the Elasticsearch view, fetched once. `None` when unavailable.
    pub async fn elastic_mapping(&self) -> Option<Value> {
        self.elastic_mapping
            .get_or_init(|| async {
                match self
                    .get_json(&self.elastic_view, &[], ErrorKind::Querying)
                    .await
                {
                    Ok(view) => match view.get("mapping") {
                        Some(Value::String(raw)) => serde_json::from_str(raw).ok(),
                        Some(mapping) => Some(mapping.clone()),
                        None => None,
                    },
                    Err(e) => {
                        tracing::warn!(
                            "[Service::elastic_mapping] cannot fetch view {}: {}",
                            self.elastic_view,
                            e
                        );
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// Upload one file as a multipart `file` part.
    #[tracing::instrument(skip(self))]
    pub async fn upload_file(
        &self,
        path: &Path,
        content_type: Option<&str>,
    ) -> Result<Value, StoreError> {
        let kind = ErrorKind::Uploading;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::from(e).rewrap(kind))?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("file")
            .to_string();
        let mime = match content_type {
            Some(content_type) => content_type.to_string(),
            None => mime_guess::from_path(path)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        };
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(&mime)
            .map_err(|e| StoreError::from(e).rewrap(kind))?;
        let form = multipart::Form::new().part("file", part);
        let response = self
            .client
            .post(&self.url_files)
            .headers(self.headers_upload.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| StoreError::from(e).rewrap(kind))?;
        json_response(response, kind).await
    }

    /// Upload files concurrently under the connection cap. Results follow the order of `paths`.
    pub async fn upload_files(
        &self,
        paths: &[PathBuf],
        content_type: Option<&str>,
    ) -> Vec<Result<Value, StoreError>> {
        let semaphore = Semaphore::new(self.max_connection);
        let semaphore = &semaphore;
        join_all(paths.iter().map(|path| async move {
            match semaphore.acquire().await {
                Ok(_permit) => self.upload_file(path, content_type).await,
                Err(e) => Err(StoreError::Uploading(format!("{e}"))),
            }
        }))
        .await
    }

    /// Stream `url` into `path`. `content_type` overrides the configured `Accept` header.
    #[tracing::instrument(skip(self, params))]
    pub async fn download_file(
        &self,
        url: &str,
        path: &Path,
        params: &[(String, String)],
        content_type: Option<&str>,
    ) -> Result<(), StoreError> {
        let kind = ErrorKind::Downloading;
        let mut headers = self.headers_download.clone();
        if let Some(content_type) = content_type {
            headers.insert(
                ACCEPT,
                HeaderValue::from_str(content_type).map_err(|e| StoreError::from(e).rewrap(kind))?,
            );
        }
        let response = self
            .client
            .get(url)
            .headers(headers)
            .query(params)
            .send()
            .await
            .map_err(|e| StoreError::from(e).rewrap(kind))?;
        let response = check_response(response, kind).await?;
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| StoreError::from(e).rewrap(kind))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StoreError::from(e).rewrap(kind))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| StoreError::from(e).rewrap(kind))?;
        }
        file.flush()
            .await
            .map_err(|e| StoreError::from(e).rewrap(kind))?;
        Ok(())
    }

    /// File name and media type recorded by the store for the file at `url`.
    pub async fn retrieve_filename(&self, url: &str) -> Result<(String, Option<String>), StoreError> {
        let metadata = self.get_json(url, &[], ErrorKind::Downloading).await?;
        let filename = metadata
            .get("_filename")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StoreError::Downloading(format!("no file name recorded for {url}"))
            })?;
        let media_type = metadata
            .get("_mediaType")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok((filename.to_string(), media_type))
    }
}
