use std::fmt;

use reqwest::StatusCode;
use serde_json::Value;

use crate::{
    error::{ErrorKind, StoreError},
    resource::Resource,
    service::{json_response, quote_plus},
    store::NexusStore,
};

/// A resource version: a revision number or a tag name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Version {
    Rev(u64),
    Tag(String),
}

impl Version {
    fn param(&self) -> (String, String) {
        match self {
            Version::Rev(rev) => ("rev".to_string(), rev.to_string()),
            Version::Tag(tag) => ("tag".to_string(), tag.clone()),
        }
    }
}

impl From<u64> for Version {
    fn from(rev: u64) -> Self {
        Version::Rev(rev)
    }
}

impl From<&str> for Version {
    fn from(tag: &str) -> Self {
        Version::Tag(tag.to_string())
    }
}

impl From<String> for Version {
    fn from(tag: String) -> Self {
        Version::Tag(tag)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Rev(rev) => write!(f, "rev={rev}"),
            Version::Tag(tag) => write!(f, "tag={tag}"),
        }
    }
}

/// An identifier split into the part used for lookup and its query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    /// Scheme, authority, path and fragment.
    pub id: String,
    pub params: Vec<(String, String)>,
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Separate fragment and query of `id`, including query parameters written after the fragment
/// (`http://a.org/x#frag?rev=2`).
pub fn split_identifier(id: &str) -> Identifier {
    let (before_fragment, fragment) = match id.split_once('#') {
        Some((before, fragment)) => (before, Some(fragment)),
        None => (id, None),
    };
    let (path, query) = match before_fragment.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (before_fragment, None),
    };
    let mut params = query.map(parse_query).unwrap_or_default();
    let fragment = match fragment {
        Some(fragment) => match fragment.split_once('?') {
            Some((fragment, query)) => {
                params.extend(parse_query(query));
                Some(fragment)
            }
            None => Some(fragment),
        },
        None => None,
    }
    .filter(|fragment| !fragment.is_empty());
    let id = match fragment {
        Some(fragment) => format!("{path}#{fragment}"),
        None => path.to_string(),
    };
    Identifier { id, params }
}

impl NexusStore {
    async fn get_with_status(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<Value, (Option<StatusCode>, StoreError)> {
        let kind = ErrorKind::Retrieval;
        let response = self
            .service
            .client()
            .get(url)
            .headers(self.service.headers().clone())
            .query(params)
            .send()
            .await
            .map_err(|e| (None, StoreError::from(e).rewrap(kind)))?;
        let status = response.status();
        json_response(response, kind)
            .await
            .map_err(|e| (Some(status), e))
    }

    /// Fetch a resource by id, optionally at a `version`. With `retrieve_source` the payload is
    /// the source as last registered and the metadata come from a second request.
    ///
    /// When the lookup answers 404 and `id` already is a store address, `id` itself is fetched;
    /// if that fails too the first error is returned.
    #[tracing::instrument(skip(self))]
    pub async fn retrieve(
        &self,
        id: &str,
        version: Option<Version>,
        cross_bucket: bool,
        retrieve_source: bool,
    ) -> Result<Resource, StoreError> {
        let Identifier {
            id: id_without_query,
            mut params,
        } = split_identifier(id);
        if let Some(version) = &version {
            let (key, value) = version.param();
            params.retain(|(k, _)| *k != key);
            params.push((key, value));
        }
        params.extend(self.service.config.params_for("retrieve"));

        let url_base = if cross_bucket {
            &self.service.url_resolver
        } else {
            &self.service.url_resources
        };
        let with_source = retrieve_source && !cross_bucket;
        let mut url_resource = format!("{url_base}/_/{}", quote_plus(&id_without_query));
        let source_of = |url: &str| {
            if with_source {
                format!("{url}/source")
            } else {
                url.to_string()
            }
        };

        let data = match self.get_with_status(&source_of(&url_resource), &params).await {
            Ok(data) => data,
            Err((status, error)) => {
                let store_path = if cross_bucket {
                    format!("{}/resources/", self.service.endpoint)
                } else {
                    self.service.url_resources.clone()
                };
                if status != Some(StatusCode::NOT_FOUND) || !id.starts_with(&store_path) {
                    return Err(error);
                }
                tracing::debug!(
                    "[NexusStore::retrieve] {} not found, trying the id as given",
                    url_resource
                );
                match self.get_with_status(&source_of(&id_without_query), &params).await {
                    Ok(data) => {
                        url_resource = id_without_query.clone();
                        data
                    }
                    Err(_) => return Err(error),
                }
            }
        };

        let to_resource =
            |payload: &Value| self.service.to_resource(payload).map_err(|e| e.rewrap(ErrorKind::Retrieval));
        let (mut resource, metadata) = if with_source {
            let metadata = self
                .service
                .get_json(&url_resource, &params, ErrorKind::Retrieval)
                .await?;
            (to_resource(&data)?, metadata)
        } else if retrieve_source {
            match data.get("_self").and_then(Value::as_str) {
                Some(self_link) => {
                    let source = self
                        .service
                        .get_json(&format!("{self_link}/source"), &params, ErrorKind::Retrieval)
                        .await?;
                    (to_resource(&source)?, data)
                }
                None => (to_resource(&data)?, data),
            }
        } else {
            (to_resource(&data)?, data)
        };
        self.service
            .synchronize_resource(&mut resource, Ok(&metadata), "retrieve", true, true);
        Ok(resource)
    }
}
