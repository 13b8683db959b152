//! Resources as seen by the store: identity, properties, store metadata and sync state.

use std::{collections::BTreeMap, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

/// Work deferred until a resource is submitted to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LazyAction {
    /// Upload `path` and replace the property with a reference to the uploaded file.
    Attach {
        path: PathBuf,
        content_type: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Value(Value),
    Resource(Box<Resource>),
    Resources(Vec<Resource>),
    Pending(LazyAction),
}

impl Property {
    fn from_json(value: &Value) -> Property {
        match value {
            Value::Object(map) => Property::Resource(Box::new(Resource::from_object(map))),
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
                Property::Resources(
                    items
                        .iter()
                        .filter_map(Value::as_object)
                        .map(Resource::from_object)
                        .collect(),
                )
            }
            other => Property::Value(other.clone()),
        }
    }

    fn to_json(&self) -> Result<Value, StoreError> {
        match self {
            Property::Value(value) => Ok(value.clone()),
            Property::Resource(resource) => resource.to_json(),
            Property::Resources(resources) => resources
                .iter()
                .map(Resource::to_json)
                .collect::<Result<Vec<Value>, StoreError>>()
                .map(Value::Array),
            Property::Pending(action) => Err(StoreError::Validation(format!(
                "resource has lazy actions which need to be executed before ({action:?})"
            ))),
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Property::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_resource(&self) -> Option<&Resource> {
        match self {
            Property::Resource(resource) => Some(resource),
            _ => None,
        }
    }
}

impl From<Value> for Property {
    fn from(value: Value) -> Self {
        Property::Value(value)
    }
}

impl From<&str> for Property {
    fn from(value: &str) -> Self {
        Property::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Property {
    fn from(value: String) -> Self {
        Property::Value(Value::String(value))
    }
}

impl From<Resource> for Property {
    fn from(resource: Resource) -> Self {
        Property::Resource(Box::new(resource))
    }
}

impl From<Vec<Resource>> for Property {
    fn from(resources: Vec<Resource>) -> Self {
        Property::Resources(resources)
    }
}

impl From<LazyAction> for Property {
    fn from(action: LazyAction) -> Self {
        Property::Pending(action)
    }
}

/// Server-assigned metadata. Replaced as a whole after every synchronization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreMetadata {
    #[serde(rename = "_self", default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<u64>,
    #[serde(rename = "_project", default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(rename = "_deprecated", default, skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<bool>,
    #[serde(rename = "_constrainedBy", default, skip_serializing_if = "Option::is_none")]
    pub constrained_by: Option<String>,
    #[serde(rename = "_createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "_createdBy", default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(rename = "_updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "_updatedBy", default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(rename = "_incoming", default, skip_serializing_if = "Option::is_none")]
    pub incoming: Option<String>,
    #[serde(rename = "_outgoing", default, skip_serializing_if = "Option::is_none")]
    pub outgoing: Option<String>,
    #[serde(rename = "_schemaProject", default, skip_serializing_if = "Option::is_none")]
    pub schema_project: Option<String>,
    #[serde(rename = "_score", default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(rename = "_index", default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl StoreMetadata {
    /// Collect the `_`-prefixed keys of a server payload.
    pub fn from_payload(payload: &Value) -> Result<StoreMetadata, StoreError> {
        let only_meta: Map<String, Value> = payload
            .as_object()
            .map(|map| {
                map.iter()
                    .filter(|(k, v)| k.starts_with('_') && !v.is_null())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(serde_json::from_value(Value::Object(only_meta))?)
    }

    /// The `(organisation, project)` pair named by the last two segments of `_project`.
    pub fn bucket(&self) -> Option<(String, String)> {
        let project = self.project.as_deref()?;
        let mut segments = project.trim_end_matches('/').rsplit('/');
        let project = segments.next()?;
        let org = segments.next()?;
        Some((org.to_string(), project.to_string()))
    }
}

/// The last operation attempted on a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub operation: String,
    pub succeeded: bool,
    pub error: Option<StoreError>,
}

impl Action {
    pub fn new(operation: &str, outcome: Result<(), &StoreError>) -> Action {
        Action {
            operation: operation.to_string(),
            succeeded: outcome.is_ok(),
            error: outcome.err().cloned(),
        }
    }
}

/// One step into a nested property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resource {
    pub id: Option<String>,
    pub context: Option<Value>,
    pub properties: BTreeMap<String, Property>,
    pub store_metadata: Option<StoreMetadata>,
    pub synchronized: bool,
    pub validated: bool,
    pub last_action: Option<Action>,
}

impl Resource {
    pub fn new() -> Resource {
        Resource::default()
    }

    pub fn with_id(id: impl Into<String>) -> Resource {
        Resource {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Builder form of [`Resource::set`].
    pub fn with(mut self, key: &str, value: impl Into<Property>) -> Resource {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Set a property. Local changes invalidate the synchronized state.
    pub fn set(&mut self, key: &str, value: impl Into<Property>) {
        self.properties.insert(key.to_string(), value.into());
        self.synchronized = false;
    }

    pub fn get(&self, key: &str) -> Option<&Property> {
        self.properties.get(key)
    }

    pub fn rev(&self) -> Option<u64> {
        self.store_metadata.as_ref().and_then(|m| m.rev)
    }

    pub fn constrained_by(&self) -> Option<&str> {
        self.store_metadata
            .as_ref()
            .and_then(|m| m.constrained_by.as_deref())
    }

    /// Build a resource from a JSON(-LD) object, ignoring `@context` and `_` metadata keys.
    pub fn from_json(value: &Value) -> Result<Resource, StoreError> {
        value.as_object().map(Resource::from_object).ok_or_else(|| {
            StoreError::Serialization(format!("a resource must be a JSON object, got {value}"))
        })
    }

    fn from_object(map: &Map<String, Value>) -> Resource {
        let mut resource = Resource::new();
        for (key, value) in map.iter() {
            match key.as_str() {
                "@context" => {}
                "@id" | "id" => match value.as_str() {
                    Some(id) => resource.id = Some(id.to_string()),
                    None => {
                        resource
                            .properties
                            .insert("id".to_string(), Property::from_json(value));
                    }
                },
                "@type" | "type" => {
                    resource
                        .properties
                        .insert("type".to_string(), Property::Value(value.clone()));
                }
                k if k.starts_with('_') => {}
                k => {
                    resource
                        .properties
                        .insert(k.to_string(), Property::from_json(value));
                }
            }
        }
        resource
    }

    /// The compacted JSON body, without `@context`.
    pub fn to_json(&self) -> Result<Value, StoreError> {
        let mut map = Map::new();
        if let Some(id) = &self.id {
            map.insert("@id".to_string(), Value::String(id.clone()));
        }
        for (key, property) in self.properties.iter() {
            let key = if key == "type" { "@type" } else { key.as_str() };
            map.insert(key.to_string(), property.to_json()?);
        }
        Ok(Value::Object(map))
    }

    /// The JSON-LD payload sent to the store. Uses the resource's own context when it has one.
    pub fn to_jsonld(&self, default_context: &Value) -> Result<Value, StoreError> {
        let mut payload = Map::new();
        let context = self.context.as_ref().unwrap_or(default_context);
        if !context.is_null() {
            payload.insert("@context".to_string(), context.clone());
        }
        if let Value::Object(body) = self.to_json()? {
            payload.extend(body);
        }
        Ok(Value::Object(payload))
    }

    /// Locations of every pending lazy action, this resource and nested ones included.
    pub fn pending_actions(&self) -> Vec<(Vec<PathStep>, LazyAction)> {
        fn walk(
            resource: &Resource,
            prefix: &mut Vec<PathStep>,
            acc: &mut Vec<(Vec<PathStep>, LazyAction)>,
        ) {
            for (key, property) in resource.properties.iter() {
                prefix.push(PathStep::Key(key.clone()));
                match property {
                    Property::Pending(action) => acc.push((prefix.clone(), action.clone())),
                    Property::Resource(nested) => walk(nested, prefix, acc),
                    Property::Resources(items) => {
                        for (i, nested) in items.iter().enumerate() {
                            prefix.push(PathStep::Index(i));
                            walk(nested, prefix, acc);
                            prefix.pop();
                        }
                    }
                    Property::Value(_) => {}
                }
                prefix.pop();
            }
        }

        let mut acc = Vec::new();
        walk(self, &mut Vec::new(), &mut acc);
        acc
    }

    pub fn has_pending_actions(&self) -> bool {
        !self.pending_actions().is_empty()
    }

    /// Replace the property at `path`. Returns false when the path does not exist.
    pub fn replace_at(&mut self, path: &[PathStep], property: Property) -> bool {
        let Some((PathStep::Key(key), rest)) = path.split_first() else {
            return false;
        };
        if rest.is_empty() {
            return match self.properties.get_mut(key) {
                Some(slot) => {
                    *slot = property;
                    true
                }
                None => false,
            };
        }
        match (self.properties.get_mut(key), rest.split_first()) {
            (Some(Property::Resource(nested)), _) => nested.replace_at(rest, property),
            (Some(Property::Resources(items)), Some((PathStep::Index(i), tail))) => items
                .get_mut(*i)
                .map(|nested| nested.replace_at(tail, property))
                .unwrap_or(false),
            _ => false,
        }
    }
}
