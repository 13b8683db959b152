//! The store façade: resource CRUD against one bucket of a Nexus deployment.
//!
//! Every write comes in a single-resource and a batch flavour. The single path fails fast and
//! returns the error; the batch path records each outcome on its resource (`synchronized`,
//! `last_action`) and never stops on a per-item failure.

pub mod files;
pub mod retrieve;
pub mod search;
pub mod uri;

use serde_json::Value;

use crate::{
    config::StoreConfig,
    context::Context,
    error::{ErrorKind, StoreError},
    resource::Resource,
    service::{BatchAction, BatchResult, Service, Verification},
};

pub use retrieve::{split_identifier, Identifier, Version};

/// One resource or a batch of them.
#[derive(Debug)]
pub enum Resources<'a> {
    One(&'a mut Resource),
    Many(&'a mut [Resource]),
}

impl<'a> From<&'a mut Resource> for Resources<'a> {
    fn from(resource: &'a mut Resource) -> Self {
        Resources::One(resource)
    }
}

impl<'a> From<&'a mut [Resource]> for Resources<'a> {
    fn from(resources: &'a mut [Resource]) -> Self {
        Resources::Many(resources)
    }
}

impl<'a> From<&'a mut Vec<Resource>> for Resources<'a> {
    fn from(resources: &'a mut Vec<Resource>) -> Self {
        Resources::Many(resources.as_mut_slice())
    }
}

const REGISTER: Verification = Verification {
    id_required: false,
    required_synchronized: Some(false),
    execute_actions: true,
};
const UPDATE: Verification = Verification {
    id_required: true,
    required_synchronized: Some(false),
    execute_actions: true,
};
const TAG_OR_DEPRECATE: Verification = Verification {
    id_required: true,
    required_synchronized: Some(true),
    execute_actions: false,
};

pub struct NexusStore {
    service: Service,
    context: Context,
    model_context: Option<Context>,
}

impl NexusStore {
    /// Connect to the bucket named by `config` and build the store context from the project's
    /// `base`, `vocab` and `apiMappings`.
    #[tracing::instrument(skip(config, model_context), fields(bucket = %config.bucket))]
    pub async fn connect(
        config: StoreConfig,
        model_context: Option<Context>,
    ) -> Result<NexusStore, StoreError> {
        let service = Service::new(config)?;
        let project = service
            .get_json(&service.url_project, &[], ErrorKind::Configuration)
            .await?;
        let base = project.get("base").and_then(Value::as_str);
        let vocab = project.get("vocab").and_then(Value::as_str);
        let mappings = project
            .get("apiMappings")
            .and_then(Value::as_array)
            .map(|mappings| {
                mappings
                    .iter()
                    .filter_map(|m| {
                        Some((
                            m.get("prefix")?.as_str()?,
                            m.get("namespace")?.as_str()?,
                        ))
                    })
                    .collect::<Vec<(&str, &str)>>()
            })
            .unwrap_or_default();
        let context = Context::from_project(base, vocab, mappings);
        tracing::debug!(
            "[NexusStore::connect] connected to {} with {} API mappings",
            service.url_project,
            context.prefixes().len()
        );
        Ok(NexusStore {
            service,
            context,
            model_context,
        })
    }

    /// Build a store around an already known project context, without any network call.
    pub fn with_context(
        config: StoreConfig,
        context: Context,
        model_context: Option<Context>,
    ) -> Result<NexusStore, StoreError> {
        Ok(NexusStore {
            service: Service::new(config)?,
            context,
            model_context,
        })
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn config(&self) -> &StoreConfig {
        &self.service.config
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn model_context(&self) -> Option<&Context> {
        self.model_context.as_ref()
    }

    pub fn metadata_context(&self) -> &Context {
        &self.service.metadata_context
    }

    pub fn endpoint(&self) -> &str {
        &self.service.endpoint
    }

    pub fn organisation(&self) -> &str {
        &self.service.organisation
    }

    pub fn project(&self) -> &str {
        &self.service.project
    }

    pub fn bucket(&self) -> String {
        format!("{}/{}", self.service.organisation, self.service.project)
    }

    /// The `@context` given to registered resources that carry none.
    fn payload_context(&self) -> Value {
        self.model_context
            .as_ref()
            .unwrap_or(&self.context)
            .payload_context()
    }

    fn sync_registered(
        &self,
        resource: &mut Resource,
        response: Result<&Value, &StoreError>,
        context: &Value,
    ) {
        if let Ok(payload) = response {
            if let Some(id) = payload.get("@id").and_then(Value::as_str) {
                resource.id = Some(id.to_string());
            }
            if resource.context.is_none() && !context.is_null() {
                resource.context = Some(context.clone());
            }
        }
        self.service
            .synchronize_resource(resource, response, "register", true, true);
    }

    pub async fn register(
        &self,
        data: impl Into<Resources<'_>>,
        schema_id: Option<&str>,
    ) -> Result<(), StoreError> {
        match data.into() {
            Resources::One(resource) => self.register_one(resource, schema_id).await,
            Resources::Many(resources) => self.register_many(resources, schema_id).await.map(drop),
        }
    }

    #[tracing::instrument(skip(self, resource))]
    pub async fn register_one(
        &self,
        resource: &mut Resource,
        schema_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let kind = ErrorKind::Registration;
        self.service
            .verify(std::slice::from_mut(resource), "register", kind, REGISTER)
            .await?;
        let context = self.payload_context();
        let request = self
            .service
            .create_request(0, resource, schema_id, &context)
            .map_err(|e| e.rewrap(kind))?;
        let outcome = self.service.send(&request, kind).await;
        self.sync_registered(resource, outcome.as_ref(), &context);
        outcome.map(drop)
    }

    #[tracing::instrument(skip(self, resources), fields(count = resources.len()))]
    pub async fn register_many(
        &self,
        resources: &mut [Resource],
        schema_id: Option<&str>,
    ) -> Result<Vec<BatchResult>, StoreError> {
        let kind = ErrorKind::Registration;
        self.service
            .verify(resources, "register", kind, REGISTER)
            .await?;
        let context = self.payload_context();
        let requests = resources
            .iter()
            .enumerate()
            .map(|(i, resource)| self.service.create_request(i, resource, schema_id, &context))
            .collect::<Result<Vec<_>, StoreError>>()
            .map_err(|e| e.rewrap(kind))?;
        let results = self
            .service
            .batch_request(requests, BatchAction::Create, |result| {
                self.sync_registered(&mut resources[result.index], result.response.as_ref(), &context)
            })
            .await;
        Ok(results)
    }

    pub async fn update(
        &self,
        data: impl Into<Resources<'_>>,
        schema_id: Option<&str>,
    ) -> Result<(), StoreError> {
        match data.into() {
            Resources::One(resource) => self.update_one(resource, schema_id).await,
            Resources::Many(resources) => self.update_many(resources, schema_id).await.map(drop),
        }
    }

    #[tracing::instrument(skip(self, resource))]
    pub async fn update_one(
        &self,
        resource: &mut Resource,
        schema_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let kind = ErrorKind::Updating;
        self.service
            .verify(std::slice::from_mut(resource), "update", kind, UPDATE)
            .await?;
        let context = self.payload_context();
        let request = self
            .service
            .update_request(0, resource, schema_id, &context)
            .map_err(|e| e.rewrap(kind))?;
        let outcome = self.service.send(&request, kind).await;
        self.service
            .synchronize_resource(resource, outcome.as_ref(), "update", true, true);
        outcome.map(drop)
    }

    #[tracing::instrument(skip(self, resources), fields(count = resources.len()))]
    pub async fn update_many(
        &self,
        resources: &mut [Resource],
        schema_id: Option<&str>,
    ) -> Result<Vec<BatchResult>, StoreError> {
        let kind = ErrorKind::Updating;
        self.service.verify(resources, "update", kind, UPDATE).await?;
        let context = self.payload_context();
        let requests = resources
            .iter()
            .enumerate()
            .map(|(i, resource)| self.service.update_request(i, resource, schema_id, &context))
            .collect::<Result<Vec<_>, StoreError>>()
            .map_err(|e| e.rewrap(kind))?;
        Ok(self
            .service
            .batch_request(requests, BatchAction::Update, |result| {
                self.service.synchronize_resource(
                    &mut resources[result.index],
                    result.response.as_ref(),
                    "update",
                    true,
                    true,
                )
            })
            .await)
    }

    pub async fn tag(&self, data: impl Into<Resources<'_>>, value: &str) -> Result<(), StoreError> {
        match data.into() {
            Resources::One(resource) => self.tag_one(resource, value).await,
            Resources::Many(resources) => self.tag_many(resources, value).await.map(drop),
        }
    }

    #[tracing::instrument(skip(self, resource))]
    pub async fn tag_one(&self, resource: &mut Resource, value: &str) -> Result<(), StoreError> {
        let kind = ErrorKind::Tagging;
        self.service
            .verify(std::slice::from_mut(resource), "tag", kind, TAG_OR_DEPRECATE)
            .await?;
        let request = self
            .service
            .tag_request(0, resource, value)
            .map_err(|e| e.rewrap(kind))?;
        let outcome = self.service.send(&request, kind).await;
        self.service
            .synchronize_resource(resource, outcome.as_ref(), "tag", true, true);
        outcome.map(drop)
    }

    #[tracing::instrument(skip(self, resources), fields(count = resources.len()))]
    pub async fn tag_many(
        &self,
        resources: &mut [Resource],
        value: &str,
    ) -> Result<Vec<BatchResult>, StoreError> {
        let kind = ErrorKind::Tagging;
        self.service
            .verify(resources, "tag", kind, TAG_OR_DEPRECATE)
            .await?;
        let requests = resources
            .iter()
            .enumerate()
            .map(|(i, resource)| self.service.tag_request(i, resource, value))
            .collect::<Result<Vec<_>, StoreError>>()
            .map_err(|e| e.rewrap(kind))?;
        Ok(self
            .service
            .batch_request(requests, BatchAction::Tag, |result| {
                self.service.synchronize_resource(
                    &mut resources[result.index],
                    result.response.as_ref(),
                    "tag",
                    true,
                    true,
                )
            })
            .await)
    }

    pub async fn deprecate(&self, data: impl Into<Resources<'_>>) -> Result<(), StoreError> {
        match data.into() {
            Resources::One(resource) => self.deprecate_one(resource).await,
            Resources::Many(resources) => self.deprecate_many(resources).await.map(drop),
        }
    }

    #[tracing::instrument(skip(self, resource))]
    pub async fn deprecate_one(&self, resource: &mut Resource) -> Result<(), StoreError> {
        let kind = ErrorKind::Deprecation;
        self.service
            .verify(std::slice::from_mut(resource), "deprecate", kind, TAG_OR_DEPRECATE)
            .await?;
        let request = self
            .service
            .deprecate_request(0, resource)
            .map_err(|e| e.rewrap(kind))?;
        let outcome = self.service.send(&request, kind).await;
        self.service
            .synchronize_resource(resource, outcome.as_ref(), "deprecate", true, true);
        outcome.map(drop)
    }

    #[tracing::instrument(skip(self, resources), fields(count = resources.len()))]
    pub async fn deprecate_many(
        &self,
        resources: &mut [Resource],
    ) -> Result<Vec<BatchResult>, StoreError> {
        let kind = ErrorKind::Deprecation;
        self.service
            .verify(resources, "deprecate", kind, TAG_OR_DEPRECATE)
            .await?;
        let requests = resources
            .iter()
            .enumerate()
            .map(|(i, resource)| self.service.deprecate_request(i, resource))
            .collect::<Result<Vec<_>, StoreError>>()
            .map_err(|e| e.rewrap(kind))?;
        Ok(self
            .service
            .batch_request(requests, BatchAction::Deprecate, |result| {
                self.service.synchronize_resource(
                    &mut resources[result.index],
                    result.response.as_ref(),
                    "deprecate",
                    true,
                    true,
                )
            })
            .await)
    }
}
