use serde_json::Value;

use crate::{
    context::Context,
    error::{ErrorKind, StoreError},
    query::{
        elastic::{self, ElasticOptions, ElasticQueryBuilder},
        filter::{Filter, FilterInput},
        sparql::{self, create_select_query, rewrite_sparql, SparqlQueryBuilder},
        Resolver, SearchEndpoint, SearchParams,
    },
    resource::{Resource, StoreMetadata},
    service::{BatchAction, STORE_METADATA_KEYS},
    store::NexusStore,
};

fn sparql_boolean(b: bool) -> String {
    format!("'{b}'^^xsd:boolean")
}

impl NexusStore {
    /// The project a search is restricted to, if any.
    fn project_filter_value(&self, params: &SearchParams) -> Option<String> {
        match (&params.bucket, params.cross_bucket) {
            (Some(bucket), _) => Some(self.service.project_url(Some(bucket))),
            (None, false) => Some(self.service.project_url(None)),
            (None, true) => None,
        }
    }

    /// Find resources matching `filters` in the configured search index.
    ///
    /// SPARQL searches return the resources fetched back from the store; Elasticsearch searches
    /// return the indexed documents ranked by score.
    #[tracing::instrument(skip(self, filters, resolvers))]
    pub async fn search(
        &self,
        filters: impl Into<FilterInput>,
        resolvers: &[&dyn Resolver],
        params: &SearchParams,
    ) -> Result<Vec<Resource>, StoreError> {
        params.check()?;
        let model_context = self.model_context.as_ref().ok_or_else(|| {
            StoreError::Configuration("a model context is required to search".to_string())
        })?;
        let filters = filters.into().into_filters()?;
        match params.search_endpoint {
            SearchEndpoint::Sparql => self.search_sparql(&filters, resolvers, params).await,
            SearchEndpoint::Elastic => {
                self.search_elastic(filters, resolvers, params, model_context)
                    .await
            }
        }
    }

    /// The SELECT query a SPARQL search runs.
    pub fn search_query(
        &self,
        filters: &[Filter],
        resolvers: &[&dyn Resolver],
        params: &SearchParams,
    ) -> Result<String, StoreError> {
        let model_context = self.model_context.as_ref().ok_or_else(|| {
            StoreError::Configuration("a model context is required to search".to_string())
        })?;
        let (mut statements, mut sparql_filters) =
            SparqlQueryBuilder::build(model_context, resolvers, filters)?;
        let metadata = &self.service.metadata_context;
        let mut vars = vec!["?id".to_string()];
        if params.retrieve_source {
            for key in STORE_METADATA_KEYS {
                vars.push(format!("?{key}"));
                let iri = match metadata.term(key) {
                    Some(term) => term.id.clone(),
                    None => format!(
                        "{}{}",
                        self.service.config.vocabulary.namespace,
                        key.trim_start_matches('_')
                    ),
                };
                statements.push(format!("<{iri}> ?{key}"));
            }
            sparql_filters.push(format!(
                "Filter (?_deprecated = {})",
                sparql_boolean(params.deprecated)
            ));
        } else {
            vars.push("?_project".to_string());
            vars.push("?_rev".to_string());
            statements.push(format!(
                "<{}> {}",
                self.service.deprecated_property,
                sparql_boolean(params.deprecated)
            ));
            statements.push(format!("<{}> ?_rev", self.service.revision_property));
            statements.push(format!("<{}> ?_project", self.service.project_property));
        }
        let project_filter = self
            .project_filter_value(params)
            .map(|project| format!("Filter (?_project = <{project}>)"))
            .unwrap_or_default();
        let statements = statements.join(";\n ");
        let filters = format!("{}\n{project_filter}", sparql_filters.join(".\n "));
        Ok(create_select_query(
            &vars,
            &format!("?id {statements} . \n {filters}"),
            params.distinct,
            params.search_in_graph,
        ))
    }

    async fn search_sparql(
        &self,
        filters: &[Filter],
        resolvers: &[&dyn Resolver],
        params: &SearchParams,
    ) -> Result<Vec<Resource>, StoreError> {
        let query = self.search_query(filters, resolvers, params)?;
        let mut resources = self
            .sparql(&query, params.limit, params.offset, params.debug)
            .await?;
        let requests = resources
            .iter()
            .enumerate()
            .map(|(i, resource)| {
                self.service
                    .fetch_request(i, resource, params.retrieve_source)
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let results = self
            .service
            .batch_request(requests, BatchAction::Fetch, |_| {})
            .await;
        for result in results {
            let found = &mut resources[result.index];
            let payload = match result.response {
                Ok(payload) => payload,
                Err(error) => {
                    tracing::warn!(
                        "[NexusStore::search] cannot fetch {:?}: {}",
                        found.id,
                        error
                    );
                    self.service
                        .apply_metadata(found, Err(error), "search", false, false);
                    continue;
                }
            };
            let metadata = if params.retrieve_source {
                Ok(found.store_metadata.clone().unwrap_or_default())
            } else {
                StoreMetadata::from_payload(&payload)
            };
            match self.service.to_resource(&payload) {
                Ok(mut resource) => {
                    if resource.id.is_none() {
                        resource.id = found.id.clone();
                    }
                    self.service
                        .apply_metadata(&mut resource, metadata, "search", true, false);
                    *found = resource;
                }
                Err(error) => {
                    let error = error.rewrap(ErrorKind::Querying);
                    self.service
                        .apply_metadata(found, Err(error), "search", false, false);
                }
            }
        }
        Ok(resources)
    }

    async fn search_elastic(
        &self,
        mut filters: Vec<Filter>,
        resolvers: &[&dyn Resolver],
        params: &SearchParams,
        model_context: &Context,
    ) -> Result<Vec<Resource>, StoreError> {
        let metadata = &self.service.metadata_context;
        let deprecated_field = metadata
            .find_term(&self.service.deprecated_property)
            .map(|term| term.name.clone())
            .unwrap_or_else(|| "_deprecated".to_string());
        filters.push(Filter::eq([deprecated_field], params.deprecated));
        if let Some(project) = self.project_filter_value(params) {
            let project_field = metadata
                .find_term(&self.service.project_property)
                .map(|term| term.name.clone())
                .unwrap_or_else(|| "_project".to_string());
            filters.push(Filter::eq([project_field], project));
        }

        let mapping = self.service.elastic_mapping().await;
        let options = ElasticOptions {
            default_str_keyword_field: self.service.default_str_keyword_field.clone(),
            includes: params.includes.clone(),
            excludes: params.excludes.clone(),
        };
        let query = ElasticQueryBuilder::build(
            mapping.as_ref(),
            model_context,
            resolvers,
            &filters,
            &options,
        )?;
        self.elastic(query, params.limit, params.offset, params.debug)
            .await
    }

    /// Run a SPARQL query written with the short names of the model context.
    #[tracing::instrument(skip(self, query, debug))]
    pub async fn sparql(
        &self,
        query: &str,
        limit: Option<usize>,
        offset: Option<usize>,
        debug: bool,
    ) -> Result<Vec<Resource>, StoreError> {
        let context = self.model_context.as_ref().unwrap_or(&self.context);
        let query = rewrite_sparql(query, context, Some(&self.service.metadata_context));
        let query = sparql::apply_pagination(&query, limit, offset);
        if debug {
            tracing::info!("[NexusStore::sparql] submitted query:\n{}", query);
        }
        let response = self.service.post_sparql(&query).await?;
        SparqlQueryBuilder::build_resources_from_response(&response)
    }

    /// Run an Elasticsearch query body against the configured view.
    #[tracing::instrument(skip(self, query, debug))]
    pub async fn elastic(
        &self,
        mut query: Value,
        limit: Option<usize>,
        offset: Option<usize>,
        debug: bool,
    ) -> Result<Vec<Resource>, StoreError> {
        elastic::apply_pagination(&mut query, limit, offset);
        if debug {
            tracing::info!("[NexusStore::elastic] submitted query:\n{}", query);
        }
        let response = self.service.post_elastic(&query).await?;
        let hits = response
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                StoreError::Querying("the Elasticsearch response does not contain hits".to_string())
            })?;
        hits.iter()
            .map(|hit| {
                let source = hit.get("_source").cloned().unwrap_or(Value::Null);
                let mut resource = self
                    .service
                    .to_resource(&source)
                    .map_err(|e| e.rewrap(ErrorKind::Querying))?;
                if resource.id.is_none() {
                    resource.id = hit.get("_id").and_then(Value::as_str).map(str::to_string);
                }
                let metadata = resource.store_metadata.get_or_insert_with(StoreMetadata::default);
                metadata.index = hit.get("_index").and_then(Value::as_str).map(str::to_string);
                metadata.score = hit.get("_score").and_then(Value::as_f64);
                resource.synchronized = true;
                Ok(resource)
            })
            .collect()
    }
}
