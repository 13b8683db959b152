//! Elasticsearch query DSL generation from [`Filter`]s.

use serde_json::{json, Map, Value};

use crate::{
    context::{is_valid_url, Context},
    error::StoreError,
    query::{
        filter::{Filter, FilterOperator, FilterValue},
        resolve_with, Resolver,
    },
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElasticOptions {
    /// Sub-field holding the non-analysed copy of text fields, usually `keyword`.
    pub default_str_keyword_field: Option<String>,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

/// How a field is indexed, as far as exact matching is concerned.
enum FieldKind {
    Keyword,
    Text { keyword: Option<String> },
    Other,
    Unknown,
}

fn field_name(path: &[String]) -> String {
    path.iter()
        .map(|segment| match segment.as_str() {
            "id" => "@id",
            "type" => "@type",
            other => other,
        })
        .collect::<Vec<&str>>()
        .join(".")
}

fn field_kind(mapping: Option<&Value>, field: &str, keyword_field: Option<&str>) -> FieldKind {
    let Some(mapping) = mapping else {
        return FieldKind::Unknown;
    };
    let mut node = mapping.get("mappings").unwrap_or(mapping);
    for segment in field.split('.') {
        match node.get("properties").and_then(|p| p.get(segment)) {
            Some(next) => node = next,
            None => return FieldKind::Unknown,
        }
    }
    match node.get("type").and_then(Value::as_str) {
        Some("keyword") => FieldKind::Keyword,
        Some("text") => FieldKind::Text {
            keyword: keyword_field
                .filter(|kw| node.get("fields").and_then(|f| f.get(*kw)).is_some())
                .map(str::to_string),
        },
        Some(_) => FieldKind::Other,
        None => FieldKind::Unknown,
    }
}

fn is_keyword_field(field: &str) -> bool {
    field.starts_with('_')
        || field == "@id"
        || field == "@type"
        || field.ends_with(".@id")
        || field.ends_with(".@type")
}

/// Expand an identifier or type value into a full IRI.
fn expand_iri(value: &str, field: &str, context: &Context, resolvers: &[&dyn Resolver]) -> String {
    if is_valid_url(value) {
        return value.to_string();
    }
    if context.term(value).is_some() || context.is_curie(value) {
        if let Some(iri) = context.expand(value) {
            return iri;
        }
    }
    if let Some(iri) = resolve_with(resolvers, value) {
        return iri;
    }
    if field.ends_with("@type") {
        context.expand(value).unwrap_or_else(|| value.to_string())
    } else {
        context.resolve_iri(value)
    }
}

pub struct ElasticQueryBuilder;

impl ElasticQueryBuilder {
    pub fn build(
        mapping: Option<&Value>,
        context: &Context,
        resolvers: &[&dyn Resolver],
        filters: &[Filter],
        options: &ElasticOptions,
    ) -> Result<Value, StoreError> {
        let keyword_field = options.default_str_keyword_field.as_deref();
        let mut must = Vec::new();
        let mut must_not = Vec::new();
        let mut similarity: Option<(String, Value)> = None;

        for filter in filters {
            filter.check()?;
            let field = field_name(&filter.path);
            let clause = match (&filter.value, filter.operator.elastic_keyword()) {
                (FilterValue::Vector(_), _) => {
                    if similarity.is_some() {
                        return Err(StoreError::Validation(
                            "only one vector similarity filter is supported per query"
                                .to_string(),
                        ));
                    }
                    similarity = Some((field, filter.value.to_json()));
                    continue;
                }
                (value, Some(range)) => json!({"range": {field: {range: value.to_json()}}}),
                (FilterValue::Literal(s), None) if is_keyword_field(&field) => {
                    let value = if field.ends_with("@id") || field.ends_with("@type") {
                        expand_iri(s, &field, context, resolvers)
                    } else {
                        s.clone()
                    };
                    json!({"term": {field: value}})
                }
                (FilterValue::Literal(s), None) => {
                    let value = match resolve_with(resolvers, s) {
                        Some(iri) => iri,
                        None => s.clone(),
                    };
                    match field_kind(mapping, &field, keyword_field) {
                        FieldKind::Keyword | FieldKind::Other => json!({"term": {field: value}}),
                        FieldKind::Text { keyword: Some(kw) } => {
                            json!({"term": {format!("{field}.{kw}"): value}})
                        }
                        FieldKind::Text { keyword: None } => json!({"match": {field: value}}),
                        FieldKind::Unknown => match keyword_field {
                            Some(kw) => json!({"term": {format!("{field}.{kw}"): value}}),
                            None => json!({"match": {field: value}}),
                        },
                    }
                }
                (value, None) => json!({"term": {field: value.to_json()}}),
            };
            match filter.operator {
                FilterOperator::NotEqual => must_not.push(clause),
                _ => must.push(clause),
            }
        }

        let mut bool_query = Map::new();
        bool_query.insert("must".to_string(), Value::Array(must));
        if !must_not.is_empty() {
            bool_query.insert("must_not".to_string(), Value::Array(must_not));
        }
        let mut query = json!({"bool": bool_query});
        if let Some((field, vector)) = similarity {
            query = json!({
                "script_score": {
                    "query": query,
                    "script": {
                        "source": format!("cosineSimilarity(params.query_vector, '{field}') + 1.0"),
                        "params": {"query_vector": vector},
                    }
                }
            });
        }

        let mut body = Map::new();
        body.insert("query".to_string(), query);
        if !options.includes.is_empty() || !options.excludes.is_empty() {
            let mut source = Map::new();
            if !options.includes.is_empty() {
                source.insert("includes".to_string(), json!(options.includes));
            }
            if !options.excludes.is_empty() {
                source.insert("excludes".to_string(), json!(options.excludes));
            }
            body.insert("_source".to_string(), Value::Object(source));
        }
        Ok(Value::Object(body))
    }
}

/// Set `size` and `from` on a query body.
pub fn apply_pagination(query: &mut Value, limit: Option<usize>, offset: Option<usize>) {
    if let Value::Object(body) = query {
        if let Some(limit) = limit {
            body.insert("size".to_string(), json!(limit));
        }
        if let Some(offset) = offset {
            body.insert("from".to_string(), json!(offset));
        }
    }
}
