//! SPARQL generation from [`Filter`]s, plus the helpers used to run raw SPARQL against a store.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::{
    context::{is_valid_url, Context},
    error::StoreError,
    query::{
        filter::{DataCategory, Filter, FilterOperator, FilterValue},
        resolve_with, Resolver,
    },
    resource::{Property, Resource, StoreMetadata},
};

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
const XSD: &str = "http://www.w3.org/2001/XMLSchema#";

static LIMIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i) LIMIT \d+").expect("valid regex"));
static OFFSET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i) OFFSET \d+").expect("valid regex"));

/// SPARQL words that must never be taken for context terms.
const SPARQL_KEYWORDS: &[&str] = &[
    "a", "and", "as", "asc", "ask", "avg", "base", "bind", "bound", "by", "construct", "contains",
    "count", "desc", "describe", "distinct", "exists", "false", "filter", "from", "graph", "group",
    "having", "in", "is", "lang", "limit", "max", "min", "minus", "named", "not", "offset",
    "optional", "or", "order", "prefix", "reduced", "regex", "sample", "select", "service", "str",
    "strstarts", "sum", "true", "undef", "union", "values", "where",
];

/// How a filter value resolved against the context.
enum Resolved {
    /// An absolute IRI, rendered `<iri>`.
    Iri(String),
    /// A term or compact IRI of the context, rendered as is.
    Term(String),
}

impl Resolved {
    fn render(&self) -> String {
        match self {
            Resolved::Iri(iri) => format!("<{iri}>"),
            Resolved::Term(term) => term.clone(),
        }
    }
}

fn resolve_value(value: &str, context: &Context, resolvers: &[&dyn Resolver]) -> Option<Resolved> {
    if is_valid_url(value) {
        return Some(Resolved::Iri(value.to_string()));
    }
    if context.term(value).is_some() || context.is_curie(value) {
        return Some(Resolved::Term(value.to_string()));
    }
    resolve_with(resolvers, value).map(Resolved::Iri)
}

fn escape_literal(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn format_boolean(b: bool) -> String {
    format!("'{b}'^^xsd:boolean")
}

pub struct SparqlQueryBuilder;

impl SparqlQueryBuilder {
    /// Translate `filters` into `(statements, filters)`. Filter `i` binds `?v{i}`; equality on a
    /// resolvable IRI becomes a direct statement and needs no FILTER clause.
    pub fn build(
        context: &Context,
        resolvers: &[&dyn Resolver],
        filters: &[Filter],
    ) -> Result<(Vec<String>, Vec<String>), StoreError> {
        let mut statements = Vec::new();
        let mut sparql_filters = Vec::new();
        for (index, filter) in filters.iter().enumerate() {
            filter.check()?;
            let var = format!("?v{index}");
            let op = filter.operator.sparql_symbol();
            let resolved = match &filter.value {
                FilterValue::Literal(s) => resolve_value(s, context, resolvers),
                FilterValue::Vector(_) => {
                    return Err(StoreError::NotSupported(format!(
                        "vector values on path '{}' cannot be searched with SPARQL",
                        filter.path.join("/")
                    )))
                }
                _ => None,
            };

            let mut path = filter.path.clone();
            let id_only = path.len() == 1 && path[0] == "id";
            if let (FilterOperator::Equal, Some(resolved)) = (filter.operator, &resolved) {
                if id_only {
                    sparql_filters.push(format!("FILTER(?id = {})", resolved.render()));
                    continue;
                }
                if path.len() > 1 && path.last().map(String::as_str) == Some("id") {
                    path.pop();
                }
                statements.push(format!("{} {}", path.join("/"), resolved.render()));
                continue;
            }

            let formatted = match (&filter.value, &resolved) {
                (_, Some(resolved)) => resolved.render(),
                (FilterValue::Literal(s), None) => format!("\"{}\"", escape_literal(s)),
                (FilterValue::DateTime(s), None) => format!("\"{}\"^^xsd:dateTime", s),
                (FilterValue::Boolean(b), None) => format_boolean(*b),
                (value, None) => match value.category() {
                    DataCategory::Number => value.to_string(),
                    _ => format!("\"{}\"", escape_literal(&value.to_string())),
                },
            };
            if id_only {
                sparql_filters.push(format!("FILTER(?id {op} {formatted})"));
                continue;
            }
            statements.push(format!("{} {var}", path.join("/")));
            sparql_filters.push(format!("FILTER({var} {op} {formatted})"));
        }
        Ok((statements, sparql_filters))
    }

    /// Map a SPARQL JSON result set back to resources. The `id` variable becomes the resource
    /// identifier, `_`-prefixed variables its store metadata, anything else a property.
    pub fn build_resources_from_response(response: &Value) -> Result<Vec<Resource>, StoreError> {
        let bindings = response
            .pointer("/results/bindings")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                StoreError::Querying(
                    "the SPARQL response does not contain results.bindings".to_string(),
                )
            })?;
        bindings
            .iter()
            .map(|binding| {
                let mut resource = Resource::new();
                let mut metadata = Map::new();
                for (var, cell) in binding.as_object().into_iter().flatten() {
                    let value = binding_value(cell);
                    match var.as_str() {
                        "id" => resource.id = value.as_str().map(str::to_string),
                        v if v.starts_with('_') => {
                            metadata.insert(v.to_string(), value);
                        }
                        v => {
                            resource
                                .properties
                                .insert(v.to_string(), Property::Value(value));
                        }
                    }
                }
                if !metadata.is_empty() {
                    resource.store_metadata =
                        Some(StoreMetadata::from_payload(&Value::Object(metadata))?);
                }
                Ok(resource)
            })
            .collect()
    }
}

/// Decode one cell of a SPARQL JSON binding, honouring boolean and numeric datatypes.
fn binding_value(cell: &Value) -> Value {
    let raw = cell.get("value").and_then(Value::as_str).unwrap_or_default();
    let is_literal = cell.get("type").and_then(Value::as_str) == Some("literal")
        || cell.get("type").and_then(Value::as_str) == Some("typed-literal");
    let datatype = cell
        .get("datatype")
        .and_then(Value::as_str)
        .and_then(|dt| dt.strip_prefix(XSD));
    match (is_literal, datatype) {
        (true, Some("boolean")) => Value::Bool(raw.eq_ignore_ascii_case("true")),
        (true, Some("integer" | "int" | "long" | "nonNegativeInteger")) => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        (true, Some("decimal" | "double" | "float")) => raw
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        _ => Value::String(raw.to_string()),
    }
}

/// `SELECT [DISTINCT ]vars WHERE { Graph ?g {statements}}`, or without the graph clause.
pub fn create_select_query<S: AsRef<str>>(
    vars: &[S],
    statements: &str,
    distinct: bool,
    search_in_graph: bool,
) -> String {
    let vars = vars.iter().map(AsRef::as_ref).collect::<Vec<&str>>().join(" ");
    let distinct = if distinct { "DISTINCT " } else { "" };
    if search_in_graph {
        format!("SELECT {distinct}{vars} WHERE {{ Graph ?g {{{statements}}}}}")
    } else {
        format!("SELECT {distinct}{vars} WHERE {{{statements}}}")
    }
}

/// Set `LIMIT` and `OFFSET`, replacing clauses already present in the query.
pub fn apply_pagination(query: &str, limit: Option<usize>, offset: Option<usize>) -> String {
    fn replace_or_append(query: String, re: &Regex, keyword: &str, value: usize) -> String {
        if re.is_match(&query) {
            re.replace_all(&query, format!(" {keyword} {value}").as_str())
                .into_owned()
        } else {
            format!("{query} {keyword} {value}")
        }
    }

    let mut query = query.to_string();
    if let Some(limit) = limit.filter(|l| *l > 0) {
        query = replace_or_append(query, &LIMIT_RE, "LIMIT", limit);
    }
    if let Some(offset) = offset.filter(|o| *o > 0) {
        query = replace_or_append(query, &OFFSET_RE, "OFFSET", offset);
    }
    query
}

fn is_lead(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | '[' | '(' | '/' | '|' | '!' | '^' | ';')
}

fn is_follow(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | ']' | ')' | '/' | '|' | '?' | '*' | '+' | '.')
}

/// Index one past the closing `>` when `chars[start]` opens an IRI reference.
fn iri_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    while j < chars.len() && !chars[j].is_whitespace() && chars[j] != '>' {
        if chars[j] == '=' && j == start + 1 {
            return None;
        }
        j += 1;
    }
    (j < chars.len() && chars[j] == '>' && j > start + 1).then_some(j + 1)
}

/// Index one past the closing quote of the string literal opened at `start`.
fn literal_end(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut j = start + 1;
    while j < chars.len() {
        match chars[j] {
            '\\' => j += 2,
            c if c == quote => return j + 1,
            _ => j += 1,
        }
    }
    chars.len()
}

/// Expand the short names of a query through the model context (and the metadata context),
/// and declare the context prefixes unless the query already declares its own.
pub fn rewrite_sparql(query: &str, context: &Context, metadata_context: Option<&Context>) -> String {
    let mut terms: BTreeMap<&str, String> = BTreeMap::new();
    for ctx in metadata_context.into_iter().chain(std::iter::once(context)) {
        for (name, term) in ctx.terms() {
            terms.insert(name.as_str(), term.id.clone());
        }
    }
    if terms.get("type").map(String::as_str) == Some("@type") {
        let rdf_type = if context.prefixes().contains_key("rdf") {
            "rdf:type".to_string()
        } else {
            RDF_TYPE.to_string()
        };
        terms.insert("type", rdf_type);
    }

    let chars: Vec<char> = query.chars().collect();
    let mut out = String::with_capacity(query.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '"' || c == '\'' {
            let end = literal_end(&chars, i);
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }
        if c == '<' {
            if let Some(end) = iri_end(&chars, i) {
                out.extend(&chars[i..end]);
                i = end;
                continue;
            }
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let after = match chars.get(i) {
                Some('.') | Some(';') => chars.get(i + 1),
                other => other,
            };
            let candidate = start > 0
                && is_lead(chars[start - 1])
                && after.map(|c| is_follow(*c)).unwrap_or(true)
                && !SPARQL_KEYWORDS.contains(&word.to_lowercase().as_str());
            if !candidate {
                out.push_str(&word);
                continue;
            }
            match terms.get(word.as_str()) {
                Some(iri) if iri.contains("//") => out.push_str(&format!("<{iri}>")),
                Some(iri) => out.push_str(iri),
                None if context.has_vocab() => out.push_str(&format!(":{word}")),
                None => out.push_str(&format!("<{word}>")),
            }
            continue;
        }
        out.push(c);
        i += 1;
    }

    if query.to_lowercase().contains("prefix") {
        return out;
    }
    let mut declarations: Vec<String> = context
        .prefixes()
        .iter()
        .map(|(prefix, namespace)| format!("PREFIX {prefix}: <{namespace}>"))
        .collect();
    if let Some(vocab) = context.vocab() {
        declarations.push(format!("PREFIX : <{vocab}>"));
    }
    if declarations.is_empty() {
        return out;
    }
    format!("{}\n{out}", declarations.join("\n"))
}
