use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    context::{is_valid_url, Context},
    error::StoreError,
    resource::{Property, Resource},
    service::{quote_plus, unquote},
    store::NexusStore,
};

/// A store address whose schema segment is a compact IRI, e.g. `.../datashapes:example/<id>`.
static COMPACT_SCHEMA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\w\.:%/-]+/(\w+):(\w+)/[\w\.\-/:%]+").expect("valid regex")
});

fn check_encoding(encoding: Option<&str>) -> Result<(), StoreError> {
    match encoding.map(str::to_lowercase).as_deref() {
        None | Some("utf-8") | Some("utf8") => Ok(()),
        Some(other) => Err(StoreError::NotSupported(format!(
            "unsupported encoding '{other}', only utf-8 is available"
        ))),
    }
}

fn resolve_id(id: &str, context: &Context) -> String {
    if is_valid_url(id) {
        id.to_string()
    } else {
        context.resolve_iri(id)
    }
}

impl NexusStore {
    /// Canonical store address of a resource or file id.
    ///
    /// Bare ids are resolved against `context` and appended to the bucket's resources (`_`
    /// schema) or files address. Addresses of the bucket get their schema prefix and id expanded;
    /// an address whose id is already expanded is returned unchanged.
    pub fn rewrite_uri(
        &self,
        uri: &str,
        context: &Context,
        is_file: bool,
        encoding: Option<&str>,
    ) -> Result<String, StoreError> {
        check_encoding(encoding)?;
        let raw_url = unquote(uri);
        let kind = if is_file { "files" } else { "resources" };
        let url_base = format!(
            "{}/{kind}/{}/{}",
            self.service.endpoint, self.service.organisation, self.service.project
        );

        let mut url = raw_url.clone();
        let compact = COMPACT_SCHEMA_RE
            .captures(&raw_url)
            .and_then(|groups| Some((groups.get(1)?, groups.get(2)?)));
        if let Some((prefix, local)) = compact {
            if let Some(namespace) = context.expand(prefix.as_str()) {
                let schema = format!("{namespace}{}", local.as_str());
                let (before, after) = (&raw_url[..prefix.start()], &raw_url[local.end()..]);
                if raw_url.starts_with(&url_base) {
                    let quoted_schema = quote_plus(&schema);
                    let id = after.strip_prefix('/').unwrap_or(after);
                    return Ok(format!(
                        "{before}{quoted_schema}/{}",
                        quote_plus(&resolve_id(id, context))
                    ));
                }
                url = format!("{before}{schema}{after}");
            }
        }

        if let Some(schema_and_id) = url.strip_prefix(&url_base) {
            let id = match schema_and_id.rsplit_once("/_/") {
                Some((_, id)) => id,
                None => schema_and_id.rsplit('/').next().unwrap_or_default(),
            };
            let resolved = resolve_id(id, context);
            if schema_and_id.contains(&resolved) {
                return Ok(uri.to_string());
            }
            let prefix = url.strip_suffix(id).unwrap_or(&url);
            return Ok(format!("{prefix}{}", quote_plus(&resolved)));
        }
        if !is_file && !url.contains("/_/") {
            Ok(format!("{url_base}/_/{}", quote_plus(&url)))
        } else {
            Ok(format!("{url_base}/{}", quote_plus(&url)))
        }
    }

    /// Replace the id of `resource` and of every nested resource with its versioned form
    /// (`versioned_id_template`). Resources without an id are left as they are; an id without a
    /// revision cannot be frozen.
    pub fn freeze(&self, resource: &mut Resource) -> Result<(), StoreError> {
        for property in resource.properties.values_mut() {
            match property {
                Property::Resource(nested) => self.freeze(nested)?,
                Property::Resources(items) => {
                    for nested in items.iter_mut() {
                        self.freeze(nested)?;
                    }
                }
                Property::Value(_) | Property::Pending(_) => {}
            }
        }
        let Some(id) = resource.id.as_deref() else {
            return Ok(());
        };
        if id.contains("?rev=") {
            return Ok(());
        }
        let rev = resource.rev().ok_or_else(|| {
            StoreError::Freezing(format!(
                "resource {id} has no revision, it should be registered before being frozen"
            ))
        })?;
        resource.id = Some(self.service.config.versioned_id(id, rev));
        resource.synchronized = false;
        Ok(())
    }
}
