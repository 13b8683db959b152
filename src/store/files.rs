use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::{
    error::StoreError,
    resource::{Property, Resource, StoreMetadata},
    service::{file_reference, quote_plus, unquote},
    store::NexusStore,
};

/// Whether `path` already holds a download of this batch or, unless overwriting, an existing file.
async fn is_taken(path: &Path, assigned: &HashSet<PathBuf>, overwrite: bool) -> bool {
    assigned.contains(path) || (!overwrite && tokio::fs::try_exists(path).await.unwrap_or(false))
}

/// String values found by following a dotted property path through nested resources.
fn collect_values(resource: &Resource, path: &[&str], acc: &mut Vec<String>) {
    let Some((key, rest)) = path.split_first() else {
        return;
    };
    let Some(property) = resource.get(key) else {
        return;
    };
    match property {
        Property::Resource(nested) => collect_values(nested, rest, acc),
        Property::Resources(items) => {
            for nested in items {
                collect_values(nested, rest, acc);
            }
        }
        Property::Value(value) if rest.is_empty() => match value {
            Value::String(s) => acc.push(s.clone()),
            Value::Array(items) => acc.extend(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string),
            ),
            _ => {}
        },
        Property::Value(_) | Property::Pending(_) => {}
    }
}

impl NexusStore {
    /// Upload files to the bucket and return a reference resource for each, in order.
    #[tracing::instrument(skip(self))]
    pub async fn upload(
        &self,
        paths: &[PathBuf],
        content_type: Option<&str>,
    ) -> Result<Vec<Resource>, StoreError> {
        match paths {
            [path] => {
                let response = self.service.upload_file(path, content_type).await?;
                Ok(vec![file_reference(&response)])
            }
            _ => self
                .service
                .upload_files(paths, content_type)
                .await
                .into_iter()
                .map(|response| response.map(|r| file_reference(&r)))
                .collect(),
        }
    }

    /// The address to download `url` from, and the bucket it lives in.
    ///
    /// Outside the configured bucket the file must belong to a registered resource, whose
    /// `_project` names the bucket.
    pub fn prepare_download(
        &self,
        url: &str,
        metadata: Option<&StoreMetadata>,
        cross_bucket: bool,
    ) -> Result<(String, String), StoreError> {
        let (org, project) = if cross_bucket {
            metadata.and_then(StoreMetadata::bucket).ok_or_else(|| {
                StoreError::Downloading(
                    "downloading a non registered file is not allowed with cross_bucket"
                        .to_string(),
                )
            })?
        } else {
            (
                self.service.organisation.clone(),
                self.service.project.clone(),
            )
        };
        let file_id = unquote(url.rsplit('/').next().unwrap_or_default());
        if file_id.is_empty() {
            return Err(StoreError::Downloading(format!("invalid file url: {url}")));
        }
        let url = if file_id.starts_with("http") {
            url.to_string()
        } else {
            format!(
                "{}/files/{}/{}/{}",
                self.service.endpoint,
                quote_plus(&org),
                quote_plus(&project),
                quote_plus(&file_id)
            )
        };
        Ok((url, format!("{org}/{project}")))
    }

    /// Download every file referenced at `follow` (a dotted path such as
    /// `distribution.contentUrl`) into `dir`, named as recorded by the store. Existing files are
    /// kept unless `overwrite`; the new file then gets a timestamp suffix.
    #[tracing::instrument(skip(self, data))]
    pub async fn download(
        &self,
        data: &[Resource],
        follow: &str,
        dir: &Path,
        overwrite: bool,
        cross_bucket: bool,
        content_type: Option<&str>,
    ) -> Result<Vec<PathBuf>, StoreError> {
        let steps: Vec<&str> = follow.split('.').collect();
        let mut targets = Vec::new();
        for resource in data {
            let mut urls = Vec::new();
            collect_values(resource, &steps, &mut urls);
            for url in urls {
                targets.push((url, resource.store_metadata.as_ref()));
            }
        }
        if targets.is_empty() {
            return Err(StoreError::Downloading(format!(
                "path to follow '{follow}' was not found in any provided resource"
            )));
        }

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| StoreError::Downloading(format!("cannot create {dir:?}: {e}")))?;
        let mut jobs = Vec::with_capacity(targets.len());
        let mut assigned = HashSet::new();
        for (url, metadata) in targets {
            let (url, bucket) = self.prepare_download(&url, metadata, cross_bucket)?;
            let (stored_name, _) = self.service.retrieve_filename(&url).await?;
            let filename = Path::new(&stored_name)
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| {
                    StoreError::Downloading(format!(
                        "invalid file name '{stored_name}' for {url}"
                    ))
                })?
                .to_string();
            let mut path = dir.join(&filename);
            if is_taken(&path, &assigned, overwrite).await {
                let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
                let stamped = format!("{filename}.{stamp}");
                path = dir.join(&stamped);
                let mut n = 1;
                while is_taken(&path, &assigned, overwrite).await {
                    path = dir.join(format!("{stamped}.{n}"));
                    n += 1;
                }
            }
            assigned.insert(path.clone());
            jobs.push((url, path, bucket));
        }

        let params = self.service.config.params_for("download");
        let semaphore = Semaphore::new(self.service.max_connection);
        let semaphore = &semaphore;
        let params = &params;
        let outcomes = join_all(jobs.iter().map(|(url, path, bucket)| async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|e| StoreError::Downloading(e.to_string()))?;
            self.service
                .download_file(url, path, params, content_type)
                .await
                .map_err(|e| {
                    StoreError::Downloading(format!(
                        "downloading {url} from bucket {bucket} failed: {}",
                        e.message()
                    ))
                })
        }))
        .await;
        outcomes.into_iter().collect::<Result<Vec<()>, StoreError>>()?;
        Ok(jobs.into_iter().map(|(_, path, _)| path).collect())
    }
}
