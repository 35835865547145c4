use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use siliconcrowds_contracts::PilotError;
use tracing::{debug, warn};

/// Default lifetime of a signed URL, in seconds.
pub const DEFAULT_EXPIRES_IN: u64 = 60 * 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortBy {
    pub column: String,
    pub order: SortOrder,
}

impl Default for SortBy {
    fn default() -> Self {
        Self {
            column: "name".to_string(),
            order: SortOrder::Desc,
        }
    }
}

/// One entry of a storage listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileObject {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl FileObject {
    pub fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| self.name.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    pub path: Option<String>,
    pub signed_url: Option<String>,
    pub error: Option<String>,
}

/// Object storage the harness can list and sign against.
pub trait ObjectStorage {
    fn list(&self, bucket: &str, path: &str, sort_by: &SortBy) -> Result<Vec<FileObject>>;

    /// One result per requested path, in request order.
    fn create_signed_urls(
        &self,
        bucket: &str,
        paths: &[String],
        expires_in: u64,
    ) -> Result<Vec<SignedUrl>>;
}

pub struct Bucket {
    name: String,
    storage: Box<dyn ObjectStorage>,
}

impl Bucket {
    pub fn new(name: impl Into<String>, storage: impl ObjectStorage + 'static) -> Self {
        Self {
            name: name.into(),
            storage: Box::new(storage),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn list_files(&self, path: &str, sort_by: Option<SortBy>) -> Result<Vec<FileObject>> {
        let sort_by = sort_by.unwrap_or_default();
        self.storage.list(&self.name, path, &sort_by)
    }

    /// Signs every file under `path`, keyed by filename stem.
    ///
    /// Files sharing a stem collapse to the one listed last.
    pub fn list_public_urls(
        &self,
        path: &str,
        expires_in: Option<u64>,
    ) -> Result<HashMap<String, String>> {
        let expires_in = expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        let files = self.list_files(path, None)?;
        if files.is_empty() {
            return Err(PilotError::EmptyListing {
                bucket: self.name.clone(),
                path: path.to_string(),
            }
            .into());
        }
        let paths = files
            .iter()
            .map(|file| object_path(path, &file.name))
            .collect::<Vec<String>>();
        let signed = self
            .storage
            .create_signed_urls(&self.name, &paths, expires_in)?;

        let mut urls = HashMap::new();
        for (file, signed) in files.iter().zip(signed) {
            let Some(url) = signed.signed_url else {
                warn!(
                    bucket = %self.name,
                    file = %file.name,
                    error = signed.error.as_deref().unwrap_or("no url returned"),
                    "skipping file without signed url"
                );
                continue;
            };
            if urls.insert(file.stem(), url).is_some() {
                debug!(bucket = %self.name, file = %file.name, "stem collision, keeping later file");
            }
        }
        debug!(bucket = %self.name, path, count = urls.len(), expires_in, "signed urls issued");
        Ok(urls)
    }
}

fn object_path(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return name.to_string();
    }
    format!("{prefix}/{name}")
}
