//! Blocking client for the two Supabase surfaces the harness reads:
//! PostgREST tables and Storage buckets.

use anyhow::{Context, Result};
use reqwest::blocking::{Client as HttpClient, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::bucket::{FileObject, ObjectStorage, SignedUrl, SortBy};
use crate::config::SupabaseConfig;
use crate::database::RowSource;
use crate::response_json_or_error;

/// Page size Storage uses when none is given.
pub const LIST_LIMIT: u32 = 100;

#[derive(Debug, Clone)]
pub struct SupabaseClient {
    config: SupabaseConfig,
    http: HttpClient,
}

#[derive(Debug, Deserialize)]
struct SignedUrlRow {
    #[serde(default)]
    path: Option<String>,
    #[serde(default, rename = "signedURL")]
    signed_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl SupabaseClient {
    pub fn new(config: SupabaseConfig) -> Self {
        Self {
            config,
            http: HttpClient::new(),
        }
    }

    pub fn config(&self) -> &SupabaseConfig {
        &self.config
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.url, table)
    }

    fn storage_url(&self, tail: &str) -> String {
        format!("{}/storage/v1{}", self.config.url, tail)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.config.key)
            .bearer_auth(&self.config.key)
    }

    fn absolute_signed_url(&self, relative: &str) -> String {
        if relative.starts_with("http://") || relative.starts_with("https://") {
            return relative.to_string();
        }
        let relative = if relative.starts_with('/') {
            relative.to_string()
        } else {
            format!("/{relative}")
        };
        self.storage_url(&relative)
    }
}

impl RowSource for SupabaseClient {
    fn select_rows(&self, table: &str, filters: &[(&str, &str)]) -> Result<Vec<Value>> {
        let endpoint = self.rest_url(table);
        let mut query = vec![("select".to_string(), "*".to_string())];
        for (column, value) in filters {
            query.push(((*column).to_string(), format!("eq.{value}")));
        }
        debug!(table, filters = filters.len(), "selecting rows");
        let response = self
            .authorized(self.http.get(&endpoint))
            .query(&query)
            .send()
            .with_context(|| format!("Supabase select failed ({endpoint})"))?;
        let payload = response_json_or_error("Supabase", response)?;
        match payload {
            Value::Array(rows) => Ok(rows),
            other => anyhow::bail!(
                "Supabase select on '{table}' returned a non-array payload: {}",
                other
            ),
        }
    }
}

impl ObjectStorage for SupabaseClient {
    fn list(&self, bucket: &str, path: &str, sort_by: &SortBy) -> Result<Vec<FileObject>> {
        let endpoint = self.storage_url(&format!("/object/list/{bucket}"));
        let body = json!({
            "prefix": path,
            "limit": LIST_LIMIT,
            "offset": 0,
            "sortBy": {
                "column": sort_by.column,
                "order": sort_by.order.as_str(),
            },
        });
        let response = self
            .authorized(self.http.post(&endpoint))
            .json(&body)
            .send()
            .with_context(|| format!("Supabase storage list failed ({endpoint})"))?;
        let payload = response_json_or_error("Supabase storage", response)?;
        if !payload.is_array() {
            return Ok(Vec::new());
        }
        serde_json::from_value(payload).context("Supabase storage list returned unexpected rows")
    }

    fn create_signed_urls(
        &self,
        bucket: &str,
        paths: &[String],
        expires_in: u64,
    ) -> Result<Vec<SignedUrl>> {
        let endpoint = self.storage_url(&format!("/object/sign/{bucket}"));
        let response = self
            .authorized(self.http.post(&endpoint))
            .json(&json!({
                "expiresIn": expires_in,
                "paths": paths,
            }))
            .send()
            .with_context(|| format!("Supabase signed url request failed ({endpoint})"))?;
        let payload = response_json_or_error("Supabase storage", response)?;
        let rows: Vec<SignedUrlRow> = serde_json::from_value(payload)
            .context("Supabase signed url response had an unexpected shape")?;
        Ok(rows
            .into_iter()
            .map(|row| SignedUrl {
                path: row.path,
                signed_url: row
                    .signed_url
                    .as_deref()
                    .map(|relative| self.absolute_signed_url(relative)),
                error: row.error,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SupabaseClient {
        SupabaseClient::new(SupabaseConfig::new("https://proj.supabase.co/", "service-key"))
    }

    #[test]
    fn urls_are_built_from_the_project_root() {
        let client = client();
        assert_eq!(
            client.rest_url("prompts"),
            "https://proj.supabase.co/rest/v1/prompts"
        );
        assert_eq!(
            client.storage_url("/object/list/pilot_images"),
            "https://proj.supabase.co/storage/v1/object/list/pilot_images"
        );
    }

    #[test]
    fn relative_signed_urls_are_made_absolute() {
        let client = client();
        assert_eq!(
            client.absolute_signed_url("/object/sign/pilot_images/a.png?token=t"),
            "https://proj.supabase.co/storage/v1/object/sign/pilot_images/a.png?token=t"
        );
        assert_eq!(
            client.absolute_signed_url("object/sign/b.png?token=t"),
            "https://proj.supabase.co/storage/v1/object/sign/b.png?token=t"
        );
        assert_eq!(
            client.absolute_signed_url("https://cdn.example/x.png"),
            "https://cdn.example/x.png"
        );
    }

    #[test]
    fn signed_url_rows_tolerate_per_item_errors() -> anyhow::Result<()> {
        let rows: Vec<SignedUrlRow> = serde_json::from_value(json!([
            {"path": "p/a.png", "signedURL": "/object/sign/p/a.png?token=1", "error": null},
            {"path": null, "signedURL": null, "error": "Either the object does not exist or you do not have access to it"}
        ]))?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].path.as_deref(), Some("p/a.png"));
        assert!(rows[1].signed_url.is_none());
        assert!(rows[1].error.is_some());
        Ok(())
    }
}
