pub mod bucket;
pub mod config;
pub mod context;
pub mod database;
pub mod instruction;
pub mod model;
pub mod supabase;

use anyhow::{Context as _, Result};
use reqwest::blocking::Response as HttpResponse;
use serde_json::Value;
use siliconcrowds_contracts::PilotError;

pub use bucket::{Bucket, FileObject, ObjectStorage, SignedUrl, SortBy, SortOrder};
pub use config::{FireworksConfig, Settings, SupabaseConfig};
pub use context::Contextual;
pub use database::{Database, RowSource, TableNames};
pub use instruction::Instruction;
pub use model::{
    ChatCompletion, ChatRequest, ChatTransport, FireworksTransport, Model, ModelConfig,
    DEFAULT_RETRIES,
};
pub use supabase::SupabaseClient;

const ERROR_BODY_PREVIEW_CHARS: usize = 512;

/// Reads a JSON body, turning non-2xx statuses into `PilotError::Service`.
pub(crate) fn response_json_or_error(service: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .with_context(|| format!("{service} response body read failed"))?;
    if !status.is_success() {
        return Err(PilotError::Service {
            service: service.to_string(),
            status: status.as_u16(),
            body: truncate_text(&body, ERROR_BODY_PREVIEW_CHARS),
        }
        .into());
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{service} returned invalid JSON payload"))?;
    Ok(parsed)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use super::truncate_text;

    #[test]
    fn truncate_text_keeps_short_values() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("åäöü", 2), "åä…");
    }
}
