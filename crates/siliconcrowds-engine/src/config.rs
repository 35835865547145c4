use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use siliconcrowds_contracts::PilotError;

pub const FIREWORKS_API_KEY: &str = "FIREWORKS_API_KEY";
pub const FIREWORKS_API_BASE: &str = "FIREWORKS_API_BASE";
pub const SUPABASE_URL: &str = "SUPABASE_URL";
pub const SUPABASE_KEY: &str = "SUPABASE_KEY";

const DEFAULT_FIREWORKS_API_BASE: &str = "https://api.fireworks.ai/inference/v1";

/// Snapshot of the variables the harness cares about.
///
/// Values come from an optional `.env` file overlaid by the process
/// environment. Nothing here writes back to the environment.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    vars: HashMap<String, String>,
}

impl Settings {
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn load(dotenv: Option<&Path>) -> Self {
        let mut vars = dotenv
            .filter(|path| path.exists())
            .map(parse_dotenv)
            .unwrap_or_default();
        for key in [FIREWORKS_API_KEY, FIREWORKS_API_BASE, SUPABASE_URL, SUPABASE_KEY] {
            if let Ok(value) = std::env::var(key) {
                vars.insert(key.to_string(), value);
            }
        }
        Self { vars }
    }

    /// Trimmed value, `None` when unset or blank.
    pub fn get(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

pub fn parse_dotenv(path: &Path) -> HashMap<String, String> {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    parse_dotenv_str(&content)
}

fn parse_dotenv_str(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for raw_line in content.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix("export ") {
            line = stripped.trim();
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let mut value = value.trim().to_string();
        if value.len() >= 2 {
            let bytes = value.as_bytes();
            if (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
                || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')
            {
                value = value[1..value.len() - 1].to_string();
            }
        }
        vars.insert(key.to_string(), value);
    }
    vars
}

/// Credentials for the chat-completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireworksConfig {
    pub api_key: Option<String>,
    pub api_base: String,
}

impl FireworksConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            api_base: DEFAULT_FIREWORKS_API_BASE.to_string(),
        }
    }

    /// The key is checked when a `Model` is built, not here.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            api_key: settings.get(FIREWORKS_API_KEY),
            api_base: settings
                .get(FIREWORKS_API_BASE)
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_FIREWORKS_API_BASE.to_string()),
        }
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                PilotError::MissingCredential {
                    name: FIREWORKS_API_KEY,
                }
                .into()
            })
    }
}

/// Project URL and service key for the Supabase backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    pub url: String,
    pub key: String,
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim().trim_end_matches('/').to_string(),
            key: key.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let url = settings
            .get(SUPABASE_URL)
            .ok_or(PilotError::MissingCredential { name: SUPABASE_URL })?;
        let key = settings
            .get(SUPABASE_KEY)
            .ok_or(PilotError::MissingCredential { name: SUPABASE_KEY })?;
        Ok(Self::new(url, key))
    }
}
