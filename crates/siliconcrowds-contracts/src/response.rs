use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messages::Message;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Result of one successful `invoke`.
///
/// `structured_output` is only populated when a schema was requested and the
/// reply eventually validated against it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response<T = Value> {
    pub id: String,
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    pub model: String,
    pub usage: Usage,
    pub structured_output: Option<T>,
}

impl<T> Response<T> {
    pub fn text(&self) -> String {
        self.message.text()
    }
}
