use thiserror::Error;

use crate::records::PromptCategory;

/// Failures raised by the harness itself.
///
/// Transport failures from `reqwest` are not listed here; they travel inside
/// `anyhow::Error` untouched so callers can still downcast them.
#[derive(Debug, Error)]
pub enum PilotError {
    #[error("{name} is not set")]
    MissingCredential { name: &'static str },

    #[error("Prompt with name {name} not found in {category} prompts")]
    PromptNotFound {
        category: PromptCategory,
        name: String,
    },

    #[error("Question with id {question_id} not found")]
    QuestionNotFound { question_id: String },

    #[error("structured output failed validation after {attempts} attempt(s): {message}")]
    Validation { attempts: u32, message: String },

    #[error("malformed row {index} in table '{table}': {message}")]
    MalformedRow {
        table: String,
        index: usize,
        message: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("No files found under {bucket}/{path}")]
    EmptyListing { bucket: String, path: String },

    #[error("{service} request failed ({status}): {body}")]
    Service {
        service: String,
        status: u16,
        body: String,
    },
}

impl PilotError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::PromptNotFound { .. } | Self::QuestionNotFound { .. }
        )
    }
}

/// Finds the `PilotError` at the root of an `anyhow` chain, if any.
pub fn pilot_error(err: &anyhow::Error) -> Option<&PilotError> {
    err.chain().find_map(|cause| cause.downcast_ref::<PilotError>())
}
