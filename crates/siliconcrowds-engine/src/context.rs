use std::collections::HashMap;

use anyhow::Result;
use indexmap::IndexMap;
use siliconcrowds_contracts::{Context, PilotError, Question};
use tracing::info;

use crate::bucket::Bucket;
use crate::database::Database;

pub const DEFAULT_BUCKET: &str = "pilot_images";
pub const DEFAULT_IMAGE_PATH: &str = "pilot_images";

/// Questions joined with their signed image URLs, keyed by `question_id`.
///
/// Built once from a full fetch; there is no refresh.
#[derive(Debug, Clone, Default)]
pub struct Contextual {
    contexts: IndexMap<String, Context>,
}

impl Contextual {
    pub fn load(database: &Database, bucket: &Bucket, path: &str) -> Result<Self> {
        let questions = database.questions()?;
        let signed_urls = bucket.list_public_urls(path, None)?;
        let contextual = Self::from_parts(questions, &signed_urls);
        let with_images = contextual
            .contexts
            .values()
            .filter(|context| context.prompt.image_url.is_some())
            .count();
        info!(
            bucket = bucket.name(),
            path,
            contexts = contextual.len(),
            with_images,
            "contexts loaded"
        );
        Ok(contextual)
    }

    pub fn from_parts(questions: Vec<Question>, signed_urls: &HashMap<String, String>) -> Self {
        let contexts = questions
            .iter()
            .map(|question| {
                let image_url = signed_urls.get(&question.question_id).cloned();
                (
                    question.question_id.clone(),
                    Context::from_question(question, image_url),
                )
            })
            .collect();
        Self { contexts }
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn get(&self, question_id: &str) -> Result<&Context> {
        self.contexts.get(question_id).ok_or_else(|| {
            PilotError::QuestionNotFound {
                question_id: question_id.to_string(),
            }
            .into()
        })
    }

    pub fn ids(&self) -> Vec<String> {
        self.contexts.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Context> {
        self.contexts.values()
    }
}
