use serde::{Deserialize, Serialize};

use crate::records::Question;

/// What the model sees for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextPrompt {
    pub transcript: String,
    pub image_url: Option<String>,
}

/// Ground truth kept alongside the prompt for scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub norways_answer: String,
    pub actual_outcome: Option<String>,
    pub answer_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub id: String,
    pub question_id: String,
    pub prompt: ContextPrompt,
    pub answer: Answer,
}

impl Context {
    pub fn from_question(question: &Question, image_url: Option<String>) -> Self {
        Self {
            id: question.id.to_string(),
            question_id: question.question_id.clone(),
            prompt: ContextPrompt {
                transcript: question.transcript.clone(),
                image_url,
            },
            answer: Answer {
                norways_answer: question.norways_answer.clone(),
                actual_outcome: question.actual_outcome.clone(),
                answer_type: question.answer_type.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_copies_question_fields() {
        let question = Question {
            id: 42,
            question_id: "ep3_q2".to_string(),
            transcript: "How many tries?".to_string(),
            image_path: "pilot_images/ep3_q2.jpg".to_string(),
            norways_answer: "4".to_string(),
            actual_outcome: Some("3".to_string()),
            air_date: None,
            answer_type: Some("numeric".to_string()),
        };
        let context = Context::from_question(&question, None);
        assert_eq!(context.id, "42");
        assert_eq!(context.question_id, "ep3_q2");
        assert_eq!(context.prompt.transcript, "How many tries?");
        assert_eq!(context.prompt.image_url, None);
        assert_eq!(context.answer.actual_outcome.as_deref(), Some("3"));
        assert_eq!(context.answer.answer_type.as_deref(), Some("numeric"));
    }
}
