use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use siliconcrowds_contracts::events::{
    EventWriter, COMPLETION_FINISHED, COMPLETION_REQUESTED, VALIDATION_FAILED,
};
use siliconcrowds_contracts::{
    parse_structured, ContentPart, Message, PilotError, Response, Role, StructuredOutput, Usage,
};
use tracing::{debug, info, warn};

use crate::config::FireworksConfig;
use crate::{response_json_or_error, truncate_text};

pub const DEFAULT_RETRIES: u32 = 2;
pub const DEFAULT_TEMPERATURE: f64 = 0.1;

const REPLY_PREVIEW_CHARS: usize = 2_000;

/// Sampling settings sent with every request. Not every hosted model honors
/// every field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub temperature: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
    pub schema: Value,
}

impl ResponseFormat {
    pub fn json_object(schema: Value) -> Self {
        Self {
            kind: "json_object".to_string(),
            schema,
        }
    }
}

/// Body of one chat-completion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(flatten)]
    pub config: ModelConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatChoice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default = "assistant_role")]
    pub role: Role,
    #[serde(default)]
    pub content: Option<ReplyContent>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

/// Endpoints answer with either a bare string or a list of parts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ReplyContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl ReplyContent {
    fn into_parts(self) -> Vec<ContentPart> {
        match self {
            Self::Text(text) => vec![ContentPart::text(text)],
            Self::Parts(parts) => parts,
        }
    }
}

fn assistant_role() -> Role {
    Role::Assistant
}

/// Anything that can answer a `ChatRequest`.
pub trait ChatTransport {
    fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion>;
}

pub struct FireworksTransport {
    endpoint: String,
    api_key: String,
    http: HttpClient,
}

impl FireworksTransport {
    pub fn new(config: &FireworksConfig) -> Result<Self> {
        let api_key = config.require_api_key()?.to_string();
        Ok(Self {
            endpoint: format!("{}/chat/completions", config.api_base),
            api_key,
            http: HttpClient::new(),
        })
    }
}

impl ChatTransport for FireworksTransport {
    fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .with_context(|| format!("Fireworks request failed ({})", self.endpoint))?;
        let payload = response_json_or_error("Fireworks", response)?;
        serde_json::from_value(payload).context("Fireworks returned an unexpected completion payload")
    }
}

struct Reply {
    id: String,
    model: String,
    message: Message,
    reasoning_content: Option<String>,
    usage: Usage,
}

impl Reply {
    fn into_response<T>(self, structured_output: Option<T>) -> Response<T> {
        Response {
            id: self.id,
            message: self.message,
            reasoning_content: self.reasoning_content,
            model: self.model,
            usage: self.usage,
            structured_output,
        }
    }
}

/// One hosted chat model plus the retry budget for structured replies.
pub struct Model {
    name: String,
    config: ModelConfig,
    retries: u32,
    transport: Box<dyn ChatTransport>,
    events: Option<EventWriter>,
}

impl Model {
    pub fn new(
        name: impl Into<String>,
        config: Option<ModelConfig>,
        retries: u32,
        credentials: &FireworksConfig,
    ) -> Result<Self> {
        let transport = FireworksTransport::new(credentials)?;
        Ok(Self::with_transport(name, config, retries, transport))
    }

    pub fn with_transport(
        name: impl Into<String>,
        config: Option<ModelConfig>,
        retries: u32,
        transport: impl ChatTransport + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            config: config.unwrap_or_default(),
            retries,
            transport: Box::new(transport),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Single call, free-form reply.
    pub fn invoke(&self, messages: &[Message]) -> Result<Response> {
        ensure_messages(messages)?;
        let reply = self.send(messages.to_vec(), None, 1)?;
        self.emit(COMPLETION_FINISHED, json!({"attempts": 1, "structured": false}))?;
        Ok(reply.into_response(None))
    }

    /// Asks for a reply matching `T`, feeding validation errors back to the
    /// model. Makes at most `retries + 1` calls; `retries` overrides the
    /// instance budget.
    pub fn invoke_structured<T: StructuredOutput>(
        &self,
        messages: &[Message],
        retries: Option<u32>,
    ) -> Result<Response<T>> {
        ensure_messages(messages)?;
        let budget = retries.unwrap_or(self.retries);
        let format = ResponseFormat::json_object(T::schema().to_json_schema());
        let mut conversation = messages.to_vec();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let reply = self.send(conversation.clone(), Some(format.clone()), attempt)?;
            let problem = match parse_structured::<T>(&reply.message.text()) {
                Ok(parsed) => {
                    self.emit(
                        COMPLETION_FINISHED,
                        json!({"attempts": attempt, "structured": true}),
                    )?;
                    return Ok(reply.into_response(Some(parsed)));
                }
                Err(problem) => problem,
            };

            warn!(
                model = %self.name,
                attempt,
                budget,
                error = %problem,
                "structured reply failed validation"
            );
            self.emit(
                VALIDATION_FAILED,
                json!({"attempt": attempt, "error": problem}),
            )?;
            if attempt > budget {
                return Err(PilotError::Validation {
                    attempts: attempt,
                    message: problem,
                }
                .into());
            }
            conversation.push(Message::new(Role::Assistant, reply.message.content));
            conversation.push(Message::user(correction_prompt(&problem)));
        }
    }

    fn send(
        &self,
        messages: Vec<Message>,
        response_format: Option<ResponseFormat>,
        attempt: u32,
    ) -> Result<Reply> {
        let request = ChatRequest {
            model: self.name.clone(),
            messages,
            response_format,
            config: self.config,
        };
        info!(
            model = %self.name,
            attempt,
            messages = request.messages.len(),
            structured = request.response_format.is_some(),
            "completion requested"
        );
        self.emit(
            COMPLETION_REQUESTED,
            json!({
                "model": self.name,
                "attempt": attempt,
                "messages": request.messages.len(),
                "structured": request.response_format.is_some(),
            }),
        )?;

        let completion = self.transport.complete(&request)?;
        let Some(choice) = completion.choices.into_iter().next() else {
            bail!("completion {} returned no choices", completion.id);
        };
        let message = Message::new(
            choice.message.role,
            choice
                .message
                .content
                .map(ReplyContent::into_parts)
                .unwrap_or_default(),
        );
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                reply = %truncate_text(&message.text(), REPLY_PREVIEW_CHARS),
                total_tokens = completion.usage.total_tokens,
                "completion received"
            );
        }
        Ok(Reply {
            id: completion.id,
            model: completion.model,
            message,
            reasoning_content: choice.message.reasoning_content,
            usage: completion.usage,
        })
    }

    fn emit(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(events) = &self.events {
            events.emit(event_type, payload)?;
        }
        Ok(())
    }
}

fn ensure_messages(messages: &[Message]) -> Result<()> {
    if messages.is_empty() {
        return Err(PilotError::InvalidInput("at least one message is required".to_string()).into());
    }
    Ok(())
}

fn correction_prompt(problem: &str) -> String {
    format!(
        "Your previous response had a validation error: {problem}. \
         Please correct your response to match the required format."
    )
}
