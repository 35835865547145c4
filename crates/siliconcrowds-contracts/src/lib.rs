pub mod context;
pub mod error;
pub mod events;
pub mod messages;
pub mod records;
pub mod response;
pub mod schema;

pub use context::{Answer, Context, ContextPrompt};
pub use error::{pilot_error, PilotError};
pub use messages::{ContentPart, ImageUrl, Message, Role};
pub use records::{Persona, Prompt, PromptCategory, Question};
pub use response::{Response, Usage};
pub use schema::{
    parse_structured, FieldKind, NumericAnswer, ResponseSchema, SchemaField, StructuredOutput,
    TimeAnswer,
};
