use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};

/// Shape a single reply field must have.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Also accepts integral floats and numeric strings, stored as integers.
    Integer,
    Number,
    String { pattern: Option<Regex> },
    Boolean,
}

impl FieldKind {
    /// A string field whose values must match `pattern`.
    pub fn matching(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::String {
            pattern: Some(Regex::new(pattern)?),
        })
    }

    fn json_type(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String { .. } => "string",
            Self::Boolean => "boolean",
        }
    }
}

impl PartialEq for FieldKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String { pattern: left }, Self::String { pattern: right }) => {
                left.as_ref().map(Regex::as_str) == right.as_ref().map(Regex::as_str)
            }
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl Eq for FieldKind {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaField {
    pub name: String,
    pub kind: FieldKind,
    pub description: String,
    pub required: bool,
}

impl SchemaField {
    pub fn required(name: &str, kind: FieldKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, kind: FieldKind, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Closed description of a flat JSON object reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSchema {
    pub title: String,
    pub fields: Vec<SchemaField>,
}

impl ResponseSchema {
    pub fn new(title: &str, fields: Vec<SchemaField>) -> Self {
        Self {
            title: title.to_string(),
            fields,
        }
    }

    /// JSON Schema sent to the completion endpoint as the response format.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut property = Map::new();
            property.insert(
                "type".to_string(),
                Value::String(field.kind.json_type().to_string()),
            );
            if !field.description.is_empty() {
                property.insert(
                    "description".to_string(),
                    Value::String(field.description.clone()),
                );
            }
            if let FieldKind::String {
                pattern: Some(pattern),
            } = &field.kind
            {
                property.insert(
                    "pattern".to_string(),
                    Value::String(pattern.as_str().to_string()),
                );
            }
            properties.insert(field.name.clone(), Value::Object(property));
        }
        let required = self
            .fields
            .iter()
            .filter(|field| field.required)
            .map(|field| Value::String(field.name.clone()))
            .collect::<Vec<Value>>();
        json!({
            "title": self.title,
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Runtime check of a parsed reply. Extra keys are ignored.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        self.normalize(value.clone()).map(|_| ())
    }

    /// Checks a parsed reply and returns it with integer fields coerced.
    pub fn normalize(&self, value: Value) -> Result<Value, String> {
        let mut object = match value {
            Value::Object(object) => object,
            other => {
                return Err(format!(
                    "{}: expected a JSON object, got {}",
                    self.title,
                    type_name(&other)
                ))
            }
        };
        let mut problems = Vec::new();
        for field in &self.fields {
            match object.get_mut(&field.name) {
                None | Some(Value::Null) if field.required => {
                    problems.push(format!("field '{}' is required", field.name));
                }
                None | Some(Value::Null) => {}
                Some(found) => match coerce_kind(&field.name, &field.kind, found) {
                    Ok(Some(coerced)) => *found = coerced,
                    Ok(None) => {}
                    Err(problem) => problems.push(problem),
                },
            }
        }
        if problems.is_empty() {
            return Ok(Value::Object(object));
        }
        Err(format!("{}: {}", self.title, problems.join("; ")))
    }
}

/// `Ok(Some(_))` carries a replacement value for the field.
fn coerce_kind(name: &str, kind: &FieldKind, value: &Value) -> Result<Option<Value>, String> {
    let matches = match kind {
        FieldKind::Integer => {
            if value.is_i64() || value.is_u64() {
                return Ok(None);
            }
            if let Some(integer) = lax_integer(value) {
                return Ok(Some(Value::Number(Number::from(integer))));
            }
            false
        }
        FieldKind::Number => value.is_number(),
        FieldKind::Boolean => value.is_boolean(),
        FieldKind::String { pattern } => {
            let Some(text) = value.as_str() else {
                return Err(format!(
                    "field '{name}' should be a string, got {}",
                    type_name(value)
                ));
            };
            if let Some(pattern) = pattern {
                if !pattern.is_match(text) {
                    return Err(format!(
                        "field '{name}' value '{text}' does not match pattern '{}'",
                        pattern.as_str()
                    ));
                }
            }
            true
        }
    };
    if matches {
        return Ok(None);
    }
    Err(format!(
        "field '{name}' should be {}, got {}",
        kind.json_type(),
        type_name(value)
    ))
}

fn lax_integer(value: &Value) -> Option<i64> {
    match value {
        Value::String(text) => text.trim().parse::<i64>().ok(),
        Value::Number(number) => {
            let float = number.as_f64()?;
            let in_range = float >= i64::MIN as f64 && float < i64::MAX as f64;
            (float.fract() == 0.0 && in_range).then_some(float as i64)
        }
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(number) if number.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A typed reply the model can be asked to produce.
pub trait StructuredOutput: DeserializeOwned + Serialize {
    fn schema() -> ResponseSchema;

    /// Checks that go beyond the field shapes.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Parses reply text into `T`, returning a message suitable to show the model.
pub fn parse_structured<T: StructuredOutput>(raw: &str) -> Result<T, String> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|err| format!("reply is not valid JSON: {err}"))?;
    let value = T::schema().normalize(value)?;
    let parsed: T = serde_json::from_value(value).map_err(|err| err.to_string())?;
    parsed.validate()?;
    Ok(parsed)
}

pub const TIME_ANSWER_PATTERN: &str = r"^\d{1,2}:[0-5]\d$";

fn time_answer_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(TIME_ANSWER_PATTERN).expect("time answer pattern is valid"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericAnswer {
    pub answer: i64,
}

impl StructuredOutput for NumericAnswer {
    fn schema() -> ResponseSchema {
        ResponseSchema::new(
            "NumericSchema",
            vec![SchemaField::required(
                "answer",
                FieldKind::Integer,
                "Integer numeric answer only (e.g., '13', '1242'). \
                 Return the raw integer with no units or explanatory text. \
                 Use for questions that are NOT about time duration. \
                 Examples of numeric questions: \
                 'How many tries does it take?', \
                 'How many goals will they score within 60 seconds?', \
                 'How many dogs will run from A to B?'",
            )],
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeAnswer {
    pub answer: String,
}

impl TimeAnswer {
    pub fn total_seconds(&self) -> Option<u32> {
        let (minutes, seconds) = self.answer.split_once(':')?;
        Some(minutes.parse::<u32>().ok()? * 60 + seconds.parse::<u32>().ok()?)
    }
}

impl StructuredOutput for TimeAnswer {
    fn schema() -> ResponseSchema {
        ResponseSchema::new(
            "TimeSchema",
            vec![SchemaField::required(
                "answer",
                FieldKind::String {
                    pattern: Some(time_answer_regex().clone()),
                },
                "Time duration in mm:ss format (e.g., '00:48', '29:57'). \
                 mm:ss corresponds to minutes:seconds. \
                 Only use for questions asking how long something takes or how much time passes. \
                 Examples of time questions: \
                 'How long will it take to accomplish the task?', \
                 'How much time does it take to go from A to B?'",
            )],
        )
    }
}
