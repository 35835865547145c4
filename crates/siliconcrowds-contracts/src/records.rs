use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Synthetic demographic profile the model is asked to answer as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: i64,
    pub age_range: String,
    pub gender: String,
    pub ethnicity: String,
    pub education: String,
    pub politics: String,
    pub weight: f64,
}

impl Persona {
    pub fn to_prompt(&self) -> String {
        format!(
            "You are a {} aged {} with {}. Your education level is {}. Your political views are {}.",
            self.gender,
            self.age_range,
            self.ethnicity,
            self.education.to_lowercase(),
            self.politics,
        )
    }
}

/// Experimental condition a prompt template belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptCategory {
    Baseline,
    GenericPersona,
    SpecificPersona,
}

impl PromptCategory {
    pub const ALL: [PromptCategory; 3] = [
        PromptCategory::Baseline,
        PromptCategory::GenericPersona,
        PromptCategory::SpecificPersona,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::GenericPersona => "generic_persona",
            Self::SpecificPersona => "specific_persona",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
    }
}

impl fmt::Display for PromptCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: i64,
    pub category: PromptCategory,
    pub system_prompt: String,
    pub user_prompt: String,
    pub template_name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub question_id: String,
    pub transcript: String,
    pub image_path: String,
    pub norways_answer: String,
    #[serde(default)]
    pub actual_outcome: Option<String>,
    #[serde(default, deserialize_with = "deserialize_air_date")]
    pub air_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub answer_type: Option<String>,
}

/// Accepts RFC 3339, naive timestamps (read as UTC) and bare dates.
pub fn parse_air_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn deserialize_air_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(value) => parse_air_date(&value)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid air_date '{value}'"))),
    }
}
