use anyhow::Result;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use siliconcrowds_contracts::{Persona, PilotError, Prompt, PromptCategory, Question};
use tracing::debug;

/// Read access to backend tables.
pub trait RowSource {
    /// Every row of `table` whose columns equal the given values.
    fn select_rows(&self, table: &str, filters: &[(&str, &str)]) -> Result<Vec<Value>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub personas: String,
    pub prompts: String,
    pub questions: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            personas: "personas_representative".to_string(),
            prompts: "prompts".to_string(),
            questions: "questions".to_string(),
        }
    }
}

pub struct Database {
    rows: Box<dyn RowSource>,
    tables: TableNames,
}

impl Database {
    pub fn new(rows: impl RowSource + 'static) -> Self {
        Self::with_tables(rows, TableNames::default())
    }

    pub fn with_tables(rows: impl RowSource + 'static, tables: TableNames) -> Self {
        Self {
            rows: Box::new(rows),
            tables,
        }
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    pub fn personas(&self) -> Result<Vec<Persona>> {
        self.fetch(&self.tables.personas, &[])
    }

    pub fn personas_from(&self, table: &str) -> Result<Vec<Persona>> {
        self.fetch(table, &[])
    }

    /// Prompts of one category keyed by `template_name`, in row order.
    pub fn prompts_by_category(&self, category: PromptCategory) -> Result<IndexMap<String, Prompt>> {
        let prompts: Vec<Prompt> =
            self.fetch(&self.tables.prompts, &[("category", category.as_str())])?;
        let mut by_name = IndexMap::new();
        for prompt in prompts {
            by_name.insert(prompt.template_name.clone(), prompt);
        }
        Ok(by_name)
    }

    pub fn baseline_prompts(&self) -> Result<IndexMap<String, Prompt>> {
        self.prompts_by_category(PromptCategory::Baseline)
    }

    pub fn generic_persona_prompts(&self) -> Result<IndexMap<String, Prompt>> {
        self.prompts_by_category(PromptCategory::GenericPersona)
    }

    pub fn specific_persona_prompts(&self) -> Result<IndexMap<String, Prompt>> {
        self.prompts_by_category(PromptCategory::SpecificPersona)
    }

    pub fn questions(&self) -> Result<Vec<Question>> {
        self.fetch(&self.tables.questions, &[])
    }

    fn fetch<T: DeserializeOwned>(&self, table: &str, filters: &[(&str, &str)]) -> Result<Vec<T>> {
        let rows = self.rows.select_rows(table, filters)?;
        debug!(table, rows = rows.len(), "fetched rows");
        rows.into_iter()
            .enumerate()
            .map(|(index, row)| {
                serde_json::from_value(row).map_err(|err| {
                    PilotError::MalformedRow {
                        table: table.to_string(),
                        index,
                        message: err.to_string(),
                    }
                    .into()
                })
            })
            .collect()
    }
}
