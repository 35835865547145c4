use std::sync::OnceLock;

use anyhow::Result;
use indexmap::IndexMap;
use regex::Regex;
use siliconcrowds_contracts::{ContentPart, Message, Persona, PilotError, Prompt, PromptCategory, Role};
use tracing::info;

use crate::database::Database;

/// Block the templates reserve for an inline image; images travel as a
/// separate content part instead.
const IMAGE_MARKER_PATTERN: &str = r"\n*###IMAGE###\n.*?\n*";

/// Prompt templates partitioned by category, keyed by `template_name`.
#[derive(Debug, Clone, Default)]
pub struct Instruction {
    baseline: IndexMap<String, Prompt>,
    generic_persona: IndexMap<String, Prompt>,
    specific_persona: IndexMap<String, Prompt>,
}

impl Instruction {
    pub fn load(database: &Database) -> Result<Self> {
        let instruction = Self {
            baseline: database.baseline_prompts()?,
            generic_persona: database.generic_persona_prompts()?,
            specific_persona: database.specific_persona_prompts()?,
        };
        info!(
            baseline = instruction.baseline.len(),
            generic_persona = instruction.generic_persona.len(),
            specific_persona = instruction.specific_persona.len(),
            "prompt templates loaded"
        );
        Ok(instruction)
    }

    /// Partitions prompts by their own category; later duplicates win.
    pub fn from_prompts(prompts: impl IntoIterator<Item = Prompt>) -> Self {
        let mut instruction = Self::default();
        for prompt in prompts {
            instruction
                .partition_mut(prompt.category)
                .insert(prompt.template_name.clone(), prompt);
        }
        instruction
    }

    fn partition(&self, category: PromptCategory) -> &IndexMap<String, Prompt> {
        match category {
            PromptCategory::Baseline => &self.baseline,
            PromptCategory::GenericPersona => &self.generic_persona,
            PromptCategory::SpecificPersona => &self.specific_persona,
        }
    }

    fn partition_mut(&mut self, category: PromptCategory) -> &mut IndexMap<String, Prompt> {
        match category {
            PromptCategory::Baseline => &mut self.baseline,
            PromptCategory::GenericPersona => &mut self.generic_persona,
            PromptCategory::SpecificPersona => &mut self.specific_persona,
        }
    }

    pub fn get(&self, category: PromptCategory, name: &str) -> Result<&Prompt> {
        self.partition(category).get(name).ok_or_else(|| {
            PilotError::PromptNotFound {
                category,
                name: name.to_string(),
            }
            .into()
        })
    }

    pub fn baseline(&self, name: &str) -> Result<&Prompt> {
        self.get(PromptCategory::Baseline, name)
    }

    pub fn generic_persona(&self, name: &str) -> Result<&Prompt> {
        self.get(PromptCategory::GenericPersona, name)
    }

    pub fn specific_persona(&self, name: &str) -> Result<&Prompt> {
        self.get(PromptCategory::SpecificPersona, name)
    }

    pub fn template_names(&self, category: PromptCategory) -> Vec<String> {
        self.partition(category).keys().cloned().collect()
    }

    /// System message plus one user message; the image, when given, is the
    /// user message's second part.
    pub fn build_message(prompt: &Prompt, transcript: &str, image_url: Option<&str>) -> Vec<Message> {
        let user_text = render_user_prompt(&prompt.user_prompt, &[("transcript", transcript)]);
        assemble(prompt.system_prompt.clone(), user_text, image_url)
    }

    /// Like `build_message`, with `{persona}` filled in both templates.
    pub fn build_persona_message(
        prompt: &Prompt,
        persona: &Persona,
        transcript: &str,
        image_url: Option<&str>,
    ) -> Vec<Message> {
        let description = persona.to_prompt();
        let system_text = render_template(&prompt.system_prompt, &[("persona", description.as_str())]);
        let user_text = render_user_prompt(
            &prompt.user_prompt,
            &[("transcript", transcript), ("persona", description.as_str())],
        );
        assemble(system_text, user_text, image_url)
    }
}

fn assemble(system_text: String, user_text: String, image_url: Option<&str>) -> Vec<Message> {
    let mut user_content = vec![ContentPart::text(user_text)];
    if let Some(url) = image_url {
        user_content.push(ContentPart::image(url));
    }
    vec![
        Message::system(system_text),
        Message::new(Role::User, user_content),
    ]
}

fn render_user_prompt(template: &str, vars: &[(&str, &str)]) -> String {
    let mut vars = vars.to_vec();
    vars.push(("image", ""));
    let rendered = render_template(template, &vars);
    image_marker()
        .replace_all(&rendered, "")
        .trim_end()
        .to_string()
}

fn image_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(IMAGE_MARKER_PATTERN).expect("image marker pattern is valid"))
}

/// Fills `{name}` slots; `{{` and `}}` are literal braces and unknown slots
/// are left as written.
fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(idx) = rest.find(&['{', '}'][..]) {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }
        let Some(end) = tail.find('}') else {
            out.push_str(tail);
            rest = "";
            break;
        };
        let name = &tail[1..end];
        match vars.iter().find(|(key, _)| *key == name) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&tail[..=end]),
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use siliconcrowds_contracts::pilot_error;

    use super::*;
    use crate::database::tests::{prompt_row, FakeRows};

    fn prompt(category: PromptCategory, name: &str, user_prompt: &str) -> Prompt {
        Prompt {
            id: 1,
            category,
            system_prompt: "You are watching a TV quiz.".to_string(),
            user_prompt: user_prompt.to_string(),
            template_name: name.to_string(),
            description: None,
        }
    }

    #[test]
    fn load_partitions_by_category() -> Result<()> {
        let rows = FakeRows::default().with_table(
            "prompts",
            vec![
                prompt_row(1, "baseline", "baseline_instructional_1", "{transcript}"),
                prompt_row(2, "generic_persona", "generic_1", "{transcript}"),
                prompt_row(3, "specific_persona", "specific_1", "{transcript}"),
            ],
        );
        let instruction = Instruction::load(&Database::new(rows))?;
        assert_eq!(instruction.baseline("baseline_instructional_1")?.id, 1);
        assert_eq!(instruction.generic_persona("generic_1")?.id, 2);
        assert_eq!(instruction.specific_persona("specific_1")?.id, 3);
        Ok(())
    }

    #[test]
    fn lookup_is_exact_and_scoped_to_the_category() {
        let instruction = Instruction::from_prompts(vec![
            prompt(PromptCategory::Baseline, "baseline_1", "{transcript}"),
            prompt(PromptCategory::GenericPersona, "generic_1", "{transcript}"),
        ]);
        assert!(instruction.baseline("baseline_1").is_ok());
        assert!(instruction.baseline("Baseline_1").is_err());
        let err = instruction.baseline("generic_1").unwrap_err();
        assert!(matches!(
            pilot_error(&err),
            Some(PilotError::PromptNotFound { category: PromptCategory::Baseline, name }) if name == "generic_1"
        ));
        assert_eq!(
            instruction.template_names(PromptCategory::GenericPersona),
            vec!["generic_1"]
        );
    }

    #[test]
    fn text_only_message_has_one_user_part() {
        let prompt = prompt(PromptCategory::Baseline, "b", "Transcript:\n{transcript}");
        let messages = Instruction::build_message(&prompt, "How many tries?", None);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, vec![ContentPart::text("You are watching a TV quiz.")]);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(
            messages[1].content,
            vec![ContentPart::text("Transcript:\nHow many tries?")]
        );
    }

    #[test]
    fn image_follows_the_text_in_the_user_message() {
        let prompt = prompt(PromptCategory::Baseline, "b", "{transcript}");
        let messages = Instruction::build_message(&prompt, "t", Some("https://signed/q1.png"));
        let user = &messages[1].content;
        assert_eq!(user.len(), 2);
        assert_eq!(user[0].as_text(), Some("t"));
        assert_eq!(user[1].image_url(), Some("https://signed/q1.png"));
    }

    #[test]
    fn image_marker_block_is_removed() {
        let prompt = prompt(
            PromptCategory::Baseline,
            "b",
            "Question:\n{transcript}\n\n###IMAGE###\n{image}\n\n",
        );
        let messages = Instruction::build_message(&prompt, "How long?", Some("https://img"));
        assert_eq!(messages[1].content[0].as_text(), Some("Question:\nHow long?"));
    }

    #[test]
    fn build_message_is_deterministic() {
        let prompt = prompt(PromptCategory::Baseline, "b", "{transcript}");
        assert_eq!(
            Instruction::build_message(&prompt, "x", Some("u")),
            Instruction::build_message(&prompt, "x", Some("u"))
        );
    }

    #[test]
    fn persona_message_fills_both_templates() {
        let persona = Persona {
            id: 1,
            age_range: "18-24".to_string(),
            gender: "man".to_string(),
            ethnicity: "a Nordic background".to_string(),
            education: "Bachelor".to_string(),
            politics: "right".to_string(),
            weight: 1.0,
        };
        let mut template = prompt(PromptCategory::SpecificPersona, "s", "{persona}\n{transcript}");
        template.system_prompt = "Role: {persona}".to_string();
        let messages = Instruction::build_persona_message(&template, &persona, "q?", None);
        assert_eq!(messages[0].text(), format!("Role: {}", persona.to_prompt()));
        assert_eq!(messages[1].text(), format!("{}\nq?", persona.to_prompt()));
    }

    #[test]
    fn template_rendering_handles_braces() {
        assert_eq!(
            render_template("{{\"answer\": {n}}} {unknown} {open", &[("n", "1")]),
            "{\"answer\": 1} {unknown} {open"
        );
        assert_eq!(render_template("}", &[]), "}");
    }
}
