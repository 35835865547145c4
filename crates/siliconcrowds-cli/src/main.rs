use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use siliconcrowds_contracts::events::EventWriter;
use siliconcrowds_contracts::{
    Message, NumericAnswer, PilotError, PromptCategory, StructuredOutput, TimeAnswer,
};
use siliconcrowds_engine::bucket::DEFAULT_EXPIRES_IN;
use siliconcrowds_engine::context::{DEFAULT_BUCKET, DEFAULT_IMAGE_PATH};
use siliconcrowds_engine::{
    Bucket, Contextual, Database, FireworksConfig, Instruction, Model, Settings, SupabaseClient,
    SupabaseConfig, DEFAULT_RETRIES,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "siliconcrowds", version, about = "Silicon Crowds pilot harness")]
struct Cli {
    /// Dotenv file read before the process environment.
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,
    /// Append model events to this JSONL file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Personas(PersonasArgs),
    Prompts(PromptsArgs),
    Questions,
    Urls(UrlsArgs),
    Contexts(ContextsArgs),
    Message(MessageArgs),
    Invoke(InvokeArgs),
    Ask(AskArgs),
}

#[derive(Debug, Parser)]
struct PersonasArgs {
    #[arg(long)]
    table: Option<String>,
}

#[derive(Debug, Parser)]
struct PromptsArgs {
    #[arg(long, value_parser = parse_category)]
    category: PromptCategory,
}

#[derive(Debug, Parser)]
struct UrlsArgs {
    #[arg(long, default_value = DEFAULT_BUCKET)]
    bucket: String,
    #[arg(long, default_value = DEFAULT_IMAGE_PATH)]
    path: String,
    #[arg(long, default_value_t = DEFAULT_EXPIRES_IN)]
    expires_in: u64,
}

#[derive(Debug, Parser)]
struct ContextsArgs {
    #[arg(long, default_value = DEFAULT_BUCKET)]
    bucket: String,
    #[arg(long, default_value = DEFAULT_IMAGE_PATH)]
    path: String,
    #[arg(long)]
    id: Option<String>,
}

#[derive(Debug, Parser)]
struct MessageArgs {
    #[arg(long, value_parser = parse_category)]
    category: PromptCategory,
    #[arg(long)]
    template: String,
    #[arg(long)]
    question: String,
    #[arg(long)]
    persona_id: Option<i64>,
    /// Persona table to resolve `--persona-id` against.
    #[arg(long)]
    persona_table: Option<String>,
    #[arg(long, default_value = DEFAULT_BUCKET)]
    bucket: String,
    #[arg(long, default_value = DEFAULT_IMAGE_PATH)]
    path: String,
}

#[derive(Debug, Parser)]
struct InvokeArgs {
    #[arg(long)]
    model: String,
    #[arg(long)]
    text: String,
    #[arg(long)]
    image_url: Option<String>,
    #[arg(long, value_enum)]
    schema: Option<SchemaChoice>,
    #[arg(long, default_value_t = DEFAULT_RETRIES)]
    retries: u32,
}

#[derive(Debug, Parser)]
struct AskArgs {
    #[arg(long)]
    model: String,
    #[command(flatten)]
    message: MessageArgs,
    #[arg(long, value_enum)]
    schema: Option<SchemaChoice>,
    #[arg(long, default_value_t = DEFAULT_RETRIES)]
    retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SchemaChoice {
    Numeric,
    Time,
}

fn parse_category(raw: &str) -> Result<PromptCategory, String> {
    PromptCategory::parse(raw).ok_or_else(|| {
        let known = PromptCategory::ALL
            .iter()
            .map(|category| category.as_str())
            .collect::<Vec<&str>>()
            .join(", ");
        format!("unknown category `{raw}` (expected one of: {known})")
    })
}

fn main() {
    init_tracing();
    match run() {
        Ok(()) => {}
        Err(err) => {
            eprintln!("siliconcrowds error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(Some(cli.env_file.as_path()));
    let events = cli.events.as_deref().map(open_events);
    match cli.command {
        Command::Personas(args) => {
            let database = database(&settings)?;
            let personas = match args.table.as_deref() {
                Some(table) => database.personas_from(table)?,
                None => database.personas()?,
            };
            print_json(&personas)
        }
        Command::Prompts(args) => {
            let prompts = database(&settings)?.prompts_by_category(args.category)?;
            print_json(&prompts.values().collect::<Vec<_>>())
        }
        Command::Questions => print_json(&database(&settings)?.questions()?),
        Command::Urls(args) => {
            let urls = bucket(&settings, &args.bucket)?
                .list_public_urls(&args.path, Some(args.expires_in))?;
            print_json(&urls.into_iter().collect::<BTreeMap<String, String>>())
        }
        Command::Contexts(args) => {
            let contextual = Contextual::load(
                &database(&settings)?,
                &bucket(&settings, &args.bucket)?,
                &args.path,
            )?;
            match args.id.as_deref() {
                Some(id) => print_json(contextual.get(id)?),
                None => print_json(&contextual.iter().collect::<Vec<_>>()),
            }
        }
        Command::Message(args) => print_json(&assemble_messages(&settings, &args)?),
        Command::Invoke(args) => {
            let mut message = Message::user(args.text);
            if let Some(url) = args.image_url.as_deref() {
                message = message.with_image(url);
            }
            let model = model(&settings, &args.model, args.retries, events)?;
            respond(&model, &[message], args.schema)
        }
        Command::Ask(args) => {
            let messages = assemble_messages(&settings, &args.message)?;
            let model = model(&settings, &args.model, args.retries, events)?;
            respond(&model, &messages, args.schema)
        }
    }
}

fn open_events(path: &Path) -> EventWriter {
    let run_id = uuid::Uuid::new_v4().to_string();
    info!(path = %path.display(), run_id = %run_id, "event log enabled");
    EventWriter::new(path, run_id)
}

fn client(settings: &Settings) -> Result<SupabaseClient> {
    Ok(SupabaseClient::new(SupabaseConfig::from_settings(settings)?))
}

fn database(settings: &Settings) -> Result<Database> {
    Ok(Database::new(client(settings)?))
}

fn bucket(settings: &Settings, name: &str) -> Result<Bucket> {
    Ok(Bucket::new(name, client(settings)?))
}

fn model(
    settings: &Settings,
    name: &str,
    retries: u32,
    events: Option<EventWriter>,
) -> Result<Model> {
    let model = Model::new(name, None, retries, &FireworksConfig::from_settings(settings))?;
    Ok(match events {
        Some(events) => model.with_events(events),
        None => model,
    })
}

/// Loads templates and contexts, then renders one conversation for a question.
fn assemble_messages(settings: &Settings, args: &MessageArgs) -> Result<Vec<Message>> {
    let database = database(settings)?;
    let instruction = Instruction::load(&database)?;
    let prompt = instruction.get(args.category, &args.template)?;
    let contextual = Contextual::load(&database, &bucket(settings, &args.bucket)?, &args.path)?;
    let context = contextual.get(&args.question)?;
    let transcript = &context.prompt.transcript;
    let image_url = context.prompt.image_url.as_deref();

    let Some(persona_id) = args.persona_id else {
        if args.category != PromptCategory::Baseline {
            return Err(PilotError::InvalidInput(format!(
                "--persona-id is required for {} templates",
                args.category
            ))
            .into());
        }
        return Ok(Instruction::build_message(prompt, transcript, image_url));
    };
    let personas = match args.persona_table.as_deref() {
        Some(table) => database.personas_from(table)?,
        None => database.personas()?,
    };
    let persona = personas
        .into_iter()
        .find(|persona| persona.id == persona_id)
        .with_context(|| format!("persona {persona_id} not found"))?;
    Ok(Instruction::build_persona_message(
        prompt, &persona, transcript, image_url,
    ))
}

fn respond(model: &Model, messages: &[Message], schema: Option<SchemaChoice>) -> Result<()> {
    match schema {
        None => print_json(&model.invoke(messages)?),
        Some(SchemaChoice::Numeric) => respond_structured::<NumericAnswer>(model, messages),
        Some(SchemaChoice::Time) => respond_structured::<TimeAnswer>(model, messages),
    }
}

fn respond_structured<T: StructuredOutput>(model: &Model, messages: &[Message]) -> Result<()> {
    print_json(&model.invoke_structured::<T>(messages, None)?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn ask_flattens_message_arguments() -> Result<()> {
        let cli = Cli::try_parse_from([
            "siliconcrowds",
            "--events",
            "run/events.jsonl",
            "ask",
            "--model",
            "accounts/fireworks/models/llama",
            "--category",
            "specific-persona",
            "--template",
            "specific_1",
            "--question",
            "q1",
            "--persona-id",
            "7",
            "--schema",
            "time",
        ])?;
        assert_eq!(cli.env_file, PathBuf::from(".env"));
        assert_eq!(cli.events, Some(PathBuf::from("run/events.jsonl")));
        let Command::Ask(args) = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(args.message.category, PromptCategory::SpecificPersona);
        assert_eq!(args.message.persona_id, Some(7));
        assert_eq!(args.message.persona_table, None);
        assert_eq!(args.message.bucket, DEFAULT_BUCKET);
        assert_eq!(args.schema, Some(SchemaChoice::Time));
        assert_eq!(args.retries, DEFAULT_RETRIES);
        Ok(())
    }

    #[test]
    fn message_accepts_a_persona_table_override() -> Result<()> {
        let cli = Cli::try_parse_from([
            "siliconcrowds",
            "message",
            "--category",
            "generic_persona",
            "--template",
            "generic_1",
            "--question",
            "q1",
            "--persona-id",
            "3",
            "--persona-table",
            "personas_uniform",
        ])?;
        let Command::Message(args) = cli.command else {
            panic!("expected message");
        };
        assert_eq!(args.persona_table.as_deref(), Some("personas_uniform"));
        assert_eq!(args.persona_id, Some(3));
        Ok(())
    }

    #[test]
    fn urls_defaults_match_the_pilot_bucket() -> Result<()> {
        let cli = Cli::try_parse_from(["siliconcrowds", "urls"])?;
        let Command::Urls(args) = cli.command else {
            panic!("expected urls");
        };
        assert_eq!(args.path, DEFAULT_IMAGE_PATH);
        assert_eq!(args.expires_in, DEFAULT_EXPIRES_IN);
        Ok(())
    }

    #[test]
    fn unknown_category_is_rejected() {
        let err = parse_category("vip").unwrap_err();
        assert!(err.contains("baseline"), "{err}");
        assert!(Cli::try_parse_from(["siliconcrowds", "prompts", "--category", "vip"]).is_err());
    }
}
