use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use member_commons_api::{
    HttpSource, MemberCommonsApi, RecommendRequest, ScoreSurveyRequest, SourceConfig,
    DEFAULT_TIMEOUT_SECS,
};
use member_commons_core::{known_preferences, SurveyResponses, TOTAL_QUESTIONS};
use serde::Deserialize;
use serde_json::Value;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const DEFAULT_MEMBER: &str = "local";

#[derive(Debug, Parser)]
#[command(name = "mc")]
#[command(about = "Member Commons CLI")]
struct Cli {
    #[arg(long, env = "MEMBER_COMMONS_DB", default_value = "./member_commons.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Records {
        #[command(subcommand)]
        command: RecordsCommand,
    },
    Survey {
        #[command(subcommand)]
        command: SurveyCommand,
    },
    Projects {
        #[command(subcommand)]
        command: ProjectsCommand,
    },
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[derive(Debug, Subcommand)]
enum RecordsCommand {
    Normalize(InputArgs),
    Table(TableArgs),
    Fetch(FetchArgs),
}

#[derive(Debug, Args)]
struct InputArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Args)]
struct TableArgs {
    #[arg(long = "in")]
    input: PathBuf,
    #[arg(long, default_value_t = 40)]
    max_width: usize,
}

#[derive(Debug, Args)]
struct FetchArgs {
    #[arg(long, env = "MEMBER_COMMONS_PROJECTS_URL")]
    url: String,
    #[arg(long, env = "MEMBER_COMMONS_API_TOKEN")]
    token: Option<String>,
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,
    #[arg(long, default_value_t = false)]
    snapshot: bool,
}

#[derive(Debug, Subcommand)]
enum SurveyCommand {
    Score(SurveyScoreArgs),
    Show(SurveyShowArgs),
}

#[derive(Debug, Args)]
struct SurveyScoreArgs {
    #[arg(long = "in")]
    input: PathBuf,
    #[arg(long, default_value = DEFAULT_MEMBER)]
    member: String,
    #[arg(long, default_value_t = false)]
    save: bool,
}

#[derive(Debug, Args)]
struct SurveyShowArgs {
    #[arg(long, default_value = DEFAULT_MEMBER)]
    member: String,
}

#[derive(Debug, Subcommand)]
enum ProjectsCommand {
    Recommend(RecommendArgs),
    Preferences,
}

#[derive(Debug, Args)]
struct RecommendArgs {
    #[arg(long = "in")]
    input: PathBuf,
    #[arg(long = "preference", required = true)]
    preferences: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

/// Survey answers file: `{"responses": {"1": 4, ...}, "interests": {...}}`.
#[derive(Debug, Deserialize)]
struct SurveyFile {
    responses: SurveyResponses,
    #[serde(default)]
    interests: BTreeMap<String, u8>,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn read_json_file(path: &Path) -> Result<Value> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read JSON file {}", path.display()))?;
    serde_json::from_str(&body).with_context(|| format!("failed to parse JSON file {}", path.display()))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let api = MemberCommonsApi::new(cli.db);
    match cli.command {
        Command::Records { command } => run_records(command, &api),
        Command::Survey { command } => run_survey(command, &api),
        Command::Projects { command } => run_projects(command),
        Command::Db { command } => run_db(command, &api),
    }
}

fn run_records(command: RecordsCommand, api: &MemberCommonsApi) -> Result<()> {
    match command {
        RecordsCommand::Normalize(args) => {
            let payload = read_json_file(&args.input)?;
            emit_json(serde_json::to_value(MemberCommonsApi::normalize(payload))?)
        }
        RecordsCommand::Table(args) => {
            let payload = read_json_file(&args.input)?;
            let table = MemberCommonsApi::table(payload)?;
            print!("{}", table.render_text(args.max_width));
            Ok(())
        }
        RecordsCommand::Fetch(args) => {
            let config = SourceConfig::new(args.url)
                .with_token(args.token)
                .with_timeout(Duration::from_secs(args.timeout_secs));
            let result = api.fetch_listing(&HttpSource::new(config), args.snapshot)?;
            emit_json(serde_json::to_value(result)?)
        }
    }
}

fn run_survey(command: SurveyCommand, api: &MemberCommonsApi) -> Result<()> {
    match command {
        SurveyCommand::Score(args) => {
            let file: SurveyFile = serde_json::from_value(read_json_file(&args.input)?)
                .with_context(|| format!("invalid survey file {}", args.input.display()))?;
            let result = api.score_survey(ScoreSurveyRequest {
                member: args.member,
                responses: file.responses,
                interests: file.interests,
                save: args.save,
            })?;
            let progress = format!("{} of {TOTAL_QUESTIONS} completed", result.profile.answered);
            let mut value = serde_json::to_value(result)?;
            if let Value::Object(object) = &mut value {
                object.insert("progress".to_string(), Value::String(progress));
            }
            emit_json(value)
        }
        SurveyCommand::Show(args) => {
            let Some(preferences) = api.latest_preferences(&args.member)? else {
                return Err(anyhow!("no saved survey for member `{}`", args.member));
            };
            emit_json(serde_json::to_value(preferences)?)
        }
    }
}

fn run_projects(command: ProjectsCommand) -> Result<()> {
    match command {
        ProjectsCommand::Recommend(args) => {
            let records = read_json_file(&args.input)?;
            let result = MemberCommonsApi::recommend(RecommendRequest {
                preferences: args.preferences,
                records,
            })?;
            emit_json(serde_json::to_value(result)?)
        }
        ProjectsCommand::Preferences => {
            emit_json(serde_json::json!({ "preferences": known_preferences() }))
        }
    }
}

fn run_db(command: DbCommand, api: &MemberCommonsApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => emit_json(serde_json::to_value(api.migrate(args.dry_run)?)?),
    }
}
