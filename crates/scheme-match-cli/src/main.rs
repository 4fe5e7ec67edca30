use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use scheme_match_api::{
    load_catalog_file, load_policy_file, EvaluateRequest, ListSchemesRequest, PutProfileRequest,
    RecommendRequest, SchemeMatchApi, SearchSchemesRequest,
};
use scheme_match_core::{MatchPolicy, ProfileInput, Scheme, ScoringPolicy};
use scheme_match_store_sqlite::ProfileId;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "sm")]
#[command(about = "Scheme eligibility matching CLI")]
struct Cli {
    #[arg(long, env = "SCHEME_MATCH_DB", default_value = "./scheme_match.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Catalog {
        #[command(subcommand)]
        command: CatalogCommand,
    },
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },
    /// Rank the stored catalog for a stored or inline profile.
    Recommend(RecommendArgs),
    /// Evaluate a profile file against a catalog file without a database.
    Evaluate(EvaluateArgs),
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

#[derive(Debug, Subcommand)]
enum CatalogCommand {
    /// Insert the bundled sample schemes.
    Seed,
    Add(CatalogAddArgs),
    List(CatalogListArgs),
    /// Find active schemes by name or description.
    Search(CatalogSearchArgs),
    /// Print the distinct scheme categories.
    Categories,
    Show(SchemeIdArgs),
    Deactivate(SchemeIdArgs),
}

#[derive(Debug, Args)]
struct CatalogAddArgs {
    /// JSON file holding one scheme record.
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Args)]
struct CatalogListArgs {
    #[arg(long)]
    state: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    active: Option<bool>,
    #[arg(long, default_value_t = 0)]
    skip: usize,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct CatalogSearchArgs {
    #[arg(long)]
    query: String,
    #[arg(long, default_value_t = 0)]
    skip: usize,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct SchemeIdArgs {
    #[arg(long)]
    scheme_id: String,
}

#[derive(Debug, Subcommand)]
enum ProfileCommand {
    Put(ProfilePutArgs),
    Show(ProfileIdArgs),
    Delete(ProfileIdArgs),
}

#[derive(Debug, Args)]
struct ProfilePutArgs {
    /// JSON file holding the profile fields.
    #[arg(long)]
    file: PathBuf,
    /// Replace the profile stored under this id instead of creating one.
    #[arg(long)]
    profile_id: Option<String>,
}

#[derive(Debug, Args)]
struct ProfileIdArgs {
    #[arg(long)]
    profile_id: String,
}

#[derive(Debug, Args)]
struct RecommendArgs {
    #[arg(long, conflicts_with = "profile_file", required_unless_present = "profile_file")]
    profile_id: Option<String>,
    #[arg(long)]
    profile_file: Option<PathBuf>,
    #[command(flatten)]
    policy: PolicyArgs,
}

#[derive(Debug, Args)]
struct EvaluateArgs {
    #[arg(long)]
    profile_file: PathBuf,
    /// JSON file holding an array of scheme records.
    #[arg(long)]
    catalog_file: PathBuf,
    #[command(flatten)]
    policy: PolicyArgs,
}

#[derive(Debug, Args)]
struct PolicyArgs {
    /// YAML policy file; flags below override its values.
    #[arg(long)]
    policy_file: Option<PathBuf>,
    #[arg(long, value_enum)]
    scoring: Option<ScoringArg>,
    #[arg(long)]
    min_score: Option<f64>,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScoringArg {
    Weighted,
    AllOrNothing,
}

impl PolicyArgs {
    fn resolve(&self) -> Result<Option<MatchPolicy>> {
        let overrides = self.scoring.is_some() || self.min_score.is_some() || self.limit.is_some();
        let mut policy = match &self.policy_file {
            Some(path) => load_policy_file(path)?,
            None if overrides => MatchPolicy::default(),
            None => return Ok(None),
        };

        if let Some(scoring) = self.scoring {
            policy.scoring = match scoring {
                ScoringArg::Weighted => ScoringPolicy::Weighted,
                ScoringArg::AllOrNothing => ScoringPolicy::AllOrNothing,
            };
        }
        if let Some(min_score) = self.min_score {
            policy.min_score = min_score;
        }
        if self.limit.is_some() {
            policy.limit = self.limit;
        }
        policy.validate()?;
        Ok(Some(policy))
    }
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

fn emit<T: serde::Serialize>(value: &T) -> Result<()> {
    emit_json(serde_json::to_value(value).context("failed to serialize command output")?)
}

fn read_json_file<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {what} file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {what} file {}", path.display()))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let api = SchemeMatchApi::new(cli.db);
    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Catalog { command } => run_catalog(command, &api),
        Command::Profile { command } => run_profile(command, &api),
        Command::Recommend(args) => run_recommend(&args, &api),
        Command::Evaluate(args) => run_evaluate(&args),
    }
}

fn run_db(command: DbCommand, api: &SchemeMatchApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty(),
            }))
        }
        DbCommand::Migrate(args) => emit(&api.migrate(args.dry_run)?),
    }
}

fn run_catalog(command: CatalogCommand, api: &SchemeMatchApi) -> Result<()> {
    match command {
        CatalogCommand::Seed => emit(&api.seed_catalog()?),
        CatalogCommand::Add(args) => {
            let scheme: Scheme = read_json_file(&args.file, "scheme")?;
            emit(&api.add_scheme(scheme)?)
        }
        CatalogCommand::List(args) => emit(&api.list_schemes(ListSchemesRequest {
            state: args.state,
            category: args.category,
            is_active: args.active,
            skip: args.skip,
            limit: args.limit,
        })?),
        CatalogCommand::Search(args) => emit(&api.search_schemes(SearchSchemesRequest {
            q: args.query,
            skip: args.skip,
            limit: args.limit,
        })?),
        CatalogCommand::Categories => emit(&api.list_categories()?),
        CatalogCommand::Show(args) => emit(&api.get_scheme(&args.scheme_id)?),
        CatalogCommand::Deactivate(args) => emit(&api.deactivate_scheme(&args.scheme_id)?),
    }
}

fn run_profile(command: ProfileCommand, api: &SchemeMatchApi) -> Result<()> {
    match command {
        ProfileCommand::Put(args) => {
            let profile: ProfileInput = read_json_file(&args.file, "profile")?;
            let profile_id = args.profile_id.as_deref().map(ProfileId::parse).transpose()?;
            emit(&api.put_profile(PutProfileRequest { profile_id, profile })?)
        }
        ProfileCommand::Show(args) => emit(&api.get_profile(ProfileId::parse(&args.profile_id)?)?),
        ProfileCommand::Delete(args) => {
            emit(&api.delete_profile(ProfileId::parse(&args.profile_id)?)?)
        }
    }
}

fn run_recommend(args: &RecommendArgs, api: &SchemeMatchApi) -> Result<()> {
    let profile_id = args.profile_id.as_deref().map(ProfileId::parse).transpose()?;
    let profile = match &args.profile_file {
        Some(path) => Some(read_json_file::<ProfileInput>(path, "profile")?),
        None => None,
    };
    let package =
        api.recommend(RecommendRequest { profile_id, profile, policy: args.policy.resolve()? })?;
    emit(&package)
}

fn run_evaluate(args: &EvaluateArgs) -> Result<()> {
    let profile: ProfileInput = read_json_file(&args.profile_file, "profile")?;
    let catalog = load_catalog_file(&args.catalog_file)?;
    let report = SchemeMatchApi::evaluate_inline(EvaluateRequest {
        profile,
        catalog,
        policy: args.policy.resolve()?,
    })?;
    emit(&report)
}
