use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use benchboard_ai::{
    GeminiClient, GeminiConfig, GenerativeMatcher, DEFAULT_MODEL, DEFAULT_TIMEOUT_SECS,
};
use benchboard_core::{ColumnMapping, RecordKind};
use benchboard_ingest::{AliasTable, RowMapper};
use benchboard_pipeline::{refresh_dashboard, IngestPipeline};
use benchboard_storage::{connect, connect_lazy, Store};
use benchboard_web::{AppState, Environment};
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgConnectOptions;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "benchboard-cli")]
#[command(about = "BenchBoard bench and RRF tracking service")]
struct Cli {
    #[arg(long, env = "DATABASE_URL", hide_env_values = true, global = true)]
    database_url: Option<String>,

    #[arg(long, env = "BENCHBOARD_DB_MAX_CONNECTIONS", default_value_t = 20, global = true)]
    db_max_connections: u32,

    #[arg(long, env = "BENCHBOARD_ALIASES", global = true)]
    aliases: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API.
    Serve(ServeArgs),
    /// Create the schema if it is missing.
    InitDb,
    /// Check connectivity and list application tables.
    DbTest,
    /// Ingest the first worksheet of a workbook.
    Ingest {
        /// `resource` or `rrf`
        kind: RecordKind,
        path: PathBuf,
        #[arg(long)]
        uploaded_by: Option<String>,
        /// JSON file with a confirmed column mapping (label -> column or null).
        #[arg(long)]
        mapping: Option<PathBuf>,
    },
    /// Recompute and persist dashboard metrics.
    Dashboard,
}

#[derive(Debug, clap::Args)]
struct ServeArgs {
    #[arg(long, env = "BENCHBOARD_PORT", default_value_t = 8000)]
    port: u16,

    #[arg(long, env = "BENCHBOARD_ENV", default_value = "production")]
    environment: Environment,

    #[arg(long, env = "GOOGLE_GENAI_API_KEY", hide_env_values = true)]
    api_key: Option<ApiKey>,

    #[arg(long, env = "BENCHBOARD_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long, env = "BENCHBOARD_MODEL_BASE_URL")]
    model_base_url: Option<String>,

    #[arg(long, env = "BENCHBOARD_MODEL_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    model_timeout_secs: u64,
}

#[derive(Debug, Error)]
enum ConfigError {
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,
    #[error("DATABASE_URL is not a valid postgres connection string: {0}")]
    InvalidDatabaseUrl(#[source] sqlx::Error),
    #[error("GOOGLE_GENAI_API_KEY is not set")]
    MissingApiKey,
    #[error("model timeout must be at least one second")]
    ZeroTimeout,
}

/// Model API key. Never printed.
#[derive(Clone, PartialEq, Eq)]
struct ApiKey(String);

impl FromStr for ApiKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        if key.is_empty() {
            return Err("API key is empty".to_string());
        }
        if key.chars().any(char::is_whitespace) {
            return Err("API key contains whitespace".to_string());
        }
        Ok(Self(key.to_string()))
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

fn database_options(url: Option<&str>) -> Result<PgConnectOptions, ConfigError> {
    let url = url
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or(ConfigError::MissingDatabaseUrl)?;
    url.parse().map_err(ConfigError::InvalidDatabaseUrl)
}

fn gemini_config(args: &ServeArgs) -> Result<GeminiConfig, ConfigError> {
    let ApiKey(key) = args.api_key.clone().ok_or(ConfigError::MissingApiKey)?;
    if args.model_timeout_secs == 0 {
        return Err(ConfigError::ZeroTimeout);
    }
    let mut config = GeminiConfig::new(key);
    config.model = args.model.clone();
    config.timeout = Duration::from_secs(args.model_timeout_secs);
    if let Some(base_url) = &args.model_base_url {
        config.base_url = base_url.clone();
    }
    Ok(config)
}

fn load_mapper(path: Option<&Path>) -> Result<RowMapper> {
    let aliases = match path {
        Some(path) => AliasTable::load(path)?,
        None => AliasTable::builtin()?,
    };
    Ok(RowMapper::new(aliases))
}

fn load_mapping(path: &Path) -> Result<ColumnMapping> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading column mapping {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing column mapping {}", path.display()))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let options = database_options(cli.database_url.as_deref())?;
    info!(
        host = options.get_host(),
        port = options.get_port(),
        database = options.get_database().unwrap_or_default(),
        "database configured"
    );
    let mapper = load_mapper(cli.aliases.as_deref())?;

    match cli.command {
        Commands::Serve(args) => {
            let model = gemini_config(&args)?;
            let matcher = GenerativeMatcher::new(GeminiClient::new(model)?);
            let store = Store::new(connect_lazy(options, cli.db_max_connections));
            let state = AppState::new(store, mapper, Arc::new(matcher), args.environment);
            benchboard_web::serve(state, SocketAddr::from(([0, 0, 0, 0], args.port))).await?;
        }
        Commands::InitDb => {
            let store = Store::new(connect(options, cli.db_max_connections).await?);
            let outcome = store.ensure_initialized().await?;
            print_json(&outcome)?;
        }
        Commands::DbTest => {
            let store = Store::new(connect(options, cli.db_max_connections).await?);
            print_json(&store.diagnostics().await?)?;
        }
        Commands::Ingest {
            kind,
            path,
            uploaded_by,
            mapping,
        } => {
            let mapping = mapping.as_deref().map(load_mapping).transpose()?;
            let store = Store::new(connect(options, cli.db_max_connections).await?);
            let report = IngestPipeline::new(store, mapper)
                .ingest_workbook(kind, &path, uploaded_by, mapping)
                .await?;
            print_json(&report)?;
        }
        Commands::Dashboard => {
            let store = Store::new(connect(options, cli.db_max_connections).await?);
            store.ensure_initialized().await?;
            print_json(&refresh_dashboard(&store, Utc::now().date_naive()).await?)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn serve_args(extra: &[&str]) -> ServeArgs {
        let mut argv = vec!["benchboard-cli", "serve"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Serve(args) => args,
            other => panic!("expected serve, got {other:?}"),
        }
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn database_url_is_required_and_validated() {
        assert!(matches!(database_options(None), Err(ConfigError::MissingDatabaseUrl)));
        assert!(matches!(database_options(Some("  ")), Err(ConfigError::MissingDatabaseUrl)));
        assert!(matches!(
            database_options(Some("mysql://nope")),
            Err(ConfigError::InvalidDatabaseUrl(_))
        ));

        let url = "postgres://bench:pw@db.internal:6543/benchboard";
        let options = database_options(Some(url)).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("benchboard"));
    }

    #[test]
    fn api_key_is_trimmed_and_never_debug_printed() {
        let key: ApiKey = "  AIza-secret \n".parse().unwrap();
        assert_eq!(key, ApiKey("AIza-secret".to_string()));
        assert!(!format!("{key:?}").contains("secret"));
        assert!("   ".parse::<ApiKey>().is_err());
        assert!("AIza secret".parse::<ApiKey>().is_err());
    }

    #[test]
    fn serve_without_key_fails_fast() {
        let mut args = serve_args(&["--api-key", "k"]);
        args.api_key = None;
        assert!(matches!(gemini_config(&args), Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn serve_builds_model_config_from_flags() {
        let args = serve_args(&[
            "--api-key",
            "k-123",
            "--model",
            "gemini-test",
            "--model-timeout-secs",
            "30",
            "--model-base-url",
            "http://localhost:9000/v1beta",
        ]);
        let config = gemini_config(&args).unwrap();
        assert_eq!(config.api_key, "k-123");
        assert_eq!(config.model, "gemini-test");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.base_url, "http://localhost:9000/v1beta");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let args = serve_args(&["--api-key", "k", "--model-timeout-secs", "0"]);
        assert!(matches!(gemini_config(&args), Err(ConfigError::ZeroTimeout)));
    }

    #[test]
    fn serve_environment_accepts_short_names() {
        let args = serve_args(&["--api-key", "k", "--environment", "dev"]);
        assert_eq!(args.environment, Environment::Development);
    }

    #[test]
    fn ingest_parses_kind_aliases() {
        let cli = Cli::try_parse_from(["benchboard-cli", "ingest", "bench", "sheet.xlsx"]).unwrap();
        assert!(matches!(cli.command, Commands::Ingest { kind: RecordKind::Resource, .. }));
    }
}
