use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use semlayer::db::Db;
use semlayer::store::{import_bundle, Bundle};
use semlayer::{Config, Context, Entity, SemanticService, SqliteStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "semlayer")]
#[command(version, about = "Semantic type inference and relation validation")]
struct Args {
    /// Config file (defaults to $SEMLAYER_CONFIG, then ./config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending database migrations
    Migrate,
    /// Install the built-in Document and User patterns
    Seed,
    /// Import patterns, rules and hierarchy facts from a JSON bundle
    Import { bundle: PathBuf },
    /// Print snapshot statistics
    Stats,
    /// Infer semantic types for an entity
    InferTypes { entity: PathBuf },
    /// Infer relations and properties for an entity
    InferRelations {
        entity: PathBuf,
        #[arg(long)]
        context: Option<PathBuf>,
    },
    /// Validate a proposed relation between two entities
    Validate {
        from: PathBuf,
        to: PathBuf,
        #[arg(short, long)]
        relation: String,
        #[arg(long)]
        context: Option<PathBuf>,
    },
    /// Types, ancestors and inferred relations of an entity
    Enrich {
        entity: PathBuf,
        #[arg(long)]
        context: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        return Config::from_path(path);
    }
    if std::env::var_os("SEMLAYER_CONFIG").is_some() || Path::new("config.toml").exists() {
        return Config::load();
    }
    let _ = dotenv::dotenv();
    Ok(Config::default())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn read_context(path: Option<&Path>) -> Result<Option<Context>> {
    path.map(read_json::<Context>).transpose()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", &config.semlayer.log_level)
    ).init();

    log::debug!("Database path: {}", config.db_path().display());

    let store = SqliteStore::new(Db::new(config.db_path()));
    store
        .migrate(config.migrations_dir())
        .await
        .with_context(|| format!("Failed to migrate {}", config.db_path().display()))?;

    match args.command {
        Command::Migrate => {
            log::info!("Database ready at {}", config.db_path().display());
        }
        Command::Seed => {
            let count = store.seed_default_patterns().await?;
            println!("Seeded {} patterns", count);
        }
        Command::Import { bundle } => {
            let bundle: Bundle = read_json(&bundle)?;
            let stats = import_bundle(&store, &bundle).await?;
            print_json(&stats)?;
        }
        Command::Stats => {
            let service = SemanticService::new(store, &config);
            let snapshot = service.snapshot().await?;
            print_json(&snapshot.stats())?;
        }
        Command::InferTypes { entity } => {
            let entity: Entity = read_json(&entity)?;
            let service = SemanticService::new(store, &config);
            let inferred = service.infer_types(&entity).await?;
            print_json(&inferred.value)?;
        }
        Command::InferRelations { entity, context } => {
            let entity: Entity = read_json(&entity)?;
            let context = read_context(context.as_deref())?;
            let service = SemanticService::new(store, &config);
            let result = service.infer_relations(&entity, context.as_ref()).await?;
            print_json(&result)?;
        }
        Command::Validate {
            from,
            to,
            relation,
            context,
        } => {
            let from: Entity = read_json(&from)?;
            let to: Entity = read_json(&to)?;
            let context = read_context(context.as_deref())?;
            let service = SemanticService::new(store, &config);
            let result = service
                .validate_relation(&from, &to, &relation, context.as_ref())
                .await?;
            print_json(&result)?;
            if !result.is_valid {
                std::process::exit(2);
            }
        }
        Command::Enrich { entity, context } => {
            let entity: Entity = read_json(&entity)?;
            let context = read_context(context.as_deref())?;
            let service = SemanticService::new(store, &config);
            let profile = service.enrich_entity(&entity, context.as_ref()).await?;
            print_json(&profile.value)?;
        }
    }

    Ok(())
}
