//! Receptordb CLI - inspect and evolve receptor tables from the command line

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use receptordb::config::{self, BackendConfig, ReceptorConfig};
use receptordb::output::{self, containers_table};
use receptordb::types::{self, VariableType};
use receptordb::{Condition, Database, MemoryBackend, SqliteBackend, StorageBackend, Table, Variable};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "receptordb")]
#[command(version = "0.1.0")]
#[command(about = "Record layer with live schema evolution")]
#[command(long_about = r#"
Receptordb stores receptors (records keyed by id) whose fields are governed by
independently declared variables. Fields without a declared variable are kept
untouched until a variable claims them.

Example usage:
  receptordb init --database shop
  receptordb declare users score --type integer --default 0 --not-null
  receptordb set users alice score 10 --type integer
  receptordb show users alice --as score=integer
  receptordb find users score 10 --type integer
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file
    Init {
        /// Database name
        #[arg(short, long, default_value = "main")]
        database: String,

        /// SQLite file (defaults to .receptordb/receptordb.db)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Use the in-process key-value backend instead of SQLite
        #[arg(long)]
        memory: bool,

        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Declare a field, adding its column when absent
    Declare {
        table: String,
        field: String,

        /// Field type (text, integer, real, boolean, bytes, json)
        #[arg(short, long)]
        r#type: String,

        /// Default value for rows and new receptors
        #[arg(short, long)]
        default: Option<String>,

        /// Reject null values (requires --default)
        #[arg(long)]
        not_null: bool,
    },

    /// Drop a field's column
    Drop {
        table: String,
        field: String,
    },

    /// Load a receptor and print its fields
    Show {
        table: String,
        id: String,

        /// Decode a field through a type, as field=type (repeatable)
        #[arg(long = "as", value_name = "FIELD=TYPE")]
        typed: Vec<String>,
    },

    /// Set one field of a receptor and save it
    Set {
        table: String,
        id: String,
        field: String,
        value: String,

        /// Field type
        #[arg(short, long, default_value = "text")]
        r#type: String,
    },

    /// List receptors whose field equals a value
    Find {
        table: String,
        field: String,
        value: String,

        /// Field type
        #[arg(short, long, default_value = "text")]
        r#type: String,
    },
}

fn resolve_type(name: &str) -> anyhow::Result<Arc<dyn VariableType>> {
    types::by_name(name).ok_or_else(|| anyhow::anyhow!("unknown type '{}'", name))
}

fn open_backend(config: &ReceptorConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match &config.backend {
        BackendConfig::Sqlite { path } => {
            config::ensure_db_dir(path)?;
            Arc::new(SqliteBackend::open(path)?)
        }
        BackendConfig::Memory => {
            tracing::warn!("The memory backend does not persist between invocations");
            Arc::new(MemoryBackend::new())
        }
    };
    Ok(backend)
}

async fn open_table(config: Option<&ReceptorConfig>, table: &str) -> anyhow::Result<Arc<Table>> {
    let config = config.cloned().unwrap_or_default();
    let database = Database::new(config.database.clone(), open_backend(&config)?)?;
    database.load().await?;
    let table = database.table(table)?;
    table.load().await?;
    Ok(table)
}

/// Load a variable over an existing column; never adds one
async fn claim(table: &Arc<Table>, field: &str, ty: &str) -> anyhow::Result<Arc<Variable>> {
    let variable = Variable::new(table, field, resolve_type(ty)?, None, true)?;
    if !variable.exists().await? {
        anyhow::bail!("no field '{}.{}' (declare it first)", table.id(), field);
    }
    variable.load().await?;
    Ok(variable)
}

fn status(message: impl AsRef<str>) {
    if !output::is_quiet() {
        println!("{}", message.as_ref());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let config = config::load_config(Some(&config_path))?;

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if let Some(filter) = config.as_ref().and_then(|c| c.log_filter.as_deref()) {
        EnvFilter::try_new(filter)?
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Init { database, path, memory, force } => {
            let backend = if memory {
                BackendConfig::Memory
            } else {
                BackendConfig::Sqlite {
                    path: path.unwrap_or_else(|| config::default_database_path_in(Path::new("."))),
                }
            };
            let config = ReceptorConfig {
                database,
                log_filter: None,
                backend,
            };
            config::write_config(&config_path, &config, force)?;
            status(format!("Wrote {}", config_path.display()));
        }

        Commands::Declare { table, field, r#type, default, not_null } => {
            let table = open_table(config.as_ref(), &table).await?;
            let ty = resolve_type(&r#type)?;
            let default = default
                .as_deref()
                .map(|literal| types::parse_literal(ty.as_ref(), literal))
                .transpose()?;

            let variable = Variable::new(&table, &field, ty, default, !not_null)?;
            let existed = variable.exists().await?;
            variable.load().await?;
            if existed {
                status(format!("Field '{}.{}' already present", table.id(), field));
            } else {
                status(format!("Added field '{}.{}' ({})", table.id(), field, variable.ty().name()));
            }
        }

        Commands::Drop { table, field } => {
            let table = open_table(config.as_ref(), &table).await?;
            let variable = Variable::new(&table, &field, Arc::new(types::TextType), None, true)?;
            if variable.delete().await? {
                status(format!("Dropped field '{}.{}'", table.id(), field));
            } else {
                status(format!("No field '{}.{}' to drop", table.id(), field));
            }
        }

        Commands::Show { table, id, typed } => {
            let table = open_table(config.as_ref(), &table).await?;
            for spec in &typed {
                let (field, ty) = spec
                    .split_once('=')
                    .ok_or_else(|| anyhow::anyhow!("expected FIELD=TYPE, got '{}'", spec))?;
                claim(&table, field, ty).await?;
            }

            let receptor = table.receptor(&id);
            receptor.load().await?;
            let index = receptor.index().await.unwrap_or_default();
            if receptor.is_new().await {
                status(format!("Created receptor '{}' (index {})", id, index));
            } else {
                status(format!("Receptor '{}' (index {})", id, index));
            }

            let rendered = containers_table(&receptor.snapshot().await);
            if rendered.is_empty() {
                println!("(no fields)");
            } else {
                println!("{}", rendered);
            }
            receptor.unload(false).await?;
        }

        Commands::Set { table, id, field, value, r#type } => {
            let table = open_table(config.as_ref(), &table).await?;
            let variable = claim(&table, &field, &r#type).await?;
            let value = types::parse_literal(variable.ty().as_ref(), &value)?;

            let receptor = table.receptor(&id);
            receptor.load().await?;
            receptor.set(&field, value.clone()).await?;
            receptor.unload(true).await?;
            status(format!("{}.{}.{} = {}", table.id(), id, field, value));
        }

        Commands::Find { table, field, value, r#type } => {
            let table = open_table(config.as_ref(), &table).await?;
            let variable = claim(&table, &field, &r#type).await?;
            let value = types::parse_literal(variable.ty().as_ref(), &value)?;

            let found = table.retrieve(&[Condition::new(&variable, value)]).await?;
            if found.is_empty() {
                status("No receptors found.");
            }
            for receptor in found {
                println!("{}\t{}", receptor.index().await.unwrap_or_default(), receptor.id());
            }
        }
    }

    Ok(())
}
