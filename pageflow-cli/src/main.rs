//! Headless runner for pageflow page schemas.
//!
//! Loads a page definition, resolves its data sources against a memory,
//! file or remote store, and prints the resolved component tree or the
//! trace of a fired action as JSON.
//!
//! Usage:
//!   pageflow validate page.json
//!   pageflow render page.json --store todos.json
//!   pageflow fire page.json --action add-todo --payload '{"title":"milk"}'

use anyhow::{Result, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use pageflow_cli::{
    StoreOptions, collaborators, fire, load_page, open_store, parse_object, read_schema, render,
    validate,
};
use pageflow_engine::{EngineConfig, PageRuntime};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "pageflow")]
#[command(about = "Run JSON-defined pages without a UI")]
struct Args {
    /// Engine config file
    #[arg(short, long, global = true, default_value = "pageflow.toml")]
    config: PathBuf,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a schema for structural problems and dependency cycles
    Validate {
        schema: PathBuf,
    },
    /// Resolve every data source and print the rendered tree
    Render {
        schema: PathBuf,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Execute an action and print its trace and the resulting context
    Fire {
        schema: PathBuf,

        /// Action id to execute
        #[arg(short, long)]
        action: String,

        /// JSON object merged over the action payload
        #[arg(short, long)]
        payload: Option<String>,

        /// JSON value exposed to templates as `event`
        #[arg(short, long)]
        event: Option<String>,

        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// JSON file used as the key-value store
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Base URL of a remote storage backend
    #[arg(long, conflicts_with = "store")]
    remote: Option<String>,

    /// Register only these component types (defaults to every type in the schema)
    #[arg(long = "component")]
    components: Vec<String>,

    /// Base URL for relative api endpoints
    #[arg(long)]
    api_base: Option<String>,
}

impl RunArgs {
    fn store_options(&self) -> StoreOptions {
        StoreOptions {
            file: self.store.clone(),
            remote: self.remote.clone(),
        }
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_page(schema: &Path, run: &RunArgs, config: EngineConfig) -> Result<PageRuntime> {
    let json = read_schema(schema)?;
    let store = open_store(&run.store_options()).await?;
    let collaborators = collaborators(store, run.api_base.as_deref())?;
    load_page(&json, &run.components, collaborators, config).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let config = EngineConfig::load_from(&args.config);
    debug!("Engine config: {:?}", config);

    match args.command {
        Command::Validate { schema } => {
            let report = validate(&read_schema(&schema)?)?;
            print_json(&report)?;
            if !report.is_valid() {
                bail!("{} issue(s) in {}", report.issues.len(), schema.display());
            }
            info!("Schema {} is valid", report.page);
        }
        Command::Render { schema, run } => {
            let page = open_page(&schema, &run, config).await?;
            info!("Loaded page {} ({})", page.schema().id, page.instance_id());
            print_json(&render(&page).await)?;
            page.teardown();
        }
        Command::Fire {
            schema,
            action,
            payload,
            event,
            run,
        } => {
            let payload = parse_object(payload.as_deref())?;
            let event = match event.as_deref() {
                Some(text) => serde_json::from_str(text)?,
                None => Value::Null,
            };
            let page = open_page(&schema, &run, config).await?;
            let report = fire(&page, &action, payload, event).await;
            print_json(&report)?;
            page.teardown();
            if !report.trace.succeeded() {
                bail!("action {} failed", action);
            }
        }
    }

    Ok(())
}
