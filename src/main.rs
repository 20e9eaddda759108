use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tfotc::config::ProviderConfig;
use tfotc::context::CancelToken;
use tfotc::diagnostics::Diagnostics;
use tfotc::logging::{setup_logging, LogLevel};
use tfotc::otc::ClientFactory;
use tfotc::provider::resource::parse_duration;
use tfotc::provider::{Outcome, Provider};

/// Reconcile Open Telekom Cloud resources from JSON state and configuration
#[derive(Parser, Debug)]
#[command(name = "tfotc", version = tfotc::VERSION, about, long_about = None)]
struct Args {
    /// Provider configuration file (JSON or YAML); overrides clouds.yaml and OS_* variables
    #[arg(long, global = true)]
    provider_config: Option<PathBuf>,

    /// Log level for debugging (TF_LOG is used when off)
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    /// Interval between state polls
    #[arg(long, value_parser = parse_duration, default_value = "10s", global = true)]
    poll_interval: Duration,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered resource types and data sources
    Resources,
    /// Print the schema of a resource type or data source
    Schema { type_name: String },
    /// Show the change applying a configuration would make
    Plan(ChangeArgs),
    /// Plan and apply a configuration
    Apply(ChangeArgs),
    /// Delete the instance recorded in a state file
    Destroy(StateArgs),
    /// Adopt an existing remote object
    Import {
        #[arg(long = "type")]
        type_name: String,
        /// External id (`<parent>/<id>` for compound imports)
        #[arg(long)]
        id: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Refresh the instance recorded in a state file
    Read(StateArgs),
    /// Refresh every instance in a state file
    Refresh {
        #[arg(long)]
        state: PathBuf,
        /// Maximum reads in flight
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Read a data source
    Data {
        #[arg(long = "type")]
        type_name: String,
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct ChangeArgs {
    /// Resource type; optional when --state names it
    #[arg(long = "type")]
    type_name: Option<String>,
    #[arg(long)]
    config: PathBuf,
    #[arg(long)]
    state: Option<PathBuf>,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct StateArgs {
    #[arg(long)]
    state: PathBuf,
    #[arg(long)]
    out: Option<PathBuf>,
}

/// One persisted instance
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateRecord {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    state: Json,
    #[serde(default)]
    tainted: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    resources: Vec<StateRecord>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_json<T: Serialize>(out: Option<&Path>, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => std::fs::write(path, text + "\n").with_context(|| format!("Failed to write {}", path.display())),
        None => {
            println!("{}", text);
            Ok(())
        }
    }
}

/// Print diagnostics to stderr; true when any is an error
fn report(diagnostics: &Diagnostics) -> bool {
    for diag in diagnostics.iter() {
        eprintln!("{}", diag);
    }
    diagnostics.has_errors()
}

fn record(type_name: &str, outcome: &Outcome) -> StateRecord {
    StateRecord {
        type_name: type_name.to_string(),
        state: outcome.state_json(),
        tainted: outcome.tainted,
    }
}

fn exit_code(failed: bool) -> ExitCode {
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Cancel the invocation on Ctrl-C
fn cancel_on_interrupt() -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, cancelling...");
            tracing::warn!("Interrupted, cancelling in-flight operations");
            token.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let _log_guard = setup_logging(args.log_level);

    let registry = tfotc::resources::builtin()?;

    // Commands that need no credentials
    match &args.command {
        Command::Resources => {
            write_json(
                None,
                &json!({
                    "resources": registry.resource_types(),
                    "data_sources": registry.data_source_types(),
                }),
            )?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Schema { type_name } => {
            let schema = match (registry.resource(type_name), registry.data_source(type_name)) {
                (Some(def), _) => def.schema.describe(),
                (None, Some(def)) => def.schema.describe(),
                (None, None) => bail!("Unknown type {:?}", type_name),
            };
            write_json(None, &schema)?;
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let config = ProviderConfig::load(args.provider_config.as_deref())?;
    tracing::debug!("Provider configuration: {:?}", config);
    let factory = ClientFactory::new(config)?;
    let provider = Provider::new(registry, factory).with_poll_interval(args.poll_interval);
    let ctx = provider.context(cancel_on_interrupt());

    let failed = match args.command {
        Command::Resources | Command::Schema { .. } => false,

        Command::Plan(change) => {
            let (type_name, prior) = change_inputs(&change)?;
            let config: Json = read_json(&change.config)?;
            match plan(&provider, &type_name, prior.as_ref(), Some(&config)) {
                Ok((rendered, _)) => {
                    write_json(change.out.as_deref(), &rendered)?;
                    false
                }
                Err(diags) => report(&diags),
            }
        }

        Command::Apply(change) => {
            let (type_name, prior) = change_inputs(&change)?;
            let config: Json = read_json(&change.config)?;
            match plan(&provider, &type_name, prior.as_ref(), Some(&config)) {
                Ok((_, plan)) => {
                    eprintln!("{}: {:?}", type_name, plan.action);
                    let outcome = provider.apply(&ctx, &plan).await;
                    let failed = report(&outcome.diagnostics);
                    write_json(change.out.as_deref(), &record(&type_name, &outcome))?;
                    failed
                }
                Err(diags) => report(&diags),
            }
        }

        Command::Destroy(state) => {
            let prior: StateRecord = read_json(&state.state)?;
            match provider.plan(&prior.type_name, Some(&prior.state), None) {
                Ok(plan) => {
                    let outcome = provider.apply(&ctx, &plan).await;
                    let failed = report(&outcome.diagnostics);
                    write_json(state.out.as_deref(), &record(&prior.type_name, &outcome))?;
                    failed
                }
                Err(diags) => report(&diags),
            }
        }

        Command::Import { type_name, id, out } => {
            let outcome = provider.import(&ctx, &type_name, &id).await;
            let failed = report(&outcome.diagnostics);
            if !failed {
                write_json(out.as_deref(), &record(&type_name, &outcome))?;
            }
            failed
        }

        Command::Read(state) => {
            let prior: StateRecord = read_json(&state.state)?;
            let outcome = provider.read(&ctx, &prior.type_name, &prior.state).await;
            let failed = report(&outcome.diagnostics);
            let mut refreshed = record(&prior.type_name, &outcome);
            refreshed.tainted = prior.tainted && outcome.state.is_some();
            write_json(state.out.as_deref(), &refreshed)?;
            failed
        }

        Command::Refresh { state, concurrency, out } => {
            let file: StateFile = read_json(&state)?;
            let instances: Vec<(String, Json)> = file
                .resources
                .iter()
                .map(|r| (r.type_name.clone(), r.state.clone()))
                .collect();

            let outcomes = provider.refresh_all(&ctx, instances, concurrency).await;

            let mut failed = false;
            let mut refreshed = StateFile::default();
            for (prior, outcome) in file.resources.into_iter().zip(outcomes) {
                failed |= report(&outcome.diagnostics);
                if outcome.state.is_some() {
                    let mut rec = record(&prior.type_name, &outcome);
                    rec.tainted = prior.tainted;
                    refreshed.resources.push(rec);
                }
            }
            write_json(out.as_deref(), &refreshed)?;
            failed
        }

        Command::Data { type_name, config } => {
            let config: Json = read_json(&config)?;
            let outcome = provider.read_data_source(&ctx, &type_name, &config).await;
            let failed = report(&outcome.diagnostics);
            if !failed {
                write_json(None, &outcome.state_json())?;
            }
            failed
        }
    };

    Ok(exit_code(failed))
}

/// Resource type and persisted record for plan/apply
fn change_inputs(change: &ChangeArgs) -> Result<(String, Option<StateRecord>)> {
    let prior: Option<StateRecord> = change.state.as_deref().map(read_json::<StateRecord>).transpose()?;
    let type_name = match (&change.type_name, &prior) {
        (Some(t), Some(p)) if *t != p.type_name => {
            bail!("--type {} does not match state type {}", t, p.type_name)
        }
        (Some(t), _) => t.clone(),
        (None, Some(p)) => p.type_name.clone(),
        (None, None) => bail!("--type is required without --state"),
    };
    Ok((type_name, prior))
}

fn plan(
    provider: &Provider,
    type_name: &str,
    prior: Option<&StateRecord>,
    config: Option<&Json>,
) -> std::result::Result<(Json, tfotc::provider::Plan), Diagnostics> {
    let mut plan = provider.plan(type_name, prior.map(|p| &p.state), config)?;
    if prior.is_some_and(|p| p.tainted) {
        plan.force_replace();
    }
    let rendered = provider
        .registry()
        .resource(type_name)
        .map(|def| plan.render(&def.schema))
        .unwrap_or(Json::Null);
    Ok((rendered, plan))
}
