//! muppets CLI entrypoint
//! Parses command-line arguments and dispatches to the lifecycle orchestrator.
//!
//! Results are printed to stdout as JSON; logs go to stderr. The exit code
//! is `0` on success, `1` for validation errors, `2` for external failures
//! and `3` when another operation holds the muppet.
#![deny(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;
use serde_json::{Value, json};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use muppets::application::{
    CreateMuppetRequest, VerifyTemplateRequest, VerifyTemplateUseCase, build_orchestrator,
    build_verifier, load_registry,
};
use muppets::core::{Config, ShellCommandExecutor};
use muppets::lifecycle::{ErrorDetail, LifecycleRecord, OperationContext, Orchestrator};
use muppets::{Error, ErrorKind};

#[derive(Parser)]
#[command(name = "muppets")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to MUPPETS_CONFIG, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Deadline for the whole operation, in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Create a muppet, or resume a create that failed partway
    Create {
        /// Muppet name (lowercase letters, digits and hyphens)
        name: String,
        /// Template to generate the muppet from
        #[arg(long)]
        template: String,
        /// Template parameter, repeatable
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        /// Target environment
        #[arg(long = "env", default_value = "development")]
        environment: String,
        /// Feature override (`name` or `name=false`), repeatable
        #[arg(long = "feature", value_name = "NAME[=BOOL]")]
        features: Vec<String>,
    },
    /// Tear down infrastructure and delete the repository of a muppet
    Delete { name: String },
    /// Show the lifecycle record of a muppet
    Status { name: String },
    /// List every known muppet
    List,
    /// Show the pipeline version history of a muppet
    ListPipelineVersions { name: String },
    /// Re-render and push the CI/CD workflows of an active muppet
    UpdatePipelines { name: String },
    /// Push the workflows of an earlier pipeline version as a new version
    RollbackPipelines {
        name: String,
        /// Version to restore
        #[arg(long)]
        version: u32,
    },
    /// Materialize a template and run the template checklist
    VerifyTemplate {
        /// Template to verify
        template: String,
        /// Muppet name used for instantiation
        #[arg(long, default_value = "sample-muppet")]
        name: String,
        /// Template parameter, repeatable
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        /// Feature override (`name` or `name=false`), repeatable
        #[arg(long = "feature", value_name = "NAME[=BOOL]")]
        features: Vec<String>,
        /// Keep the materialized project in this directory
        #[arg(long)]
        output: Option<PathBuf>,
        /// Skip the build check
        #[arg(long)]
        skip_build: bool,
        /// Skip the container check
        #[arg(long)]
        skip_container: bool,
    },
    /// List available templates
    Templates,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            let code = exit_code(&err);
            error!("{err:#}");
            print_json(&json!({
                "error": {
                    "kind": err.downcast_ref::<Error>().map(|e| e.kind()).unwrap_or(ErrorKind::ExternalFatal),
                    "message": format!("{err:#}"),
                }
            }));
            ExitCode::from(code)
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(e) => u8::try_from(e.exit_code()).unwrap_or(2),
        None => 2,
    }
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => error!("Failed to serialize output: {e}"),
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = Config::load(cli.config.as_deref())
        .map_err(Error::from)
        .context("Failed to load configuration")?;
    let ctx = OperationContext::from_timeout(
        cli.timeout
            .map(Duration::from_secs)
            .or_else(|| config.operation_timeout()),
    );

    match cli.command {
        Commands::Templates => {
            let registry = load_registry(&config).await?;
            let templates: Vec<Value> = registry.list().map(|t| t.summary()).collect();
            print_json(&Value::Array(templates));
            Ok(ExitCode::SUCCESS)
        }
        Commands::VerifyTemplate {
            template,
            name,
            params,
            features,
            output,
            skip_build,
            skip_container,
        } => {
            let registry = load_registry(&config).await?;
            let verifier = build_verifier(&config, Arc::new(ShellCommandExecutor::new()))?;
            let request = VerifyTemplateRequest {
                template,
                muppet_name: name,
                params,
                features,
                output_dir: output,
                skip_build,
                skip_container,
            };
            let report = VerifyTemplateUseCase::new(registry, verifier)
                .execute(&request)
                .await?;
            print_json(&serde_json::to_value(&report)?);
            Ok(if report.passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
        command => {
            let orchestrator = build_orchestrator(&config).await?;
            lifecycle_command(&orchestrator, command, ctx).await
        }
    }
}

async fn lifecycle_command(
    orchestrator: &Orchestrator,
    command: Commands,
    ctx: OperationContext,
) -> anyhow::Result<ExitCode> {
    let started = Utc::now();
    let (name, result) = match command {
        Commands::Create {
            name,
            template,
            params,
            environment,
            features,
        } => {
            let spec = CreateMuppetRequest {
                name: name.clone(),
                template,
                params,
                environment,
                features,
            }
            .into_spec()
            .map_err(Error::from)?;
            info!(muppet = %spec.name, template = %spec.template, "Creating muppet");
            (name, orchestrator.create(&spec, ctx).await)
        }
        Commands::Delete { name } => {
            let result = orchestrator.delete(&name, ctx).await;
            (name, result)
        }
        Commands::UpdatePipelines { name } => {
            let result = orchestrator.update_pipelines(&name, ctx).await;
            (name, result)
        }
        Commands::RollbackPipelines { name, version } => {
            let result = orchestrator.rollback_pipelines(&name, version, ctx).await;
            (name, result)
        }
        Commands::Status { name } => {
            let record = orchestrator.status(&name).await?;
            print_json(&serde_json::to_value(&record)?);
            return Ok(ExitCode::SUCCESS);
        }
        Commands::List => {
            let records = orchestrator.list().await?;
            let summaries: Vec<Value> = records.iter().map(record_summary).collect();
            print_json(&Value::Array(summaries));
            return Ok(ExitCode::SUCCESS);
        }
        Commands::ListPipelineVersions { name } => {
            let versions = orchestrator.list_pipeline_versions(&name).await?;
            let summaries: Vec<Value> = versions.iter().map(|v| v.summary()).collect();
            print_json(&Value::Array(summaries));
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Templates | Commands::VerifyTemplate { .. } => {
            unreachable!("handled before the orchestrator is built")
        }
    };

    match result {
        Ok(record) => {
            print_json(&serde_json::to_value(&record)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            error!(muppet = %name, "{err}");
            let detail = failure_detail(orchestrator, &name, started).await;
            print_json(&json!({
                "error": {
                    "kind": err.kind(),
                    "message": err.to_string(),
                    "step": detail.as_ref().map(|d| d.step),
                    "last_successful_state": detail.as_ref().map(|d| d.last_successful_state),
                    "compensation": detail.and_then(|d| d.compensation),
                }
            }));
            Ok(ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(2)))
        }
    }
}

/// Failing step and last successful state, when this operation failed the muppet
async fn failure_detail(
    orchestrator: &Orchestrator,
    name: &str,
    started: DateTime<Utc>,
) -> Option<ErrorDetail> {
    let record = orchestrator.status(name).await.ok()?;
    record.failure_since(started).cloned()
}

fn record_summary(record: &LifecycleRecord) -> Value {
    json!({
        "name": record.name,
        "state": record.state,
        "template": record.template,
        "environment": record.environment,
        "service_url": record.service_url(),
        "active_pipeline_version": record.active_pipeline_version,
        "updated_at": record.updated_at,
    })
}
