//! Tool Engine CLI
//!
//! Offline checks for tool definitions, record payloads and visibility
//! expressions, plus config management.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tool_engine::config::EngineConfig;
use tool_engine::expr::{EvalContext, Expression};
use tool_engine::lint::lint_schemas;
use tool_engine::schema::{Role, ToolSchemaInput};
use tool_engine::validator::{RecordValidator, ValidationMode};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "toolctl")]
#[command(about = "Validate tool schemas, record payloads and visibility expressions")]
struct Cli {
    /// Explicit config file, layered over the default locations
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a schema file, or every *.json schema under a directory
    Validate {
        path: PathBuf,
        /// Hide warnings
        #[arg(short, long)]
        quiet: bool,
    },

    /// Run a record payload through a schema's compiled validator
    CheckRecord {
        #[arg(short, long)]
        schema: PathBuf,
        #[arg(short, long)]
        record: PathBuf,
        /// Validate as an update (all fields optional)
        #[arg(long)]
        partial: bool,
    },

    /// Evaluate a visibility expression
    Eval {
        #[arg(short, long)]
        expr: String,
        /// JSON object bound to `record`
        #[arg(short, long)]
        record: Option<PathBuf>,
        #[arg(long, default_value = "viewer")]
        role: Role,
        #[arg(long)]
        user_id: Option<String>,
    },

    /// Show or create configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show {
        #[arg(long, conflicts_with = "json")]
        toml: bool,
        #[arg(long)]
        json: bool,
    },
    /// Write a default config file
    Init {
        #[arg(short, long, default_value = "tool-engine.toml")]
        output: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let config = EngineConfig::load_from(cli.config.as_deref());

    let fallback = config
        .as_ref()
        .map(|c| c.logging.filter.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .init();

    let result = config
        .context("Failed to load configuration")
        .and_then(|config| run(cli.command, config));

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

/// Returns whether the command succeeded
fn run(command: Commands, config: EngineConfig) -> anyhow::Result<bool> {
    match command {
        Commands::Validate { path, quiet } => validate(&path, quiet),
        Commands::CheckRecord {
            schema,
            record,
            partial,
        } => check_record(&schema, &record, partial),
        Commands::Eval {
            expr,
            record,
            role,
            user_id,
        } => {
            let record = match record {
                Some(path) => read_object(&path)?,
                None => Map::new(),
            };
            let expression = Expression::parse(&expr).context("Invalid expression")?;
            let mut ctx = EvalContext::new(&record, role);
            if let Some(id) = user_id.as_deref() {
                ctx = ctx.with_user_id(id);
            }
            let visible = expression.evaluate(&ctx);
            println!("{}", visible);
            Ok(true)
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { toml: _, json } => {
                if json {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                } else {
                    println!("{}", config.to_toml()?);
                }
                Ok(true)
            }
            ConfigAction::Init { output, force } => {
                if output.exists() && !force {
                    bail!("{} already exists (use --force to overwrite)", output.display());
                }
                EngineConfig::default()
                    .save(&output)
                    .with_context(|| format!("Failed to write {}", output.display()))?;
                println!("✅ Wrote default config to {}", output.display());
                Ok(true)
            }
        },
    }
}

fn validate(path: &Path, quiet: bool) -> anyhow::Result<bool> {
    println!("🔍 Validating tool schemas in {}", path.display());
    let results = lint_schemas(path)?;
    if results.is_empty() {
        println!("⚠️  No *.json files found");
        return Ok(true);
    }

    let mut all_valid = true;
    for (file, result) in &results {
        if result.is_clean() {
            println!("  ✅ {}", file.display());
        } else {
            all_valid = false;
            println!("  ❌ {}", file.display());
            for error in &result.errors {
                println!("     └─ [{}] {}: {}", error.code, error.path, error.message);
            }
        }
        if !quiet {
            for warning in &result.warnings {
                println!("     ⚠️  [{}] {}: {}", warning.code, warning.path, warning.message);
            }
        }
    }

    println!();
    let invalid = results.iter().filter(|(_, r)| !r.is_clean()).count();
    if all_valid {
        println!("✅ {} schema(s) valid", results.len());
    } else {
        println!("❌ {} of {} schema(s) invalid", invalid, results.len());
    }
    Ok(all_valid)
}

fn check_record(schema_path: &Path, record_path: &Path, partial: bool) -> anyhow::Result<bool> {
    let content = std::fs::read_to_string(schema_path)
        .with_context(|| format!("Failed to read {}", schema_path.display()))?;
    let schema: ToolSchemaInput = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a tool schema", schema_path.display()))?;
    let payload = read_object(record_path)?;

    let validator = RecordValidator::compile(&schema.fields)?;
    let mode = if partial {
        ValidationMode::Partial
    } else {
        ValidationMode::Full
    };

    match validator.validate(&payload, mode) {
        Ok(cleaned) => {
            println!("✅ Record is valid for {}", schema.tool_id);
            println!("{}", serde_json::to_string_pretty(&Value::Object(cleaned))?);
            Ok(true)
        }
        Err(err) => match err.validation_issues() {
            Some(issues) => {
                println!("❌ Record is invalid for {}", schema.tool_id);
                for issue in &issues.issues {
                    println!("   └─ {}", issue);
                }
                Ok(false)
            }
            None => Err(err.into()),
        },
    }
}

fn read_object(path: &Path) -> anyhow::Result<Map<String, Value>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    match serde_json::from_str(&content)? {
        Value::Object(map) => Ok(map),
        _ => bail!("{} must contain a JSON object", path.display()),
    }
}
