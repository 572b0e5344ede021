use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{Datelike, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::Level;
use uuid::Uuid;

use evaluation_weights::config::Config;
use evaluation_weights::db::{self, PgStore};
use evaluation_weights::models::{EvaluationTarget, MutationBatch};
use evaluation_weights::{import, report, telemetry};
use evaluation_weights::{BulkMutationCoordinator, EngineError, PeriodResolver};

#[derive(Parser)]
#[command(name = "evaluation-weights")]
#[command(about = "Evaluation weight configuration for course partials", long_about = None)]
struct Cli {
    /// Print results as JSON instead of markdown
    #[arg(long, global = true)]
    json: bool,
    /// Emit log lines as JSON
    #[arg(long, global = true)]
    log_json: bool,
    /// Override EVALUATION_REQUEST_TIMEOUT_SECS
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct KeyArgs {
    #[arg(long)]
    course: String,
    #[arg(long)]
    teacher: String,
    #[arg(long)]
    partial: i32,
    /// Period token YYYYC; defaults to the current period
    #[arg(long)]
    period: Option<String>,
}

impl KeyArgs {
    fn into_target(self) -> EvaluationTarget {
        EvaluationTarget {
            course_code: self.course,
            teacher_code: self.teacher,
            partial: self.partial,
            requested_period: self.period,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Show how a period token resolves
    Period {
        #[arg(long)]
        requested: Option<String>,
    },
    /// Show components and validation flags for a partial
    Status {
        #[command(flatten)]
        key: KeyArgs,
    },
    /// Add one component
    Add {
        #[command(flatten)]
        key: KeyArgs,
        #[arg(long)]
        name: String,
        #[arg(long)]
        weight: f64,
    },
    /// Change one component's name and weight
    Modify {
        #[command(flatten)]
        key: KeyArgs,
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long)]
        weight: f64,
    },
    /// Delete one component
    Remove {
        #[command(flatten)]
        key: KeyArgs,
        #[arg(long)]
        id: Uuid,
    },
    /// Dry-run a batch of operations from a CSV file
    Check {
        #[command(flatten)]
        key: KeyArgs,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Apply a batch of operations from a CSV file
    Apply {
        #[command(flatten)]
        key: KeyArgs,
        #[arg(long)]
        csv: PathBuf,
    },
}

fn print_result<T: Serialize>(json: bool, value: &T, render: fn(&T) -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", render(value));
    }
    Ok(())
}

fn request_failed(err: EngineError) -> anyhow::Error {
    let status = err.status_code();
    anyhow::Error::new(err).context(format!("request failed with status {status}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.log_json, Level::INFO);

    let mut config = Config::from_env()?;
    if let Some(secs) = cli.timeout_secs {
        config.request_timeout = Duration::from_secs(secs.max(1));
    }

    let pool = db::connect(&config).await?;
    let store = Arc::new(PgStore::new(pool.clone(), config.request_timeout));
    let resolver = PeriodResolver::new(
        Utc::now().year(),
        config.fallback_period.as_ref().map(|period| period.as_str()),
    );
    let coordinator = BulkMutationCoordinator::new(store.clone()).with_resolver(resolver.clone());

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Period { requested } => {
            let period = resolver.resolve(store.as_ref(), requested.as_deref()).await;
            println!("{period}");
        }
        Commands::Status { key } => {
            let weights = coordinator
                .validation_query(key.into_target())
                .await
                .map_err(request_failed)?;
            print_result(cli.json, &weights, report::render_weight_report)?;
        }
        Commands::Add { key, name, weight } => {
            let outcome = coordinator
                .create_single(key.into_target(), &name, weight)
                .await
                .map_err(request_failed)?;
            print_result(cli.json, &outcome, report::render_single)?;
        }
        Commands::Modify {
            key,
            id,
            name,
            weight,
        } => {
            let outcome = coordinator
                .modify_single(key.into_target(), id, &name, weight)
                .await
                .map_err(request_failed)?;
            print_result(cli.json, &outcome, report::render_single)?;
        }
        Commands::Remove { key, id } => {
            let outcome = coordinator
                .delete_single(key.into_target(), id)
                .await
                .map_err(request_failed)?;
            print_result(cli.json, &outcome, report::render_single)?;
        }
        Commands::Check { key, csv } => {
            let operations = import::load_operations(&csv)
                .with_context(|| format!("failed to read operations from {}", csv.display()))?;
            let batch = MutationBatch::new(key.into_target(), operations);
            let preview = coordinator
                .validate_batch(&batch)
                .await
                .map_err(request_failed)?;
            print_result(cli.json, &preview, report::render_preview)?;
        }
        Commands::Apply { key, csv } => {
            let operations = import::load_operations(&csv)
                .with_context(|| format!("failed to read operations from {}", csv.display()))?;
            let batch = MutationBatch::new(key.into_target(), operations);
            let outcome = coordinator
                .apply_batch(batch)
                .await
                .map_err(request_failed)?;
            print_result(cli.json, &outcome, report::render_outcome)?;
            if !outcome.is_success() {
                anyhow::bail!(
                    "batch rolled back with status {}: no operation succeeded",
                    outcome.status_code()
                );
            }
        }
    }

    Ok(())
}
