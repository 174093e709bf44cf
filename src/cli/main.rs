use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use flow_classifier::{config::Config, ml::Trainer};
use reqwest::{multipart, Client, Response};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "flowctl")]
#[command(about = "Flow Classifier trainer and client", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:5000")]
    endpoint: String,

    /// Configuration file layered over the built-in defaults
    #[arg(short, long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model and write the artifact triple
    Train {
        /// Labeled CSV dataset
        #[arg(short, long)]
        dataset: Option<PathBuf>,

        /// Directory receiving model, scaler and label encoder
        #[arg(short, long)]
        artifacts_dir: Option<PathBuf>,

        /// Number of trees in the forest
        #[arg(short, long)]
        n_trees: Option<usize>,

        /// Seed for the split and the bootstrap samples
        #[arg(short, long)]
        seed: Option<u64>,
    },

    /// Predict a single record
    Predict {
        /// JSON object mapping feature name to value
        #[arg(short, long)]
        features: String,
    },

    /// Upload a CSV for batch prediction
    Batch {
        #[arg(value_name = "CSV_FILE")]
        file: PathBuf,
    },

    /// Rank a record's features by magnitude
    Explain {
        /// JSON object mapping feature name to value
        #[arg(short, long)]
        features: String,
    },

    /// Check server health
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            dataset,
            artifacts_dir,
            n_trees,
            seed,
        } => {
            let mut config = match cli.config.as_deref() {
                Some(path) => Config::load_from(Some(path)),
                None => Config::load(),
            }
            .context("failed to load configuration")?;
            init_tracing(&config.observability.log_level);

            if let Some(dataset) = dataset {
                config.training.dataset_path = dataset;
            }
            if let Some(dir) = artifacts_dir {
                config.artifacts.dir = dir;
            }
            if let Some(n_trees) = n_trees {
                config.training.n_trees = n_trees;
            }
            if let Some(seed) = seed {
                config.training.seed = seed;
            }
            config.validate().context("invalid training configuration")?;

            let schema = config.schema.resolve()?;
            let trainer = Trainer::new(schema, config.training, config.artifacts);
            let report = tokio::task::spawn_blocking(move || trainer.run())
                .await
                .context("training task panicked")?
                .context("training failed")?;

            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Predict { features } => {
            let features = parse_features(&features)?;
            let response = Client::new()
                .post(format!("{}/predict", cli.endpoint))
                .json(&json!({ "features": features }))
                .send()
                .await?;
            print_response(response).await?;
        }

        Commands::Batch { file } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("cannot read {}", file.display()))?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let form = multipart::Form::new().part(
                "file",
                multipart::Part::bytes(data)
                    .file_name(file_name)
                    .mime_str("text/csv")?,
            );

            let response = Client::new()
                .post(format!("{}/predict_batch", cli.endpoint))
                .multipart(form)
                .send()
                .await?;
            print_response(response).await?;
        }

        Commands::Explain { features } => {
            let features = parse_features(&features)?;
            let response = Client::new()
                .post(format!("{}/explain", cli.endpoint))
                .json(&json!({ "features": features }))
                .send()
                .await?;
            print_response(response).await?;
        }

        Commands::Health => {
            let response = Client::new()
                .get(format!("{}/health", cli.endpoint))
                .send()
                .await?;
            print_response(response).await?;
        }
    }

    Ok(())
}

fn parse_features(raw: &str) -> anyhow::Result<Value> {
    let value: Value = serde_json::from_str(raw).context("--features must be valid JSON")?;
    if !value.is_object() {
        bail!("--features must be a JSON object");
    }
    Ok(value)
}

/// Pretty-print the JSON body; non-2xx responses still print, then fail
async fn print_response(response: Response) -> anyhow::Result<()> {
    let status = response.status();
    let body: Value = response.json().await.context("server returned non-JSON body")?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() {
        bail!("server responded with {}", status);
    }
    Ok(())
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("flow_classifier={}", level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
