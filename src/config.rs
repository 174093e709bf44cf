use crate::error::{AppError, Result};
use crate::schema::{FeatureSchema, SchemaPreset};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::Validate;

/// Environment variable prefix for overrides, e.g. `FLOW_CLF__SERVER__HTTP_PORT=8080`
pub const ENV_PREFIX: &str = "FLOW_CLF";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Artifact locations
    #[serde(default)]
    pub artifacts: ArtifactsConfig,

    /// Feature schema shared by trainer and service
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Trainer configuration
    #[serde(default)]
    pub training: TrainingConfig,

    /// Inference policies
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the embedded defaults, `CONFIG_PATH` and environment
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/local.toml".to_string());
        Self::load_from(Some(Path::new(&config_path)))
    }

    /// Load configuration with an explicit override file
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let config: Config = builder
            // Override with environment variables (prefix: FLOW_CLF)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check every section and that the schema resolves
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.training.validate()?;
        self.inference.validate()?;
        self.schema.resolve()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    #[validate(range(min = 1))]
    pub http_port: u16,

    /// Largest accepted request body (batch uploads)
    #[serde(default = "default_max_upload_bytes")]
    #[validate(range(min = 1024))]
    pub max_upload_bytes: usize,

    /// OpenAPI document served at `/static/swagger.yaml`
    #[serde(default = "default_api_doc_path")]
    pub api_doc_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            max_upload_bytes: default_max_upload_bytes(),
            api_doc_path: default_api_doc_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Directory holding the artifact triple
    #[serde(default = "default_artifacts_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_model_file")]
    pub model_file: String,

    #[serde(default = "default_scaler_file")]
    pub scaler_file: String,

    #[serde(default = "default_encoder_file")]
    pub encoder_file: String,
}

impl ArtifactsConfig {
    pub fn model_path(&self) -> PathBuf {
        self.dir.join(&self.model_file)
    }

    pub fn scaler_path(&self) -> PathBuf {
        self.dir.join(&self.scaler_file)
    }

    pub fn encoder_path(&self) -> PathBuf {
        self.dir.join(&self.encoder_file)
    }

    /// Same file names under another directory
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: default_artifacts_dir(),
            model_file: default_model_file(),
            scaler_file: default_scaler_file(),
            encoder_file: default_encoder_file(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Preset to use
    #[serde(default)]
    pub preset: SchemaPreset,

    /// Name for a custom schema
    pub name: Option<String>,

    /// Version for a custom schema
    pub version: Option<u32>,

    /// Ordered features for a custom schema
    pub features: Option<Vec<String>>,

    /// Target column for a custom schema
    pub target: Option<String>,
}

impl SchemaConfig {
    pub fn resolve(&self) -> Result<FeatureSchema> {
        match self.preset {
            SchemaPreset::Custom => {
                let features = self.features.clone().ok_or_else(|| {
                    AppError::Configuration("schema.features is required for a custom schema".to_string())
                })?;
                let target = self.target.clone().ok_or_else(|| {
                    AppError::Configuration("schema.target is required for a custom schema".to_string())
                })?;
                FeatureSchema::new(
                    self.name.clone().unwrap_or_else(|| "custom".to_string()),
                    self.version.unwrap_or(1),
                    features,
                    target,
                )
            }
            preset => {
                if self.features.is_some() || self.target.is_some() {
                    return Err(AppError::Configuration(format!(
                        "schema.features and schema.target only apply to preset 'custom', not '{}'",
                        preset
                    )));
                }
                Ok(match preset {
                    SchemaPreset::Cicflowmeter => FeatureSchema::cicflowmeter(),
                    _ => FeatureSchema::flow_summary(),
                })
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TrainingConfig {
    /// Labeled CSV dataset
    #[serde(default = "default_dataset_path")]
    pub dataset_path: PathBuf,

    /// Held-out fraction
    #[serde(default = "default_test_size")]
    #[validate(range(min = 0.01, max = 0.9))]
    pub test_size: f64,

    /// Seed for the split and the forest
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Number of trees in the forest
    #[serde(default = "default_n_trees")]
    #[validate(range(min = 1, max = 10000))]
    pub n_trees: usize,

    /// Maximum tree depth (unbounded when unset)
    #[serde(default)]
    pub max_depth: Option<u16>,

    /// Fit each tree on a bootstrap sample
    #[serde(default = "default_true")]
    pub bootstrap: bool,

    /// Build trees on the rayon pool
    #[serde(default = "default_true")]
    pub parallel: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            dataset_path: default_dataset_path(),
            test_size: default_test_size(),
            seed: default_seed(),
            n_trees: default_n_trees(),
            max_depth: None,
            bootstrap: true,
            parallel: true,
        }
    }
}

/// What to do when a schema feature is absent from a request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MissingValuePolicy {
    /// Substitute 0 and log a warning
    ZeroFill,
    /// Reject the request, naming the missing features
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InferenceConfig {
    /// Policy for features absent from a `/predict` payload
    #[serde(default = "default_single_policy")]
    pub single_missing_features: MissingValuePolicy,

    /// Policy for schema columns absent from a `/predict_batch` upload
    #[serde(default = "default_batch_policy")]
    pub batch_missing_columns: MissingValuePolicy,

    /// Number of features reported by `/explain`
    #[serde(default = "default_explain_top_k")]
    #[validate(range(min = 1))]
    pub explain_top_k: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            single_missing_features: default_single_policy(),
            batch_missing_columns: default_batch_policy(),
            explain_top_k: default_explain_top_k(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            prometheus_enabled: true,
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    5000
}

fn default_max_upload_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_api_doc_path() -> PathBuf {
    PathBuf::from("static/swagger.yaml")
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("./artifacts")
}

fn default_model_file() -> String {
    "model.bin".to_string()
}

fn default_scaler_file() -> String {
    "scaler.bin".to_string()
}

fn default_encoder_file() -> String {
    "label_encoder.bin".to_string()
}

fn default_dataset_path() -> PathBuf {
    PathBuf::from("./data/dataset.csv")
}

fn default_test_size() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

fn default_n_trees() -> usize {
    100
}

fn default_single_policy() -> MissingValuePolicy {
    MissingValuePolicy::ZeroFill
}

fn default_batch_policy() -> MissingValuePolicy {
    MissingValuePolicy::Reject
}

fn default_explain_top_k() -> usize {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
