use crate::config::{Config, InferenceConfig, MissingValuePolicy};
use crate::error::{AppError, Result};
use crate::ml::artifacts::{ArtifactSet, Provenance};
use crate::ml::classifier::Classifier;
use crate::ml::dataset::{parse_cell, Cell, CsvTable};
use crate::ml::models::Prediction;
use crate::schema::FeatureSchema;
use ndarray::{Array2, ArrayView1};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Column appended to every batch row
pub const PREDICTION_COLUMN: &str = "prediction";

/// Column holding the 0-based row position in batch results
pub const INDEX_COLUMN: &str = "index";

/// Batch results: every input row plus its prediction, and label counts
#[derive(Debug, Clone, Serialize)]
pub struct BatchPrediction {
    pub results: Vec<Map<String, Value>>,
    pub summary: BatchSummary,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BatchSummary {
    #[serde(flatten)]
    pub counts: BTreeMap<String, usize>,
    pub total_rows: usize,
}

/// Inference over a loaded artifact set.
///
/// Immutable after construction; share it behind an `Arc`.
pub struct PredictionService {
    schema: FeatureSchema,
    artifacts: ArtifactSet,
    policy: InferenceConfig,
}

impl PredictionService {
    pub fn new(schema: FeatureSchema, artifacts: ArtifactSet, policy: InferenceConfig) -> Result<Self> {
        artifacts.verify(&schema)?;
        Ok(Self {
            schema,
            artifacts,
            policy,
        })
    }

    /// Resolve the schema and load the artifact set named by `config`
    pub fn load(config: &Config) -> Result<Self> {
        let schema = config.schema.resolve()?;
        info!(
            schema = %schema.name,
            version = schema.version,
            dir = %config.artifacts.dir.display(),
            "Loading artifacts"
        );
        let artifacts = ArtifactSet::load(&config.artifacts, &schema)?;
        Self::new(schema, artifacts, config.inference.clone())
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn provenance(&self) -> &Provenance {
        &self.artifacts.provenance
    }

    pub fn classes(&self) -> &[String] {
        self.artifacts.encoder.classes()
    }

    pub fn policy(&self) -> &InferenceConfig {
        &self.policy
    }

    /// Predict one record given as feature name → value
    pub fn predict_record(&self, features: &Map<String, Value>) -> Result<Prediction> {
        let row = self.assemble_record(features)?;
        self.predict_matrix(&row)?
            .pop()
            .ok_or_else(|| AppError::Internal("model returned no prediction".to_string()))
    }

    /// Scale, predict and decode every row of `x` (schema order)
    pub fn predict_matrix(&self, x: &Array2<f64>) -> Result<Vec<Prediction>> {
        let scaled = self.artifacts.scaler.transform(x)?;
        let proba = self.artifacts.model.predict_proba(&scaled)?;
        proba.outer_iter().map(|row| self.decode(row)).collect()
    }

    /// Predict every row of an uploaded CSV
    pub fn predict_csv(&self, data: &[u8]) -> Result<BatchPrediction> {
        let table = CsvTable::from_reader(data)?;
        if table.is_empty() {
            return Err(AppError::EmptyFile);
        }
        if table.headers().iter().any(|h| h == INDEX_COLUMN) {
            return Err(AppError::InvalidUpload(format!(
                "column '{}' is reserved for the row position",
                INDEX_COLUMN
            )));
        }

        let missing = table.missing_columns(&self.schema.features);
        let fill_absent = match (missing.is_empty(), self.policy.batch_missing_columns) {
            (true, _) => false,
            (false, MissingValuePolicy::Reject) => return Err(AppError::MissingColumns(missing)),
            (false, MissingValuePolicy::ZeroFill) => {
                warn!(missing = ?missing, "Zero-filling columns absent from batch upload");
                true
            }
        };

        let x = table.feature_matrix(&self.schema.features, fill_absent)?;
        let predictions = self.predict_matrix(&x)?;

        let mut counts = BTreeMap::new();
        let mut results = Vec::with_capacity(predictions.len());
        for (i, (record, prediction)) in table.records().iter().zip(predictions).enumerate() {
            let mut row = Map::new();
            row.insert(INDEX_COLUMN.to_string(), Value::from(i));
            for (header, raw) in table.headers().iter().zip(record.iter()) {
                row.insert(header.clone(), raw_cell_value(raw));
            }
            *counts.entry(prediction.label.clone()).or_insert(0) += 1;
            row.insert(PREDICTION_COLUMN.to_string(), Value::String(prediction.label));
            results.push(row);
        }

        debug!(rows = results.len(), labels = counts.len(), "Batch predicted");
        Ok(BatchPrediction {
            summary: BatchSummary {
                counts,
                total_rows: results.len(),
            },
            results,
        })
    }

    /// Names of the `top_k` supplied features with the largest absolute value
    pub fn explain(&self, features: &Map<String, Value>, top_k: usize) -> Result<Vec<String>> {
        let mut ranked = features
            .iter()
            .map(|(name, value)| {
                explain_value(name, value)
                    .map(|v| (name.clone(), sanitize(v).abs()))
                    .map_err(|e| AppError::Internal(format!("explain: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;

        // Stable, so ties keep payload order
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(ranked.into_iter().take(top_k).map(|(name, _)| name).collect())
    }

    /// Build the 1 × n input row in schema order
    fn assemble_record(&self, features: &Map<String, Value>) -> Result<Array2<f64>> {
        let mut values = Vec::with_capacity(self.schema.n_features());
        let mut missing = Vec::new();

        for name in &self.schema.features {
            match features.get(name) {
                Some(value) => values.push(sanitize(coerce_value(name, value)?)),
                None => {
                    missing.push(name.clone());
                    values.push(0.0);
                }
            }
        }

        if !missing.is_empty() {
            match self.policy.single_missing_features {
                MissingValuePolicy::Reject => {
                    return Err(AppError::Validation(format!(
                        "missing features: {}",
                        missing.join(", ")
                    )));
                }
                MissingValuePolicy::ZeroFill => {
                    warn!(missing = ?missing, "Zero-filling features absent from request");
                }
            }
        }

        Array2::from_shape_vec((1, values.len()), values)
            .map_err(|e| AppError::Internal(format!("Failed to create feature array: {}", e)))
    }

    fn decode(&self, row: ArrayView1<f64>) -> Result<Prediction> {
        let (class_index, confidence) = row
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::MIN), |best, (idx, p)| if p > best.1 { (idx, p) } else { best });

        let label = self.artifacts.encoder.inverse_transform(class_index)?.to_string();
        let probabilities = self
            .classes()
            .iter()
            .cloned()
            .zip(row.iter().copied())
            .collect();

        Ok(Prediction {
            label,
            class_index,
            confidence,
            probabilities,
        })
    }
}

/// Numeric value of a request field; `null` counts as missing
fn coerce_value(name: &str, value: &Value) -> Result<f64> {
    match value {
        Value::Null => Ok(0.0),
        Value::Number(n) => n.as_f64().ok_or_else(|| {
            AppError::Validation(format!("feature '{}' is not representable as a float", name))
        }),
        Value::String(s) => match parse_cell(s) {
            Cell::Missing => Ok(0.0),
            Cell::Number(v) => Ok(v),
            Cell::Text => Err(AppError::Validation(format!(
                "feature '{}' has non-numeric value {:?}",
                name, s
            ))),
        },
        other => Err(AppError::Validation(format!(
            "feature '{}' must be a number, got {}",
            name, other
        ))),
    }
}

/// Strict reading for `/explain`: null and blank strings are not numbers here
fn explain_value(name: &str, value: &Value) -> Result<f64> {
    match value {
        Value::Number(_) => coerce_value(name, value),
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| {
            AppError::Validation(format!("feature '{}' has non-numeric value {:?}", name, s))
        }),
        other => Err(AppError::Validation(format!(
            "feature '{}' must be a number, got {}",
            name, other
        ))),
    }
}

fn sanitize(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Echo an input cell: integers and finite floats as numbers, missing as null
fn raw_cell_value(raw: &str) -> Value {
    match parse_cell(raw) {
        Cell::Missing => Value::Null,
        Cell::Number(v) if v.is_finite() => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .ok()
            .or_else(|| serde_json::Number::from_f64(v).map(Value::Number))
            .unwrap_or_else(|| Value::String(raw.to_string())),
        _ => Value::String(raw.to_string()),
    }
}
