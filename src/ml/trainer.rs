//! Offline training run: CSV in, artifact triple out.

use crate::config::{ArtifactsConfig, TrainingConfig};
use crate::error::{AppError, Result};
use crate::ml::artifacts::{ArtifactSet, Provenance};
use crate::ml::classifier::{Classifier, RandomForestClassifier};
use crate::ml::dataset::{stratified_split, LabeledDataset};
use crate::ml::models::{ForestParams, ModelMetrics};
use crate::ml::preprocessing::{LabelEncoder, StandardScaler};
use crate::schema::FeatureSchema;
use ndarray::Axis;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

/// Summary printed after a successful run
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub run_id: Uuid,
    pub schema: String,
    pub schema_version: u32,
    pub dataset: PathBuf,
    pub artifacts_dir: PathBuf,
    pub rows_read: usize,
    pub rows_dropped: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub class_counts: BTreeMap<String, usize>,
    pub training_metrics: ModelMetrics,
    pub validation_metrics: ModelMetrics,
}

pub struct Trainer {
    schema: FeatureSchema,
    training: TrainingConfig,
    artifacts: ArtifactsConfig,
}

impl Trainer {
    pub fn new(schema: FeatureSchema, training: TrainingConfig, artifacts: ArtifactsConfig) -> Self {
        Self {
            schema,
            training,
            artifacts,
        }
    }

    /// Load, fit, evaluate and persist.
    ///
    /// Nothing is written unless every step before serialization succeeds.
    pub fn run(&self) -> Result<TrainingReport> {
        info!(
            schema = %self.schema.name,
            dataset = %self.training.dataset_path.display(),
            "--- Starting training run ---"
        );

        let dataset = LabeledDataset::load(&self.training.dataset_path, &self.schema)?;
        let class_counts = dataset.class_counts();
        if class_counts.len() < 2 {
            return Err(AppError::Dataset(format!(
                "need at least 2 classes to train, found {}",
                class_counts.len()
            )));
        }

        let (encoder, encoded) = LabelEncoder::fit_transform(&dataset.labels)?;
        info!(classes = ?encoder.classes(), "Labels encoded");

        let split = stratified_split(&encoded, self.training.test_size, self.training.seed)?;
        let x_train = dataset.features.select(Axis(0), &split.train);
        let x_test = dataset.features.select(Axis(0), &split.test);
        let y_train: Vec<usize> = split.train.iter().map(|&i| encoded[i]).collect();
        let y_test: Vec<usize> = split.test.iter().map(|&i| encoded[i]).collect();
        info!(train = y_train.len(), test = y_test.len(), "Stratified split done");

        let scaler = StandardScaler::fit(&x_train)?;
        let x_train = scaler.transform(&x_train)?;
        let x_test = scaler.transform(&x_test)?;

        let mut model = RandomForestClassifier::new(encoder.n_classes(), self.forest_params());
        model.fit(&x_train, &y_train)?;

        let training_metrics =
            ModelMetrics::evaluate(&y_train, &model.predict(&x_train)?, encoder.classes());
        let validation_metrics =
            ModelMetrics::evaluate(&y_test, &model.predict(&x_test)?, encoder.classes());
        info!(
            train_accuracy = training_metrics.accuracy,
            test_accuracy = validation_metrics.accuracy,
            test_f1 = validation_metrics.f1_score,
            "Model evaluated"
        );
        model.record_evaluation(training_metrics.clone(), Some(validation_metrics.clone()));

        let set = ArtifactSet {
            provenance: Provenance::new(&self.schema),
            model,
            scaler,
            encoder,
        };
        set.save(&self.artifacts)?;

        info!(run_id = %set.provenance.run_id, "--- Training run finished ---");

        Ok(TrainingReport {
            run_id: set.provenance.run_id,
            schema: self.schema.name.clone(),
            schema_version: self.schema.version,
            dataset: self.training.dataset_path.clone(),
            artifacts_dir: self.artifacts.dir.clone(),
            rows_read: dataset.rows_read,
            rows_dropped: dataset.rows_dropped,
            train_rows: y_train.len(),
            test_rows: y_test.len(),
            class_counts,
            training_metrics,
            validation_metrics,
        })
    }

    fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_trees: self.training.n_trees,
            max_depth: self.training.max_depth,
            bootstrap: self.training.bootstrap,
            seed: self.training.seed,
            parallel: self.training.parallel,
        }
    }
}
