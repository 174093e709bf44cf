/// Machine learning module for network flow classification
///
/// This module provides:
/// - CSV loading, cleaning and stratified train/test splitting
/// - Feature standardization and label encoding
/// - A bagged decision-tree ensemble (random forest)
/// - Versioned, provenance-stamped artifact persistence
/// - The offline trainer and the online prediction service

pub mod artifacts;
pub mod classifier;
pub mod dataset;
pub mod models;
pub mod preprocessing;
pub mod service;
pub mod trainer;

pub use artifacts::{ArtifactKind, ArtifactSet, Provenance, ARTIFACT_FORMAT_VERSION};
pub use classifier::{Classifier, RandomForestClassifier};
pub use dataset::{stratified_split, CsvTable, LabeledDataset, SplitIndices};
pub use models::{ClassMetrics, ForestParams, ModelMetadata, ModelMetrics, ModelType, Prediction};
pub use preprocessing::{LabelEncoder, StandardScaler};
pub use service::{BatchPrediction, BatchSummary, PredictionService};
pub use trainer::{Trainer, TrainingReport};
