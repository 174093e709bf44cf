use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prediction for a single record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    /// Decoded class label
    pub label: String,

    /// Encoded class index
    pub class_index: usize,

    /// Probability of the predicted class
    pub confidence: f64,

    /// Probability per class label, in encoder class order
    pub probabilities: Vec<(String, f64)>,
}

/// Forest hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForestParams {
    /// Number of trees
    pub n_trees: usize,

    /// Maximum tree depth
    pub max_depth: Option<u16>,

    /// Fit each tree on a bootstrap sample of the training rows
    pub bootstrap: bool,

    /// Base seed; tree `i` uses `seed + i`
    pub seed: u64,

    /// Fit trees on the rayon pool
    pub parallel: bool,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            bootstrap: true,
            seed: 42,
            parallel: true,
        }
    }
}

/// Model evaluation metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Accuracy
    pub accuracy: f64,

    /// Macro-averaged precision
    pub precision: f64,

    /// Macro-averaged recall
    pub recall: f64,

    /// Macro-averaged F1 score
    pub f1_score: f64,

    /// Number of evaluated samples
    pub n_samples: usize,

    /// Confusion matrix (rows: true class, columns: predicted class)
    pub confusion_matrix: Option<Array2<usize>>,

    /// Per-class metrics keyed by label
    pub per_class_metrics: BTreeMap<String, ClassMetrics>,
}

/// Per-class evaluation metrics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

impl ModelMetrics {
    pub fn new() -> Self {
        Self {
            accuracy: 0.0,
            precision: 0.0,
            recall: 0.0,
            f1_score: 0.0,
            n_samples: 0,
            confusion_matrix: None,
            per_class_metrics: BTreeMap::new(),
        }
    }

    /// Compare predictions against ground truth.
    ///
    /// `class_names[i]` names encoded class `i`. Indices outside the class range are
    /// counted as wrong but left out of the confusion matrix.
    pub fn evaluate(y_true: &[usize], y_pred: &[usize], class_names: &[String]) -> Self {
        let n_samples = y_true.len().min(y_pred.len());
        let n_classes = class_names.len();
        if n_samples == 0 || n_classes == 0 {
            return Self::new();
        }

        let mut confusion = Array2::<usize>::zeros((n_classes, n_classes));
        let mut correct = 0;
        for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
            if t == p {
                correct += 1;
            }
            if t < n_classes && p < n_classes {
                confusion[[t, p]] += 1;
            }
        }
        let accuracy = correct as f64 / n_samples as f64;

        let mut per_class = BTreeMap::new();
        for (class_idx, name) in class_names.iter().enumerate() {
            let tp = confusion[[class_idx, class_idx]];
            let fp = confusion.column(class_idx).sum() - tp;
            let fn_count = confusion.row(class_idx).sum() - tp;

            let precision = if tp + fp > 0 {
                tp as f64 / (tp + fp) as f64
            } else {
                0.0
            };

            let recall = if tp + fn_count > 0 {
                tp as f64 / (tp + fn_count) as f64
            } else {
                0.0
            };

            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };

            let support = y_true.iter().filter(|&&t| t == class_idx).count();

            per_class.insert(
                name.clone(),
                ClassMetrics {
                    precision,
                    recall,
                    f1_score: f1,
                    support,
                },
            );
        }

        // Calculate macro-averaged metrics
        let avg_precision =
            per_class.values().map(|m| m.precision).sum::<f64>() / n_classes as f64;
        let avg_recall = per_class.values().map(|m| m.recall).sum::<f64>() / n_classes as f64;
        let avg_f1 = per_class.values().map(|m| m.f1_score).sum::<f64>() / n_classes as f64;

        Self {
            accuracy,
            precision: avg_precision,
            recall: avg_recall,
            f1_score: avg_f1,
            n_samples,
            confusion_matrix: Some(confusion),
            per_class_metrics: per_class,
        }
    }
}

impl Default for ModelMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Model metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Model name
    pub name: String,

    /// Model type
    pub model_type: ModelType,

    /// Training timestamp
    pub trained_at: chrono::DateTime<chrono::Utc>,

    /// Number of training samples
    pub n_training_samples: usize,

    /// Number of features
    pub n_features: usize,

    /// Number of classes
    pub n_classes: usize,

    /// Training metrics
    pub training_metrics: ModelMetrics,

    /// Held-out metrics
    pub validation_metrics: Option<ModelMetrics>,

    /// Hyperparameters
    pub hyperparameters: BTreeMap<String, String>,
}

/// Model type enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Single CART tree
    DecisionTree,

    /// Bagged ensemble of CART trees
    RandomForest,
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelType::DecisionTree => write!(f, "Decision Tree"),
            ModelType::RandomForest => write!(f, "Random Forest"),
        }
    }
}
