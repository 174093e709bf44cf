use crate::error::{AppError, Result};
use crate::ml::models::{ForestParams, ModelMetadata, ModelMetrics, ModelType};
use ndarray::{Array2, Axis};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_classifier::{
    DecisionTreeClassifier, DecisionTreeClassifierParameters, SplitCriterion,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

type Tree = DecisionTreeClassifier<f64, i32, DenseMatrix<f64>, Vec<i32>>;

/// Trait for classifiers
pub trait Classifier: Send + Sync {
    /// Fit on a feature matrix and encoded labels
    fn fit(&mut self, features: &Array2<f64>, labels: &[usize]) -> Result<()>;

    /// Predict class indices
    fn predict(&self, features: &Array2<f64>) -> Result<Vec<usize>>;

    /// Predict class probabilities (n_samples × n_classes)
    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array2<f64>>;

    /// Get model metadata
    fn metadata(&self) -> &ModelMetadata;

    /// Get model type
    fn model_type(&self) -> ModelType;

    /// Check if model is trained
    fn is_trained(&self) -> bool;
}

/// Bagged ensemble of CART trees.
///
/// Every split considers all features: there is no per-split feature subsampling
/// (sklearn's `max_features`), only bootstrap resampling of rows per tree.
/// Class probabilities are the fraction of trees voting for each class.
/// With one tree and no bootstrap this is a plain decision tree.
#[derive(Serialize, Deserialize)]
pub struct RandomForestClassifier {
    /// Model metadata
    metadata: ModelMetadata,

    /// Hyperparameters
    params: ForestParams,

    /// Fitted trees
    trees: Vec<Tree>,

    /// Number of classes
    n_classes: usize,

    /// Number of features seen while fitting
    n_features: usize,

    /// Is trained
    trained: bool,
}

impl RandomForestClassifier {
    pub fn new(n_classes: usize, params: ForestParams) -> Self {
        let model_type = if params.n_trees == 1 && !params.bootstrap {
            ModelType::DecisionTree
        } else {
            ModelType::RandomForest
        };

        let mut hyperparameters = BTreeMap::new();
        hyperparameters.insert("n_trees".to_string(), params.n_trees.to_string());
        hyperparameters.insert(
            "max_depth".to_string(),
            params
                .max_depth
                .map(|d| d.to_string())
                .unwrap_or_else(|| "none".to_string()),
        );
        hyperparameters.insert("bootstrap".to_string(), params.bootstrap.to_string());
        hyperparameters.insert("seed".to_string(), params.seed.to_string());
        hyperparameters.insert("criterion".to_string(), "gini".to_string());

        Self {
            metadata: ModelMetadata {
                name: model_type.to_string(),
                model_type,
                trained_at: chrono::Utc::now(),
                n_training_samples: 0,
                n_features: 0,
                n_classes,
                training_metrics: ModelMetrics::new(),
                validation_metrics: None,
                hyperparameters,
            },
            params,
            trees: Vec::new(),
            n_classes,
            n_features: 0,
            trained: false,
        }
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    /// Attach evaluation results computed by the trainer
    pub fn record_evaluation(&mut self, training: ModelMetrics, validation: Option<ModelMetrics>) {
        self.metadata.training_metrics = training;
        self.metadata.validation_metrics = validation;
    }

    fn ndarray_to_densematrix(arr: &Array2<f64>) -> DenseMatrix<f64> {
        let shape = arr.shape();
        let data: Vec<f64> = arr.iter().copied().collect();
        DenseMatrix::new(shape[0], shape[1], data, false)
    }

    fn tree_parameters(&self) -> DecisionTreeClassifierParameters {
        let params = DecisionTreeClassifierParameters::default().with_criterion(SplitCriterion::Gini);
        match self.params.max_depth {
            Some(depth) => params.with_max_depth(depth),
            None => params,
        }
    }

    fn fit_tree(&self, index: usize, features: &Array2<f64>, labels: &[i32]) -> Result<Tree> {
        let n = features.nrows();
        let tree_params = self.tree_parameters();

        let fitted = if self.params.bootstrap {
            let mut rng = StdRng::seed_from_u64(self.params.seed.wrapping_add(index as u64));
            let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let x = Self::ndarray_to_densematrix(&features.select(Axis(0), &rows));
            let y: Vec<i32> = rows.iter().map(|&r| labels[r]).collect();
            Tree::fit(&x, &y, tree_params)
        } else {
            let x = Self::ndarray_to_densematrix(features);
            Tree::fit(&x, &labels.to_vec(), tree_params)
        };

        fitted.map_err(|e| AppError::Model(format!("Failed to train tree {}: {}", index, e)))
    }

    fn check_input(&self, features: &Array2<f64>) -> Result<()> {
        if !self.trained {
            return Err(AppError::Model("Model not trained".to_string()));
        }
        if features.ncols() != self.n_features {
            return Err(AppError::Model(format!(
                "model expects {} features, got {}",
                self.n_features,
                features.ncols()
            )));
        }
        Ok(())
    }
}

impl Classifier for RandomForestClassifier {
    fn fit(&mut self, features: &Array2<f64>, labels: &[usize]) -> Result<()> {
        if features.nrows() == 0 {
            return Err(AppError::Model("No training samples provided".to_string()));
        }
        if features.nrows() != labels.len() {
            return Err(AppError::Model(format!(
                "{} feature rows but {} labels",
                features.nrows(),
                labels.len()
            )));
        }
        if let Some(&bad) = labels.iter().find(|&&l| l >= self.n_classes) {
            return Err(AppError::Model(format!(
                "label {} out of range for {} classes",
                bad, self.n_classes
            )));
        }

        let y: Vec<i32> = labels.iter().map(|&l| l as i32).collect();
        let n_trees = self.params.n_trees.max(1);

        info!(
            n_trees,
            n_samples = features.nrows(),
            n_features = features.ncols(),
            parallel = self.params.parallel,
            "Fitting {}",
            self.metadata.model_type
        );

        let trees: Vec<Tree> = if self.params.parallel {
            (0..n_trees)
                .into_par_iter()
                .map(|i| self.fit_tree(i, features, &y))
                .collect::<Result<_>>()?
        } else {
            (0..n_trees)
                .map(|i| self.fit_tree(i, features, &y))
                .collect::<Result<_>>()?
        };

        self.trees = trees;
        self.n_features = features.ncols();
        self.trained = true;
        self.metadata.n_training_samples = features.nrows();
        self.metadata.n_features = features.ncols();
        self.metadata.trained_at = chrono::Utc::now();

        debug!(trees = self.trees.len(), "Forest fitted");
        Ok(())
    }

    fn predict(&self, features: &Array2<f64>) -> Result<Vec<usize>> {
        let proba = self.predict_proba(features)?;
        Ok(proba
            .outer_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f64::MIN), |best, (idx, &p)| if p > best.1 { (idx, p) } else { best })
                    .0
            })
            .collect())
    }

    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_input(features)?;

        let n_samples = features.nrows();
        let mut proba = Array2::zeros((n_samples, self.n_classes));
        if n_samples == 0 {
            return Ok(proba);
        }

        let x = Self::ndarray_to_densematrix(features);
        let votes: Vec<Vec<i32>> = self
            .trees
            .par_iter()
            .map(|tree| {
                tree.predict(&x)
                    .map_err(|e| AppError::Model(format!("Prediction failed: {}", e)))
            })
            .collect::<Result<_>>()?;

        for tree_votes in &votes {
            for (i, &class) in tree_votes.iter().enumerate() {
                let class = class as usize;
                if class < self.n_classes {
                    proba[[i, class]] += 1.0;
                }
            }
        }
        proba /= votes.len() as f64;

        Ok(proba)
    }

    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    fn model_type(&self) -> ModelType {
        self.metadata.model_type
    }

    fn is_trained(&self) -> bool {
        self.trained
    }
}
