use crate::error::{AppError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Per-feature standardization: `(x - mean) / scale`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StandardScaler {
    /// Feature means
    mean: Array1<f64>,

    /// Population standard deviations; zero-variance features keep 1.0
    scale: Array1<f64>,

    /// Rows seen while fitting
    n_samples_seen: usize,
}

impl StandardScaler {
    /// Fit on the rows of `x`
    pub fn fit(x: &Array2<f64>) -> Result<Self> {
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(AppError::Model(format!(
                "cannot fit scaler on a {}x{} matrix",
                x.nrows(),
                x.ncols()
            )));
        }

        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| AppError::Model("cannot compute feature means".to_string()))?;
        let scale = x
            .var_axis(Axis(0), 0.0)
            .mapv(|v| if v > 0.0 && v.is_finite() { v.sqrt() } else { 1.0 });

        Ok(Self {
            mean,
            scale,
            n_samples_seen: x.nrows(),
        })
    }

    /// Standardize `x` with the fitted parameters
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.n_features() {
            return Err(AppError::Model(format!(
                "scaler expects {} features, got {}",
                self.n_features(),
                x.ncols()
            )));
        }
        Ok((x - &self.mean) / &self.scale)
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn n_samples_seen(&self) -> usize {
        self.n_samples_seen
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }
}

/// Bidirectional mapping between class labels and contiguous indices.
///
/// Classes are kept sorted; a label's index is its position in that order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> Result<Self> {
        let classes: BTreeSet<String> = labels.iter().map(|l| l.as_ref().to_string()).collect();
        if classes.is_empty() {
            return Err(AppError::Model("cannot fit label encoder on no labels".to_string()));
        }
        Ok(Self {
            classes: classes.into_iter().collect(),
        })
    }

    /// Fit and encode in one pass
    pub fn fit_transform<S: AsRef<str>>(labels: &[S]) -> Result<(Self, Vec<usize>)> {
        let encoder = Self::fit(labels)?;
        let encoded = labels
            .iter()
            .map(|l| encoder.transform(l.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok((encoder, encoded))
    }

    pub fn transform(&self, label: &str) -> Result<usize> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(label))
            .map_err(|_| AppError::Validation(format!("unknown label '{}'", label)))
    }

    pub fn inverse_transform(&self, index: usize) -> Result<&str> {
        self.classes
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| {
                AppError::Model(format!(
                    "class index {} out of range for {} classes",
                    index,
                    self.classes.len()
                ))
            })
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }
}
