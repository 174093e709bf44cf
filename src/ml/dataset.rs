//! CSV tables, labeled datasets and the stratified train/test split.

use crate::error::{AppError, Result};
use crate::schema::FeatureSchema;
use ndarray::Array2;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info};

/// Cell spellings treated as missing
const MISSING_TOKENS: [&str; 10] = [
    "", "NA", "N/A", "NaN", "nan", "null", "NULL", "None", "#N/A", "<NA>",
];

/// Classified CSV cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell {
    Missing,
    Number(f64),
    Text,
}

impl Cell {
    /// Numeric value with missing and non-finite cells mapped to 0
    pub fn or_zero(self) -> Option<f64> {
        match self {
            Cell::Missing => Some(0.0),
            Cell::Number(v) if v.is_finite() => Some(v),
            Cell::Number(_) => Some(0.0),
            Cell::Text => None,
        }
    }
}

pub fn parse_cell(raw: &str) -> Cell {
    let trimmed = raw.trim();
    if MISSING_TOKENS.contains(&trimmed) {
        return Cell::Missing;
    }
    match trimmed.parse::<f64>() {
        Ok(v) => Cell::Number(v),
        Err(_) => Cell::Text,
    }
}

/// CSV contents with whitespace-trimmed column names
#[derive(Debug, Clone)]
pub struct CsvTable {
    headers: Vec<String>,
    records: Vec<csv::StringRecord>,
}

impl CsvTable {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);

        let headers = rdr
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect::<Vec<_>>();
        let records = rdr
            .records()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        debug!(columns = headers.len(), rows = records.len(), "Parsed CSV");
        Ok(Self { headers, records })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            AppError::Dataset(format!("cannot open dataset {}: {}", path.display(), e))
        })?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn records(&self) -> &[csv::StringRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when there are no data rows (header-only or blank input)
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Required columns absent from the header, in the order given
    pub fn missing_columns(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|col| self.column_index(col).is_none())
            .cloned()
            .collect()
    }

    /// Feature matrix for inference.
    ///
    /// Missing and non-finite cells become 0, as do absent columns when
    /// `fill_absent` is set. A non-numeric cell is an error.
    pub fn feature_matrix(&self, features: &[String], fill_absent: bool) -> Result<Array2<f64>> {
        let indices: Vec<Option<usize>> = features.iter().map(|f| self.column_index(f)).collect();
        if !fill_absent {
            let missing = self.missing_columns(features);
            if !missing.is_empty() {
                return Err(AppError::MissingColumns(missing));
            }
        }

        let mut matrix = Array2::zeros((self.records.len(), features.len()));
        for (i, record) in self.records.iter().enumerate() {
            for (j, idx) in indices.iter().enumerate() {
                let Some(idx) = idx else { continue };
                let raw = record.get(*idx).unwrap_or("");
                matrix[[i, j]] = parse_cell(raw).or_zero().ok_or_else(|| {
                    AppError::Processing(format!(
                        "row {} column '{}': non-numeric value '{}'",
                        i, features[j], raw
                    ))
                })?;
            }
        }
        Ok(matrix)
    }
}

/// Feature matrix and raw labels after dropping incomplete rows
#[derive(Debug, Clone)]
pub struct LabeledDataset {
    /// Feature matrix (n_samples × n_features) in schema order
    pub features: Array2<f64>,

    /// Target label per row
    pub labels: Vec<String>,

    /// Data rows in the source file
    pub rows_read: usize,

    /// Rows dropped for missing or non-finite values
    pub rows_dropped: usize,
}

impl LabeledDataset {
    pub fn load(path: &Path, schema: &FeatureSchema) -> Result<Self> {
        info!(path = %path.display(), "Loading dataset");
        let table = CsvTable::from_path(path)?;
        Self::from_table(&table, schema)
    }

    pub fn from_table(table: &CsvTable, schema: &FeatureSchema) -> Result<Self> {
        let missing = table.missing_columns(&schema.required_columns());
        if !missing.is_empty() {
            return Err(AppError::MissingColumns(missing));
        }

        let feature_idx: Vec<usize> = schema
            .features
            .iter()
            .filter_map(|f| table.column_index(f))
            .collect();
        let target_idx = table
            .column_index(&schema.target)
            .ok_or_else(|| AppError::MissingColumns(vec![schema.target.clone()]))?;

        let n_features = feature_idx.len();
        let mut values = Vec::with_capacity(table.len() * n_features);
        let mut labels = Vec::with_capacity(table.len());
        let mut rows_dropped = 0;

        'rows: for (row, record) in table.records().iter().enumerate() {
            let label = record.get(target_idx).unwrap_or("");
            if parse_cell(label) == Cell::Missing {
                rows_dropped += 1;
                continue;
            }

            let start = values.len();
            for (j, &idx) in feature_idx.iter().enumerate() {
                let raw = record.get(idx).unwrap_or("");
                match parse_cell(raw) {
                    Cell::Number(v) if v.is_finite() => values.push(v),
                    Cell::Missing | Cell::Number(_) => {
                        values.truncate(start);
                        rows_dropped += 1;
                        continue 'rows;
                    }
                    Cell::Text => {
                        return Err(AppError::Dataset(format!(
                            "row {} column '{}': non-numeric value '{}'",
                            row, schema.features[j], raw
                        )));
                    }
                }
            }
            labels.push(label.to_string());
        }

        if labels.is_empty() {
            return Err(AppError::Dataset(
                "no complete rows left after dropping missing values".to_string(),
            ));
        }

        let features = Array2::from_shape_vec((labels.len(), n_features), values)
            .map_err(|e| AppError::Internal(format!("Failed to build feature matrix: {}", e)))?;

        info!(
            rows_read = table.len(),
            rows_kept = labels.len(),
            rows_dropped,
            "Dataset prepared"
        );

        Ok(Self {
            features,
            labels,
            rows_read: table.len(),
            rows_dropped,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.labels.len()
    }

    pub fn class_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for label in &self.labels {
            *counts.entry(label.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Row indices of each partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffle-split that keeps class proportions in both partitions.
///
/// Every class contributes `round(count * test_size)` rows to the test side, clamped
/// so each class keeps at least one row on both sides.
pub fn stratified_split(labels: &[usize], test_size: f64, seed: u64) -> Result<SplitIndices> {
    if !(0.0..1.0).contains(&test_size) || test_size == 0.0 {
        return Err(AppError::Validation(format!(
            "test_size must be in (0, 1), got {}",
            test_size
        )));
    }

    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (row, &label) in labels.iter().enumerate() {
        by_class.entry(label).or_default().push(row);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();

    for (class, mut rows) in by_class {
        if rows.len() < 2 {
            return Err(AppError::Dataset(format!(
                "class {} has only {} member; a stratified split needs at least 2",
                class,
                rows.len()
            )));
        }
        rows.shuffle(&mut rng);
        let n_test = ((rows.len() as f64 * test_size).round() as usize).clamp(1, rows.len() - 1);
        test.extend_from_slice(&rows[..n_test]);
        train.extend_from_slice(&rows[n_test..]);
    }

    train.shuffle(&mut rng);
    test.shuffle(&mut rng);
    Ok(SplitIndices { train, test })
}
