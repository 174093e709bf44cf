//! Feature schema shared by the trainer and the inference service.
//!
//! The schema is the contract between a trained artifact triple and the requests it
//! serves: the scaler and the trees are order-sensitive, so both sides must agree on the
//! exact feature names and their order. Its fingerprint is written into every artifact.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Built-in schema presets
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SchemaPreset {
    /// 13-feature flow summary set
    #[default]
    FlowSummary,
    /// 20-feature CICFlowMeter-style set
    Cicflowmeter,
    /// Features and target supplied in configuration
    Custom,
}

const FLOW_SUMMARY_FEATURES: [&str; 13] = [
    "Packet_Length",
    "Duration",
    "Bytes_Sent",
    "Bytes_Received",
    "Flow_Packets/s",
    "Flow_Bytes/s",
    "Avg_Packet_Size",
    "Total_Fwd_Packets",
    "Total_Bwd_Packets",
    "Fwd_Header_Length",
    "Bwd_Header_Length",
    "Sub_Flow_Fwd_Bytes",
    "Sub_Flow_Bwd_Bytes",
];

const CICFLOWMETER_FEATURES: [&str; 20] = [
    "Flow Duration",
    "Total Fwd Packets",
    "Total Backward Packets",
    "Total Length of Fwd Packets",
    "Total Length of Bwd Packets",
    "Fwd Packet Length Max",
    "Fwd Packet Length Min",
    "Fwd Packet Length Mean",
    "Fwd Packet Length Std",
    "Bwd Packet Length Max",
    "Bwd Packet Length Min",
    "Bwd Packet Length Mean",
    "Bwd Packet Length Std",
    "Flow Bytes/s",
    "Flow Packets/s",
    "Flow IAT Mean",
    "Flow IAT Std",
    "Flow IAT Max",
    "Flow IAT Min",
    "Fwd IAT Total",
];

/// Ordered set of named numeric features plus the target column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureSchema {
    pub name: String,
    pub version: u32,
    pub features: Vec<String>,
    pub target: String,
}

impl FeatureSchema {
    pub fn new(
        name: impl Into<String>,
        version: u32,
        features: Vec<String>,
        target: impl Into<String>,
    ) -> Result<Self> {
        let schema = Self {
            name: name.into(),
            version,
            features,
            target: target.into(),
        };
        schema.validate()?;
        Ok(schema)
    }

    /// 13-feature flow summary schema, target `Attack_Type`
    pub fn flow_summary() -> Self {
        Self {
            name: SchemaPreset::FlowSummary.to_string(),
            version: 1,
            features: FLOW_SUMMARY_FEATURES.iter().map(|s| s.to_string()).collect(),
            target: "Attack_Type".to_string(),
        }
    }

    /// 20-feature CICFlowMeter-style schema, target `Label`
    pub fn cicflowmeter() -> Self {
        Self {
            name: SchemaPreset::Cicflowmeter.to_string(),
            version: 1,
            features: CICFLOWMETER_FEATURES.iter().map(|s| s.to_string()).collect(),
            target: "Label".to_string(),
        }
    }

    pub fn n_features(&self) -> usize {
        self.features.len()
    }

    /// Features followed by the target, in the order they are checked
    pub fn required_columns(&self) -> Vec<String> {
        let mut columns = self.features.clone();
        columns.push(self.target.clone());
        columns
    }

    /// Hex SHA-256 over name, version, target and ordered features
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.version.to_le_bytes());
        hasher.update(self.target.as_bytes());
        for feature in &self.features {
            hasher.update([0u8]);
            hasher.update(feature.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    fn validate(&self) -> Result<()> {
        if self.features.is_empty() {
            return Err(AppError::Configuration(format!(
                "schema '{}' has no features",
                self.name
            )));
        }
        if self.target.trim().is_empty() {
            return Err(AppError::Configuration(format!(
                "schema '{}' has an empty target column",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for feature in &self.features {
            if feature.trim().is_empty() {
                return Err(AppError::Configuration(format!(
                    "schema '{}' contains an empty feature name",
                    self.name
                )));
            }
            if !seen.insert(feature.as_str()) {
                return Err(AppError::Configuration(format!(
                    "schema '{}' lists feature '{}' twice",
                    self.name, feature
                )));
            }
        }
        if seen.contains(self.target.as_str()) {
            return Err(AppError::Configuration(format!(
                "schema '{}' uses target '{}' as a feature",
                self.name, self.target
            )));
        }
        Ok(())
    }
}
