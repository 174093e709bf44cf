//! Persistence of the model / scaler / label-encoder triple.
//!
//! Each file is a bincode-encoded [`Artifact`]: a header carrying the training run's
//! provenance, followed by the fitted payload. A set is only accepted when all three
//! headers name the same run and the configured schema.

use crate::config::ArtifactsConfig;
use crate::error::{AppError, Result};
use crate::ml::classifier::{Classifier, RandomForestClassifier};
use crate::ml::preprocessing::{LabelEncoder, StandardScaler};
use crate::schema::FeatureSchema;
use bincode::Options;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// Bumped whenever the on-disk layout changes
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ArtifactKind {
    Model,
    Scaler,
    LabelEncoder,
}

/// Where a set of artifacts came from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provenance {
    pub run_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub schema_name: String,
    pub schema_version: u32,
    pub schema_fingerprint: String,
    pub crate_version: String,
}

impl Provenance {
    pub fn new(schema: &FeatureSchema) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            trained_at: Utc::now(),
            schema_name: schema.name.clone(),
            schema_version: schema.version,
            schema_fingerprint: schema.fingerprint(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactHeader {
    pub kind: ArtifactKind,
    pub format_version: u32,
    pub provenance: Provenance,
}

#[derive(Serialize, Deserialize)]
pub struct Artifact<T> {
    pub header: ArtifactHeader,
    pub payload: T,
}

/// Write via a temporary sibling file so readers never see a partial artifact
pub fn write_artifact<T: Serialize>(path: &Path, artifact: &Artifact<T>) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = path.with_extension("tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        bincode::serialize_into(&mut writer, artifact).map_err(|e| {
            AppError::Artifact(format!(
                "failed to serialize {} artifact to {}: {}",
                artifact.header.kind,
                path.display(),
                e
            ))
        })?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;

    debug!(kind = %artifact.header.kind, path = %path.display(), "Artifact written");
    Ok(())
}

pub fn read_artifact<T: DeserializeOwned>(path: &Path, expected: ArtifactKind) -> Result<Artifact<T>> {
    if !path.exists() {
        return Err(AppError::Artifact(format!(
            "{} artifact not found at {}",
            expected,
            path.display()
        )));
    }

    let corrupt = |e: bincode::Error| {
        AppError::Artifact(format!(
            "{} artifact at {} is corrupt or unreadable: {}",
            expected,
            path.display(),
            e
        ))
    };

    // Length prefixes may not claim more than the file holds.
    let limit = fs::metadata(path)?.len();

    // Header first, so a misplaced file is reported as such rather than as corrupt.
    let mut reader = BufReader::new(File::open(path)?);
    let header: ArtifactHeader = decode(&mut reader, limit).map_err(corrupt)?;

    if header.format_version != ARTIFACT_FORMAT_VERSION {
        return Err(AppError::Artifact(format!(
            "{} has format version {}, expected {}",
            path.display(),
            header.format_version,
            ARTIFACT_FORMAT_VERSION
        )));
    }
    if header.kind != expected {
        return Err(AppError::Artifact(format!(
            "{} holds a {} artifact, expected {}",
            path.display(),
            header.kind,
            expected
        )));
    }

    let payload: T = decode(&mut reader, limit).map_err(corrupt)?;
    Ok(Artifact { header, payload })
}

/// Same encoding as `bincode::serialize_into`, bounded to `limit` bytes
fn decode<T: DeserializeOwned, R: Read>(reader: R, limit: u64) -> bincode::Result<T> {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(limit)
        .deserialize_from(reader)
}

/// Matched, immutable triple shared by every request
pub struct ArtifactSet {
    pub provenance: Provenance,
    pub model: RandomForestClassifier,
    pub scaler: StandardScaler,
    pub encoder: LabelEncoder,
}

impl ArtifactSet {
    fn header(&self, kind: ArtifactKind) -> ArtifactHeader {
        ArtifactHeader {
            kind,
            format_version: ARTIFACT_FORMAT_VERSION,
            provenance: self.provenance.clone(),
        }
    }

    /// Write all three artifacts
    pub fn save(&self, paths: &ArtifactsConfig) -> Result<()> {
        write_artifact(
            &paths.scaler_path(),
            &Artifact {
                header: self.header(ArtifactKind::Scaler),
                payload: &self.scaler,
            },
        )?;
        write_artifact(
            &paths.encoder_path(),
            &Artifact {
                header: self.header(ArtifactKind::LabelEncoder),
                payload: &self.encoder,
            },
        )?;
        write_artifact(
            &paths.model_path(),
            &Artifact {
                header: self.header(ArtifactKind::Model),
                payload: &self.model,
            },
        )?;

        info!(
            run_id = %self.provenance.run_id,
            dir = %paths.dir.display(),
            "Artifacts saved"
        );
        Ok(())
    }

    /// Load all three artifacts and check they form a set for `schema`
    pub fn load(paths: &ArtifactsConfig, schema: &FeatureSchema) -> Result<Self> {
        let model: Artifact<RandomForestClassifier> =
            read_artifact(&paths.model_path(), ArtifactKind::Model)?;
        let scaler: Artifact<StandardScaler> =
            read_artifact(&paths.scaler_path(), ArtifactKind::Scaler)?;
        let encoder: Artifact<LabelEncoder> =
            read_artifact(&paths.encoder_path(), ArtifactKind::LabelEncoder)?;

        let run_ids = [
            model.header.provenance.run_id,
            scaler.header.provenance.run_id,
            encoder.header.provenance.run_id,
        ];
        if run_ids.iter().any(|id| *id != run_ids[0]) {
            return Err(AppError::Artifact(format!(
                "artifacts come from different training runs (model {}, scaler {}, label encoder {})",
                run_ids[0], run_ids[1], run_ids[2]
            )));
        }

        let set = Self {
            provenance: model.header.provenance,
            model: model.payload,
            scaler: scaler.payload,
            encoder: encoder.payload,
        };
        set.verify(schema)?;

        info!(
            run_id = %set.provenance.run_id,
            schema = %set.provenance.schema_name,
            classes = set.encoder.n_classes(),
            "Artifacts loaded"
        );
        Ok(set)
    }

    /// Check schema fingerprint and shapes against `schema`
    pub fn verify(&self, schema: &FeatureSchema) -> Result<()> {
        if self.provenance.schema_fingerprint != schema.fingerprint() {
            return Err(AppError::Artifact(format!(
                "artifacts were trained for schema '{}' v{} but the configured schema is '{}' v{}",
                self.provenance.schema_name, self.provenance.schema_version, schema.name, schema.version
            )));
        }
        if !self.model.is_trained() {
            return Err(AppError::Artifact("model artifact holds an untrained model".to_string()));
        }
        if self.scaler.n_features() != schema.n_features() {
            return Err(AppError::Artifact(format!(
                "scaler has {} features, schema has {}",
                self.scaler.n_features(),
                schema.n_features()
            )));
        }
        if self.model.n_features() != schema.n_features() {
            return Err(AppError::Artifact(format!(
                "model has {} features, schema has {}",
                self.model.n_features(),
                schema.n_features()
            )));
        }
        if self.model.n_classes() != self.encoder.n_classes() {
            return Err(AppError::Artifact(format!(
                "model has {} classes, label encoder has {}",
                self.model.n_classes(),
                self.encoder.n_classes()
            )));
        }
        Ok(())
    }
}
