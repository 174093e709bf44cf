use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::ml::{BatchPrediction, Prediction};
use axum::{
    body::Bytes,
    extract::{
        multipart::MultipartRejection,
        rejection::JsonRejection,
        Multipart, State,
    },
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Multipart field carrying the batch CSV
const UPLOAD_FIELD: &str = "file";

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let provenance = state.service.provenance();
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        schema: provenance.schema_name.clone(),
        schema_version: provenance.schema_version,
        run_id: provenance.run_id,
        trained_at: provenance.trained_at,
        classes: state.service.classes().to_vec(),
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub schema: String,
    pub schema_version: u32,
    pub run_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub classes: Vec<String>,
}

/// Prometheus exposition
pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse> {
    if !state.config.observability.prometheus_enabled {
        return Err(AppError::NotFound("metrics are disabled".to_string()));
    }
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    ))
}

/// Predict a single feature record
pub async fn predict(
    State(state): State<AppState>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<PredictResponse>> {
    let features = features_of(payload)?;
    let service = state.service.clone();

    let start = Instant::now();
    let prediction = tokio::task::spawn_blocking(move || service.predict_record(&features))
        .await
        .map_err(|e| AppError::Internal(format!("prediction task failed: {}", e)))??;
    metrics::observe_prediction_duration("predict", start.elapsed().as_secs_f64());
    metrics::record_prediction("predict", &prediction.label);

    debug!(label = %prediction.label, confidence = prediction.confidence, "Predicted");
    Ok(Json(PredictResponse::from(prediction)))
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub prediction: String,
    /// One entry per class, in class order
    pub probabilities: Map<String, Value>,
}

impl From<Prediction> for PredictResponse {
    fn from(prediction: Prediction) -> Self {
        Self {
            prediction: prediction.label,
            probabilities: prediction
                .probabilities
                .into_iter()
                .map(|(label, p)| (label, Value::from(p)))
                .collect(),
        }
    }
}

/// Predict every row of an uploaded CSV
pub async fn predict_batch(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<BatchPrediction>> {
    let mut multipart =
        multipart.map_err(|e| AppError::InvalidUpload(format!("expected multipart form data: {}", e)))?;
    let (file_name, data) = read_csv_upload(&mut multipart).await?;
    info!(file = %file_name, bytes = data.len(), "Received batch upload");

    let service = state.service.clone();
    let start = Instant::now();
    let batch = tokio::task::spawn_blocking(move || service.predict_csv(&data))
        .await
        .map_err(|e| AppError::Internal(format!("batch task failed: {}", e)))
        .and_then(|result| result)
        .map_err(AppError::into_batch_error)?;
    metrics::observe_prediction_duration("predict_batch", start.elapsed().as_secs_f64());
    metrics::record_batch(&batch.summary.counts, batch.summary.total_rows);

    info!(rows = batch.summary.total_rows, "Batch predicted");
    Ok(Json(batch))
}

/// Pull the `file` part out of the form, checking it names a CSV
async fn read_csv_upload(multipart: &mut Multipart) -> Result<(String, Bytes)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidUpload(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        if file_name.is_empty() {
            return Err(AppError::InvalidUpload("No selected file".to_string()));
        }
        if !file_name.ends_with(".csv") {
            return Err(AppError::InvalidUpload(
                "Only CSV files are allowed".to_string(),
            ));
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::InvalidUpload(e.body_text()))?;
        return Ok((file_name, data));
    }

    Err(AppError::InvalidUpload("No file part".to_string()))
}

/// Rank the supplied features by magnitude
pub async fn explain(
    State(state): State<AppState>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<ExplainResponse>> {
    let features = features_of(payload)?;
    let top_k = state.service.policy().explain_top_k;

    let explanation = state
        .service
        .explain(&features, top_k)?
        .into_iter()
        .map(|name| (name, Value::String("high".to_string())))
        .collect();

    Ok(Json(ExplainResponse { explanation }))
}

#[derive(Debug, Serialize)]
pub struct ExplainResponse {
    pub explanation: Map<String, Value>,
}

/// OpenAPI document, converted from YAML on every request
pub async fn api_doc(State(state): State<AppState>) -> Result<Json<Value>> {
    let path = &state.config.server.api_doc_path;
    let raw = tokio::fs::read_to_string(path).await?;
    let doc: Value = serde_yaml::from_str(&raw)?;
    Ok(Json(doc))
}

/// The `features` object of a `/predict` or `/explain` body
fn features_of(payload: std::result::Result<Json<Value>, JsonRejection>) -> Result<Map<String, Value>> {
    let Json(body) = payload
        .map_err(|e| AppError::Validation(format!("request body must be JSON: {}", e.body_text())))?;

    match body {
        Value::Object(mut body) => match body.remove("features") {
            Some(Value::Object(features)) => Ok(features),
            Some(_) => Err(AppError::Validation(
                "'features' must be a JSON object".to_string(),
            )),
            None => Err(AppError::Validation(
                "request body must contain 'features'".to_string(),
            )),
        },
        _ => Err(AppError::Validation(
            "request body must be a JSON object".to_string(),
        )),
    }
}
