use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Validation errors (malformed request bodies, bad feature values)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Required columns absent from an uploaded or training CSV
    #[error("CSV is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    /// Uploaded CSV has no data rows
    #[error("Uploaded CSV file is empty")]
    EmptyFile,

    /// Multipart upload problems (no file part, empty filename, wrong extension)
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Artifact loading, matching or persistence errors
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// Dataset content errors raised while training
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Model fitting or evaluation errors
    #[error("Model error: {0}")]
    Model(String),

    /// Batch processing errors
    #[error("Processing error: {0}")]
    Processing(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::MissingColumns(_) => StatusCode::BAD_REQUEST,
            AppError::EmptyFile => StatusCode::BAD_REQUEST,
            AppError::InvalidUpload(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Artifact(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Dataset(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Model(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::MissingColumns(_) => "MISSING_COLUMNS",
            AppError::EmptyFile => "EMPTY_FILE",
            AppError::InvalidUpload(_) => "INVALID_UPLOAD",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Artifact(_) => "ARTIFACT_ERROR",
            AppError::Dataset(_) => "DATASET_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Model(_) => "MODEL_ERROR",
            AppError::Processing(_) => "BATCH_PROCESSING_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for errors caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Message safe to return to callers.
    ///
    /// Server-side failures never leak their detail; it only goes to the log.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Processing(_) => "Batch processing error".to_string(),
            e if e.is_client_error() => e.to_string(),
            _ => "An internal error occurred while processing the request".to_string(),
        }
    }

    /// Fold any server-side failure into the generic batch error.
    pub fn into_batch_error(self) -> AppError {
        if self.is_client_error() || matches!(self, AppError::Processing(_)) {
            self
        } else {
            AppError::Processing(self.to_string())
        }
    }
}

/// Convert AppError to HTTP response
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        if status.is_server_error() {
            tracing::error!(
                error_code = error_code,
                status_code = status.as_u16(),
                detail = %self,
                "Request failed"
            );
        } else {
            tracing::warn!(
                error_code = error_code,
                status_code = status.as_u16(),
                message = %self,
                "Request rejected"
            );
        }

        crate::metrics::record_error(error_code);

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": self.public_message(),
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from serde_yaml::Error
impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from bincode::Error
impl From<bincode::Error> for AppError {
    fn from(err: bincode::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from csv::Error
impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::Serialization(format!("CSV: {}", err))
    }
}

/// Conversion from validator::ValidationErrors
impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
