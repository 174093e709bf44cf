//! Network-flow attack classifier.
//!
//! An offline [`ml::Trainer`] fits a scaler, a label encoder and a random forest on a
//! labeled flow CSV and writes them as a matched artifact triple. The HTTP service in
//! [`api`] loads that triple once at startup and answers single-record, batch and
//! explanation requests against it.

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod ml;
pub mod schema;

pub use error::{AppError, Result};
