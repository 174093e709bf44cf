pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::{config::Config, ml::PredictionService};
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PredictionService>,
    pub config: Arc<Config>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(service: Arc<PredictionService>, config: Arc<Config>) -> Self {
        Self {
            service,
            config,
            started_at: Instant::now(),
        }
    }
}
