use flow_classifier::{
    api::{build_router, AppState},
    config::{Config, ObservabilityConfig},
    metrics,
    ml::PredictionService,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Invalid configuration is fatal; there is no safe fallback schema
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&config.observability);
    tracing::info!("Starting Flow Classifier v{}", env!("CARGO_PKG_VERSION"));

    let service = match PredictionService::load(&config) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            tracing::error!("Failed to load artifacts: {}", e);
            eprintln!(
                "Could not load model artifacts from {}: {}\nRun `flowctl train` first.",
                config.artifacts.dir.display(),
                e
            );
            std::process::exit(1);
        }
    };
    let provenance = service.provenance();
    tracing::info!(
        run_id = %provenance.run_id,
        trained_at = %provenance.trained_at,
        schema = %provenance.schema_name,
        classes = ?service.classes(),
        "✅ Model artifacts loaded"
    );

    // Initialize Prometheus metrics
    if config.observability.prometheus_enabled {
        if let Err(e) = metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
            tracing::warn!("Continuing without metrics");
        } else {
            metrics::set_build_info(&provenance.run_id.to_string(), &provenance.schema_name);
            tracing::info!("✅ Prometheus metrics initialized");
        }
    } else {
        tracing::info!("⚠️  Prometheus metrics disabled in configuration");
    }

    let addr = format!("{}:{}", config.server.host, config.server.http_port);
    let state = AppState::new(service, Arc::new(config));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🚀 HTTP server listening on http://{}", addr);
    tracing::info!("   Predict: POST /predict, POST /predict_batch, POST /explain");
    tracing::info!("   API doc: GET /static/swagger.yaml");
    tracing::info!("Press Ctrl+C to shutdown");

    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = http_handle => {
            tracing::warn!("HTTP server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    tracing::info!("Shutting down gracefully...");
    Ok(())
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "flow_classifier={level},tower_http={level}",
            level = observability.log_level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if observability.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
