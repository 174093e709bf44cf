//! Common test utilities
//!
//! Synthetic flow datasets, a trained artifact fixture in a temporary directory,
//! and helpers for driving the router with `oneshot`.

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Request},
    response::Response,
    Router,
};
use flow_classifier::{
    api::{build_router, AppState},
    config::Config,
    ml::{PredictionService, Trainer, TrainingReport},
    schema::FeatureSchema,
};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Classes of the synthetic dataset, in label-encoder order
pub const CLASSES: [&str; 3] = ["DDoS", "Normal", "PortScan"];

pub const ROWS_PER_CLASS: usize = 30;

const BOUNDARY: &str = "flowclassifiertestboundary";

/// One synthetic flow for `class`; classes are separated by packet length and duration
pub fn flow_row(class: &str, i: usize) -> Vec<f64> {
    let jitter = (i % 10) as f64;
    let (packet_length, duration, fwd, bwd) = match class {
        "DDoS" => (1400.0 + jitter, 0.5 + jitter * 0.01, 900.0 + jitter, 2.0),
        "Normal" => (600.0 + jitter * 3.0, 5.0 + jitter * 0.1, 20.0 + jitter, 18.0 + jitter),
        _ => (60.0 + jitter, 0.01, 1.0, 1.0),
    };
    let bytes_sent = packet_length * fwd;
    let bytes_received = 60.0 * bwd;
    let packets = fwd + bwd;
    vec![
        packet_length,
        duration,
        bytes_sent,
        bytes_received,
        packets / duration,
        (bytes_sent + bytes_received) / duration,
        (bytes_sent + bytes_received) / packets,
        fwd,
        bwd,
        fwd * 20.0,
        bwd * 20.0,
        bytes_sent,
        bytes_received,
    ]
}

/// A record for `/predict` built from [`flow_row`]
pub fn flow_features(class: &str, i: usize) -> Map<String, Value> {
    FeatureSchema::flow_summary()
        .features
        .into_iter()
        .zip(flow_row(class, i))
        .map(|(name, v)| (name, Value::from(v)))
        .collect()
}

pub fn csv_header(schema: &FeatureSchema, with_target: bool) -> String {
    let mut columns = schema.features.clone();
    if with_target {
        columns.push(schema.target.clone());
    }
    columns.join(",")
}

fn csv_line(values: &[f64]) -> String {
    values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(",")
}

/// Labeled CSV with `rows_per_class` rows of each class, interleaved
pub fn labeled_csv(rows_per_class: usize) -> String {
    let schema = FeatureSchema::flow_summary();
    let mut out = csv_header(&schema, true);
    out.push('\n');
    for i in 0..rows_per_class {
        for class in CLASSES {
            out.push_str(&csv_line(&flow_row(class, i)));
            out.push(',');
            out.push_str(class);
            out.push('\n');
        }
    }
    out
}

/// Unlabeled CSV for batch uploads, one row per entry of `classes`
pub fn batch_csv(classes: &[&str]) -> String {
    let schema = FeatureSchema::flow_summary();
    let mut out = csv_header(&schema, false);
    out.push('\n');
    for (i, class) in classes.iter().enumerate() {
        out.push_str(&csv_line(&flow_row(class, i)));
        out.push('\n');
    }
    out
}

/// Trained artifacts living in a temporary directory
pub struct TrainedFixture {
    pub dir: TempDir,
    pub config: Config,
    pub report: TrainingReport,
}

impl TrainedFixture {
    pub fn dataset_path(&self) -> PathBuf {
        self.dir.path().join("dataset.csv")
    }
}

/// Config pointing at `dir`, with a small forest
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.training.dataset_path = dir.path().join("dataset.csv");
    config.training.n_trees = 10;
    config.artifacts.dir = dir.path().join("artifacts");
    config.server.api_doc_path =
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("static/swagger.yaml");
    config
}

pub fn train_fixture() -> TrainedFixture {
    let dir = TempDir::new().expect("temp dir");
    std::fs::write(dir.path().join("dataset.csv"), labeled_csv(ROWS_PER_CLASS)).expect("write dataset");

    let config = test_config(&dir);
    let trainer = Trainer::new(
        config.schema.resolve().expect("schema"),
        config.training.clone(),
        config.artifacts.clone(),
    );
    let report = trainer.run().expect("training run");

    TrainedFixture {
        dir,
        config,
        report,
    }
}

/// Router over the fixture's artifacts, after `adjust` has edited the config
pub fn app_with(fixture: &TrainedFixture, adjust: impl FnOnce(&mut Config)) -> Router {
    let mut config = fixture.config.clone();
    adjust(&mut config);
    let service = PredictionService::load(&config).expect("load artifacts");
    build_router(AppState::new(Arc::new(service), Arc::new(config)))
}

pub fn app(fixture: &TrainedFixture) -> Router {
    app_with(fixture, |_| {})
}

pub fn json_request(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request")
}

/// `multipart/form-data` POST with a single part
pub fn multipart_request(uri: &str, field: &str, file_name: &str, content: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: text/csv\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("request")
}

pub async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    serde_json::from_slice(&bytes).expect("JSON body")
}

pub async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    String::from_utf8(bytes.to_vec()).expect("UTF-8 body")
}

/// Extract metric value from a Prometheus output line
/// Example: `metric_name{label1="value1"} 42.5` -> Some(42.5)
pub fn extract_metric_value(line: &str) -> Option<f64> {
    line.split_whitespace().last()?.parse::<f64>().ok()
}

/// First sample line of `metric_name` containing every label fragment in `labels`
pub fn find_sample<'a>(output: &'a str, metric_name: &str, labels: &[&str]) -> Option<&'a str> {
    output.lines().find(|line| {
        line.starts_with(metric_name) && labels.iter().all(|label| line.contains(label))
    })
}
