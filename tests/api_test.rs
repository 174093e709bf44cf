/// Integration tests for the HTTP API
///
/// Every test trains a small forest into a temporary directory, loads it the way the
/// server does, and drives the router with `oneshot`.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use common::*;
use flow_classifier::{config::MissingValuePolicy, metrics};
use serde_json::{json, Map, Value};
use tower::ServiceExt;

async fn post_json(app: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app.oneshot(json_request(uri, &body)).await.unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

async fn upload(app: axum::Router, file_name: &str, content: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(multipart_request(
            "/predict_batch",
            "file",
            file_name,
            content.as_bytes(),
        ))
        .await
        .unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}

fn zeroed(mut features: Map<String, Value>, name: &str) -> Map<String, Value> {
    features.insert(name.to_string(), json!(0));
    features
}

// ============================================================================
// /predict
// ============================================================================

#[tokio::test]
async fn test_predict_returns_label_and_probabilities() {
    let fixture = train_fixture();

    for class in CLASSES {
        let (status, body) = post_json(
            app(&fixture),
            "/predict",
            json!({ "features": flow_features(class, 3) }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["prediction"], class);

        let probabilities = body["probabilities"].as_object().unwrap();
        let labels: Vec<&str> = probabilities.keys().map(String::as_str).collect();
        assert_eq!(labels, CLASSES);
        let total: f64 = probabilities.values().filter_map(Value::as_f64).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}

#[tokio::test]
async fn test_predict_ignores_key_order() {
    let fixture = train_fixture();
    let features = flow_features("Normal", 4);
    let reversed: Map<String, Value> = features
        .iter()
        .rev()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let (_, forward) = post_json(app(&fixture), "/predict", json!({ "features": features })).await;
    let (_, backward) = post_json(app(&fixture), "/predict", json!({ "features": reversed })).await;
    assert_eq!(forward, backward);
}

#[tokio::test]
async fn test_missing_feature_equals_explicit_zero() {
    let fixture = train_fixture();
    let mut omitted = flow_features("DDoS", 1);
    omitted.remove("Bytes_Received");
    let explicit = zeroed(flow_features("DDoS", 1), "Bytes_Received");

    let (status, without) = post_json(app(&fixture), "/predict", json!({ "features": omitted })).await;
    assert_eq!(status, StatusCode::OK);
    let (_, with_zero) = post_json(app(&fixture), "/predict", json!({ "features": explicit })).await;
    assert_eq!(without, with_zero);
}

#[tokio::test]
async fn test_missing_feature_rejected_under_reject_policy() {
    let fixture = train_fixture();
    let app = app_with(&fixture, |config| {
        config.inference.single_missing_features = MissingValuePolicy::Reject;
    });
    let mut features = flow_features("DDoS", 1);
    features.remove("Duration");

    let (status, body) = post_json(app, "/predict", json!({ "features": features })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("Duration"));
}

#[tokio::test]
async fn test_non_finite_values_are_zeroed() {
    let fixture = train_fixture();
    let base = flow_features("PortScan", 2);

    let mut inf = base.clone();
    inf.insert("Flow_Bytes/s".to_string(), json!("inf"));
    let mut nan = base.clone();
    nan.insert("Flow_Bytes/s".to_string(), json!("NaN"));
    let mut null = base.clone();
    null.insert("Flow_Bytes/s".to_string(), Value::Null);
    let explicit = zeroed(base, "Flow_Bytes/s");

    let (_, expected) = post_json(app(&fixture), "/predict", json!({ "features": explicit })).await;
    for features in [inf, nan, null] {
        let (status, body) = post_json(app(&fixture), "/predict", json!({ "features": features })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, expected);
    }
}

#[tokio::test]
async fn test_predict_accepts_numeric_strings_and_extra_keys() {
    let fixture = train_fixture();
    let numbers = flow_features("Normal", 5);
    let mut strings: Map<String, Value> = numbers
        .iter()
        .map(|(k, v)| (k.clone(), json!(v.to_string())))
        .collect();
    strings.insert("Protocol".to_string(), json!("tcp"));

    let (_, expected) = post_json(app(&fixture), "/predict", json!({ "features": numbers })).await;
    let (status, body) = post_json(app(&fixture), "/predict", json!({ "features": strings })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, expected);
}

#[tokio::test]
async fn test_predict_rejects_bad_bodies() {
    let fixture = train_fixture();

    let not_json = Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app(&fixture).oneshot(not_json).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body_json(response).await), "VALIDATION_ERROR");

    for body in [
        json!({}),
        json!({ "feature": {} }),
        json!({ "features": [1, 2, 3] }),
        json!({ "features": "Packet_Length=1" }),
        json!([1, 2]),
    ] {
        let (status, response) = post_json(app(&fixture), "/predict", body.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {}", body);
        assert_eq!(error_code(&response), "VALIDATION_ERROR");
        assert_eq!(response["error"]["status"], 400);
    }
}

#[tokio::test]
async fn test_predict_rejects_non_numeric_value() {
    let fixture = train_fixture();
    for bad in [json!("fast"), json!(true), json!({ "v": 1 })] {
        let mut features = flow_features("DDoS", 0);
        features.insert("Avg_Packet_Size".to_string(), bad);

        let (status, body) = post_json(app(&fixture), "/predict", json!({ "features": features })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Avg_Packet_Size"));
    }
}

// ============================================================================
// /predict_batch
// ============================================================================

#[tokio::test]
async fn test_batch_predicts_every_row() {
    let fixture = train_fixture();
    let rows = ["DDoS", "Normal", "PortScan", "DDoS"];

    let (status, body) = upload(app(&fixture), "flows.csv", &batch_csv(&rows)).await;
    assert_eq!(status, StatusCode::OK);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), rows.len());
    for (i, (row, expected)) in results.iter().zip(rows).enumerate() {
        let row = row.as_object().unwrap();
        assert_eq!(row["index"], i);
        assert_eq!(row["prediction"], expected);
        assert_eq!(row.keys().next().map(String::as_str), Some("index"));
        assert_eq!(row.keys().last().map(String::as_str), Some("prediction"));
        assert_eq!(
            row["Total_Bwd_Packets"].as_f64(),
            Some(flow_row(expected, i)[8])
        );
    }

    let summary = body["summary"].as_object().unwrap();
    assert_eq!(summary["total_rows"], rows.len());
    assert_eq!(summary["DDoS"], 2);
    let counted: u64 = summary
        .iter()
        .filter(|(k, _)| k.as_str() != "total_rows")
        .filter_map(|(_, v)| v.as_u64())
        .sum();
    assert_eq!(counted as usize, rows.len());
}

#[tokio::test]
async fn test_batch_rejects_missing_columns() {
    let fixture = train_fixture();
    let csv = batch_csv(&["DDoS"]).replacen("Sub_Flow_Bwd_Bytes", "Sub_Flow_Bwd_Bytez", 1);

    let (status, body) = upload(app(&fixture), "flows.csv", &csv).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "MISSING_COLUMNS");
    assert_eq!(
        body["error"]["message"],
        "CSV is missing required columns: Sub_Flow_Bwd_Bytes"
    );
}

#[tokio::test]
async fn test_batch_zero_fills_missing_columns_when_configured() {
    let fixture = train_fixture();
    let app = app_with(&fixture, |config| {
        config.inference.batch_missing_columns = MissingValuePolicy::ZeroFill;
    });
    let csv = batch_csv(&["DDoS", "Normal"]).replacen("Sub_Flow_Bwd_Bytes", "Other", 1);

    let (status, body) = upload(app, "flows.csv", &csv).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["total_rows"], 2);
}

#[tokio::test]
async fn test_batch_empty_file() {
    let fixture = train_fixture();
    let header_only = batch_csv(&[]);

    for content in ["", header_only.as_str()] {
        let (status, body) = upload(app(&fixture), "flows.csv", content).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body), "EMPTY_FILE");
    }
}

#[tokio::test]
async fn test_batch_rejects_bad_uploads() {
    let fixture = train_fixture();
    let csv = batch_csv(&["DDoS"]);

    let (status, body) = upload(app(&fixture), "flows.txt", &csv).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_UPLOAD");

    let (status, _) = upload(app(&fixture), "", &csv).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let response = app(&fixture)
        .oneshot(multipart_request("/predict_batch", "upload", "flows.csv", csv.as_bytes()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"]["message"]
        .as_str()
        .unwrap()
        .contains("No file part"));

    let not_multipart = json_request("/predict_batch", &json!({ "file": "flows.csv" }));
    let response = app(&fixture).oneshot(not_multipart).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_batch_rejects_reserved_index_column() {
    let fixture = train_fixture();
    let csv: String = batch_csv(&["DDoS", "Normal"])
        .lines()
        .enumerate()
        .map(|(i, line)| {
            let first = if i == 0 { "index".to_string() } else { (i + 6).to_string() };
            format!("{},{}\n", first, line)
        })
        .collect();

    let (status, body) = upload(app(&fixture), "flows.csv", &csv).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_UPLOAD");
    assert!(body["error"]["message"].as_str().unwrap().contains("index"));
}

#[tokio::test]
async fn test_batch_sanitizes_non_finite_cells() {
    let fixture = train_fixture();
    let mut csv = batch_csv(&["PortScan"]);
    let width = flow_row("PortScan", 0).len();
    csv.push_str(&vec!["inf"; width].join(","));
    csv.push('\n');
    csv.push_str(&vec![""; width].join(","));
    csv.push('\n');

    let (status, body) = upload(app(&fixture), "flows.csv", &csv).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["total_rows"], 3);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results[1]["Packet_Length"], "inf");
    assert_eq!(results[2]["Packet_Length"], Value::Null);
    // Both rows reduce to the all-zero vector
    assert_eq!(results[1]["prediction"], results[2]["prediction"]);
}

#[tokio::test]
async fn test_batch_text_cell_is_generic_server_error() {
    let fixture = train_fixture();
    let mut csv = batch_csv(&["DDoS"]);
    let mut row = vec!["1".to_string(); flow_row("DDoS", 0).len()];
    row[4] = "fast".to_string();
    csv.push_str(&row.join(","));
    csv.push('\n');

    let (status, body) = upload(app(&fixture), "flows.csv", &csv).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_code(&body), "BATCH_PROCESSING_ERROR");
    assert_eq!(body["error"]["message"], "Batch processing error");
    assert!(body.get("results").is_none());
}

// ============================================================================
// /explain, /static/swagger.yaml, /health, /metrics
// ============================================================================

#[tokio::test]
async fn test_explain_ranks_by_magnitude() {
    let fixture = train_fixture();
    let body = json!({
        "features": {
            "Duration": 0.5,
            "Bytes_Sent": -90000,
            "Packet_Length": 1500,
            "Flow_Bytes/s": "inf",
            "Avg_Packet_Size": 1500,
            "Total_Fwd_Packets": 3
        }
    });

    let (status, response) = post_json(app(&fixture), "/explain", body).await;
    assert_eq!(status, StatusCode::OK);

    let explanation = response["explanation"].as_object().unwrap();
    let names: Vec<&str> = explanation.keys().map(String::as_str).collect();
    assert_eq!(names, ["Bytes_Sent", "Packet_Length", "Avg_Packet_Size"]);
    assert!(explanation.values().all(|v| v == "high"));
}

#[tokio::test]
async fn test_explain_errors() {
    let fixture = train_fixture();

    let (status, body) = post_json(app(&fixture), "/explain", json!({ "values": {} })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");

    let (status, body) = post_json(
        app(&fixture),
        "/explain",
        json!({ "features": { "Duration": "slow" } }),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!body["error"]["message"].as_str().unwrap().contains("slow"));
}

#[tokio::test]
async fn test_explain_rejects_null_and_blank_values() {
    let fixture = train_fixture();

    for value in [json!(null), json!("")] {
        let (status, body) = post_json(
            app(&fixture),
            "/explain",
            json!({ "features": { "Duration": 1.0, "Packet_Length": value } }),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "value {}", value);
        assert_eq!(error_code(&body), "INTERNAL_ERROR");
    }
}

#[tokio::test]
async fn test_api_doc_served_as_json() {
    let fixture = train_fixture();
    let response = app(&fixture)
        .oneshot(get_request("/static/swagger.yaml"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let doc = body_json(response).await;
    assert!(doc["openapi"].as_str().unwrap().starts_with("3."));
    assert!(doc["paths"]["/predict_batch"].is_object());

    let broken = app_with(&fixture, |config| {
        config.server.api_doc_path = fixture.dir.path().join("missing.yaml");
    });
    let response = broken.oneshot(get_request("/static/swagger.yaml")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_health_reports_loaded_run() {
    let fixture = train_fixture();
    let response = app(&fixture).oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["schema"], "flow_summary");
    assert_eq!(body["run_id"], fixture.report.run_id.to_string());
    assert_eq!(body["classes"], json!(CLASSES));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let _ = metrics::init_metrics();
    let fixture = train_fixture();

    let (status, _) = post_json(
        app(&fixture),
        "/predict",
        json!({ "features": flow_features("DDoS", 0) }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let response = app(&fixture).oneshot(get_request("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let output = body_text(response).await;
    let line = find_sample(
        &output,
        "flow_classifier_predictions_total",
        &["endpoint=\"predict\"", "label=\"DDoS\""],
    )
    .expect("prediction counter");
    assert!(extract_metric_value(line).unwrap() >= 1.0);

    let disabled = app_with(&fixture, |config| {
        config.observability.prometheus_enabled = false;
    });
    let response = disabled.oneshot(get_request("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
