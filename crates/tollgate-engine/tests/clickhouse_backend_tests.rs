//! Integration tests for the ClickHouse HTTP backend using wiremock.
//!
//! These tests verify:
//! - SQL is posted with `FORMAT JSON` and settings travel as URL parameters
//! - Credentials are sent as headers
//! - Result rows and statistics are parsed
//! - Error statuses map to backend errors

use std::time::Duration;
use tollgate_engine::{BackendError, ClickhouseConfig, ClickhouseHttpBackend, QueryBackend};
use tollgate_query::{FormattedQuery, QuerySettings, SettingValue};
use wiremock::matchers::{body_string, header, method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> ClickhouseHttpBackend {
    let config = ClickhouseConfig::builder(server.uri())
        .user("tollgate")
        .password("secret")
        .database("events")
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    ClickhouseHttpBackend::new(config).unwrap()
}

fn formatted() -> FormattedQuery {
    FormattedQuery {
        sql: "SELECT (count() AS c) FROM eap_items_dist WHERE equals(organization_id, 1)"
            .to_string(),
        table: "eap_items_dist".to_string(),
    }
}

fn settings() -> QuerySettings {
    let mut settings = QuerySettings::new();
    settings.insert("max_threads".to_string(), SettingValue::Int(4));
    settings.insert(
        "group_by_overflow_mode".to_string(),
        SettingValue::String("any".to_string()),
    );
    settings
}

#[tokio::test]
async fn test_execute_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(query_param("database", "events"))
        .and(query_param("max_threads", "4"))
        .and(query_param("group_by_overflow_mode", "any"))
        .and(header("X-ClickHouse-User", "tollgate"))
        .and(header("X-ClickHouse-Key", "secret"))
        .and(body_string(format!("{} FORMAT JSON", formatted().sql)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "meta": [{"name": "c", "type": "UInt64"}],
            "data": [{"c": "42"}],
            "rows": 1,
            "statistics": {"elapsed": 0.002, "rows_read": 10, "bytes_read": 4096}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = backend(&server)
        .execute(&formatted(), &settings())
        .await
        .unwrap();

    assert_eq!(result.rows, 1);
    assert_eq!(result.bytes_scanned, 4096);
    assert_eq!(result.meta[0].column_type, "UInt64");
    assert_eq!(result.data[0]["c"], "42");
}

#[tokio::test]
async fn test_missing_statistics_default_to_zero() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{"c": 1}, {"c": 2}]
        })))
        .mount(&server)
        .await;

    let result = backend(&server)
        .execute(&formatted(), &QuerySettings::new())
        .await
        .unwrap();
    assert_eq!(result.rows, 2);
    assert_eq!(result.bytes_scanned, 0);
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string("Code: 241. DB::Exception: Memory limit\n"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = backend(&server)
        .execute(&formatted(), &settings())
        .await
        .unwrap_err();
    match &err {
        BackendError::Server { status, message } => {
            assert_eq!(*status, 500);
            assert_eq!(message, "Code: 241. DB::Exception: Memory limit");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_client_error_not_transient() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Code: 62. Syntax error"))
        .mount(&server)
        .await;

    let err = backend(&server)
        .execute(&formatted(), &settings())
        .await
        .unwrap_err();
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_unreadable_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = backend(&server)
        .execute(&formatted(), &settings())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_transport_params_never_sent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
        .expect(0)
        .mount(&server)
        .await;

    for key in ["query", "database", "user", "param_org"] {
        let mut settings = settings();
        settings.insert(key.to_string(), SettingValue::String("x".to_string()));
        let err = backend(&server)
            .execute(&formatted(), &settings)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Config(ref m) if m.contains(key)), "{}", key);
        assert!(!err.is_transient());
    }
}
