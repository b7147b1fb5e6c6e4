// tests/delivery_retry.rs
//
// CollectorSink against a wiremock collector.

use std::time::Duration;

use news_interceptor::delivery::{CollectorSink, DeliverySink, FieldTable};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sink(server: &MockServer, table: FieldTable) -> CollectorSink {
    CollectorSink::new(format!("{}/api/capture", server.uri()), table)
        .with_timeout(5)
        .with_base_delay(Duration::from_millis(5))
}

fn bloomberg_payload() -> serde_json::Value {
    json!([
        {"publishedAt": "2024-05-01T10:00:00Z", "brand": "markets", "headline": "Oil rises"},
        {"publishedAt": "2024-05-01T09:30:00Z", "brand": "markets", "headline": "Gold slips"},
        {"publishedAt": "2024-05-01T09:00:00Z", "brand": "markets"}
    ])
}

#[tokio::test]
async fn three_server_errors_exhaust_the_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/capture"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let res = sink(&server, FieldTable::bloomberg())
        .deliver(&bloomberg_payload())
        .await;

    assert!(!res.success);
    assert_eq!(res.item_count, 0);
    let err = res.error.expect("error text");
    assert!(err.contains("500"), "error should name the status: {err}");
}

#[tokio::test]
async fn recovers_when_a_retry_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/capture"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/capture"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let res = sink(&server, FieldTable::bloomberg())
        .deliver(&bloomberg_payload())
        .await;
    assert!(res.success, "{res:?}");
    assert_eq!(res.item_count, 2);
}

#[tokio::test]
async fn posts_only_items_with_a_headline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/capture"))
        .and(body_partial_json(json!({
            "capturedData": [
                {"publishedAt": "2024-05-01T10:00:00Z", "brand": "markets", "headline": "Oil rises"},
                {"publishedAt": "2024-05-01T09:30:00Z", "brand": "markets", "headline": "Gold slips"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let res = sink(&server, FieldTable::bloomberg())
        .deliver(&bloomberg_payload())
        .await;
    assert_eq!(res.item_count, 2);
}

#[tokio::test]
async fn nothing_valid_means_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let res = sink(&server, FieldTable::bloomberg())
        .deliver(&json!({"stories": [{"brand": "x"}]}))
        .await;
    assert!(!res.success);
    assert_eq!(res.error.as_deref(), Some("no valid data"));
}

#[tokio::test]
async fn delivering_twice_posts_twice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/capture"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(2)
        .mount(&server)
        .await;

    let s = sink(&server, FieldTable::bloomberg());
    let a = s.deliver(&bloomberg_payload()).await;
    let b = s.deliver(&bloomberg_payload()).await;
    assert_eq!(a, b);
    assert!(a.success);
}

#[tokio::test]
async fn reuters_urls_are_made_absolute_on_the_wire() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/capture"))
        .and(body_partial_json(json!({
            "capturedData": [
                {"title": "A", "published_time": "T", "url": "https://www.reuters.com/x"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let res = sink(&server, FieldTable::reuters())
        .deliver(&json!({"articles": [{"title": "A", "published_time": "T", "url": "/x"}]}))
        .await;
    assert!(res.success, "{res:?}");
    assert_eq!(res.item_count, 1);
}
