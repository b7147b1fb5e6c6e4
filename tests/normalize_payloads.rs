// tests/normalize_payloads.rs
use news_interceptor::delivery::FieldTable;
use serde_json::json;

#[test]
fn reuters_relative_url_gets_the_site_prefix() {
    let raw = json!({"articles": [{"title": "A", "published_time": "T", "url": "/x"}]});
    let out = FieldTable::reuters().normalize(&raw);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].get_str("title"), Some("A"));
    assert_eq!(out[0].get_str("published_time"), Some("T"));
    assert_eq!(out[0].get_str("url"), Some("https://www.reuters.com/x"));
}

#[test]
fn reuters_nested_result_articles_are_found() {
    let raw = json!({"result": {"articles": [
        {"title": "  Copper &amp; zinc\n rally ", "published_time": "T", "canonical_url": "https://www.reuters.com/y"},
        {"title": "", "published_time": "T"},
        {"title": "No time"}
    ]}});
    let out = FieldTable::reuters().normalize(&raw);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].get_str("title"), Some("Copper & zinc rally"));
    assert_eq!(out[0].get_str("url"), Some("https://www.reuters.com/y"));
}

#[test]
fn bloomberg_top_level_array_keeps_brand_optional() {
    let raw = json!([
        {"publishedAt": "T", "headline": "H"},
        {"publishedAt": "T", "brand": "b"}
    ]);
    let out = FieldTable::bloomberg().normalize(&raw);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].get_str("headline"), Some("H"));
    assert!(out[0].get("brand").unwrap().is_null());
}

#[test]
fn unrecognized_shapes_yield_nothing() {
    assert!(FieldTable::bloomberg().normalize(&json!({"foo": 1})).is_empty());
    assert!(FieldTable::reuters().normalize(&json!("text")).is_empty());
}
