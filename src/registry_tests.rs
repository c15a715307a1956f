use super::*;
use crate::testing::FakeRegistry;
use serde_json::json;

fn endpoint() -> Endpoint {
    Endpoint::new("http://127.0.0.1:8000/api/", Some("t0k3n".to_string()))
}

#[test]
fn object_urls_join_cleanly() {
    assert_eq!(
        endpoint().object_url("data_product"),
        "http://127.0.0.1:8000/api/data_product/"
    );
    let bare = Endpoint::new("http://localhost:8000/api", None);
    assert_eq!(bare.object_url("/namespace/"), "http://localhost:8000/api/namespace/");
}

#[test]
fn ids_come_from_last_path_segment() {
    assert_eq!(
        object_id_from_url("http://127.0.0.1:8000/api/namespace/3/").as_deref(),
        Some("3")
    );
    assert_eq!(
        object_id_from_url("https://data.scrc.uk/api/data_product/42?format=json").as_deref(),
        Some("42")
    );
    assert_eq!(object_id_from_url("http://host"), None);
}

#[test]
fn search_keys_cover_globbable_types() {
    assert_eq!(search_key("data_product"), Some("name"));
    assert_eq!(search_key("external_object"), Some("identifier"));
    assert_eq!(search_key("file_type"), Some("extension"));
    assert_eq!(search_key("run_metadata"), None);
}

#[test]
fn results_envelopes_are_unwrapped() {
    let paged = json!({"count": 2, "results": [{"name": "a"}, {"name": "b"}]});
    assert_eq!(unwrap_results(paged).len(), 2);
    assert_eq!(unwrap_results(json!({"name": "a"})).len(), 1);
    assert!(unwrap_results(JsonValue::Null).is_empty());
}

#[test]
fn empty_post_fields_and_params_are_dropped() {
    let data = strip_empty_fields(&json!({"name": "PSU", "full_name": null, "website": ""}));
    assert_eq!(data, json!({"name": "PSU"}));

    let params = Params::from([
        ("name".to_string(), "x".to_string()),
        ("version".to_string(), String::new()),
    ]);
    assert_eq!(non_empty_params(&params).len(), 1);
}

#[test]
fn conflict_on_post_falls_back_to_get() {
    let registry = FakeRegistry::new("http://127.0.0.1:8000/api");
    let existing = registry.add_namespace("PSU");
    let params = Params::from([("name".to_string(), "PSU".to_string())]);

    let url = post_else_get(
        &registry,
        &endpoint(),
        "namespace",
        &json!({"name": "PSU"}),
        &params,
    )
    .expect("post else get");
    assert_eq!(url, existing);
    assert_eq!(registry.requests(), vec!["post namespace", "get namespace"]);
}

#[test]
fn fresh_post_returns_new_url() {
    let registry = FakeRegistry::new("http://127.0.0.1:8000/api");
    let url = post_else_get(
        &registry,
        &endpoint(),
        "namespace",
        &json!({"name": "testing"}),
        &Params::new(),
    )
    .expect("post");
    assert_eq!(url, "http://127.0.0.1:8000/api/namespace/1/");
}

#[test]
fn key_value_converts_to_id() {
    let registry = FakeRegistry::new("http://127.0.0.1:8000/api");
    registry.add_namespace("PSU");
    registry.add_namespace("testing");
    let id = convert_key_value_to_id(&registry, &endpoint(), "namespace", "testing").expect("id");
    assert_eq!(id, "2");

    match convert_key_value_to_id(&registry, &endpoint(), "namespace", "missing") {
        Err(FairError::Registry(msg)) => assert!(msg.contains("Failed to obtain result")),
        other => panic!("expected registry error, got {other:?}"),
    }
}

/// Serve one canned HTTP response on a loopback port.
fn serve_once(response: &'static str) -> String {
    use std::io::{BufRead, BufReader, Write};
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let address = listener.local_addr().expect("address");
    std::thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            while reader.read_line(&mut line).is_ok_and(|read| read > 0) {
                if line == "\r\n" {
                    break;
                }
                line.clear();
            }
            let _ = reader.get_mut().write_all(response.as_bytes());
        }
    });
    format!("http://{address}/api/")
}

#[test]
fn non_json_success_is_an_unexpected_server_state() {
    let url = serve_once(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 15\r\nConnection: close\r\n\r\n<html>hi</html>",
    );
    let client = RegistryClient::new();
    let err = client
        .get(&Endpoint::new(url, None), "namespace", &Params::new())
        .expect_err("not json");
    match &err {
        FairError::UnexpectedRegistryServerState { msg, hint } => {
            assert!(msg.contains("Failed to retrieve JSON data"), "{msg}");
            assert!(hint.is_some());
        }
        other => panic!("expected unexpected server state, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 1);
    assert!(!err.to_string().contains("HTTP 200"));
}
