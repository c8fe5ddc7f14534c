#![allow(clippy::unwrap_used)]
// Integration tests for `ApcClient` using wiremock.

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use apguard_api::{ApcClient, Error, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, ApcClient) {
    let server = MockServer::start().await;
    let base = format!("{}/v1", server.uri());
    let client = ApcClient::from_reqwest(&base, reqwest::Client::new()).unwrap();
    (server, client)
}

// ── Config & status ─────────────────────────────────────────────────

#[tokio::test]
async fn test_get_config_parses_profiles() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/config/active"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "profile": {
                "539dd9d7-acaf-477c-a0ad-ed5784dd18b6": {
                    "ssid": "Office",
                    "vlan": 30,
                    "userTags": [4]
                }
            },
            "assets": {}
        })))
        .mount(&server)
        .await;

    let config = client.get_config().await.unwrap();
    let profile = &config.profile["539dd9d7-acaf-477c-a0ad-ed5784dd18b6"];
    assert_eq!(profile.ssid.as_deref(), Some("Office"));
    assert_eq!(profile.vlan, Some(30));
    assert_eq!(profile.user_tags.len(), 1);
}

#[tokio::test]
async fn test_get_all_ssid_status() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/status/ssid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "p1": { "phy": ["aa:bb:cc:00:00:01"], "vlan:7": ["aa:bb:cc:00:00:02"] }
        })))
        .mount(&server)
        .await;

    let table = client.get_all_ssid_status().await.unwrap();
    let mut assignments = table.assignments();
    assignments.sort_by(|a, b| a.mac.cmp(&b.mac));
    assert_eq!(assignments.len(), 2);
    assert_eq!(assignments[1].psk_vlan.as_deref(), Some("7"));
}

#[tokio::test]
async fn test_garbage_body_is_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/config/active"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let result = client.get_config().await;
    match result {
        Err(Error::Deserialization { body, .. }) => assert!(body.contains("oops")),
        other => panic!("expected Deserialization error, got: {other:?}"),
    }
}

// ── Error mapping ───────────────────────────────────────────────────

#[tokio::test]
async fn test_unauthorized_maps_to_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/status/ssid"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = client.get_all_ssid_status().await;
    assert!(
        matches!(result, Err(Error::Unauthorized)),
        "expected Unauthorized, got: {result:?}"
    );
}

#[tokio::test]
async fn test_server_error_carries_message() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v1/config/active"))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(json!({ "message": "controller busy" })),
        )
        .mount(&server)
        .await;

    let err = client.get_config().await.unwrap_err();
    assert!(err.is_transient());
    match err {
        Error::Http { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "controller busy");
        }
        other => panic!("expected Http error, got: {other:?}"),
    }
}

// ── Rules ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_update_rule_puts_body() {
    let (server, client) = setup().await;

    let rule = json!({ "pid": 12, "type": "device", "target": "AA:BB:CC:DD:EE:FF" });
    Mock::given(method("PUT"))
        .and(path("/v1/rules/12"))
        .and(body_json(rule.clone()))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client.update_rule("12", &rule).await.unwrap();
}

#[tokio::test]
async fn test_update_rules_sends_replace_flag() {
    let (server, client) = setup().await;

    let rules = vec![json!({ "pid": 1 }), json!({ "pid": 2 })];
    Mock::given(method("POST"))
        .and(path("/v1/rules"))
        .and(body_json(json!({ "rules": rules, "replace": true })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client.update_rules(&rules, true).await.unwrap();
}

#[tokio::test]
async fn test_delete_missing_rule_is_ok() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/rules/99"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    client.delete_rule("99").await.unwrap();
}

#[tokio::test]
async fn test_delete_rule_propagates_other_errors() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/rules/5"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let result = client.delete_rule("5").await;
    assert!(matches!(result, Err(Error::Http { status: 500, .. })));
}

// ── Transport ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_bearer_token_is_sent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/config/active"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "profile": {} })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = TransportConfig {
        token: Some("s3cret".to_string().into()),
        ..TransportConfig::default()
    };
    let client = ApcClient::new(&server.uri(), &transport).unwrap();
    let config = client.get_config().await.unwrap();
    assert!(config.profile.is_empty());
}
