// tests/registry_tests.rs
use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;

use upstreamctl::registry::{AttributePatch, RegistryClient, ServerAttr, StatusQuery};

fn client_for(server: &ServerGuard) -> RegistryClient {
    RegistryClient::new(server.url().parse().unwrap(), "user", "pass")
}

#[tokio::test]
async fn discovery_lists_services_with_basic_auth() {
    let mut server = Server::new_async().await;
    // Nothing is cached: one services() call plus two server_count() calls
    // means three live reads.
    let mock = server
        .mock("GET", "/stream/upstreams/")
        .match_header("authorization", "Basic dXNlcjpwYXNz")
        .expect(3)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "app": {"zone": "z", "peers": [{"id": 0, "server": "10.0.0.1:80"}]},
                "db": {"zone": "z", "peers": []}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let client = client_for(&server);
    let services = client.services().await.unwrap();
    assert_eq!(services, vec!["app".to_string(), "db".to_string()]);

    assert_eq!(client.server_count("app").await.unwrap(), Some(1));
    assert_eq!(client.server_count("missing").await.unwrap(), None);
    mock.assert_async().await;
}

#[tokio::test]
async fn discovery_failure_returns_empty_set() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/stream/upstreams/")
        .with_status(503)
        .create_async()
        .await;

    let client = client_for(&server);
    let services = client.services().await.unwrap();
    assert!(services.is_empty());
}

#[tokio::test]
async fn status_read_is_restricted_to_requested_fields() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/stream/upstreams/app/servers/")
        .with_status(200)
        .with_body(
            json!([
                {"id": 0, "server": "10.0.0.1:80", "weight": 1, "down": false,
                 "max_conns": 0, "backup": false},
                {"id": 3, "server": "10.0.0.2:80", "weight": 5, "down": true,
                 "max_conns": 0, "backup": false}
            ])
            .to_string(),
        )
        .create_async()
        .await;

    let client = client_for(&server);
    let query = StatusQuery::new()
        .with_services(["app"])
        .with_fields([ServerAttr::Server, ServerAttr::Weight]);
    let status = client.server_status(&query).await.unwrap();

    let servers = &status["app"];
    assert_eq!(servers.len(), 2);
    for (_, attrs) in servers {
        let fields: Vec<ServerAttr> = attrs.keys().copied().collect();
        assert_eq!(fields, vec![ServerAttr::Server, ServerAttr::Weight]);
    }
    assert_eq!(servers[&3][&ServerAttr::Weight], json!(5));
}

#[tokio::test]
async fn failed_service_is_skipped_with_partial_result() {
    let mut server = Server::new_async().await;
    for (service, status) in [("alpha", 200), ("beta", 500), ("gamma", 200)] {
        let mock = server
            .mock("GET", format!("/stream/upstreams/{service}/servers/").as_str())
            .with_status(status);
        let mock = if status == 200 {
            mock.with_body(json!([{"id": 0, "server": "10.0.0.1:80", "down": false}]).to_string())
        } else {
            mock
        };
        mock.create_async().await;
    }

    let client = client_for(&server);
    let query = StatusQuery::new().with_services(["alpha", "beta", "gamma"]);
    let status = client.server_status(&query).await.unwrap();

    let keys: Vec<&String> = status.keys().collect();
    assert_eq!(keys, vec!["alpha", "gamma"]);
}

#[tokio::test]
async fn write_then_verify_round_trip_passes() {
    let mut server = Server::new_async().await;
    let patch_mock = server
        .mock("PATCH", "/stream/upstreams/app/servers/0")
        .match_body(Matcher::Json(json!({"down": true})))
        .with_status(200)
        .create_async()
        .await;
    server
        .mock("GET", "/stream/upstreams/app/servers/")
        .with_status(200)
        .with_body(json!([{"id": 0, "server": "10.0.0.1:80", "down": true}]).to_string())
        .create_async()
        .await;

    let client = client_for(&server);
    let patch = AttributePatch::from_pairs([("down", "true")]);
    let report = client
        .set_server_attributes("app", &patch, Some(0))
        .await
        .unwrap();

    assert!(report.all_verified());
    patch_mock.assert_async().await;
}

#[tokio::test]
async fn verify_mismatch_fails_the_call() {
    let mut server = Server::new_async().await;
    server
        .mock("PATCH", "/stream/upstreams/app/servers/0")
        .with_status(200)
        .create_async()
        .await;
    // Backend accepted the write but still reports the old value.
    server
        .mock("GET", "/stream/upstreams/app/servers/")
        .with_status(200)
        .with_body(json!([{"id": 0, "server": "10.0.0.1:80", "down": false}]).to_string())
        .create_async()
        .await;

    let client = client_for(&server);
    let patch = AttributePatch::from_pairs([("down", "true")]);
    let report = client
        .set_server_attributes("app", &patch, Some(0))
        .await
        .unwrap();

    assert!(!report.all_verified());
}

#[tokio::test]
async fn rejected_patch_fails_without_verification() {
    let mut server = Server::new_async().await;
    server
        .mock("PATCH", "/stream/upstreams/app/servers/0")
        .with_status(405)
        .create_async()
        .await;

    let client = client_for(&server);
    let patch = AttributePatch::from_pairs([("weight", "5")]);
    let report = client
        .set_server_attributes("app", &patch, Some(0))
        .await
        .unwrap();

    assert!(!report.all_verified());
}

#[tokio::test]
async fn unknown_server_id_counts_as_failed_verification() {
    let mut server = Server::new_async().await;
    server
        .mock("PATCH", "/stream/upstreams/app/servers/7")
        .with_status(200)
        .create_async()
        .await;
    server
        .mock("GET", "/stream/upstreams/app/servers/")
        .with_status(200)
        .with_body(json!([{"id": 0, "server": "10.0.0.1:80", "down": false}]).to_string())
        .create_async()
        .await;

    let client = client_for(&server);
    let patch = AttributePatch::from_pairs([("down", "true")]);
    let report = client
        .set_server_attributes("app", &patch, Some(7))
        .await
        .unwrap();

    assert!(!report.all_verified());
}

#[tokio::test]
async fn invalid_attribute_is_never_sent() {
    let mut server = Server::new_async().await;
    // The mock only matches a body with the recognized attribute alone, so a
    // leaked "bogus" key would show up as an unmatched request.
    let patch_mock = server
        .mock("PATCH", "/stream/upstreams/app/servers/0")
        .match_body(Matcher::Json(json!({"down": true})))
        .with_status(200)
        .create_async()
        .await;
    server
        .mock("GET", "/stream/upstreams/app/servers/")
        .with_status(200)
        .with_body(json!([{"id": 0, "server": "10.0.0.1:80", "down": true}]).to_string())
        .create_async()
        .await;

    let client = client_for(&server);
    let patch = AttributePatch::from_pairs([("down", "true"), ("bogus", "1")]);
    assert_eq!(patch.fields(), vec![ServerAttr::Down]);

    let report = client
        .set_server_attributes("app", &patch, Some(0))
        .await
        .unwrap();
    assert!(report.all_verified());
    patch_mock.assert_async().await;
}

#[tokio::test]
async fn patch_without_explicit_id_targets_every_server() {
    let mut server = Server::new_async().await;
    let body = json!([
        {"id": 0, "server": "10.0.0.1:80", "down": true},
        {"id": 2, "server": "10.0.0.2:80", "down": true}
    ])
    .to_string();
    server
        .mock("GET", "/stream/upstreams/app/servers/")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;
    let patch_0 = server
        .mock("PATCH", "/stream/upstreams/app/servers/0")
        .with_status(200)
        .create_async()
        .await;
    let patch_2 = server
        .mock("PATCH", "/stream/upstreams/app/servers/2")
        .with_status(200)
        .create_async()
        .await;

    let client = client_for(&server);
    let patch = AttributePatch::from_pairs([("down", "true")]);
    let report = client
        .set_server_attributes("app", &patch, None)
        .await
        .unwrap();

    assert!(report.all_verified());
    assert_eq!(report.outcomes.len(), 2);
    patch_0.assert_async().await;
    patch_2.assert_async().await;
}

#[tokio::test]
async fn set_fails_when_servers_cannot_be_enumerated() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/stream/upstreams/app/servers/")
        .with_status(500)
        .create_async()
        .await;

    let client = client_for(&server);
    let patch = AttributePatch::from_pairs([("down", "true")]);
    let report = client
        .set_server_attributes("app", &patch, None)
        .await
        .unwrap();

    // Nothing was applied, so zero outcomes must not read as success.
    assert!(report.outcomes.is_empty());
    assert!(!report.all_verified());
}

#[tokio::test]
async fn set_on_an_empty_service_succeeds_vacuously() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/stream/upstreams/app/servers/")
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;

    let client = client_for(&server);
    let patch = AttributePatch::from_pairs([("down", "true")]);
    let report = client
        .set_server_attributes("app", &patch, None)
        .await
        .unwrap();

    assert!(report.outcomes.is_empty());
    assert!(report.all_verified());
}

#[tokio::test]
async fn server_index_applies_only_to_a_single_service() {
    let mut server = Server::new_async().await;
    let body = json!([
        {"id": 0, "server": "10.0.0.1:80", "down": false},
        {"id": 1, "server": "10.0.0.2:80", "down": false}
    ])
    .to_string();
    for service in ["alpha", "beta"] {
        server
            .mock("GET", format!("/stream/upstreams/{service}/servers/").as_str())
            .with_status(200)
            .with_body(body.clone())
            .create_async()
            .await;
    }

    let client = client_for(&server);

    // Two services: the restriction is ignored, every server comes back.
    let query = StatusQuery::new()
        .with_services(["alpha", "beta"])
        .with_server_index(1);
    let status = client.server_status(&query).await.unwrap();
    assert_eq!(status["alpha"].len(), 2);
    assert_eq!(status["beta"].len(), 2);

    // One service: only the second record survives.
    let query = StatusQuery::new()
        .with_services(["alpha"])
        .with_server_index(1);
    let status = client.server_status(&query).await.unwrap();
    let ids: Vec<u64> = status["alpha"].keys().copied().collect();
    assert_eq!(ids, vec![1]);
}

#[tokio::test]
async fn keyval_zone_reads_as_string_map() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/stream/keyvals/los")
        .with_status(200)
        .with_body(json!({"a.example": "7001", "b.example": "7000"}).to_string())
        .create_async()
        .await;

    let client = client_for(&server);
    let keyvals = client.stream_keyvals("los").await.unwrap();
    assert_eq!(keyvals["a.example"], "7001");
    assert_eq!(keyvals["b.example"], "7000");
}

#[tokio::test]
async fn keyval_failure_returns_empty_map() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/stream/keyvals/los")
        .with_status(404)
        .create_async()
        .await;

    let client = client_for(&server);
    assert!(client.stream_keyvals("los").await.unwrap().is_empty());
}
