use serde_json::json;
use std::{io::Cursor, sync::Arc};
use swift_gateway::{
    config::StoreConfig,
    services::{
        store::{PutOptions, StoreConnection, StoreError},
        swift::{SwiftConnection, build_http_client},
    },
};
use tokio::io::AsyncReadExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn connection(pairs: &[(&str, String)]) -> SwiftConnection {
    let pairs: Vec<(String, String)> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    let config = StoreConfig::from_lookup(move |key| {
        pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    });
    let client = build_http_client(&config).unwrap();
    SwiftConnection::new(Arc::new(config), client)
}

fn v1_connection(server: &MockServer) -> SwiftConnection {
    connection(&[
        ("SWIFT_AUTH_VERSION", "1".into()),
        ("SWIFT_AUTH_URL", format!("{}/auth/v1.0", server.uri())),
        ("SWIFT_USERNAME", "test:tester".into()),
        ("SWIFT_PASSWORD", "testing".into()),
    ])
}

async fn mount_v1_auth(server: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/auth/v1.0"))
        .and(header("x-auth-user", "test:tester"))
        .and(header("x-auth-key", "testing"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Auth-Token", "tok-1")
                .insert_header("X-Storage-Url", format!("{}/v1/AUTH_test", server.uri()).as_str()),
        )
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn v1_auth_then_stream_nested_object() {
    let server = MockServer::start().await;
    mount_v1_auth(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/v1/AUTH_test/test/docs/2025/a.txt"))
        .and(header("x-auth-token", "tok-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Etag", "5d41402abc4b2a76b9719d911017c592")
                .set_body_string("hello"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut conn = v1_connection(&server);
    assert!(!conn.authenticated());
    conn.authenticate().await.unwrap();
    assert!(conn.authenticated());
    // Cached session: no second call to the auth endpoint.
    conn.authenticate().await.unwrap();

    let (mut reader, info) = conn.object_open("test", "docs/2025/a.txt").await.unwrap();
    let mut body = String::new();
    reader.read_to_string(&mut body).await.unwrap();

    assert_eq!(body, "hello");
    assert_eq!(info.content_length, Some(5));
    assert_eq!(info.etag.as_deref(), Some("5d41402abc4b2a76b9719d911017c592"));
}

#[tokio::test]
async fn missing_object_maps_to_not_found() {
    let server = MockServer::start().await;
    mount_v1_auth(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/v1/AUTH_test/test/nope.bin"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mut conn = v1_connection(&server);
    conn.authenticate().await.unwrap();
    let err = conn.object_open("test", "nope.bin").await.err().unwrap();
    match err {
        StoreError::NotFound { container, object } => {
            assert_eq!(container, "test");
            assert_eq!(object, "nope.bin");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn rejected_token_triggers_reauthentication() {
    let server = MockServer::start().await;
    mount_v1_auth(&server, 2).await;
    Mock::given(method("GET"))
        .and(path("/v1/AUTH_test/test/a.txt"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/AUTH_test/test/a.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fresh"))
        .expect(1)
        .mount(&server)
        .await;

    let mut conn = v1_connection(&server);
    conn.authenticate().await.unwrap();
    let (mut reader, _) = conn.object_open("test", "a.txt").await.unwrap();
    let mut body = String::new();
    reader.read_to_string(&mut body).await.unwrap();
    assert_eq!(body, "fresh");
}

#[tokio::test]
async fn bad_credentials_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/v1.0"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let mut conn = v1_connection(&server);
    let err = conn.authenticate().await.unwrap_err();
    assert!(matches!(err, StoreError::Auth(_)));
    assert!(!conn.authenticated());
}

#[tokio::test]
async fn unavailable_auth_service_is_retried_three_times() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/v1.0"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let mut conn = v1_connection(&server);
    let err = conn.authenticate().await.unwrap_err();
    assert!(matches!(err, StoreError::Status { .. }));
}

#[tokio::test]
async fn v3_auth_scopes_project_and_reads_catalog() {
    let server = MockServer::start().await;
    let expires_at = (chrono::Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
    Mock::given(method("POST"))
        .and(path("/v3/auth/tokens"))
        .and(body_partial_json(json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": { "user": {
                        "name": "alice",
                        "password": "secret",
                        "domain": { "name": "Default" }
                    }}
                },
                "scope": { "project": { "name": "demo", "domain": { "name": "Default" } } }
            }
        })))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("X-Subject-Token", "v3-token")
                .set_body_json(json!({
                    "token": {
                        "expires_at": expires_at,
                        "catalog": [{
                            "type": "object-store",
                            "endpoints": [
                                { "interface": "public", "region": "Elsewhere", "url": "http://wrong.invalid/v1/AUTH_x" },
                                { "interface": "public", "region": "RegionOne", "url": format!("{}/swift/v1/AUTH_demo", server.uri()) }
                            ]
                        }]
                    }
                })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/swift/v1/AUTH_demo/test/report.pdf"))
        .and(header("x-auth-token", "v3-token"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 1024]))
        .expect(1)
        .mount(&server)
        .await;

    let mut conn = connection(&[
        ("SWIFT_AUTH_URL", format!("{}/v3", server.uri())),
        ("SWIFT_USERNAME", "alice".into()),
        ("SWIFT_PASSWORD", "secret".into()),
        ("SWIFT_DOMAIN", "Default".into()),
        ("SWIFT_TENANT", "demo".into()),
        ("SWIFT_REGION", "RegionOne".into()),
    ]);
    conn.authenticate().await.unwrap();
    let session = conn.session().unwrap();
    assert!(session.expires_at.is_some());
    assert!(session.storage_url.ends_with("/swift/v1/AUTH_demo"));

    let (mut reader, _) = conn.object_open("test", "report.pdf").await.unwrap();
    let mut body = Vec::new();
    reader.read_to_end(&mut body).await.unwrap();
    assert_eq!(body.len(), 1024);
}

#[tokio::test]
async fn put_sends_checksum_and_returns_etag() {
    let server = MockServer::start().await;
    mount_v1_auth(&server, 1).await;
    let etag = format!("{:x}", md5::compute(b"payload"));
    Mock::given(method("PUT"))
        .and(path("/v1/AUTH_test/uploads/2025/payload.bin"))
        .and(header("x-auth-token", "tok-1"))
        .and(header("etag", etag.as_str()))
        .and(header("x-detect-content-type", "true"))
        .respond_with(ResponseTemplate::new(201).insert_header("Etag", etag.as_str()))
        .expect(1)
        .mount(&server)
        .await;

    let mut conn = v1_connection(&server);
    conn.authenticate().await.unwrap();
    let returned = conn
        .object_put(
            "uploads",
            "2025/payload.bin",
            Box::new(Cursor::new(b"payload".to_vec())),
            PutOptions {
                content_length: Some(7),
                etag: Some(etag.clone()),
                content_type: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(returned, etag);

    let requests = server.received_requests().await.unwrap();
    let put = requests
        .iter()
        .find(|r| r.method.as_str() == "PUT")
        .unwrap();
    assert_eq!(put.body, b"payload");
}

#[tokio::test]
async fn checksum_rejection_surfaces_as_status_error() {
    let server = MockServer::start().await;
    mount_v1_auth(&server, 1).await;
    Mock::given(method("PUT"))
        .and(path("/v1/AUTH_test/uploads/bad.bin"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;

    let mut conn = v1_connection(&server);
    conn.authenticate().await.unwrap();
    let err = conn
        .object_put(
            "uploads",
            "bad.bin",
            Box::new(Cursor::new(b"corrupt".to_vec())),
            PutOptions {
                etag: Some("00000000000000000000000000000000".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Status { status, .. } if status.as_u16() == 422));
}
