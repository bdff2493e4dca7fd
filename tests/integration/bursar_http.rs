use hpc_grants::config::{AuthMethod, AuthSettings, BursarSettings};
use hpc_grants::registry::{
    AccountingBackend, BackendQuery, BursarBackend, GrantRegistryClient, RegistryError,
};
use hpc_grants::Scope;
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(url: &str) -> (BursarSettings, AuthSettings) {
    let bursar = BursarSettings {
        url: url.to_string(),
        cert_path: None,
        user: "plgalice".into(),
        timeout_ms: 2_000,
    };
    let auth = AuthSettings {
        method: AuthMethod::Static,
        munge_binary: "munge".into(),
        static_token: Some("tok".into()),
    };
    (bursar, auth)
}

/// The blocking client must live and die outside the async runtime.
async fn query(url: String, query: BackendQuery) -> Result<Value, RegistryError> {
    tokio::task::spawn_blocking(move || {
        let (bursar, auth) = settings(&url);
        BursarBackend::new(&bursar, &auth)?.query(&query)
    })
    .await
    .expect("blocking task panicked")
}

fn grants_payload() -> Value {
    json!({
        "groups": [{"name": "plggalpha", "members": ["plgalice"]}],
        "grants": [{
            "name": "grant-alpha",
            "leader": "Dr. Kowalska",
            "status": "active",
            "start": "2026-01-01",
            "end": "2026-12-31",
            "group": "plggalpha",
            "allocations": [
                {"name": "alpha-storage", "resource": "storage", "parameters": {"capacity": 5}}
            ]
        }]
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn admin_listing_sends_credential_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/admin/grants_group_info/"))
        .and(header("x-auth-hpcbursar", "tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(grants_payload()))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/api/v1", server.uri());
    let grants = tokio::task::spawn_blocking(move || {
        let (bursar, auth) = settings(&url);
        let backend = BursarBackend::new(&bursar, &auth).unwrap();
        GrantRegistryClient::new(Arc::new(backend)).fetch(&Scope::All)
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].id, "grant-alpha");
    assert_eq!(grants[0].pi.as_deref(), Some("Dr. Kowalska"));
    assert_eq!(grants[0].projects, vec!["plggalpha".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn user_listing_hits_user_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/user/grants_info/plgalice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let body = query(
        format!("{}/api/v1/", server.uri()),
        BackendQuery::UserGrants("plgalice".into()),
    )
    .await
    .unwrap();
    assert_eq!(body, json!([]));
}

#[tokio::test(flavor = "multi_thread")]
async fn forbidden_is_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let err = query(format!("{}/api/v1/", server.uri()), BackendQuery::AllGrants)
        .await
        .unwrap_err();
    match err {
        RegistryError::Unauthorized { endpoint } => {
            assert!(endpoint.ends_with("/api/v1/admin/grants_group_info/"));
        }
        other => panic!("expected Unauthorized, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn server_error_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = query(format!("{}/api/v1/", server.uri()), BackendQuery::AllGrants)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidResponse { .. }), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn non_json_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = query(format!("{}/api/v1/", server.uri()), BackendQuery::AllGrants)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidResponse { .. }), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_connection_is_backend_unavailable() {
    let err = query("http://127.0.0.1:1/api/v1/".into(), BackendQuery::AllGrants)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::BackendUnavailable { .. }), "{err:?}");
}
