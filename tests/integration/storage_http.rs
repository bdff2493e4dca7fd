use hpc_grants::storage::{HttpQuotaBackend, StorageBackend, StorageError, StorageUsageClient};
use hpc_grants::ProjectUsage;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn usage(base: String, project: &'static str) -> Result<ProjectUsage, StorageError> {
    tokio::task::spawn_blocking(move || {
        let backend = HttpQuotaBackend::new(&base).unwrap();
        StorageUsageClient::new(Arc::new(backend), Duration::from_secs(2)).fetch(project)
    })
    .await
    .unwrap()
}

async fn enumerate(base: String) -> Result<Option<Vec<String>>, StorageError> {
    tokio::task::spawn_blocking(move || {
        HttpQuotaBackend::new(&base)
            .unwrap()
            .enumerate_projects(Duration::from_secs(2))
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn usage_is_read_from_project_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/plggalpha"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "project": "plggalpha",
            "quota_bytes": 2048,
            "used_bytes": 512,
            "updated_at": "2026-10-17T08:00:00Z"
        })))
        .mount(&server)
        .await;

    let usage = usage(server.uri(), "plggalpha").await.unwrap();
    assert_eq!(usage.project, "plggalpha");
    assert_eq!(usage.quota_bytes, Some(2048));
    assert_eq!(usage.used_bytes, 512);
    assert_eq!(usage.usage_fraction(), Some(0.25));
    assert_eq!(usage.updated_at.to_rfc3339(), "2026-10-17T08:00:00+00:00");
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_quota_is_unlimited() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/plggbeta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"used_bytes": 7})))
        .mount(&server)
        .await;

    let usage = usage(format!("{}/", server.uri()), "plggbeta").await.unwrap();
    assert_eq!(usage.quota_bytes, None);
    assert_eq!(usage.usage_fraction(), None);
    assert!(!usage.is_over_quota());
}

#[tokio::test(flavor = "multi_thread")]
async fn not_found_is_unknown_project() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = usage(server.uri(), "plggghost").await.unwrap_err();
    assert!(matches!(err, StorageError::UnknownProject(ref p) if p == "plggghost"), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn answer_for_another_project_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/plggalpha"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"project": "plggbeta", "used_bytes": 1})),
        )
        .mount(&server)
        .await;

    let err = usage(server.uri(), "plggalpha").await.unwrap_err();
    assert!(matches!(err, StorageError::Unparseable { .. }), "{err:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn enumeration_accepts_names_and_objects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            "plggbeta",
            {"project": "plggalpha"},
            "plggbeta"
        ])))
        .mount(&server)
        .await;

    let projects = enumerate(server.uri()).await.unwrap();
    assert_eq!(
        projects,
        Some(vec!["plggalpha".to_string(), "plggbeta".to_string()])
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn enumeration_not_supported_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .respond_with(ResponseTemplate::new(501))
        .mount(&server)
        .await;

    assert_eq!(enumerate(server.uri()).await.unwrap(), None);
}
