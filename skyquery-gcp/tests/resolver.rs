//! Lazy per-connection client resolution.

use skyquery_gcp::{
    CancellationToken, ConnectionManager, ErrorKind, GcpConnectionConfig, PROJECT_CACHE_KEY,
    QueryContext, ServiceKind,
};
use skyquery_testing::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_second_resolution_returns_same_client() {
    let conn = test_connection("gcp");
    let ctx = QueryContext::new();

    let first = conn.compute(&ctx).await.unwrap();
    let second = conn.compute(&ctx).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(conn.cache().keys(), vec!["ComputeService"]);
}

#[tokio::test]
async fn test_factory_runs_once_per_connection() {
    let conn = test_connection("gcp");
    let factory = CountingFactory::new("FakeService", |n| format!("client #{}", n));
    let ctx = QueryContext::new();

    for _ in 0..5 {
        let client = conn.resolve(&ctx, &factory).await.unwrap();
        assert_eq!(client.as_str(), "client #1");
    }
    assert_eq!(factory.call_count(), 1);
}

#[tokio::test]
async fn test_every_api_has_its_own_slot() {
    let conn = test_connection("gcp");
    let ctx = QueryContext::new();

    conn.cloud_resource_manager(&ctx).await.unwrap();
    conn.compute_beta(&ctx).await.unwrap();
    conn.compute(&ctx).await.unwrap();
    conn.cloud_functions(&ctx).await.unwrap();
    conn.iam(&ctx).await.unwrap();
    conn.logging(&ctx).await.unwrap();
    conn.monitoring(&ctx).await.unwrap();
    conn.pubsub(&ctx).await.unwrap();
    conn.service_usage(&ctx).await.unwrap();
    conn.storage(&ctx).await.unwrap();

    let mut expected: Vec<_> = ServiceKind::ALL.iter().map(|k| k.cache_key()).collect();
    expected.sort();
    assert_eq!(conn.cache().keys(), expected);
}

#[tokio::test]
async fn test_evicting_one_api_leaves_others() {
    let conn = test_connection("gcp");
    let ctx = QueryContext::new();

    let compute = conn.compute(&ctx).await.unwrap();
    let storage = conn.storage(&ctx).await.unwrap();

    assert!(conn.cache().evict("ComputeService"));
    assert!(!conn.cache().contains("ComputeService"));
    assert!(Arc::ptr_eq(&storage, &conn.storage(&ctx).await.unwrap()));

    let rebuilt = conn.compute(&ctx).await.unwrap();
    assert!(!Arc::ptr_eq(&compute, &rebuilt));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_use_constructs_once() {
    let conn = Arc::new(test_connection("gcp"));
    let factory = CountingFactory::new("FakeService", |n| n).with_delay(Duration::from_millis(50));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let conn = conn.clone();
        let factory = factory.clone();
        tasks.push(tokio::spawn(async move {
            conn.resolve(&QueryContext::new(), &factory).await
        }));
    }

    let mut clients = Vec::new();
    for task in tasks {
        clients.push(task.await.unwrap().unwrap());
    }

    assert_eq!(factory.call_count(), 1);
    assert!(clients.iter().all(|c| Arc::ptr_eq(c, &clients[0])));
}

#[tokio::test]
async fn test_failure_is_not_cached() {
    let conn = test_connection("gcp");
    let factory = CountingFactory::new("FakeService", |n| n).fail_first(1);
    let ctx = QueryContext::new();

    let err = conn.resolve(&ctx, &factory).await.unwrap_err();
    assert_eq!(err.service(), Some("FakeService"));
    assert_eq!(err.kind(), ErrorKind::Construction);
    assert!(err.to_string().contains(INJECTED_FAILURE));
    assert!(!conn.cache().contains("FakeService"));

    let client = conn.resolve(&ctx, &factory).await.unwrap();
    assert_eq!(*client, 2);
    assert_eq!(factory.call_count(), 2);
}

#[tokio::test]
async fn test_connections_do_not_share_clients() {
    let prod = test_connection("prod");
    let dev = test_connection("dev");
    let factory = CountingFactory::new("FakeService", |n| n);
    let ctx = QueryContext::new();

    let a = prod.resolve(&ctx, &factory).await.unwrap();
    let b = dev.resolve(&ctx, &factory).await.unwrap();

    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(factory.call_count(), 2);
}

#[tokio::test]
async fn test_session_carries_connection_project() {
    let conn = ConnectionManager::new(
        "analytics",
        token_config().project("analytics-prod").build(),
    )
    .unwrap();
    let factory = CountingFactory::new("FakeService", |n| n);

    conn.resolve(&QueryContext::new(), &factory).await.unwrap();
    assert_eq!(
        factory.session_projects(),
        vec![Some("analytics-prod".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_deadline_during_construction_leaves_cache_empty() {
    let conn = test_connection("gcp");
    let factory = CountingFactory::new("FakeService", |n| n).with_delay(Duration::from_secs(10));

    let ctx = QueryContext::with_timeout(Duration::from_millis(50));
    let err = conn.resolve(&ctx, &factory).await.unwrap_err();
    assert!(err.is_cancellation());
    assert_eq!(err.service(), Some("FakeService"));
    assert!(conn.cache().is_empty());

    let client = conn.resolve(&QueryContext::new(), &factory).await.unwrap();
    assert_eq!(*client, 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_construction_leaves_cache_empty() {
    let conn = test_connection("gcp");
    let factory = CountingFactory::new("FakeService", |n| n).with_delay(Duration::from_secs(10));

    let token = CancellationToken::new();
    let ctx = QueryContext::with_cancellation(token.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
    });

    let err = conn.resolve(&ctx, &factory).await.unwrap_err();
    assert!(err.is_cancellation());
    assert!(!conn.cache().contains("FakeService"));
    assert_eq!(factory.call_count(), 1);
}

#[tokio::test]
async fn test_cached_client_ignores_cancelled_context() {
    let conn = test_connection("gcp");
    let first = conn.compute(&QueryContext::new()).await.unwrap();

    let ctx = QueryContext::new();
    ctx.cancel();
    let second = conn.compute(&ctx).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let err = conn.storage(&ctx).await.unwrap_err();
    assert!(err.is_cancellation());
}

#[tokio::test]
async fn test_unreadable_credentials_fail_construction() {
    let config = GcpConnectionConfig::builder()
        .project("p")
        .credentials("/nonexistent/skyquery/key.json")
        .build();
    let conn = ConnectionManager::new("broken", config).unwrap();

    let err = conn.compute(&QueryContext::new()).await.unwrap_err();
    assert_eq!(err.service(), Some("ComputeService"));
    assert!(err.is_configuration());
    assert!(conn.cache().is_empty());
}

#[tokio::test]
async fn test_project_is_cached() {
    let conn = test_connection("gcp");
    let ctx = QueryContext::new();

    let project = conn.project(&ctx).await.unwrap();
    assert_eq!(project.as_str(), TEST_PROJECT);
    assert!(conn.cache().contains(PROJECT_CACHE_KEY));
    assert!(Arc::ptr_eq(&project, &conn.project(&ctx).await.unwrap()));
}

#[tokio::test]
async fn test_type_mismatch_on_shared_key() {
    let conn = test_connection("gcp");
    let ctx = QueryContext::new();

    conn.resolve(&ctx, &CountingFactory::new("FakeService", |n| n))
        .await
        .unwrap();
    let err = conn
        .resolve(&ctx, &CountingFactory::new("FakeService", |n| n.to_string()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}

#[tokio::test]
async fn test_credentials_file_fixed_after_failure() {
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("key.json");
    let config = GcpConnectionConfig::builder()
        .credentials(key_path.to_string_lossy().into_owned())
        .build();
    let conn = ConnectionManager::new("gcp", config).unwrap();
    let ctx = QueryContext::new();

    let err = conn.compute(&ctx).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(conn.cache().is_empty());

    std::fs::write(&key_path, service_account_json("from-key")).unwrap();

    let compute = conn.compute(&ctx).await.unwrap();
    assert!(conn.cache().contains("ComputeService"));
    assert!(Arc::ptr_eq(&compute, &conn.compute(&ctx).await.unwrap()));

    let project = conn.project(&ctx).await.unwrap();
    assert_eq!(project.as_str(), "from-key");
}

#[tokio::test]
async fn test_inline_credentials_json() {
    let config = GcpConnectionConfig::builder()
        .credentials(service_account_json("inline-project"))
        .build();
    let conn = ConnectionManager::new("gcp", config).unwrap();

    let project = conn.project(&QueryContext::new()).await.unwrap();
    assert_eq!(project.as_str(), "inline-project");
}
