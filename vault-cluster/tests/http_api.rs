//! HTTP client integration tests.
//!
//! These run the reconciler over [`HttpControlPlane`] against a local
//! imitation of the REST API.

mod common;

use std::sync::Arc;
use std::time::Duration;

use vault_cluster::clients::{ClientError, ClusterRef, ControlPlane, ResourceKind};
use vault_cluster::config::{PollConfig, Timeouts};
use vault_cluster::{
    CallOptions, ClientConfig, ClusterRecord, ClusterSpec, ClusterState, Completion, Error,
    HttpControlPlane, ReconcilerConfig, VaultClusterReconciler,
};

fn client(server: &common::TestServer, token: &str) -> HttpControlPlane {
    HttpControlPlane::new(
        ClientConfig::new(common::ORG, common::PROJECT)
            .with_endpoint(server.endpoint())
            .with_token(token),
    )
    .unwrap()
}

fn reconciler(server: &common::TestServer) -> VaultClusterReconciler<HttpControlPlane> {
    VaultClusterReconciler::new(
        Arc::new(client(server, common::TOKEN)),
        ReconcilerConfig {
            timeouts: Timeouts {
                default: Duration::from_secs(10),
                create: Duration::from_secs(10),
                delete: Duration::from_secs(10),
            },
            poll: PollConfig {
                interval: Duration::from_millis(20),
                max_transient_errors: 2,
            },
        },
    )
}

fn cluster_ref(id: &str) -> ClusterRef {
    ClusterRef {
        project_id: common::PROJECT.to_string(),
        network_id: "hvn-1".to_string(),
        cluster_id: id.to_string(),
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_full_lifecycle() {
    let server = common::TestServer::spawn(&["hvn-1"]).await;
    server.with_state(|s| s.op_polls = 3);
    let reconciler = reconciler(&server);

    let record = ClusterRecord::new(ClusterSpec::new("prod-vault", "hvn-1").with_public_endpoint(true));
    let created = reconciler
        .create(&record, CallOptions::default())
        .await
        .unwrap();

    let observed = created.observed.as_ref().unwrap();
    assert_eq!(observed.state, ClusterState::Running);
    assert_eq!(observed.organization_id, common::ORG);
    assert_eq!(observed.project_id, common::PROJECT);
    assert_eq!(observed.cloud_provider, "aws");
    assert_eq!(
        observed.public_endpoint_url,
        "https://prod-vault.public.example:8200"
    );
    assert_eq!(
        observed.private_endpoint_url,
        "https://prod-vault.private.example:8200"
    );

    let read = reconciler
        .read(&created, CallOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read, created);

    reconciler
        .delete(&created, CallOptions::default())
        .await
        .unwrap();
    assert!(!server.has_cluster("prod-vault"));

    let gone = reconciler
        .read(&created, CallOptions::default())
        .await
        .unwrap();
    assert!(gone.is_none());

    server.shutdown();
}

#[tokio::test]
async fn test_private_cluster_has_no_public_url() {
    let server = common::TestServer::spawn(&["hvn-1"]).await;
    let reconciler = reconciler(&server);

    let created = reconciler
        .create(
            &ClusterRecord::new(ClusterSpec::new("prod-vault", "hvn-1")),
            CallOptions::default(),
        )
        .await
        .unwrap();

    assert!(created.observed.unwrap().public_endpoint_url.is_empty());
    server.shutdown();
}

#[tokio::test]
async fn test_create_conflict() {
    let server = common::TestServer::spawn(&["hvn-1"]).await;
    let reconciler = reconciler(&server);
    let record = ClusterRecord::new(ClusterSpec::new("prod-vault", "hvn-1"));

    reconciler
        .create(&record, CallOptions::default())
        .await
        .unwrap();
    let err = reconciler
        .create(&record, CallOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Conflict(_)));
    assert_eq!(server.with_state(|s| s.cluster_posts), 2);
    server.shutdown();
}

#[tokio::test]
async fn test_create_in_unknown_network() {
    let server = common::TestServer::spawn(&[]).await;
    let reconciler = reconciler(&server);

    let err = reconciler
        .create(
            &ClusterRecord::new(ClusterSpec::new("prod-vault", "hvn-1")),
            CallOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::NotFound {
            kind: ResourceKind::Network,
            ..
        }
    ));
    assert_eq!(server.with_state(|s| s.cluster_posts), 0);
    server.shutdown();
}

#[tokio::test]
async fn test_create_with_bad_token_is_not_done() {
    let server = common::TestServer::spawn(&["hvn-1"]).await;
    let reconciler = VaultClusterReconciler::new(
        Arc::new(client(&server, "wrong-token")),
        ReconcilerConfig::default(),
    );

    let err = reconciler
        .create(
            &ClusterRecord::new(ClusterSpec::new("prod-vault", "hvn-1")),
            CallOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Client {
            source: ClientError::Unauthorized(_),
            ..
        }
    ));
    assert_eq!(err.completion(), Completion::NotDone);
    assert_eq!(server.with_state(|s| s.cluster_posts), 0);
    server.shutdown();
}

#[tokio::test]
async fn test_create_refused_by_api_is_not_done() {
    let server = common::TestServer::spawn(&["hvn-1"]).await;
    server.with_state(|s| s.reject_cluster_posts = true);

    let err = reconciler(&server)
        .create(
            &ClusterRecord::new(ClusterSpec::new("prod-vault", "hvn-1")),
            CallOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Client {
            source: ClientError::Api { status: 400, .. },
            ..
        }
    ));
    assert_eq!(err.completion(), Completion::NotDone);
    assert_eq!(server.with_state(|s| s.cluster_posts), 1);
    assert!(!server.has_cluster("prod-vault"));
    server.shutdown();
}

#[tokio::test]
async fn test_delete_absent_cluster() {
    let server = common::TestServer::spawn(&["hvn-1"]).await;
    let reconciler = reconciler(&server);

    reconciler
        .delete(
            &ClusterRecord::new(ClusterSpec::new("prod-vault", "hvn-1")),
            CallOptions::default(),
        )
        .await
        .unwrap();
    server.shutdown();
}

// =============================================================================
// Client behaviour
// =============================================================================

#[tokio::test]
async fn test_get_cluster_retries_transient_errors() {
    let server = common::TestServer::spawn(&["hvn-1"]).await;
    reconciler(&server)
        .create(
            &ClusterRecord::new(ClusterSpec::new("prod-vault", "hvn-1")),
            CallOptions::default(),
        )
        .await
        .unwrap();
    server.with_state(|s| {
        s.cluster_gets = 0;
        s.failing_cluster_gets = 2;
    });

    let snapshot = client(&server, common::TOKEN)
        .get_cluster(&cluster_ref("prod-vault"))
        .await
        .unwrap();

    assert_eq!(snapshot.state, ClusterState::Running);
    assert_eq!(server.with_state(|s| s.cluster_gets), 3);
    server.shutdown();
}

#[tokio::test]
async fn test_get_cluster_gives_up_after_read_attempts() {
    let server = common::TestServer::spawn(&["hvn-1"]).await;
    server.with_state(|s| s.failing_cluster_gets = 10);

    let err = client(&server, common::TOKEN)
        .get_cluster(&cluster_ref("prod-vault"))
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert_eq!(server.with_state(|s| s.cluster_gets), 3);
    server.shutdown();
}

#[tokio::test]
async fn test_get_cluster_distinguishes_missing_network() {
    let server = common::TestServer::spawn(&["hvn-1"]).await;
    let client = client(&server, common::TOKEN);

    let err = client.get_cluster(&cluster_ref("prod-vault")).await.unwrap_err();
    assert!(err.is_cluster_not_found());

    let mut elsewhere = cluster_ref("prod-vault");
    elsewhere.network_id = "hvn-9".to_string();
    let err = client.get_cluster(&elsewhere).await.unwrap_err();
    assert_eq!(
        err,
        ClientError::NotFound {
            kind: ResourceKind::Network,
            id: "hvn-9".to_string()
        }
    );
    server.shutdown();
}

#[tokio::test]
async fn test_bad_token_is_unauthorized() {
    let server = common::TestServer::spawn(&["hvn-1"]).await;

    let err = client(&server, "wrong-token")
        .get_cluster(&cluster_ref("prod-vault"))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Unauthorized(msg) if msg == "invalid token"));
    // Not retried
    assert_eq!(server.with_state(|s| s.cluster_gets), 1);
    server.shutdown();
}

#[tokio::test]
async fn test_default_location_comes_from_config() {
    let server = common::TestServer::spawn(&[]).await;
    let location = client(&server, common::TOKEN).default_location();
    assert_eq!(location.organization_id, common::ORG);
    assert_eq!(location.project_id, common::PROJECT);
    server.shutdown();
}
