//! Integration tests for out-of-band table notifications.

use strata_catalog::CatalogError;
use strata_catalog::notification::{NotificationRequest, NotificationType, TableUpdateNotification};
use strata_catalog::resolver::ResolutionMode;
use strata_core::{Namespace, TableIdent};
use strata_test_utils::{TestCatalog, view_metadata};

fn request(kind: NotificationType, metadata_location: &str) -> NotificationRequest {
    NotificationRequest {
        notification_type: kind,
        payload: Some(TableUpdateNotification {
            table_name: "t".to_string(),
            timestamp: 1_700_000_000_000,
            table_uuid: None,
            metadata_location: metadata_location.to_string(),
        }),
    }
}

async fn pointer(tc: &TestCatalog, ident: &TableIdent) -> Option<String> {
    tc.services
        .resolver
        .resolve_table_like("warehouse", ident, None, ResolutionMode::Passthrough)
        .await
        .expect("resolve")
        .and_then(|p| p.leaf().and_then(|e| e.metadata_location().map(str::to_string)))
}

/// Create adds missing namespaces, update moves the pointer, drop removes
/// the record.
#[tokio::test]
async fn test_notification_lifecycle() {
    let tc = TestCatalog::new().await;
    let session = tc.session().await;
    let ident = TableIdent::from_dotted("x.y.t");

    let v1 = "s3://bucket/x/y/t/metadata/v1.metadata.json";
    assert!(
        session
            .send_notification(&ident, &request(NotificationType::Create, v1))
            .await
            .expect("create")
    );
    assert!(session.namespace_exists(&Namespace::from_dotted("x")).await.expect("x"));
    assert!(session.namespace_exists(&Namespace::from_dotted("x.y")).await.expect("x.y"));
    assert_eq!(pointer(&tc, &ident).await.as_deref(), Some(v1));

    let v2 = "s3://bucket/x/y/t/metadata/v2.metadata.json";
    assert!(
        session
            .send_notification(&ident, &request(NotificationType::Update, v2))
            .await
            .expect("update")
    );
    assert_eq!(pointer(&tc, &ident).await.as_deref(), Some(v2));

    let drop = NotificationRequest {
        notification_type: NotificationType::Drop,
        payload: None,
    };
    assert!(session.send_notification(&ident, &drop).await.expect("drop"));
    assert!(pointer(&tc, &ident).await.is_none());
    assert!(!session.send_notification(&ident, &drop).await.expect("drop again"));

    // Notifications never touch object storage.
    assert_eq!(tc.storage.put_count(), 0);
}

#[tokio::test]
async fn test_notification_outside_boundary_is_forbidden() {
    let tc = TestCatalog::new().await;
    let ident = TableIdent::from_dotted("x.t");

    let err = tc
        .session()
        .await
        .send_notification(
            &ident,
            &request(NotificationType::Create, "s3://elsewhere/x/t/metadata/v1.metadata.json"),
        )
        .await
        .expect_err("outside boundary");
    assert!(matches!(err, CatalogError::Forbidden { .. }), "{err:?}");
    assert!(pointer(&tc, &ident).await.is_none());
}

#[tokio::test]
async fn test_notification_without_payload_is_rejected() {
    let tc = TestCatalog::new().await;
    let err = tc
        .session()
        .await
        .send_notification(
            &TableIdent::from_dotted("x.t"),
            &NotificationRequest {
                notification_type: NotificationType::Update,
                payload: None,
            },
        )
        .await
        .expect_err("no payload");
    assert_eq!(err.http_status(), 400);
}

#[tokio::test]
async fn test_notification_does_not_replace_a_view() {
    let tc = TestCatalog::new().await;
    tc.create_namespace("x").await;
    let session = tc.session().await;
    let ident = TableIdent::from_dotted("x.v");
    session
        .create_table_like(&ident, view_metadata("s3://bucket/x/v"))
        .await
        .expect("create view");

    let err = session
        .send_notification(
            &ident,
            &request(NotificationType::Create, "s3://bucket/x/v/metadata/v1.metadata.json"),
        )
        .await
        .expect_err("view holds the name");
    assert_eq!(err.to_string(), "View already exists: x.v");
}
