//! Integration tests for the metadata commit protocol.
//!
//! These tests drive refresh and commit through a catalog session over
//! in-memory collaborators and check the compare-and-swap laws, location
//! validation, and scoped client handling.

use std::collections::BTreeMap;

use strata_catalog::metadata::TableLikeKind;
use strata_catalog::operations::{OperationState, WRITE_DATA_PATH};
use strata_catalog::resolver::ResolutionMode;
use strata_catalog::{CatalogError, MetadataSnapshot};
use strata_core::{ProviderError, TableIdent};
use strata_test_utils::{TestCatalog, init_test_logging, table_metadata, view_metadata};

const LOCATION: &str = "s3://bucket/a/b/t";

async fn stored_pointer(tc: &TestCatalog, ident: &TableIdent) -> Option<String> {
    tc.services
        .resolver
        .resolve_table_like("warehouse", ident, None, ResolutionMode::Passthrough)
        .await
        .expect("resolve")
        .and_then(|path| path.leaf().and_then(|e| e.metadata_location().map(str::to_string)))
}

async fn create_table(tc: &TestCatalog, ident: &TableIdent) -> MetadataSnapshot {
    tc.session()
        .await
        .create_table_like(ident, table_metadata(LOCATION))
        .await
        .expect("create table")
}

#[tokio::test]
async fn test_end_to_end_create_commit_and_stale_commit() {
    init_test_logging();
    let tc = TestCatalog::new().await;
    tc.create_namespace("a.b").await;
    let session = tc.session().await;
    let ident = TableIdent::from_dotted("a.b.t");

    let p1 = session
        .create_table_like(&ident, table_metadata(LOCATION))
        .await
        .expect("create");
    assert!(p1.pointer.starts_with("s3://bucket/a/b/t/metadata/00000-"));
    assert_eq!(stored_pointer(&tc, &ident).await.as_deref(), Some(p1.pointer.as_str()));

    let p2 = session
        .commit_table_like(&ident, &p1, table_metadata(LOCATION))
        .await
        .expect("commit on p1");
    assert!(p2.pointer.starts_with("s3://bucket/a/b/t/metadata/00001-"));
    assert_eq!(stored_pointer(&tc, &ident).await.as_deref(), Some(p2.pointer.as_str()));

    let err = session
        .commit_table_like(&ident, &p1, table_metadata(LOCATION))
        .await
        .expect_err("stale base");
    let CatalogError::Conflict {
        base,
        attempted,
        actual,
        ..
    } = &err
    else {
        panic!("expected conflict, got {err:?}");
    };
    assert_eq!(base.as_deref(), Some(p1.pointer.as_str()));
    assert_eq!(actual.as_deref(), Some(p2.pointer.as_str()));
    assert_eq!(err.http_status(), 409);

    // The losing commit's metadata file is removed and the pointer is unchanged.
    assert!(!tc.storage.locations().await.contains(attempted));
    let loaded = session
        .load_table_like(&ident, TableLikeKind::Table)
        .await
        .expect("load");
    assert_eq!(loaded.pointer, p2.pointer);
}

#[tokio::test]
async fn test_create_over_existing_record_is_already_exists() {
    let tc = TestCatalog::new().await;
    tc.create_namespace("a.b").await;
    let ident = TableIdent::from_dotted("a.b.t");
    let p1 = create_table(&tc, &ident).await;

    let err = tc
        .session()
        .await
        .create_table_like(&ident, table_metadata(LOCATION))
        .await
        .expect_err("exists");
    assert!(matches!(err, CatalogError::AlreadyExists { .. }), "{err:?}");
    assert_eq!(stored_pointer(&tc, &ident).await.as_deref(), Some(p1.pointer.as_str()));
}

#[tokio::test]
async fn test_update_of_dropped_table_is_not_found() {
    let tc = TestCatalog::new().await;
    tc.create_namespace("a.b").await;
    let ident = TableIdent::from_dotted("a.b.t");
    let p1 = create_table(&tc, &ident).await;
    let session = tc.session().await;
    assert!(session.drop_table(&ident, false).await.expect("drop").dropped);

    let err = session
        .commit_table_like(&ident, &p1, table_metadata(LOCATION))
        .await
        .expect_err("gone");
    assert_eq!(err.error_type(), "NoSuchTableException");
}

#[tokio::test]
async fn test_successful_commit_changes_only_the_pointer() {
    let tc = TestCatalog::new().await;
    tc.create_namespace("a.b").await;
    let ident = TableIdent::from_dotted("a.b.t");
    let p1 = create_table(&tc, &ident).await;

    let resolve = || async {
        tc.services
            .resolver
            .resolve_table_like("warehouse", &ident, None, ResolutionMode::Passthrough)
            .await
            .expect("resolve")
            .and_then(|p| p.leaf().cloned())
            .expect("present")
    };
    let before = resolve().await;
    tc.session()
        .await
        .commit_table_like(&ident, &p1, table_metadata(LOCATION))
        .await
        .expect("commit");
    let after = resolve().await;

    assert_eq!(after.id, before.id);
    assert_eq!(after.name, before.name);
    assert_eq!(after.properties, before.properties);
    assert_eq!(after.entity_version, before.entity_version + 1);
    let mut expected = before.internal_properties.clone();
    expected.insert(
        strata_core::entity::keys::METADATA_LOCATION.to_string(),
        after.metadata_location().expect("pointer").to_string(),
    );
    assert_eq!(after.internal_properties, expected);
}

#[tokio::test]
async fn test_concurrent_commits_on_one_base_have_one_winner() {
    let tc = TestCatalog::new().await;
    tc.create_namespace("a.b").await;
    let ident = TableIdent::from_dotted("a.b.t");
    let p1 = create_table(&tc, &ident).await;
    let first = tc.session().await;
    let second = tc.session().await;

    let (a, b) = tokio::join!(
        first.commit_table_like(&ident, &p1, table_metadata(LOCATION)),
        second.commit_table_like(&ident, &p1, table_metadata(LOCATION)),
    );
    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        outcomes
            .iter()
            .any(|r| matches!(r, Err(CatalogError::Conflict { .. })))
    );
}

#[tokio::test]
async fn test_cross_kind_identifiers_are_exclusive() {
    let tc = TestCatalog::new().await;
    tc.create_namespace("a.b").await;
    let session = tc.session().await;
    let table = TableIdent::from_dotted("a.b.t");
    let view = TableIdent::from_dotted("a.b.v");
    create_table(&tc, &table).await;
    session
        .create_table_like(&view, view_metadata("s3://bucket/a/b/v"))
        .await
        .expect("create view");

    let err = session
        .create_table_like(&table, view_metadata(LOCATION))
        .await
        .expect_err("table holds the name");
    assert_eq!(err.to_string(), "Table already exists: a.b.t");

    let err = session
        .create_table_like(&view, table_metadata("s3://bucket/a/b/v"))
        .await
        .expect_err("view holds the name");
    assert_eq!(err.to_string(), "View already exists: a.b.v");
}

#[tokio::test]
async fn test_location_outside_boundary_writes_nothing() {
    let tc = TestCatalog::new().await;
    tc.create_namespace("a.b").await;
    let session = tc.session().await;
    let ident = TableIdent::from_dotted("a.b.t");

    for location in ["s3://other-bucket/a/b/t", "file:///tmp/a/b/t", "s3://bucketeer/t"] {
        let err = session
            .create_table_like(&ident, table_metadata(location))
            .await
            .expect_err("outside boundary");
        assert!(matches!(err, CatalogError::Forbidden { .. }), "{location}: {err:?}");
        assert!(err.to_string().contains(location));
    }

    let mut metadata = table_metadata(LOCATION);
    if let strata_catalog::metadata::MetadataObject::Table(t) = &mut metadata {
        t.properties
            .insert(WRITE_DATA_PATH.to_string(), "s3://elsewhere/data".to_string());
    }
    let err = session
        .create_table_like(&ident, metadata)
        .await
        .expect_err("data path outside boundary");
    assert!(matches!(err, CatalogError::Forbidden { .. }));

    assert_eq!(tc.storage.put_count(), 0);
    assert_eq!(tc.issuer.calls(), 0);
    assert!(stored_pointer(&tc, &ident).await.is_none());
}

#[tokio::test]
async fn test_create_in_missing_namespace_is_not_found() {
    let tc = TestCatalog::new().await;
    let err = tc
        .session()
        .await
        .create_table_like(&TableIdent::from_dotted("nope.t"), table_metadata("s3://bucket/nope/t"))
        .await
        .expect_err("no namespace");
    assert_eq!(err.error_type(), "NoSuchNamespaceException");
    assert_eq!(tc.storage.put_count(), 0);
}

#[tokio::test]
async fn test_commit_uses_scoped_credentials_and_releases_clients() {
    let tc = TestCatalog::new().await;
    tc.create_namespace("a.b").await;
    let ident = TableIdent::from_dotted("a.b.t");
    create_table(&tc, &ident).await;

    let requests = tc.issuer.requests();
    assert_eq!(requests.len(), 1);
    let (entity_id, scope) = &requests[0];
    assert_eq!(*entity_id, tc.catalog.id.get());
    assert!(scope.write_locations.contains(LOCATION));

    let opened = tc.factory.opened_with().expect("props");
    assert_eq!(
        opened[0].get("s3.access-key-id").map(String::as_str),
        Some("key-1")
    );

    // Failed commits release their client too.
    let _ = tc
        .session()
        .await
        .create_table_like(&ident, table_metadata(LOCATION))
        .await;
    assert_eq!(tc.factory.opened(), tc.factory.closed());
}

#[tokio::test]
async fn test_refresh_retries_transient_read_failures() {
    let tc = TestCatalog::new().await;
    tc.create_namespace("a.b").await;
    let ident = TableIdent::from_dotted("a.b.t");
    let p1 = create_table(&tc, &ident).await;

    tc.storage
        .inject_failures(&p1.pointer, 3, ProviderError::retryable("SlowDown"));
    tc.storage.clear_operations();
    let loaded = tc
        .session()
        .await
        .load_table_like(&ident, TableLikeKind::Table)
        .await
        .expect("load after retries");
    assert_eq!(loaded.pointer, p1.pointer);
    assert_eq!(tc.storage.operations().len(), 4);
}

#[tokio::test]
async fn test_refresh_does_not_retry_access_denied() {
    let tc = TestCatalog::new().await;
    tc.create_namespace("a.b").await;
    let ident = TableIdent::from_dotted("a.b.t");
    let p1 = create_table(&tc, &ident).await;

    tc.storage
        .inject_failures(&p1.pointer, 1, ProviderError::access_denied("Access Denied"));
    tc.storage.clear_operations();
    let session = tc.session().await;
    assert!(session.load_table_like(&ident, TableLikeKind::Table).await.is_err());
    assert_eq!(tc.storage.operations().len(), 1);

    session
        .load_table_like(&ident, TableLikeKind::Table)
        .await
        .expect("second load succeeds");
}

#[tokio::test]
async fn test_refresh_stops_after_observing_no_pointer() {
    let tc = TestCatalog::new().await;
    tc.create_namespace("a.b").await;
    let ident = TableIdent::from_dotted("a.b.t");
    let session = tc.session().await;

    let mut ops = session.operations(ident.clone(), TableLikeKind::Table);
    assert_eq!(ops.state(), OperationState::New);
    assert!(ops.refresh().await.expect("refresh").is_none());
    assert_eq!(ops.state(), OperationState::Refreshed);

    create_table(&tc, &ident).await;
    assert!(ops.refresh().await.expect("refresh").is_none());

    let committed = ops
        .commit(None, table_metadata(LOCATION))
        .await
        .expect_err("created by someone else");
    assert!(matches!(committed, CatalogError::AlreadyExists { .. }));
    assert_eq!(ops.state(), OperationState::Failed);
}

#[tokio::test]
async fn test_operation_states_follow_commit_outcome() {
    let tc = TestCatalog::new().await;
    tc.create_namespace("a.b").await;
    let ident = TableIdent::from_dotted("a.b.t");
    let session = tc.session().await;

    let mut ops = session.operations(ident.clone(), TableLikeKind::Table);
    let p1 = ops
        .commit(None, table_metadata(LOCATION))
        .await
        .expect("create");
    assert_eq!(ops.state(), OperationState::Committed);
    assert_eq!(ops.current(), Some(&p1));

    session
        .commit_table_like(&ident, &p1, table_metadata(LOCATION))
        .await
        .expect("concurrent writer");
    let mut stale = session.operations(ident, TableLikeKind::Table);
    assert!(stale.commit(Some(&p1), table_metadata(LOCATION)).await.is_err());
    assert_eq!(stale.state(), OperationState::Conflict);
}

#[tokio::test]
async fn test_default_location_is_used_when_none_given() {
    let tc = TestCatalog::new().await;
    tc.create_namespace("a.b").await;
    let ident = TableIdent::from_dotted("a.b.t");
    let created = tc
        .session()
        .await
        .create_table_like(&ident, table_metadata(""))
        .await
        .expect("create");
    assert_eq!(created.metadata.location(), "s3://bucket/warehouse/a/b/t");

    let props = BTreeMap::from([("owner".to_string(), "etl".to_string())]);
    let session = tc.session().await;
    session
        .set_namespace_properties(&ident.namespace, props.clone())
        .await
        .expect("set");
    assert_eq!(
        session
            .load_namespace_metadata(&ident.namespace)
            .await
            .expect("load"),
        props
    );
}
