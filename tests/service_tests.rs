#[path = "test_utils/mod.rs"]
mod test_utils;

use anyhow::Result;
use provisioner::error::ServiceError;
use provisioner::models::store::StoreStatus;
use provisioner::models::store_event::EventType;
use provisioner::repositories::StoreEventRepository;
use provisioner::service::CreateStoreRequest;
use test_utils::{test_app, test_config};
use uuid::Uuid;

fn request(name: &str, engine: &str, owner_id: Option<Uuid>) -> CreateStoreRequest {
    CreateStoreRequest {
        name: name.to_string(),
        engine: engine.to_string(),
        owner_id,
    }
}

#[tokio::test]
async fn unsupported_engine_creates_nothing() -> Result<()> {
    let (app, cluster, _db) = test_app(test_config()).await?;

    let err = app
        .service()
        .create_store(request("Shop", "magento", None))
        .await
        .expect_err("unknown engine must fail");

    assert!(matches!(err, ServiceError::UnsupportedEngine(ref engine) if engine == "magento"));
    assert!(app.service().list(None).await?.is_empty());
    assert!(cluster.install_calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn blank_name_is_rejected() -> Result<()> {
    let (app, _cluster, _db) = test_app(test_config()).await?;

    let err = app
        .service()
        .create_store(request("   ", "woocommerce", None))
        .await
        .expect_err("blank name must fail");

    assert!(matches!(err, ServiceError::Validation(_)));
    assert!(app.service().list(None).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn engine_slug_is_normalized_and_first_event_recorded() -> Result<()> {
    let (app, _cluster, _db) = test_app(test_config()).await?;

    let created = app
        .service()
        .create_store(request("Medusa Shop", "Medusa", None))
        .await?;
    let store_id = created.store.id.clone();

    assert_eq!(created.store.engine, "medusa");
    assert_eq!(created.store.lifecycle(), StoreStatus::Provisioning);
    assert_eq!(store_id.len(), 8);
    created.submission.wait().await;

    let events = app.service().events(&store_id, None).await?;
    let first = events.last().expect("creation event recorded");
    assert_eq!(first.event_type, "INFO");
    assert_eq!(first.message, "Store creation initiated for Medusa Shop using medusa");
    Ok(())
}

#[tokio::test]
async fn owner_quota_is_enforced_per_owner() -> Result<()> {
    let mut config = test_config();
    config.provisioning.max_stores_per_owner = 2;
    let (app, _cluster, _db) = test_app(config).await?;
    let owner = Uuid::new_v4();
    let other = Uuid::new_v4();

    for name in ["A", "B"] {
        let created = app
            .service()
            .create_store(request(name, "woocommerce", Some(owner)))
            .await?;
        created.submission.wait().await;
    }

    let err = app
        .service()
        .create_store(request("C", "woocommerce", Some(owner)))
        .await
        .expect_err("third store for owner must fail");
    assert!(matches!(err, ServiceError::QuotaExceeded { limit: 2 }));

    let created = app
        .service()
        .create_store(request("D", "woocommerce", Some(other)))
        .await?;
    created.submission.wait().await;

    for name in ["E", "F", "G"] {
        let created = app
            .service()
            .create_store(request(name, "woocommerce", None))
            .await?;
        created.submission.wait().await;
    }

    assert_eq!(app.service().list(Some(owner)).await?.len(), 2);
    assert_eq!(app.service().list(None).await?.len(), 6);
    Ok(())
}

#[tokio::test]
async fn zero_quota_disables_the_limit() -> Result<()> {
    let mut config = test_config();
    config.provisioning.max_stores_per_owner = 0;
    let (app, _cluster, _db) = test_app(config).await?;
    let owner = Uuid::new_v4();

    for name in ["A", "B", "C", "D"] {
        let created = app
            .service()
            .create_store(request(name, "woocommerce", Some(owner)))
            .await?;
        created.submission.wait().await;
    }

    assert_eq!(app.service().list(Some(owner)).await?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn missing_store_is_not_found() -> Result<()> {
    let (app, _cluster, _db) = test_app(test_config()).await?;

    let err = app
        .service()
        .get("00000000")
        .await
        .expect_err("missing store");
    assert_eq!(err.to_string(), "store '00000000' not found");
    Ok(())
}

#[tokio::test]
async fn events_default_to_one_hundred_newest() -> Result<()> {
    let (app, _cluster, db) = test_app(test_config()).await?;
    let events = StoreEventRepository::new(db);

    for i in 0..120 {
        events
            .append("0badf00d", EventType::Info, &format!("event {i}"))
            .await?;
    }

    let listed = app.service().events("0badf00d", None).await?;
    assert_eq!(listed.len(), 100);
    assert_eq!(listed[0].message, "event 119");
    assert_eq!(listed[99].message, "event 20");

    let limited = app.service().events("0badf00d", Some(5)).await?;
    assert_eq!(limited.len(), 5);
    Ok(())
}
