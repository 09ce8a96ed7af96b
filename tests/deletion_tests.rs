#[path = "test_utils/mod.rs"]
mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use provisioner::cluster::ClusterError;
use provisioner::error::ServiceError;
use provisioner::repositories::StoreRepository;
use provisioner::service::CreateStoreRequest;
use test_utils::{
    InstallBehavior, NamespaceDeleteBehavior, app_sharing, eventually, messages_oldest_first,
    test_app, test_config,
};
use tokio::sync::Semaphore;

fn request(name: &str) -> CreateStoreRequest {
    CreateStoreRequest {
        name: name.to_string(),
        engine: "medusa".to_string(),
        owner_id: None,
    }
}

#[tokio::test]
async fn deletes_release_namespace_and_record() -> Result<()> {
    let (app, cluster, _db) = test_app(test_config()).await?;

    let created = app.service().create_store(request("Going Away")).await?;
    let store_id = created.store.id.clone();
    created.submission.wait().await;

    app.service().delete_store(&store_id).await?;

    assert!(!cluster.has_release(&store_id));
    assert!(!cluster.has_namespace(&store_id));
    assert_eq!(cluster.uninstall_calls(), vec![store_id.clone()]);
    assert!(matches!(
        app.service().get(&store_id).await,
        Err(ServiceError::NotFound(_))
    ));

    let events = app.service().events(&store_id, None).await?;
    let messages = messages_oldest_first(&events);
    let tail = &messages[messages.len() - 5..];
    assert_eq!(
        tail,
        [
            "Deleting store resources...",
            "Uninstalling Helm release...",
            "Helm release uninstalled",
            "Deleting namespace (this may take 30-60 seconds)...",
            "Namespace deletion initiated successfully",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn namespace_removed_out_of_band_still_deletes_record() -> Result<()> {
    let (app, cluster, _db) = test_app(test_config()).await?;

    let created = app.service().create_store(request("Orphan")).await?;
    let store_id = created.store.id.clone();
    created.submission.wait().await;

    cluster.forget_namespace(&store_id);
    app.service().delete_store(&store_id).await?;

    let events = app.service().events(&store_id, None).await?;
    assert_eq!(events[0].event_type, "INFO");
    assert_eq!(events[0].message, "Namespace already deleted");
    assert!(matches!(
        app.service().get(&store_id).await,
        Err(ServiceError::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn missing_release_does_not_block_deletion() -> Result<()> {
    let (app, cluster, _db) = test_app(test_config()).await?;

    let created = app.service().create_store(request("No Release")).await?;
    let store_id = created.store.id.clone();
    created.submission.wait().await;

    cluster.forget_release(&store_id);
    app.service().delete_store(&store_id).await?;

    let events = app.service().events(&store_id, None).await?;
    let messages = messages_oldest_first(&events);
    assert!(messages.contains(&"Helm release uninstalled".to_string()));
    assert_eq!(events[0].message, "Namespace deletion initiated successfully");
    Ok(())
}

#[tokio::test]
async fn slow_namespace_deletion_is_a_warning() -> Result<()> {
    let mut config = test_config();
    config.provisioning.namespace_delete_timeout_seconds = 1;
    let (app, cluster, _db) = test_app(config).await?;

    let created = app.service().create_store(request("Slow")).await?;
    let store_id = created.store.id.clone();
    created.submission.wait().await;

    cluster.set_namespace_delete_behavior(NamespaceDeleteBehavior::Hang);
    app.service().delete_store(&store_id).await?;

    let events = app.service().events(&store_id, None).await?;
    assert_eq!(events[0].event_type, "WARNING");
    assert_eq!(
        events[0].message,
        "Namespace deletion initiated but may take time to complete"
    );
    assert!(app.service().list(None).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn namespace_deletion_error_is_recorded() -> Result<()> {
    let (app, cluster, _db) = test_app(test_config()).await?;

    let created = app.service().create_store(request("Forbidden")).await?;
    let store_id = created.store.id.clone();
    created.submission.wait().await;

    cluster.set_namespace_delete_behavior(NamespaceDeleteBehavior::Fail(ClusterError::unknown(
        "namespaces is forbidden (status 403)",
    )));
    app.service().delete_store(&store_id).await?;

    let events = app.service().events(&store_id, None).await?;
    assert_eq!(events[0].event_type, "ERROR");
    assert_eq!(
        events[0].message,
        "Error deleting namespace: namespaces is forbidden (status 403)"
    );
    assert!(matches!(
        app.service().get(&store_id).await,
        Err(ServiceError::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn deleting_unknown_store_is_not_found() -> Result<()> {
    let (app, cluster, _db) = test_app(test_config()).await?;

    let err = app
        .service()
        .delete_store("ffffffff")
        .await
        .expect_err("unknown store must fail");

    assert!(matches!(err, ServiceError::NotFound(id) if id == "ffffffff"));
    assert!(cluster.uninstall_calls().is_empty());
    assert!(app.service().events("ffffffff", None).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn deleting_a_store_mid_install_cancels_it_before_teardown() -> Result<()> {
    let (app, cluster, _db) = test_app(test_config()).await?;
    let gate = Arc::new(Semaphore::new(0));
    cluster.set_install_behavior(InstallBehavior::Gated(Arc::clone(&gate)));

    let created = app.service().create_store(request("Half Built")).await?;
    let store_id = created.store.id.clone();
    eventually(|| async { cluster.install_calls().len() == 1 }).await?;

    app.service().delete_store(&store_id).await?;
    assert!(!app.provisioner().is_in_flight(&store_id).await);

    gate.add_permits(1);
    created.submission.wait().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!cluster.has_release(&store_id));
    assert!(!cluster.has_namespace(&store_id));
    assert_eq!(cluster.install_calls().len(), 1);
    assert!(matches!(
        app.service().get(&store_id).await,
        Err(ServiceError::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn deletion_from_another_app_waits_for_the_running_install() -> Result<()> {
    let config = test_config();
    let (worker, cluster, db) = test_app(config.clone()).await?;
    let other = app_sharing(config, &db, &cluster);
    let gate = Arc::new(Semaphore::new(0));
    cluster.set_install_behavior(InstallBehavior::Gated(Arc::clone(&gate)));

    let created = worker.service().create_store(request("Raced")).await?;
    let store_id = created.store.id.clone();
    eventually(|| async { cluster.install_calls().len() == 1 }).await?;

    let (deleted, ()) = tokio::join!(other.service().delete_store(&store_id), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        gate.add_permits(1);
    });
    deleted?;
    created.submission.wait().await;

    assert!(!cluster.has_release(&store_id));
    assert!(!cluster.has_namespace(&store_id));
    assert!(matches!(
        worker.service().get(&store_id).await,
        Err(ServiceError::NotFound(_))
    ));

    let events = worker.service().events(&store_id, None).await?;
    let messages = messages_oldest_first(&events);
    let installed = messages
        .iter()
        .position(|m| m == "Helm installation completed");
    let teardown = messages
        .iter()
        .position(|m| m == "Deleting store resources...");
    assert!(installed.is_some());
    assert!(installed < teardown);
    Ok(())
}

#[tokio::test]
async fn install_finishing_after_its_record_is_gone_removes_its_resources() -> Result<()> {
    let (app, cluster, db) = test_app(test_config()).await?;
    let gate = Arc::new(Semaphore::new(0));
    cluster.set_install_behavior(InstallBehavior::Gated(Arc::clone(&gate)));

    let created = app.service().create_store(request("Vanished")).await?;
    let store_id = created.store.id.clone();
    eventually(|| async { cluster.install_calls().len() == 1 }).await?;

    assert!(StoreRepository::new(db.clone()).delete(&store_id).await?);
    gate.add_permits(1);
    created.submission.wait().await;

    assert!(!cluster.has_release(&store_id));
    assert!(!cluster.has_namespace(&store_id));

    let events = app.service().events(&store_id, None).await?;
    assert!(events.iter().any(|e| e.event_type == "WARNING"
        && e.message == "Store was deleted during provisioning, removing its resources"));
    assert_eq!(events[0].message, "Namespace deletion initiated successfully");
    Ok(())
}
