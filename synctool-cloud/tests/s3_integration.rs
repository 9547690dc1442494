//! End-to-end tests for S3Gateway against a real MinIO.
//!
//! Requires: `docker compose -f docker-compose.test.yml up -d`, then
//! `cargo test -p synctool-cloud --test s3_integration -- --ignored`.

use pretty_assertions::assert_eq;
use serial_test::serial;
use std::sync::Arc;
use synctool_cloud::{
    CloudError, MemoryKeyring, Reconciler, RemoteConfig, RemoteGateway, S3Gateway,
    SnapshotManager, TransferEngine,
};
use synctool_storage::StateStore;

const MINIO_ENDPOINT: &str = "http://localhost:9000";

async fn minio_gateway(dir: &std::path::Path) -> S3Gateway {
    let credentials_path = dir.join("minio-credentials.json");
    std::fs::write(
        &credentials_path,
        r#"{ "access_key_id": "minioadmin", "secret_access_key": "minioadmin" }"#,
    )
    .unwrap();
    S3Gateway::connect(&RemoteConfig {
        endpoint_url: Some(MINIO_ENDPOINT.into()),
        region: "us-east-1".into(),
        credentials_path: Some(credentials_path),
    })
    .await
    .unwrap()
}

#[tokio::test]
#[ignore]
#[serial]
async fn upload_download_delete_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(minio_gateway(dir.path()).await);
    let engine = TransferEngine::new(
        gateway.clone(),
        Arc::new(MemoryKeyring::new()),
        dir.path().join("staging"),
    );

    let container = gateway.create_container().await.unwrap();
    let source = dir.path().join("payload.bin");
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();
    std::fs::write(&source, &payload).unwrap();

    let uploaded = engine.upload(&container, &source).await.unwrap();
    let restored = dir.path().join("restored.bin");
    engine
        .download(&container, &uploaded.remote_object_id, &restored)
        .await
        .unwrap();
    assert_eq!(std::fs::read(&restored).unwrap(), payload);

    engine.delete(&container, &uploaded.remote_object_id).await.unwrap();
    let err = gateway
        .get_object_stream(&container, &uploaded.remote_object_id, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
#[ignore]
#[serial]
async fn sync_snapshot_and_restore_a_tree() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("root");
    std::fs::create_dir_all(root.join("docs/deep")).unwrap();
    std::fs::write(root.join("top.txt"), b"top").unwrap();
    std::fs::write(root.join("docs/deep/leaf.txt"), b"leaf").unwrap();

    let gateway = Arc::new(minio_gateway(dir.path()).await);
    let transfer = Arc::new(TransferEngine::new(
        gateway,
        Arc::new(MemoryKeyring::new()),
        root.join(".synctool/staging"),
    ));
    let store = StateStore::open(&root.join(".synctool/state")).unwrap();
    let reconciler = Reconciler::new(root.clone(), store.clone(), transfer.clone());
    let snapshots = SnapshotManager::new(store, transfer, root.join(".synctool/snapshots"));

    let report = reconciler.first_sync().await.unwrap();
    assert_eq!(report.uploaded, 2);
    assert_eq!(report.created_dirs, 3);

    let info = snapshots.snapshot().await.unwrap();
    let restore_dir = dir.path().join("restored");
    let restored = snapshots
        .restore_snapshot(info.timestamp, &restore_dir)
        .await
        .unwrap();

    assert_eq!(restored.restored, 2);
    assert_eq!(std::fs::read(restore_dir.join("docs/deep/leaf.txt")).unwrap(), b"leaf");
}
