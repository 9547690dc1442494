use synctool_cloud::CloudError;

#[test]
fn remote_error_display() {
    let err = CloudError::Remote("bucket not found".into());
    assert_eq!(err.to_string(), "remote operation failed: bucket not found");
}

#[test]
fn secret_not_found_display() {
    let err = CloudError::SecretNotFound("obj-7".into());
    assert_eq!(err.to_string(), "no secret available for object obj-7");
}

#[test]
fn pass_in_progress_display() {
    assert_eq!(
        CloudError::PassInProgress.to_string(),
        "a sync pass is already running for this root"
    );
}

#[test]
fn already_initialized_display() {
    let err = CloudError::AlreadyInitialized("/data".into());
    assert_eq!(err.to_string(), "sync root already initialized: /data");
}

#[test]
fn snapshot_not_found_display() {
    let err = CloudError::SnapshotNotFound(1_700_000_000_000);
    assert_eq!(err.to_string(), "no snapshot with timestamp 1700000000000");
}

#[test]
fn driver_stopped_display() {
    assert_eq!(CloudError::DriverStopped.to_string(), "sync driver is not running");
}

#[test]
fn io_error_converts() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err: CloudError = io.into();
    assert!(matches!(err, CloudError::Io(_)));
    assert_eq!(err.to_string(), "I/O error: denied");
}

#[test]
fn serde_error_converts() {
    let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
    let err: CloudError = json_err.into();
    assert!(matches!(err, CloudError::Serialization(_)));
    assert!(err.to_string().starts_with("serialization error: "));
}

#[test]
fn storage_error_converts() {
    let storage = synctool_storage::StorageError::ExportTargetExists("/tmp/x.table".into());
    let err: CloudError = storage.into();
    assert_eq!(
        err.to_string(),
        "storage error: export target already exists: /tmp/x.table"
    );
}

#[test]
fn crypto_error_converts() {
    let crypto = synctool_crypto::CryptoError::Encryption("bad key".into());
    let err: CloudError = crypto.into();
    assert_eq!(err.to_string(), "crypto error: encryption failed: bad key");
}

#[tokio::test]
async fn join_error_converts() {
    let handle = tokio::spawn(async { panic!("boom") });
    let err: CloudError = handle.await.unwrap_err().into();
    assert!(matches!(err, CloudError::TaskJoin(_)));
}
