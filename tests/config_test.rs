//! Tests for configuration loading and backend construction

use std::sync::Arc;

use trueno_labdb::storage::{BlobStore, Compression, StorageKind};
use trueno_labdb::store::MemoryBucket;
use trueno_labdb::{Error, LabConfig, LabDb};

#[test]
fn test_save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("labdb.json");
    let config = LabConfig {
        large_file_storage: StorageKind::Local,
        local_file_storage_path: Some(dir.path().join("objects")),
        compression: Compression::Zstd,
        ..LabConfig::default()
    };
    config.save(&file).unwrap();
    assert_eq!(LabConfig::load(&file).unwrap(), config);
}

#[test]
fn test_load_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = LabConfig::load(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn test_malformed_json_is_config_error() {
    let err = LabConfig::from_json_str("{\"large_file_storage\": \"s3\"}").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_zero_chunk_size_rejected() {
    let config = LabConfig {
        chunk_size_bytes: 0,
        ..LabConfig::default()
    };
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn test_build_each_backend() {
    let dir = tempfile::tempdir().unwrap();
    let cases = [
        (r#"{}"#.to_string(), StorageKind::None),
        (r#"{"large_file_storage": "content"}"#.to_string(), StorageKind::Content),
        (
            format!(
                r#"{{"large_file_storage": "local", "local_file_storage_path": {:?}}}"#,
                dir.path().join("objects").display().to_string()
            ),
            StorageKind::Local,
        ),
    ];
    for (json, kind) in cases {
        let config = LabConfig::from_json_str(&json).unwrap();
        let backend = config.build_backend(Arc::new(MemoryBucket::new())).unwrap();
        assert_eq!(backend.kind(), kind);
    }
    assert!(dir.path().join("objects").is_dir());
}

#[test]
fn test_uncompressed_config_stores_raw() {
    let config = LabConfig::from_json_str(
        r#"{"large_file_storage": "content", "compress_arrays": false}"#,
    )
    .unwrap();
    let db = LabDb::from_config(&config).unwrap();
    let mut logger = db.logger("/").unwrap();
    logger.new_experiment(None).unwrap();
    logger.log_data("w", vec![1.0, 2.0]).unwrap();

    let node = db.store().find_by_path("/1").unwrap().unwrap();
    let reference =
        trueno_labdb::value::LargeValueRef::from_document_value(&node.data()["w"]).unwrap();
    assert!(!reference.token().is_compressed());
    assert_eq!(db.backend().get(reference.token()).unwrap().len(), 16);
}
