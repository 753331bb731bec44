//! Tests for error types

use trueno_labdb::{Error, LabDb};

#[test]
fn test_not_found_error() {
    let error = Error::NotFound {
        path: "/proj/7".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("/proj/7"));
    assert!(error_str.contains("does not exist"));
    assert!(error.is_not_found());
}

#[test]
fn test_already_exists_error() {
    let error = Error::AlreadyExists {
        path: "/proj".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("/proj"));
    assert!(error_str.contains("already exists"));
    assert!(!error.is_not_found());
}

#[test]
fn test_invalid_path_error() {
    let error = Error::InvalidPath {
        path: "/A B".to_string(),
        reason: "path contains invalid characters".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Invalid path"));
    assert!(error_str.contains("\"/A B\""));
    assert!(error_str.contains("invalid characters"));
}

#[test]
fn test_unsupported_operation_error() {
    let error = Error::UnsupportedOperation("cannot store a 24-byte large value".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Unsupported operation"));
    assert!(error_str.contains("large_file_storage"));
}

#[test]
fn test_storage_error() {
    let error = Error::StorageError("disk full".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Storage error"));
    assert!(error_str.contains("disk full"));
}

#[test]
fn test_prefixed_messages() {
    let cases = [
        (Error::Conflict("x".into()), "Conflict: x"),
        (Error::Forbidden("x".into()), "Forbidden: x"),
        (Error::Precondition("x".into()), "Precondition failed: x"),
        (Error::Timeout("x".into()), "Timed out: x"),
        (Error::Config("x".into()), "Configuration error: x"),
        (Error::InvalidInput("x".into()), "Invalid input: x"),
    ];
    for (error, expected) in cases {
        assert_eq!(format!("{error}"), expected);
    }
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
}

#[test]
fn test_serde_error_conversion() {
    let serde_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: Error = serde_error.into();
    assert!(format!("{error}").contains("Serialization error"));
}

#[test]
fn test_error_debug() {
    let error = Error::Forbidden("the root directory / cannot be deleted".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("Forbidden"));
}

// ============================================================================
// Errors surfaced by operations
// ============================================================================

#[test]
fn test_operation_errors_name_the_path() {
    let db = LabDb::builder().build();
    let tree = db.tree();

    let err = tree.rm("/missing").unwrap_err();
    assert!(format!("{err}").contains("/missing"));

    tree.mkdir("/a", false).unwrap();
    let err = tree.mkdir("/a", false).unwrap_err();
    assert!(format!("{err}").contains("/a"));

    let err = tree.mv("/a", "/a/b").unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert!(format!("{err}").contains("/a/b"));
}

#[test]
fn test_escaping_path_is_invalid() {
    let db = LabDb::builder().build();
    let err = db.tree().mkdir("/../x", false).unwrap_err();
    assert!(matches!(err, Error::InvalidPath { .. }));
    assert!(format!("{err}").contains("escapes the root"));
}
