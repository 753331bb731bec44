//! Integration tests for the experiment logger and query façade

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use trueno_labdb::storage::StorageBackend;
use trueno_labdb::store::{Filter, FindOptions, MemoryBucket, Projection, Sort, SortOrder};
use trueno_labdb::value::{DType, LargeValueRef, OffloadPolicy};
use trueno_labdb::{DataValue, Error, LabDb, NdArray};

fn db() -> (LabDb, Arc<MemoryBucket>) {
    let bucket = Arc::new(MemoryBucket::new());
    let db = LabDb::builder()
        .backend(StorageBackend::content(bucket.clone()))
        .build();
    (db, bucket)
}

// ============================================================================
// Logger
// ============================================================================

#[test]
fn test_loss_scenario() {
    let (db, bucket) = db();
    db.tree().mkdir("/proj", false).unwrap();

    let mut logger = db.logger("/proj").unwrap();
    let path = logger.new_experiment(None).unwrap();
    assert_eq!(path, "/proj/1");
    assert_eq!(logger.current_experiment_path(), Some("/proj/1"));

    logger.log_data("loss", vec![0.9, 0.5, 0.1]).unwrap();

    // Stored as a reference, not inline.
    let node = db.store().find_by_path("/proj/1").unwrap().unwrap();
    assert!(LargeValueRef::from_document_value(&node.data()["loss"]).is_some());
    assert_eq!(bucket.object_count(), 1);

    let exp = db.query().get_experiment("/proj/1").unwrap();
    let loss = exp.get("loss").and_then(DataValue::as_array).unwrap();
    assert_eq!(loss.dtype(), DType::Float64);
    assert_eq!(loss.to_f64_vec(), vec![0.9, 0.5, 0.1]);
}

#[test]
fn test_log_data_round_trips_every_kind() {
    let (db, _) = db();
    db.tree().mkdir("/p", false).unwrap();
    let mut logger = db.logger("/p").unwrap();
    logger.new_experiment(Some("run")).unwrap();

    let matrix = NdArray::from(vec![1i32, 2, 3, 4, 5, 6]).reshape(vec![2, 3]).unwrap();
    let values: Vec<(&str, DataValue)> = vec![
        ("lr", DataValue::from(0.001)),
        ("epochs", DataValue::from(30i64)),
        ("tag", DataValue::from("baseline")),
        ("cfg", DataValue::from(json!({"layers": [64, 64], "dropout": null}))),
        ("weights", DataValue::from(vec![0.25f32, -1.5])),
        ("matrix", DataValue::from(matrix)),
        ("blob", DataValue::from(vec![0u8, 159, 255])),
    ];
    for (key, value) in &values {
        logger.log_data(key, value.clone()).unwrap();
    }

    let exp = db.query().get_experiment("/p/run").unwrap();
    for (key, value) in &values {
        assert_eq!(exp.get(key), Some(value), "{key}");
    }
}

#[test]
fn test_nested_arrays_are_stored_fetched_and_removed() {
    let (db, bucket) = db();
    db.tree().mkdir("/p", false).unwrap();
    let mut logger = db.logger("/p").unwrap();
    logger.new_experiment(None).unwrap();

    let layer = |w: Vec<f64>, b: Vec<f64>| {
        DataValue::from(BTreeMap::from([
            ("weights".to_string(), DataValue::from(w)),
            ("bias".to_string(), DataValue::from(b)),
        ]))
    };
    let model = DataValue::from(vec![layer(vec![0.1, 0.2], vec![0.0]), layer(vec![0.3], vec![1.0])]);
    logger.log_data("model", model.clone()).unwrap();
    assert_eq!(bucket.object_count(), 4);

    let exp = db.query().get_experiment("/p/1").unwrap();
    assert_eq!(exp.get("model"), Some(&model));

    // Overwriting drops every object of the old value.
    let smaller = DataValue::from(vec![layer(vec![0.5], vec![0.5])]);
    logger.log_data("model", smaller.clone()).unwrap();
    assert_eq!(bucket.object_count(), 2);
    assert_eq!(db.query().get_experiment("/p/1").unwrap().get("model"), Some(&smaller));

    db.tree().rm("/p").unwrap();
    assert_eq!(bucket.object_count(), 0);
}

#[test]
fn test_log_data_accepts_i32_arrays() {
    let (db, _) = db();
    db.tree().mkdir("/p", false).unwrap();
    let mut logger = db.logger("/p").unwrap();
    logger.new_experiment(None).unwrap();
    logger.log_data("labels", vec![3i32, 1, 2]).unwrap();
    let exp = db.query().get_experiment("/p/1").unwrap();
    let labels = exp.get("labels").and_then(DataValue::as_array).unwrap();
    assert_eq!(labels.dtype(), DType::Int32);
}

#[test]
fn test_large_json_offloaded_above_threshold() {
    let bucket = Arc::new(MemoryBucket::new());
    let db = LabDb::builder()
        .backend(StorageBackend::content(bucket.clone()))
        .policy(OffloadPolicy {
            inline_threshold_bytes: 64,
            compress: true,
        })
        .build();
    db.tree().mkdir("/p", false).unwrap();
    let mut logger = db.logger("/p").unwrap();
    logger.new_experiment(None).unwrap();

    let big = json!({"text": "x".repeat(200)});
    logger.log_data("small", json!(1)).unwrap();
    logger.log_data("big", big.clone()).unwrap();
    assert_eq!(bucket.object_count(), 1);

    let exp = db.query().get_experiment("/p/1").unwrap();
    assert_eq!(exp.get("big"), Some(&DataValue::Json(big)));
}

#[test]
fn test_disabled_backend_accepts_inline_only() {
    let db = LabDb::builder().build();
    db.tree().mkdir("/p", false).unwrap();
    let mut logger = db.logger("/p").unwrap();
    logger.new_experiment(None).unwrap();

    logger.log_data("acc", 0.93).unwrap();
    let err = logger.log_data("loss", vec![0.5]).unwrap_err();
    assert!(matches!(err, Error::UnsupportedOperation(_)));

    let exp = db.query().get_experiment("/p/1").unwrap();
    assert!(exp.get("loss").is_none());
    assert_eq!(exp.get("acc"), Some(&DataValue::from(0.93)));
}

#[test]
fn test_log_before_new_experiment_is_precondition() {
    let (db, _) = db();
    let logger = db.logger("/").unwrap();
    assert!(matches!(logger.log_data("k", 1i64), Err(Error::Precondition(_))));
    assert!(matches!(logger.log_note("k", "v"), Err(Error::Precondition(_))));
}

#[test]
fn test_logger_needs_existing_directory() {
    let (db, _) = db();
    assert!(db.logger("/missing").unwrap_err().is_not_found());
}

#[test]
fn test_notes_overwrite() {
    let (db, _) = db();
    let mut logger = db.logger("/").unwrap();
    logger.new_experiment(None).unwrap();
    logger.log_note("status", "running").unwrap();
    logger.log_note("status", "done").unwrap();

    let exp = db.query().get_experiment("/1").unwrap();
    assert_eq!(exp.note("status"), Some(&json!("done")));
}

#[test]
fn test_auto_name_skips_non_numeric_and_deleted() {
    let (db, _) = db();
    let tree = db.tree();
    tree.mkdir("/p/notes", true).unwrap();
    let mut logger = db.logger("/p").unwrap();
    logger.new_experiment(Some("baseline")).unwrap();
    assert_eq!(logger.new_experiment(None).unwrap(), "/p/1");
    assert_eq!(logger.new_experiment(None).unwrap(), "/p/2");
    tree.rm("/p/2").unwrap();
    assert_eq!(logger.new_experiment(None).unwrap(), "/p/2");
    tree.rm("/p/1").unwrap();
    assert_eq!(logger.new_experiment(None).unwrap(), "/p/3");
}

#[test]
fn test_rm_deletes_large_values() {
    let (db, bucket) = db();
    db.tree().mkdir("/p", false).unwrap();
    let mut logger = db.logger("/p").unwrap();
    for _ in 0..3 {
        logger.new_experiment(None).unwrap();
        logger.log_data("w", vec![1.0; 100]).unwrap();
    }
    assert_eq!(bucket.object_count(), 3);
    db.tree().rm("/p").unwrap();
    assert_eq!(bucket.object_count(), 0);
    assert_eq!(bucket.chunk_count(), 0);
}

// ============================================================================
// Query
// ============================================================================

fn populated() -> LabDb {
    let (db, _) = db();
    db.tree().mkdir("/runs/nested", true).unwrap();
    let mut logger = db.logger("/runs").unwrap();
    for (i, acc) in [0.7, 0.9, 0.8].into_iter().enumerate() {
        logger.new_experiment(None).unwrap();
        logger.log_data("acc", acc).unwrap();
        logger.log_note("seed", i).unwrap();
    }
    logger.cd("nested").unwrap();
    logger.new_experiment(None).unwrap();
    logger.log_data("acc", 0.95).unwrap();
    db
}

#[test]
fn test_get_experiments_direct_and_recursive() {
    let db = populated();
    let query = db.query();
    assert_eq!(query.get_experiments("/runs", false, &FindOptions::new()).unwrap().len(), 3);
    assert_eq!(query.get_experiments("/runs", true, &FindOptions::new()).unwrap().len(), 4);
    assert_eq!(query.count_experiments("/runs", true).unwrap(), 4);
    assert_eq!(query.count_experiments("/runs", false).unwrap(), 3);
}

#[test]
fn test_get_experiments_query_sort_limit() {
    let db = populated();
    let options = FindOptions::new()
        .filter(Filter::from_value(json!({"data.acc": {"$gt": 0.75}})).unwrap())
        .sort(Sort::by("data.acc", SortOrder::Descending))
        .limit(2);
    let found = db.query().get_experiments("/runs", true, &options).unwrap();
    let paths: Vec<_> = found.iter().map(|e| e.path().to_string()).collect();
    assert_eq!(paths, vec!["/runs/nested/1", "/runs/2"]);
}

#[test]
fn test_get_experiments_projection() {
    let db = populated();
    let options = FindOptions::new().projection(Projection::include(["notes.seed"]));
    let found = db.query().get_experiments("/runs", false, &options).unwrap();
    assert!(found.iter().all(|e| e.data().is_empty()));
    assert!(found.iter().all(|e| e.note("seed").is_some()));
}

#[test]
fn test_get_experiments_in_list_omits_missing() {
    let db = populated();
    let found = db
        .query()
        .get_experiments_in_list(
            ["/runs/3", "/runs/missing", "/runs/nested", "/runs/$(1-2)"],
            &Sort::default(),
            &Projection::default(),
        )
        .unwrap();
    let paths: Vec<_> = found.iter().map(|e| e.path().to_string()).collect();
    assert_eq!(paths, vec!["/runs/3", "/runs/1", "/runs/2"]);
}

#[test]
fn test_get_experiments_in_list_rejects_runaway_ranges() {
    let db = populated();
    let err = db
        .query()
        .get_experiments_in_list(
            ["/runs/$(1-300)/$(1-300)"],
            &Sort::default(),
            &Projection::default(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn test_get_experiments_in_list_sorted() {
    let db = populated();
    let found = db
        .query()
        .get_experiments_in_list(
            ["/runs/1", "/runs/2", "/runs/3"],
            &Sort::by("data.acc", SortOrder::Ascending),
            &Projection::default(),
        )
        .unwrap();
    let accs: Vec<_> = found
        .iter()
        .map(|e| e.get("acc").and_then(DataValue::as_json).cloned())
        .collect();
    assert_eq!(accs, vec![Some(json!(0.7)), Some(json!(0.8)), Some(json!(0.9))]);
}

#[test]
fn test_log_to_arbitrary_experiment() {
    let db = populated();
    let query = db.query();
    query.experiment_log_data("/runs/1", "extra", vec![3i64, 4]).unwrap();
    query.experiment_log_note("/runs/1", "reviewed", true).unwrap();
    let exp = query.get_experiment("/runs/1").unwrap();
    assert_eq!(exp.get("extra"), Some(&DataValue::from(vec![3i64, 4])));
    assert_eq!(exp.note("reviewed"), Some(&Value::Bool(true)));

    assert!(query.experiment_log_note("/runs", "x", 1).unwrap_err().is_not_found());
    assert!(query.experiment_log_data("/nope", "x", 1i64).unwrap_err().is_not_found());
}

#[test]
fn test_update_experiment_notes_replaces_map() {
    let db = populated();
    let query = db.query();
    let mut notes = Map::new();
    notes.insert("summary".into(), json!("best run"));
    query.update_experiment_notes("/runs/2", notes.clone()).unwrap();
    assert_eq!(query.get_experiment("/runs/2").unwrap().notes(), &notes);
}

#[test]
fn test_experiment_moves_with_directory() {
    let db = populated();
    db.tree().mv("/runs", "/archive").unwrap();
    let exp = db.query().get_experiment("/archive/nested/1").unwrap();
    assert_eq!(exp.get("acc"), Some(&DataValue::from(0.95)));
    assert!(db.query().get_experiment("/runs/1").unwrap_err().is_not_found());
}
