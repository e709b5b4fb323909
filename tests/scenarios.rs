//! End-to-end scenarios run against every repository backend.

use docstore::repository::search::{MemoryIndex, SearchConfig};
use docstore::repository::table::{MemoryTable, TableConfig};
use docstore::{
    find_all, where_, ErrorKind, FindingRecords, Location, MemoryRepository, ParamBinds, Record,
    Repository, SearchRepository, SortField, TableRepository, UpdateRecords, UpdatingPolicy,
    Value,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn backends() -> Vec<(&'static str, Box<dyn Repository>)> {
    vec![
        ("memory", Box::new(MemoryRepository::new()) as Box<dyn Repository>),
        (
            "table",
            Box::new(TableRepository::new(MemoryTable::new(), TableConfig::default()))
                as Box<dyn Repository>,
        ),
        (
            "search",
            Box::new(SearchRepository::new(MemoryIndex::new(), SearchConfig::default()))
                as Box<dyn Repository>,
        ),
    ]
}

fn order(status: &str, version: u16) -> Record<Value> {
    Record::new("o1", "orders", Value::map([("status", Value::from(status))])).with_version(version)
}

fn person(id: &str, age: i64) -> Record<Value> {
    Record::new(
        id,
        "people",
        Value::map([("Name", Value::from(id)), ("Age", Value::from(age))]),
    )
}

#[test]
fn test_optimistic_update_scenario() {
    init_tracing();
    for (name, repo) in backends() {
        repo.update_records(UpdateRecords::save(vec![order("pending", 0)]))
            .unwrap();

        let first = repo
            .update_records(UpdateRecords::save(vec![order("shipped", 0)]))
            .unwrap();
        assert_eq!(first.saved[0].version, 1, "{name}");

        let err = repo
            .update_records(UpdateRecords::save(vec![order("cancelled", 0)]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VersionConflict, "{name}");
        assert!(err.is_retryable());

        let stored = repo.get("o1", "orders").unwrap();
        assert_eq!(stored.version, 1, "{name}");
        assert_eq!(stored.data.get("status"), Some(&Value::from("shipped")), "{name}");
    }
}

#[test]
fn test_age_range_scenario() {
    init_tracing();
    for (name, repo) in backends() {
        let people = [("p1", 20), ("p2", 30), ("p3", 39), ("p4", 40), ("p5", 39)]
            .into_iter()
            .map(|(id, age)| person(id, age))
            .collect();
        repo.update_records(UpdateRecords::save(people)).unwrap();

        let mut params = ParamBinds::new();
        params.insert("age".into(), Value::from(20));
        params.insert("maxAge".into(), Value::from(40));
        let query = FindingRecords::of_type("people")
            .filter(where_("Data.Age > :age AND Data.Age < :maxAge", params).unwrap())
            .sort_by(SortField::asc(Location::fields(["Data", "Age"])));

        let found = find_all(repo.as_ref(), query).unwrap();
        let ages: Vec<f64> = found
            .iter()
            .filter_map(|r| r.data.get("Age").and_then(Value::as_number))
            .collect();
        assert_eq!(ages, vec![30.0, 39.0, 39.0], "{name}");
        let ids: Vec<&str> = found.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p3", "p5"], "{name}");
    }
}

#[test]
fn test_declared_version_mismatch_rejected_on_every_backend() {
    for (name, repo) in backends() {
        repo.update_records(UpdateRecords::save(vec![order("a", 0)]))
            .unwrap();
        repo.update_records(UpdateRecords::save(vec![order("b", 0)]))
            .unwrap();

        for declared in [0, 2, 7] {
            let err = repo
                .update_records(UpdateRecords::save(vec![order("x", declared)]))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::VersionConflict, "{name} v{declared}");
        }
        let accepted = repo
            .update_records(UpdateRecords::save(vec![order("c", 1)]))
            .unwrap();
        assert_eq!(accepted.saved[0].version, 2, "{name}");

        let forced = repo
            .update_records(
                UpdateRecords::save(vec![order("d", 0)])
                    .with_policy(UpdatingPolicy::OverwriteServerChanges),
            )
            .unwrap();
        assert_eq!(forced.saved[0].version, 3, "{name}");
    }
}

#[test]
fn test_errors_surface_before_io() {
    let mut params = ParamBinds::new();
    params.insert("unused".into(), Value::from(1));
    let err = where_("Data.Age > :age", params).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BindMismatch);

    let err = where_("Data.Age >", ParamBinds::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);

    for (name, repo) in backends() {
        let err = repo.get("missing", "orders").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{name}");
        let err = repo.update_records(UpdateRecords::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyCommand, "{name}");
    }
}

#[test]
fn test_batch_with_saves_and_deletes() {
    for (name, repo) in backends() {
        repo.update_records(UpdateRecords::save(vec![person("a", 1), person("b", 2)]))
            .unwrap();

        let mut batch = UpdateRecords::save(vec![person("c", 3), person("a", 10).with_version(0)]);
        batch.deleting.push(person("b", 2));
        let result = repo.update_records(batch).unwrap();
        assert_eq!(result.saved.len(), 2, "{name}");
        assert_eq!(result.deleted.len(), 1, "{name}");

        let mut ids: Vec<String> = find_all(repo.as_ref(), FindingRecords::of_type("people"))
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "c"], "{name}");
        assert_eq!(repo.get("a", "people").unwrap().version, 1, "{name}");
    }
}

#[test]
fn test_saved_reports_only_surviving_writes() {
    for (name, repo) in backends() {
        repo.update_records(UpdateRecords::save(vec![person("b", 2)]))
            .unwrap();

        let mut batch = UpdateRecords::save(vec![
            person("a", 1),
            person("b", 20).with_version(0),
            person("a", 11),
        ]);
        batch.deleting.push(person("b", 2));
        let result = repo.update_records(batch).unwrap();

        assert_eq!(result.saved.len(), 1, "{name}");
        assert_eq!(result.saved[0].id, "a", "{name}");
        assert_eq!(result.saved[0].data.get("Age"), Some(&Value::from(11)), "{name}");
        assert_eq!(result.deleted.len(), 1, "{name}");

        let stored = repo.get("a", "people").unwrap();
        assert_eq!(stored, result.saved[0], "{name}");
        assert_eq!(repo.get("b", "people").unwrap_err().kind(), ErrorKind::NotFound, "{name}");
    }
}

#[test]
fn test_create_of_existing_record_conflicts() {
    for (name, repo) in backends() {
        repo.update_records(UpdateRecords::create(vec![person("p1", 30)]))
            .unwrap();
        let err = repo
            .update_records(UpdateRecords::create(vec![person("p1", 31)]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VersionConflict, "{name}");

        let stored = repo.get("p1", "people").unwrap();
        assert_eq!(stored.version, 0, "{name}");
        assert_eq!(stored.data.get("Age"), Some(&Value::from(30)), "{name}");
    }
}
