use rusqlite::params;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tabread_core::db::open_db;
use tabread_core::{
    read_values, Entity, ReadCallback, ReadError, ReadOptions, ReadResult, SourceError,
    SqliteTableSource, Value, ValueSource,
};

const ROWS: i64 = 50;
const BLOB_ROW: i64 = 7;

fn seed_participants(path: &Path) {
    let conn = open_db(path).expect("db should open");
    conn.execute_batch(
        "CREATE TABLE participants (
            id INTEGER PRIMARY KEY,
            age INTEGER,
            name TEXT,
            weight REAL,
            photo BLOB
        );",
    )
    .expect("schema should apply");
    for id in 1..=ROWS {
        let photo: Option<Vec<u8>> = (id == BLOB_ROW).then(|| vec![0xff, 0xd8]);
        let name = if id % 10 == 0 {
            None
        } else {
            Some(format!("p{id}"))
        };
        conn.execute(
            "INSERT INTO participants (id, age, name, weight, photo) VALUES (?1, ?2, ?3, ?4, ?5);",
            params![id, 20 + id, name, id as f64 + 0.25, photo],
        )
        .expect("row should insert");
    }
}

fn open_source(dir: &tempfile::TempDir) -> SqliteTableSource {
    let path = dir.path().join("cohort.sqlite3");
    seed_participants(&path);
    SqliteTableSource::open(&path, "participants", "id", "Participant")
        .expect("source should bind")
}

#[derive(Default)]
struct Collect {
    rows: BTreeMap<i64, Vec<Value>>,
    completed: usize,
}

impl ReadCallback for Collect {
    fn on_values(
        &mut self,
        entity: &Entity,
        _variables: &[String],
        values: Vec<Value>,
    ) -> ReadResult<()> {
        let id = entity.identifier().parse().expect("numeric id");
        self.rows.insert(id, values);
        Ok(())
    }

    fn on_complete(&mut self) -> ReadResult<()> {
        self.completed += 1;
        Ok(())
    }
}

fn options() -> ReadOptions {
    ReadOptions::new()
        .concurrency(4)
        .buffer_capacity(8)
        .poll_interval(Duration::from_millis(5))
}

#[test]
fn binds_columns_as_variables_in_table_order() {
    let dir = tempfile::tempdir().expect("temp dir");
    let source = open_source(&dir);

    assert_eq!(source.name(), "participants");
    assert_eq!(source.entity_type(), "Participant");
    assert_eq!(
        source.variable_names(),
        vec!["age", "name", "weight", "photo"]
    );

    let entities = source.list_entities().expect("entities should list");
    assert_eq!(entities.len(), ROWS as usize);
    assert_eq!(entities[0].identifier(), "1");
    assert_eq!(entities[9].identifier(), "10");
}

#[test]
fn has_data_checks_type_and_identifier() {
    let dir = tempfile::tempdir().expect("temp dir");
    let source = open_source(&dir);

    let known = Entity::new("Participant", "3").expect("valid entity");
    let missing = Entity::new("Participant", "999").expect("valid entity");
    let other_type = Entity::new("Sample", "3").expect("valid entity");
    assert!(source.has_data(&known).expect("has_data"));
    assert!(!source.has_data(&missing).expect("has_data"));
    assert!(!source.has_data(&other_type).expect("has_data"));
}

#[test]
fn bulk_read_maps_sqlite_cells_to_values() {
    let dir = tempfile::tempdir().expect("temp dir");
    let source = open_source(&dir);
    let mut collect = Collect::default();

    let summary = read_values(
        &source,
        options().variables(["age", "name", "weight"]),
        &mut collect,
    )
    .expect("read should succeed");

    assert_eq!(summary.delivered, ROWS as usize);
    assert_eq!(collect.completed, 1);
    assert_eq!(
        collect.rows[&3],
        vec![
            Value::Integer(23),
            Value::Text("p3".to_string()),
            Value::Decimal(3.25),
        ]
    );
    assert_eq!(collect.rows[&10][1], Value::Null);
}

#[test]
fn blob_cell_fails_read_unless_ignored() {
    let dir = tempfile::tempdir().expect("temp dir");
    let source = open_source(&dir);

    let mut collect = Collect::default();
    let err = read_values(&source, options().variables(["photo"]), &mut collect)
        .expect_err("blob cell must fail the read");
    match err {
        ReadError::Value {
            entity,
            variable,
            cause: SourceError::ValueRead { .. },
        } => {
            assert_eq!(entity.identifier(), BLOB_ROW.to_string());
            assert_eq!(variable, "photo");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(collect.completed, 1);

    let mut collect = Collect::default();
    let summary = read_values(
        &source,
        options().variables(["photo"]).ignore_read_errors(true),
        &mut collect,
    )
    .expect("ignored blob error should not fail the read");
    assert_eq!(summary.substituted_values, 1);
    assert_eq!(collect.rows.len(), ROWS as usize);
    assert_eq!(collect.rows[&BLOB_ROW], vec![Value::Null]);
}

#[test]
fn rejects_unsafe_identifiers_before_touching_sql() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("cohort.sqlite3");
    seed_participants(&path);

    let err = SqliteTableSource::open(&path, "participants; DROP TABLE x", "id", "Participant")
        .err()
        .expect("table name must be rejected");
    assert!(matches!(err, SourceError::InvalidIdentifier(_)));

    let source = SqliteTableSource::open(&path, "participants", "id", "Participant")
        .expect("source should bind");
    assert!(matches!(
        source.resolve_column("age\" FROM participants --"),
        Err(SourceError::VariableNotFound { .. })
    ));
}

#[test]
fn untyped_id_column_matches_listed_integer_ids() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("untyped.sqlite3");
    let conn = open_db(&path).expect("db should open");
    conn.execute_batch(
        "CREATE TABLE t (id, age);
         INSERT INTO t VALUES (1, 30), (2, 40), ('007', 50);",
    )
    .expect("schema should apply");
    drop(conn);

    let source = SqliteTableSource::open(&path, "t", "id", "Participant")
        .expect("source should bind");
    let one = Entity::new("Participant", "1").expect("valid entity");
    let padded = Entity::new("Participant", "007").expect("valid entity");
    let seven = Entity::new("Participant", "7").expect("valid entity");
    assert!(source.has_data(&one).expect("has_data"));
    assert!(source.has_data(&padded).expect("has_data"));
    assert!(!source.has_data(&seven).expect("has_data"));

    let mut collect = Collect::default();
    let summary = read_values(&source, options().variables(["age"]), &mut collect)
        .expect("read should succeed");

    assert_eq!(summary.delivered, 3);
    assert_eq!(summary.skipped_without_data, 0);
    assert_eq!(collect.rows[&1], vec![Value::Integer(30)]);
    assert_eq!(collect.rows[&2], vec![Value::Integer(40)]);
    assert_eq!(collect.rows[&7], vec![Value::Integer(50)]);
}
