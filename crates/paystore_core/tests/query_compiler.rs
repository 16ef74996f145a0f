use paystore_core::db::open_db_in_memory;
use paystore_core::error::ErrorKind;
use paystore_core::query::{compile, Dialect, FieldPolicy, Filter, SqlParam, ValueKind};
use rusqlite::{params, params_from_iter, Connection};
use serde_json::json;

fn widget_policy() -> FieldPolicy {
    FieldPolicy::builder("widget")
        .column("id")
        .column("status")
        .column_as("archived", "archived", ValueKind::Bool)
        .metadata("metadata")
        .build()
        .unwrap()
}

fn seeded() -> Connection {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE widgets (
            sort_id INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL,
            archived INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}'
        );",
    )
    .unwrap();
    for (id, status, archived, metadata) in [
        ("w1", "ACTIVE", false, json!({"color": "red", "size": "l"})),
        ("w2", "ACTIVE", true, json!({"color": "blue"})),
        ("w3", "DISABLED", false, json!({"color": "red"})),
    ] {
        conn.execute(
            "INSERT INTO widgets (id, status, archived, created_at, metadata)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![id, status, archived, metadata.to_string()],
        )
        .unwrap();
    }
    conn
}

fn matching_ids(conn: &Connection, filter: &Filter) -> Vec<String> {
    let predicate = compile(&widget_policy(), filter, Dialect::Sqlite).unwrap();
    let sql = if predicate.is_empty() {
        "SELECT id FROM widgets ORDER BY sort_id".to_string()
    } else {
        format!(
            "SELECT id FROM widgets WHERE {} ORDER BY sort_id",
            predicate.sql()
        )
    };
    let mut stmt = conn.prepare(&sql).unwrap();
    let rows = stmt
        .query_map(params_from_iter(predicate.params().iter()), |row| {
            row.get::<_, String>(0)
        })
        .unwrap();
    rows.map(Result::unwrap).collect()
}

#[test]
fn equality_and_metadata_clauses_select_rows() {
    let conn = seeded();

    assert_eq!(
        matching_ids(&conn, &Filter::matching("status", "ACTIVE")),
        vec!["w1", "w2"]
    );
    assert_eq!(
        matching_ids(&conn, &Filter::matching("metadata[color]", "red")),
        vec!["w1", "w3"]
    );
    assert_eq!(
        matching_ids(
            &conn,
            &Filter::And(vec![
                Filter::matching("status", "ACTIVE"),
                Filter::matching("metadata[color]", "red"),
            ])
        ),
        vec!["w1"]
    );
    assert_eq!(
        matching_ids(&conn, &Filter::matching("archived", true)),
        vec!["w2"]
    );
}

#[test]
fn disjunction_and_empty_filter() {
    let conn = seeded();

    let either = Filter::Or(vec![
        Filter::matching("id", "w2"),
        Filter::matching("status", "DISABLED"),
    ]);
    assert_eq!(matching_ids(&conn, &either), vec!["w2", "w3"]);

    assert_eq!(
        matching_ids(&conn, &Filter::And(Vec::new())),
        vec!["w1", "w2", "w3"]
    );
}

#[test]
fn nested_document_compiles_against_the_engine() {
    let conn = seeded();
    let filter = Filter::from_document(&json!({
        "$and": [
            {"$match": {"metadata[color]": "red"}},
            {"$or": [
                {"$match": {"status": "DISABLED"}},
                {"$match": {"metadata[size]": "l"}}
            ]}
        ]
    }))
    .unwrap();
    assert_eq!(matching_ids(&conn, &filter), vec!["w1", "w3"]);
}

#[test]
fn postgres_rendering_uses_containment_operator() {
    let predicate = compile(
        &widget_policy(),
        &Filter::matching("metadata[color]", "red"),
        Dialect::Postgres,
    )
    .unwrap();
    assert_eq!(predicate.sql(), "metadata @> ?");
    assert_eq!(predicate.params(), &[SqlParam::Json(json!({"color": "red"}))]);
    assert_eq!(predicate.placeholder_count(), predicate.params().len());
}

#[test]
fn unknown_keys_and_operators_fail_before_sql() {
    let policy = widget_policy();

    let err = compile(&policy, &Filter::matching("owner", "alice"), Dialect::Sqlite).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        err.to_string(),
        "validation error: unknown key 'owner' when building query on widget"
    );

    let err = compile(&policy, &Filter::clause("status", "$lt", "B"), Dialect::Sqlite).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("can only be used with $match"));

    let err = compile(
        &policy,
        &Filter::matching("metadata[color]", 3),
        Dialect::Sqlite,
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = compile(&policy, &Filter::matching("archived", "yes"), Dialect::Sqlite).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn hostile_values_are_bound_not_spliced() {
    let conn = seeded();
    let hostile = "x' OR '1'='1";
    assert!(matching_ids(&conn, &Filter::matching("id", hostile)).is_empty());
    assert!(matching_ids(&conn, &Filter::matching("metadata[color]", hostile)).is_empty());

    let predicate = compile(&widget_policy(), &Filter::matching("id", hostile), Dialect::Sqlite)
        .unwrap();
    assert!(!predicate.sql().contains(hostile));
}
