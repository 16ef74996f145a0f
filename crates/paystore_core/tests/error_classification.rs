use paystore_core::db::{open_db_in_memory, QueryContext};
use paystore_core::error::{
    classify, resolve_related_entity, ErrorKind, NativeError, StorageResult, StorageResultExt,
    SQLSTATE_FOREIGN_KEY_VIOLATION, SQLSTATE_QUERY_CANCELED, SQLSTATE_UNIQUE_VIOLATION,
};
use rusqlite::{params, Connection};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

fn insert_connector(conn: &Connection, id: &str, name: &str) -> StorageResult<usize> {
    conn.execute(
        "INSERT INTO connectors (id, name, provider, created_at) VALUES (?1, ?2, 'dummypay', 0)",
        params![id, name],
    )
    .context("failed to install connector")
}

#[test]
fn duplicate_connector_name_is_duplicate_key() {
    let conn = open_db_in_memory().unwrap();
    insert_connector(&conn, "c1", "main").unwrap();

    let err = insert_connector(&conn, "c2", "main").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateKey);
    assert_eq!(
        err.to_string(),
        "failed to install connector: duplicate key value"
    );
}

#[test]
fn unknown_connector_is_foreign_key_violation() {
    let conn = open_db_in_memory().unwrap();
    let err = conn
        .execute(
            "INSERT INTO accounts (id, connector_id, reference, created_at, type)
             VALUES ('a1', 'missing', 'ref', 0, 'INTERNAL')",
            [],
        )
        .context("failed to insert account")
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ForeignKeyViolation);
    // The bundled engine does not report which constraint failed.
    assert_eq!(err.related_entity(), None);
    assert_eq!(
        err.to_string(),
        "failed to insert account: foreign key violation"
    );
}

#[test]
fn guarded_write_names_the_missing_parent() {
    let conn = open_db_in_memory().unwrap();
    let err = conn
        .execute(
            "INSERT INTO accounts (id, connector_id, reference, created_at, type)
             VALUES ('a1', 'missing', 'ref', 0, 'INTERNAL')",
            [],
        )
        .context_fk("failed to insert account", "accounts_connector_id_fk")
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ForeignKeyViolation);
    assert_eq!(err.related_entity(), Some("connector"));
    assert_eq!(
        err.to_string(),
        "failed to insert account: foreign key violation, referenced connector does not exist"
    );
}

#[test]
fn named_foreign_key_resolves_related_entity() {
    let err = classify(
        "failed to insert account",
        NativeError::new(SQLSTATE_FOREIGN_KEY_VIOLATION, "insert violates foreign key")
            .with_constraint("accounts_connector_id_fk"),
    );
    assert_eq!(err.kind(), ErrorKind::ForeignKeyViolation);
    assert_eq!(err.related_entity(), Some("connector"));
    assert_eq!(
        err.to_string(),
        "failed to insert account: foreign key violation, referenced connector does not exist"
    );

    assert_eq!(
        resolve_related_entity("payments_bank_account_id_fk"),
        Some("bank account")
    );
    assert_eq!(
        resolve_related_entity("open_banking_access_tokens_connection_id_fk"),
        Some("open banking connection")
    );
    assert_eq!(resolve_related_entity("something_else"), None);

    let unnamed = classify(
        "failed to insert",
        NativeError::new(SQLSTATE_FOREIGN_KEY_VIOLATION, "insert violates foreign key"),
    );
    assert_eq!(unnamed.related_entity(), None);
}

#[test]
fn sqlstate_codes_classify_deterministically() {
    let unique = NativeError::new(SQLSTATE_UNIQUE_VIOLATION, "duplicate key")
        .with_constraint("connectors_name_unique");
    assert_eq!(
        classify("ctx", unique.clone()).kind(),
        classify("ctx", unique).kind()
    );
    assert_eq!(
        classify("ctx", NativeError::new(SQLSTATE_UNIQUE_VIOLATION, "dup")).kind(),
        ErrorKind::DuplicateKey
    );
    assert_eq!(
        classify("ctx", NativeError::no_rows()).kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        classify("ctx", NativeError::new("42P01", "relation does not exist")).kind(),
        ErrorKind::Unknown
    );

    let cancelled = classify(
        "ctx",
        NativeError::new(SQLSTATE_QUERY_CANCELED, "canceling statement"),
    );
    assert_eq!(cancelled.kind(), ErrorKind::Unknown);
    assert!(cancelled.is_cancelled());
}

#[test]
fn missing_row_is_not_found_and_ok_passes_through() {
    let conn = open_db_in_memory().unwrap();

    let err = conn
        .query_row("SELECT id FROM connectors WHERE id = 'nope'", [], |row| {
            row.get::<_, String>(0)
        })
        .context("failed to fetch connector")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.to_string(), "failed to fetch connector: not found");

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM connectors", [], |row| row.get(0))
        .context("failed to count connectors")
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn cancelled_context_issues_no_sql() {
    let conn = open_db_in_memory().unwrap();
    let flag = Arc::new(AtomicBool::new(true));
    let ctx = QueryContext::background().with_cancel_flag(flag);

    let mut issued = false;
    let err = ctx
        .run(&conn, "failed to install connector", || {
            issued = true;
            insert_connector(&conn, "c1", "main")
        })
        .unwrap_err();

    assert!(!issued);
    assert_eq!(err.kind(), ErrorKind::Unknown);
    assert!(err.is_cancelled());

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM connectors", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn deadline_interrupts_running_statement() {
    let conn = open_db_in_memory().unwrap();
    let ctx = QueryContext::with_timeout(Duration::from_millis(50));

    let err = ctx
        .run(&conn, "failed to count", || {
            conn.query_row(
                "WITH RECURSIVE forever(n) AS (
                    SELECT 1 UNION ALL SELECT n + 1 FROM forever
                 )
                 SELECT COUNT(*) FROM forever",
                [],
                |row| row.get::<_, i64>(0),
            )
            .context("failed to count")
        })
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unknown);
    assert!(err.is_cancelled());

    // The handler is removed once the call returns.
    let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
    assert_eq!(one, 1);
}
