use paystore_core::db::{open_db_in_memory, QueryContext};
use paystore_core::error::{ErrorKind, StorageResult, StorageResultExt};
use paystore_core::pagination::{
    paginate, ListSource, Ordering, Page, PageBounds, PageRequest, SortOrder, MAX_PAGE_SIZE,
};
use paystore_core::query::{
    CompiledPredicate, Dialect, FieldPolicy, Filter, SqlParam,
};
use rusqlite::{params, Connection, Row};
use std::collections::HashSet;

const WIDGET_SELECT_SQL: &str = "SELECT id, status FROM widgets";

fn widget_policy() -> FieldPolicy {
    FieldPolicy::builder("widget")
        .column("id")
        .column("status")
        .metadata("metadata")
        .build()
        .unwrap()
}

fn widget_ordering() -> Ordering {
    Ordering::new("created_at", "sort_id", SortOrder::Asc)
}

fn seed(conn: &Connection, widgets: &[(&str, &str, &str)]) {
    conn.execute_batch(
        "CREATE TABLE widgets (
            sort_id INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL,
            owner TEXT NOT NULL DEFAULT 'alice',
            created_at INTEGER NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}'
        );",
    )
    .unwrap();
    for (position, (id, status, metadata)) in widgets.iter().enumerate() {
        conn.execute(
            "INSERT INTO widgets (id, status, created_at, metadata) VALUES (?1, ?2, ?3, ?4)",
            params![id, status, 1_000 + position as i64, metadata],
        )
        .unwrap();
    }
}

fn widget_id(row: &Row<'_>) -> StorageResult<String> {
    row.get(0).context("failed to read widget")
}

fn list(conn: &Connection, request: &PageRequest) -> StorageResult<Page<String>> {
    let policy = widget_policy();
    let ordering = widget_ordering();
    let source = ListSource::new(WIDGET_SELECT_SQL, &policy, &ordering);
    paginate(conn, &QueryContext::background(), &source, request, widget_id)
}

fn three_widgets() -> Connection {
    let conn = open_db_in_memory().unwrap();
    seed(
        &conn,
        &[
            ("w1", "ACTIVE", r#"{"color":"red"}"#),
            ("w2", "ACTIVE", r#"{"color":"blue"}"#),
            ("w3", "ACTIVE", r#"{"color":"red"}"#),
        ],
    );
    conn
}

#[test]
fn pages_of_two_over_three_rows() {
    let conn = three_widgets();

    let first = list(&conn, &PageRequest::new().with_page_size(2)).unwrap();
    assert_eq!(first.data, vec!["w1", "w2"]);
    assert_eq!(first.page_size, 2);
    assert!(first.has_more);
    assert!(first.previous.is_none());

    let second = list(&conn, &PageRequest::from_cursor(first.next.clone().unwrap())).unwrap();
    assert_eq!(second.data, vec!["w3"]);
    assert!(!second.has_more);
    assert!(second.next.is_none());

    let back = list(&conn, &PageRequest::from_cursor(second.previous.unwrap())).unwrap();
    assert_eq!(back.data, first.data);
}

#[test]
fn exactly_one_full_page_has_no_next() {
    let conn = three_widgets();
    let page = list(&conn, &PageRequest::new().with_page_size(3)).unwrap();
    assert_eq!(page.data.len(), 3);
    assert!(!page.has_more);
    assert!(page.next.is_none());
}

#[test]
fn walking_next_cursors_visits_every_row_once() {
    let conn = open_db_in_memory().unwrap();
    let ids: Vec<String> = (0..11).map(|n| format!("w{n:02}")).collect();
    let rows: Vec<(&str, &str, &str)> = ids
        .iter()
        .map(|id| (id.as_str(), "ACTIVE", "{}"))
        .collect();
    seed(&conn, &rows);

    let mut seen = Vec::new();
    let mut request = PageRequest::new().with_page_size(3).with_order(SortOrder::Desc);
    loop {
        let page = list(&conn, &request).unwrap();
        seen.extend(page.data);
        match page.next {
            Some(next) => request = PageRequest::from_cursor(next),
            None => break,
        }
    }

    let mut expected = ids.clone();
    expected.reverse();
    assert_eq!(seen, expected);
    assert_eq!(seen.iter().collect::<HashSet<_>>().len(), ids.len());
}

#[test]
fn same_cursor_returns_same_page() {
    let conn = three_widgets();
    let first = list(&conn, &PageRequest::new().with_page_size(1)).unwrap();
    let token = first.next.unwrap();

    let again = list(&conn, &PageRequest::from_cursor(token.clone())).unwrap();
    let once_more = list(&conn, &PageRequest::from_cursor(token)).unwrap();
    assert_eq!(again, once_more);
    assert_eq!(again.data, vec!["w2"]);
}

#[test]
fn filter_travels_inside_the_cursor() {
    let conn = three_widgets();
    let filter = Filter::matching("metadata[color]", "red");

    let first = list(
        &conn,
        &PageRequest::new().with_page_size(1).with_filter(filter),
    )
    .unwrap();
    assert_eq!(first.data, vec!["w1"]);

    let second = list(&conn, &PageRequest::from_cursor(first.next.unwrap())).unwrap();
    assert_eq!(second.data, vec!["w3"]);
    assert!(!second.has_more);
}

#[test]
fn page_size_is_defaulted_and_clamped() {
    let conn = three_widgets();
    assert_eq!(list(&conn, &PageRequest::new()).unwrap().page_size, 15);
    assert_eq!(
        list(&conn, &PageRequest::new().with_page_size(5_000))
            .unwrap()
            .page_size,
        MAX_PAGE_SIZE
    );

    let policy = widget_policy();
    let ordering = widget_ordering();
    let source = ListSource::new(WIDGET_SELECT_SQL, &policy, &ordering).bounds(PageBounds {
        default_page_size: 2,
        max_page_size: 2,
    });
    let page = paginate(
        &conn,
        &QueryContext::background(),
        &source,
        &PageRequest::new(),
        widget_id,
    )
    .unwrap();
    assert_eq!(page.data.len(), 2);
}

#[test]
fn bad_cursors_and_unknown_keys_fail_validation() {
    let conn = three_widgets();

    let err = list(&conn, &PageRequest::from_cursor("garbage")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = list(
        &conn,
        &PageRequest::new().with_filter(Filter::matching("owner", "alice")),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("unknown key 'owner'"));

    let first = list(&conn, &PageRequest::new().with_page_size(1)).unwrap();
    let err = list(
        &conn,
        &PageRequest::from_cursor(first.next.unwrap()).with_page_size(2),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn scoping_predicate_is_combined_with_the_filter() {
    let conn = three_widgets();
    conn.execute("UPDATE widgets SET owner = 'bob' WHERE id = 'w3'", [])
        .unwrap();

    let policy = widget_policy();
    let ordering = widget_ordering();
    let source = ListSource::new(WIDGET_SELECT_SQL, &policy, &ordering)
        .dialect(Dialect::Sqlite)
        .scoped(CompiledPredicate::new(
            "owner = ?",
            vec![SqlParam::from("alice")],
        ));
    let page = paginate(
        &conn,
        &QueryContext::background(),
        &source,
        &PageRequest::new().with_filter(Filter::matching("metadata[color]", "red")),
        widget_id,
    )
    .unwrap();
    assert_eq!(page.data, vec!["w1"]);
}

#[test]
fn finished_context_issues_no_query() {
    let conn = three_widgets();
    let policy = widget_policy();
    let ordering = widget_ordering();
    let source = ListSource::new(WIDGET_SELECT_SQL, &policy, &ordering);

    let cancel = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
    let ctx = QueryContext::background().with_cancel_flag(cancel);
    let err = paginate(&conn, &ctx, &source, &PageRequest::new(), widget_id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unknown);
    assert!(err.is_cancelled());
}
