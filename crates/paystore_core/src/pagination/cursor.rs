//! Opaque cursor tokens.
//!
//! # Responsibility
//! - Encode the position and query of a page into a self-describing token.
//! - Reject malformed, outdated, foreign, or mismatched tokens.
//!
//! # Invariants
//! - A token decodes only when its recorded fingerprint equals the one
//!   recomputed from its resource, scope, filter and ordering.
//! - Decoding failures are `Validation` errors; they never fall back to the
//!   first page.

use super::page::{Ordering, PageBounds, PageRequest, SortOrder};
use crate::error::{StorageError, StorageResult};
use crate::query::{Filter, SqlParam, WhereClause};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Format version written into every token.
pub const CURSOR_VERSION: u32 = 1;

const FINGERPRINT_BYTES: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorState {
    #[serde(rename = "v")]
    pub version: u32,
    pub resource: String,
    pub page_size: u64,
    pub offset: u64,
    pub order: SortOrder,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(rename = "fp")]
    pub fingerprint: String,
}

#[derive(Deserialize)]
struct VersionProbe {
    v: u32,
}

impl CursorState {
    pub fn encode(&self) -> StorageResult<String> {
        let payload = serde_json::to_vec(self)
            .map_err(|err| StorageError::unknown("failed to encode cursor", err))?;
        Ok(URL_SAFE_NO_PAD.encode(payload))
    }

    pub fn decode(token: &str) -> StorageResult<Self> {
        let payload = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| StorageError::validation("invalid cursor: not a cursor token"))?;

        let probe: VersionProbe = serde_json::from_slice(&payload)
            .map_err(|_| StorageError::validation("invalid cursor: malformed payload"))?;
        if probe.v != CURSOR_VERSION {
            return Err(StorageError::validation(format!(
                "invalid cursor: unsupported format version {}",
                probe.v
            )));
        }

        serde_json::from_slice(&payload)
            .map_err(|_| StorageError::validation("invalid cursor: malformed payload"))
    }
}

/// Hex fingerprint of the query a cursor belongs to.
///
/// `scope` is the fixed restriction of the list, such as its parent connector.
pub fn fingerprint(
    resource: &str,
    ordering: &Ordering,
    scope: &WhereClause,
    order: SortOrder,
    filter: Option<&Filter>,
) -> String {
    #[derive(Serialize)]
    struct Fingerprinted<'a> {
        resource: &'a str,
        columns: &'a [String],
        scope: String,
        scope_params: &'a [SqlParam],
        order: SortOrder,
        filter: Option<&'a Filter>,
    }

    let material = Fingerprinted {
        resource,
        columns: ordering.columns(),
        scope: scope.render(),
        scope_params: scope.params(),
        order,
        filter: filter.filter(|filter| !filter.is_empty()),
    };
    // Serializing plain data into a Vec cannot fail.
    let bytes = serde_json::to_vec(&material).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    digest[..FINGERPRINT_BYTES]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Offset window a list call resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub page_size: u64,
    pub offset: u64,
    pub order: SortOrder,
    pub filter: Option<Filter>,
    pub fingerprint: String,
}

impl Window {
    fn cursor_at(&self, resource: &str, offset: u64) -> CursorState {
        CursorState {
            version: CURSOR_VERSION,
            resource: resource.to_string(),
            page_size: self.page_size,
            offset,
            order: self.order,
            filter: self.filter.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }

    pub fn next_cursor(&self, resource: &str) -> CursorState {
        self.cursor_at(resource, self.offset + self.page_size)
    }

    /// `None` on the first page.
    pub fn previous_cursor(&self, resource: &str) -> Option<CursorState> {
        (self.offset > 0)
            .then(|| self.cursor_at(resource, self.offset.saturating_sub(self.page_size)))
    }
}

/// Resolves a request into the window to fetch.
pub fn resolve_window(
    resource: &str,
    ordering: &Ordering,
    scope: &WhereClause,
    bounds: &PageBounds,
    request: &PageRequest,
) -> StorageResult<Window> {
    let Some(token) = request.cursor.as_deref() else {
        let order = request.order.unwrap_or(ordering.default_order());
        return Ok(Window {
            page_size: bounds.normalize(request.page_size),
            offset: 0,
            order,
            filter: request.filter.clone(),
            fingerprint: fingerprint(resource, ordering, scope, order, request.filter.as_ref()),
        });
    };

    let state = CursorState::decode(token)?;
    if state.resource != resource {
        return Err(StorageError::validation(format!(
            "invalid cursor: issued for {}, not {resource}",
            state.resource
        )));
    }

    let expected = fingerprint(resource, ordering, scope, state.order, state.filter.as_ref());
    if state.fingerprint != expected {
        return Err(StorageError::validation(
            "invalid cursor: fingerprint does not match its query",
        ));
    }

    if request.filter.is_some() || request.order.is_some() {
        let requested = fingerprint(
            resource,
            ordering,
            scope,
            request.order.unwrap_or(state.order),
            request.filter.as_ref().or(state.filter.as_ref()),
        );
        if requested != state.fingerprint {
            return Err(StorageError::validation(
                "invalid cursor: filter or ordering differs from the cursor's query",
            ));
        }
    }

    if let Some(page_size) = request.page_size.filter(|size| *size != 0) {
        if bounds.normalize(Some(page_size)) != state.page_size {
            return Err(StorageError::validation(
                "invalid cursor: page size differs from the cursor's query",
            ));
        }
    }

    if state.page_size == 0 || state.page_size > bounds.max_page_size {
        return Err(StorageError::validation(
            "invalid cursor: page size out of bounds",
        ));
    }

    Ok(Window {
        page_size: state.page_size,
        offset: state.offset,
        order: state.order,
        filter: state.filter,
        fingerprint: state.fingerprint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::query::CompiledPredicate;

    fn ordering() -> Ordering {
        Ordering::new("created_at", "sort_id", SortOrder::Asc)
    }

    fn unscoped() -> WhereClause {
        WhereClause::new()
    }

    fn first_window(filter: Option<Filter>) -> Window {
        let mut request = PageRequest::new().with_page_size(2);
        request.filter = filter;
        resolve_window("widget", &ordering(), &unscoped(), &PageBounds::default(), &request)
            .unwrap()
    }

    #[test]
    fn next_cursor_resumes_at_next_offset() {
        let window = first_window(Some(Filter::matching("status", "ACTIVE")));
        assert!(window.previous_cursor("widget").is_none());

        let token = window.next_cursor("widget").encode().unwrap();
        let resumed = resolve_window(
            "widget",
            &ordering(),
            &unscoped(),
            &PageBounds::default(),
            &PageRequest::from_cursor(token),
        )
        .unwrap();
        assert_eq!(resumed.offset, 2);
        assert_eq!(resumed.page_size, 2);
        assert_eq!(resumed.filter, window.filter);
        assert_eq!(resumed.previous_cursor("widget").unwrap().offset, 0);
    }

    #[test]
    fn token_is_url_safe() {
        let token = first_window(Some(Filter::matching("metadata[a/b+c]", "?&=")))
            .next_cursor("widget")
            .encode()
            .unwrap();
        assert!(token
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'));
    }

    #[test]
    fn rejects_foreign_tampered_and_mismatched_tokens() {
        let window = first_window(Some(Filter::matching("status", "ACTIVE")));
        let bounds = PageBounds::default();

        let token = window.next_cursor("widget").encode().unwrap();
        let err = resolve_window(
            "gadget",
            &ordering(),
            &unscoped(),
            &bounds,
            &PageRequest::from_cursor(token.clone()),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut tampered = window.next_cursor("widget");
        tampered.filter = Some(Filter::matching("status", "DISABLED"));
        let err = resolve_window(
            "widget",
            &ordering(),
            &unscoped(),
            &bounds,
            &PageRequest::from_cursor(tampered.encode().unwrap()),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = resolve_window(
            "widget",
            &ordering(),
            &unscoped(),
            &bounds,
            &PageRequest::from_cursor(token.clone())
                .with_filter(Filter::matching("status", "DISABLED")),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let agreeing = resolve_window(
            "widget",
            &ordering(),
            &unscoped(),
            &bounds,
            &PageRequest::from_cursor(token).with_filter(Filter::matching("status", "ACTIVE")),
        );
        assert!(agreeing.is_ok());
    }

    #[test]
    fn rejects_garbage_and_future_versions() {
        let bounds = PageBounds::default();
        for token in ["", "not a cursor!", "e30"] {
            let err = resolve_window(
                "widget",
                &ordering(),
                &unscoped(),
                &bounds,
                &PageRequest::from_cursor(token),
            )
            .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{token}");
        }

        let mut future = first_window(None).next_cursor("widget");
        future.version = CURSOR_VERSION + 1;
        let err = resolve_window(
            "widget",
            &ordering(),
            &unscoped(),
            &bounds,
            &PageRequest::from_cursor(future.encode().unwrap()),
        )
        .unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn zero_page_size_alongside_a_cursor_is_ignored() {
        let token = first_window(None).next_cursor("widget").encode().unwrap();
        let resumed = resolve_window(
            "widget",
            &ordering(),
            &unscoped(),
            &PageBounds::default(),
            &PageRequest::from_cursor(token.clone()).with_page_size(0),
        )
        .unwrap();
        assert_eq!(resumed.page_size, 2);

        let err = resolve_window(
            "widget",
            &ordering(),
            &unscoped(),
            &PageBounds::default(),
            &PageRequest::from_cursor(token).with_page_size(3),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn cursor_is_bound_to_its_scope() {
        let scope = |connector: &str| {
            WhereClause::new().and(CompiledPredicate::new(
                "connector_id = ?",
                vec![connector.into()],
            ))
        };
        let bounds = PageBounds::default();
        let first = resolve_window(
            "widget",
            &ordering(),
            &scope("c1"),
            &bounds,
            &PageRequest::new().with_page_size(2),
        )
        .unwrap();
        let token = first.next_cursor("widget").encode().unwrap();

        let same = resolve_window(
            "widget",
            &ordering(),
            &scope("c1"),
            &bounds,
            &PageRequest::from_cursor(token.clone()),
        );
        assert!(same.is_ok());

        for other in [scope("c2"), unscoped()] {
            let err = resolve_window(
                "widget",
                &ordering(),
                &other,
                &bounds,
                &PageRequest::from_cursor(token.clone()),
            )
            .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
    }
}
