//! Page request/response shapes shared by every list operation.

use crate::query::Filter;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u64 = 15;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Page-size bounds applied to every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageBounds {
    pub default_page_size: u64,
    pub max_page_size: u64,
}

impl Default for PageBounds {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

impl PageBounds {
    /// Absent or zero sizes take the default; oversized ones are clamped.
    pub fn normalize(&self, requested: Option<u64>) -> u64 {
        match requested {
            None | Some(0) => self.default_page_size,
            Some(size) => size.min(self.max_page_size),
        }
    }
}

/// Deterministic ordering of a resource: sort columns ending in a tiebreak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ordering {
    columns: Vec<String>,
    default_order: SortOrder,
}

impl Ordering {
    pub fn new(primary: &str, tiebreak: &str, default_order: SortOrder) -> Self {
        Self {
            columns: vec![primary.to_string(), tiebreak.to_string()],
            default_order,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn default_order(&self) -> SortOrder {
        self.default_order
    }

    /// `ORDER BY` body with `order` applied to every column.
    pub fn to_sql(&self, order: SortOrder) -> String {
        self.columns
            .iter()
            .map(|column| format!("{column} {}", order.as_sql()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Input of a list call.
///
/// Without a cursor the options describe the first page. With a cursor the
/// token is authoritative; options set alongside it must agree with it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageRequest {
    pub page_size: Option<u64>,
    pub order: Option<SortOrder>,
    pub filter: Option<Filter>,
    pub cursor: Option<String>,
}

impl PageRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cursor(token: impl Into<String>) -> Self {
        Self {
            cursor: Some(token.into()),
            ..Self::default()
        }
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = Some(order);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_cursor(mut self, token: impl Into<String>) -> Self {
        self.cursor = Some(token.into());
        self
    }
}

/// One page of rows plus navigation tokens.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub page_size: u64,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    pub data: Vec<T>,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            page_size: self.page_size,
            has_more: self.has_more,
            previous: self.previous,
            next: self.next,
            data: self.data.into_iter().map(f).collect(),
        }
    }
}
