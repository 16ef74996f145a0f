//! Cursor-based offset pagination.

mod cursor;
mod page;
mod paginate;

pub use cursor::{fingerprint, resolve_window, CursorState, Window, CURSOR_VERSION};
pub use page::{
    Ordering, Page, PageBounds, PageRequest, SortOrder, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use paginate::{paginate, ListSource};
