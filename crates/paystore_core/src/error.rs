//! Storage error taxonomy and driver-error translation.
//!
//! # Responsibility
//! - Classify every storage-layer failure into one of five stable kinds.
//! - Resolve a violated foreign-key constraint name to a related-entity label.
//! - Keep the engine-specific part behind the narrow [`DriverError`] seam.
//!
//! # Invariants
//! - Classification is total and deterministic: the same failure code and
//!   constraint name always yield the same kind.
//! - `Ok` values pass through [`StorageResultExt::context`] untouched.
//! - Classification never retries and never mutates state.
//! - Error messages never carry key material, plaintext, or bound values.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StorageResult<T> = Result<T, StorageError>;

/// Boxed error kept as the cause of a classified failure.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Stable, engine-independent failure classification surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    DuplicateKey,
    ForeignKeyViolation,
    Validation,
    Unknown,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotFound => "not_found",
            Self::DuplicateKey => "duplicate_key",
            Self::ForeignKeyViolation => "foreign_key_violation",
            Self::Validation => "validation",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Error returned by every core component and entity repository.
#[derive(Debug)]
pub enum StorageError {
    /// The read API reported that no row matched.
    NotFound { context: String },
    /// A unique constraint rejected the write.
    DuplicateKey { context: String, source: BoxError },
    /// A foreign-key constraint rejected the write.
    ///
    /// `related_entity` is `None` when the constraint name is missing or
    /// not present in the label table.
    ForeignKeyViolation {
        context: String,
        related_entity: Option<&'static str>,
        source: BoxError,
    },
    /// Caller input was rejected before any SQL was issued.
    Validation { message: String },
    /// Anything else, including cancellation.
    Unknown { context: String, source: BoxError },
}

impl StorageError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(context: impl Into<String>) -> Self {
        Self::NotFound {
            context: context.into(),
        }
    }

    pub fn unknown(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Unknown {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            Self::ForeignKeyViolation { .. } => ErrorKind::ForeignKeyViolation,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind() == kind
    }

    /// Label of the entity a violated foreign key points at, when known.
    pub fn related_entity(&self) -> Option<&'static str> {
        match self {
            Self::ForeignKeyViolation { related_entity, .. } => *related_entity,
            _ => None,
        }
    }

    /// Returns `true` when the failure was caused by a cancelled or expired
    /// query context.
    pub fn is_cancelled(&self) -> bool {
        self.find_source::<Cancelled>().is_some()
    }

    /// Walks the source chain and returns the first cause of type `E`.
    pub fn find_source<E: Error + 'static>(&self) -> Option<&E> {
        let mut current = self.source();
        while let Some(err) = current {
            if let Some(found) = err.downcast_ref::<E>() {
                return Some(found);
            }
            current = err.source();
        }
        None
    }
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { context } => write!(f, "{context}: not found"),
            Self::DuplicateKey { context, .. } => write!(f, "{context}: duplicate key value"),
            Self::ForeignKeyViolation {
                context,
                related_entity: Some(entity),
                ..
            } => write!(
                f,
                "{context}: foreign key violation, referenced {entity} does not exist"
            ),
            Self::ForeignKeyViolation { context, .. } => {
                write!(f, "{context}: foreign key violation")
            }
            Self::Validation { message } => write!(f, "validation error: {message}"),
            Self::Unknown { context, source } => write!(f, "{context}: {source}"),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NotFound { .. } | Self::Validation { .. } => None,
            Self::DuplicateKey { source, .. }
            | Self::ForeignKeyViolation { source, .. }
            | Self::Unknown { source, .. } => Some(source.as_ref()),
        }
    }
}

/// Marker placed in the source chain of cancelled operations.
#[derive(Debug)]
pub struct Cancelled {
    source: BoxError,
}

impl Cancelled {
    pub fn new(source: impl Into<BoxError>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl Display for Cancelled {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("operation cancelled")
    }
}

impl Error for Cancelled {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Engine-neutral view of a native driver failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverFailure {
    NoRows,
    UniqueViolation { constraint: Option<String> },
    ForeignKeyViolation { constraint: Option<String> },
    Cancelled,
    Other,
}

/// The only engine-specific seam of the taxonomy.
///
/// Implemented for the bundled engine in `db::driver` and for
/// [`NativeError`], a SQLSTATE-shaped signal any other driver can produce.
pub trait DriverError: Error + Send + Sync + 'static {
    fn failure(&self) -> DriverFailure;
}

/// Translates a driver failure into a [`StorageError`].
pub fn classify<E: DriverError>(context: &str, err: E) -> StorageError {
    let failure = err.failure();
    classify_failure(context, err, failure)
}

/// Like [`classify`], naming `constraint` as the violated foreign key when the
/// driver did not report one.
pub fn classify_with_constraint<E: DriverError>(
    context: &str,
    err: E,
    constraint: &str,
) -> StorageError {
    let failure = match err.failure() {
        DriverFailure::ForeignKeyViolation { constraint: None } => {
            DriverFailure::ForeignKeyViolation {
                constraint: Some(constraint.to_string()),
            }
        }
        failure => failure,
    };
    classify_failure(context, err, failure)
}

fn classify_failure<E: DriverError>(context: &str, err: E, failure: DriverFailure) -> StorageError {
    let context = context.to_string();
    match failure {
        DriverFailure::NoRows => StorageError::NotFound { context },
        DriverFailure::UniqueViolation { .. } => StorageError::DuplicateKey {
            context,
            source: Box::new(err),
        },
        DriverFailure::ForeignKeyViolation { constraint } => StorageError::ForeignKeyViolation {
            context,
            related_entity: constraint.as_deref().and_then(resolve_related_entity),
            source: Box::new(err),
        },
        DriverFailure::Cancelled => StorageError::Unknown {
            context,
            source: Box::new(Cancelled::new(err)),
        },
        DriverFailure::Other => StorageError::Unknown {
            context,
            source: Box::new(err),
        },
    }
}

/// Adds a context message to a driver result and classifies its error.
pub trait StorageResultExt<T> {
    fn context(self, context: &str) -> StorageResult<T>;

    /// For writes guarded by one known foreign key.
    fn context_fk(self, context: &str, constraint: &str) -> StorageResult<T>;
}

impl<T, E: DriverError> StorageResultExt<T> for Result<T, E> {
    fn context(self, context: &str) -> StorageResult<T> {
        self.map_err(|err| classify(context, err))
    }

    fn context_fk(self, context: &str, constraint: &str) -> StorageResult<T> {
        self.map_err(|err| classify_with_constraint(context, err, constraint))
    }
}

// Ordered: first substring match wins, so longer names that contain a
// shorter entry must come first.
const RELATED_ENTITY_LABELS: &[(&str, &str)] = &[
    ("bank_account_id", "bank account"),
    ("payment_initiation_id", "payment initiation"),
    ("connector_id", "connector"),
    ("connection_id", "open banking connection"),
    ("account_id", "account"),
    ("payment_id", "payment"),
    ("psu_id", "payment service user"),
    ("pool_id", "pool"),
];

/// Resolves a foreign-key constraint name to a human-readable entity label.
pub fn resolve_related_entity(constraint: &str) -> Option<&'static str> {
    RELATED_ENTITY_LABELS
        .iter()
        .find(|(needle, _)| constraint.contains(needle))
        .map(|(_, label)| *label)
}

pub const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";
pub const SQLSTATE_FOREIGN_KEY_VIOLATION: &str = "23503";
pub const SQLSTATE_NO_DATA_FOUND: &str = "P0002";
pub const SQLSTATE_QUERY_CANCELED: &str = "57014";

/// SQLSTATE-shaped failure reported by an external relational driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub code: String,
    pub constraint: Option<String>,
    pub message: String,
}

impl NativeError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            constraint: None,
            message: message.into(),
        }
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }

    pub fn no_rows() -> Self {
        Self::new(SQLSTATE_NO_DATA_FOUND, "no rows in result set")
    }
}

impl Display for NativeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (SQLSTATE {})", self.message, self.code)
    }
}

impl Error for NativeError {}

impl DriverError for NativeError {
    fn failure(&self) -> DriverFailure {
        match self.code.as_str() {
            SQLSTATE_NO_DATA_FOUND => DriverFailure::NoRows,
            SQLSTATE_UNIQUE_VIOLATION => DriverFailure::UniqueViolation {
                constraint: self.constraint.clone(),
            },
            SQLSTATE_FOREIGN_KEY_VIOLATION => DriverFailure::ForeignKeyViolation {
                constraint: self.constraint.clone(),
            },
            SQLSTATE_QUERY_CANCELED => DriverFailure::Cancelled,
            _ => DriverFailure::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_results_pass_through_unchanged() {
        let result: Result<u32, NativeError> = Ok(7);
        assert_eq!(result.context("failed to fetch").unwrap(), 7);
    }

    #[test]
    fn first_matching_label_wins() {
        assert_eq!(
            resolve_related_entity("bank_accounts_related_accounts_bank_account_id_fk"),
            Some("bank account")
        );
        assert_eq!(
            resolve_related_entity("accounts_connector_id_fk"),
            Some("connector")
        );
        assert_eq!(resolve_related_entity("balances_account_id_fk"), Some("account"));
        assert_eq!(resolve_related_entity("something_else"), None);
    }

    #[test]
    fn cancellation_is_unknown_with_marker() {
        let err = classify(
            "failed to list",
            NativeError::new(SQLSTATE_QUERY_CANCELED, "canceling statement"),
        );
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(err.is_cancelled());
        assert!(err.find_source::<NativeError>().is_some());
    }

    #[test]
    fn constraint_hint_fills_unnamed_foreign_keys_only() {
        let unnamed = NativeError::new(SQLSTATE_FOREIGN_KEY_VIOLATION, "fk failed");
        let err = classify_with_constraint("ctx", unnamed, "accounts_connector_id_fk");
        assert_eq!(err.related_entity(), Some("connector"));

        let named = NativeError::new(SQLSTATE_FOREIGN_KEY_VIOLATION, "fk failed")
            .with_constraint("payments_account_id_fk");
        let err = classify_with_constraint("ctx", named, "accounts_connector_id_fk");
        assert_eq!(err.related_entity(), Some("account"));

        let err = classify_with_constraint("ctx", NativeError::no_rows(), "x_connector_id_fk");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn display_hides_cause_for_typed_kinds() {
        let err = classify("failed to insert account", NativeError::no_rows());
        assert_eq!(err.to_string(), "failed to insert account: not found");
    }
}
