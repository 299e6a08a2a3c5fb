use crate::entity::user::Provider;

/// Failures surfaced by the resolver and the admin operations.
///
/// Lookup misses and rejected credentials are not errors: they come back as
/// `Ok(None)` so callers can branch without matching on a variant.
#[derive(Debug)]
pub enum ResolveError {
    /// Any persistence failure, passed through untouched.
    Store(sea_orm::DbErr),
    /// A federated operation was called with `local` or `none`.
    UnsupportedProvider(Provider),
    Conflict(String),
    Hash(String),
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::Store(e) => write!(f, "Store error: {e}"),
            ResolveError::UnsupportedProvider(p) => {
                write!(f, "Provider '{}' cannot own federated users", p.as_str())
            }
            ResolveError::Conflict(msg) => write!(f, "Conflict: {msg}"),
            ResolveError::Hash(e) => write!(f, "Hash error: {e}"),
        }
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResolveError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sea_orm::DbErr> for ResolveError {
    fn from(e: sea_orm::DbErr) -> Self {
        ResolveError::Store(e)
    }
}

pub type ResolveResult<T> = Result<T, ResolveError>;
