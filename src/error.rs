use thiserror::Error;

use crate::session::ProviderKind;

/// Errors this crate reports to callers directly.
///
/// Network and storage-read failures are deliberately absent: per the
/// session contract they degrade into state transitions (and boolean login
/// results) instead of surfacing as errors. What remains here are wiring
/// bugs that should fail fast at the call site.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OAuth provider already registered: {0}")]
    DuplicateProvider(ProviderKind),

    #[error("OAuth provider not registered: {0}")]
    ProviderNotFound(ProviderKind),
}
