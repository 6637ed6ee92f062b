//! OAuth provider registry.
//!
//! Providers are keyed by an explicit [`ProviderKind`] tag. At most one
//! instance per kind may be registered; entries live for the lifetime of
//! the session service and are never removed. Duplicate registration and
//! lookup of an unregistered kind are wiring bugs and fail fast.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AuthError;

/// Identity tag for an OAuth provider implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Google,
    Facebook,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Google => write!(f, "google"),
            ProviderKind::Facebook => write!(f, "facebook"),
        }
    }
}

/// An external identity provider that can exchange its own id token for a
/// repository session.
#[async_trait]
pub trait OauthProvider: Send + Sync {
    /// The kind this provider registers under.
    fn kind(&self) -> ProviderKind;

    /// Exchange a provider-issued id token for repository credentials.
    /// Mirrors the password login contract: failure is a `false` result,
    /// not an error.
    async fn login(&self, id_token: &str) -> bool;
}

/// Kind-keyed provider registry.
#[derive(Default)]
pub(crate) struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn OauthProvider>>,
}

impl ProviderRegistry {
    pub fn register(&mut self, provider: Arc<dyn OauthProvider>) -> Result<(), AuthError> {
        let kind = provider.kind();
        match self.providers.entry(kind) {
            Entry::Occupied(_) => Err(AuthError::DuplicateProvider(kind)),
            Entry::Vacant(slot) => {
                slot.insert(provider);
                Ok(())
            }
        }
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn OauthProvider>, AuthError> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or(AuthError::ProviderNotFound(kind))
    }
}
