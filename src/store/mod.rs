//! Token persistence.
//!
//! A [`TokenStore`] holds the session's two token slots (access and
//! refresh) on top of exactly one storage backend. The backend is chosen
//! once at construction from the host's [`StorageCapabilities`] and the
//! configured persistence preference, and is never re-evaluated.
//!
//! Read failures degrade to the empty token so a broken or revoked backend
//! can only ever log the user out; write failures propagate, since a quota
//! error on login is something the caller should hear about.

pub mod backends;

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::DateTime;
use tracing::debug;

use crate::config::{SessionConfig, TokenPersist};
use crate::token::{Token, TokenRole};

pub use backends::{CookieJar, KeyValueStore, MemoryCookieJar, MemoryKeyValueStore, StorageCapabilities};

/// The concrete persistence backend a store operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    InMemory,
    LocalStorage,
    SessionStorage,
    SessionCookie,
    ExpirationCookie,
}

/// Pick the backend for a session. Pure function of the capability set and
/// the persistence preference:
///
/// 1. neither a durable store nor a cookie jar -> `InMemory`
/// 2. `Expiration` preference -> `LocalStorage`, or `ExpirationCookie`
///    without a durable store
/// 3. `Session` preference -> `SessionStorage`, or `SessionCookie` without
///    a durable store
pub fn select_storage_kind(persistence: TokenPersist, caps: &StorageCapabilities) -> StorageKind {
    let durable = caps.has_durable_store();
    if !durable && !caps.has_cookie_jar() {
        return StorageKind::InMemory;
    }
    match persistence {
        TokenPersist::Expiration if durable => StorageKind::LocalStorage,
        TokenPersist::Expiration => StorageKind::ExpirationCookie,
        TokenPersist::Session if durable => StorageKind::SessionStorage,
        TokenPersist::Session => StorageKind::SessionCookie,
    }
}

/// Role-keyed token persistence over a single backend.
pub struct TokenStore {
    site_name: String,
    key_template: String,
    kind: StorageKind,
    caps: StorageCapabilities,
    // Backing map for the InMemory kind, keyed by derived store key.
    memory: HashMap<String, String>,
}

impl TokenStore {
    pub fn new(config: &SessionConfig, caps: StorageCapabilities) -> Self {
        let kind = select_storage_kind(config.persistence, &caps);
        debug!(?kind, site = %config.repository_url, "Token store backend selected");
        Self {
            site_name: config.repository_url.clone(),
            key_template: config.token_key_template.clone(),
            kind,
            caps,
            memory: HashMap::new(),
        }
    }

    /// The backend chosen at construction.
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    /// Derive the storage key for a token role.
    pub fn store_key(&self, role: TokenRole) -> String {
        self.key_template
            .replace("${siteName}", &self.site_name)
            .replace("${tokenName}", role.as_str())
    }

    /// Read the token stored for `role`.
    ///
    /// Every failure path (backend error, missing entry) yields
    /// `Token::empty()`; storage reads never surface errors.
    pub fn get(&self, role: TokenRole) -> Token {
        let key = self.store_key(role);
        match self.kind {
            StorageKind::InMemory => self
                .memory
                .get(&key)
                .map(|raw| Token::from_encoded(raw))
                .unwrap_or_else(Token::empty),
            StorageKind::LocalStorage => read_kv(self.caps.local.as_deref(), &key),
            StorageKind::SessionStorage => read_kv(self.caps.session.as_deref(), &key),
            StorageKind::SessionCookie | StorageKind::ExpirationCookie => self.read_cookie(&key),
        }
    }

    /// Persist a token for `role`. Write failures propagate.
    pub fn set(&mut self, role: TokenRole, token: &Token) -> Result<()> {
        let key = self.store_key(role);
        let serialized = token.serialize();
        match self.kind {
            StorageKind::InMemory => {
                self.memory.insert(key, serialized);
                Ok(())
            }
            StorageKind::LocalStorage => write_kv(self.caps.local.as_deref(), &key, &serialized),
            StorageKind::SessionStorage => write_kv(self.caps.session.as_deref(), &key, &serialized),
            StorageKind::SessionCookie => self
                .cookie_jar()?
                .set_cookie(&format!("{key}={serialized}")),
            StorageKind::ExpirationCookie => {
                let expires = http_date(token.claims().expires_at);
                self.cookie_jar()?
                    .set_cookie(&format!("{key}={serialized}; expires={expires};"))
            }
        }
    }

    fn cookie_jar(&self) -> Result<&dyn CookieJar> {
        self.caps
            .cookies
            .as_deref()
            .context("cookie jar capability missing")
    }

    fn read_cookie(&self, key: &str) -> Token {
        let Ok(jar) = self.cookie_jar() else {
            return Token::empty();
        };
        let header = match jar.cookie_header() {
            Ok(header) => header,
            Err(e) => {
                debug!(error = %e, "Cookie read failed, treating as no token");
                return Token::empty();
            }
        };
        let prefix = format!("{key}=");
        header
            .split(';')
            .map(str::trim)
            .find_map(|entry| entry.strip_prefix(prefix.as_str()))
            .map(Token::from_encoded)
            .unwrap_or_else(Token::empty)
    }
}

fn read_kv(store: Option<&dyn KeyValueStore>, key: &str) -> Token {
    let Some(store) = store else {
        return Token::empty();
    };
    match store.read(key) {
        Ok(Some(raw)) => Token::from_encoded(&raw),
        Ok(None) => Token::empty(),
        Err(e) => {
            debug!(key, error = %e, "Storage read failed, treating as no token");
            Token::empty()
        }
    }
}

fn write_kv(store: Option<&dyn KeyValueStore>, key: &str, value: &str) -> Result<()> {
    store
        .context("durable store capability missing")?
        .write(key, value)
}

/// Render an epoch-seconds expiry as an HTTP cookie date.
fn http_date(epoch_secs: i64) -> String {
    DateTime::from_timestamp(epoch_secs, 0)
        .unwrap_or_default()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
