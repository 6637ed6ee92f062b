//! Storage capability traits and in-memory implementations.
//!
//! Backend availability is an explicit, injected capability set: a host
//! hands the session the key-value stores and cookie jar it actually has,
//! and the backend decision becomes a pure function of what was passed in.
//! Browser hosts bridge these traits to `localStorage`/`sessionStorage` and
//! `document.cookie`; native hosts and tests use the in-memory variants.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;

/// A durable string key-value store (a `localStorage`/`sessionStorage`
/// equivalent).
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn read(&self, key: &str) -> Result<Option<String>>;
    /// Write `value` under `key`, replacing any existing value.
    fn write(&self, key: &str, value: &str) -> Result<()>;
}

/// A cookie jar: accepts `Set-Cookie`-shaped strings and renders the
/// combined `Cookie` request header.
pub trait CookieJar: Send + Sync {
    /// The current cookie header, `"name=value; name2=value2"` form.
    fn cookie_header(&self) -> Result<String>;
    /// Store a cookie string such as `"key=value; expires=...;"`.
    fn set_cookie(&self, cookie: &str) -> Result<()>;
}

/// The storage facilities a host makes available to the session.
///
/// A durable store requires both the local and session key-value handles;
/// with neither durable storage nor cookies the session falls back to
/// process memory.
#[derive(Clone, Default)]
pub struct StorageCapabilities {
    pub local: Option<Arc<dyn KeyValueStore>>,
    pub session: Option<Arc<dyn KeyValueStore>>,
    pub cookies: Option<Arc<dyn CookieJar>>,
}

impl StorageCapabilities {
    /// No capabilities at all; token storage stays in process memory.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn has_durable_store(&self) -> bool {
        self.local.is_some() && self.session.is_some()
    }

    pub fn has_cookie_jar(&self) -> bool {
        self.cookies.is_some()
    }
}

/// Thread-safe in-memory [`KeyValueStore`].
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Thread-safe in-memory [`CookieJar`].
///
/// Mirrors browser behavior: only the `name=value` pair before the first
/// `;` is retained, attributes such as `expires` are accepted and dropped.
#[derive(Default)]
pub struct MemoryCookieJar {
    // name -> value, insertion order preserved for a stable header
    cookies: Mutex<Vec<(String, String)>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    fn cookies(&self) -> MutexGuard<'_, Vec<(String, String)>> {
        self.cookies.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CookieJar for MemoryCookieJar {
    fn cookie_header(&self) -> Result<String> {
        let cookies = self.cookies();
        let header = cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        Ok(header)
    }

    fn set_cookie(&self, cookie: &str) -> Result<()> {
        let pair = cookie.split(';').next().unwrap_or("");
        let Some((name, value)) = pair.split_once('=') else {
            return Ok(());
        };
        let name = name.trim().to_string();
        let value = value.trim().to_string();

        let mut cookies = self.cookies();
        if let Some(existing) = cookies.iter_mut().find(|(n, _)| *n == name) {
            existing.1 = value;
        } else {
            cookies.push((name, value));
        }
        Ok(())
    }
}
