//! Session and authentication core for a content-repository client SDK.
//!
//! This crate manages a JWT pair (access + refresh), persists it across
//! host restarts through pluggable storage backends, exposes a single
//! observable authentication state, and transparently refreshes expired
//! access tokens before outgoing requests.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sn_session::{HttpTransport, SessionConfig, SessionService, StorageCapabilities};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let transport = Arc::new(HttpTransport::new()?);
//! let config = SessionConfig::new("https://repo.example.com");
//! let session = SessionService::start(config, transport, StorageCapabilities::none()).await;
//!
//! if session.login("alice", "password").await {
//!     println!("logged in as {}", session.current_user());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod session;
pub mod store;
pub mod token;
pub mod transport;

pub use config::{SessionConfig, TokenPersist};
pub use error::AuthError;
pub use session::{AuthState, OauthProvider, ProviderKind, SessionService, ACCESS_TOKEN_HEADER, ANONYMOUS_USER};
pub use store::{
    CookieJar, KeyValueStore, MemoryCookieJar, MemoryKeyValueStore, StorageCapabilities,
    StorageKind, TokenStore,
};
pub use token::{Claims, Token, TokenRole};
pub use transport::{HttpTransport, Method, Transport, TransportResponse};
