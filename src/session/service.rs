//! The session service: orchestrates tokens, storage, state, and transport.

use std::sync::{Arc, Mutex, MutexGuard};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::AuthError;
use crate::session::oauth::{OauthProvider, ProviderKind, ProviderRegistry};
use crate::session::state::{AuthState, StateCell};
use crate::store::{StorageCapabilities, TokenStore};
use crate::token::{Token, TokenRole};
use crate::transport::{Method, Transport};

// ============================================================================
// Wire contract
// ============================================================================

/// Default header carrying the serialized access token on every request.
pub const ACCESS_TOKEN_HEADER: &str = "X-Access-Data";

/// Header carrying the serialized refresh token on a refresh exchange.
const REFRESH_TOKEN_HEADER: &str = "X-Refresh-Data";

/// Header selecting token authentication on the login endpoint.
const AUTH_TYPE_HEADER: &str = "X-Authentication-Type";

const LOGIN_PATH: &str = "sn-token/login";
const REFRESH_PATH: &str = "sn-token/refresh";
const LOGOUT_PATH: &str = "sn-token/logout";

/// Username reported while no token carries one.
pub const ANONYMOUS_USER: &str = "Visitor";

/// Body of a successful login response.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    access: String,
    refresh: String,
}

/// Body of a successful refresh response. Servers may echo a refresh token;
/// it is ignored, the stored one stays authoritative.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
}

// ============================================================================
// Service
// ============================================================================

/// Client-side authentication session over a content repository.
///
/// Owns the token pair, the storage backend, and the observable
/// [`AuthState`]; pushes the active access token into the transport's
/// default headers so outgoing requests need no per-call wiring.
///
/// Login and refresh failures never surface as errors: they resolve into
/// state transitions (and a boolean result for login) so callers react to
/// one state stream instead of catching errors at every call site.
pub struct SessionService {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    store: Mutex<TokenStore>,
    state: StateCell,
    providers: Mutex<ProviderRegistry>,
    /// Single-flight gate for refresh exchanges: concurrent update checks
    /// serialize here, and late arrivals skip the network round trip once a
    /// peer has already refreshed.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl SessionService {
    /// Construct a session in the `Pending` state without touching the
    /// network. Most callers want [`SessionService::start`].
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        capabilities: StorageCapabilities,
    ) -> Self {
        let store = TokenStore::new(&config, capabilities);
        Self {
            config,
            transport,
            store: Mutex::new(store),
            state: StateCell::new(),
            providers: Mutex::new(ProviderRegistry::default()),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Construct a session and immediately run the update check, restoring
    /// a previous session from storage when the persisted tokens allow it.
    pub async fn start(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        capabilities: StorageCapabilities,
    ) -> Self {
        let service = Self::new(config, transport, capabilities);
        service.check_for_update().await;
        service
    }

    /// Snapshot of the current authentication state.
    pub fn current_state(&self) -> AuthState {
        self.state.current()
    }

    /// Subscribe to authentication state changes. The receiver starts at
    /// the latest state; consecutive duplicates are never delivered.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Username of the current session: the access token's name claim while
    /// valid, else the refresh token's, else [`ANONYMOUS_USER`].
    pub fn current_user(&self) -> String {
        let (access, refresh) = {
            let store = self.store();
            (store.get(TokenRole::Access), store.get(TokenRole::Refresh))
        };
        access
            .valid_user_name()
            .or_else(|| refresh.valid_user_name())
            .unwrap_or_else(|| ANONYMOUS_USER.to_string())
    }

    /// Pre-request refresh gate.
    ///
    /// Emits `Authenticated` when the stored access token is still valid,
    /// `Unauthenticated` when no usable refresh token exists, and otherwise
    /// runs the refresh exchange. Returns whether a refresh was triggered.
    pub async fn check_for_update(&self) -> bool {
        let (access, refresh) = {
            let store = self.store();
            (store.get(TokenRole::Access), store.get(TokenRole::Refresh))
        };

        if access.is_valid() {
            self.publish(AuthState::Authenticated);
            return false;
        }
        if !refresh.is_valid() {
            self.publish(AuthState::Unauthenticated);
            return false;
        }

        self.publish(AuthState::Pending);
        self.execute_refresh(refresh).await;
        true
    }

    /// Exchange the refresh token for a fresh access token.
    ///
    /// On failure the refresh token is left untouched so the next check can
    /// retry; the outcome is reflected purely in state.
    async fn execute_refresh(&self, refresh: Token) {
        let _gate = self.refresh_gate.lock().await;

        // A peer may have completed the exchange while we waited.
        if self.store().get(TokenRole::Access).is_valid() {
            self.publish(AuthState::Authenticated);
            return;
        }

        let url = self.token_url(REFRESH_PATH);
        let headers = vec![(REFRESH_TOKEN_HEADER.to_string(), refresh.serialize())];

        let response = match self.transport.send(Method::Post, &url, &headers).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                debug!(status = response.status, "Token refresh rejected");
                self.publish(AuthState::Unauthenticated);
                return;
            }
            Err(e) => {
                debug!(error = %e, "Token refresh transport failure");
                self.publish(AuthState::Unauthenticated);
                return;
            }
        };

        let body: RefreshResponse = match response.json() {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Malformed refresh response");
                self.publish(AuthState::Unauthenticated);
                return;
            }
        };

        let access = Token::from_encoded(&body.access);
        if let Err(e) = self.store().set(TokenRole::Access, &access) {
            warn!(error = %e, "Failed to persist refreshed access token");
            self.publish(AuthState::Unauthenticated);
            return;
        }
        self.publish(AuthState::Authenticated);
    }

    /// Authenticate with username and password.
    ///
    /// Emits `Pending` immediately, then `Authenticated` or
    /// `Unauthenticated` depending on the outcome. Resolves to the success
    /// flag in both cases; transport failures are never raised.
    pub async fn login(&self, username: &str, password: &str) -> bool {
        self.publish(AuthState::Pending);

        let url = self.token_url(LOGIN_PATH);
        let credentials = STANDARD.encode(format!("{username}:{password}"));
        let headers = vec![
            (AUTH_TYPE_HEADER.to_string(), "Token".to_string()),
            ("Authorization".to_string(), format!("Basic {credentials}")),
        ];

        let response = match self.transport.send(Method::Post, &url, &headers).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                debug!(status = response.status, "Login rejected");
                self.publish(AuthState::Unauthenticated);
                return false;
            }
            Err(e) => {
                debug!(error = %e, "Login transport failure");
                self.publish(AuthState::Unauthenticated);
                return false;
            }
        };

        let body: LoginResponse = match response.json() {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Malformed login response");
                self.publish(AuthState::Unauthenticated);
                return false;
            }
        };

        let access = Token::from_encoded(&body.access);
        let refresh = Token::from_encoded(&body.refresh);
        {
            let mut store = self.store();
            if let Err(e) = store.set(TokenRole::Access, &access) {
                warn!(error = %e, "Failed to persist access token");
            }
            if let Err(e) = store.set(TokenRole::Refresh, &refresh) {
                warn!(error = %e, "Failed to persist refresh token");
            }
        }

        let authenticated = access.is_valid();
        self.publish(if authenticated {
            AuthState::Authenticated
        } else {
            AuthState::Unauthenticated
        });
        authenticated
    }

    /// End the session.
    ///
    /// Clears both stored tokens and emits `Unauthenticated` before the
    /// server is notified; the logout call itself is best effort and its
    /// result is ignored.
    pub async fn logout(&self) {
        {
            let mut store = self.store();
            if let Err(e) = store.set(TokenRole::Access, &Token::empty()) {
                warn!(error = %e, "Failed to clear access token");
            }
            if let Err(e) = store.set(TokenRole::Refresh, &Token::empty()) {
                warn!(error = %e, "Failed to clear refresh token");
            }
        }
        self.publish(AuthState::Unauthenticated);

        let url = self.token_url(LOGOUT_PATH);
        if let Err(e) = self.transport.send(Method::Post, &url, &[]).await {
            debug!(error = %e, "Logout notification failed");
        }
    }

    /// Register an OAuth provider. At most one instance per kind.
    pub fn register_oauth_provider(
        &self,
        provider: Arc<dyn OauthProvider>,
    ) -> Result<(), AuthError> {
        self.providers().register(provider)
    }

    /// Look up a registered OAuth provider by kind.
    pub fn oauth_provider(&self, kind: ProviderKind) -> Result<Arc<dyn OauthProvider>, AuthError> {
        self.providers().get(kind)
    }

    // ------------------------------------------------------------------------

    /// Publish a state and synchronize the transport's access-token header.
    ///
    /// The header always mirrors the stored access token: set to its
    /// serialized form while valid, cleared otherwise. The sync runs even
    /// when the state itself is a suppressed duplicate, since a refresh can
    /// replace the token without changing the state.
    fn publish(&self, next: AuthState) {
        let access = self.store().get(TokenRole::Access);
        if access.is_valid() {
            self.transport
                .set_default_header(ACCESS_TOKEN_HEADER, &access.serialize());
        } else {
            self.transport.clear_default_header(ACCESS_TOKEN_HEADER);
        }
        self.state.publish(next);
    }

    fn token_url(&self, path: &str) -> String {
        format!("{}/{}", self.config.repository_url.trim_end_matches('/'), path)
    }

    fn store(&self) -> MutexGuard<'_, TokenStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn providers(&self) -> MutexGuard<'_, ProviderRegistry> {
        self.providers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
