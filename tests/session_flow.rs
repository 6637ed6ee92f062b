//! End-to-end session scenarios against a scripted mock transport.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use anyhow::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;

use sn_session::{
    AuthState, KeyValueStore, MemoryKeyValueStore, Method, ProviderKind, SessionConfig,
    SessionService, StorageCapabilities, TokenRole, TokenStore, Transport, TransportResponse,
    ACCESS_TOKEN_HEADER, ANONYMOUS_USER,
};

const REPO_URL: &str = "https://repo.example.com";

fn init_tracing() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// Mock transport
// ============================================================================

#[derive(Debug)]
struct SentRequest {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
}

/// Transport stub: hands out queued responses in order and records every
/// request and default-header mutation.
#[derive(Default)]
struct MockTransport {
    responses: Mutex<VecDeque<Result<TransportResponse>>>,
    requests: Mutex<Vec<SentRequest>>,
    defaults: Mutex<HashMap<String, String>>,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn queue_response(&self, status: u16, body: &str) {
        self.lock(&self.responses).push_back(Ok(TransportResponse {
            status,
            body: body.to_string(),
        }));
    }

    fn queue_error(&self, message: &str) {
        self.lock(&self.responses)
            .push_back(Err(anyhow::anyhow!("{message}")));
    }

    fn requests(&self) -> MutexGuard<'_, Vec<SentRequest>> {
        self.lock(&self.requests)
    }

    fn default_header(&self, name: &str) -> Option<String> {
        self.lock(&self.defaults).get(name).cloned()
    }

    fn lock<'a, T>(&'a self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<TransportResponse> {
        self.requests().push(SentRequest {
            method,
            url: url.to_string(),
            headers: headers.to_vec(),
        });
        self.lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Ok(TransportResponse { status: 404, body: String::new() }))
    }

    fn set_default_header(&self, name: &str, value: &str) {
        self.lock(&self.defaults)
            .insert(name.to_string(), value.to_string());
    }

    fn clear_default_header(&self, name: &str) {
        self.lock(&self.defaults).remove(name);
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Serialized token for `name` expiring `lifetime_secs` from now (negative
/// for an already expired token).
fn make_token(name: &str, lifetime_secs: i64) -> String {
    let now = Utc::now().timestamp();
    let payload = format!(
        r#"{{"sub":"u-{name}","name":"{name}","iat":{now},"nbf":{nbf},"exp":{exp}}}"#,
        nbf = now - 3600,
        exp = now + lifetime_secs,
    );
    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#),
        URL_SAFE_NO_PAD.encode(payload)
    )
}

fn config() -> SessionConfig {
    SessionConfig::new(REPO_URL)
}

/// Capabilities backed by a shared durable store pair so tests can seed and
/// inspect persisted tokens.
fn durable_caps() -> (StorageCapabilities, Arc<MemoryKeyValueStore>) {
    let session_store = Arc::new(MemoryKeyValueStore::new());
    let caps = StorageCapabilities {
        local: Some(Arc::new(MemoryKeyValueStore::new())),
        session: Some(session_store.clone()),
        cookies: None,
    };
    (caps, session_store)
}

/// Derive the storage key the session will use for `role`.
fn storage_key(role: TokenRole) -> String {
    TokenStore::new(&config(), StorageCapabilities::none()).store_key(role)
}

fn header_value(request: &SentRequest, name: &str) -> Option<String> {
    request
        .headers
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.clone())
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn empty_store_resolves_unauthenticated() {
    init_tracing();
    let transport = MockTransport::new();
    let service = SessionService::new(config(), transport.clone(), StorageCapabilities::none());

    let rx = service.subscribe();
    assert_eq!(*rx.borrow(), AuthState::Pending);

    let refreshed = service.check_for_update().await;
    assert!(!refreshed);
    assert_eq!(service.current_state(), AuthState::Unauthenticated);
    assert_eq!(service.current_user(), ANONYMOUS_USER);
    // No usable refresh token, so nothing went over the wire.
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn login_success_authenticates_and_sets_header() {
    init_tracing();
    let access = make_token("alice", 3600);
    let refresh = make_token("alice", 86_400);

    let transport = MockTransport::new();
    transport.queue_response(
        200,
        &format!(r#"{{"access":"{access}","refresh":"{refresh}"}}"#),
    );
    let service = SessionService::new(config(), transport.clone(), StorageCapabilities::none());

    assert!(service.login("alice", "correct-password").await);
    assert_eq!(service.current_state(), AuthState::Authenticated);
    assert_eq!(service.current_user(), "alice");
    assert_eq!(
        transport.default_header(ACCESS_TOKEN_HEADER).as_deref(),
        Some(access.as_str())
    );

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    let login = &requests[0];
    assert_eq!(login.method, Method::Post);
    assert_eq!(login.url, format!("{REPO_URL}/sn-token/login"));
    assert_eq!(
        header_value(login, "X-Authentication-Type").as_deref(),
        Some("Token")
    );
    assert_eq!(
        header_value(login, "Authorization").as_deref(),
        Some("Basic YWxpY2U6Y29ycmVjdC1wYXNzd29yZA==")
    );
}

#[tokio::test]
async fn login_http_error_resolves_false() {
    init_tracing();
    let transport = MockTransport::new();
    transport.queue_response(401, r#"{"error":"invalid credentials"}"#);
    let service = SessionService::new(config(), transport.clone(), StorageCapabilities::none());

    assert!(!service.login("alice", "wrong-password").await);
    assert_eq!(service.current_state(), AuthState::Unauthenticated);
    assert_eq!(transport.default_header(ACCESS_TOKEN_HEADER), None);
}

#[tokio::test]
async fn login_transport_failure_resolves_false() {
    init_tracing();
    let transport = MockTransport::new();
    transport.queue_error("connection refused");
    let service = SessionService::new(config(), transport.clone(), StorageCapabilities::none());

    assert!(!service.login("alice", "correct-password").await);
    assert_eq!(service.current_state(), AuthState::Unauthenticated);
}

#[tokio::test]
async fn login_with_expired_access_token_is_rejected() {
    init_tracing();
    let access = make_token("alice", -60);
    let refresh = make_token("alice", 86_400);

    let transport = MockTransport::new();
    transport.queue_response(
        200,
        &format!(r#"{{"access":"{access}","refresh":"{refresh}"}}"#),
    );
    let service = SessionService::new(config(), transport.clone(), StorageCapabilities::none());

    assert!(!service.login("alice", "correct-password").await);
    assert_eq!(service.current_state(), AuthState::Unauthenticated);
    assert_eq!(transport.default_header(ACCESS_TOKEN_HEADER), None);
}

#[tokio::test]
async fn logout_clears_tokens_state_and_header() {
    init_tracing();
    let access = make_token("alice", 3600);
    let refresh = make_token("alice", 86_400);

    let transport = MockTransport::new();
    transport.queue_response(
        200,
        &format!(r#"{{"access":"{access}","refresh":"{refresh}"}}"#),
    );
    transport.queue_response(200, "");
    let service = SessionService::new(config(), transport.clone(), StorageCapabilities::none());

    assert!(service.login("alice", "correct-password").await);
    service.logout().await;

    assert_eq!(service.current_state(), AuthState::Unauthenticated);
    assert_eq!(service.current_user(), ANONYMOUS_USER);
    assert_eq!(transport.default_header(ACCESS_TOKEN_HEADER), None);

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].url, format!("{REPO_URL}/sn-token/logout"));
}

#[tokio::test]
async fn logout_state_does_not_depend_on_server_ack() {
    init_tracing();
    let transport = MockTransport::new();
    transport.queue_error("server unreachable");
    let service = SessionService::new(config(), transport.clone(), StorageCapabilities::none());

    service.logout().await;
    assert_eq!(service.current_state(), AuthState::Unauthenticated);
}

#[tokio::test]
async fn refresh_exchange_restores_authentication() {
    init_tracing();
    let refresh = make_token("alice", 86_400);
    let new_access = make_token("alice", 3600);

    // A previous session left only the refresh token behind.
    let (caps, session_store) = durable_caps();
    session_store
        .write(&storage_key(TokenRole::Refresh), &refresh)
        .unwrap();

    let transport = MockTransport::new();
    transport.queue_response(200, &format!(r#"{{"access":"{new_access}"}}"#));
    let service = SessionService::start(config(), transport.clone(), caps).await;

    assert_eq!(service.current_state(), AuthState::Authenticated);
    assert_eq!(service.current_user(), "alice");
    assert_eq!(
        transport.default_header(ACCESS_TOKEN_HEADER).as_deref(),
        Some(new_access.as_str())
    );
    assert_eq!(
        session_store.read(&storage_key(TokenRole::Access)).unwrap().as_deref(),
        Some(new_access.as_str())
    );

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    let exchange = &requests[0];
    assert_eq!(exchange.url, format!("{REPO_URL}/sn-token/refresh"));
    assert_eq!(
        header_value(exchange, "X-Refresh-Data").as_deref(),
        Some(refresh.as_str())
    );
    drop(requests);

    // A second check finds the fresh access token and triggers nothing.
    assert!(!service.check_for_update().await);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn refresh_failure_keeps_refresh_token_for_retry() {
    init_tracing();
    let refresh = make_token("alice", 86_400);
    let (caps, session_store) = durable_caps();
    session_store
        .write(&storage_key(TokenRole::Refresh), &refresh)
        .unwrap();

    let transport = MockTransport::new();
    transport.queue_response(500, "internal error");
    let service = SessionService::new(config(), transport.clone(), caps);

    let refreshed = service.check_for_update().await;
    assert!(refreshed);
    assert_eq!(service.current_state(), AuthState::Unauthenticated);

    // Untouched: the next check retries the exchange.
    assert_eq!(
        session_store.read(&storage_key(TokenRole::Refresh)).unwrap().as_deref(),
        Some(refresh.as_str())
    );
    let access = make_token("alice", 3600);
    transport.queue_response(200, &format!(r#"{{"access":"{access}"}}"#));
    assert!(service.check_for_update().await);
    assert_eq!(service.current_state(), AuthState::Authenticated);
}

#[tokio::test]
async fn concurrent_checks_share_a_single_refresh() {
    init_tracing();
    let refresh = make_token("alice", 86_400);
    let (caps, session_store) = durable_caps();
    session_store
        .write(&storage_key(TokenRole::Refresh), &refresh)
        .unwrap();

    let transport = MockTransport::new();
    transport.queue_response(200, &format!(r#"{{"access":"{}"}}"#, make_token("alice", 3600)));
    let service = SessionService::new(config(), transport.clone(), caps);

    tokio::join!(service.check_for_update(), service.check_for_update());

    assert_eq!(service.current_state(), AuthState::Authenticated);
    // Only one exchange went over the wire.
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn repeated_authenticated_checks_notify_once() {
    init_tracing();
    let (caps, session_store) = durable_caps();
    session_store
        .write(&storage_key(TokenRole::Access), &make_token("alice", 3600))
        .unwrap();

    let transport = MockTransport::new();
    let service = SessionService::new(config(), transport.clone(), caps);
    let mut rx = service.subscribe();
    rx.mark_unchanged();

    assert!(!service.check_for_update().await);
    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), AuthState::Authenticated);

    assert!(!service.check_for_update().await);
    assert!(!rx.has_changed().unwrap());
}

#[tokio::test]
async fn oauth_registry_round_trip() {
    init_tracing();
    struct StubProvider(ProviderKind);

    #[async_trait]
    impl sn_session::OauthProvider for StubProvider {
        fn kind(&self) -> ProviderKind {
            self.0
        }
        async fn login(&self, _id_token: &str) -> bool {
            true
        }
    }

    let service = SessionService::new(
        config(),
        MockTransport::new(),
        StorageCapabilities::none(),
    );

    let google: Arc<dyn sn_session::OauthProvider> = Arc::new(StubProvider(ProviderKind::Google));
    service.register_oauth_provider(google.clone()).unwrap();
    assert!(service
        .register_oauth_provider(Arc::new(StubProvider(ProviderKind::Google)))
        .is_err());

    let found = service.oauth_provider(ProviderKind::Google).unwrap();
    assert!(Arc::ptr_eq(&found, &google));
    assert!(service.oauth_provider(ProviderKind::Facebook).is_err());
    assert!(found.login("external-id-token").await);
}

#[tokio::test]
async fn tokens_survive_a_simulated_restart() {
    init_tracing();
    let access = make_token("alice", 3600);
    let refresh = make_token("alice", 86_400);
    let (caps, _) = durable_caps();

    let transport = MockTransport::new();
    transport.queue_response(
        200,
        &format!(r#"{{"access":"{access}","refresh":"{refresh}"}}"#),
    );
    let service = SessionService::new(config(), transport.clone(), caps.clone());
    assert!(service.login("alice", "correct-password").await);
    drop(service);

    // Same capability handles, fresh service: the persisted access token is
    // picked up without any network traffic.
    let transport2 = MockTransport::new();
    let service2 = SessionService::start(config(), transport2.clone(), caps).await;
    assert_eq!(service2.current_state(), AuthState::Authenticated);
    assert_eq!(service2.current_user(), "alice");
    assert!(transport2.requests().is_empty());
}
