//! Session gateway server.
//!
//! Serves the sign-in routes and proxies everything under the mount path to
//! the upstream API with the session's access token attached.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{FromRequestParts, OptionalFromRequestParts, Request, State},
    http::{HeaderValue, StatusCode, request::Parts},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use axum_extra::extract::CookieJar;
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use portico_config::{PorticoConfig, Secret, require_secret};

use crate::claims::SessionClaims;
use crate::error::{OAuthError, ProxyError, RefreshError, Result};
use crate::forwarder::Forwarder;
use crate::lifecycle::TokenLifecycle;
use crate::oauth::OAuthConfig;
use crate::refresh::HttpRefreshClient;
use crate::roles::{RequiredRoles, is_in_role};
use crate::session::SessionCodec;
use crate::signin;

/// Where browsers are sent to start a new session.
pub const SIGNIN_PATH: &str = "/auth/signin";

/// Timeout for calls to the identity provider.
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout for the upstream API. Responses may stream indefinitely.
const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Listener and routing settings for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    /// Path prefix proxied upstream.
    pub mount_path: String,
    /// Answer 401 instead of forwarding anonymous requests.
    pub require_session: bool,
    /// Roles checked before proxying; empty disables the check.
    pub required_roles: Vec<String>,
    /// Origins allowed by CORS; empty disables the layer.
    pub cors_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            mount_path: "/api".to_string(),
            require_session: false,
            required_roles: Vec::new(),
            cors_origins: Vec::new(),
        }
    }
}

impl GatewayConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }
}

/// Shared state, built once at startup.
#[derive(Debug)]
pub struct GatewayState {
    pub lifecycle: TokenLifecycle,
    pub codec: SessionCodec,
    pub forwarder: Forwarder,
    pub oauth: OAuthConfig,
    /// Client for the identity provider.
    pub http: reqwest::Client,
    pub require_session: bool,
    /// `Secure` flag for the short-lived sign-in cookies.
    pub secure_cookies: bool,
}

/// The session gateway.
pub struct Gateway {
    config: GatewayConfig,
    state: Arc<GatewayState>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, state: GatewayState) -> Self {
        Self {
            config,
            state: Arc::new(state),
        }
    }

    /// Build a gateway from loaded configuration.
    ///
    /// Validates the config and resolves both secrets; any gap is an error.
    pub fn from_config(config: &PorticoConfig) -> Result<Self> {
        config.validate()?;

        let provider = config.provider();
        let proxy = config.proxy();
        let session = config.session();
        let server = config.server();

        let client_secret =
            require_secret(Secret::ClientSecret, provider.client_secret.as_deref())?;
        let session_secret = require_secret(Secret::SessionSecret, session.secret.as_deref())?;
        tracing::debug!(
            client_secret = %client_secret.source,
            session_secret = %session_secret.source,
            "Resolved gateway secrets"
        );

        let oauth = OAuthConfig::from_config(config, client_secret.value);
        let http = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()?;
        let upstream_client = Forwarder::client_builder()
            .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
            .build()?;

        let upstream_url = proxy
            .upstream_url
            .as_deref()
            .ok_or_else(|| OAuthError::Config("proxy.upstream_url is not set".to_string()))?;
        let forwarder = Forwarder::new(upstream_client, upstream_url)
            .map_err(|e| OAuthError::Config(e.to_string()))?;

        let refresh_client = Arc::new(HttpRefreshClient::new(http.clone(), oauth.clone()));
        let lifecycle = TokenLifecycle::new(refresh_client, session.clock_skew_ms())
            .with_uniform_clock_skew(session.uniform_clock_skew);
        let codec = SessionCodec::new(session_secret.value.as_bytes(), &session)?;

        let bind_addr: SocketAddr = server
            .bind
            .parse()
            .map_err(|e| OAuthError::Config(format!("server.bind '{}': {}", server.bind, e)))?;

        let gateway_config = GatewayConfig {
            bind_addr,
            mount_path: proxy.mount_path.clone(),
            require_session: proxy.require_session,
            required_roles: proxy.required_roles.clone(),
            cors_origins: server.cors_origins.clone(),
        };

        Ok(Self::new(
            gateway_config,
            GatewayState {
                lifecycle,
                codec,
                forwarder,
                oauth,
                http,
                require_session: proxy.require_session,
                secure_cookies: session.secure_cookies,
            },
        ))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn state(&self) -> Arc<GatewayState> {
        self.state.clone()
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        let mount = self.config.mount_path.trim_end_matches('/');
        let mount = if mount.is_empty() { "/api" } else { mount };

        let mut proxy_routes = Router::new()
            .route(mount, any(handle_proxy))
            .route(&format!("{}/{{*path}}", mount), any(handle_proxy));
        if !self.config.required_roles.is_empty() {
            let required = RequiredRoles::Any(self.config.required_roles.clone());
            proxy_routes = proxy_routes.route_layer(middleware::from_fn_with_state(
                (self.state.clone(), required),
                require_role,
            ));
        }

        let mut router = Router::new()
            .route("/health", get(handle_health))
            .route(SIGNIN_PATH, get(signin::handle_signin))
            .route("/auth/callback", get(signin::handle_callback))
            .route(
                "/auth/signout",
                get(signin::handle_signout).post(signin::handle_signout),
            )
            .route("/auth/session", get(signin::handle_session))
            .merge(proxy_routes)
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if let Some(cors) = cors_layer(&self.config.cors_origins) {
            router = router.layer(cors);
        }

        router
    }

    /// Run the gateway until the process exits.
    pub async fn run(self) -> std::io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the gateway until `shutdown` resolves, then drain connections.
    pub async fn run_until(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, mount = %self.config.mount_path, "Starting session gateway");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
    }

    /// Run in the background with graceful shutdown, returning the bound address.
    pub async fn run_with_shutdown(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, mount = %self.config.mount_path, "Starting session gateway");
        let router = self.router();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
                .ok();
        });
        Ok(local_addr)
    }
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Session resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Where a request's session stands after reconciliation.
#[derive(Debug)]
pub(crate) enum SessionState {
    /// No usable session cookie.
    Anonymous,
    /// Valid claims; `refreshed` means the cookie must be re-issued.
    Active {
        claims: SessionClaims,
        refreshed: bool,
    },
    /// The session cannot continue.
    Expired(RefreshError),
}

pub(crate) async fn resolve_session(state: &GatewayState, jar: &CookieJar) -> SessionState {
    let Some(claims) = state.codec.from_jar(jar) else {
        return SessionState::Anonymous;
    };
    if !claims.is_signed_in() {
        return SessionState::Anonymous;
    }

    match state.lifecycle.reconcile(claims, None).await {
        Ok(reconciled) => SessionState::Active {
            refreshed: reconciled.is_changed(),
            claims: reconciled.into_claims(),
        },
        Err(e) => SessionState::Expired(e),
    }
}

/// Jar carrying the re-encoded session when it changed.
pub(crate) fn reissue(
    state: &GatewayState,
    jar: CookieJar,
    claims: &SessionClaims,
    refreshed: bool,
) -> Result<CookieJar> {
    if !refreshed {
        return Ok(jar);
    }
    let token = state.codec.encode(claims)?;
    Ok(state.codec.store(jar, &token))
}

/// Clear the session and ask the browser to sign in again.
pub(crate) fn reauthenticate(state: &GatewayState, jar: CookieJar, err: RefreshError) -> Response {
    let jar = state.codec.clear(jar);
    (jar, OAuthError::Refresh(err)).into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Handle GET /health
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "portico"
    }))
}

/// Proxy any request under the mount path.
async fn handle_proxy(
    State(state): State<Arc<GatewayState>>,
    jar: CookieJar,
    request: Request,
) -> Response {
    match resolve_session(&state, &jar).await {
        SessionState::Anonymous => {
            if state.require_session {
                return OAuthError::SignInRequired.into_response();
            }
            state.forwarder.forward(request, None).await.into_response()
        }
        SessionState::Expired(err) => reauthenticate(&state, jar, err),
        SessionState::Active { claims, refreshed } => {
            let jar = match reissue(&state, jar, &claims, refreshed) {
                Ok(jar) => jar,
                Err(e) => return e.into_response(),
            };
            // The rotated cookie goes out even when the upstream fails.
            let forwarded = state
                .forwarder
                .forward(request, Some(&claims.access_token))
                .await;
            (jar, forwarded).into_response()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extractor and role guard
// ─────────────────────────────────────────────────────────────────────────────

/// The signed-in user, read from the session cookie without refreshing.
#[derive(Debug, Clone)]
pub struct SessionUser(pub SessionClaims);

impl FromRequestParts<Arc<GatewayState>> for SessionUser {
    type Rejection = OAuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        session_from_parts(parts, state).ok_or(OAuthError::SignInRequired)
    }
}

impl OptionalFromRequestParts<Arc<GatewayState>> for SessionUser {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState>,
    ) -> std::result::Result<Option<Self>, Self::Rejection> {
        Ok(session_from_parts(parts, state))
    }
}

fn session_from_parts(parts: &Parts, state: &GatewayState) -> Option<SessionUser> {
    if let Some(user) = parts.extensions.get::<SessionUser>() {
        return Some(user.clone());
    }
    let jar = CookieJar::from_headers(&parts.headers);
    state
        .codec
        .from_jar(&jar)
        .filter(SessionClaims::is_signed_in)
        .map(SessionUser)
}

/// Middleware rejecting requests whose session lacks the required roles.
///
/// No session yields 401, a session without any of the roles yields 403.
/// On success the [`SessionUser`] is placed in the request extensions.
///
/// ```ignore
/// router.route_layer(middleware::from_fn_with_state(
///     (state, RequiredRoles::from(["admin", "manager"])),
///     require_role,
/// ))
/// ```
pub async fn require_role(
    State((state, required)): State<(Arc<GatewayState>, RequiredRoles)>,
    mut request: Request,
    next: Next,
) -> Response {
    let jar = CookieJar::from_headers(request.headers());
    let Some(claims) = state.codec.from_jar(&jar).filter(SessionClaims::is_signed_in) else {
        return OAuthError::SignInRequired.into_response();
    };

    if !is_in_role(Some(&claims), required.clone()) {
        tracing::info!(subject = %claims.sub, required = ?required, "Role check failed");
        return OAuthError::Forbidden("missing required role".to_string()).into_response();
    }

    request.extensions_mut().insert(SessionUser(claims));
    next.run(request).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Error responses
// ─────────────────────────────────────────────────────────────────────────────

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            OAuthError::Network(_) => (StatusCode::BAD_GATEWAY, "network_error"),
            OAuthError::Backend(_) => (StatusCode::BAD_GATEWAY, "provider_error"),
            OAuthError::Serialization(_) => (StatusCode::BAD_GATEWAY, "serialization_error"),
            OAuthError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            OAuthError::StateMismatch => (StatusCode::UNAUTHORIZED, "state_mismatch"),
            OAuthError::SignInRequired => (StatusCode::UNAUTHORIZED, "unauthorized"),
            OAuthError::Refresh(_) => (StatusCode::UNAUTHORIZED, "reauthenticate"),
            OAuthError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            OAuthError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            OAuthError::Session(_) => (StatusCode::INTERNAL_SERVER_ERROR, "session_error"),
        };

        let message = self.to_string();
        if status.is_server_error() {
            tracing::error!(status = %status, code, error = %message, "Gateway error");
        } else {
            tracing::warn!(status = %status, code, error = %message, "Request rejected");
        }

        let body = if status == StatusCode::UNAUTHORIZED {
            serde_json::json!({ "error": code, "message": message, "signin": SIGNIN_PATH })
        } else {
            serde_json::json!({ "error": code, "message": message })
        };

        (status, Json(body)).into_response()
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ProxyError::Connection(_) => (StatusCode::BAD_GATEWAY, "upstream_unavailable"),
            ProxyError::InvalidUpstream(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "invalid_upstream")
            }
        };

        let message = self.to_string();
        tracing::error!(status = %status, code, error = %message, "Proxy error");

        (
            status,
            Json(serde_json::json!({ "error": code, "message": message })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::now_ms;
    use axum::body::Body;
    use axum::http::{Request, header};
    use axum::routing::post;
    use portico_config::SessionConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tower::ServiceExt;

    const SECRET: &[u8] = b"test-session-secret-0123456789ab";

    async fn spawn(router: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        addr
    }

    /// Upstream echoing the authorization and cookie headers it received.
    async fn spawn_upstream() -> SocketAddr {
        spawn(Router::new().fallback(|req: Request<Body>| async move {
            let header = |name| {
                req.headers()
                    .get(name)
                    .and_then(|v: &HeaderValue| v.to_str().ok())
                    .map(str::to_string)
            };
            Json(serde_json::json!({
                "path": req.uri().path(),
                "authorization": header(header::AUTHORIZATION),
                "cookie": header(header::COOKIE),
            }))
        }))
        .await
    }

    /// Token endpoint answering refreshes with a fixed body, counting calls.
    async fn spawn_token_endpoint(body: serde_json::Value, calls: Arc<AtomicU32>) -> SocketAddr {
        spawn(Router::new().route(
            "/token",
            post(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                let body = body.clone();
                async move { Json(body) }
            }),
        ))
        .await
    }

    fn oauth_config(token_addr: SocketAddr) -> OAuthConfig {
        OAuthConfig {
            client_id: "client-123".to_string(),
            client_secret: "s3cret".to_string(),
            authorize_url: format!("http://{}/authorize", token_addr),
            token_url: format!("http://{}/token", token_addr),
            redirect_uri: "http://localhost:3000/auth/callback".to_string(),
            scope: "openid profile email offline_access".to_string(),
        }
    }

    fn test_state(token_addr: SocketAddr, upstream: SocketAddr, require_session: bool) -> GatewayState {
        let http = reqwest::Client::new();
        let oauth = oauth_config(token_addr);
        let refresh = Arc::new(HttpRefreshClient::new(http.clone(), oauth.clone()));
        GatewayState {
            lifecycle: TokenLifecycle::new(refresh, 600_000),
            codec: SessionCodec::new(SECRET, &SessionConfig::default()).unwrap(),
            forwarder: Forwarder::new(
                Forwarder::client_builder().build().unwrap(),
                &format!("http://{}", upstream),
            )
            .unwrap(),
            oauth,
            http,
            require_session,
            secure_cookies: false,
        }
    }

    fn gateway(state: GatewayState, config: GatewayConfig) -> Gateway {
        Gateway::new(config, state)
    }

    fn session_cookie(state: &GatewayState, claims: &SessionClaims) -> String {
        format!(
            "{}={}",
            state.codec.cookie_name(),
            state.codec.encode(claims).unwrap()
        )
    }

    fn claims(expires_at: i64, roles: &[&str]) -> SessionClaims {
        SessionClaims {
            sub: "user-1".to_string(),
            access_token: "A1".to_string(),
            refresh_token: Some("R1".to_string()),
            expires_at,
            roles: roles.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn set_cookies(response: &Response) -> Vec<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect()
    }

    fn unused_addr() -> SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let state = test_state(unused_addr(), unused_addr(), false);
        let router = gateway(state, GatewayConfig::default()).router();

        let response = router
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["service"], "portico");
    }

    #[tokio::test]
    async fn test_valid_session_forwards_bearer_without_cookie() {
        let upstream = spawn_upstream().await;
        let state = test_state(unused_addr(), upstream, false);
        let cookie = session_cookie(&state, &claims(now_ms() + 60_000, &["user"]));
        let router = gateway(state, GatewayConfig::default()).router();

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/items")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookies(&response).is_empty());
        let body = body_json(response).await;
        assert_eq!(body["authorization"], "bearer A1");
        assert!(body["cookie"].is_null());
        assert_eq!(body["path"], "/api/items");
    }

    #[tokio::test]
    async fn test_expired_session_is_refreshed_and_reissued() {
        let calls = Arc::new(AtomicU32::new(0));
        let token_addr = spawn_token_endpoint(
            serde_json::json!({
                "token_type": "Bearer",
                "expires_in": 3600,
                "access_token": "A2",
                "refresh_token": "R2"
            }),
            calls.clone(),
        )
        .await;
        let upstream = spawn_upstream().await;
        let state = test_state(token_addr, upstream, false);
        let cookie = session_cookie(&state, &claims(now_ms() - 1000, &["user"]));
        let gateway = gateway(state, GatewayConfig::default());
        let shared = gateway.state();

        let response = gateway
            .router()
            .oneshot(
                Request::builder()
                    .uri("/api/items")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let reissued = set_cookies(&response)
            .into_iter()
            .find(|c| c.starts_with("portico.session="))
            .expect("session cookie re-issued");
        let token = reissued
            .trim_start_matches("portico.session=")
            .split(';')
            .next()
            .unwrap();
        let refreshed = shared.codec.decode(token).unwrap();
        assert_eq!(refreshed.access_token, "A2");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("R2"));

        let body = body_json(response).await;
        assert_eq!(body["authorization"], "bearer A2");
    }

    #[tokio::test]
    async fn test_refresh_with_provider_sized_tokens_chunks_cookie() {
        let access = "a".repeat(1800);
        let calls = Arc::new(AtomicU32::new(0));
        let token_addr = spawn_token_endpoint(
            serde_json::json!({
                "token_type": "Bearer",
                "expires_in": 3600,
                "access_token": access,
                "refresh_token": "r".repeat(1400)
            }),
            calls.clone(),
        )
        .await;
        let upstream = spawn_upstream().await;
        let state = test_state(token_addr, upstream, false);
        let cookie = session_cookie(&state, &claims(now_ms() - 1000, &["user"]));
        let router = gateway(state, GatewayConfig::default()).router();

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/items")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let set = set_cookies(&response);
        let chunks: Vec<&String> = set
            .iter()
            .filter(|c| c.starts_with("portico.session.") && !c.contains("Max-Age=0"))
            .collect();
        assert!(chunks.len() >= 2);
        assert!(set.iter().all(|c| c.len() <= 4096));
        // The single-cookie form from the request is cleared.
        assert!(
            set.iter()
                .any(|c| c.starts_with("portico.session=;") && c.contains("Max-Age=0"))
        );

        let next_cookie = chunks
            .iter()
            .map(|c| c.split(';').next().unwrap())
            .collect::<Vec<_>>()
            .join("; ");
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/items")
                    .header(header::COOKIE, next_cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let body = body_json(response).await;
        assert_eq!(body["authorization"], format!("bearer {}", access));
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_session() {
        let calls = Arc::new(AtomicU32::new(0));
        let token_addr = spawn_token_endpoint(
            serde_json::json!({ "error": "invalid_grant", "error_description": "revoked" }),
            calls.clone(),
        )
        .await;
        let upstream = spawn_upstream().await;
        let state = test_state(token_addr, upstream, false);
        let cookie = session_cookie(&state, &claims(now_ms() - 1000, &[]));
        let router = gateway(state, GatewayConfig::default()).router();

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/items")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(
            set_cookies(&response)
                .iter()
                .any(|c| c.starts_with("portico.session=;") && c.contains("Max-Age=0"))
        );
        let body = body_json(response).await;
        assert_eq!(body["error"], "reauthenticate");
        assert_eq!(body["signin"], SIGNIN_PATH);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_anonymous_request_forwarded_without_authorization() {
        let upstream = spawn_upstream().await;
        let state = test_state(unused_addr(), upstream, false);
        let router = gateway(state, GatewayConfig::default()).router();

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/public")
                    .header(header::COOKIE, "portico.session=garbage; theme=dark")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["authorization"].is_null());
        assert!(body["cookie"].is_null());
    }

    #[tokio::test]
    async fn test_require_session_rejects_anonymous() {
        let upstream = spawn_upstream().await;
        let state = test_state(unused_addr(), upstream, true);
        let config = GatewayConfig {
            require_session: true,
            ..Default::default()
        };
        let router = gateway(state, config).router();

        let response = router
            .oneshot(Request::builder().uri("/api/x").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "unauthorized");
    }

    #[tokio::test]
    async fn test_upstream_down_is_bad_gateway() {
        let state = test_state(unused_addr(), unused_addr(), false);
        let router = gateway(state, GatewayConfig::default()).router();

        let response = router
            .oneshot(Request::builder().uri("/api/x").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(response).await["error"], "upstream_unavailable");
    }

    #[tokio::test]
    async fn test_required_roles_guard_proxy() {
        let upstream = spawn_upstream().await;
        let config = GatewayConfig {
            required_roles: vec!["admin".to_string(), "manager".to_string()],
            ..Default::default()
        };

        let state = test_state(unused_addr(), upstream, false);
        let manager = session_cookie(&state, &claims(now_ms() + 60_000, &["user", "manager"]));
        let viewer = session_cookie(&state, &claims(now_ms() + 60_000, &["user"]));
        let router = gateway(state, config).router();

        let request = |cookie: Option<&str>| {
            let mut builder = Request::builder().uri("/api/admin");
            if let Some(cookie) = cookie {
                builder = builder.header(header::COOKIE, cookie);
            }
            builder.body(Body::empty()).unwrap()
        };

        let allowed = router.clone().oneshot(request(Some(&manager))).await.unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);

        let denied = router.clone().oneshot(request(Some(&viewer))).await.unwrap();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let anonymous = router.oneshot(request(None)).await.unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_session_user_extractor() {
        let state = Arc::new(test_state(unused_addr(), unused_addr(), false));
        let cookie = session_cookie(&state, &claims(now_ms() + 60_000, &[]));

        async fn whoami(SessionUser(claims): SessionUser) -> String {
            claims.sub
        }
        async fn maybe(user: Option<SessionUser>) -> &'static str {
            if user.is_some() { "signed-in" } else { "anonymous" }
        }
        let router = Router::new()
            .route("/whoami", get(whoami))
            .route("/maybe", get(maybe))
            .with_state(state);

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/whoami")
                    .header(header::COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"user-1");

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .oneshot(Request::builder().uri("/maybe").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"anonymous");
    }

    #[tokio::test]
    async fn test_run_with_shutdown_serves_health() {
        let state = test_state(unused_addr(), unused_addr(), false);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let addr = gateway(state, GatewayConfig::default())
            .run_with_shutdown(async {
                rx.await.ok();
            })
            .await
            .unwrap();

        let body: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        tx.send(()).ok();
    }

    #[test]
    fn test_from_config_requires_secrets() {
        let config = PorticoConfig::from_toml(
            r#"
[provider]
tenant_id = "contoso"
client_id = "client-123"

[proxy]
upstream_url = "http://localhost:8081"
"#,
        )
        .unwrap();
        // Only fails when neither env nor keyring provides the secrets.
        if std::env::var(Secret::ClientSecret.env_var()).is_err() {
            assert!(Gateway::from_config(&config).is_err());
        }
    }

    #[test]
    fn test_from_config_builds_gateway() {
        let config = PorticoConfig::from_toml(
            r#"
[provider]
tenant_id = "contoso"
client_id = "client-123"
client_secret = "plain-client-secret"

[proxy]
upstream_url = "http://localhost:8081"
mount_path = "/backend"
required_roles = ["admin"]

[session]
secret = "plain-session-secret-0123456789ab"
uniform_clock_skew = true

[server]
bind = "127.0.0.1:0"
cors_origins = ["http://localhost:5173"]
"#,
        )
        .unwrap();

        let gateway = Gateway::from_config(&config).unwrap();
        assert_eq!(gateway.config().mount_path, "/backend");
        assert_eq!(gateway.config().required_roles, vec!["admin"]);
        assert_eq!(
            gateway.state().oauth.token_url,
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/token"
        );
        let _ = gateway.router();
    }

    #[test]
    fn test_invalid_cors_origin_ignored() {
        assert!(cors_layer(&[]).is_none());
        assert!(cors_layer(&["bad\norigin".to_string()]).is_none());
        assert!(cors_layer(&["http://localhost:5173".to_string()]).is_some());
    }
}
