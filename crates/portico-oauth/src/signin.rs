//! Browser sign-in routes.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use serde::Deserialize;

use crate::claims::{SessionClaims, SignIn};
use crate::error::{OAuthError, Result};
use crate::oauth::{
    PkceChallenge, build_authorization_url, exchange_code_for_tokens, generate_state,
    profile_from_id_token,
};
use crate::proxy::{GatewayState, SessionState, reauthenticate, reissue, resolve_session};

const PKCE_COOKIE_NAME: &str = "portico.pkce";
const STATE_COOKIE_NAME: &str = "portico.state";

/// Sign-in cookies are only sent back to the callback.
const SIGNIN_COOKIE_PATH: &str = "/auth";

/// How long a started sign-in stays valid.
const SIGNIN_COOKIE_TTL: time::Duration = time::Duration::minutes(10);

/// Query string of the provider redirect.
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

fn signin_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path(SIGNIN_COOKIE_PATH)
        .max_age(SIGNIN_COOKIE_TTL)
        .build()
}

fn clear_signin_cookies(jar: CookieJar) -> CookieJar {
    let removal = |name: &'static str| {
        Cookie::build((name, ""))
            .path(SIGNIN_COOKIE_PATH)
            .max_age(time::Duration::ZERO)
            .build()
    };
    jar.add(removal(PKCE_COOKIE_NAME))
        .add(removal(STATE_COOKIE_NAME))
}

/// Handle GET /auth/signin
pub async fn handle_signin(
    State(state): State<Arc<GatewayState>>,
    jar: CookieJar,
) -> impl IntoResponse {
    let pkce = PkceChallenge::generate();
    let csrf_state = generate_state();
    let url = build_authorization_url(&state.oauth, &pkce.challenge, &csrf_state);

    tracing::debug!("Redirecting to identity provider");
    let jar = jar
        .add(signin_cookie(PKCE_COOKIE_NAME, pkce.verifier, state.secure_cookies))
        .add(signin_cookie(STATE_COOKIE_NAME, csrf_state, state.secure_cookies));
    (jar, Redirect::to(&url))
}

/// Handle GET /auth/callback
pub async fn handle_callback(
    State(state): State<Arc<GatewayState>>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<(CookieJar, Redirect)> {
    if let Some(error) = params.error {
        let detail = params.error_description.unwrap_or_default();
        return Err(OAuthError::InvalidRequest(format!(
            "identity provider returned {}: {}",
            error, detail
        )));
    }

    let expected = jar.get(STATE_COOKIE_NAME).map(|c| c.value().to_string());
    match (expected.as_deref(), params.state.as_deref()) {
        (Some(expected), Some(received)) if !expected.is_empty() && expected == received => {}
        _ => return Err(OAuthError::StateMismatch),
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest("missing authorization code".to_string()))?;
    let verifier = jar
        .get(PKCE_COOKIE_NAME)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OAuthError::InvalidRequest("missing PKCE verifier".to_string()))?;

    let grant = exchange_code_for_tokens(&state.http, &state.oauth, &code, &verifier).await?;
    let id_token = grant
        .id_token
        .as_deref()
        .ok_or_else(|| OAuthError::Backend("token response carries no id token".to_string()))?;
    let profile = profile_from_id_token(id_token)?;

    let reconciled = state
        .lifecycle
        .reconcile(SessionClaims::default(), Some(SignIn { grant, profile }))
        .await?;
    let token = state.codec.encode(reconciled.claims())?;

    let jar = state.codec.store(clear_signin_cookies(jar), &token);
    Ok((jar, Redirect::to("/")))
}

/// Handle GET|POST /auth/signout
pub async fn handle_signout(
    State(state): State<Arc<GatewayState>>,
    jar: CookieJar,
) -> impl IntoResponse {
    if let Some(claims) = state.codec.from_jar(&jar) {
        tracing::info!(subject = %claims.sub, "Session signed out");
    }
    (state.codec.clear(jar), Redirect::to("/"))
}

/// Handle GET /auth/session
pub async fn handle_session(State(state): State<Arc<GatewayState>>, jar: CookieJar) -> Response {
    match resolve_session(&state, &jar).await {
        SessionState::Anonymous => Json(serde_json::json!({})).into_response(),
        SessionState::Expired(err) => reauthenticate(&state, jar, err),
        SessionState::Active { claims, refreshed } => {
            match reissue(&state, jar, &claims, refreshed) {
                Ok(jar) => (jar, Json(claims.user_view())).into_response(),
                Err(e) => e.into_response(),
            }
        }
    }
}
