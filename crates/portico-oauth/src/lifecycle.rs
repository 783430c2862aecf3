//! Token lifecycle for session claims.
//!
//! Every authenticated request runs [`TokenLifecycle::reconcile`], which
//! takes exactly one of three branches:
//!
//! - **sign-in**: a fresh account grant and profile are merged into new claims;
//! - **revalidate**: the access token is still valid, claims pass through;
//! - **refresh**: the access token expired, the refresh token is exchanged
//!   and the claims are replaced wholesale.
//!
//! Any failure means the session is over. Concurrent refreshes for the same
//! subject share one in-flight call.

use std::collections::HashMap;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::claims::{SessionClaims, SignIn};
use crate::error::RefreshError;
use crate::oauth::TokenGrant;
use crate::refresh::SharedRefreshClient;

type InFlightRefresh = Shared<BoxFuture<'static, Result<TokenGrant, RefreshError>>>;

/// Outcome of a successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// Claims built from a completed sign-in.
    SignedIn(SessionClaims),
    /// Access token still valid; claims untouched.
    Current(SessionClaims),
    /// Access token renewed; claims replaced.
    Refreshed(SessionClaims),
}

impl Reconciled {
    /// The resulting claims.
    pub fn claims(&self) -> &SessionClaims {
        match self {
            Reconciled::SignedIn(c) | Reconciled::Current(c) | Reconciled::Refreshed(c) => c,
        }
    }

    /// Take the resulting claims.
    pub fn into_claims(self) -> SessionClaims {
        match self {
            Reconciled::SignedIn(c) | Reconciled::Current(c) | Reconciled::Refreshed(c) => c,
        }
    }

    /// Whether the session token must be re-issued.
    pub fn is_changed(&self) -> bool {
        !matches!(self, Reconciled::Current(_))
    }
}

/// Decides reuse, refresh or rejection of session claims.
pub struct TokenLifecycle {
    client: SharedRefreshClient,
    clock_skew_ms: i64,
    uniform_clock_skew: bool,
    in_flight: Mutex<HashMap<String, InFlightRefresh>>,
}

impl std::fmt::Debug for TokenLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLifecycle")
            .field("client", &self.client)
            .field("clock_skew_ms", &self.clock_skew_ms)
            .field("uniform_clock_skew", &self.uniform_clock_skew)
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

impl TokenLifecycle {
    /// Create a lifecycle manager.
    ///
    /// `clock_skew_ms` is subtracted from the provider expiry at sign-in.
    pub fn new(client: SharedRefreshClient, clock_skew_ms: i64) -> Self {
        Self {
            client,
            clock_skew_ms,
            uniform_clock_skew: false,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Also subtract the clock-skew margin from refreshed expiries.
    pub fn with_uniform_clock_skew(mut self, enabled: bool) -> Self {
        self.uniform_clock_skew = enabled;
        self
    }

    pub fn clock_skew_ms(&self) -> i64 {
        self.clock_skew_ms
    }

    /// Reconcile claims against the current time.
    pub async fn reconcile(
        &self,
        current: SessionClaims,
        sign_in: Option<SignIn>,
    ) -> Result<Reconciled, RefreshError> {
        self.reconcile_at(current, sign_in, now_ms()).await
    }

    /// Reconcile claims as of `now_ms` (epoch milliseconds).
    pub async fn reconcile_at(
        &self,
        current: SessionClaims,
        sign_in: Option<SignIn>,
        now_ms: i64,
    ) -> Result<Reconciled, RefreshError> {
        if let Some(sign_in) = sign_in {
            return self.sign_in(current, sign_in).map(Reconciled::SignedIn);
        }

        if current.is_access_token_valid_at(now_ms) {
            return Ok(Reconciled::Current(current));
        }

        self.refresh(current, now_ms).await.map(Reconciled::Refreshed)
    }

    /// Build claims from a fresh grant and profile.
    fn sign_in(&self, current: SessionClaims, sign_in: SignIn) -> Result<SessionClaims, RefreshError> {
        let SignIn { grant, profile } = sign_in;
        if grant.access_token.is_empty() {
            return Err(RefreshError::MalformedGrant(
                "sign-in grant carries no access token".to_string(),
            ));
        }

        let claims = SessionClaims {
            sub: profile.subject_id().to_string(),
            name: current.name.or_else(|| profile.name.clone()),
            email: current.email.or_else(|| profile.email()),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.filter(|t| !t.is_empty()),
            expires_at: grant
                .expires_at
                .saturating_mul(1000)
                .saturating_sub(self.clock_skew_ms),
            roles: profile.roles,
            iat: current.iat,
            exp: current.exp,
            jti: current.jti,
        };

        tracing::info!(subject = %claims.sub, roles = claims.roles.len(), "Session signed in");
        Ok(claims)
    }

    /// Exchange the refresh token and replace the token fields.
    async fn refresh(&self, current: SessionClaims, now_ms: i64) -> Result<SessionClaims, RefreshError> {
        let Some(refresh_token) = current.refresh_token() else {
            tracing::info!(subject = %current.sub, "Access token expired and no refresh token");
            return Err(RefreshError::NoRefreshToken);
        };

        tracing::info!(subject = %current.sub, "Access token expired, refreshing");
        let key = if current.sub.is_empty() {
            refresh_token
        } else {
            current.sub.as_str()
        };
        let grant = self.refresh_coalesced(key, refresh_token).await?;

        if grant.access_token.is_empty() {
            return Err(RefreshError::MalformedGrant(
                "refresh response carries no access token".to_string(),
            ));
        }
        let lifetime_ms = grant.lifetime_secs()?.saturating_mul(1000);
        let Some(rotated) = grant.refresh_token.filter(|t| !t.is_empty()) else {
            return Err(RefreshError::MalformedGrant(
                "refresh response omits the rotated refresh token".to_string(),
            ));
        };

        let skew_ms = if self.uniform_clock_skew {
            self.clock_skew_ms
        } else {
            0
        };

        tracing::info!(subject = %current.sub, expires_in = grant.expires_in, "Token refreshed");
        Ok(SessionClaims {
            access_token: grant.access_token,
            refresh_token: Some(rotated),
            expires_at: now_ms.saturating_add(lifetime_ms).saturating_sub(skew_ms),
            ..current
        })
    }

    /// Run one refresh per key; concurrent callers await the same outcome.
    async fn refresh_coalesced(
        &self,
        key: &str,
        refresh_token: &str,
    ) -> Result<TokenGrant, RefreshError> {
        let (refresh, _guard) = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(key) {
                Some(existing) => {
                    tracing::debug!("Joining in-flight refresh");
                    (existing.clone(), None)
                }
                None => {
                    let client = self.client.clone();
                    let token = refresh_token.to_string();
                    let refresh = async move { client.refresh(&token).await }
                        .boxed()
                        .shared();
                    in_flight.insert(key.to_string(), refresh.clone());
                    let guard = InFlightGuard {
                        in_flight: &self.in_flight,
                        key: key.to_string(),
                        refresh: refresh.clone(),
                    };
                    (refresh, Some(guard))
                }
            }
        };

        refresh.await
    }

    /// Number of refreshes currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

/// Removes the leader's entry when it finishes or is dropped.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<String, InFlightRefresh>>,
    key: String,
    refresh: InFlightRefresh,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(&self.key)
            .is_some_and(|entry| entry.ptr_eq(&self.refresh))
        {
            in_flight.remove(&self.key);
        }
    }
}

/// Current time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
