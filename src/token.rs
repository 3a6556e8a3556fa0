//! OAuth2 token lifecycle.
//!
//! [`TokenManager`] hands out access tokens per realm. It reads credentials
//! from the injected [`CredentialStore`] on every call, refreshes them shortly
//! before they expire and makes sure that, per realm, only one refresh is in
//! flight at a time. Callers arriving while a refresh is running wait for that
//! refresh instead of starting their own.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use oauth2::{
    AuthorizationCode, CsrfToken, RefreshToken, RequestTokenError, StandardRevocableToken,
    TokenResponse as _,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use url::Url;

use crate::config::Config;
use crate::error::{Error, OAuth2ErrorResponse, Result};
use crate::oauth::{self, OAuthClient, TokenResponse};
use crate::scope::Scope;
use crate::store::CredentialStore;
use crate::transport::{HttpRequest, HttpResponse, SyncFuture, Transport, TransportError};
use crate::utils::date_format::qbo_datetime_format;

/// Source of the current time for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Credentials for one realm.
///
/// Replaced as a whole on every exchange or refresh.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub realm_id: String,
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(with = "qbo_datetime_format")]
    pub access_expires_at: OffsetDateTime,
    #[serde(with = "qbo_datetime_format")]
    pub refresh_expires_at: OffsetDateTime,
}

impl TokenRecord {
    /// Builds a record from a token endpoint response received at `issued_at`.
    ///
    /// When the response carries no refresh token the one from `previous` is
    /// kept.
    pub(crate) fn from_response(
        realm_id: &str,
        response: &TokenResponse,
        issued_at: OffsetDateTime,
        previous: Option<&TokenRecord>,
    ) -> Result<Self> {
        let refresh_token = response
            .refresh_token()
            .map(|t| t.secret().clone())
            .or_else(|| previous.map(|p| p.refresh_token.clone()))
            .ok_or_else(|| Error::AuthExchange {
                realm_id: realm_id.to_string(),
                message: "token response did not include a refresh token".to_string(),
                response: None,
            })?;

        let access_lifetime = response.expires_in().unwrap_or_default();
        let refresh_expires_at =
            issued_at.saturating_add(to_time(response.refresh_token_expires_in()));
        // An access token never outlives the refresh token it came with.
        let access_expires_at = issued_at
            .saturating_add(to_time(access_lifetime))
            .min(refresh_expires_at);

        Ok(Self {
            realm_id: realm_id.to_string(),
            access_token: response.access_token().secret().clone(),
            refresh_token,
            id_token: response.id_token().map(str::to_string),
            access_expires_at,
            refresh_expires_at,
        })
    }

    /// Whether the access token expires within `margin` of `now`.
    #[must_use]
    pub fn needs_refresh(&self, now: OffsetDateTime, margin: Duration) -> bool {
        now.saturating_add(to_time(margin)) >= self.access_expires_at
    }

    #[must_use]
    pub fn is_refresh_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.refresh_expires_at
    }

    /// Value for the `Authorization` header.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("realm_id", &self.realm_id)
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("id_token", &self.id_token.as_ref().map(|_| "[redacted]"))
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

fn to_time(duration: Duration) -> time::Duration {
    time::Duration::try_from(duration).unwrap_or(time::Duration::MAX)
}

/// Query parameters the authorization server appends to the redirect URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: String,
    pub realm_id: String,
    pub state: String,
}

impl CallbackParams {
    /// Extracts `code`, `realmId` and `state` from a redirect URL.
    pub fn from_url(url: &Url) -> Result<Self> {
        let mut code = None;
        let mut realm_id = None;
        let mut state = None;
        let mut error = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "realmId" => realm_id = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(error) = error {
            return Err(Error::InvalidCallback(format!("authorization denied: {error}")));
        }
        let missing = |name: &str| Error::InvalidCallback(format!("missing `{name}`"));
        Ok(Self {
            code: code.ok_or_else(|| missing("code"))?,
            realm_id: realm_id.ok_or_else(|| missing("realmId"))?,
            state: state.ok_or_else(|| missing("state"))?,
        })
    }

    /// Checks the returned `state` against the one issued with the authorization URL.
    pub fn verify_state(&self, expected: &CsrfToken) -> Result<()> {
        if self.state == *expected.secret() {
            Ok(())
        } else {
            Err(Error::InvalidCallback("state does not match".to_string()))
        }
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<TokenRecord>>>;

struct Inner {
    oauth: OAuthClient,
    scopes: Scope,
    refresh_margin: Duration,
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashMap<String, RefreshFuture>>,
}

/// Issues, persists and refreshes OAuth2 tokens, keyed by realm id.
///
/// Cloning is cheap; clones share the same store and in-flight refreshes.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("scopes", &self.inner.scopes)
            .field("refresh_margin", &self.inner.refresh_margin)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    pub fn new(
        config: &Config,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::with_clock(config, store, transport, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &Config,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                oauth: oauth::build_client(config),
                scopes: config.scopes.clone(),
                refresh_margin: config.refresh_margin,
                store,
                transport,
                clock,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Builds the URL to send the user to, together with the `state` value
    /// the callback must echo back.
    #[must_use]
    pub fn authorization_url(&self) -> (Url, CsrfToken) {
        self.authorization_url_with_scopes(self.inner.scopes.clone())
    }

    #[must_use]
    pub fn authorization_url_with_scopes(&self, scopes: Scope) -> (Url, CsrfToken) {
        self.inner
            .oauth
            .authorize_url(CsrfToken::new_random)
            .add_scopes(scopes.into_oauth2_scopes())
            .url()
    }

    /// Exchanges an authorization code for tokens and stores them for `realm_id`.
    ///
    /// A refresh already running for the realm is awaited before the new
    /// record is saved, so its result cannot overwrite the exchanged tokens.
    #[instrument(skip(self, code))]
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        realm_id: &str,
    ) -> Result<TokenRecord> {
        let issued_at = self.inner.clock.now();
        let http_client = self.inner.http_client();
        let response = self
            .inner
            .oauth
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&http_client)
            .await
            .map_err(|e| {
                classify_token_error(e, |message, response| Error::AuthExchange {
                    realm_id: realm_id.to_string(),
                    message,
                    response,
                })
            })?;

        let record = TokenRecord::from_response(realm_id, &response, issued_at, None)?;
        let saved = {
            // Held until the save lands so no new refresh starts from the old record.
            let mut in_flight = self.inner.in_flight.lock().await;
            if let Some(pending) = in_flight.remove(realm_id) {
                debug!(realm_id, "waiting for in-flight refresh before storing exchanged tokens");
                // Its outcome no longer matters; the exchanged record replaces it.
                let _ = pending.await;
            }
            self.inner.store.save(realm_id, record).await?
        };
        info!(
            realm_id,
            access_expires_at = %saved.access_expires_at,
            "authorization code exchanged"
        );
        Ok(saved)
    }

    /// Returns credentials whose access token is valid for at least the
    /// configured refresh margin, refreshing them if needed.
    #[instrument(skip(self))]
    pub async fn get_valid_token(&self, realm_id: &str) -> Result<TokenRecord> {
        let record = self.inner.load(realm_id).await?;
        let now = self.inner.clock.now();
        if record.is_refresh_expired(now) {
            return Err(reauthorization_required(&record));
        }
        if !record.needs_refresh(now, self.inner.refresh_margin) {
            return Ok(record);
        }

        debug!(access_expires_at = %record.access_expires_at, "access token expiring, refreshing");
        self.refresh_single_flight(realm_id, false).await
    }

    /// Refreshes the credentials for `realm_id` regardless of their expiry.
    #[instrument(skip(self))]
    pub async fn refresh(&self, realm_id: &str) -> Result<TokenRecord> {
        self.refresh_single_flight(realm_id, true).await
    }

    /// Revokes the stored refresh token for `realm_id`, which also
    /// invalidates its access tokens. The stored record is left as is.
    #[instrument(skip(self))]
    pub async fn revoke(&self, realm_id: &str) -> Result<()> {
        let record = self.inner.load(realm_id).await?;
        let http_client = self.inner.http_client();
        let token = StandardRevocableToken::RefreshToken(RefreshToken::new(record.refresh_token));
        self.inner
            .oauth
            .revoke_token(token)
            .map_err(|e| Error::Config(e.to_string()))?
            .request_async(&http_client)
            .await
            .map_err(|e| {
                classify_token_error(e, |message, response| Error::RefreshFailed {
                    realm_id: realm_id.to_string(),
                    message,
                    response,
                })
            })?;
        info!(realm_id, "refresh token revoked");
        Ok(())
    }

    async fn refresh_single_flight(&self, realm_id: &str, force: bool) -> Result<TokenRecord> {
        let refresh = {
            let mut in_flight = self.inner.in_flight.lock().await;
            match in_flight.get(realm_id) {
                Some(pending) if pending.peek().is_none() => {
                    trace!("joining in-flight refresh");
                    pending.clone()
                }
                _ => {
                    let pending = Inner::run_refresh(
                        Arc::clone(&self.inner),
                        realm_id.to_string(),
                        force,
                    )
                    .boxed()
                    .shared();
                    in_flight.insert(realm_id.to_string(), pending.clone());
                    pending
                }
            }
        };

        let result = refresh.clone().await;

        let mut in_flight = self.inner.in_flight.lock().await;
        if in_flight
            .get(realm_id)
            .is_some_and(|pending| pending.ptr_eq(&refresh))
        {
            in_flight.remove(realm_id);
        }
        result
    }
}

impl Inner {
    async fn load(&self, realm_id: &str) -> Result<TokenRecord> {
        self.store
            .fetch(realm_id)
            .await?
            .ok_or_else(|| Error::MissingCredentials {
                realm_id: realm_id.to_string(),
            })
    }

    /// Adapts the injected transport to the `oauth2` async client interface.
    fn http_client(
        &self,
    ) -> impl Fn(HttpRequest) -> SyncFuture<std::result::Result<HttpResponse, TransportError>>
    + Send
    + Sync
    + 'static {
        let transport = Arc::clone(&self.transport);
        move |request| {
            let transport = Arc::clone(&transport);
            SyncFuture::new(async move { transport.execute(request).await }.boxed())
        }
    }

    async fn run_refresh(self: Arc<Self>, realm_id: String, force: bool) -> Result<TokenRecord> {
        let current = self.load(&realm_id).await?;
        let issued_at = self.clock.now();
        if current.is_refresh_expired(issued_at) {
            return Err(reauthorization_required(&current));
        }
        if !force && !current.needs_refresh(issued_at, self.refresh_margin) {
            debug!(realm_id, "credentials were refreshed concurrently");
            return Ok(current);
        }

        let http_client = self.http_client();
        let response = self
            .oauth
            .exchange_refresh_token(&RefreshToken::new(current.refresh_token.clone()))
            .request_async(&http_client)
            .await
            .map_err(|e| {
                classify_token_error(e, |message, response| Error::RefreshFailed {
                    realm_id: realm_id.clone(),
                    message,
                    response,
                })
            })?;

        let record = TokenRecord::from_response(&realm_id, &response, issued_at, Some(&current))?;
        let saved = self.store.save(&realm_id, record).await?;
        info!(realm_id, access_expires_at = %saved.access_expires_at, "access token refreshed");
        Ok(saved)
    }
}

fn reauthorization_required(record: &TokenRecord) -> Error {
    warn!(realm_id = %record.realm_id, "refresh token expired");
    Error::ReauthorizationRequired {
        realm_id: record.realm_id.clone(),
        refresh_expired_at: record.refresh_expires_at,
    }
}

/// Network failures stay transport errors; everything the token endpoint
/// said (or failed to say intelligibly) becomes the error built by `rejected`.
fn classify_token_error(
    error: RequestTokenError<TransportError, OAuth2ErrorResponse>,
    rejected: impl FnOnce(String, Option<OAuth2ErrorResponse>) -> Error,
) -> Error {
    match error {
        RequestTokenError::Request(e) => e.into(),
        RequestTokenError::ServerResponse(response) => {
            warn!(error = %response, "token endpoint rejected request");
            rejected(response.to_string(), Some(response))
        }
        RequestTokenError::Parse(e, body) => rejected(
            format!(
                "unparseable token response ({e}): {}",
                String::from_utf8_lossy(&body)
            ),
            None,
        ),
        RequestTokenError::Other(message) => rejected(message, None),
    }
}
