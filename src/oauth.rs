use std::time::Duration;

use oauth2::{
    AuthUrl, EndpointNotSet, EndpointSet, RedirectUrl, RefreshToken, RevocationUrl,
    StandardRevocableToken, TokenUrl,
    basic::{BasicTokenIntrospectionResponse, BasicTokenType},
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{self, Error, Result};

/// Stores the OAuth 2 client ID and client secret.
#[derive(Clone)]
pub struct KeyPair(
    pub(crate) oauth2::ClientId,
    pub(crate) Option<oauth2::ClientSecret>,
);

impl KeyPair {
    /// Creates a new `KeyPair` from the provided `client_id` and `client_secret` strings.
    #[must_use]
    pub fn new(client_id: String, client_secret: Option<String>) -> Self {
        Self(
            oauth2::ClientId::new(client_id),
            client_secret.map(oauth2::ClientSecret::new),
        )
    }

    /// Creates a new `KeyPair` from `QBO_CLIENT_ID` and `QBO_CLIENT_SECRET` environment variables.
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("QBO_CLIENT_ID")
            .map_err(|_| Error::Config("QBO_CLIENT_ID not set".to_string()))?;
        Ok(Self(
            oauth2::ClientId::new(client_id),
            std::env::var("QBO_CLIENT_SECRET")
                .ok()
                .map(oauth2::ClientSecret::new),
        ))
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("KeyPair")
            .field(&self.0.as_str())
            .field(&self.1.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

pub type OAuthClient = oauth2::Client<
    error::OAuth2ErrorResponse,
    TokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    error::OAuth2ErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
    EndpointSet,
>;

/// Builds the `oauth2` client for the configured app.
pub(crate) fn build_client(config: &Config) -> OAuthClient {
    let auth_url = AuthUrl::from_url(config.endpoints.authorize.clone());
    let token_url = TokenUrl::from_url(config.endpoints.token.clone());
    let revocation_url = RevocationUrl::from_url(config.endpoints.revoke.clone());
    let redirect_url = RedirectUrl::from_url(config.redirect_url.clone());

    let mut client = oauth2::Client::new(config.key_pair.0.clone())
        .set_auth_uri(auth_url)
        .set_token_uri(token_url)
        .set_revocation_url(revocation_url)
        .set_redirect_uri(redirect_url);
    if let Some(secret) = &config.key_pair.1 {
        client = client.set_client_secret(secret.clone());
    }
    client
}

/// Token endpoint response. Carries the refresh token lifetime in the
/// non-standard `x_refresh_token_expires_in` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    access_token: oauth2::AccessToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id_token: Option<String>,
    expires_in: u64,
    x_refresh_token_expires_in: u64,
    token_type: BasicTokenType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<RefreshToken>,
}

impl TokenResponse {
    /// OpenID Connect id token, present when an identity scope was granted.
    #[must_use]
    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    /// Lifetime of the refresh token.
    #[must_use]
    pub fn refresh_token_expires_in(&self) -> Duration {
        Duration::from_secs(self.x_refresh_token_expires_in)
    }
}

impl oauth2::TokenResponse for TokenResponse {
    type TokenType = BasicTokenType;

    fn access_token(&self) -> &oauth2::AccessToken {
        &self.access_token
    }

    fn token_type(&self) -> &BasicTokenType {
        &self.token_type
    }

    fn expires_in(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.expires_in))
    }

    fn refresh_token(&self) -> Option<&RefreshToken> {
        self.refresh_token.as_ref()
    }

    fn scopes(&self) -> Option<&Vec<oauth2::Scope>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oauth2::TokenResponse as _;

    #[test]
    fn test_token_response_parses_refresh_lifetime() {
        let response: TokenResponse = serde_json::from_str(
            r#"{
                "token_type": "bearer",
                "expires_in": 3600,
                "refresh_token": "RT1-222-H0-1700000000",
                "x_refresh_token_expires_in": 8726400,
                "access_token": "eyJlbmMiOiJBMTI4Q0JDLUhTMjU2In0"
            }"#,
        )
        .unwrap();

        assert_eq!(response.expires_in(), Some(Duration::from_secs(3600)));
        assert_eq!(
            response.refresh_token_expires_in(),
            Duration::from_secs(8_726_400)
        );
        assert_eq!(
            response.refresh_token().map(RefreshToken::secret).map(String::as_str),
            Some("RT1-222-H0-1700000000")
        );
        assert!(response.id_token().is_none());
    }

    #[test]
    fn test_key_pair_debug_redacts_secret() {
        let keys = KeyPair::new("client".into(), Some("super-secret".into()));
        let debug = format!("{keys:?}");
        assert!(debug.contains("client"));
        assert!(!debug.contains("super-secret"));
    }
}
