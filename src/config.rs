use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::oauth::KeyPair;
use crate::scope::Scope;

pub const AUTHORIZE_URL: &str = "https://appcenter.intuit.com/connect/oauth2";
pub const TOKEN_URL: &str = "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";
pub const REVOKE_URL: &str = "https://developer.api.intuit.com/v2/oauth2/tokens/revoke";

pub const PRODUCTION_BASE_URL: &str = "https://quickbooks.api.intuit.com/";
pub const SANDBOX_BASE_URL: &str = "https://sandbox-quickbooks.api.intuit.com/";

/// Default margin before access token expiry at which a refresh is triggered.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Which data API host requests go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Sandbox,
    Production,
}

impl Environment {
    #[must_use]
    pub fn base_url(self) -> &'static str {
        match self {
            Self::Sandbox => SANDBOX_BASE_URL,
            Self::Production => PRODUCTION_BASE_URL,
        }
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sandbox" | "development" => Ok(Self::Sandbox),
            "production" => Ok(Self::Production),
            other => Err(Error::Config(format!("unknown environment `{other}`"))),
        }
    }
}

/// Backoff used for idempotent requests (read, query, count, pdf).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one. Zero disables retries.
    pub max_retries: usize,
    /// Delay before the first retry; doubled on each following retry.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// OAuth2 endpoint URLs. Only overridden in tests or behind a proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub authorize: Url,
    pub token: Url,
    pub revoke: Url,
}

impl OAuthEndpoints {
    pub fn intuit() -> Result<Self> {
        Ok(Self {
            authorize: parse_url(AUTHORIZE_URL)?,
            token: parse_url(TOKEN_URL)?,
            revoke: parse_url(REVOKE_URL)?,
        })
    }
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|_| Error::InvalidEndpoint)
}

/// Everything the client needs to know about the app and the remote service.
#[derive(Debug, Clone)]
pub struct Config {
    pub key_pair: KeyPair,
    pub redirect_url: Url,
    pub environment: Environment,
    /// Sent as `minorversion` on every data request when set.
    pub minor_version: Option<u32>,
    pub scopes: Scope,
    pub refresh_margin: Duration,
    pub retry: RetryPolicy,
    pub endpoints: OAuthEndpoints,
    /// Replaces the environment's data API host when set.
    pub base_url_override: Option<Url>,
}

impl Config {
    /// Creates a sandbox configuration requesting the accounting scope.
    pub fn new(key_pair: KeyPair, redirect_url: Url) -> Result<Self> {
        Ok(Self {
            key_pair,
            redirect_url,
            environment: Environment::default(),
            minor_version: None,
            scopes: Scope::default(),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            retry: RetryPolicy::default(),
            endpoints: OAuthEndpoints::intuit()?,
            base_url_override: None,
        })
    }

    /// Reads `QBO_CLIENT_ID`, `QBO_CLIENT_SECRET`, `QBO_REDIRECT_URL`,
    /// `QBO_ENVIRONMENT` and `QBO_MINOR_VERSION`.
    pub fn from_env() -> Result<Self> {
        let key_pair = KeyPair::from_env()?;
        let redirect_url = std::env::var("QBO_REDIRECT_URL")
            .map_err(|_| Error::Config("QBO_REDIRECT_URL not set".to_string()))?;
        let redirect_url = Url::parse(&redirect_url)
            .map_err(|e| Error::Config(format!("QBO_REDIRECT_URL is not a URL: {e}")))?;

        let mut config = Self::new(key_pair, redirect_url)?;
        if let Ok(environment) = std::env::var("QBO_ENVIRONMENT") {
            config.environment = environment.parse()?;
        }
        if let Ok(minor_version) = std::env::var("QBO_MINOR_VERSION") {
            config.minor_version = Some(minor_version.parse().map_err(|e| {
                Error::Config(format!("QBO_MINOR_VERSION `{minor_version}`: {e}"))
            })?);
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    #[must_use]
    pub fn with_minor_version(mut self, minor_version: u32) -> Self {
        self.minor_version = Some(minor_version);
        self
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: Scope) -> Self {
        self.scopes = scopes;
        self
    }

    #[must_use]
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url_override = Some(base_url);
        self
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: OAuthEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Root of the data API for the configured environment.
    pub fn api_base_url(&self) -> Result<Url> {
        match &self.base_url_override {
            Some(url) => Ok(url.clone()),
            None => parse_url(self.environment.base_url()),
        }
    }
}
