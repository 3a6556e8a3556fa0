use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing_error::SpanTrace;

use crate::registry::{EntityType, Operation};
use crate::store::StoreError;
use crate::transport::TransportError;

/// Fault code the service uses for a stale `SyncToken`.
pub const STALE_OBJECT_CODE: &str = "5010";
/// Fault code the service uses when an entity id does not exist.
pub const OBJECT_NOT_FOUND_CODE: &str = "610";

/// Error body returned by the OAuth2 token and revocation endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2ErrorResponse {
    #[serde(default)]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl oauth2::ErrorResponse for OAuth2ErrorResponse {}

impl fmt::Display for OAuth2ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{}: {description}", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

/// The `Fault` envelope the data API wraps every error in.
///
/// ```json
/// {"Fault": {"Error": [{"Message": "Stale Object Error", "code": "5010"}], "type": "ValidationFault"}}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
    pub fault: Fault,
    #[serde(default, rename = "time", skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    #[serde(rename = "Error", default)]
    pub errors: Vec<FaultError>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub fault_type: Option<String>,
}

impl Fault {
    /// Returns true if any of the contained errors carries `code`.
    #[must_use]
    pub fn has_code(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    /// One-line summary of every contained error message.
    #[must_use]
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| match &e.detail {
                Some(detail) => format!("[{}] {}: {detail}", e.code, e.message),
                None => format!("[{}] {}", e.code, e.message),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultError {
    #[serde(rename = "Message", default)]
    pub message: String,
    #[serde(rename = "Detail", default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default)]
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
}

/// A single client-side schema violation found before a request is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    NotAnObject,
    MissingField(String),
    MissingOneOf(Vec<String>),
    ReadOnlyField(String),
    TooLong {
        field: String,
        max: usize,
        actual: usize,
    },
    MissingLineDetail {
        line: usize,
        field: String,
    },
    InvalidLine {
        line: usize,
        reason: String,
    },
    InvalidQuery(String),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "payload must be a JSON object"),
            Self::MissingField(field) => write!(f, "`{field}` is required"),
            Self::MissingOneOf(fields) => {
                write!(f, "one of `{}` is required", fields.join("`, `"))
            }
            Self::ReadOnlyField(field) => write!(f, "`{field}` is read-only"),
            Self::TooLong { field, max, actual } => {
                write!(f, "`{field}` is {actual} characters, max is {max}")
            }
            Self::MissingLineDetail { line, field } => {
                write!(f, "line {line} is missing `{field}`")
            }
            Self::InvalidLine { line, reason } => write!(f, "line {line}: {reason}"),
            Self::InvalidQuery(reason) => write!(f, "invalid query: {reason}"),
        }
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur when interacting with the ledger service.
///
/// The type is `Clone` so the result of a single in-flight token refresh can
/// be handed to every caller waiting on it.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum Error {
    #[error("authorization code exchange failed for realm {realm_id}: {message}")]
    #[diagnostic(
        code(quickbooks_rs::auth_exchange),
        help("The code may be invalid, expired, already used, or the redirect URI may not match the one registered for the app")
    )]
    AuthExchange {
        realm_id: String,
        message: String,
        response: Option<OAuth2ErrorResponse>,
    },

    #[error("token refresh rejected for realm {realm_id}: {message}")]
    #[diagnostic(
        code(quickbooks_rs::refresh_failed),
        help("The stored credentials were left untouched; the refresh token may have been revoked, re-run the authorization flow if this persists")
    )]
    RefreshFailed {
        realm_id: String,
        message: String,
        response: Option<OAuth2ErrorResponse>,
    },

    #[error("refresh token for realm {realm_id} expired at {refresh_expired_at}")]
    #[diagnostic(
        code(quickbooks_rs::reauthorization_required),
        help("Send the user through the authorization code flow again")
    )]
    ReauthorizationRequired {
        realm_id: String,
        refresh_expired_at: OffsetDateTime,
    },

    #[error("no credentials stored for realm {realm_id}")]
    #[diagnostic(
        code(quickbooks_rs::missing_credentials),
        help("Complete the authorization code flow for this realm first")
    )]
    MissingCredentials { realm_id: String },

    #[error("validation failed for {entity}: {}", join_violations(.violations))]
    #[diagnostic(
        code(quickbooks_rs::validation),
        help("Fix the payload; nothing was sent to the service")
    )]
    Validation {
        entity: EntityType,
        violations: Vec<Violation>,
    },

    #[error("{entity} {id} was modified by someone else (SyncToken {sync_token} is stale)")]
    #[diagnostic(
        code(quickbooks_rs::concurrency_conflict),
        help("Read the {entity} again to obtain the current SyncToken before updating")
    )]
    ConcurrencyConflict {
        entity: EntityType,
        id: String,
        sync_token: String,
        fault: Option<Fault>,
    },

    #[error("object not found: {entity} (url: {url})")]
    #[diagnostic(
        code(quickbooks_rs::not_found),
        help("Verify that the {entity} exists in this realm")
    )]
    NotFound {
        entity: EntityType,
        id: Option<String>,
        url: String,
    },

    #[error("{operation} is not supported for {entity}")]
    #[diagnostic(code(quickbooks_rs::unsupported_operation))]
    UnsupportedOperation {
        entity: EntityType,
        operation: Operation,
    },

    #[error("line {line} of {entity} has unrecognized DetailType {detail_type:?}")]
    #[diagnostic(
        code(quickbooks_rs::unknown_line_variant),
        help("Each {entity} line must use one of the detail types permitted for {entity}")
    )]
    UnknownLineVariant {
        entity: EntityType,
        line: usize,
        detail_type: Option<String>,
    },

    #[error("transport error: {source}")]
    #[diagnostic(
        code(quickbooks_rs::transport),
        help("Check your network connection and the service's availability")
    )]
    Transport {
        source: TransportError,
        span_trace: SpanTrace,
    },

    #[error("service returned {status} for {url}: {}", .fault.as_ref().map_or_else(|| body.clone(), Fault::summary))]
    #[diagnostic(
        code(quickbooks_rs::remote_service),
        help("Inspect the fault payload returned by the service")
    )]
    RemoteService {
        status: StatusCode,
        url: String,
        fault: Option<Fault>,
        body: String,
        span_trace: SpanTrace,
    },

    /// Rate limit exceeded (HTTP 429 Too Many Requests)
    #[error("rate limit exceeded: retry after {retry_after:?}")]
    #[diagnostic(
        code(quickbooks_rs::rate_limit_exceeded),
        help("The per-realm rate limit was hit. Wait and retry, or throttle requests.")
    )]
    RateLimitExceeded {
        retry_after: Option<Duration>,
        url: String,
        body: Option<String>,
    },

    #[error("error decoding {entity} response: {source}")]
    #[diagnostic(
        code(quickbooks_rs::deserialization_error),
        help("The service returned data in an unexpected format")
    )]
    Deserialization {
        entity: String,
        source: Arc<serde_json::Error>,
        body: Option<String>,
    },

    #[error("credential store error: {0}")]
    #[diagnostic(code(quickbooks_rs::credential_store))]
    CredentialStore(#[source] StoreError),

    #[error("invalid authorization callback: {0}")]
    #[diagnostic(
        code(quickbooks_rs::invalid_callback),
        help("The redirect must carry `code`, `realmId` and the `state` issued with the authorization URL")
    )]
    InvalidCallback(String),

    #[error("endpoint could not be parsed as a URL")]
    #[diagnostic(
        code(quickbooks_rs::invalid_endpoint),
        help("Check that the configured base URLs are absolute URLs")
    )]
    InvalidEndpoint,

    #[error("configuration error: {0}")]
    #[diagnostic(code(quickbooks_rs::config))]
    Config(String),
}

impl Error {
    /// Whether an idempotent request that failed with this error may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::RateLimitExceeded { .. })
    }

    /// The span trace captured where the error was created, if any.
    #[must_use]
    pub fn span_trace(&self) -> Option<&SpanTrace> {
        match self {
            Self::Transport { span_trace, .. } | Self::RemoteService { span_trace, .. } => {
                Some(span_trace)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::RemoteService { status, .. } => Some(*status),
            Self::NotFound { .. } => Some(StatusCode::NOT_FOUND),
            Self::RateLimitExceeded { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            _ => None,
        }
    }

    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::RemoteService { url, .. }
            | Self::NotFound { url, .. }
            | Self::RateLimitExceeded { url, .. } => Some(url),
            _ => None,
        }
    }

    #[must_use]
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Self::RemoteService { fault, .. } | Self::ConcurrencyConflict { fault, .. } => {
                fault.as_ref()
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn response_body(&self) -> Option<&str> {
        match self {
            Self::RemoteService { body, .. } => Some(body),
            Self::RateLimitExceeded { body, .. } | Self::Deserialization { body, .. } => {
                body.as_deref()
            }
            _ => None,
        }
    }

    pub(crate) fn deserialization(
        entity: impl Into<String>,
        source: serde_json::Error,
        body: Option<String>,
    ) -> Self {
        Self::Deserialization {
            entity: entity.into(),
            source: Arc::new(source),
            body,
        }
    }
}

impl From<TransportError> for Error {
    fn from(source: TransportError) -> Self {
        Self::Transport {
            source,
            span_trace: SpanTrace::capture(),
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::CredentialStore(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::deserialization("unknown", e, None)
    }
}

/// Type alias for results from this crate.
///
/// This is already a Miette diagnostic result due to the implementation of
/// the Diagnostic trait for the Error type.
pub type Result<O> = std::result::Result<O, Error>;
