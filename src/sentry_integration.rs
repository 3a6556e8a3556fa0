//! Sentry integration for quickbooks-rs errors.
//!
//! Only available when the `sentry` feature is enabled:
//!
//! ```toml
//! [dependencies]
//! quickbooks-rs = { version = "0.1", features = ["sentry"] }
//! ```
//!
//! Set up tracing with `ErrorLayer` so that remote and transport errors carry
//! a span trace:
//!
//! ```ignore
//! use tracing_subscriber::prelude::*;
//! use tracing_error::ErrorLayer;
//!
//! tracing_subscriber::registry()
//!     .with(tracing_subscriber::fmt::layer())
//!     .with(ErrorLayer::default())
//!     .with(sentry::integrations::tracing::layer())
//!     .init();
//! ```

use std::collections::BTreeMap;

use sentry_core::{Breadcrumb, protocol::Value};

use crate::error::Error;

const MAX_BODY_PREVIEW: usize = 500;

/// Records an error as a breadcrumb, keeping the entity type, ids and fault
/// codes but never token material.
impl<'a> From<&'a Error> for Breadcrumb {
    fn from(error: &'a Error) -> Self {
        let mut data = BTreeMap::new();
        let (category, message) = match error {
            Error::AuthExchange { realm_id, response, .. }
            | Error::RefreshFailed { realm_id, response, .. } => {
                data.insert("realm_id".to_string(), Value::from(realm_id.clone()));
                if let Some(response) = response {
                    data.insert("oauth_error".to_string(), Value::from(response.error.clone()));
                }
                ("auth", error.to_string())
            }
            Error::ReauthorizationRequired { realm_id, .. }
            | Error::MissingCredentials { realm_id } => {
                data.insert("realm_id".to_string(), Value::from(realm_id.clone()));
                ("auth", error.to_string())
            }
            Error::Validation { entity, violations } => {
                data.insert("entity".to_string(), Value::from(entity.name()));
                data.insert("violations".to_string(), Value::from(violations.len()));
                ("quickbooks.validation", format!("{entity} payload rejected"))
            }
            Error::UnknownLineVariant { entity, line, detail_type } => {
                data.insert("entity".to_string(), Value::from(entity.name()));
                data.insert("line".to_string(), Value::from(*line));
                if let Some(detail_type) = detail_type {
                    data.insert("detail_type".to_string(), Value::from(detail_type.clone()));
                }
                ("quickbooks.validation", error.to_string())
            }
            Error::UnsupportedOperation { entity, operation } => {
                data.insert("entity".to_string(), Value::from(entity.name()));
                data.insert("operation".to_string(), Value::from(operation.to_string()));
                ("quickbooks.validation", error.to_string())
            }
            Error::ConcurrencyConflict { entity, id, sync_token, .. } => {
                data.insert("entity".to_string(), Value::from(entity.name()));
                data.insert("id".to_string(), Value::from(id.clone()));
                data.insert("sync_token".to_string(), Value::from(sync_token.clone()));
                ("quickbooks.conflict", format!("stale SyncToken for {entity} {id}"))
            }
            Error::NotFound { entity, id, .. } => {
                data.insert("entity".to_string(), Value::from(entity.name()));
                if let Some(id) = id {
                    data.insert("id".to_string(), Value::from(id.clone()));
                }
                ("http.response", format!("{entity} not found"))
            }
            Error::RemoteService { fault, .. } => {
                if let Some(fault) = fault {
                    let codes: Vec<_> = fault.errors.iter().map(|e| e.code.clone()).collect();
                    data.insert("fault_codes".to_string(), Value::from(codes.join(",")));
                    if let Some(fault_type) = &fault.fault_type {
                        data.insert("fault_type".to_string(), Value::from(fault_type.clone()));
                    }
                }
                ("quickbooks.api", error.to_string())
            }
            Error::RateLimitExceeded { retry_after, .. } => {
                if let Some(retry) = retry_after {
                    data.insert("retry_after_secs".to_string(), Value::from(retry.as_secs()));
                }
                ("quickbooks.rate_limit", "rate limit exceeded".to_string())
            }
            Error::Transport { source, .. } => {
                ("http.request", format!("transport error: {source}"))
            }
            Error::Deserialization { entity, .. } => (
                "http.response",
                format!("failed to decode {entity} response"),
            ),
            Error::CredentialStore(_) => ("storage", error.to_string()),
            Error::InvalidCallback(_) | Error::InvalidEndpoint | Error::Config(_) => {
                ("quickbooks.config", error.to_string())
            }
        };

        if let Some(url) = error.url() {
            data.insert("url".to_string(), Value::from(url.to_string()));
        }
        if let Some(status) = error.status_code() {
            data.insert("status_code".to_string(), Value::from(status.as_u16()));
        }

        Breadcrumb {
            ty: "error".to_string(),
            category: Some(category.to_string()),
            message: Some(message),
            data,
            level: sentry_core::Level::Error,
            ..Default::default()
        }
    }
}

/// Extracts error details for use as Sentry extra context.
///
/// ```ignore
/// use sentry::configure_scope;
/// use quickbooks_rs::sentry_integration::error_to_sentry_context;
///
/// if let Err(e) = client.entity(realm_id, EntityType::Invoice).read("130").await {
///     configure_scope(|scope| {
///         for (key, value) in error_to_sentry_context(&e) {
///             scope.set_extra(&key, value);
///         }
///     });
/// }
/// ```
pub fn error_to_sentry_context(error: &Error) -> BTreeMap<String, Value> {
    let mut context = BTreeMap::new();

    if let Some(span_trace) = error.span_trace() {
        context.insert(
            "quickbooks.span_trace".to_string(),
            Value::from(format!("{span_trace}")),
        );
    }
    if let Some(url) = error.url() {
        context.insert("quickbooks.url".to_string(), Value::from(url.to_string()));
    }
    if let Some(status) = error.status_code() {
        context.insert(
            "quickbooks.status_code".to_string(),
            Value::from(status.as_u16()),
        );
    }
    if let Some(body) = error.response_body() {
        let preview: String = body.chars().take(MAX_BODY_PREVIEW).collect();
        context.insert("quickbooks.response_body".to_string(), Value::from(preview));
    }
    if let Some(fault) = error.fault() {
        context.insert("quickbooks.fault".to_string(), Value::from(fault.summary()));
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Fault, FaultError};
    use crate::registry::EntityType;

    #[test]
    fn test_conflict_breadcrumb() {
        let error = Error::ConcurrencyConflict {
            entity: EntityType::Bill,
            id: "7".to_string(),
            sync_token: "2".to_string(),
            fault: Some(Fault {
                errors: vec![FaultError {
                    message: "Stale Object Error".to_string(),
                    code: "5010".to_string(),
                    ..FaultError::default()
                }],
                fault_type: Some("ValidationFault".to_string()),
            }),
        };
        let crumb = Breadcrumb::from(&error);
        assert_eq!(crumb.category.as_deref(), Some("quickbooks.conflict"));
        assert_eq!(crumb.data.get("id"), Some(&Value::from("7")));

        let context = error_to_sentry_context(&error);
        assert!(context["quickbooks.fault"].as_str().unwrap().contains("5010"));
    }
}
