//! # quickbooks-rs
//!
//! A Rust client library for the QuickBooks Online accounting API.
//!
//! Two pieces do the work:
//!
//! - [`TokenManager`] runs the OAuth2 authorization code flow and keeps each
//!   realm's tokens fresh. Refreshes are single-flight per realm and are
//!   persisted through an injected [`CredentialStore`].
//! - [`Client`] sends typed requests for every entity type in the
//!   [`registry`]. Payloads are validated before any I/O. Stale `SyncToken`s
//!   surface as [`Error::ConcurrencyConflict`].
//!
//! ```ignore
//! use std::sync::Arc;
//! use quickbooks_rs::{Client, Config, EntityType, JsonFileCredentialStore, QueryParameters};
//!
//! let store = Arc::new(JsonFileCredentialStore::load("tokens.json").await?);
//! let client = Client::new(Config::from_env()?, store)?;
//!
//! let invoices = client
//!     .entity("9130346988354396", EntityType::Invoice)
//!     .query(&QueryParameters::new().filter("Balance > '0'"))
//!     .await?;
//! ```
//!
//! ## Sentry Integration
//!
//! Remote and transport errors capture a [`SpanTrace`] when a
//! `tracing_error::ErrorLayer` is installed. Enable the `sentry` feature to
//! turn errors into breadcrumbs and extra context, see
//! [`sentry_integration`](crate::sentry_integration).

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

#[macro_use]
extern crate tracing;

pub mod client;
pub mod config;
pub mod endpoints;
pub mod entities;
pub mod error;
pub mod mapping;
pub mod oauth;
pub mod registry;
pub mod scope;
pub mod store;
pub mod token;
pub mod transport;
pub mod utils;
pub mod validation;

#[cfg(feature = "sentry")]
pub mod sentry_integration;

pub use client::{Client, EntityApi, QueryParameters};
pub use config::{Config, Environment, RetryPolicy};
pub use endpoints::Endpoint;
pub use entities::*;
pub use error::{Error, Fault, Violation};
pub use oauth::KeyPair;
pub use registry::{DetailType, EntityType, Operation};
pub use scope::{Scope, ScopeCategory, ScopeType};
pub use store::{CredentialStore, JsonFileCredentialStore, MemoryCredentialStore, StoreError};
pub use token::{CallbackParams, Clock, SystemClock, TokenManager, TokenRecord};
pub use transport::{ReqwestTransport, Transport, TransportError, TransportErrorKind};
pub use validation::UpdateMode;

use uuid::Uuid;

/// Options for mutation (create, update, delete, void, send) requests.
/// These control query parameters appended to the request URL.
#[derive(Debug, Default, Clone)]
pub struct MutationOptions {
    /// Idempotency key sent as `requestid`. The service answers a repeated
    /// id with the original result instead of applying the change twice.
    /// A fresh id is generated per request when unset.
    pub request_id: Option<Uuid>,
}

impl MutationOptions {
    #[must_use]
    pub fn with_request_id(request_id: Uuid) -> Self {
        Self {
            request_id: Some(request_id),
        }
    }

    /// Apply the options as query parameters to a URL.
    pub fn apply_to_url(&self, url: &mut url::Url) {
        let request_id = self.request_id.unwrap_or_else(Uuid::new_v4);
        url.query_pairs_mut()
            .append_pair("requestid", &request_id.to_string());
    }
}

// Re-export SpanTrace for users who want to access it
pub use tracing_error::SpanTrace;
