//! The HTTP seam.
//!
//! Every request the crate makes, including the OAuth2 token calls, goes
//! through a [`Transport`]. The default implementation wraps a
//! [`reqwest::Client`]; tests and embedders that already own an HTTP stack can
//! supply their own.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use miette::Diagnostic;
use thiserror::Error;

pub type HttpRequest = http::Request<Vec<u8>>;
pub type HttpResponse = http::Response<Vec<u8>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Other,
}

/// A request that never produced an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
#[error("{kind:?}: {message}")]
#[diagnostic(code(quickbooks_rs::transport_error))]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other, message)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            TransportErrorKind::Timeout
        } else if e.is_connect() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, e.to_string())
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and returns whatever response the server produced.
    ///
    /// Non-2xx statuses are not errors at this level.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Builds a transport whose requests give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            // The token endpoint must not follow redirects.
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip(self, request), fields(method = %request.method(), url = %request.uri()))]
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let request = reqwest::Request::try_from(request)?;
        let response = self.client.execute(request).await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        trace!(%status, bytes = body.len(), "response received");

        let mut builder = http::Response::builder().status(status);
        if let Some(h) = builder.headers_mut() {
            *h = headers;
        }
        builder
            .body(body.to_vec())
            .map_err(|e| TransportError::other(e.to_string()))
    }
}

/// Makes a `Send` future `Sync` as well, as required by the `oauth2` async
/// client interface. The future is only ever polled through `&mut`, so the
/// mutex is never locked.
pub(crate) struct SyncFuture<T> {
    inner: Mutex<BoxFuture<'static, T>>,
}

impl<T> SyncFuture<T> {
    pub(crate) fn new(future: BoxFuture<'static, T>) -> Self {
        Self {
            inner: Mutex::new(future),
        }
    }
}

impl<T> Future for SyncFuture<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let future = match self.get_mut().inner.get_mut() {
            Ok(future) => future,
            Err(poisoned) => poisoned.into_inner(),
        };
        future.as_mut().poll(cx)
    }
}
