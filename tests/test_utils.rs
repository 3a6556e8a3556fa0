use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, Method, StatusCode};
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::macros::datetime;
use tracing::info;
use url::Url;

use quickbooks_rs::transport::{HttpRequest, HttpResponse};
use quickbooks_rs::{
    Client, Clock, Config, CredentialStore, KeyPair, MemoryCredentialStore, RetryPolicy,
    StoreError, TokenManager, TokenRecord, Transport, TransportError,
};

pub const REALM_ID: &str = "9991";
pub const TOKEN_PATH: &str = "/oauth2/v1/tokens/bearer";

/// Fixed point in time the mock clock starts at.
#[allow(dead_code)]
pub const EPOCH: OffsetDateTime = datetime!(2024-03-01 12:00 UTC);

static LOGGING_CONFIGURED: Once = Once::new();

/// Setup before test runs
pub fn do_setup() {
    LOGGING_CONFIGURED.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .init();
    });
    info!("Setting up test environment");
}

/// A request as seen by [`MockTransport`].
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[allow(dead_code)]
impl RecordedRequest {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn form(&self) -> HashMap<String, String> {
        url::form_urlencoded::parse(&self.body).into_owned().collect()
    }

    pub fn query(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

type Reply = Result<HttpResponse, TransportError>;

/// Transport that answers from scripted replies keyed by URL path.
///
/// Replies for a path are served in order; the last one keeps being served.
#[derive(Default)]
pub struct MockTransport {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    delay: Option<Duration>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits `delay` before answering each request.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn reply(&self, path: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn reply_json(&self, path: &str, status: u16, body: Value) {
        self.reply(path, Ok(json_response(status, &body)));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.path() == path)
            .collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests_to(path).len()
    }

    pub fn data_requests(&self) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.path() != TOKEN_PATH)
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let (parts, body) = request.into_parts();
        let url = Url::parse(&parts.uri.to_string()).unwrap();
        let path = url.path().to_string();
        self.requests.lock().unwrap().push(RecordedRequest {
            method: parts.method,
            url,
            headers: parts.headers,
            body,
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut replies = self.replies.lock().unwrap();
        let Some(queue) = replies.get_mut(&path) else {
            return Err(TransportError::other(format!("no reply scripted for {path}")));
        };
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().map(clone_reply)
        };
        reply.unwrap_or_else(|| Err(TransportError::other(format!("no reply scripted for {path}"))))
    }
}

fn clone_reply(reply: &Reply) -> Reply {
    match reply {
        Ok(response) => {
            let mut builder = http::Response::builder().status(response.status());
            for (name, value) in response.headers() {
                builder = builder.header(name, value);
            }
            Ok(builder.body(response.body().clone()).unwrap())
        }
        Err(e) => Err(e.clone()),
    }
}

/// A JSON response with the content type the token endpoint parser expects.
pub fn json_response(status: u16, body: &Value) -> HttpResponse {
    http::Response::builder()
        .status(StatusCode::from_u16(status).unwrap())
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(serde_json::to_vec(body).unwrap())
        .unwrap()
}

/// Token endpoint success body.
#[allow(dead_code)]
pub fn token_body(access_token: &str, refresh_token: &str) -> Value {
    json!({
        "token_type": "bearer",
        "access_token": access_token,
        "refresh_token": refresh_token,
        "expires_in": 3600,
        "x_refresh_token_expires_in": 8_726_400
    })
}

/// Credential store that counts saves.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryCredentialStore,
    saves: AtomicUsize,
}

#[allow(dead_code)]
impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `record` without counting it as a save.
    pub async fn seed(&self, record: TokenRecord) {
        let realm_id = record.realm_id.clone();
        self.inner.save(&realm_id, record).await.unwrap();
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn get(&self, realm_id: &str) -> Option<TokenRecord> {
        self.inner.fetch(realm_id).await.unwrap()
    }
}

#[async_trait]
impl CredentialStore for CountingStore {
    async fn fetch(&self, realm_id: &str) -> Result<Option<TokenRecord>, StoreError> {
        self.inner.fetch(realm_id).await
    }

    async fn save(&self, realm_id: &str, record: TokenRecord) -> Result<TokenRecord, StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(realm_id, record).await
    }
}

/// Clock that only moves when told to.
pub struct MockClock {
    now: Mutex<OffsetDateTime>,
}

#[allow(dead_code)]
impl MockClock {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: time::Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for MockClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap()
    }
}

#[allow(dead_code)]
pub fn test_config() -> Config {
    Config::new(
        KeyPair::new("client-id".to_string(), Some("client-secret".to_string())),
        Url::parse("https://example.com/callback").unwrap(),
    )
    .unwrap()
    .with_retry(RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
    })
}

/// Credentials for [`REALM_ID`] valid for an hour after [`EPOCH`].
#[allow(dead_code)]
pub fn fresh_record() -> TokenRecord {
    TokenRecord {
        realm_id: REALM_ID.to_string(),
        access_token: "access-0".to_string(),
        refresh_token: "refresh-0".to_string(),
        id_token: None,
        access_expires_at: EPOCH + time::Duration::hours(1),
        refresh_expires_at: EPOCH + time::Duration::days(100),
    }
}

/// Credentials for [`REALM_ID`] whose access token expired at [`EPOCH`].
#[allow(dead_code)]
pub fn expired_record() -> TokenRecord {
    TokenRecord {
        access_expires_at: EPOCH - time::Duration::minutes(5),
        ..fresh_record()
    }
}

/// Everything a test needs to drive a [`Client`] against scripted replies.
#[allow(dead_code)]
pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub store: Arc<CountingStore>,
    pub clock: Arc<MockClock>,
    pub tokens: TokenManager,
    pub client: Client,
}

#[allow(dead_code)]
impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config(), MockTransport::new()).await
    }

    pub async fn with_config(config: Config, transport: MockTransport) -> Self {
        do_setup();
        let transport = Arc::new(transport);
        let store = Arc::new(CountingStore::new());
        store.seed(fresh_record()).await;
        let clock = Arc::new(MockClock::new(EPOCH));
        let tokens = TokenManager::with_clock(
            &config,
            store.clone(),
            transport.clone(),
            clock.clone(),
        );
        let client = Client::with_token_manager(config, tokens.clone(), transport.clone()).unwrap();
        Self {
            transport,
            store,
            clock,
            tokens,
            client,
        }
    }

    pub fn path(resource: &str) -> String {
        format!("/v3/company/{REALM_ID}/{resource}")
    }
}
