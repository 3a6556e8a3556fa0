use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use http::{Method, StatusCode, header};
use oauth2::CsrfToken;
use serde_json::{Value, json};
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;
use tracing_error::SpanTrace;
use url::Url;

use crate::MutationOptions;
use crate::config::{Config, RetryPolicy};
use crate::endpoints::Endpoint;
use crate::entities::entity::{Deleted, Entity, EntityState, QueryResult, TypedEntity};
use crate::error::{self, Error, Fault, Result, Violation};
use crate::mapping;
use crate::registry::{EntityType, Operation};
use crate::store::CredentialStore;
use crate::token::{CallbackParams, TokenManager, TokenRecord};
use crate::transport::{HttpResponse, ReqwestTransport, Transport, TransportError};
use crate::validation::{self, UpdateMode};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RESULTS: u32 = 100;
const JSON: &str = "application/json";
const PDF: &str = "application/pdf";

/// Paging and filtering for [`EntityApi::query`].
///
/// The filter and ordering are passed to the service untouched:
///
/// ```ignore
/// let page = QueryParameters::new()
///     .filter("Balance > '0'")
///     .order_by("DueDate DESC")
///     .max_results(50);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParameters {
    pub filter: Option<String>,
    pub order_by: Option<String>,
    /// 1-based.
    pub start_position: u32,
    pub max_results: u32,
}

impl Default for QueryParameters {
    fn default() -> Self {
        Self {
            filter: None,
            order_by: None,
            start_position: 1,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

impl QueryParameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    #[must_use]
    pub fn start_position(mut self, start_position: u32) -> Self {
        self.start_position = start_position;
        self
    }

    #[must_use]
    pub fn max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    /// The query statement sent for `entity_type`.
    #[must_use]
    pub fn statement(&self, entity_type: EntityType) -> String {
        let mut statement = format!("select * from {}", entity_type.name());
        if let Some(filter) = &self.filter {
            statement.push_str(" where ");
            statement.push_str(filter);
        }
        if let Some(order_by) = &self.order_by {
            statement.push_str(" orderby ");
            statement.push_str(order_by);
        }
        statement.push_str(&format!(
            " startposition {} maxresults {}",
            self.start_position, self.max_results
        ));
        statement
    }
}

const MAX_STALE_MARKS: usize = 10_000;

type StaleKey = (String, EntityType, String);

/// Record ids whose `SyncToken` the service rejected as stale, keyed by
/// realm, entity type and id.
///
/// A mark goes away on a successful read, update, delete or void of the
/// record. At most [`MAX_STALE_MARKS`] are kept; past that the oldest is
/// dropped, and the service rejects that token again if it is reused.
#[derive(Debug)]
struct StaleMarks {
    marks: Mutex<HashMap<StaleKey, StaleMark>>,
    capacity: usize,
}

#[derive(Debug)]
struct StaleMark {
    sync_token: String,
    marked_at: Instant,
}

impl Default for StaleMarks {
    fn default() -> Self {
        Self::with_capacity(MAX_STALE_MARKS)
    }
}

impl StaleMarks {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            marks: Mutex::default(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StaleKey, StaleMark>> {
        self.marks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark(&self, realm_id: &str, entity_type: EntityType, id: &str, sync_token: &str) {
        let key = (realm_id.to_string(), entity_type, id.to_string());
        let mut marks = self.lock();
        if !marks.contains_key(&key) && marks.len() >= self.capacity {
            let oldest = marks
                .iter()
                .min_by_key(|(_, mark)| mark.marked_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                trace!(?oldest, "dropping oldest stale mark");
                marks.remove(&oldest);
            }
        }
        marks.insert(
            key,
            StaleMark {
                sync_token: sync_token.to_string(),
                marked_at: Instant::now(),
            },
        );
    }

    fn clear(&self, realm_id: &str, entity_type: EntityType, id: &str) {
        self.lock()
            .remove(&(realm_id.to_string(), entity_type, id.to_string()));
    }

    fn is_stale(
        &self,
        realm_id: &str,
        entity_type: EntityType,
        id: &str,
        sync_token: &str,
    ) -> bool {
        self.lock()
            .get(&(realm_id.to_string(), entity_type, id.to_string()))
            .is_some_and(|stale| stale.sync_token == sync_token)
    }
}

/// What a request acts on, used to build typed errors.
#[derive(Debug, Clone, Copy)]
struct Target<'a> {
    entity_type: EntityType,
    id: Option<&'a str>,
    sync_token: Option<&'a str>,
}

impl<'a> Target<'a> {
    fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            id: None,
            sync_token: None,
        }
    }

    fn record(entity_type: EntityType, id: &'a str) -> Self {
        Self {
            id: Some(id),
            ..Self::new(entity_type)
        }
    }

    fn versioned(entity_type: EntityType, id: &'a str, sync_token: &'a str) -> Self {
        Self {
            entity_type,
            id: Some(id),
            sync_token: Some(sync_token),
        }
    }
}

#[derive(Debug)]
struct ApiRequest {
    method: Method,
    url: Url,
    body: Option<Vec<u8>>,
    accept: &'static str,
}

impl ApiRequest {
    fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            body: None,
            accept: JSON,
        }
    }

    fn post(url: Url, body: &Value) -> Result<Self> {
        Ok(Self {
            method: Method::POST,
            url,
            body: Some(serde_json::to_vec(body)?),
            accept: JSON,
        })
    }
}

/// This is the client used for interacting with the accounting API. It owns
/// the token manager and routes every entity request through it.
///
/// Cloning is cheap; clones share tokens, transport and stale marks.
#[derive(Clone)]
pub struct Client {
    config: Arc<Config>,
    base_url: Url,
    tokens: TokenManager,
    transport: Arc<dyn Transport>,
    stale: Arc<StaleMarks>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url.as_str())
            .field("minor_version", &self.config.minor_version)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client that talks to the service over `reqwest`.
    pub fn new(config: Config, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let transport: Arc<dyn Transport> =
            Arc::new(ReqwestTransport::with_timeout(DEFAULT_TIMEOUT)?);
        Self::with_transport(config, store, transport)
    }

    pub fn with_transport(
        config: Config,
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let tokens = TokenManager::new(&config, store, transport.clone());
        Self::with_token_manager(config, tokens, transport)
    }

    /// Creates a client around an existing token manager, e.g. one built with
    /// a custom [`Clock`](crate::token::Clock).
    pub fn with_token_manager(
        config: Config,
        tokens: TokenManager,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let base_url = config.api_base_url()?;
        Ok(Self {
            config: Arc::new(config),
            base_url,
            tokens,
            transport,
            stale: Arc::new(StaleMarks::default()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Same as [`TokenManager::authorization_url`].
    #[must_use]
    pub fn authorization_url(&self) -> (Url, CsrfToken) {
        self.tokens.authorization_url()
    }

    /// Same as [`TokenManager::exchange_authorization_code`].
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        realm_id: &str,
    ) -> Result<TokenRecord> {
        self.tokens.exchange_authorization_code(code, realm_id).await
    }

    /// Completes the authorization code flow from the redirect the service
    /// sent the user back with.
    #[instrument(skip(self, callback_url, expected_state))]
    pub async fn handle_callback(
        &self,
        callback_url: &Url,
        expected_state: &CsrfToken,
    ) -> Result<TokenRecord> {
        let params = CallbackParams::from_url(callback_url)?;
        params.verify_state(expected_state)?;
        self.tokens
            .exchange_authorization_code(&params.code, &params.realm_id)
            .await
    }

    /// Access the requests for one entity type within one realm (company).
    #[must_use]
    pub fn entity(&self, realm_id: impl Into<String>, entity_type: EntityType) -> EntityApi<'_> {
        EntityApi {
            client: self,
            realm_id: realm_id.into(),
            entity_type,
            options: MutationOptions::default(),
        }
    }

    pub async fn create_typed<T: TypedEntity>(&self, realm_id: &str, record: &T) -> Result<T> {
        let entity = Entity::from_typed(record)?;
        self.entity(realm_id, T::ENTITY_TYPE)
            .create(&entity)
            .await?
            .into_typed()
    }

    pub async fn read_typed<T: TypedEntity>(&self, realm_id: &str, id: &str) -> Result<T> {
        self.entity(realm_id, T::ENTITY_TYPE)
            .read(id)
            .await?
            .into_typed()
    }

    pub async fn update_typed<T: TypedEntity>(
        &self,
        realm_id: &str,
        record: &T,
        mode: UpdateMode,
    ) -> Result<T> {
        let entity = Entity::from_typed(record)?;
        self.entity(realm_id, T::ENTITY_TYPE)
            .update(&entity, mode)
            .await?
            .into_typed()
    }

    fn backoff(policy: &RetryPolicy) -> impl Iterator<Item = Duration> + use<> {
        let base_ms = u64::try_from(policy.base_delay.as_millis()).unwrap_or(u64::MAX);
        // The first delay is 2 * factor.
        ExponentialBackoff::from_millis(2)
            .factor((base_ms / 2).max(1))
            .max_delay(policy.max_delay)
            .take(policy.max_retries)
    }

    /// Runs `request`, retrying idempotent ones on transport failures and
    /// throttling.
    async fn execute(
        &self,
        realm_id: &str,
        target: Target<'_>,
        request: ApiRequest,
        idempotent: bool,
    ) -> Result<Vec<u8>> {
        let request = &request;
        let attempt = move || async move {
            let response = self.send_once(realm_id, request).await?;
            classify(target, request, response)
        };

        if idempotent {
            RetryIf::start(Self::backoff(&self.config.retry), attempt, |e: &Error| {
                let retry = e.is_retryable();
                if retry {
                    warn!(error = %e, url = %request.url, "retrying request");
                }
                retry
            })
            .await
        } else {
            attempt().await
        }
    }

    async fn send_once(&self, realm_id: &str, request: &ApiRequest) -> Result<HttpResponse> {
        let token = self.tokens.get_valid_token(realm_id).await?;

        let mut builder = http::Request::builder()
            .method(request.method.clone())
            .uri(request.url.as_str())
            .header(header::AUTHORIZATION, token.bearer())
            .header(header::ACCEPT, request.accept);
        if request.body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, JSON);
        }
        let http_request = builder
            .body(request.body.clone().unwrap_or_default())
            .map_err(|e| TransportError::other(e.to_string()))?;

        trace!(method = %request.method, url = %request.url, "making request");
        Ok(self.transport.execute(http_request).await?)
    }
}

/// Turns a raw response into its body or a typed error.
///
/// A 2xx response whose body is a `Fault` envelope is an error too.
fn classify(target: Target<'_>, request: &ApiRequest, response: HttpResponse) -> Result<Vec<u8>> {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.into_body();
    let url = request.url.to_string();
    debug!(%status, %url, bytes = body.len(), "response received");

    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!(%url, ?retry_after, "rate limit exceeded");
        return Err(Error::RateLimitExceeded {
            retry_after,
            url,
            body: Some(String::from_utf8_lossy(&body).into_owned()),
        });
    }

    let fault = serde_json::from_slice::<error::Response>(&body)
        .ok()
        .map(|r| r.fault);
    if status.is_success() && fault.is_none() {
        return Ok(body);
    }
    Err(remote_error(target, status, url, fault, &body))
}

fn remote_error(
    target: Target<'_>,
    status: StatusCode,
    url: String,
    fault: Option<Fault>,
    body: &[u8],
) -> Error {
    let has_code = |code| fault.as_ref().is_some_and(|f| f.has_code(code));

    if status == StatusCode::CONFLICT || has_code(error::STALE_OBJECT_CODE) {
        warn!(entity = %target.entity_type, id = ?target.id, "stale SyncToken");
        return Error::ConcurrencyConflict {
            entity: target.entity_type,
            id: target.id.unwrap_or_default().to_string(),
            sync_token: target.sync_token.unwrap_or_default().to_string(),
            fault,
        };
    }
    if status == StatusCode::NOT_FOUND || has_code(error::OBJECT_NOT_FOUND_CODE) {
        return Error::NotFound {
            entity: target.entity_type,
            id: target.id.map(str::to_string),
            url,
        };
    }

    let body = String::from_utf8_lossy(body).into_owned();
    error!(%status, %url, fault = ?fault.as_ref().map(Fault::summary), "request failed");
    Error::RemoteService {
        status,
        url,
        fault,
        body,
        span_trace: SpanTrace::capture(),
    }
}

/// Requests for one entity type within one realm.
#[derive(Debug)]
pub struct EntityApi<'a> {
    client: &'a Client,
    realm_id: String,
    entity_type: EntityType,
    options: MutationOptions,
}

impl EntityApi<'_> {
    /// Options applied to every mutation sent through this handle.
    #[must_use]
    pub fn with_options(mut self, options: MutationOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    #[must_use]
    pub fn realm_id(&self) -> &str {
        &self.realm_id
    }

    /// Lifecycle state of `entity`, including whether this client has seen
    /// its `SyncToken` rejected.
    #[must_use]
    pub fn state(&self, entity: &Entity) -> EntityState {
        match (entity.id(), entity.sync_token()) {
            (Some(id), Some(sync_token))
                if self
                    .client
                    .stale
                    .is_stale(&self.realm_id, self.entity_type, id, sync_token) =>
            {
                EntityState::StaleLocal
            }
            _ => entity.state(),
        }
    }

    #[instrument(skip(self, payload), fields(realm_id = %self.realm_id, entity = %self.entity_type))]
    pub async fn create(&self, payload: &Entity) -> Result<Entity> {
        self.entity_type.ensure_supports(Operation::Create)?;
        let mut body = payload.to_value()?;
        if let Value::Object(map) = &mut body {
            map.remove("sparse");
        }
        validation::validate_create(self.entity_type, &body)?;

        let url = self.mutation_url(&Endpoint::Collection(self.entity_type))?;
        let bytes = self
            .client
            .execute(
                &self.realm_id,
                Target::new(self.entity_type),
                ApiRequest::post(url, &body)?,
                false,
            )
            .await?;
        let created = self.parse_entity(&bytes)?;
        info!(id = ?created.id(), "created");
        Ok(created)
    }

    #[instrument(skip(self), fields(realm_id = %self.realm_id, entity = %self.entity_type))]
    pub async fn read(&self, id: &str) -> Result<Entity> {
        self.entity_type.ensure_supports(Operation::Read)?;
        let url = self.url(&Endpoint::Record(self.entity_type, id.to_string()))?;
        let bytes = self
            .client
            .execute(
                &self.realm_id,
                Target::record(self.entity_type, id),
                ApiRequest::get(url),
                true,
            )
            .await?;
        let entity = self.parse_entity(&bytes)?;
        self.client.stale.clear(&self.realm_id, self.entity_type, id);
        Ok(entity)
    }

    /// Updates a persisted record.
    ///
    /// `MetaData` and the type's read-only fields are dropped from the body.
    /// A full update replaces the record and needs every required field; a
    /// sparse update only changes the fields present. A payload carrying
    /// `sparse: true` is always sent as a sparse update.
    #[instrument(skip(self, payload), fields(realm_id = %self.realm_id, entity = %self.entity_type))]
    pub async fn update(&self, payload: &Entity, mode: UpdateMode) -> Result<Entity> {
        let mode = if payload.sparse == Some(true) {
            UpdateMode::Sparse
        } else {
            mode
        };
        let operation = match mode {
            UpdateMode::Full => Operation::Update,
            UpdateMode::Sparse => Operation::SparseUpdate,
        };
        self.entity_type.ensure_supports(operation)?;

        let body = self.update_body(payload, mode)?;
        validation::validate_update(self.entity_type, &body, mode)?;
        let identity = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);
        let (Some(id), Some(sync_token)) = (identity("Id"), identity("SyncToken")) else {
            return Err(Error::Validation {
                entity: self.entity_type,
                violations: vec![Violation::MissingField("Id".to_string())],
            });
        };
        let (id, sync_token) = (id.as_str(), sync_token.as_str());
        self.ensure_not_stale(id, sync_token)?;

        let url = self.mutation_url(&Endpoint::Collection(self.entity_type))?;
        let result = self
            .client
            .execute(
                &self.realm_id,
                Target::versioned(self.entity_type, id, sync_token),
                ApiRequest::post(url, &body)?,
                false,
            )
            .await;
        let bytes = self.track_conflict(result, id, sync_token)?;
        let updated = self.parse_entity(&bytes)?;
        debug!(id, sync_token = ?updated.sync_token(), "updated");
        Ok(updated)
    }

    /// Shorthand for [`update`](Self::update) with [`UpdateMode::Sparse`].
    pub async fn sparse_update(&self, payload: &Entity) -> Result<Entity> {
        self.update(payload, UpdateMode::Sparse).await
    }

    #[instrument(skip(self), fields(realm_id = %self.realm_id, entity = %self.entity_type))]
    pub async fn delete(&self, id: &str, sync_token: &str) -> Result<Deleted> {
        self.entity_type.ensure_supports(Operation::Delete)?;
        let bytes = self
            .versioned_operation(Endpoint::Delete(self.entity_type), id, sync_token)
            .await?;
        let deleted = mapping::map_deleted(self.entity_type, self.parse_json(&bytes)?)?;
        self.client.stale.clear(&self.realm_id, self.entity_type, id);
        info!(id, status = %deleted.status, "deleted");
        Ok(deleted)
    }

    /// Voids a transaction. The record stays, with its amounts zeroed.
    #[instrument(skip(self), fields(realm_id = %self.realm_id, entity = %self.entity_type))]
    pub async fn void(&self, id: &str, sync_token: &str) -> Result<Entity> {
        self.entity_type.ensure_supports(Operation::Void)?;
        let bytes = self
            .versioned_operation(Endpoint::Void(self.entity_type), id, sync_token)
            .await?;
        let voided = self.parse_entity(&bytes)?;
        info!(id, "voided");
        Ok(voided)
    }

    #[instrument(skip(self), fields(realm_id = %self.realm_id, entity = %self.entity_type))]
    pub async fn query(&self, parameters: &QueryParameters) -> Result<QueryResult> {
        self.entity_type.ensure_supports(Operation::Query)?;
        validation::validate_page(
            self.entity_type,
            parameters.start_position,
            parameters.max_results,
        )?;
        let value = self.run_query(parameters.statement(self.entity_type)).await?;
        mapping::map_query_response(self.entity_type, value, parameters.start_position)
    }

    /// Number of records matching `filter`.
    #[instrument(skip(self), fields(realm_id = %self.realm_id, entity = %self.entity_type))]
    pub async fn count(&self, filter: Option<&str>) -> Result<u64> {
        self.entity_type.ensure_supports(Operation::Query)?;
        let mut statement = format!("select count(*) from {}", self.entity_type.name());
        if let Some(filter) = filter {
            statement.push_str(" where ");
            statement.push_str(filter);
        }
        let value = self.run_query(statement).await?;
        let text = value.to_string();
        mapping::map_query_response(self.entity_type, value, 1)?
            .total_count
            .ok_or_else(|| {
                Error::deserialization(
                    self.entity_type.name(),
                    <serde_json::Error as serde::de::Error>::missing_field("totalCount"),
                    Some(text),
                )
            })
    }

    /// Emails the record to `send_to`, or to the address stored on it.
    #[instrument(skip(self), fields(realm_id = %self.realm_id, entity = %self.entity_type))]
    pub async fn send(&self, id: &str, send_to: Option<&str>) -> Result<Entity> {
        self.entity_type.ensure_supports(Operation::Send)?;
        let endpoint = Endpoint::Send {
            entity: self.entity_type,
            id: id.to_string(),
            send_to: send_to.map(str::to_string),
        };
        let request = ApiRequest {
            method: Method::POST,
            url: self.mutation_url(&endpoint)?,
            body: None,
            accept: JSON,
        };
        let bytes = self
            .client
            .execute(
                &self.realm_id,
                Target::record(self.entity_type, id),
                request,
                false,
            )
            .await?;
        self.parse_entity(&bytes)
    }

    /// Downloads the record rendered as a PDF.
    #[instrument(skip(self), fields(realm_id = %self.realm_id, entity = %self.entity_type))]
    pub async fn pdf(&self, id: &str) -> Result<Vec<u8>> {
        self.entity_type.ensure_supports(Operation::Pdf)?;
        let request = ApiRequest {
            accept: PDF,
            ..ApiRequest::get(self.url(&Endpoint::Pdf(self.entity_type, id.to_string()))?)
        };
        self.client
            .execute(
                &self.realm_id,
                Target::record(self.entity_type, id),
                request,
                true,
            )
            .await
    }

    async fn run_query(&self, statement: String) -> Result<Value> {
        debug!(%statement, "running query");
        let url = self.url(&Endpoint::Query(statement))?;
        let bytes = self
            .client
            .execute(
                &self.realm_id,
                Target::new(self.entity_type),
                ApiRequest::get(url),
                true,
            )
            .await?;
        self.parse_json(&bytes)
    }

    /// Posts `{Id, SyncToken}` to an `?operation=` endpoint.
    async fn versioned_operation(
        &self,
        endpoint: Endpoint,
        id: &str,
        sync_token: &str,
    ) -> Result<Vec<u8>> {
        self.ensure_not_stale(id, sync_token)?;
        let url = self.mutation_url(&endpoint)?;
        let body = json!({"Id": id, "SyncToken": sync_token});
        let result = self
            .client
            .execute(
                &self.realm_id,
                Target::versioned(self.entity_type, id, sync_token),
                ApiRequest::post(url, &body)?,
                false,
            )
            .await;
        self.track_conflict(result, id, sync_token)
    }

    fn update_body(&self, payload: &Entity, mode: UpdateMode) -> Result<Value> {
        let schema = self.entity_type.schema();
        let mut body = payload.to_value()?;
        if let Value::Object(map) = &mut body {
            map.remove("MetaData");
            map.retain(|key, _| !schema.is_read_only(key));
            match mode {
                UpdateMode::Sparse => {
                    map.insert("sparse".to_string(), Value::Bool(true));
                }
                UpdateMode::Full => {
                    map.remove("sparse");
                }
            }
        }
        Ok(body)
    }

    fn ensure_not_stale(&self, id: &str, sync_token: &str) -> Result<()> {
        if self
            .client
            .stale
            .is_stale(&self.realm_id, self.entity_type, id, sync_token)
        {
            debug!(id, sync_token, "rejecting known stale SyncToken");
            return Err(Error::ConcurrencyConflict {
                entity: self.entity_type,
                id: id.to_string(),
                sync_token: sync_token.to_string(),
                fault: None,
            });
        }
        Ok(())
    }

    /// Records or clears the stale mark for `id` depending on `result`.
    fn track_conflict(
        &self,
        result: Result<Vec<u8>>,
        id: &str,
        sync_token: &str,
    ) -> Result<Vec<u8>> {
        match result {
            Ok(bytes) => {
                self.client.stale.clear(&self.realm_id, self.entity_type, id);
                Ok(bytes)
            }
            Err(e @ Error::ConcurrencyConflict { .. }) => {
                self.client
                    .stale
                    .mark(&self.realm_id, self.entity_type, id, sync_token);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn url(&self, endpoint: &Endpoint) -> Result<Url> {
        let mut url = endpoint.to_url(&self.client.base_url, &self.realm_id)?;
        if let Some(minor_version) = self.client.config.minor_version {
            url.query_pairs_mut()
                .append_pair("minorversion", &minor_version.to_string());
        }
        Ok(url)
    }

    fn mutation_url(&self, endpoint: &Endpoint) -> Result<Url> {
        let mut url = self.url(endpoint)?;
        self.options.apply_to_url(&mut url);
        Ok(url)
    }

    fn parse_json(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes).map_err(|e| {
            Error::deserialization(
                self.entity_type.name(),
                e,
                Some(String::from_utf8_lossy(bytes).into_owned()),
            )
        })
    }

    fn parse_entity(&self, bytes: &[u8]) -> Result<Entity> {
        let inner = mapping::unwrap_envelope(self.entity_type, self.parse_json(bytes)?)?;
        mapping::map_entity(self.entity_type, inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_statement() {
        assert_eq!(
            QueryParameters::new().statement(EntityType::Invoice),
            "select * from Invoice startposition 1 maxresults 100"
        );
    }

    #[test]
    fn test_full_statement() {
        let parameters = QueryParameters::new()
            .filter("Balance > '0'")
            .order_by("DueDate DESC")
            .start_position(101)
            .max_results(50);
        assert_eq!(
            parameters.statement(EntityType::Bill),
            "select * from Bill where Balance > '0' orderby DueDate DESC startposition 101 maxresults 50"
        );
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(500),
        };
        let delays: Vec<_> = Client::backoff(&policy).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500)
            ]
        );
    }

    #[test]
    fn test_stale_marks() {
        let marks = StaleMarks::default();
        marks.mark("1", EntityType::Bill, "7", "2");
        assert!(marks.is_stale("1", EntityType::Bill, "7", "2"));
        assert!(!marks.is_stale("1", EntityType::Bill, "7", "3"));
        assert!(!marks.is_stale("2", EntityType::Bill, "7", "2"));
        marks.clear("1", EntityType::Bill, "7");
        assert!(!marks.is_stale("1", EntityType::Bill, "7", "2"));
    }

    #[test]
    fn test_stale_marks_are_capped() {
        let marks = StaleMarks::with_capacity(2);
        marks.mark("1", EntityType::Bill, "1", "0");
        std::thread::sleep(Duration::from_millis(2));
        marks.mark("1", EntityType::Bill, "2", "0");
        std::thread::sleep(Duration::from_millis(2));
        marks.mark("1", EntityType::Bill, "3", "0");

        assert_eq!(marks.lock().len(), 2);
        assert!(!marks.is_stale("1", EntityType::Bill, "1", "0"));
        assert!(marks.is_stale("1", EntityType::Bill, "2", "0"));
        assert!(marks.is_stale("1", EntityType::Bill, "3", "0"));

        // Re-marking a known record never evicts another.
        marks.mark("1", EntityType::Bill, "3", "1");
        assert!(marks.is_stale("1", EntityType::Bill, "2", "0"));
    }
}
