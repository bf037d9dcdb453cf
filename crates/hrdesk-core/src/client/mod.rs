//! Authenticated HTTP client for the HR API.
//!
//! Attaches the persisted access token to every request and, when a request
//! comes back 401, renews the token pair once and replays the request. A
//! failed renewal clears the tokens and reports [`AuthLost`].

mod error;
mod renewal;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::Instrument;

pub use self::error::{ClientError, ClientResult, RenewalError, RenewalErrorKind};
pub use self::renewal::{AuthLost, RefreshRequest, RefreshResponse};
use self::renewal::{AuthLostHandler, Renewal, RenewalContext, RenewalSlot};
use crate::auth::store::{FileTokenStore, MemoryTokenStore, TokenPair, TokenStore};
use crate::config::Config;

/// Standard User-Agent header for hrdesk API requests.
pub const USER_AGENT: &str = concat!("hrdesk/", env!("CARGO_PKG_VERSION"));

/// Correlation header, identical on the first attempt and the retry.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Which attempt of a logical request is being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// The original send
    First,
    /// The single replay after a renewal
    Retry,
}

impl Attempt {
    /// Whether a 401 on this attempt may trigger renewal.
    pub fn may_renew(self) -> bool {
        matches!(self, Attempt::First)
    }
}

/// One logical request: method, resource path, optional JSON body and
/// caller headers.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<Value>,
    headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds a header. A caller-supplied `Authorization` header is sent as is
    /// on the first attempt.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Successful (2xx) response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl ApiResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes the body as JSON. An empty body decodes as `null`.
    ///
    /// # Errors
    /// Returns `ClientError::Decode` if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> ClientResult<T> {
        let body: &[u8] = if self.body.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &self.body
        };
        serde_json::from_slice(body).map_err(|err| ClientError::Decode(err.to_string()))
    }
}

/// A request ready to dispatch, minus the bearer token.
struct Prepared {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Value>,
    caller_authorization: bool,
}

/// Raw outcome of one dispatch.
struct Dispatched {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    default_headers: HeaderMap,
    store: Arc<dyn TokenStore>,
    refresh_path: String,
    login_route: String,
    on_auth_lost: Option<AuthLostHandler>,
    renewal: RenewalSlot,
}

/// Authenticated API client bound to one base endpoint.
///
/// Cheap to clone; clones share the token store and the in-flight renewal.
#[derive(Clone)]
pub struct AuthClient {
    inner: Arc<Inner>,
}

impl AuthClient {
    /// Binds a client to `base_url` with default headers, persisting tokens in
    /// the default token file. No network I/O happens here.
    ///
    /// # Errors
    /// Returns `ClientError::InvalidRequest` for a malformed URL or header.
    pub fn configure(
        base_url: &str,
        default_headers: &BTreeMap<String, String>,
    ) -> ClientResult<Self> {
        Self::builder(base_url)
            .default_headers(default_headers)
            .build()
    }

    /// Builds a client from the loaded configuration.
    ///
    /// # Errors
    /// Returns `ClientError::InvalidRequest` for a malformed URL or header.
    pub fn from_config(config: &Config, store: Arc<dyn TokenStore>) -> ClientResult<Self> {
        AuthClientBuilder::from_config(config)?.store(store).build()
    }

    pub fn builder(base_url: &str) -> AuthClientBuilder {
        AuthClientBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.inner.store
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    pub(crate) fn default_headers(&self) -> &HeaderMap {
        &self.inner.default_headers
    }

    /// Absolute URL for a resource path.
    pub fn endpoint(&self, path: &str) -> String {
        join_url(&self.inner.base_url, path)
    }

    /// Performs one logical request.
    ///
    /// A 401 on the first attempt renews the token pair and replays the
    /// request once; the replay's outcome is returned. Any other non-2xx
    /// status is returned as `ClientError::Http`.
    ///
    /// # Errors
    /// See [`ClientError`].
    pub async fn send(&self, request: ApiRequest) -> ClientResult<ApiResponse> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::debug_span!(
            "api_request",
            id = %request_id,
            method = %request.method,
            path = %request.path,
        );
        self.send_logical(request, &request_id)
            .instrument(span)
            .await
    }

    async fn send_logical(
        &self,
        request: ApiRequest,
        request_id: &str,
    ) -> ClientResult<ApiResponse> {
        let prepared = self.prepare(request, request_id)?;
        let mut attempt = Attempt::First;
        let mut renewed_token: Option<String> = None;

        loop {
            let persisted = self
                .inner
                .store
                .get()
                .map_err(|err| ClientError::store(&err))?
                .map(|pair| pair.access_token);

            let bearer = match (&renewed_token, prepared.caller_authorization) {
                (Some(token), _) => Some(token.as_str()),
                (None, false) => persisted.as_deref(),
                (None, true) => None,
            };

            let response = self.dispatch(&prepared, bearer, attempt).await?;

            if response.status.is_success() {
                return Ok(ApiResponse {
                    status: response.status,
                    headers: response.headers,
                    body: response.body,
                });
            }

            if response.status == StatusCode::UNAUTHORIZED && attempt.may_renew() {
                let pair = self.renew(persisted.as_deref()).await?;
                renewed_token = Some(pair.access_token);
                attempt = Attempt::Retry;
                continue;
            }

            return Err(ClientError::Http {
                status: response.status.as_u16(),
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }
    }

    fn prepare(&self, request: ApiRequest, request_id: &str) -> ClientResult<Prepared> {
        let mut headers = self.inner.default_headers.clone();
        let mut caller_authorization = false;
        for (name, value) in &request.headers {
            let (name, value) = parse_header(name, value)?;
            caller_authorization |= name == AUTHORIZATION;
            headers.insert(name, value);
        }
        if !headers.contains_key(REQUEST_ID_HEADER) {
            let value = HeaderValue::from_str(request_id)
                .map_err(|err| ClientError::InvalidRequest(err.to_string()))?;
            headers.insert(REQUEST_ID_HEADER, value);
        }

        Ok(Prepared {
            caller_authorization,
            method: request.method,
            url: self.endpoint(&request.path),
            headers,
            body: request.body,
        })
    }

    async fn dispatch(
        &self,
        prepared: &Prepared,
        bearer: Option<&str>,
        attempt: Attempt,
    ) -> ClientResult<Dispatched> {
        let mut headers = prepared.headers.clone();
        if let Some(token) = bearer {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|err| ClientError::InvalidRequest(format!("invalid token: {err}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = self
            .inner
            .http
            .request(prepared.method.clone(), &prepared.url)
            .headers(headers);
        if let Some(body) = &prepared.body {
            builder = builder.json(body);
        }

        tracing::debug!(?attempt, authorized = bearer.is_some(), "dispatching");
        let response = builder.send().await.map_err(|err| {
            tracing::debug!(?attempt, "transport failure: {err}");
            ClientError::transport(&err)
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| ClientError::transport(&err))?;
        tracing::debug!(?attempt, status = status.as_u16(), "response received");

        Ok(Dispatched {
            status,
            headers,
            body,
        })
    }

    /// Obtains a fresh pair after a 401, sharing any renewal already running.
    async fn renew(&self, sent_with: Option<&str>) -> ClientResult<TokenPair> {
        let context = RenewalContext {
            http: self.inner.http.clone(),
            url: self.endpoint(&self.inner.refresh_path),
            default_headers: self.inner.default_headers.clone(),
            store: Arc::clone(&self.inner.store),
            login_route: self.inner.login_route.clone(),
            on_auth_lost: self.inner.on_auth_lost.clone(),
        };

        match self.inner.renewal.join_or_start(sent_with, &context)? {
            Renewal::Ready(pair) => Ok(pair),
            Renewal::Pending { generation, future } => {
                let outcome = future.await;
                self.inner.renewal.finish(generation);
                outcome.map_err(ClientError::RenewalFailed)
            }
        }
    }

    /// Sends a request and decodes the JSON response.
    ///
    /// # Errors
    /// See [`ClientError`].
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    /// POSTs a JSON body and decodes the JSON response.
    ///
    /// # Errors
    /// See [`ClientError`].
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<T> {
        let body = to_value(body)?;
        self.send(ApiRequest::post(path).json(body)).await?.json()
    }

    /// PUTs a JSON body and decodes the JSON response.
    ///
    /// # Errors
    /// See [`ClientError`].
    pub async fn put_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<T> {
        let body = to_value(body)?;
        self.send(ApiRequest::put(path).json(body)).await?.json()
    }

    /// Sends a DELETE and discards the body.
    ///
    /// # Errors
    /// See [`ClientError`].
    pub async fn delete(&self, path: &str) -> ClientResult<()> {
        self.send(ApiRequest::delete(path)).await?;
        Ok(())
    }
}

/// Builder for [`AuthClient`].
pub struct AuthClientBuilder {
    base_url: String,
    default_headers: Vec<(String, String)>,
    store: Option<Arc<dyn TokenStore>>,
    refresh_path: String,
    login_route: String,
    timeout: Option<Duration>,
    on_auth_lost: Option<AuthLostHandler>,
}

impl AuthClientBuilder {
    fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim().to_string(),
            default_headers: Vec::new(),
            store: None,
            refresh_path: Config::DEFAULT_REFRESH_PATH.to_string(),
            login_route: Config::DEFAULT_LOGIN_ROUTE.to_string(),
            timeout: None,
            on_auth_lost: None,
        }
    }

    /// Builder preloaded with the configured URL, headers, paths and timeout.
    ///
    /// # Errors
    /// Returns `ClientError::InvalidRequest` if the base URL does not resolve.
    pub fn from_config(config: &Config) -> ClientResult<Self> {
        let base_url = config
            .resolved_base_url()
            .map_err(|err| ClientError::InvalidRequest(format!("{err:#}")))?;
        let mut builder = Self::new(&base_url)
            .default_headers(&config.headers)
            .refresh_path(&config.refresh_path)
            .login_route(&config.login_route);
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(builder)
    }

    /// Replaces the base URL, e.g. with a command line override.
    #[must_use]
    pub fn base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim().to_string();
        self
    }

    #[must_use]
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn default_headers(mut self, headers: &BTreeMap<String, String>) -> Self {
        self.default_headers
            .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Token store; defaults to the token file under `HRDESK_HOME`.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Uses an in-memory store seeded with `pair`.
    #[must_use]
    pub fn tokens(self, pair: TokenPair) -> Self {
        self.store(Arc::new(MemoryTokenStore::with_pair(pair)))
    }

    #[must_use]
    pub fn refresh_path(mut self, path: &str) -> Self {
        self.refresh_path = path.to_string();
        self
    }

    #[must_use]
    pub fn login_route(mut self, route: &str) -> Self {
        self.login_route = route.to_string();
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Registers the subscriber notified when renewal fails and the tokens
    /// are cleared.
    #[must_use]
    pub fn on_auth_lost<F>(mut self, handler: F) -> Self
    where
        F: Fn(&AuthLost) + Send + Sync + 'static,
    {
        self.on_auth_lost = Some(Arc::new(handler));
        self
    }

    /// # Errors
    /// Returns `ClientError::InvalidRequest` for a malformed URL or header,
    /// or if the HTTP client cannot be constructed.
    pub fn build(self) -> ClientResult<AuthClient> {
        url::Url::parse(&self.base_url).map_err(|err| {
            ClientError::InvalidRequest(format!("invalid base URL {}: {err}", self.base_url))
        })?;

        let mut default_headers = HeaderMap::new();
        for (name, value) in &self.default_headers {
            let (name, value) = parse_header(name, value)?;
            default_headers.insert(name, value);
        }

        let mut http = reqwest::Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = self.timeout {
            http = http.timeout(timeout);
        }
        let http = http
            .build()
            .map_err(|err| ClientError::InvalidRequest(format!("failed to build client: {err}")))?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(FileTokenStore::new()));

        Ok(AuthClient {
            inner: Arc::new(Inner {
                http,
                base_url: self.base_url.trim_end_matches('/').to_string(),
                default_headers,
                store,
                refresh_path: self.refresh_path,
                login_route: self.login_route,
                on_auth_lost: self.on_auth_lost,
                renewal: RenewalSlot::default(),
            }),
        })
    }
}

fn parse_header(name: &str, value: &str) -> ClientResult<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|err| ClientError::InvalidRequest(format!("invalid header name {name}: {err}")))?;
    let header_value = HeaderValue::from_str(value.trim())
        .map_err(|err| ClientError::InvalidRequest(format!("invalid value for {name}: {err}")))?;
    Ok((header_name, header_value))
}

fn to_value<B: Serialize>(body: &B) -> ClientResult<Value> {
    serde_json::to_value(body).map_err(|err| ClientError::InvalidRequest(err.to_string()))
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
