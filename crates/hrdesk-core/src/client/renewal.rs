//! Access-token renewal.
//!
//! Renewal is single-flight: the first request that sees a 401 starts it,
//! every other 401 received while it runs awaits the same shared future.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use super::error::{ClientError, ClientResult, RenewalError, RenewalErrorKind};
use crate::auth::store::{TokenPair, TokenStore};

/// Request body of the renewal endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub jwt_token: &'a str,
    pub refresh_token: &'a str,
}

/// Response body of the renewal endpoint.
///
/// `newJwtToken`/`newRefreshToken` is the wire contract; the unprefixed
/// names are accepted because some server builds answer with those.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    #[serde(alias = "jwtToken")]
    pub new_jwt_token: String,
    #[serde(alias = "refreshToken")]
    pub new_refresh_token: String,
}

impl From<RefreshResponse> for TokenPair {
    fn from(response: RefreshResponse) -> Self {
        TokenPair::new(response.new_jwt_token, response.new_refresh_token)
    }
}

/// Emitted once per failed renewal, after the tokens are cleared.
#[derive(Debug, Clone)]
pub struct AuthLost {
    /// Client-side route the host should navigate to
    pub login_route: String,
    pub error: RenewalError,
}

pub(crate) type AuthLostHandler = Arc<dyn Fn(&AuthLost) + Send + Sync>;

pub(crate) type RenewalFuture = Shared<BoxFuture<'static, Result<TokenPair, RenewalError>>>;

/// Everything one renewal call needs, detached from the client so the
/// shared future does not keep the client alive.
#[derive(Clone)]
pub(crate) struct RenewalContext {
    pub http: reqwest::Client,
    pub url: String,
    pub default_headers: HeaderMap,
    pub store: Arc<dyn TokenStore>,
    pub login_route: String,
    pub on_auth_lost: Option<AuthLostHandler>,
}

impl RenewalContext {
    /// Renews the stored pair. On failure clears the store and notifies the
    /// auth-lost handler before returning the error.
    pub async fn run(self) -> Result<TokenPair, RenewalError> {
        match self.exchange().await {
            Ok(pair) => {
                tracing::info!("access token renewed");
                Ok(pair)
            }
            Err(err) => {
                tracing::warn!(kind = %err.kind, "token renewal failed: {err}");
                if let Err(clear_err) = self.store.clear() {
                    tracing::warn!("failed to clear tokens after renewal failure: {clear_err:#}");
                }
                let event = AuthLost {
                    login_route: self.login_route.clone(),
                    error: err.clone(),
                };
                if let Some(handler) = &self.on_auth_lost {
                    handler(&event);
                }
                Err(err)
            }
        }
    }

    async fn exchange(&self) -> Result<TokenPair, RenewalError> {
        let current = self
            .store
            .get()
            .map_err(|err| RenewalError::store(&err))?
            .ok_or_else(RenewalError::missing_credentials)?;

        let body = RefreshRequest {
            jwt_token: &current.access_token,
            refresh_token: &current.refresh_token,
        };

        let mut headers = self.default_headers.clone();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", current.access_token))
            .map_err(|err| {
                let mut error = RenewalError::new(
                    RenewalErrorKind::Store,
                    "stored access token is not a valid header value",
                );
                error.details = Some(err.to_string());
                error
            })?;
        // insert replaces any configured default Authorization
        headers.insert(AUTHORIZATION, bearer);

        let response = self
            .http
            .post(&self.url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|err| RenewalError::transport(&err))?;

        let status = response.status();
        if !status.is_success() {
            let error = match response.text().await {
                Ok(body) => RenewalError::http_status(status.as_u16(), &body),
                Err(err) => {
                    let mut error = RenewalError::http_status(status.as_u16(), "");
                    error.details = Some(format!("failed to read response body: {err}"));
                    error
                }
            };
            return Err(error);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| RenewalError::transport(&err))?;
        let renewed: RefreshResponse = serde_json::from_slice(&bytes).map_err(|err| {
            let mut error = RenewalError::new(
                RenewalErrorKind::Parse,
                "token renewal response is missing the token pair",
            );
            error.details = Some(err.to_string());
            error
        })?;

        let pair = TokenPair::from(renewed);
        self.store.set(&pair).map_err(|err| RenewalError::store(&err))?;
        Ok(pair)
    }
}

/// Outcome of asking the slot for a renewal.
pub(crate) enum Renewal {
    /// The store already holds a newer pair than the request was sent with.
    Ready(TokenPair),
    /// Await this future, then call [`RenewalSlot::finish`] with the generation.
    Pending {
        generation: u64,
        future: RenewalFuture,
    },
}

#[derive(Default)]
struct SlotState {
    generation: u64,
    in_flight: Option<(u64, RenewalFuture)>,
}

/// Holds at most one in-flight renewal.
#[derive(Default)]
pub(crate) struct RenewalSlot {
    state: Mutex<SlotState>,
}

impl RenewalSlot {
    /// Joins the running renewal, reuses a pair another request already
    /// obtained, or starts a new renewal.
    ///
    /// `sent_with` is the access token that was persisted when the 401'd
    /// request went out.
    pub fn join_or_start(
        &self,
        sent_with: Option<&str>,
        context: &RenewalContext,
    ) -> ClientResult<Renewal> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some((generation, future)) = &state.in_flight
            && future.peek().is_none()
        {
            tracing::debug!(generation, "joining in-flight token renewal");
            return Ok(Renewal::Pending {
                generation: *generation,
                future: future.clone(),
            });
        }
        // Either empty or a finished renewal whose waiters all went away.
        state.in_flight = None;

        // The store is checked under the lock: a renewal writes the new pair
        // before its slot is released, so either the slot or the store shows it.
        if let Some(current) = context.store.get().map_err(|err| ClientError::store(&err))?
            && sent_with != Some(current.access_token.as_str())
        {
            tracing::debug!("token pair already renewed by another request");
            return Ok(Renewal::Ready(current));
        }

        state.generation += 1;
        let generation = state.generation;
        let future = context.clone().run().boxed().shared();
        state.in_flight = Some((generation, future.clone()));
        tracing::debug!(generation, "starting token renewal");

        Ok(Renewal::Pending { generation, future })
    }

    /// Releases the slot if it still holds the given renewal.
    pub fn finish(&self, generation: u64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(&state.in_flight, Some((current, _)) if *current == generation) {
            state.in_flight = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_request_uses_wire_field_names() {
        let body = RefreshRequest {
            jwt_token: "old",
            refresh_token: "r1",
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"jwtToken": "old", "refreshToken": "r1"})
        );
    }

    #[test]
    fn test_refresh_response_accepts_canonical_and_alias_names() {
        let canonical: RefreshResponse =
            serde_json::from_str(r#"{"newJwtToken":"a","newRefreshToken":"b"}"#).unwrap();
        assert_eq!(TokenPair::from(canonical), TokenPair::new("a", "b"));

        let aliased: RefreshResponse =
            serde_json::from_str(r#"{"jwtToken":"c","refreshToken":"d","expires":"x"}"#).unwrap();
        assert_eq!(TokenPair::from(aliased), TokenPair::new("c", "d"));
    }

    #[test]
    fn test_refresh_response_without_tokens_is_rejected() {
        assert!(serde_json::from_str::<RefreshResponse>(r#"{"newJwtToken":"a"}"#).is_err());
    }
}
