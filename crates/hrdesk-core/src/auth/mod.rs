//! Session operations: login, logout and status.

pub mod store;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use self::store::{TokenPair, TokenStore};
use crate::client::{AuthClient, ClientError, ClientResult};

/// Login request body.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub user_name: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_name", &self.user_name)
            .field("password", &"***")
            .finish()
    }
}

/// Login response body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    #[serde(alias = "newJwtToken")]
    jwt_token: String,
    #[serde(alias = "newRefreshToken")]
    refresh_token: String,
}

/// Exchanges credentials for a token pair and persists it.
///
/// Goes straight to the transport: no bearer token is attached and a 401
/// means rejected credentials, so it never triggers renewal.
///
/// # Errors
/// Returns `ClientError::Http` when the server rejects the credentials,
/// `ClientError::Decode` when the response lacks tokens, and
/// `ClientError::TokenStore` when the pair cannot be saved.
pub async fn login(
    client: &AuthClient,
    login_path: &str,
    credentials: &Credentials,
) -> ClientResult<TokenPair> {
    let response = client
        .http()
        .post(client.endpoint(login_path))
        .headers(client.default_headers().clone())
        .json(credentials)
        .send()
        .await
        .map_err(|err| ClientError::transport(&err))?;

    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|err| ClientError::transport(&err))?;
    if !status.is_success() {
        tracing::warn!(status = status.as_u16(), "login rejected");
        return Err(ClientError::Http {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }

    let parsed: LoginResponse =
        serde_json::from_slice(&body).map_err(|err| ClientError::Decode(err.to_string()))?;
    let pair = TokenPair::new(parsed.jwt_token, parsed.refresh_token);
    client
        .store()
        .set(&pair)
        .map_err(|err| ClientError::TokenStore(format!("{err:#}")))?;

    tracing::info!(user = %credentials.user_name, "logged in");
    Ok(pair)
}

/// Clears the stored session. Returns whether one existed.
///
/// # Errors
/// Returns an error if the store cannot be read or cleared.
pub fn logout(store: &dyn TokenStore) -> anyhow::Result<bool> {
    let existed = store.get()?.is_some();
    store.clear()?;
    if existed {
        tracing::info!("logged out");
    }
    Ok(existed)
}

/// Snapshot of the stored session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    LoggedOut,
    LoggedIn {
        /// `exp` claim of the access token, when it is a JWT
        expires_at: Option<DateTime<Utc>>,
    },
}

impl SessionStatus {
    /// True when the access token carries an `exp` in the past.
    ///
    /// An expired access token is still usable: the next request renews it.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self, SessionStatus::LoggedIn { expires_at: Some(exp) } if *exp <= now)
    }
}

/// Reports whether a session is stored and when its access token expires.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub fn status(store: &dyn TokenStore) -> anyhow::Result<SessionStatus> {
    Ok(match store.get()? {
        None => SessionStatus::LoggedOut,
        Some(pair) => SessionStatus::LoggedIn {
            expires_at: jwt_expiry(&pair.access_token),
        },
    })
}

/// Reads the `exp` claim of a JWT without verifying it.
///
/// Returns `None` for opaque (non-JWT) tokens.
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (_header, payload) = (parts.next()?, parts.next()?);
    parts.next()?;

    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    DateTime::from_timestamp(exp, 0)
}
