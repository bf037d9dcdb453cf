//! Core hrdesk library (config, token storage, authenticated API client).

pub mod auth;
pub mod client;
pub mod config;
pub mod logging;

pub use auth::store::{FileTokenStore, MemoryTokenStore, TokenPair, TokenStore};
pub use client::{
    ApiRequest, ApiResponse, AuthClient, AuthClientBuilder, AuthLost, ClientError, ClientResult,
    RenewalError, RenewalErrorKind,
};
pub use reqwest::Method;
