//! CLI command handlers.

use std::sync::Arc;

use anyhow::Result;
use hrdesk_core::config::Config;
use hrdesk_core::{AuthClient, AuthClientBuilder, AuthLost, FileTokenStore};

pub mod auth;
pub mod config;
pub mod request;

/// Loaded config plus command line overrides.
pub struct Target<'a> {
    pub config: &'a Config,
    pub base_url: Option<&'a str>,
}

impl Target<'_> {
    /// Client bound to the token file, reporting session loss on stderr.
    pub fn client(&self) -> Result<AuthClient> {
        let mut builder = AuthClientBuilder::from_config(self.config)?
            .store(Arc::new(FileTokenStore::new()))
            .on_auth_lost(report_auth_lost);
        if let Some(base_url) = self.base_url {
            builder = builder.base_url(base_url);
        }
        Ok(builder.build()?)
    }
}

fn report_auth_lost(event: &AuthLost) {
    tracing::debug!(kind = %event.error.kind, "session lost");
    eprintln!(
        "Session expired. Please log in again ({}).",
        event.login_route
    );
}
