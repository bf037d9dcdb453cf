//! Auth command handlers.

use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use hrdesk_core::FileTokenStore;
use hrdesk_core::auth::{self, Credentials, SessionStatus};
use hrdesk_core::auth::store::redact;

use super::Target;

pub async fn login(target: &Target<'_>, user: &str, password: Option<&str>) -> Result<()> {
    let user = user.trim();
    if user.is_empty() {
        bail!("User name cannot be empty");
    }

    let password = match password {
        Some(password) => password.to_string(),
        None => read_password()?,
    };
    if password.is_empty() {
        bail!("Password cannot be empty");
    }

    let client = target.client()?;
    let pair = auth::login(
        &client,
        &target.config.login_path,
        &Credentials::new(user, password),
    )
    .await
    .context("login failed")?;

    println!(
        "Logged in as {user} (token: {})",
        redact(&pair.access_token)
    );
    Ok(())
}

fn read_password() -> Result<String> {
    if io::stdin().is_terminal() {
        print!("Password: ");
        io::stdout().flush()?;
    }

    let mut input = String::new();
    io::stdin()
        .lock()
        .read_line(&mut input)
        .context("read password from stdin")?;
    Ok(input.trim_end_matches(['\r', '\n']).to_string())
}

pub fn logout() -> Result<()> {
    if auth::logout(&FileTokenStore::new())? {
        println!("Logged out.");
    } else {
        println!("Not logged in.");
    }
    Ok(())
}

pub fn status() -> Result<()> {
    let session = auth::status(&FileTokenStore::new())?;
    match &session {
        SessionStatus::LoggedOut => println!("Not logged in."),
        SessionStatus::LoggedIn { expires_at: None } => println!("Logged in."),
        SessionStatus::LoggedIn {
            expires_at: Some(expires_at),
        } => {
            if session.is_expired_at(Utc::now()) {
                println!(
                    "Logged in. Access token expired at {} (renewed on next request).",
                    expires_at.to_rfc3339()
                );
            } else {
                println!(
                    "Logged in. Access token expires at {}.",
                    expires_at.to_rfc3339()
                );
            }
        }
    }
    Ok(())
}
