//! Request command handler.

use anyhow::{Context, Result};
use hrdesk_core::{ApiRequest, Method};
use serde_json::Value;

use super::Target;

pub struct RequestOptions<'a> {
    pub target: &'a Target<'a>,
    pub method: &'a str,
    pub path: &'a str,
    pub data: Option<&'a str>,
    pub headers: &'a [String],
}

pub async fn run(opts: RequestOptions<'_>) -> Result<()> {
    let method = Method::from_bytes(opts.method.trim().to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid HTTP method: {}", opts.method))?;

    let mut request = ApiRequest::new(method, opts.path);
    if let Some(data) = opts.data {
        let body: Value = serde_json::from_str(data).context("--data must be valid JSON")?;
        request = request.json(body);
    }
    for raw in opts.headers {
        let (name, value) = parse_header_arg(raw)?;
        request = request.header(name, value);
    }

    let client = opts.target.client()?;
    let response = client
        .send(request)
        .await
        .with_context(|| format!("{} {}", opts.method.to_ascii_uppercase(), opts.path))?;

    let text = response.text();
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) if text.is_empty() => println!("{}", response.status()),
        Err(_) => println!("{text}"),
    }
    Ok(())
}

/// Splits a `Name: value` header argument.
fn parse_header_arg(raw: &str) -> Result<(&str, &str)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("header must look like 'Name: value', got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("header name cannot be empty in '{raw}'");
    }
    Ok((name, value.trim()))
}
