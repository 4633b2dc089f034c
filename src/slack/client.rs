use crate::archive::config::SlackConfig;
use crate::error::ArchiveError;
use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::RETRY_AFTER;
use serde_json::Value;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("slack-archive/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Thin Slack Web API client. Every call is retried on rate limiting and
/// transport errors; `ok: false` responses surface as `ArchiveError::Api`.
#[derive(Debug, Clone)]
pub struct SlackClient {
    http: Client,
    base_url: String,
    token: String,
    max_retries: u32,
}

pub fn next_cursor(body: &Value) -> Option<String> {
    body.get("response_metadata")
        .and_then(|m| m.get("next_cursor"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(ToOwned::to_owned)
}

fn retry_after(headers: &reqwest::header::HeaderMap, attempt: u32) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(u64::from(attempt) + 1))
}

fn transport_backoff(attempt: u32) -> Duration {
    Duration::from_millis(250 * (u64::from(attempt) + 1))
}

impl SlackClient {
    pub fn new(cfg: &SlackConfig, token: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            max_retries: cfg.max_retries,
        })
    }

    /// Calls `method` and returns the decoded body, whatever its `ok` flag.
    pub fn call_raw(&self, method: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/{method}", self.base_url);

        for attempt in 0..=self.max_retries {
            let sent = self
                .http
                .post(&url)
                .bearer_auth(&self.token)
                .form(params)
                .send();

            let resp = match sent {
                Ok(resp) => resp,
                Err(err) if attempt < self.max_retries => {
                    let delay = transport_backoff(attempt);
                    warn!(method, attempt, ?delay, error = %err, "slack request failed; retrying");
                    thread::sleep(delay);
                    continue;
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("slack api `{method}` request failed"));
                }
            };

            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                let delay = retry_after(resp.headers(), attempt);
                if attempt < self.max_retries {
                    warn!(method, attempt, ?delay, "rate limited by slack; waiting");
                    thread::sleep(delay);
                    continue;
                }
                break;
            }

            let status = resp.status();
            let body: Value = resp
                .json()
                .with_context(|| format!("slack api `{method}` returned an unreadable body ({status})"))?;
            debug!(method, %status, "slack api call");
            return Ok(body);
        }

        Err(ArchiveError::RateLimited {
            method: method.to_string(),
            retries: self.max_retries,
        }
        .into())
    }

    /// Like `call_raw`, but an `ok: false` body is an error.
    pub fn call(&self, method: &str, params: &[(&str, String)]) -> Result<Value> {
        let body = self.call_raw(method, params)?;
        if body.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(body);
        }
        let error = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error")
            .to_string();
        Err(ArchiveError::Api {
            method: method.to_string(),
            error,
        }
        .into())
    }

    /// Follows `response_metadata.next_cursor` and collects `key` from every
    /// page.
    pub fn paginate(
        &self,
        method: &str,
        params: &[(&str, String)],
        key: &str,
    ) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut page_params = params.to_vec();
            if let Some(c) = &cursor {
                page_params.push(("cursor", c.clone()));
            }
            let body = self.call(method, &page_params)?;
            if let Some(items) = body.get(key).and_then(Value::as_array) {
                out.extend(items.iter().cloned());
            }
            cursor = next_cursor(&body);
            if cursor.is_none() {
                return Ok(out);
            }
        }
    }

    /// Fetches a file. Private Slack URLs need the token; avatar CDN URLs
    /// do not.
    pub fn download(&self, url: &str, authenticated: bool) -> Result<Vec<u8>> {
        for attempt in 0..=self.max_retries {
            let mut req = self.http.get(url);
            if authenticated {
                req = req.bearer_auth(&self.token);
            }
            let resp = match req.send() {
                Ok(resp) => resp,
                Err(err) if attempt < self.max_retries => {
                    let delay = transport_backoff(attempt);
                    warn!(url, attempt, ?delay, error = %err, "download failed; retrying");
                    thread::sleep(delay);
                    continue;
                }
                Err(err) => return Err(err).with_context(|| format!("failed to download {url}")),
            };

            if resp.status() == StatusCode::TOO_MANY_REQUESTS && attempt < self.max_retries {
                thread::sleep(retry_after(resp.headers(), attempt));
                continue;
            }
            let resp = resp
                .error_for_status()
                .with_context(|| format!("failed to download {url}"))?;
            let bytes = resp
                .bytes()
                .with_context(|| format!("failed to read body of {url}"))?;
            return Ok(bytes.to_vec());
        }

        anyhow::bail!("download still rate limited after {} retries: {url}", self.max_retries)
    }
}
