//! Gmail-backed one-time code source.
//!
//! Polls the Gmail REST API for messages whose subject matches and pulls a
//! numeric code out of the snippet or the text body. Patterns are tried in
//! order: a 4-8 digit run after a code keyword, then any six-digit run, then
//! any 4-8 digit run.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use action_flow::{CodeError, CodeSource};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::MailConfig;

static CODE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(?:code|kod|otp|pin|passcode|c[oó]digo)\b[^0-9]{0,20}?\b(\d{4,8})\b",
        r"\b(\d{6})\b",
        r"\b(\d{4,8})\b",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("valid regex"))
    .collect()
});

/// Messages older than this, relative to the start of polling, are ignored.
const FRESHNESS_WINDOW_MS: u64 = 10 * 60 * 1_000;
const MAX_RESULTS: u32 = 5;
const MIN_POLL_MS: u64 = 1_000;

#[derive(Debug, Deserialize)]
struct MessageList {
    messages: Option<Vec<MessageRef>>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetails {
    id: String,
    internal_date: Option<String>,
    snippet: Option<String>,
    payload: Option<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    mime_type: Option<String>,
    body: Option<Body>,
    parts: Option<Vec<Part>>,
}

#[derive(Debug, Deserialize)]
struct Body {
    data: Option<String>,
}

pub struct GmailCodeSource {
    client: Client,
    base_url: String,
    token: String,
    query_suffix: String,
}

impl GmailCodeSource {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        query_suffix: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            query_suffix: query_suffix.into(),
        }
    }

    /// `None` when no access token is available.
    pub fn from_config(mail: &MailConfig) -> Option<Self> {
        let token = mail.token()?;
        Some(Self::new(&mail.base_url, token, &mail.query_suffix))
    }

    fn query(&self, subject: &str) -> String {
        let subject = subject.replace('"', "");
        format!("subject:\"{}\" {}", subject.trim(), self.query_suffix)
            .trim()
            .to_string()
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, CodeError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|err| CodeError::Request(err.to_string()))?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(CodeError::Unavailable(format!(
                    "gmail rejected the access token ({})",
                    response.status()
                )))
            }
            status if !status.is_success() => {
                return Err(CodeError::Request(format!("gmail returned {status}")))
            }
            _ => {}
        }
        response
            .json()
            .await
            .map_err(|err| CodeError::Request(err.to_string()))
    }

    /// Newest fresh code among the matching messages, if any.
    async fn latest_code(&self, subject: &str, not_before_ms: u64) -> Result<Option<String>, CodeError> {
        let list: MessageList = self
            .get_json(
                &format!("{}/messages", self.base_url),
                &[
                    ("q", self.query(subject)),
                    ("maxResults", MAX_RESULTS.to_string()),
                ],
            )
            .await?;

        for message in list.messages.unwrap_or_default() {
            let details: MessageDetails = self
                .get_json(
                    &format!("{}/messages/{}", self.base_url, message.id),
                    &[("format", "full".to_string())],
                )
                .await?;
            let received = details
                .internal_date
                .as_deref()
                .and_then(|raw| raw.parse::<u64>().ok())
                .unwrap_or(0);
            if received < not_before_ms {
                debug!(id = %details.id, "skipping stale message");
                continue;
            }
            if let Some(code) = message_code(&details) {
                debug!(id = %details.id, "code found");
                return Ok(Some(code));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl CodeSource for GmailCodeSource {
    async fn poll_for_code(
        &self,
        subject: &str,
        timeout_ms: u64,
        poll_ms: u64,
    ) -> Result<String, CodeError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let interval = Duration::from_millis(poll_ms.max(MIN_POLL_MS));
        let not_before = now_ms().saturating_sub(FRESHNESS_WINDOW_MS);
        info!(subject, timeout_ms, "polling gmail for code");

        loop {
            match self.latest_code(subject, not_before).await {
                Ok(Some(code)) => return Ok(code),
                Ok(None) => {}
                Err(err @ CodeError::Unavailable(_)) => return Err(err),
                Err(err) => warn!(%err, "gmail poll failed; retrying"),
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CodeError::NotFound);
            }
            sleep(interval.min(deadline - now)).await;
        }
    }
}

/// Code from the first pattern that matches `text`.
pub fn extract_code(text: &str) -> Option<String> {
    CODE_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(text))
        .map(|caps| caps[1].to_string())
}

fn message_code(details: &MessageDetails) -> Option<String> {
    if let Some(code) = details.snippet.as_deref().and_then(extract_code) {
        return Some(code);
    }
    let mut texts = Vec::new();
    if let Some(payload) = &details.payload {
        collect_text(payload, &mut texts);
    }
    texts.iter().find_map(|text| extract_code(text))
}

fn collect_text(part: &Part, out: &mut Vec<String>) {
    let is_text = part
        .mime_type
        .as_deref()
        .map(|mime| mime.starts_with("text/"))
        .unwrap_or(false);
    if is_text {
        if let Some(text) = part
            .body
            .as_ref()
            .and_then(|body| body.data.as_deref())
            .and_then(decode_body)
        {
            out.push(text);
        }
    }
    for child in part.parts.iter().flatten() {
        collect_text(child, out);
    }
}

fn decode_body(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
