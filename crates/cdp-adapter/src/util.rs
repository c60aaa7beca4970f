use chromiumoxide::async_process::Child;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use tokio::time::{timeout, Duration};
use url::Url;

use crate::error::{AdapterError, AdapterErrorKind};

const WS_URL_TIMEOUT: Duration = Duration::from_secs(20);

/// DevTools websocket URL announced on a Chromium stderr line, if any.
pub fn parse_ws_line(line: &str) -> Option<String> {
    let (_, ws) = line.rsplit_once("listening on ")?;
    let ws = ws.trim();
    (ws.starts_with("ws") && ws.contains("devtools/browser")).then(|| ws.to_string())
}

/// Check a user-supplied DevTools endpoint before dialing it.
pub fn validate_ws_url(raw: &str) -> Result<String, AdapterError> {
    let parsed = Url::parse(raw.trim()).map_err(|err| {
        AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("invalid devtools websocket url: {err}"))
    })?;
    match parsed.scheme() {
        "ws" | "wss" if parsed.host_str().is_some() => Ok(parsed.to_string()),
        scheme => Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("devtools url must be ws:// or wss://, got {scheme}://"))),
    }
}

/// Read Chromium stderr until it announces its DevTools websocket URL.
pub async fn extract_ws_url(child: &mut Child) -> Result<String, AdapterError> {
    let stderr = child.stderr.take().ok_or_else(|| {
        AdapterError::new(AdapterErrorKind::Internal).with_hint("chromium process missing stderr")
    })?;
    let mut lines = BufReader::new(stderr).lines();
    let mut captured = Vec::new();

    let reader = async {
        while let Some(line) = lines.next().await {
            let line = line.map_err(|err| {
                AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string())
            })?;
            if let Some(ws) = parse_ws_line(&line) {
                return Ok(ws);
            }
            captured.push(line);
        }
        Err(AdapterError::new(AdapterErrorKind::CdpIo).with_hint(format!(
            "chromium exited before exposing devtools websocket url. stderr preview: {}",
            captured
                .iter()
                .take(8)
                .cloned()
                .collect::<Vec<_>>()
                .join(" | ")
        )))
    };

    timeout(WS_URL_TIMEOUT, reader).await.map_err(|_| {
        AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint("timed out waiting for chromium devtools websocket url")
            .retriable(true)
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_devtools_url() {
        let line = "DevTools listening on ws://127.0.0.1:9222/devtools/browser/abc";
        assert_eq!(
            parse_ws_line(line).as_deref(),
            Some("ws://127.0.0.1:9222/devtools/browser/abc")
        );
        assert!(parse_ws_line("listening on http://127.0.0.1").is_none());
        assert!(parse_ws_line("[WARNING] GPU process").is_none());
    }

    #[test]
    fn websocket_endpoint_must_be_ws() {
        assert_eq!(
            validate_ws_url(" ws://127.0.0.1:9222/devtools/browser/abc ").unwrap(),
            "ws://127.0.0.1:9222/devtools/browser/abc"
        );
        let err = validate_ws_url("http://127.0.0.1:9222").unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::CdpIo);
        assert!(validate_ws_url("not a url").is_err());
    }
}
