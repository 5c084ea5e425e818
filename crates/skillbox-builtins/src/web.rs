use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use skillbox_core::{Capability, CapabilitySet, Result, Skill, SkillContext, SkillOutputs};

const DEFAULT_MAX_BYTES: usize = 512 * 1024;

/// Fetches a page and reports its `<title>` and first `<h1>`.
pub struct WebFetchSkill {
    client: reqwest::Client,
}

impl WebFetchSkill {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(20))
            .user_agent(concat!("skillbox/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for WebFetchSkill {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
pub struct WebFetchInput {
    pub url: String,
    /// Body bytes kept for extraction.
    #[serde(default)]
    pub max_bytes: Option<usize>,
}

#[async_trait]
impl Skill for WebFetchSkill {
    type Input = WebFetchInput;

    fn name(&self) -> &str {
        "web_fetch"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::from([Capability::Net])
    }

    async fn run(&self, ctx: &SkillContext, input: WebFetchInput) -> Result<SkillOutputs> {
        if !ctx.network_allowed() {
            return Ok(SkillOutputs::failure("network access is disabled for this invocation"));
        }
        if !(input.url.starts_with("http://") || input.url.starts_with("https://")) {
            return Ok(SkillOutputs::failure(format!(
                "only http(s) URLs are supported, got '{}'",
                input.url
            )));
        }

        info!(trace_id = %ctx.trace_id, url = %input.url, "fetching page");
        let mut response = match self.client.get(&input.url).send().await {
            Ok(r) => r,
            Err(e) => return Ok(SkillOutputs::failure(format!("request failed: {e}"))),
        };
        let status = response.status();
        let final_url = response.url().to_string();
        let limit = input.max_bytes.unwrap_or(DEFAULT_MAX_BYTES);
        let body = match read_capped(&mut response, limit).await {
            Ok(b) => b,
            Err(e) => return Ok(SkillOutputs::failure(format!("failed to read body: {e}"))),
        };
        let body = String::from_utf8_lossy(&body);
        debug!(trace_id = %ctx.trace_id, %status, bytes = body.len(), "page fetched");

        let (title, h1) = extract_headings(&body);
        let out = SkillOutputs {
            ok: status.is_success(),
            message: (!status.is_success()).then(|| format!("HTTP {status}")),
            ..SkillOutputs::success()
        };
        Ok(out
            .with_data("status", status.as_u16())
            .with_data("title", title)
            .with_data("h1", h1)
            .with_artifact("url", final_url))
    }
}

/// Read at most `limit` body bytes; the rest of the stream is never pulled.
async fn read_capped(response: &mut reqwest::Response, limit: usize) -> reqwest::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(limit.min(64 * 1024));
    while body.len() < limit {
        let Some(chunk) = response.chunk().await? else {
            break;
        };
        let room = limit - body.len();
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
    Ok(body)
}

/// Text of the first `<title>` and `<h1>`, inner tags stripped.
pub fn extract_headings(html: &str) -> (Option<String>, Option<String>) {
    (
        first_element_text(html, r"(?is)<title[^>]*>(.*?)</title>"),
        first_element_text(html, r"(?is)<h1[^>]*>(.*?)</h1>"),
    )
}

fn first_element_text(html: &str, pattern: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    let inner = re.captures(html)?.get(1)?.as_str();
    let tags = Regex::new(r"<[^>]*>").ok()?;
    let text = tags.replace_all(inner, " ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title_and_h1() {
        let html = "<html><head><TITLE> Hello\n World </TITLE></head>\
                    <body><h1 class=\"x\">Big <em>news</em></h1><h1>second</h1></body></html>";
        let (title, h1) = extract_headings(html);
        assert_eq!(title.as_deref(), Some("Hello World"));
        assert_eq!(h1.as_deref(), Some("Big news"));
    }

    #[test]
    fn missing_elements() {
        assert_eq!(extract_headings("<p>plain</p>"), (None, None));
        assert_eq!(extract_headings("<title>  </title>").0, None);
    }

    /// Serve one HTTP response with `body` on a local port.
    async fn serve_once(body: String) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(body.as_bytes()).await;
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn body_is_capped_at_max_bytes() {
        use skillbox_core::DynSkill;
        let body = format!("<title>Early</title>{}<h1>Late</h1>", "x".repeat(256 * 1024));
        let url = serve_once(body).await;
        let work = tempfile::tempdir().unwrap();
        let ctx = SkillContext::new("a", work.path(), None);

        let out = WebFetchSkill::new()
            .invoke(&ctx, serde_json::json!({"url": url, "max_bytes": 64}))
            .await;
        assert!(out.ok, "{:?}", out.message);
        let data = out.data.unwrap();
        assert_eq!(data["title"], "Early");
        assert!(data["h1"].is_null());
    }
}
