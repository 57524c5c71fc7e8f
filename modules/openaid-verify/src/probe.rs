//! URL reachability probe and page-text fetch.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::traits::{ProbeOutcome, WebProbe};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Page text is clipped before it reaches the judge.
const MAX_TEXT_BYTES: usize = 24_000;

pub struct HttpProbe {
    http: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebProbe for HttpProbe {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        // HEAD first; some servers reject it, fall back to GET.
        let head = self.http.head(url).timeout(PROBE_TIMEOUT).send().await;

        let response = match head {
            Ok(resp) if resp.status() == reqwest::StatusCode::METHOD_NOT_ALLOWED => {
                self.http.get(url).timeout(PROBE_TIMEOUT).send().await
            }
            other => other,
        };

        match response {
            Ok(resp) => {
                let status = resp.status();
                let final_url = if resp.url().as_str() != url {
                    Some(resp.url().to_string())
                } else {
                    None
                };
                debug!(url, status = status.as_u16(), "Probe complete");
                ProbeOutcome {
                    reachable: status.is_success(),
                    status: Some(status.as_u16()),
                    final_url,
                }
            }
            Err(e) => {
                debug!(url, error = %e, "Probe failed");
                ProbeOutcome {
                    reachable: false,
                    status: None,
                    final_url: None,
                }
            }
        }
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.http.get(url).timeout(FETCH_TIMEOUT).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("fetch failed with status {}", response.status()));
        }
        let html = response.text().await?;
        Ok(html_to_text(&html, MAX_TEXT_BYTES))
    }
}

/// Reduce HTML to whitespace-collapsed text: drop script/style bodies,
/// strip tags, decode the common entities, cap the length.
pub fn html_to_text(html: &str, max_bytes: usize) -> String {
    let without_blocks = strip_element(&strip_element(html, "script"), "style");

    let mut text = String::with_capacity(without_blocks.len() / 2);
    let mut in_tag = false;
    for ch in without_blocks.chars() {
        match ch {
            '<' => {
                in_tag = true;
                // Tag boundaries separate words
                text.push(' ');
            }
            '>' => in_tag = false,
            c if !in_tag => text.push(c),
            _ => {}
        }
    }

    let decoded = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    let collapsed = decoded.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut end = collapsed.len().min(max_bytes);
    while end > 0 && !collapsed.is_char_boundary(end) {
        end -= 1;
    }
    collapsed[..end].to_string()
}

fn strip_element(html: &str, tag: &str) -> String {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let lower = html.to_lowercase();

    let mut out = String::with_capacity(html.len());
    let mut pos = 0;
    while let Some(start) = lower[pos..].find(&open) {
        let start = pos + start;
        out.push_str(&html[pos..start]);
        match lower[start..].find(&close) {
            Some(end) => pos = start + end + close.len(),
            None => {
                // Unclosed element: drop the rest
                return out;
            }
        }
    }
    out.push_str(&html[pos..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_scripts() {
        let html = r#"<html><head><script>var x = "<div>";</script><style>p{color:red}</style></head>
            <body><h1>Harbor Light</h1><p>Emergency&nbsp;shelter &amp; meals</p></body></html>"#;
        let text = html_to_text(html, 1_000);
        assert_eq!(text, "Harbor Light Emergency shelter & meals");
    }

    #[test]
    fn caps_output_length() {
        let html = format!("<p>{}</p>", "word ".repeat(10_000));
        let text = html_to_text(&html, 100);
        assert!(text.len() <= 100);
    }

    #[test]
    fn survives_unclosed_script() {
        let html = "<p>before</p><script>never closed";
        let text = html_to_text(html, 1_000);
        assert_eq!(text, "before");
    }
}
