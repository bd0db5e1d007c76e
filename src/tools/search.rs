//! Web 访问：网页抓取与 Brave 搜索
//!
//! 抓取：GET 带超时与 User-Agent，可选域名白名单（为空不限制），HTML 用 html2text 提取可读文本，
//! 超过 max_result_chars 时截断并追加 ...[truncated]。
//! 搜索：Brave Search API，令牌从环境变量读取，返回标题 / URL / 摘要列表。

use std::collections::HashSet;

use html2text::from_read;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::SearchSection;

const BRAVE_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";

/// 一条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: Option<String>,
    pub url: String,
    pub snippet: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    title: Option<String>,
    url: Option<String>,
    description: Option<String>,
}

/// Web 客户端：抓取网页与搜索
#[derive(Debug, Clone)]
pub struct WebClient {
    client: Client,
    allowed_domains: HashSet<String>,
    max_result_chars: usize,
    num_results: usize,
    brave_token_env: String,
}

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("<!")
        || s.to_ascii_lowercase().starts_with("<html")
        || (s.contains('<') && (s.contains("</") || s.contains("<head") || s.contains("<title")))
}

/// 从 URL 中提取 host（去掉端口与路径）
pub fn extract_domain(url: &str) -> Option<String> {
    let url = url.trim();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let host = rest.split('/').next()?.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

impl WebClient {
    pub fn new(cfg: &SearchSection) -> Self {
        const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            allowed_domains: cfg.allowed_domains.iter().map(|d| d.to_lowercase()).collect(),
            max_result_chars: cfg.max_result_chars,
            num_results: cfg.num_results,
            brave_token_env: cfg.brave_token_env.clone(),
        }
    }

    fn check_url(&self, url: &str) -> Result<String, String> {
        let domain = extract_domain(url).ok_or_else(|| format!("Invalid URL: {}", url))?;
        if self.allowed_domains.is_empty() || self.allowed_domains.contains(&domain) {
            Ok(domain)
        } else {
            Err(format!("Domain not in allowlist: {}", domain))
        }
    }

    fn truncate(&self, body: String) -> String {
        if body.chars().count() > self.max_result_chars {
            body.chars().take(self.max_result_chars).collect::<String>() + "\n...[truncated]"
        } else {
            body
        }
    }

    /// 抓取网页并转为可读文本
    pub async fn browse(&self, url: &str, question: &str) -> Result<String, String> {
        self.check_url(url)?;
        tracing::info!(url = %url, question = %question, "browse_website");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp.text().await.map_err(|e| format!("Read body: {}", e))?;
        let body = body.trim_start_matches('\u{FEFF}');
        let text = if looks_like_html(body) {
            match from_read(body.as_bytes(), 120) {
                Ok(t) if !t.trim().is_empty() => t,
                _ => strip_html_tags(body),
            }
        } else {
            body.to_string()
        };
        let text = self.truncate(text);
        if question.trim().is_empty() {
            Ok(format!("Website content of {}:\n{}", url, text))
        } else {
            Ok(format!(
                "Website content of {} (looking for: {}):\n{}",
                url, question, text
            ))
        }
    }

    /// Brave 搜索；令牌缺失时报错
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>, String> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let token = std::env::var(&self.brave_token_env)
            .map_err(|_| format!("{} not set in environment", self.brave_token_env))?;
        tracing::info!(query = %query, "brave search");
        let count = self.num_results.to_string();
        let resp = self
            .client
            .get(BRAVE_ENDPOINT)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", token)
            .query(&[("q", query), ("count", count.as_str())])
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("Brave API error: HTTP {}", resp.status()));
        }
        let data: BraveResponse = resp
            .json()
            .await
            .map_err(|e| format!("Invalid search response: {}", e))?;
        Ok(parse_hits(data))
    }
}

fn parse_hits(data: BraveResponse) -> Vec<SearchHit> {
    data.web
        .map(|w| w.results)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|r| {
            Some(SearchHit {
                url: r.url?,
                title: r.title,
                snippet: r.description,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_domain() {
        assert_eq!(extract_domain("https://Docs.rs/serde"), Some("docs.rs".into()));
        assert_eq!(extract_domain("http://localhost:8080/x"), Some("localhost".into()));
        assert_eq!(extract_domain("ftp://x"), None);
    }

    #[test]
    fn test_allowlist_only_when_configured() {
        let open = WebClient::new(&SearchSection::default());
        assert!(open.check_url("https://example.com/a").is_ok());

        let restricted = WebClient::new(&SearchSection {
            allowed_domains: vec!["docs.rs".into()],
            ..SearchSection::default()
        });
        assert!(restricted.check_url("https://docs.rs/tokio").is_ok());
        assert!(restricted.check_url("https://example.com").is_err());
    }

    #[test]
    fn test_parse_brave_hits_skips_missing_urls() {
        let data: BraveResponse = serde_json::from_str(
            r#"{"web":{"results":[
                {"title":"A","url":"https://a.example","description":"first"},
                {"title":"B"}
            ]}}"#,
        )
        .unwrap();
        let hits = parse_hits(data);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://a.example");
        assert!(parse_hits(serde_json::from_str("{}").unwrap()).is_empty());
    }

    #[test]
    fn test_strip_tags_fallback() {
        assert_eq!(strip_html_tags("<p>Hello <b>world</b></p>"), "Hello world");
        assert!(looks_like_html("<!DOCTYPE html><html></html>"));
        assert!(!looks_like_html("plain text"));
    }
}
