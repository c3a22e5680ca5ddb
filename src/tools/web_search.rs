//! web_search：通用网页搜索
//!
//! 配置了 SERP_API_KEY 时先走 SerpAPI（Google 结果），失败后回退到 DuckDuckGo Instant Answer；
//! 没有 key 时直接走 DuckDuckGo。metadata.provider 记录实际给出结果的提供方。
//! 单个提供方内部对超时、连接错误、5xx、429 按 RetryConfig 重试；只有所有提供方都失败时才返回 success=false。

use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::RetryConfig;
use crate::tools::schema::{args_schema, decode_args};
use crate::tools::{ResultItem, Tool, ToolKind, ToolOutput, WebPage};

pub const SERPAPI_URL: &str = "https://serpapi.com/search";
pub const DUCKDUCKGO_URL: &str = "https://api.duckduckgo.com/";
const MAX_NUM_RESULTS: usize = 20;

/// web_search 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct WebSearchArgs {
    /// Web search query.
    pub query: String,
    /// Number of results to return (default 5).
    #[serde(default)]
    pub num_results: Option<usize>,
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
    out
}

/// 片段中可能夹带 <b> 等高亮标签：转为纯文本并压缩空白
fn clean_text(s: &str) -> String {
    let text = if s.contains('<') {
        match from_read(s.as_bytes(), 10_000) {
            Ok(t) if !t.trim().is_empty() => t,
            _ => strip_html_tags(s),
        }
    } else {
        s.to_string()
    };
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn str_field<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or("")
}

/// 解析 SerpAPI 响应（organic_results）
pub fn parse_serpapi(body: &Value, limit: usize) -> Result<Vec<WebPage>, String> {
    if let Some(err) = body.get("error").and_then(Value::as_str) {
        return Err(format!("SerpAPI error: {}", err));
    }
    let pages = body
        .get("organic_results")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let link = str_field(item, "link");
                    if link.is_empty() {
                        return None;
                    }
                    Some(WebPage {
                        title: clean_text(str_field(item, "title")),
                        link: link.to_string(),
                        snippet: clean_text(str_field(item, "snippet")),
                    })
                })
                .take(limit)
                .collect()
        })
        .unwrap_or_default();
    Ok(pages)
}

/// RelatedTopics 可能嵌套一层 {Name, Topics: [...]}，展开后收集
fn collect_topics(topics: &[Value], out: &mut Vec<WebPage>, limit: usize) {
    for topic in topics {
        if out.len() >= limit {
            return;
        }
        if let Some(nested) = topic.get("Topics").and_then(Value::as_array) {
            collect_topics(nested, out, limit);
            continue;
        }
        let link = str_field(topic, "FirstURL");
        let text = clean_text(str_field(topic, "Text"));
        if link.is_empty() || text.is_empty() {
            continue;
        }
        let title = text.split(" - ").next().unwrap_or(&text).to_string();
        out.push(WebPage {
            title,
            link: link.to_string(),
            snippet: text,
        });
    }
}

/// 解析 DuckDuckGo Instant Answer 响应：摘要在前，相关主题随后
pub fn parse_duckduckgo(body: &Value, limit: usize) -> Vec<WebPage> {
    let mut pages = Vec::new();
    let abstract_text = clean_text(str_field(body, "AbstractText"));
    let abstract_url = str_field(body, "AbstractURL");
    if !abstract_text.is_empty() && !abstract_url.is_empty() {
        let heading = str_field(body, "Heading");
        pages.push(WebPage {
            title: if heading.is_empty() {
                str_field(body, "AbstractSource").to_string()
            } else {
                heading.to_string()
            },
            link: abstract_url.to_string(),
            snippet: abstract_text,
        });
    }
    if let Some(topics) = body.get("RelatedTopics").and_then(Value::as_array) {
        collect_topics(topics, &mut pages, limit);
    }
    pages.truncate(limit);
    pages
}

enum Attempt {
    Retry(String),
    Fatal(String),
}

/// 网页搜索
pub struct WebSearchTool {
    client: Client,
    serp_api_key: Option<String>,
    serp_url: String,
    duckduckgo_url: String,
    default_num_results: usize,
    retry: RetryConfig,
}

impl WebSearchTool {
    pub fn new(
        serp_api_key: Option<String>,
        default_num_results: usize,
        timeout_secs: u64,
        retry: RetryConfig,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("scholar/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            serp_api_key: serp_api_key.filter(|k| !k.trim().is_empty()),
            serp_url: SERPAPI_URL.to_string(),
            duckduckgo_url: DUCKDUCKGO_URL.to_string(),
            default_num_results,
            retry,
        }
    }

    /// 覆盖两个提供方的地址（自建代理或测试）
    pub fn with_endpoints(mut self, serp_url: &str, duckduckgo_url: &str) -> Self {
        self.serp_url = serp_url.to_string();
        self.duckduckgo_url = duckduckgo_url.to_string();
        self
    }

    async fn get_once(&self, url: &str, params: &[(&str, &str)]) -> Result<Value, Attempt> {
        let resp = self.client.get(url).query(params).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                Attempt::Retry(format!("Request failed: {}", e))
            } else {
                Attempt::Fatal(format!("Request failed: {}", e))
            }
        })?;
        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(Attempt::Retry(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(Attempt::Fatal(format!("HTTP {}", status)));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| Attempt::Fatal(format!("Invalid JSON: {}", e)))
    }

    async fn get_json(&self, url: &str, params: &[(&str, &str)]) -> Result<Value, String> {
        let attempts = self.retry.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.get_once(url, params).await {
                Ok(body) => return Ok(body),
                Err(Attempt::Retry(e)) if attempt < attempts => {
                    tracing::warn!(attempt, attempts, error = %e, "web search request failed, retrying");
                    tokio::time::sleep(self.retry.delay_for(attempt)).await;
                }
                Err(Attempt::Retry(e)) => return Err(format!("{} (after {} attempts)", e, attempt)),
                Err(Attempt::Fatal(e)) => return Err(e),
            }
        }
    }

    async fn search_serpapi(&self, key: &str, query: &str, num: usize) -> Result<Vec<WebPage>, String> {
        let num_str = num.to_string();
        let body = self
            .get_json(
                &self.serp_url,
                &[("q", query), ("api_key", key), ("num", num_str.as_str()), ("engine", "google")],
            )
            .await?;
        parse_serpapi(&body, num)
    }

    async fn search_duckduckgo(&self, query: &str, num: usize) -> Result<Vec<WebPage>, String> {
        let body = self
            .get_json(
                &self.duckduckgo_url,
                &[("q", query), ("format", "json"), ("no_html", "1"), ("skip_disambig", "1")],
            )
            .await?;
        Ok(parse_duckduckgo(&body, num))
    }

    fn pages_output(&self, query: &str, pages: Vec<WebPage>, metadata: Value) -> ToolOutput {
        if pages.is_empty() {
            ToolOutput::empty(self.kind(), metadata, format!("No web results for '{}'.", query))
        } else {
            ToolOutput::success(
                self.kind(),
                pages.into_iter().map(ResultItem::WebPage).collect(),
                metadata,
            )
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn kind(&self) -> ToolKind {
        ToolKind::WebSearch
    }

    fn description(&self) -> &str {
        "Search the web for general information, news, documentation or context \
         not covered by the research papers. Returns titles, links and snippets."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<WebSearchArgs>()
    }

    async fn execute(&self, args: Value) -> ToolOutput {
        let args: WebSearchArgs = match decode_args(args.clone()) {
            Ok(a) => a,
            Err(e) => return ToolOutput::failure(self.kind(), args, e),
        };
        let query = args.query.trim();
        if query.is_empty() {
            return ToolOutput::failure(self.kind(), json!({"query": ""}), "Missing query");
        }
        let num = args
            .num_results
            .unwrap_or(self.default_num_results)
            .clamp(1, MAX_NUM_RESULTS);
        let mut metadata = json!({"query": query, "num_results": num});
        let mut errors = Vec::new();

        tracing::info!(query = %query, num, serpapi = self.serp_api_key.is_some(), "web_search");
        if let Some(key) = &self.serp_api_key {
            match self.search_serpapi(key, query, num).await {
                Ok(pages) => {
                    metadata["provider"] = json!("serpapi");
                    return self.pages_output(query, pages, metadata);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SerpAPI failed, falling back to DuckDuckGo");
                    metadata["fallback_reason"] = json!(e);
                    errors.push(format!("serpapi: {}", e));
                }
            }
        }

        match self.search_duckduckgo(query, num).await {
            Ok(pages) => {
                metadata["provider"] = json!("duckduckgo");
                self.pages_output(query, pages, metadata)
            }
            Err(e) => {
                errors.push(format!("duckduckgo: {}", e));
                ToolOutput::failure(self.kind(), metadata, errors.join("; "))
            }
        }
    }
}
