//! fetch_arxiv：通过 arXiv API 实时检索论文元数据
//!
//! GET {api_url}?search_query=..&start=0&max_results=..，解析 Atom feed。
//! 超时、连接错误、5xx、429 按 RetryConfig 重试；其余 4xx 直接失败。
//! arXiv 以一条 id 含 `/api/errors` 的 entry 报告查询错误，这种情况同样视为失败。

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::RetryConfig;
use crate::tools::schema::{args_schema, decode_args};
use crate::tools::{Paper, ResultItem, Tool, ToolKind, ToolOutput};

pub const ARXIV_API_URL: &str = "http://export.arxiv.org/api/query";
/// 单次检索最多返回的论文数
const MAX_RESULTS_CAP: usize = 50;

/// fetch_arxiv 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct FetchArxivArgs {
    /// arXiv search query, e.g. "diffusion models" or "ti:attention AND cat:cs.CL".
    pub query: String,
    /// Maximum number of papers to return (default 10).
    #[serde(default)]
    pub max_results: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    published: Option<String>,
    #[serde(rename = "author", default)]
    authors: Vec<Author>,
}

#[derive(Debug, Deserialize)]
struct Author {
    #[serde(default)]
    name: String,
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

static ABS_ID_RE: OnceLock<Regex> = OnceLock::new();

/// 从 entry id（http://arxiv.org/abs/2006.11239v2）提取不带版本号的 arXiv ID
pub fn arxiv_id_from_url(url: &str) -> Option<String> {
    let re = ABS_ID_RE.get_or_init(|| Regex::new(r"arxiv\.org/abs/(?P<id>.+?)(?:v\d+)?$").unwrap());
    re.captures(url.trim())
        .and_then(|c| c.name("id"))
        .map(|m| m.as_str().to_string())
}

/// 解析 Atom feed；feed 本身报告错误时返回 Err
pub fn parse_feed(xml: &str) -> Result<Vec<Paper>, String> {
    if xml.trim().is_empty() {
        return Err("Empty response from arXiv".to_string());
    }
    let feed: Feed =
        quick_xml::de::from_str(xml).map_err(|e| format!("Invalid arXiv feed: {}", e))?;

    let mut papers = Vec::with_capacity(feed.entries.len());
    for entry in feed.entries {
        if entry.id.contains("/api/errors") {
            return Err(format!("arXiv API error: {}", collapse_whitespace(&entry.summary)));
        }
        let id_url = entry.id.trim();
        if id_url.is_empty() {
            continue;
        }
        let abs_url = id_url.replacen("http://", "https://", 1);
        papers.push(Paper {
            arxiv_id: arxiv_id_from_url(id_url).unwrap_or_else(|| id_url.to_string()),
            title: collapse_whitespace(&entry.title),
            authors: entry
                .authors
                .into_iter()
                .map(|a| collapse_whitespace(&a.name))
                .filter(|n| !n.is_empty())
                .collect(),
            summary: collapse_whitespace(&entry.summary),
            published: entry.published.map(|p| p.trim().to_string()),
            pdf_url: format!("{}.pdf", id_url.replace("abs", "pdf")),
            abs_url,
        });
    }
    Ok(papers)
}

/// 单次请求的失败：是否值得重试
enum Attempt {
    Retry(String),
    Fatal(String),
}

/// arXiv 元数据检索
pub struct FetchArxivTool {
    client: Client,
    api_url: String,
    default_max_results: usize,
    retry: RetryConfig,
}

impl FetchArxivTool {
    pub fn new(api_url: &str, default_max_results: usize, timeout_secs: u64, retry: RetryConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("scholar/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_url: api_url.to_string(),
            default_max_results,
            retry,
        }
    }

    async fn fetch_once(&self, query: &str, max_results: usize) -> Result<String, Attempt> {
        let max_results = max_results.to_string();
        let resp = self
            .client
            .get(&self.api_url)
            .query(&[
                ("search_query", query),
                ("start", "0"),
                ("max_results", max_results.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
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
        resp.text()
            .await
            .map_err(|e| Attempt::Retry(format!("Read body: {}", e)))
    }

    async fn fetch(&self, query: &str, max_results: usize) -> Result<String, String> {
        let attempts = self.retry.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch_once(query, max_results).await {
                Ok(body) => return Ok(body),
                Err(Attempt::Retry(e)) if attempt < attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(attempt, attempts, error = %e, "arXiv request failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(Attempt::Retry(e)) => {
                    return Err(format!("{} (after {} attempts)", e, attempt));
                }
                Err(Attempt::Fatal(e)) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl Tool for FetchArxivTool {
    fn kind(&self) -> ToolKind {
        ToolKind::FetchArxiv
    }

    fn description(&self) -> &str {
        "Search the live arXiv API for papers. Returns title, authors, abstract, arXiv ID and PDF link. \
         Use it for recent work or papers that may not be in the knowledge base."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<FetchArxivArgs>()
    }

    async fn execute(&self, args: Value) -> ToolOutput {
        let args: FetchArxivArgs = match decode_args(args.clone()) {
            Ok(a) => a,
            Err(e) => return ToolOutput::failure(self.kind(), args, e),
        };
        let query = args.query.trim();
        if query.is_empty() {
            return ToolOutput::failure(self.kind(), json!({"query": ""}), "Missing query");
        }
        let max_results = args
            .max_results
            .unwrap_or(self.default_max_results)
            .clamp(1, MAX_RESULTS_CAP);
        let metadata = json!({"query": query, "max_results": max_results});

        tracing::info!(query = %query, max_results, "fetch_arxiv");
        let body = match self.fetch(query, max_results).await {
            Ok(b) => b,
            Err(e) => return ToolOutput::failure(self.kind(), metadata, e),
        };
        match parse_feed(&body) {
            Ok(papers) if papers.is_empty() => ToolOutput::empty(
                self.kind(),
                metadata,
                format!("arXiv returned no papers for '{}'.", query),
            ),
            Ok(papers) => ToolOutput::success(
                self.kind(),
                papers.into_iter().map(ResultItem::Paper).collect(),
                metadata,
            ),
            Err(e) => ToolOutput::failure(self.kind(), metadata, e),
        }
    }
}
