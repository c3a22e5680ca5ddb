//! 工具注册表
//!
//! 工具集合是封闭的：ToolKind 枚举列出全部五个工具，ToolRegistry 为每个 ToolKind 持有一个实现，
//! 查找是穷尽 match，不存在「运行时查不到」的情况。Oracle 给出的名字在 ToolKind::from_str
//! 处就被校验，未知名字是本轮的致命错误（Oracle 与工具 schema 不一致）。

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::ToolDefinition;
use crate::tools::ToolOutput;

/// 全部工具标识
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    RagSearch,
    RagSearchFilter,
    FetchArxiv,
    WebSearch,
    FinalAnswer,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::RagSearchFilter,
        ToolKind::RagSearch,
        ToolKind::FetchArxiv,
        ToolKind::WebSearch,
        ToolKind::FinalAnswer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::RagSearch => "rag_search",
            ToolKind::RagSearchFilter => "rag_search_filter",
            ToolKind::FetchArxiv => "fetch_arxiv",
            ToolKind::WebSearch => "web_search",
            ToolKind::FinalAnswer => "final_answer",
        }
    }

    /// 执行后进入 terminated 的工具
    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolKind::FinalAnswer)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| s.to_string())
    }
}

/// 工具 trait：描述（供 LLM 理解）、参数 schema、异步执行
///
/// execute 不返回 Result：网络错误、空结果、参数错误都必须折叠进 ToolOutput，
/// 使 Engine 对所有工具一视同仁，失败对下一次 Oracle 决策可见。
#[async_trait]
pub trait Tool: Send + Sync {
    fn kind(&self) -> ToolKind;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema（供 LLM 生成正确的参数格式）
    fn parameters_schema(&self) -> Value;

    /// 执行工具；args 为 LLM 给出的 JSON 对象
    async fn execute(&self, args: Value) -> ToolOutput;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.kind().as_str().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// 封闭的工具注册表：每个 ToolKind 恰好一个实现
#[derive(Clone)]
pub struct ToolRegistry {
    rag_search: Arc<dyn Tool>,
    rag_search_filter: Arc<dyn Tool>,
    fetch_arxiv: Arc<dyn Tool>,
    web_search: Arc<dyn Tool>,
    final_answer: Arc<dyn Tool>,
}

impl ToolRegistry {
    pub fn new(
        rag_search: Arc<dyn Tool>,
        rag_search_filter: Arc<dyn Tool>,
        fetch_arxiv: Arc<dyn Tool>,
        web_search: Arc<dyn Tool>,
        final_answer: Arc<dyn Tool>,
    ) -> Self {
        let registry = Self {
            rag_search,
            rag_search_filter,
            fetch_arxiv,
            web_search,
            final_answer,
        };
        for kind in ToolKind::ALL {
            let actual = registry.get(kind).kind();
            if actual != kind {
                tracing::warn!(slot = %kind, tool = %actual, "tool registered under a different kind");
            }
        }
        registry
    }

    pub fn get(&self, kind: ToolKind) -> &Arc<dyn Tool> {
        match kind {
            ToolKind::RagSearch => &self.rag_search,
            ToolKind::RagSearchFilter => &self.rag_search_filter,
            ToolKind::FetchArxiv => &self.fetch_arxiv,
            ToolKind::WebSearch => &self.web_search,
            ToolKind::FinalAnswer => &self.final_answer,
        }
    }

    pub async fn execute(&self, kind: ToolKind, args: Value) -> ToolOutput {
        self.get(kind).execute(args).await
    }

    /// 全部工具定义（固定顺序），供 Oracle 绑定
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        ToolKind::ALL
            .into_iter()
            .map(|k| self.get(k).definition())
            .collect()
    }

    pub fn definition(&self, kind: ToolKind) -> ToolDefinition {
        self.get(kind).definition()
    }
}
