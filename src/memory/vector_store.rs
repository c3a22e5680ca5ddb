//! 向量检索接口：rag_search / rag_search_filter 通过它查询已入库的论文片段
//!
//! (query_text, k, 可选的元数据等值过滤) -> 有序的 (正文, 元数据) 列表。
//! 元数据至少包含 title、source 与论文 ID（默认字段名 arxiv_id）。
//! 具体实现通过构造函数注入工具，而不是进程级单例。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// 检索返回的一段文档
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 读取字符串类型的元数据字段；空串视为缺失
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn title(&self) -> Option<&str> {
        self.meta_str("title")
    }

    pub fn source(&self) -> Option<&str> {
        self.meta_str("source")
    }
}

/// 元数据等值过滤（如 arxiv_id == "2401.01234"）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataFilter {
    pub field: String,
    pub value: String,
}

impl MetadataFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        match metadata.get(&self.field) {
            Some(Value::String(s)) => s == &self.value,
            Some(other) => other.to_string() == self.value,
            None => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("decode failed: {0}")]
    Decode(String),
}

/// 向量库查询接口
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 相似度检索，结果按相关度从高到低
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Document>, VectorStoreError>;

    /// 后端名称（写入日志与 ToolOutput.metadata）
    fn backend(&self) -> &str;
}
