//! Pinecone 向量库（REST）
//!
//! 查询：先用 EmbeddingProvider 编码 query，再 POST {host}/query；正文取自元数据 `text` 字段
//! （入库管线以 LangChain 约定写入）。启动时 verify() 调 /describe_index_stats，
//! 索引不可达或维度不符都视为启动配置错误。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::llm::EmbeddingProvider;
use crate::memory::{Document, MetadataFilter, VectorStore, VectorStoreError};

const API_VERSION: &str = "2024-07";
/// 正文所在的元数据键
const TEXT_KEY: &str = "text";

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    #[serde(default)]
    id: String,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

/// 索引统计（只取校验需要的字段）
#[derive(Debug, Deserialize)]
pub struct IndexStats {
    #[serde(default)]
    pub dimension: usize,
    #[serde(default, rename = "totalVectorCount")]
    pub total_vector_count: u64,
}

pub struct PineconeVectorStore {
    client: Client,
    host: String,
    api_key: String,
    namespace: Option<String>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl PineconeVectorStore {
    /// host 为索引的数据面地址（如 https://research-knowledge-xxxx.svc.us-east-1.pinecone.io）
    pub fn new(
        host: &str,
        api_key: &str,
        namespace: Option<String>,
        embedder: Arc<dyn EmbeddingProvider>,
        timeout_secs: u64,
    ) -> Self {
        let host = host.trim().trim_end_matches('/');
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            host,
            api_key: api_key.to_string(),
            namespace,
            embedder,
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<reqwest::Response, VectorStoreError> {
        let resp = self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorStoreError::Http(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(VectorStoreError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }

    /// 启动探测：索引可达且维度与嵌入模型一致
    pub async fn verify(&self, expected_dimension: usize) -> Result<IndexStats, VectorStoreError> {
        let stats: IndexStats = self
            .post("/describe_index_stats", json!({}))
            .await?
            .json()
            .await
            .map_err(|e| VectorStoreError::Decode(e.to_string()))?;
        if expected_dimension > 0 && stats.dimension != expected_dimension {
            return Err(VectorStoreError::Decode(format!(
                "index dimension {} does not match embedding dimension {}",
                stats.dimension, expected_dimension
            )));
        }
        tracing::info!(
            host = %self.host,
            vectors = stats.total_vector_count,
            dimension = stats.dimension,
            "pinecone index reachable"
        );
        Ok(stats)
    }
}

/// 构造 /query 请求体
fn query_body(
    vector: Vec<f32>,
    k: usize,
    namespace: Option<&str>,
    filter: Option<&MetadataFilter>,
) -> Value {
    let mut body = json!({
        "vector": vector,
        "topK": k,
        "includeMetadata": true,
        "includeValues": false,
    });
    if let Some(ns) = namespace {
        body["namespace"] = json!(ns);
    }
    if let Some(f) = filter {
        let mut cond = Map::new();
        cond.insert(f.field.clone(), json!({ "$eq": f.value }));
        body["filter"] = Value::Object(cond);
    }
    body
}

/// 将 matches 转为 Document；没有正文的 match 被丢弃
fn matches_to_documents(matches: Vec<QueryMatch>) -> Vec<Document> {
    matches
        .into_iter()
        .filter_map(|m| {
            let mut metadata = m.metadata.unwrap_or_default();
            let content = match metadata.remove(TEXT_KEY) {
                Some(Value::String(s)) if !s.trim().is_empty() => s,
                _ => return None,
            };
            if let Some(score) = m.score {
                metadata.insert("score".to_string(), json!(score));
            }
            if !m.id.is_empty() {
                metadata.entry("id".to_string()).or_insert(json!(m.id));
            }
            Some(Document { content, metadata })
        })
        .collect()
}

#[async_trait]
impl VectorStore for PineconeVectorStore {
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Document>, VectorStoreError> {
        let vector = self
            .embedder
            .embed(query)
            .await
            .map_err(VectorStoreError::Embedding)?;
        if vector.is_empty() {
            return Ok(Vec::new());
        }
        let body = query_body(vector, k, self.namespace.as_deref(), filter);
        let resp: QueryResponse = self
            .post("/query", body)
            .await?
            .json()
            .await
            .map_err(|e| VectorStoreError::Decode(e.to_string()))?;
        Ok(matches_to_documents(resp.matches))
    }

    fn backend(&self) -> &str {
        "pinecone"
    }
}
