//! rag_search：在整个已入库语料上做语义检索
//!
//! 向量库通过构造函数注入；检索失败折叠为 success=false，没有命中折叠为一条 Notice。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::memory::{MetadataFilter, VectorStore};
use crate::tools::schema::{args_schema, decode_args};
use crate::tools::{Passage, ResultItem, Tool, ToolKind, ToolOutput};

/// 单次检索允许的最大条数
pub const MAX_TOP_K: usize = 20;

/// rag_search 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RagSearchArgs {
    /// Natural-language search query.
    pub query: String,
    /// Number of passages to return (default 5).
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// 两个 RAG 工具共用的检索流程
pub(crate) async fn run_search(
    tool: ToolKind,
    store: &dyn VectorStore,
    query: &str,
    top_k: usize,
    filter: Option<&MetadataFilter>,
    id_field: &str,
) -> ToolOutput {
    let mut metadata = json!({
        "query": query,
        "top_k": top_k,
        "backend": store.backend(),
    });
    if let Some(f) = filter {
        metadata["filter"] = json!({ "field": f.field, "value": f.value });
    }

    match store.similarity_search(query, top_k, filter).await {
        Ok(docs) if docs.is_empty() => {
            let scope = filter
                .map(|f| format!(" for {} = {}", f.field, f.value))
                .unwrap_or_default();
            ToolOutput::empty(
                tool,
                metadata,
                format!("No matching passages in the knowledge base{} for query '{}'.", scope, query),
            )
        }
        Ok(docs) => {
            let results = docs
                .into_iter()
                .map(|d| ResultItem::Passage(Passage::from_document(d, id_field)))
                .collect();
            ToolOutput::success(tool, results, metadata)
        }
        Err(e) => {
            tracing::warn!(tool = %tool, error = %e, "vector search failed");
            ToolOutput::failure(tool, metadata, e.to_string())
        }
    }
}

pub(crate) fn effective_top_k(requested: Option<usize>, default: usize) -> usize {
    requested.unwrap_or(default).clamp(1, MAX_TOP_K)
}

/// 全语料语义检索
pub struct RagSearchTool {
    store: Arc<dyn VectorStore>,
    default_top_k: usize,
    id_field: String,
}

impl RagSearchTool {
    pub fn new(store: Arc<dyn VectorStore>, default_top_k: usize, id_field: impl Into<String>) -> Self {
        Self {
            store,
            default_top_k,
            id_field: id_field.into(),
        }
    }
}

#[async_trait]
impl Tool for RagSearchTool {
    fn kind(&self) -> ToolKind {
        ToolKind::RagSearch
    }

    fn description(&self) -> &str {
        "Semantic search over the whole knowledge base of ingested research papers. \
         Use it for general questions when no specific paper ID is known. Returns passages with title and source."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<RagSearchArgs>()
    }

    async fn execute(&self, args: Value) -> ToolOutput {
        let args: RagSearchArgs = match decode_args(args.clone()) {
            Ok(a) => a,
            Err(e) => return ToolOutput::failure(self.kind(), args, e),
        };
        let query = args.query.trim();
        if query.is_empty() {
            return ToolOutput::failure(self.kind(), json!({"query": ""}), "Missing query");
        }
        let top_k = effective_top_k(args.top_k, self.default_top_k);
        run_search(self.kind(), self.store.as_ref(), query, top_k, None, &self.id_field).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Document;
    use crate::tools::test_support::FixedStore;

    fn chunk(title: &str) -> Document {
        Document::new(format!("content of {}", title))
            .with_metadata("title", title)
            .with_metadata("source", format!("{}.pdf", title))
            .with_metadata("arxiv_id", "2006.11239")
    }

    #[tokio::test]
    async fn test_returns_passages_with_metadata() {
        let store = Arc::new(FixedStore::ok(vec![chunk("A"), chunk("B")]));
        let tool = RagSearchTool::new(store.clone(), 5, "arxiv_id");
        let out = tool.execute(json!({"query": "Explain diffusion models"})).await;
        assert!(out.success);
        assert_eq!(out.results.len(), 2);
        match &out.results[0] {
            ResultItem::Passage(p) => {
                assert_eq!(p.title.as_deref(), Some("A"));
                assert_eq!(p.paper_id.as_deref(), Some("2006.11239"));
            }
            other => panic!("unexpected item {:?}", other),
        }
        assert_eq!(out.metadata["top_k"], 5);
        assert_eq!(store.seen.lock().unwrap()[0].2, None);
    }

    #[tokio::test]
    async fn test_store_failure_becomes_failure_output() {
        let tool = RagSearchTool::new(Arc::new(FixedStore::failing("connection reset")), 5, "arxiv_id");
        let out = tool.execute(json!({"query": "q", "top_k": 3})).await;
        assert!(!out.success);
        assert!(out.results.is_empty());
        assert!(out.error.as_deref().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_no_hits_is_success_with_notice() {
        let tool = RagSearchTool::new(Arc::new(FixedStore::ok(vec![])), 5, "arxiv_id");
        let out = tool.execute(json!({"query": "nothing"})).await;
        assert!(out.success);
        assert_eq!(out.evidence_count(), 0);
        assert!(matches!(out.results[0], ResultItem::Notice { .. }));
    }

    #[tokio::test]
    async fn test_bad_arguments_do_not_escape() {
        let store = Arc::new(FixedStore::ok(vec![chunk("A")]));
        let tool = RagSearchTool::new(store.clone(), 5, "arxiv_id");
        for args in [json!({}), json!({"query": 42}), json!("text"), json!({"query": "   "})] {
            let out = tool.execute(args).await;
            assert!(!out.success);
            assert!(out.error.is_some());
        }
        assert!(store.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_top_k_clamped() {
        assert_eq!(effective_top_k(None, 5), 5);
        assert_eq!(effective_top_k(Some(0), 5), 1);
        assert_eq!(effective_top_k(Some(500), 5), MAX_TOP_K);
    }
}
