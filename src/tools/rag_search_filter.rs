//! rag_search_filter：限定在单篇论文（按论文 ID 等值过滤）内的语义检索

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::memory::{MetadataFilter, VectorStore};
use crate::tools::rag_search::{effective_top_k, run_search};
use crate::tools::schema::{args_schema, decode_args};
use crate::tools::{Tool, ToolKind, ToolOutput};

/// rag_search_filter 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RagSearchFilterArgs {
    /// Natural-language search query.
    pub query: String,
    /// arXiv identifier of the paper to search within, e.g. "2006.11239".
    pub arxiv_id: String,
    /// Number of passages to return (default 6).
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// 去掉 "arXiv:" 前缀与首尾空白
fn normalize_arxiv_id(raw: &str) -> String {
    let id = raw.trim();
    let id = match (id.get(..6), id.get(6..)) {
        (Some(prefix), Some(rest)) if prefix.eq_ignore_ascii_case("arxiv:") => rest,
        _ => id,
    };
    id.trim().to_string()
}

/// 单篇论文内的语义检索
pub struct RagSearchFilterTool {
    store: Arc<dyn VectorStore>,
    default_top_k: usize,
    id_field: String,
}

impl RagSearchFilterTool {
    pub fn new(store: Arc<dyn VectorStore>, default_top_k: usize, id_field: impl Into<String>) -> Self {
        Self {
            store,
            default_top_k,
            id_field: id_field.into(),
        }
    }
}

#[async_trait]
impl Tool for RagSearchFilterTool {
    fn kind(&self) -> ToolKind {
        ToolKind::RagSearchFilter
    }

    fn description(&self) -> &str {
        "Semantic search restricted to a single paper in the knowledge base, identified by its arXiv ID. \
         Use it when the question or earlier results point at a specific paper."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<RagSearchFilterArgs>()
    }

    async fn execute(&self, args: Value) -> ToolOutput {
        let args: RagSearchFilterArgs = match decode_args(args.clone()) {
            Ok(a) => a,
            Err(e) => return ToolOutput::failure(self.kind(), args, e),
        };
        let query = args.query.trim();
        let arxiv_id = normalize_arxiv_id(&args.arxiv_id);
        if query.is_empty() || arxiv_id.is_empty() {
            return ToolOutput::failure(
                self.kind(),
                json!({"query": query, "arxiv_id": arxiv_id}),
                "Missing query or arxiv_id",
            );
        }
        let top_k = effective_top_k(args.top_k, self.default_top_k);
        let filter = MetadataFilter::eq(self.id_field.clone(), arxiv_id);
        run_search(
            self.kind(),
            self.store.as_ref(),
            query,
            top_k,
            Some(&filter),
            &self.id_field,
        )
        .await
    }
}
