//! 工具测试共用的替身

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::memory::{Document, MetadataFilter, VectorStore, VectorStoreError};
use crate::tools::{
    FinalAnswerTool, RagSearchFilterTool, RagSearchTool, Tool, ToolKind, ToolOutput, ToolRegistry,
};

/// 固定返回结果并记录调用参数的向量库
pub(crate) struct FixedStore {
    pub result: Result<Vec<Document>, String>,
    pub seen: Mutex<Vec<(String, usize, Option<MetadataFilter>)>>,
}

impl FixedStore {
    pub fn ok(docs: Vec<Document>) -> Self {
        Self {
            result: Ok(docs),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(msg: &str) -> Self {
        Self {
            result: Err(msg.to_string()),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VectorStore for FixedStore {
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Document>, VectorStoreError> {
        self.seen
            .lock()
            .unwrap()
            .push((query.to_string(), k, filter.cloned()));
        match &self.result {
            Ok(docs) => Ok(docs.clone()),
            Err(m) => Err(VectorStoreError::Http(m.clone())),
        }
    }

    fn backend(&self) -> &str {
        "fixed"
    }
}

/// 固定返回「没有结果」的工具，替代需要网络的工具
pub(crate) struct StubTool(pub ToolKind);

#[async_trait]
impl Tool for StubTool {
    fn kind(&self) -> ToolKind {
        self.0
    }

    fn description(&self) -> &str {
        "stub"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, args: Value) -> ToolOutput {
        ToolOutput::empty(self.0, args, "stub: nothing found")
    }
}

/// 两个 RAG 工具接 store，arXiv / web 用 StubTool，final_answer 用真实实现
pub(crate) fn stub_registry(store: Arc<dyn VectorStore>) -> ToolRegistry {
    ToolRegistry::new(
        Arc::new(RagSearchTool::new(store.clone(), 5, "arxiv_id")),
        Arc::new(RagSearchFilterTool::new(store, 5, "arxiv_id")),
        Arc::new(StubTool(ToolKind::FetchArxiv)),
        Arc::new(StubTool(ToolKind::WebSearch)),
        Arc::new(FinalAnswerTool::new()),
    )
}
