//! Headless 运行时
//!
//! create_agent_components 在任何 turn 之前完成启动校验（凭证、向量库可达性与维度、语料载入）并组装
//! LLM / 向量库 / 工具注册表 / Engine；process_question 对单个问题跑一个 turn 并返回报告。
//! 启动期的任何问题都以 AgentError::ConfigError / VectorStore 返回，调用方应拒绝启动。

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::config::{AppConfig, Credentials, VectorBackend};
use crate::core::AgentError;
use crate::decision::{Engine, GuardLimits, Oracle, TurnEvent, TurnOutcome};
use crate::llm::{EmbeddingProvider, LlmClient, OpenAiClient, OpenAiEmbedder, RetryingLlmClient};
use crate::memory::{
    ChunkingConfig, ConversationLog, InMemoryVectorStore, PineconeVectorStore, VectorStore,
};
use crate::tools::{
    FetchArxivTool, FinalAnswerTool, RagSearchFilterTool, RagSearchTool, ToolExecutor, ToolRegistry,
    WebSearchTool,
};

/// 预构建的组件，可跨 turn 复用
pub struct AgentComponents {
    pub engine: Engine,
}

/// 按配置组装五个工具
pub fn build_registry(
    cfg: &AppConfig,
    store: Arc<dyn VectorStore>,
    serp_api_key: Option<String>,
) -> ToolRegistry {
    let id_field = cfg.vector_store.id_field.as_str();
    let top_k = cfg.tools.rag.top_k;
    let arxiv = &cfg.tools.arxiv;
    let web = &cfg.tools.web_search;
    ToolRegistry::new(
        Arc::new(RagSearchTool::new(store.clone(), top_k, id_field)),
        Arc::new(RagSearchFilterTool::new(store, top_k, id_field)),
        Arc::new(FetchArxivTool::new(
            &arxiv.api_url,
            arxiv.max_results,
            arxiv.timeout_secs,
            arxiv.retry.clone(),
        )),
        Arc::new(WebSearchTool::new(
            serp_api_key,
            web.num_results,
            web.timeout_secs,
            web.retry.clone(),
        )),
        Arc::new(FinalAnswerTool::new()),
    )
}

/// 组装 Oracle + Executor + Guard 阈值
pub fn build_engine(cfg: &AppConfig, llm: Arc<dyn LlmClient>, registry: ToolRegistry) -> Engine {
    let orch = &cfg.orchestrator;
    let oracle = Oracle::new(
        llm,
        &registry,
        orch.system_prompt.as_deref(),
        orch.scratchpad_entry_max_chars,
    );
    let limits = GuardLimits {
        max_steps: orch.max_steps,
        max_tool_uses: orch.max_tool_uses,
    };
    Engine::new(
        oracle,
        ToolExecutor::new(registry, cfg.tools.timeout_secs),
        limits,
        orch.cite_retrieved_sources,
    )
}

async fn create_vector_store(
    cfg: &AppConfig,
    creds: &Credentials,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<Arc<dyn VectorStore>, AgentError> {
    let section = &cfg.vector_store;
    match section.backend {
        VectorBackend::Pinecone => {
            let host = section
                .pinecone
                .host
                .as_deref()
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .ok_or_else(|| {
                    AgentError::ConfigError("vector_store.pinecone.host is not set".to_string())
                })?;
            let api_key = creds.pinecone_api_key.as_deref().ok_or_else(|| {
                AgentError::ConfigError("PINECONE_API_KEY is not set".to_string())
            })?;
            let store = PineconeVectorStore::new(
                host,
                api_key,
                section.pinecone.namespace.clone(),
                embedder,
                section.pinecone.timeout_secs,
            );
            if section.pinecone.verify_on_startup {
                store.verify(cfg.embedding.dimension).await?;
            }
            Ok(Arc::new(store))
        }
        VectorBackend::Memory => {
            let mem = &section.memory;
            let store = InMemoryVectorStore::new(embedder, mem.max_entries)
                .with_id_field(section.id_field.clone())
                .with_chunking_config(ChunkingConfig {
                    chunk_size: mem.chunk_size,
                    chunk_overlap: mem.chunk_overlap,
                    ..ChunkingConfig::default()
                });
            match &mem.corpus_path {
                Some(path) => {
                    store.load_corpus(path).await?;
                }
                None => tracing::warn!("memory vector store has no corpus_path; RAG tools will find nothing"),
            }
            Ok(Arc::new(store))
        }
    }
}

/// 启动校验并创建全部组件
pub async fn create_agent_components(cfg: &AppConfig) -> Result<AgentComponents, AgentError> {
    let creds = Credentials::from_env(cfg.vector_store.backend)?;
    if creds.serp_api_key.is_none() {
        tracing::info!("SERP_API_KEY not set, web_search will use DuckDuckGo only");
    }

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OpenAiEmbedder::new(
        cfg.embedding.base_url.as_deref(),
        &cfg.embedding.model,
        &creds.openai_api_key,
    ));
    let store = create_vector_store(cfg, &creds, embedder).await?;

    let client = OpenAiClient::new(
        cfg.llm.base_url.as_deref(),
        &cfg.llm.model,
        &creds.openai_api_key,
        cfg.llm.temperature,
        cfg.llm.timeout_secs,
    );
    tracing::info!(model = %client.model(), backend = %store.backend(), "components ready");
    let llm: Arc<dyn LlmClient> = Arc::new(RetryingLlmClient::new(Arc::new(client), cfg.llm.retry.clone()));

    let registry = build_registry(cfg, store, creds.serp_api_key.clone());
    Ok(AgentComponents {
        engine: build_engine(cfg, llm, registry),
    })
}

/// 处理单个问题：跑一个 turn，返回报告与 trace；对话记录由调用方在成功后追加
pub async fn process_question(
    components: &AgentComponents,
    question: &str,
    conversation: &ConversationLog,
    event_tx: Option<&UnboundedSender<TurnEvent>>,
) -> Result<TurnOutcome, AgentError> {
    components.engine.run_turn(question, conversation, event_tx).await
}
