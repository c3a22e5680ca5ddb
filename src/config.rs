//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SCHOLAR__*` 覆盖（双下划线表示嵌套，如
//! `SCHOLAR__VECTOR_STORE__BACKEND=memory`）。凭证只从环境变量读取，见 Credentials。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::AgentError;
use crate::llm::RetryConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub embedding: EmbeddingSection,
    pub vector_store: VectorStoreSection,
    pub tools: ToolsSection,
    pub orchestrator: OrchestratorSection,
}

/// [app] 段：应用名、对话轮数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 对话历史保留轮数
    pub max_context_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "scholar".to_string(),
            max_context_turns: 20,
        }
    }
}

/// [llm] 段：决策模型、端点与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            base_url: None,
            temperature: 0.0,
            timeout_secs: 60,
            retry: RetryConfig::default(),
        }
    }
}

/// [embedding] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    pub model: String,
    pub base_url: Option<String>,
    /// 向量维度；启动时与 Pinecone 索引维度比对，0 表示不校验
    pub dimension: usize,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            base_url: None,
            dimension: 1536,
        }
    }
}

/// 向量库后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Pinecone,
    Memory,
}

/// [vector_store] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VectorStoreSection {
    pub backend: VectorBackend,
    /// 论文 ID 所在的元数据键（rag_search_filter 按它过滤）
    pub id_field: String,
    pub pinecone: PineconeSection,
    pub memory: MemoryStoreSection,
}

impl Default for VectorStoreSection {
    fn default() -> Self {
        Self {
            backend: VectorBackend::Pinecone,
            id_field: "arxiv_id".to_string(),
            pinecone: PineconeSection::default(),
            memory: MemoryStoreSection::default(),
        }
    }
}

/// [vector_store.pinecone] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PineconeSection {
    /// 索引数据面地址
    pub host: Option<String>,
    pub namespace: Option<String>,
    pub timeout_secs: u64,
    /// 启动时探测索引（可达性与维度）
    pub verify_on_startup: bool,
}

impl Default for PineconeSection {
    fn default() -> Self {
        Self {
            host: None,
            namespace: None,
            timeout_secs: 15,
            verify_on_startup: true,
        }
    }
}

/// [vector_store.memory] 段：离线使用的内存向量库
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryStoreSection {
    /// JSON 语料文件（CorpusPaper 数组）
    pub corpus_path: Option<PathBuf>,
    pub max_entries: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for MemoryStoreSection {
    fn default() -> Self {
        Self {
            corpus_path: None,
            max_entries: 50_000,
            chunk_size: 1000,
            chunk_overlap: 100,
        }
    }
}

/// [tools] 段：单次工具调用超时与各工具参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub timeout_secs: u64,
    pub rag: RagSection,
    pub arxiv: ArxivSection,
    pub web_search: WebSearchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            rag: RagSection::default(),
            arxiv: ArxivSection::default(),
            web_search: WebSearchSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RagSection {
    pub top_k: usize,
}

impl Default for RagSection {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArxivSection {
    pub api_url: String,
    pub max_results: usize,
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for ArxivSection {
    fn default() -> Self {
        Self {
            api_url: crate::tools::fetch_arxiv::ARXIV_API_URL.to_string(),
            max_results: 10,
            timeout_secs: 10,
            retry: RetryConfig::new(3, 2_000, 8_000),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSearchSection {
    pub num_results: usize,
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for WebSearchSection {
    fn default() -> Self {
        Self {
            num_results: 5,
            timeout_secs: 15,
            retry: RetryConfig::new(2, 1_000, 4_000),
        }
    }
}

/// [orchestrator] 段：Guard 阈值与 Oracle prompt
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// 递归 Guard 阈值
    pub max_steps: usize,
    /// 过度使用 Guard 阈值
    pub max_tool_uses: usize,
    pub scratchpad_entry_max_chars: usize,
    /// 把检索到的来源并入 final_answer 的 sources
    pub cite_retrieved_sources: bool,
    /// 覆盖默认 Oracle 系统提示词
    pub system_prompt: Option<String>,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_steps: 10,
            max_tool_uses: 2,
            scratchpad_entry_max_chars: 4000,
            cite_retrieved_sources: true,
            system_prompt: None,
        }
    }
}

/// 从环境变量读取的凭证
#[derive(Clone)]
pub struct Credentials {
    pub openai_api_key: String,
    pub pinecone_api_key: Option<String>,
    pub serp_api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("openai_api_key", &"***")
            .field("pinecone_api_key", &self.pinecone_api_key.as_ref().map(|_| "***"))
            .field("serp_api_key", &self.serp_api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl Credentials {
    /// 按后端校验：OPENAI_API_KEY 必需；backend=pinecone 时 PINECONE_API_KEY 必需
    pub fn resolve(
        openai: Option<String>,
        pinecone: Option<String>,
        serp: Option<String>,
        backend: VectorBackend,
    ) -> Result<Self, AgentError> {
        let openai_api_key = non_empty(openai)
            .ok_or_else(|| AgentError::ConfigError("OPENAI_API_KEY is not set".to_string()))?;
        let pinecone_api_key = non_empty(pinecone);
        if backend == VectorBackend::Pinecone && pinecone_api_key.is_none() {
            return Err(AgentError::ConfigError(
                "PINECONE_API_KEY is not set (required by vector_store.backend = \"pinecone\")".to_string(),
            ));
        }
        Ok(Self {
            openai_api_key,
            pinecone_api_key,
            serp_api_key: non_empty(serp),
        })
    }

    pub fn from_env(backend: VectorBackend) -> Result<Self, AgentError> {
        Self::resolve(
            std::env::var("OPENAI_API_KEY").ok(),
            std::env::var("PINECONE_API_KEY").ok(),
            std::env::var("SERP_API_KEY").ok(),
            backend,
        )
    }
}

/// 从 config 目录加载配置，环境变量 SCHOLAR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SCHOLAR__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SCHOLAR")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.orchestrator.max_steps, 10);
        assert_eq!(cfg.orchestrator.max_tool_uses, 2);
        assert!(cfg.orchestrator.cite_retrieved_sources);
        assert_eq!(cfg.vector_store.backend, VectorBackend::Pinecone);
        assert_eq!(cfg.vector_store.id_field, "arxiv_id");
        assert_eq!(cfg.tools.arxiv.max_results, 10);
        assert_eq!(cfg.tools.arxiv.retry.max_attempts, 3);
        assert_eq!(cfg.embedding.dimension, 1536);
    }

    #[test]
    fn test_load_explicit_file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[llm]
model = "gpt-4o-mini"

[llm.retry]
max_attempts = 5

[vector_store]
backend = "memory"

[vector_store.memory]
corpus_path = "data/corpus.json"

[orchestrator]
max_steps = 6
system_prompt = "Be brief."
"#
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
        assert_eq!(cfg.llm.retry.max_attempts, 5);
        assert_eq!(cfg.llm.retry.base_delay_ms, 500);
        assert_eq!(cfg.vector_store.backend, VectorBackend::Memory);
        assert_eq!(
            cfg.vector_store.memory.corpus_path,
            Some(PathBuf::from("data/corpus.json"))
        );
        assert_eq!(cfg.orchestrator.max_steps, 6);
        assert_eq!(cfg.orchestrator.max_tool_uses, 2);
        assert_eq!(cfg.orchestrator.system_prompt.as_deref(), Some("Be brief."));
    }

    #[test]
    fn test_credentials_validation() {
        let err = Credentials::resolve(None, Some("pc".into()), None, VectorBackend::Pinecone).unwrap_err();
        assert!(err.is_startup());
        assert!(err.to_string().contains("OPENAI_API_KEY"));

        let err = Credentials::resolve(Some("sk".into()), Some("  ".into()), None, VectorBackend::Pinecone)
            .unwrap_err();
        assert!(err.to_string().contains("PINECONE_API_KEY"));

        let creds = Credentials::resolve(Some("sk".into()), None, Some("".into()), VectorBackend::Memory).unwrap();
        assert!(creds.pinecone_api_key.is_none());
        assert!(creds.serp_api_key.is_none());
        assert!(!format!("{:?}", creds).contains("sk"));
    }
}
