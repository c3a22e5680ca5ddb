//! LLM 层：决策接口抽象（强制单个工具调用）、OpenAI 兼容实现、重试包装、Mock、嵌入

pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

pub use embedding::{EmbeddingProvider, OpenAiEmbedder};
pub use mock::ScriptedLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{
    FunctionCall, LlmClient, LlmError, RetryConfig, RetryingLlmClient, ToolDefinition,
};
