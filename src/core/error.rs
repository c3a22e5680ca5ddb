//! Agent 错误类型
//!
//! 只有「无法继续本轮」的情况才会成为 AgentError：启动配置错误、Oracle 选了未注册的工具、
//! LLM 重试耗尽等。工具自身的失败永远以 ToolOutput（success=false）的形式回到 Oracle。

use thiserror::Error;

use crate::llm::LlmError;
use crate::memory::VectorStoreError;

/// 编排过程中的致命错误（对当前 turn 或启动阶段而言）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 启动配置错误：缺少凭证、向量索引不可达、维度不匹配等；在任何 turn 之前拒绝启动
    #[error("Config error: {0}")]
    ConfigError(String),

    /// Oracle 选了注册表之外的工具：Oracle 与工具 schema 不一致，不重试
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Oracle error: {0}")]
    Oracle(#[from] LlmError),

    /// final_answer 执行后没有产出报告（工具契约被破坏）
    #[error("final_answer produced no report")]
    MissingReport,

    #[error("Vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),
}

impl AgentError {
    /// 是否属于启动期错误（应在进入交互前终止进程）
    pub fn is_startup(&self) -> bool {
        matches!(self, AgentError::ConfigError(_) | AgentError::VectorStore(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tool_message() {
        let err = AgentError::UnknownTool("summarize_everything".to_string());
        assert_eq!(err.to_string(), "Unknown tool: summarize_everything");
        assert!(!err.is_startup());
    }

    #[test]
    fn test_llm_error_converts() {
        let err: AgentError = LlmError::NoToolCall.into();
        assert!(matches!(err, AgentError::Oracle(LlmError::NoToolCall)));
    }

    #[test]
    fn test_config_error_is_startup() {
        assert!(AgentError::ConfigError("OPENAI_API_KEY".into()).is_startup());
    }
}
