//! LLM 决策接口抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient::call_tool：给定消息与封闭的工具集合，
//! 强制返回且仅返回一个函数调用 {name, arguments}，不允许自由文本。
//! RetryingLlmClient 对瞬时错误（超时、5xx、限流）做有界重试与指数退避。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::memory::Message;

/// 提供给 LLM 的工具定义（function calling 格式）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// 参数 JSON Schema
    pub parameters: Value,
}

/// LLM 返回的单个函数调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Value,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// 决策接口错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("request timed out")]
    Timeout,

    /// 模型没有返回函数调用（违反强制工具调用）
    #[error("model returned no tool call")]
    NoToolCall,

    #[error("malformed tool arguments: {0}")]
    MalformedArguments(String),
}

impl LlmError {
    /// 是否值得重试
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Timeout | LlmError::RateLimited { .. } | LlmError::Http(_) => true,
            LlmError::Api { status, .. } => *status >= 500,
            LlmError::NoToolCall | LlmError::MalformedArguments(_) => false,
        }
    }
}

/// LLM 客户端 trait：强制单个工具调用
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 从 tools 中强制选择一个并给出参数；永远不返回自由文本
    async fn call_tool(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<FunctionCall, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 有界重试与指数退避（LLM 决策与远程工具共用）
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// 第 attempt 次失败（从 1 开始）后的等待时间：base * 2^(attempt-1)，不超过 max
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ms = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(ms.min(self.max_delay_ms))
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// 对瞬时错误重试的 LlmClient 包装
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    retry: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn call_tool(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<FunctionCall, LlmError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.call_tool(messages, tools).await {
                Ok(call) => return Ok(call),
                Err(e) if e.is_transient() && attempt < self.retry.attempts() => {
                    let delay = match &e {
                        LlmError::RateLimited {
                            retry_after_ms: Some(ms),
                        } => Duration::from_millis(*ms).min(Duration::from_millis(self.retry.max_delay_ms)),
                        _ => self.retry.delay_for(attempt),
                    };
                    tracing::warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "llm call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
