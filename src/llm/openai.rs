//! OpenAI 兼容 Chat Completions 客户端（function calling）
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）。请求带 tool_choice = required 与
//! parallel_tool_calls = false，强制模型从给定工具中选且只选一个；arguments（JSON 字符串）在这里解析为 Value。
//! 限流与 5xx 由 async_openai 自带的退避重试，超时与连接错误交给外层 RetryingLlmClient。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::{ApiError, OpenAIError};
use async_openai::types::chat::{
    ChatCompletionMessageToolCalls, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionToolChoiceOption,
    ChatCompletionTools, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    CreateChatCompletionResponse, FunctionObjectArgs, ToolChoiceOptions,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{FunctionCall, LlmClient, LlmError, ToolDefinition};
use crate::memory::{Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 async_openai Client、model 与温度
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key: &str,
        temperature: f32,
        timeout_secs: u64,
    ) -> Self {
        let config = if let Some(url) = base_url {
            OpenAIConfig::new()
                .with_api_base(url.trim_end_matches('/'))
                .with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            client: Client::with_config(config).with_http_client(http),
            model: model.to_string(),
            temperature,
            usage: TokenUsage::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        messages
            .iter()
            .map(|m| {
                Ok(match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                    Role::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(m.content.clone())
                            .build()?,
                    ),
                })
            })
            .collect()
    }

    fn to_openai_tools(tools: &[ToolDefinition]) -> Result<Vec<ChatCompletionTools>, OpenAIError> {
        tools
            .iter()
            .map(|t| {
                let function = FunctionObjectArgs::default()
                    .name(t.name.clone())
                    .description(t.description.clone())
                    .parameters(t.parameters.clone())
                    .build()?;
                Ok(ChatCompletionTools::Function(ChatCompletionTool { function }))
            })
            .collect()
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(self.temperature)
            .messages(self.to_openai_messages(messages)?)
            .tools(Self::to_openai_tools(tools)?)
            .tool_choice(ChatCompletionToolChoiceOption::Mode(ToolChoiceOptions::Required))
            .parallel_tool_calls(false)
            .build()
    }
}

/// 由 OpenAI 错误对象的 code / type 推断 HTTP 语义（ApiError 不带状态码）
fn from_api_error(api: ApiError) -> LlmError {
    let kind = api
        .code
        .as_deref()
        .or(api.r#type.as_deref())
        .unwrap_or_default();
    let status = match kind {
        "rate_limit_exceeded" => {
            return LlmError::RateLimited {
                retry_after_ms: None,
            }
        }
        "insufficient_quota" => 429,
        "server_error" | "service_unavailable" => 500,
        "invalid_api_key" | "authentication_error" => 401,
        "model_not_found" => 404,
        _ => 400,
    };
    LlmError::Api {
        status,
        message: api.to_string(),
    }
}

fn from_openai_error(err: OpenAIError) -> LlmError {
    match err {
        OpenAIError::Reqwest(e) if e.is_timeout() => LlmError::Timeout,
        OpenAIError::Reqwest(e) => match e.status().map(|s| s.as_u16()) {
            Some(429) => LlmError::RateLimited {
                retry_after_ms: None,
            },
            Some(408) | Some(504) => LlmError::Timeout,
            Some(status) => LlmError::Api {
                status,
                message: e.to_string(),
            },
            None => LlmError::Http(e.to_string()),
        },
        OpenAIError::ApiError(api) => from_api_error(api),
        OpenAIError::JSONDeserialize(e, _) => LlmError::Http(format!("decode response: {}", e)),
        // 本地构造请求失败，重试无意义
        OpenAIError::InvalidArgument(msg) => LlmError::Api {
            status: 400,
            message: msg,
        },
        other => LlmError::Http(other.to_string()),
    }
}

/// 取第一个函数调用并解析参数
fn extract_call(calls: Vec<ChatCompletionMessageToolCalls>) -> Result<FunctionCall, LlmError> {
    let mut functions: Vec<_> = calls
        .into_iter()
        .filter_map(|c| match c {
            ChatCompletionMessageToolCalls::Function(call) => Some(call.function),
            ChatCompletionMessageToolCalls::Custom(_) => None,
        })
        .collect();
    if functions.len() > 1 {
        tracing::warn!(count = functions.len(), "model returned several tool calls, using the first");
    }
    if functions.is_empty() {
        return Err(LlmError::NoToolCall);
    }
    let function = functions.swap_remove(0);
    let raw = function.arguments.trim();
    let arguments = if raw.is_empty() {
        json!({})
    } else {
        serde_json::from_str::<Value>(raw)
            .map_err(|e| LlmError::MalformedArguments(format!("{}: {}", e, raw)))?
    };
    if !arguments.is_object() {
        return Err(LlmError::MalformedArguments(format!(
            "expected an object, got {}",
            arguments
        )));
    }
    Ok(FunctionCall::new(function.name, arguments))
}

fn first_tool_calls(response: CreateChatCompletionResponse) -> Vec<ChatCompletionMessageToolCalls> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.tool_calls)
        .unwrap_or_default()
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn call_tool(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<FunctionCall, LlmError> {
        let request = self.build_request(messages, tools).map_err(from_openai_error)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(from_openai_error)?;

        // 提取 token 使用统计
        if let Some(usage) = &response.usage {
            self.usage.add(
                usage.prompt_tokens as u64,
                usage.completion_tokens as u64,
            );
        }

        extract_call(first_tool_calls(response))
    }
}
