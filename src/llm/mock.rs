//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本依次返回预设的函数调用，并记录每次收到的消息，便于检查 scratchpad。
//! 若脚本下一项不在本次提供的工具集合中（例如被 Guard 强制收尾时只提供 final_answer），
//! 则不消费脚本，直接返回一个占位的 final_answer 调用。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::llm::{FunctionCall, LlmClient, LlmError, ToolDefinition};
use crate::memory::Message;

/// 脚本化客户端：脚本耗尽后一律返回 final_answer
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<FunctionCall>>,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new(script: impl IntoIterator<Item = FunctionCall>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 收到过的全部 prompt（按调用顺序）
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// 尚未消费的脚本条数
    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// 占位报告：内容取最后一条 user 消息
    pub fn placeholder_answer(messages: &[Message]) -> FunctionCall {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::memory::Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        FunctionCall::new(
            "final_answer",
            json!({
                "introduction": format!("Report on: {}", last_user),
                "research_steps": ["Reviewed the gathered evidence"],
                "main_body": "Scripted conclusion.",
                "conclusion": "Scripted conclusion.",
                "sources": [],
            }),
        )
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn call_tool(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<FunctionCall, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(messages.to_vec());
        }
        let offered = |name: &str| tools.is_empty() || tools.iter().any(|t| t.name == name);

        let mut script = self
            .script
            .lock()
            .map_err(|_| LlmError::Http("script lock poisoned".to_string()))?;
        if script.front().is_some_and(|next| offered(&next.name)) {
            if let Some(call) = script.pop_front() {
                return Ok(call);
            }
        }
        Ok(Self::placeholder_answer(messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: String::new(),
            parameters: json!({}),
        }
    }

    #[tokio::test]
    async fn test_script_in_order_then_final_answer() {
        let client = ScriptedLlmClient::new(vec![
            FunctionCall::new("rag_search", json!({"query": "a"})),
            FunctionCall::new("web_search", json!({"query": "b"})),
        ]);
        let tools = vec![def("rag_search"), def("web_search"), def("final_answer")];
        let msgs = vec![Message::user("hello")];
        assert_eq!(client.call_tool(&msgs, &tools).await.unwrap().name, "rag_search");
        assert_eq!(client.call_tool(&msgs, &tools).await.unwrap().name, "web_search");
        let last = client.call_tool(&msgs, &tools).await.unwrap();
        assert_eq!(last.name, "final_answer");
        assert!(last.arguments["introduction"].as_str().unwrap().contains("hello"));
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn test_unoffered_head_is_not_consumed() {
        let client = ScriptedLlmClient::new(vec![FunctionCall::new("rag_search", json!({}))]);
        let call = client.call_tool(&[], &[def("final_answer")]).await.unwrap();
        assert_eq!(call.name, "final_answer");
        assert_eq!(client.remaining(), 1);
    }
}
