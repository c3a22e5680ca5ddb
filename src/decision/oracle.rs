//! Decision Oracle：把 {input, conversation, scratchpad} 渲染成 prompt，交给 LLM 强制选择一个工具
//!
//! 消息顺序：system 指令、历史问答（user / assistant 交替）、当前问题、assistant 形式的 scratchpad。
//! scratchpad 只渲染已完成的 Action Record，pending 记录永远不出现在 prompt 中。

use std::sync::Arc;

use serde_json::Value;

use crate::core::{AgentError, TurnState};
use crate::llm::{LlmClient, ToolDefinition};
use crate::memory::{exchanges_to_messages, Message};
use crate::tools::{ToolKind, ToolRegistry};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are the oracle, an AI decision-maker. Given the user's query, \
decide which tool(s) to use from the list provided. Do not reuse a tool more than twice for the same query. \
Once you have gathered sufficient information, use the final_answer tool to produce the report.";

/// 强制收尾时追加的指令
const CONCLUDE_INSTRUCTION: &str = "The research budget for this query is exhausted. \
Write the final report now with the final_answer tool, using only the information in the scratchpad.";

const ENTRY_SEPARATOR: &str = "\n---\n";

/// Oracle 的一次选择（尚未经过 Guard）
#[derive(Clone, Debug, PartialEq)]
pub struct Decision {
    pub tool: ToolKind,
    pub arguments: Value,
}

/// 渲染 scratchpad：每条已完成记录一段 "Tool: .., Input: ..\nOutput: ..."，按 trace 顺序
pub fn render_scratchpad(state: &TurnState, entry_max_chars: usize) -> String {
    state
        .completed()
        .map(|record| {
            let output = record
                .result()
                .and_then(|r| serde_json::to_string(r).ok())
                .unwrap_or_default();
            let entry = format!(
                "Tool: {}, Input: {}\nOutput: {}",
                record.tool(),
                record.arguments(),
                output
            );
            truncate_chars(entry, entry_max_chars)
        })
        .collect::<Vec<_>>()
        .join(ENTRY_SEPARATOR)
}

fn truncate_chars(s: String, max: usize) -> String {
    if max == 0 || s.chars().count() <= max {
        return s;
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("...[truncated]");
    out
}

pub struct Oracle {
    llm: Arc<dyn LlmClient>,
    tools: Vec<ToolDefinition>,
    final_answer: ToolDefinition,
    system_prompt: String,
    scratchpad_entry_max_chars: usize,
}

impl Oracle {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: &ToolRegistry,
        system_prompt: Option<&str>,
        scratchpad_entry_max_chars: usize,
    ) -> Self {
        Self {
            llm,
            tools: registry.definitions(),
            final_answer: registry.definition(ToolKind::FinalAnswer),
            system_prompt: system_prompt
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(DEFAULT_SYSTEM_PROMPT)
                .to_string(),
            scratchpad_entry_max_chars,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 组装本次决策的完整消息列表
    pub fn build_messages(&self, state: &TurnState) -> Vec<Message> {
        let mut messages = Vec::with_capacity(state.conversation().len() * 2 + 3);
        messages.push(Message::system(self.system_prompt.clone()));
        messages.extend(exchanges_to_messages(state.conversation()));
        messages.push(Message::user(state.input()));
        messages.push(Message::assistant(format!(
            "scratchpad: {}",
            render_scratchpad(state, self.scratchpad_entry_max_chars)
        )));
        messages
    }

    /// 决策 LLM 的累计 token 使用：(prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 自由选择：提供全部工具；名字不在注册表中为致命错误
    pub async fn decide(&self, state: &TurnState) -> Result<Decision, AgentError> {
        let messages = self.build_messages(state);
        let call = self.llm.call_tool(&messages, &self.tools).await?;
        let tool: ToolKind = call.name.parse().map_err(AgentError::UnknownTool)?;
        tracing::debug!(turn = %state.turn_id(), tool = %tool, "oracle decided");
        Ok(Decision {
            tool,
            arguments: call.arguments,
        })
    }

    /// 强制收尾：只提供 final_answer，返回其参数
    pub async fn conclude(&self, state: &TurnState) -> Result<Value, AgentError> {
        let mut messages = self.build_messages(state);
        messages.push(Message::system(CONCLUDE_INSTRUCTION));
        let call = self
            .llm
            .call_tool(&messages, std::slice::from_ref(&self.final_answer))
            .await?;
        match call.name.parse::<ToolKind>() {
            Ok(ToolKind::FinalAnswer) => Ok(call.arguments),
            _ => Err(AgentError::UnknownTool(call.name)),
        }
    }
}
