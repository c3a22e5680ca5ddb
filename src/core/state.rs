//! 单个 turn 的状态：Trace（Action Record 序列）与工具使用计数
//!
//! TurnState 由一次 Engine 调用独占：创建于 turn 开始，只被 Engine / Executor 修改，
//! turn 结束后丢弃（或由调用方折叠进 ConversationLog）。Trace 只追加、不重排、不删除；
//! Action Record 的 result 一旦写入就不可再改。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::memory::{ConversationLog, Exchange};
use crate::tools::{ToolKind, ToolOutput};

/// 一次 Oracle 决策 + 执行的记录。决策时 result 为 None（pending），执行后写入一次
#[derive(Clone, Debug, Serialize)]
pub struct ActionRecord {
    step: usize,
    tool: ToolKind,
    arguments: Value,
    /// Guard 覆盖时 Oracle 原本选择的工具
    proposed: Option<ToolKind>,
    decided_at: DateTime<Utc>,
    result: Option<ToolOutput>,
}

impl ActionRecord {
    /// 第几次决策（从 1 开始）
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn tool(&self) -> ToolKind {
        self.tool
    }

    pub fn arguments(&self) -> &Value {
        &self.arguments
    }

    pub fn proposed(&self) -> Option<ToolKind> {
        self.proposed
    }

    pub fn was_overridden(&self) -> bool {
        self.proposed.is_some()
    }

    pub fn decided_at(&self) -> DateTime<Utc> {
        self.decided_at
    }

    pub fn result(&self) -> Option<&ToolOutput> {
        self.result.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.result.is_none()
    }
}

/// 一个 turn 的完整状态
#[derive(Debug)]
pub struct TurnState {
    turn_id: Uuid,
    input: String,
    conversation: Vec<Exchange>,
    trace: Vec<ActionRecord>,
    tool_usage: HashMap<ToolKind, usize>,
}

impl TurnState {
    /// 以当前问题与调用方的对话记录创建新 turn（对话记录在本 turn 内只读）
    pub fn new(input: impl Into<String>, conversation: &ConversationLog) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            input: input.into(),
            conversation: conversation.exchanges().to_vec(),
            trace: Vec::new(),
            tool_usage: HashMap::new(),
        }
    }

    pub fn turn_id(&self) -> Uuid {
        self.turn_id
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn conversation(&self) -> &[Exchange] {
        &self.conversation
    }

    pub fn trace(&self) -> &[ActionRecord] {
        &self.trace
    }

    /// 已执行完成的记录（按时间顺序），即 scratchpad 可见的部分
    pub fn completed(&self) -> impl Iterator<Item = &ActionRecord> {
        self.trace.iter().filter(|r| !r.is_pending())
    }

    /// 最早一条尚未执行的记录
    pub fn pending_index(&self) -> Option<usize> {
        self.trace.iter().position(ActionRecord::is_pending)
    }

    /// 某工具在本 turn 已执行的次数
    pub fn usage(&self, tool: ToolKind) -> usize {
        self.tool_usage.get(&tool).copied().unwrap_or(0)
    }

    pub fn tool_usage(&self) -> &HashMap<ToolKind, usize> {
        &self.tool_usage
    }

    /// 追加一条 pending 记录，返回其下标
    pub fn record_decision(
        &mut self,
        tool: ToolKind,
        arguments: Value,
        proposed: Option<ToolKind>,
    ) -> usize {
        let step = self.trace.len() + 1;
        self.trace.push(ActionRecord {
            step,
            tool,
            arguments,
            proposed,
            decided_at: Utc::now(),
            result: None,
        });
        step - 1
    }

    /// 写入执行结果并计数一次；记录不存在或已有结果时返回 false 且不做任何修改
    pub fn complete(&mut self, index: usize, output: ToolOutput) -> bool {
        let Some(record) = self.trace.get_mut(index) else {
            return false;
        };
        if record.result.is_some() {
            return false;
        }
        *self.tool_usage.entry(record.tool).or_insert(0) += 1;
        record.result = Some(output);
        true
    }

    /// 拆出 trace（turn 结束时交给调用方）
    pub fn into_trace(self) -> Vec<ActionRecord> {
        self.trace
    }
}
