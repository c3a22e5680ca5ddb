//! turn 过程事件：供 CLI 等前端展示决策、Guard 覆盖与工具执行进度

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::decision::GuardReason;
use crate::tools::ToolKind;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Oracle 给出了选择
    Decision {
        step: usize,
        tool: ToolKind,
        arguments: Value,
    },
    /// Guard 把选择改成了 final_answer；proposed 为 None 表示没有再询问 Oracle
    GuardTriggered {
        step: usize,
        proposed: Option<ToolKind>,
        reason: GuardReason,
    },
    ToolStarted { step: usize, tool: ToolKind },
    ToolFinished {
        step: usize,
        tool: ToolKind,
        success: bool,
        result_count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// 本 turn 的 token 增量，cumulative_total 为客户端创建以来的累计
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
        cumulative_total: u64,
    },
    /// 报告已产出
    Finished { steps: usize, forced: bool },
}

pub(crate) fn send_event(tx: Option<&UnboundedSender<TurnEvent>>, ev: TurnEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let ev = TurnEvent::GuardTriggered {
            step: 4,
            proposed: Some(ToolKind::RagSearch),
            reason: GuardReason::Overuse,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "guard_triggered");
        assert_eq!(v["proposed"], "rag_search");
        assert_eq!(v["reason"], "overuse");
    }

    #[test]
    fn test_send_without_channel_is_noop() {
        send_event(None, TurnEvent::Finished { steps: 1, forced: false });
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        send_event(Some(&tx), TurnEvent::ToolStarted { step: 1, tool: ToolKind::WebSearch });
        assert!(matches!(rx.try_recv(), Ok(TurnEvent::ToolStarted { step: 1, .. })));
    }
}
