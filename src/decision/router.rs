//! Guard / Router：决定 Oracle 的选择是否真正执行
//!
//! 两道 Guard，任一触发即改走 final_answer：
//! - 递归 Guard：本次决策计入后 trace 长度超过 max_steps（第 max_steps+1 次决策必为 final_answer）
//! - 过度使用 Guard：所选工具在本 turn 已完成的执行次数超过 max_tool_uses
//!
//! final_answer 本身永远放行。route 是纯函数，只读 TurnState。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::TurnState;
use crate::tools::ToolKind;

/// Guard 阈值
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardLimits {
    pub max_steps: usize,
    pub max_tool_uses: usize,
}

impl Default for GuardLimits {
    fn default() -> Self {
        Self {
            max_steps: 10,
            max_tool_uses: 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardReason {
    StepLimit,
    Overuse,
}

impl fmt::Display for GuardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardReason::StepLimit => f.write_str("step limit reached"),
            GuardReason::Overuse => f.write_str("tool used too many times"),
        }
    }
}

/// 路由结果：实际执行的工具，以及触发的 Guard（若有）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Route {
    pub tool: ToolKind,
    pub guard: Option<GuardReason>,
}

/// 下一次决策是否必然被递归 Guard 拦截
pub fn recursion_tripped(state: &TurnState, limits: &GuardLimits) -> bool {
    state.trace().len() + 1 > limits.max_steps
}

pub fn route(state: &TurnState, proposed: ToolKind, limits: &GuardLimits) -> Route {
    let forced = |reason| Route {
        tool: ToolKind::FinalAnswer,
        guard: Some(reason),
    };
    if proposed.is_terminal() {
        return Route {
            tool: proposed,
            guard: None,
        };
    }
    if recursion_tripped(state, limits) {
        return forced(GuardReason::StepLimit);
    }
    if state.usage(proposed) > limits.max_tool_uses {
        return forced(GuardReason::Overuse);
    }
    Route {
        tool: proposed,
        guard: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ConversationLog;
    use crate::tools::ToolOutput;
    use serde_json::json;

    fn run(st: &mut TurnState, kind: ToolKind) {
        let i = st.record_decision(kind, json!({}), None);
        st.complete(i, ToolOutput::empty(kind, json!({}), "none"));
    }

    #[test]
    fn test_third_use_allowed_fourth_forced() {
        let limits = GuardLimits::default();
        let mut st = TurnState::new("q", &ConversationLog::default());
        for _ in 0..2 {
            assert_eq!(route(&st, ToolKind::RagSearch, &limits).guard, None);
            run(&mut st, ToolKind::RagSearch);
        }
        assert_eq!(route(&st, ToolKind::RagSearch, &limits).tool, ToolKind::RagSearch);
        run(&mut st, ToolKind::RagSearch);

        let r = route(&st, ToolKind::RagSearch, &limits);
        assert_eq!(r.tool, ToolKind::FinalAnswer);
        assert_eq!(r.guard, Some(GuardReason::Overuse));
        // 其他工具不受影响
        assert_eq!(route(&st, ToolKind::WebSearch, &limits).guard, None);
    }

    #[test]
    fn test_eleventh_decision_forced() {
        let limits = GuardLimits::default();
        let mut st = TurnState::new("q", &ConversationLog::default());
        let cycle = [ToolKind::RagSearch, ToolKind::WebSearch, ToolKind::FetchArxiv, ToolKind::RagSearchFilter];
        for i in 0..10 {
            let kind = cycle[i % cycle.len()];
            assert!(!recursion_tripped(&st, &limits));
            assert_eq!(route(&st, kind, &limits).tool, kind);
            run(&mut st, kind);
        }
        assert!(recursion_tripped(&st, &limits));
        let r = route(&st, ToolKind::WebSearch, &limits);
        assert_eq!(r.tool, ToolKind::FinalAnswer);
        assert_eq!(r.guard, Some(GuardReason::StepLimit));
    }

    #[test]
    fn test_final_answer_never_overridden() {
        let limits = GuardLimits {
            max_steps: 0,
            max_tool_uses: 0,
        };
        let st = TurnState::new("q", &ConversationLog::default());
        let r = route(&st, ToolKind::FinalAnswer, &limits);
        assert_eq!(r.guard, None);
        assert_eq!(r.tool, ToolKind::FinalAnswer);
    }
}
