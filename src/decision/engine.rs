//! Orchestration Engine：驱动单个 turn 的状态机直到 terminated
//!
//! Oracle -> (Guard/Router) -> Tool -> Oracle ... -> final_answer -> Terminated。
//! 每个 turn 新建 TurnState（以调用方的对话记录为种子），Engine 本身不保存跨 turn 的状态。
//! Guard 强制收尾时再询问一次 Oracle（只提供 final_answer）来写报告；
//! 这次调用失败则由 trace 合成降级报告，保证 turn 总能产出报告。

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::core::{ActionRecord, AgentError, TurnState};
use crate::decision::events::send_event;
use crate::decision::{recursion_tripped, route, GuardLimits, GuardReason, Oracle, TurnEvent};
use crate::memory::ConversationLog;
use crate::tools::final_answer::{fallback_arguments, merge_sources, sources_from_trace};
use crate::tools::{Report, ToolExecutor, ToolKind};

/// 状态机节点
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Oracle,
    Tool { index: usize, tool: ToolKind },
    Terminated,
}

/// 一个 turn 的结果
#[derive(Debug)]
pub struct TurnOutcome {
    pub turn_id: Uuid,
    pub report: Report,
    pub trace: Vec<ActionRecord>,
    /// 若报告是被 Guard 强制产出的，记录首个触发的 Guard
    pub guard: Option<GuardReason>,
}

impl TurnOutcome {
    pub fn forced(&self) -> bool {
        self.guard.is_some()
    }

    pub fn steps(&self) -> usize {
        self.trace.len()
    }
}

pub struct Engine {
    oracle: Oracle,
    executor: ToolExecutor,
    limits: GuardLimits,
    cite_sources: bool,
}

impl Engine {
    pub fn new(oracle: Oracle, executor: ToolExecutor, limits: GuardLimits, cite_sources: bool) -> Self {
        Self {
            oracle,
            executor,
            limits,
            cite_sources,
        }
    }

    /// 强制收尾的报告参数：先问 Oracle，失败则降级
    async fn conclusion_arguments(&self, state: &TurnState) -> Value {
        match self.oracle.conclude(state).await {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(turn = %state.turn_id(), error = %e, "forced conclusion failed, synthesising report from trace");
                fallback_arguments(state.input(), state.trace())
            }
        }
    }

    /// 运行一个 turn，返回 final_answer 的报告
    pub async fn run_turn(
        &self,
        input: &str,
        conversation: &ConversationLog,
        event_tx: Option<&UnboundedSender<TurnEvent>>,
    ) -> Result<TurnOutcome, AgentError> {
        let mut state = TurnState::new(input, conversation);
        let mut phase = Phase::Oracle;
        let mut first_guard: Option<GuardReason> = None;
        tracing::info!(turn = %state.turn_id(), input = %input, "turn started");
        // 记录初始 token 数，用于计算本次增量
        let (init_prompt, init_completion, _) = self.oracle.token_usage();

        while phase != Phase::Terminated {
            phase = match phase {
                Phase::Oracle => {
                    let step = state.trace().len() + 1;
                    let (tool, mut arguments, proposed) = if recursion_tripped(&state, &self.limits) {
                        // 无论 Oracle 选什么都会被改写，省掉这次自由决策
                        tracing::warn!(turn = %state.turn_id(), step, "step limit reached, forcing final_answer");
                        send_event(event_tx, TurnEvent::GuardTriggered {
                            step,
                            proposed: None,
                            reason: GuardReason::StepLimit,
                        });
                        first_guard.get_or_insert(GuardReason::StepLimit);
                        (ToolKind::FinalAnswer, self.conclusion_arguments(&state).await, None)
                    } else {
                        let decision = self.oracle.decide(&state).await?;
                        tracing::info!(turn = %state.turn_id(), step, tool = %decision.tool, "oracle decision");
                        send_event(event_tx, TurnEvent::Decision {
                            step,
                            tool: decision.tool,
                            arguments: decision.arguments.clone(),
                        });
                        let routed = route(&state, decision.tool, &self.limits);
                        match routed.guard {
                            Some(reason) => {
                                tracing::warn!(
                                    turn = %state.turn_id(),
                                    step,
                                    proposed = %decision.tool,
                                    reason = %reason,
                                    "guard override, forcing final_answer"
                                );
                                send_event(event_tx, TurnEvent::GuardTriggered {
                                    step,
                                    proposed: Some(decision.tool),
                                    reason,
                                });
                                first_guard.get_or_insert(reason);
                                (
                                    ToolKind::FinalAnswer,
                                    self.conclusion_arguments(&state).await,
                                    Some(decision.tool),
                                )
                            }
                            None => (decision.tool, decision.arguments, None),
                        }
                    };
                    if tool.is_terminal() && self.cite_sources {
                        merge_sources(&mut arguments, &sources_from_trace(state.trace()));
                    }
                    let index = state.record_decision(tool, arguments, proposed);
                    Phase::Tool { index, tool }
                }
                Phase::Tool { index, tool } => {
                    let step = index + 1;
                    send_event(event_tx, TurnEvent::ToolStarted { step, tool });
                    match self.executor.execute(&mut state, index).await {
                        Some(output) => {
                            send_event(event_tx, TurnEvent::ToolFinished {
                                step,
                                tool,
                                success: output.success,
                                result_count: output.evidence_count(),
                                error: output.error.clone(),
                            });
                            if tool.is_terminal() {
                                Phase::Terminated
                            } else {
                                Phase::Oracle
                            }
                        }
                        None => {
                            tracing::warn!(turn = %state.turn_id(), step, "record already executed, returning to oracle");
                            Phase::Oracle
                        }
                    }
                }
                Phase::Terminated => Phase::Terminated,
            };
        }

        let report = state
            .trace()
            .last()
            .and_then(|r| r.result())
            .and_then(|out| out.report())
            .cloned()
            .ok_or(AgentError::MissingReport)?;
        let steps = state.trace().len();
        let (cur_prompt, cur_completion, cur_total) = self.oracle.token_usage();
        let prompt_tokens = cur_prompt.saturating_sub(init_prompt);
        let completion_tokens = cur_completion.saturating_sub(init_completion);
        send_event(event_tx, TurnEvent::TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cumulative_total: cur_total,
        });
        send_event(event_tx, TurnEvent::Finished {
            steps,
            forced: first_guard.is_some(),
        });
        tracing::info!(
            turn = %state.turn_id(),
            steps,
            forced = first_guard.is_some(),
            prompt_tokens,
            completion_tokens,
            "turn finished"
        );

        Ok(TurnOutcome {
            turn_id: state.turn_id(),
            report,
            trace: state.into_trace(),
            guard: first_guard,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::llm::{FunctionCall, LlmClient, ScriptedLlmClient};
    use crate::memory::Document;
    use crate::tools::test_support::{stub_registry, FixedStore};

    fn engine_with(llm: Arc<dyn LlmClient>, store: Arc<FixedStore>, cite: bool) -> Engine {
        let registry = stub_registry(store);
        let oracle = Oracle::new(llm, &registry, None, 4000);
        Engine::new(oracle, ToolExecutor::new(registry, 30), GuardLimits::default(), cite)
    }

    fn rag(query: &str) -> FunctionCall {
        FunctionCall::new("rag_search", json!({"query": query}))
    }

    #[tokio::test]
    async fn test_direct_final_answer_single_step() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![]));
        let engine = engine_with(llm.clone(), Arc::new(FixedStore::ok(vec![])), true);
        let out = engine.run_turn("hello", &ConversationLog::default(), None).await.unwrap();
        assert_eq!(out.steps(), 1);
        assert!(!out.forced());
        assert_eq!(out.report.introduction, "Report on: hello");
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_events_follow_state_machine() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![rag("q")]));
        let engine = engine_with(llm, Arc::new(FixedStore::ok(vec![Document::new("x")])), false);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        engine.run_turn("q", &ConversationLog::default(), Some(&tx)).await.unwrap();
        drop(tx);
        let mut kinds = Vec::new();
        while let Some(ev) = rx.recv().await {
            kinds.push(serde_json::to_value(&ev).unwrap()["type"].as_str().unwrap().to_string());
        }
        assert_eq!(
            kinds,
            vec![
                "decision", "tool_started", "tool_finished",
                "decision", "tool_started", "tool_finished",
                "token_usage", "finished"
            ]
        );
    }

    #[tokio::test]
    async fn test_token_usage_event_reports_turn_delta() {
        /// 每次调用计 100 prompt + 20 completion
        struct Metered {
            inner: ScriptedLlmClient,
            usage: crate::llm::TokenUsage,
        }

        #[async_trait::async_trait]
        impl LlmClient for Metered {
            async fn call_tool(
                &self,
                m: &[crate::memory::Message],
                t: &[crate::llm::ToolDefinition],
            ) -> Result<FunctionCall, crate::llm::LlmError> {
                self.usage.add(100, 20);
                self.inner.call_tool(m, t).await
            }

            fn token_usage(&self) -> (u64, u64, u64) {
                self.usage.get()
            }
        }

        let llm = Arc::new(Metered {
            inner: ScriptedLlmClient::new(vec![rag("q")]),
            usage: crate::llm::TokenUsage::new(),
        });
        llm.usage.add(1000, 500);
        let engine = engine_with(llm, Arc::new(FixedStore::ok(vec![])), true);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        engine.run_turn("q", &ConversationLog::default(), Some(&tx)).await.unwrap();
        drop(tx);

        let mut usage = None;
        while let Some(ev) = rx.recv().await {
            if let TurnEvent::TokenUsage { .. } = ev {
                usage = Some(ev);
            }
        }
        assert_eq!(
            usage,
            Some(TurnEvent::TokenUsage {
                prompt_tokens: 200,
                completion_tokens: 40,
                total_tokens: 240,
                cumulative_total: 1740,
            })
        );
    }

    #[tokio::test]
    async fn test_overuse_forces_conclusion_with_extra_call() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![rag("a"), rag("a"), rag("a"), rag("a")]));
        let engine = engine_with(llm.clone(), Arc::new(FixedStore::ok(vec![])), true);
        let out = engine.run_turn("q", &ConversationLog::default(), None).await.unwrap();
        assert_eq!(out.steps(), 4);
        assert_eq!(out.guard, Some(GuardReason::Overuse));
        let last = out.trace.last().unwrap();
        assert_eq!(last.tool(), ToolKind::FinalAnswer);
        assert_eq!(last.proposed(), Some(ToolKind::RagSearch));
        // 4 次自由决策 + 1 次收尾
        assert_eq!(llm.calls(), 5);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_fatal() {
        struct Rogue;
        #[async_trait::async_trait]
        impl LlmClient for Rogue {
            async fn call_tool(
                &self,
                _m: &[crate::memory::Message],
                _t: &[crate::llm::ToolDefinition],
            ) -> Result<FunctionCall, crate::llm::LlmError> {
                Ok(FunctionCall::new("delete_index", json!({})))
            }
        }
        let engine = engine_with(Arc::new(Rogue), Arc::new(FixedStore::ok(vec![])), true);
        let err = engine.run_turn("q", &ConversationLog::default(), None).await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool(name) if name == "delete_index"));
    }

    #[tokio::test]
    async fn test_failed_conclusion_falls_back_to_trace_report() {
        struct OnlySearches;
        #[async_trait::async_trait]
        impl LlmClient for OnlySearches {
            async fn call_tool(
                &self,
                _m: &[crate::memory::Message],
                tools: &[crate::llm::ToolDefinition],
            ) -> Result<FunctionCall, crate::llm::LlmError> {
                if tools.len() == 1 {
                    Err(crate::llm::LlmError::Timeout)
                } else {
                    Ok(FunctionCall::new("rag_search", json!({"query": "loop"})))
                }
            }
        }
        let docs = vec![Document::new("diffusion text").with_metadata("title", "A")];
        let engine = engine_with(Arc::new(OnlySearches), Arc::new(FixedStore::ok(docs)), true);
        let out = engine.run_turn("Explain diffusion models", &ConversationLog::default(), None).await.unwrap();
        assert_eq!(out.guard, Some(GuardReason::Overuse));
        assert!(out.report.introduction.contains("Explain diffusion models"));
        assert!(out.report.main_body.contains("diffusion text"));
        assert_eq!(out.report.sources.clone().into_list(), vec!["A".to_string()]);
    }
}
