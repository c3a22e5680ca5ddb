//! 工具执行器
//!
//! 持有 ToolRegistry 与单次执行超时。execute(state, index) 取出 pending 记录，在超时内调用
//! registry.execute，把结果写回 Trace（同时计数一次）；超时折叠为 success=false 的 ToolOutput。
//! 每次调用输出一条结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::TurnState;
use crate::tools::{ToolKind, ToolOutput, ToolRegistry};

/// 工具执行器：对每次调用施加超时，并把结果落到 TurnState
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    /// 执行单个工具（不触碰 TurnState）；超时返回失败输出；输出 JSON 审计日志
    pub async fn run(&self, kind: ToolKind, args: Value) -> ToolOutput {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, self.registry.execute(kind, args.clone())).await;

        let output = match result {
            Ok(output) => output,
            Err(_) => ToolOutput::failure(
                kind,
                args,
                format!("Tool timed out after {}s", self.timeout.as_secs()),
            ),
        };
        let outcome = match (&output.error, output.success) {
            (_, true) => "ok",
            (Some(e), false) if e.starts_with("Tool timed out") => "timeout",
            _ => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": kind.as_str(),
            "ok": output.success,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
            "result_count": output.evidence_count(),
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        output
    }

    /// 执行 trace 中 index 处的 pending 记录并写回结果
    ///
    /// 记录不存在或已执行过时返回 None，不会重复执行
    pub async fn execute(&self, state: &mut TurnState, index: usize) -> Option<ToolOutput> {
        let record = state.trace().get(index)?;
        if !record.is_pending() {
            return None;
        }
        let (kind, args) = (record.tool(), record.arguments().clone());
        let output = self.run(kind, args).await;
        state.complete(index, output.clone()).then_some(output)
    }
}

const ARGS_PREVIEW_CHARS: usize = 200;

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", s.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::memory::ConversationLog;
    use crate::tools::Tool;

    struct Counting {
        kind: ToolKind,
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Tool for Counting {
        fn kind(&self) -> ToolKind {
            self.kind
        }

        fn description(&self) -> &str {
            "counting"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        async fn execute(&self, args: Value) -> ToolOutput {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            ToolOutput::empty(self.kind, args, "nothing")
        }
    }

    fn counting(kind: ToolKind, delay_ms: u64) -> Arc<Counting> {
        Arc::new(Counting {
            kind,
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(delay_ms),
        })
    }

    fn executor(rag: Arc<Counting>, web: Arc<Counting>) -> ToolExecutor {
        let registry = ToolRegistry::new(
            rag,
            counting(ToolKind::RagSearchFilter, 0),
            counting(ToolKind::FetchArxiv, 0),
            web,
            counting(ToolKind::FinalAnswer, 0),
        );
        ToolExecutor::new(registry, 1)
    }

    #[tokio::test]
    async fn test_execute_completes_pending_record_once() {
        let rag = counting(ToolKind::RagSearch, 0);
        let exec = executor(rag.clone(), counting(ToolKind::WebSearch, 0));
        let mut st = TurnState::new("q", &ConversationLog::default());
        let idx = st.record_decision(ToolKind::RagSearch, json!({"query": "q"}), None);

        let out = exec.execute(&mut st, idx).await.unwrap();
        assert!(out.success);
        assert_eq!(st.usage(ToolKind::RagSearch), 1);
        assert!(exec.execute(&mut st, idx).await.is_none());
        assert!(exec.execute(&mut st, 7).await.is_none());
        assert_eq!(rag.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_becomes_failure_output() {
        let exec = executor(counting(ToolKind::RagSearch, 0), counting(ToolKind::WebSearch, 1500));
        let out = exec.run(ToolKind::WebSearch, json!({"query": "slow"})).await;
        assert!(!out.success);
        assert!(out.error.unwrap().contains("timed out"));
        assert_eq!(out.metadata["query"], "slow");
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = json!({"query": "x".repeat(500)});
        assert!(args_preview(&long).ends_with("..."));
        assert_eq!(args_preview(&json!({})), "{}");
    }

    #[test]
    fn test_args_preview_counts_characters() {
        // 100 个汉字：300 字节，但不到 200 字符，原样保留
        let query = "扩".repeat(100);
        let args = json!({"query": query});
        assert_eq!(args_preview(&args), args.to_string());

        let long = json!({"query": "扩".repeat(300)});
        let preview = args_preview(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), ARGS_PREVIEW_CHARS + 3);
    }
}
