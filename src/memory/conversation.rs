//! 对话记录：跨 turn 的 (问题, 回答) 序列，由调用方持有
//!
//! 编排核心只在 turn 开始时读取一份快照，turn 结束后由调用方 record 新的一问一答；
//! 超出 max_turns 时自动剪枝最旧的记录。Message / Role 是发给 LLM 的消息格式。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 一轮问答
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
}

/// 调用方持有的对话记录：最近 max_turns 轮问答
#[derive(Clone, Debug)]
pub struct ConversationLog {
    exchanges: Vec<Exchange>,
    max_turns: usize,
}

impl ConversationLog {
    pub fn new(max_turns: usize) -> Self {
        Self {
            exchanges: Vec::new(),
            max_turns,
        }
    }

    /// turn 完成后追加一问一答
    pub fn record(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.exchanges.push(Exchange {
            question: question.into(),
            answer: answer.into(),
        });
        self.prune();
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    pub fn clear(&mut self) {
        self.exchanges.clear();
    }

    /// 超出 max_turns 时丢弃最旧的问答
    fn prune(&mut self) {
        if self.exchanges.len() > self.max_turns {
            let excess = self.exchanges.len() - self.max_turns;
            self.exchanges.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::new(20)
    }
}

/// 将问答展开为交替的 user / assistant 消息（供 Oracle 拼 prompt）
pub fn exchanges_to_messages(exchanges: &[Exchange]) -> Vec<Message> {
    exchanges
        .iter()
        .flat_map(|e| [Message::user(&e.question), Message::assistant(&e.answer)])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_prune() {
        let mut log = ConversationLog::new(2);
        log.record("q1", "a1");
        log.record("q2", "a2");
        log.record("q3", "a3");
        assert_eq!(log.len(), 2);
        assert_eq!(log.exchanges()[0].question, "q2");
        assert_eq!(log.exchanges()[1].answer, "a3");
    }

    #[test]
    fn test_exchanges_to_messages_alternates() {
        let mut log = ConversationLog::default();
        log.record("What is RAG?", "Retrieval augmented generation.");
        let msgs = exchanges_to_messages(log.exchanges());
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(msgs[1].role, Role::Assistant);
        assert_eq!(msgs[1].content, "Retrieval augmented generation.");
    }
}
