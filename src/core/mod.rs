//! 核心层：错误分类与单个 turn 的状态（Trace / Action Record / 工具使用计数）

pub mod error;
pub mod state;

pub use error::AgentError;
pub use state::{ActionRecord, TurnState};
