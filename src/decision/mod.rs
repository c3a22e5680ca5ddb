//! 决策层：Oracle（prompt + scratchpad）、Guard/Router、状态机 Engine、过程事件

pub mod engine;
pub mod events;
pub mod oracle;
pub mod router;

pub use engine::{Engine, TurnOutcome};
pub use events::TurnEvent;
pub use oracle::{render_scratchpad, Decision, Oracle, DEFAULT_SYSTEM_PROMPT};
pub use router::{recursion_tripped, route, GuardLimits, GuardReason, Route};
