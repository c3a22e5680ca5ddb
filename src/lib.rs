//! Scholar - 研究报告助理的工具编排核心
//!
//! 模块划分：
//! - **agent**: 无头运行时（启动校验、组件组装、单问题处理）
//! - **config**: 应用配置加载（TOML + 环境变量）与凭证
//! - **core**: 错误类型、Turn 状态（Trace / 工具使用计数）
//! - **decision**: Oracle、Guard/Router、状态机 Engine、过程事件
//! - **llm**: 决策接口抽象与实现（OpenAI 兼容 / 重试 / Mock）、嵌入
//! - **memory**: 对话记录、向量检索接口与内存 / Pinecone 实现
//! - **tools**: 五个工具、统一输出契约、注册表与执行器

pub mod agent;
pub mod config;
pub mod core;
pub mod decision;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;
