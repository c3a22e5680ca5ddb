pub mod executor;
pub mod fetch_arxiv;
pub mod final_answer;
pub mod output;
pub mod rag_search;
pub mod rag_search_filter;
pub mod registry;
pub mod schema;
pub mod web_search;

#[cfg(test)]
pub(crate) mod test_support;

pub use executor::ToolExecutor;
pub use fetch_arxiv::FetchArxivTool;
pub use final_answer::FinalAnswerTool;
pub use output::{Paper, Passage, Report, ResultItem, TextOrList, ToolOutput, WebPage};
pub use rag_search::RagSearchTool;
pub use rag_search_filter::RagSearchFilterTool;
pub use registry::{Tool, ToolKind, ToolRegistry};
pub use schema::{args_schema, decode_args};
pub use web_search::WebSearchTool;
