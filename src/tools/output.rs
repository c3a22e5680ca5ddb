//! 工具统一输出契约 ToolOutput
//!
//! 每个工具都返回 {tool, success, results, metadata, error}：results 永远存在（可为空），
//! metadata 回显实际生效的参数，error 只在 success=false 时出现。
//! 「搜到了但没有结果」是 success=true 加一条 Notice，「搜索失败」是 success=false。

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::memory::Document;
use crate::tools::ToolKind;

/// 向量检索命中的一段正文
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper_id: Option<String>,
}

impl Passage {
    /// 从检索文档构造；id_field 为论文 ID 所在的元数据键
    pub fn from_document(doc: Document, id_field: &str) -> Self {
        Self {
            title: doc.title().map(String::from),
            source: doc.source().map(String::from),
            paper_id: doc.meta_str(id_field).map(String::from),
            content: doc.content,
        }
    }
}

/// arXiv 论文元数据
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub arxiv_id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    pub pdf_url: String,
    pub abs_url: String,
}

/// 网页搜索结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebPage {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

/// 纯文本或文本列表（final_answer 的 research_steps / sources 两种写法都接受）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextOrList {
    Text(String),
    List(Vec<String>),
}

impl TextOrList {
    /// 列表逐项加 "- " 前缀，文本原样输出
    pub fn render(&self) -> String {
        match self {
            TextOrList::Text(s) => s.clone(),
            TextOrList::List(items) => items
                .iter()
                .map(|s| format!("- {}", s))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn into_list(self) -> Vec<String> {
        match self {
            TextOrList::Text(s) if s.trim().is_empty() => Vec::new(),
            TextOrList::Text(s) => vec![s],
            TextOrList::List(items) => items,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            TextOrList::Text(s) => s.trim().is_empty(),
            TextOrList::List(items) => items.is_empty(),
        }
    }
}

impl Default for TextOrList {
    fn default() -> Self {
        TextOrList::List(Vec::new())
    }
}

/// 终止报告：final_answer 的产出，直接返回给调用方，不再回喂 Oracle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub introduction: String,
    pub research_steps: TextOrList,
    pub main_body: String,
    pub conclusion: String,
    pub sources: TextOrList,
}

fn or_na(s: &str) -> &str {
    if s.trim().is_empty() {
        "N/A"
    } else {
        s
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "INTRODUCTION\n------------\n{}\n", or_na(&self.introduction))?;
        writeln!(f, "RESEARCH STEPS\n--------------\n{}\n", or_na(&self.research_steps.render()))?;
        writeln!(f, "REPORT\n------\n{}\n", or_na(&self.main_body))?;
        writeln!(f, "CONCLUSION\n----------\n{}\n", or_na(&self.conclusion))?;
        write!(f, "SOURCES\n-------\n{}", or_na(&self.sources.render()))
    }
}

/// 结果条目
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultItem {
    Passage(Passage),
    Paper(Paper),
    WebPage(WebPage),
    Report(Report),
    /// 合成的说明条目（如「没有找到结果」）
    Notice { message: String },
}

impl ResultItem {
    /// 可引用的来源描述；Notice / Report 没有
    pub fn reference(&self) -> Option<String> {
        match self {
            ResultItem::Passage(p) => match (&p.title, &p.source, &p.paper_id) {
                (Some(t), Some(s), _) => Some(format!("{} ({})", t, s)),
                (Some(t), None, Some(id)) => Some(format!("{} (arXiv:{})", t, id)),
                (Some(t), None, None) => Some(t.clone()),
                (None, Some(s), _) => Some(s.clone()),
                (None, None, Some(id)) => Some(format!("arXiv:{}", id)),
                (None, None, None) => None,
            },
            ResultItem::Paper(p) => Some(format!("{} (arXiv:{}) {}", p.title.trim(), p.arxiv_id, p.abs_url)),
            ResultItem::WebPage(w) => Some(format!("{} ({})", w.title, w.link)),
            ResultItem::Report(_) | ResultItem::Notice { .. } => None,
        }
    }

    /// 引用去重用的键（标题优先）
    pub fn reference_key(&self) -> Option<String> {
        match self {
            ResultItem::Passage(p) => p
                .title
                .clone()
                .or_else(|| p.source.clone())
                .or_else(|| p.paper_id.clone()),
            ResultItem::Paper(p) => Some(p.title.trim().to_string()),
            ResultItem::WebPage(w) => Some(w.title.clone()),
            _ => None,
        }
        .map(|k| k.to_lowercase())
    }
}

/// 工具统一输出
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool: ToolKind,
    pub success: bool,
    pub results: Vec<ResultItem>,
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 非对象的 metadata 包一层，保证 metadata 总是映射
fn into_map(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(m) => m,
        Value::Null => Map::new(),
        other => {
            let mut m = Map::new();
            m.insert("arguments".to_string(), other);
            m
        }
    }
}

impl ToolOutput {
    pub fn success(tool: ToolKind, results: Vec<ResultItem>, metadata: Value) -> Self {
        Self {
            tool,
            success: true,
            results,
            metadata: into_map(metadata),
            error: None,
        }
    }

    pub fn failure(tool: ToolKind, metadata: Value, error: impl Into<String>) -> Self {
        Self {
            tool,
            success: false,
            results: Vec::new(),
            metadata: into_map(metadata),
            error: Some(error.into()),
        }
    }

    /// 成功但没有结果：附一条说明，让 Oracle 区分「没找到」与「失败」
    pub fn empty(tool: ToolKind, metadata: Value, message: impl Into<String>) -> Self {
        Self::success(
            tool,
            vec![ResultItem::Notice {
                message: message.into(),
            }],
            metadata,
        )
    }

    /// final_answer 的报告（其他工具为 None）
    pub fn report(&self) -> Option<&Report> {
        self.results.iter().find_map(|item| match item {
            ResultItem::Report(r) => Some(r),
            _ => None,
        })
    }

    /// 真正的证据条数（不含 Notice）
    pub fn evidence_count(&self) -> usize {
        self.results
            .iter()
            .filter(|i| !matches!(i, ResultItem::Notice { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_has_empty_results_and_error() {
        let out = ToolOutput::failure(ToolKind::RagSearch, json!({"query": "q"}), "index down");
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["results"], json!([]));
        assert_eq!(v["error"], "index down");
        assert_eq!(v["tool"], "rag_search");
        assert_eq!(v["metadata"]["query"], "q");
    }

    #[test]
    fn test_success_omits_error() {
        let out = ToolOutput::empty(ToolKind::WebSearch, json!({"query": "q"}), "No results found.");
        let v = serde_json::to_value(&out).unwrap();
        assert!(v.get("error").is_none());
        assert_eq!(v["results"][0]["kind"], "notice");
        assert_eq!(out.evidence_count(), 0);
    }

    #[test]
    fn test_metadata_always_a_map() {
        let out = ToolOutput::failure(ToolKind::FetchArxiv, json!("raw"), "bad");
        assert_eq!(out.metadata.get("arguments"), Some(&json!("raw")));
        let out = ToolOutput::failure(ToolKind::FetchArxiv, Value::Null, "bad");
        assert!(out.metadata.is_empty());
    }

    #[test]
    fn test_passage_reference_variants() {
        let full = ResultItem::Passage(Passage {
            content: "c".into(),
            title: Some("A".into()),
            source: Some("a.pdf".into()),
            paper_id: Some("1".into()),
        });
        assert_eq!(full.reference().as_deref(), Some("A (a.pdf)"));
        assert_eq!(full.reference_key().as_deref(), Some("a"));

        let id_only = ResultItem::Passage(Passage {
            content: "c".into(),
            title: None,
            source: None,
            paper_id: Some("2006.11239".into()),
        });
        assert_eq!(id_only.reference().as_deref(), Some("arXiv:2006.11239"));
        assert!(ResultItem::Notice { message: "x".into() }.reference().is_none());
    }

    #[test]
    fn test_report_display_sections() {
        let report = Report {
            introduction: "Intro".into(),
            research_steps: TextOrList::List(vec!["searched".into(), "read".into()]),
            main_body: "Body".into(),
            conclusion: String::new(),
            sources: TextOrList::Text("one source".into()),
        };
        let text = report.to_string();
        assert!(text.starts_with("INTRODUCTION\n------------\nIntro"));
        assert!(text.contains("- searched\n- read"));
        assert!(text.contains("CONCLUSION\n----------\nN/A"));
        assert!(text.ends_with("SOURCES\n-------\none source"));
    }

    #[test]
    fn test_text_or_list_deserializes_both() {
        let t: TextOrList = serde_json::from_value(json!("a")).unwrap();
        assert_eq!(t, TextOrList::Text("a".into()));
        let l: TextOrList = serde_json::from_value(json!(["a", "b"])).unwrap();
        assert_eq!(l.into_list(), vec!["a".to_string(), "b".to_string()]);
        assert!(TextOrList::Text("  ".into()).into_list().is_empty());
    }
}
