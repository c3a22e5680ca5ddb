//! final_answer：把 Oracle 给出的五个字段组装为终止报告
//!
//! 字段缺失时取默认值；research_steps / sources 接受字符串或字符串列表。
//! 另外提供两个供 Engine 使用的辅助：从 trace 收集可引用来源，以及在强制收尾且 LLM 不可用时
//! 由 trace 合成降级报告的参数。

use std::collections::HashSet;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::ActionRecord;
use crate::tools::schema::args_schema;
use crate::tools::{Report, ResultItem, TextOrList, Tool, ToolKind, ToolOutput};

/// final_answer 参数
#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FinalAnswerArgs {
    /// Short introduction restating the research question.
    pub introduction: String,
    /// The research steps taken, as a list or a paragraph.
    #[schemars(with = "Vec<String>")]
    pub research_steps: TextOrList,
    /// The main body of the report (several paragraphs).
    pub main_body: String,
    /// Concluding summary.
    pub conclusion: String,
    /// Sources cited, as a list or a paragraph.
    #[schemars(with = "Vec<String>")]
    pub sources: TextOrList,
}

impl From<FinalAnswerArgs> for Report {
    fn from(a: FinalAnswerArgs) -> Self {
        Report {
            introduction: a.introduction,
            research_steps: a.research_steps,
            main_body: a.main_body,
            conclusion: a.conclusion,
            sources: a.sources,
        }
    }
}

/// 终止报告工具
#[derive(Debug, Default)]
pub struct FinalAnswerTool;

impl FinalAnswerTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for FinalAnswerTool {
    fn kind(&self) -> ToolKind {
        ToolKind::FinalAnswer
    }

    fn description(&self) -> &str {
        "Return the final research report to the user. Provide introduction, research_steps, \
         main_body, conclusion and sources. Use it once enough information has been gathered."
    }

    fn parameters_schema(&self) -> Value {
        let mut schema = args_schema::<FinalAnswerArgs>();
        schema["required"] = json!(["introduction", "research_steps", "main_body", "conclusion", "sources"]);
        schema
    }

    async fn execute(&self, args: Value) -> ToolOutput {
        let mut metadata = json!({});
        let report: Report = match serde_json::from_value::<FinalAnswerArgs>(args.clone()) {
            Ok(a) => a.into(),
            Err(e) => {
                // 报告无论如何都要产出：非对象参数原样作为正文
                tracing::warn!(error = %e, "final_answer arguments malformed, using raw text");
                metadata["malformed_arguments"] = json!(e.to_string());
                Report {
                    introduction: String::new(),
                    research_steps: TextOrList::default(),
                    main_body: match &args {
                        Value::String(s) => s.clone(),
                        Value::Null => String::new(),
                        other => other.to_string(),
                    },
                    conclusion: String::new(),
                    sources: TextOrList::default(),
                }
            }
        };
        metadata["source_count"] = json!(report.sources.clone().into_list().len());
        ToolOutput::success(self.kind(), vec![ResultItem::Report(report)], metadata)
    }
}

/// 可引用来源：key 用于去重（小写标题，缺标题时退回来源或论文 id），reference 为写进报告的文本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub key: String,
    pub reference: String,
}

/// 从已完成且成功的记录中收集来源引用（按出现顺序去重）
pub fn sources_from_trace<'a>(records: impl IntoIterator<Item = &'a ActionRecord>) -> Vec<Citation> {
    let mut seen = HashSet::new();
    let mut citations = Vec::new();
    for record in records {
        let Some(output) = record.result() else { continue };
        if !output.success {
            continue;
        }
        for item in &output.results {
            if let (Some(key), Some(reference)) = (item.reference_key(), item.reference()) {
                if seen.insert(key.clone()) {
                    citations.push(Citation { key, reference });
                }
            }
        }
    }
    citations
}

/// 把引用并入 final_answer 参数的 sources。
///
/// 空白条目丢弃；已有条目（忽略大小写与首尾空白）等于某条引用的 key 或完整引用文本时视为已引用，
/// 其余引用追加在后面。
pub fn merge_sources(arguments: &mut Value, citations: &[Citation]) {
    if citations.is_empty() {
        return;
    }
    let Value::Object(map) = arguments else { return };
    let existing: TextOrList = map
        .get("sources")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    let mut sources: Vec<String> = existing
        .into_list()
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .collect();
    let cited: HashSet<String> = sources.iter().map(|s| s.trim().to_lowercase()).collect();
    for citation in citations {
        let already = cited.contains(citation.key.trim())
            || cited.contains(&citation.reference.trim().to_lowercase());
        if !already {
            sources.push(citation.reference.clone());
        }
    }
    map.insert("sources".to_string(), json!(sources));
}

/// LLM 无法写报告时，由 trace 合成降级报告参数
pub fn fallback_arguments<'a>(
    question: &str,
    records: impl IntoIterator<Item = &'a ActionRecord> + Clone,
) -> Value {
    let mut steps = Vec::new();
    let mut findings = Vec::new();
    for record in records.clone() {
        let Some(output) = record.result() else { continue };
        if output.success {
            steps.push(format!(
                "{} with {} ({} results)",
                record.tool(),
                record.arguments(),
                output.evidence_count()
            ));
            for item in &output.results {
                let line = match item {
                    ResultItem::Passage(p) => p.content.chars().take(300).collect::<String>(),
                    ResultItem::Paper(p) => format!("{}: {}", p.title, p.summary.chars().take(300).collect::<String>()),
                    ResultItem::WebPage(w) => format!("{}: {}", w.title, w.snippet),
                    ResultItem::Report(_) | ResultItem::Notice { .. } => continue,
                };
                findings.push(format!("- {}", line.trim()));
            }
        } else {
            steps.push(format!(
                "{} failed: {}",
                record.tool(),
                output.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }
    let main_body = if findings.is_empty() {
        "No evidence could be gathered for this question.".to_string()
    } else {
        format!("Evidence gathered so far:\n{}", findings.join("\n"))
    };
    json!({
        "introduction": format!("This report addresses: {}", question),
        "research_steps": steps,
        "main_body": main_body,
        "conclusion": "The report was assembled automatically from the collected evidence because the research loop reached its limit.",
        "sources": sources_from_trace(records)
            .into_iter()
            .map(|c| c.reference)
            .collect::<Vec<_>>(),
    })
}
