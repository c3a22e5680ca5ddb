//! 内存向量库：文档分块、向量化存储与余弦检索
//!
//! 供离线运行（vector_store.backend = "memory"）与测试使用；启动时可从 JSON 语料文件
//! 载入论文全文，分块后写入。检索接口与 Pinecone 后端一致（VectorStore）。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::llm::EmbeddingProvider;
use crate::memory::{Document, MetadataFilter, VectorStore, VectorStoreError};

/// 同时进行的嵌入请求数
const EMBED_CONCURRENCY: usize = 4;

/// 分块策略
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// 目标块大小（字符数）
    pub chunk_size: usize,
    /// 块之间的重叠（字符数）
    pub chunk_overlap: usize,
    /// 分隔符优先级（从高到低）
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            separators: vec![
                "\n\n".to_string(),
                "\n".to_string(),
                ". ".to_string(),
                "? ".to_string(),
                "! ".to_string(),
                " ".to_string(),
            ],
        }
    }
}

/// 文档分块器
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// 将文本分割为块（UTF-8 安全），优先在分隔符处断开
    pub fn split(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let chars: Vec<char> = text.chars().collect();
        let total_chars = chars.len();
        let chunk_size = self.config.chunk_size.max(1);

        let mut current_idx = 0;
        while current_idx < total_chars {
            let target_end = (current_idx + chunk_size).min(total_chars);
            let mut actual_end = target_end;

            if target_end < total_chars {
                let slice: String = chars[current_idx..target_end].iter().collect();
                for sep in &self.config.separators {
                    if let Some(pos) = slice.rfind(sep.as_str()) {
                        let chars_to_sep = slice[..pos].chars().count() + sep.chars().count();
                        if chars_to_sep > 0 {
                            actual_end = current_idx + chars_to_sep;
                            break;
                        }
                    }
                }
            }

            // 确保至少前进一个字符
            if actual_end <= current_idx {
                actual_end = (current_idx + 1).min(total_chars);
            }

            let chunk_text: String = chars[current_idx..actual_end].iter().collect();
            let trimmed = chunk_text.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }

            if actual_end >= total_chars {
                break;
            }
            let overlap = self.config.chunk_overlap.min(actual_end - current_idx);
            let next_start = actual_end.saturating_sub(overlap);
            current_idx = if next_start > current_idx {
                next_start
            } else {
                actual_end
            };
        }

        chunks
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

/// 语料文件中的一篇论文
#[derive(Debug, Clone, Deserialize)]
pub struct CorpusPaper {
    pub arxiv_id: String,
    pub title: String,
    #[serde(default)]
    pub source: Option<String>,
    pub text: String,
}

/// 内存向量库：(文档, 向量)，超过 max_entries 时丢弃最旧的
pub struct InMemoryVectorStore {
    entries: RwLock<Vec<(Document, Vec<f32>)>>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Chunker,
    max_entries: usize,
    /// 论文 id 写入的元数据键，须与 rag_search_filter 过滤的字段一致
    id_field: String,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            embedder,
            chunker: Chunker::default(),
            max_entries,
            id_field: "arxiv_id".to_string(),
        }
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn with_chunking_config(mut self, config: ChunkingConfig) -> Self {
        self.chunker = Chunker::new(config);
        self
    }

    /// 批量写入文档（并发嵌入）；返回成功写入的条数，嵌入失败的文档被跳过
    pub async fn add_documents(&self, docs: Vec<Document>) -> usize {
        let embedder = self.embedder.clone();
        let embedded: Vec<(Document, Vec<f32>)> = stream::iter(docs)
            .map(|doc| {
                let embedder = embedder.clone();
                async move {
                    match embedder.embed(&doc.content).await {
                        Ok(v) if !v.is_empty() => Some((doc, v)),
                        Ok(_) => None,
                        Err(e) => {
                            tracing::warn!(error = %e, "embedding failed, chunk skipped");
                            None
                        }
                    }
                }
            })
            .buffered(EMBED_CONCURRENCY)
            .filter_map(|x| async move { x })
            .collect()
            .await;

        let added = embedded.len();
        let mut entries = self.entries.write().await;
        entries.extend(embedded);
        if entries.len() > self.max_entries {
            let excess = entries.len() - self.max_entries;
            entries.drain(..excess);
        }
        added
    }

    /// 分块并写入一篇论文；每块带 title / source 以及 id_field 键下的论文 id
    pub async fn index_paper(&self, paper: &CorpusPaper) -> usize {
        let source = paper
            .source
            .clone()
            .unwrap_or_else(|| format!("https://arxiv.org/abs/{}", paper.arxiv_id));
        let docs: Vec<Document> = self
            .chunker
            .split(&paper.text)
            .into_iter()
            .map(|chunk| {
                Document::new(chunk)
                    .with_metadata("title", paper.title.clone())
                    .with_metadata("source", source.clone())
                    .with_metadata(self.id_field.clone(), paper.arxiv_id.clone())
            })
            .collect();
        self.add_documents(docs).await
    }

    /// 从 JSON 语料文件（CorpusPaper 数组）载入
    pub async fn load_corpus(&self, path: &Path) -> Result<usize, VectorStoreError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| VectorStoreError::Decode(format!("{}: {}", path.display(), e)))?;
        let papers: Vec<CorpusPaper> = serde_json::from_str(&raw)
            .map_err(|e| VectorStoreError::Decode(format!("{}: {}", path.display(), e)))?;
        let mut total = 0;
        for paper in &papers {
            total += self.index_paper(paper).await;
        }
        tracing::info!(papers = papers.len(), chunks = total, "corpus loaded");
        Ok(total)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Document>, VectorStoreError> {
        let query_embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(VectorStoreError::Embedding)?;
        if query_embedding.is_empty() {
            return Ok(Vec::new());
        }

        let entries = self.entries.read().await;
        let mut scored: Vec<(f32, &Document)> = entries
            .iter()
            .filter(|(doc, _)| filter.map_or(true, |f| f.matches(&doc.metadata)))
            .map(|(doc, emb)| (cosine_similarity(&query_embedding, emb), doc))
            .filter(|(score, _)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    fn backend(&self) -> &str {
        "memory"
    }
}

/// 余弦相似度
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 词袋哈希嵌入：同词的文本向量方向相近
    struct BagOfWords;

    #[async_trait]
    impl EmbeddingProvider for BagOfWords {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, String> {
            let mut v = vec![0.0f32; 32];
            for w in text.split_whitespace() {
                let h = w
                    .to_lowercase()
                    .bytes()
                    .fold(7usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
                v[h % 32] += 1.0;
            }
            Ok(v)
        }
    }

    #[test]
    fn test_chunker_respects_size_and_overlap() {
        let chunker = Chunker::new(ChunkingConfig {
            chunk_size: 40,
            chunk_overlap: 10,
            ..Default::default()
        });
        let text = "Diffusion models add noise. They learn to denoise. Sampling reverses the process step by step.";
        let chunks = chunker.split(text);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 40);
            assert!(!c.is_empty());
        }
    }

    #[test]
    fn test_chunker_empty_text() {
        assert!(Chunker::default().split("").is_empty());
        assert!(Chunker::default().split("   ").is_empty());
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.001);
        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_index_and_filtered_search() {
        let store = InMemoryVectorStore::new(Arc::new(BagOfWords), 100);
        let a = CorpusPaper {
            arxiv_id: "2006.11239".into(),
            title: "Denoising Diffusion Probabilistic Models".into(),
            source: None,
            text: "diffusion models denoise images with a learned reverse process".into(),
        };
        let b = CorpusPaper {
            arxiv_id: "1706.03762".into(),
            title: "Attention Is All You Need".into(),
            source: Some("attention.pdf".into()),
            text: "transformers use attention instead of recurrence".into(),
        };
        assert_eq!(store.index_paper(&a).await, 1);
        assert_eq!(store.index_paper(&b).await, 1);
        assert_eq!(store.len().await, 2);

        let hits = store.similarity_search("diffusion models", 5, None).await.unwrap();
        assert_eq!(hits[0].title(), Some("Denoising Diffusion Probabilistic Models"));
        assert_eq!(hits[0].source(), Some("https://arxiv.org/abs/2006.11239"));

        let filter = MetadataFilter::eq("arxiv_id", "1706.03762");
        let hits = store
            .similarity_search("attention transformers", 5, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source(), Some("attention.pdf"));
    }

    #[tokio::test]
    async fn test_custom_id_field_is_filterable() {
        let store = InMemoryVectorStore::new(Arc::new(BagOfWords), 100).with_id_field("paper_id");
        store
            .index_paper(&CorpusPaper {
                arxiv_id: "2006.11239".into(),
                title: "Denoising Diffusion Probabilistic Models".into(),
                source: None,
                text: "diffusion models denoise images".into(),
            })
            .await;

        let hits = store
            .similarity_search("diffusion", 5, Some(&MetadataFilter::eq("paper_id", "2006.11239")))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        let hits = store
            .similarity_search("diffusion", 5, Some(&MetadataFilter::eq("arxiv_id", "2006.11239")))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_max_entries_drops_oldest() {
        let store = InMemoryVectorStore::new(Arc::new(BagOfWords), 2);
        let docs = vec![
            Document::new("first doc"),
            Document::new("second doc"),
            Document::new("third doc"),
        ];
        assert_eq!(store.add_documents(docs).await, 3);
        assert_eq!(store.len().await, 2);
        let hits = store.similarity_search("first", 5, None).await.unwrap();
        assert!(hits.iter().all(|d| d.content != "first doc"));
    }
}
