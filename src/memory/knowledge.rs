//! 知识库检索
//!
//! `KnowledgeBase::search(query, k)` 返回带相关度分数的文档；推荐阶段把结果格式化进上下文块。
//! `InMemoryKnowledge` 用 jieba 分词后的词集合做 Jaccard 打分，低于阈值的结果丢弃；
//! 启动时可从目录载入 `.txt` / `.md` 文件，按段落与句末标点切块后逐块入库。

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::memory::tokenizer::{jaccard_similarity, segment};

/// 单篇文档最多展示的字符数
pub const MAX_DOC_CHARS: usize = 400;
/// 文档段总字符上限
pub const MAX_DOCUMENTS_CHARS: usize = 1200;
pub const NO_DOCUMENTS_PLACEHOLDER: &str = "（目前無相關文件，請用通用知識回答）";

/// 切块时优先断开的位置（从高到低）
const SEPARATORS: &[&str] = &["\n\n", "\n", "。", ". ", "！", "？", "! ", "? ", " "];

/// 切块参数（字符数）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

/// 把文本切成不超过 `chunk_size` 字的块，相邻块重叠 `chunk_overlap` 字；
/// 尽量在分隔符处断开，每一步至少前进一个字（UTF-8 安全）
pub fn chunk_text(text: &str, opts: ChunkOptions) -> Vec<String> {
    let size = opts.chunk_size.max(1);
    let overlap = opts.chunk_overlap.min(size - 1);
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < total {
        let target = (start + size).min(total);
        let mut end = target;
        if target < total {
            let window: String = chars[start..target].iter().collect();
            for sep in SEPARATORS {
                if let Some(pos) = window.rfind(sep) {
                    let cut = window[..pos].chars().count() + sep.chars().count();
                    if cut > overlap {
                        end = start + cut;
                        break;
                    }
                }
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }
        if end >= total {
            break;
        }
        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }
    chunks
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDoc {
    pub title: String,
    pub content: String,
    /// 相关度，越大越相关
    pub score: f32,
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Vec<RetrievedDoc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopKnowledge;

#[async_trait]
impl KnowledgeBase for NoopKnowledge {
    async fn search(&self, _query: &str, _k: usize) -> Vec<RetrievedDoc> {
        Vec::new()
    }
}

struct Entry {
    title: String,
    content: String,
    words: std::collections::HashSet<String>,
}

pub struct InMemoryKnowledge {
    entries: RwLock<Vec<Entry>>,
    score_threshold: f32,
}

impl InMemoryKnowledge {
    pub fn new(score_threshold: f32) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            score_threshold,
        }
    }

    pub fn add(&self, title: impl Into<String>, content: impl Into<String>) {
        let title = title.into();
        let content = content.into();
        let words = segment(&format!("{title} {content}"));
        if let Ok(mut entries) = self.entries.write() {
            entries.push(Entry {
                title,
                content,
                words,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 载入目录下的 `.txt` / `.md` 文件（不递归，按文件名排序），返回新增的块数。
    /// 目录不可读返回 ConfigError；单个文件读不了只记日志
    pub fn load_dir(&self, dir: &Path, opts: ChunkOptions) -> Result<usize, AgentError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| AgentError::ConfigError(format!("knowledge dir {}: {e}", dir.display())))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && matches!(p.extension().and_then(|x| x.to_str()), Some("txt" | "md"))
            })
            .collect();
        files.sort();

        let mut added = 0usize;
        for path in files {
            let text = match std::fs::read_to_string(&path) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable knowledge file");
                    continue;
                }
            };
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("document")
                .to_string();
            let chunks = chunk_text(&text, opts);
            let numbered = chunks.len() > 1;
            for (idx, chunk) in chunks.into_iter().enumerate() {
                let title = if numbered {
                    format!("{stem} #{}", idx + 1)
                } else {
                    stem.clone()
                };
                self.add(title, chunk);
                added += 1;
            }
        }
        tracing::info!(dir = %dir.display(), chunks = added, "knowledge documents loaded");
        Ok(added)
    }
}

#[async_trait]
impl KnowledgeBase for InMemoryKnowledge {
    async fn search(&self, query: &str, k: usize) -> Vec<RetrievedDoc> {
        let query_words = segment(query);
        if query_words.is_empty() || k == 0 {
            return Vec::new();
        }
        let Ok(entries) = self.entries.read() else {
            return Vec::new();
        };
        let mut hits: Vec<RetrievedDoc> = entries
            .iter()
            .map(|e| (e, jaccard_similarity(&query_words, &e.words)))
            .filter(|(_, score)| *score > 0.0 && *score >= self.score_threshold)
            .map(|(e, score)| RetrievedDoc {
                title: e.title.clone(),
                content: e.content.clone(),
                score,
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        hits
    }
}

/// 格式化检索结果：按分数从高到低，单篇截断到 400 字，总长超过 1200 字时停止并注明
pub fn format_documents(docs: &[RetrievedDoc]) -> String {
    if docs.is_empty() {
        return NO_DOCUMENTS_PLACEHOLDER.to_string();
    }
    let mut sorted: Vec<&RetrievedDoc> = docs.iter().collect();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut parts: Vec<String> = Vec::new();
    let mut total = 0usize;
    for (idx, doc) in sorted.iter().enumerate() {
        let title = if doc.title.trim().is_empty() {
            format!("document{}", idx + 1)
        } else {
            doc.title.trim().to_string()
        };
        let content = doc.content.trim();
        let content = if content.chars().count() > MAX_DOC_CHARS {
            format!(
                "{}...content too long, truncated.",
                content.chars().take(MAX_DOC_CHARS).collect::<String>()
            )
        } else {
            content.to_string()
        };
        let text = format!("【{}】(score={:.3})\n{}\n---", title, doc.score, content);
        let len = text.chars().count();
        if total + len > MAX_DOCUMENTS_CHARS {
            parts.push("...additional content truncated due to length limit.".to_string());
            break;
        }
        total += len;
        parts.push(text);
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_search_ranks_by_overlap() {
        let kb = InMemoryKnowledge::new(0.0);
        kb.add("台中美食", "逢甲夜市 宮原眼科 第四信用合作社 台中 美食");
        kb.add("北海道滑雪", "二世谷 富良野 滑雪 初學者");
        let hits = kb.search("台中 美食 推薦", 3).await;
        assert!(!hits.is_empty());
        assert_eq!(hits[0].title, "台中美食");
        assert!(kb.search("", 3).await.is_empty());
    }

    #[tokio::test]
    async fn test_threshold_filters() {
        let kb = InMemoryKnowledge::new(0.99);
        kb.add("a", "hot spring resort");
        assert!(kb.search("hot spring hotel", 3).await.is_empty());
    }

    #[test]
    fn test_chunk_text_overlaps_and_prefers_separators() {
        let opts = ChunkOptions {
            chunk_size: 500,
            chunk_overlap: 50,
        };
        let chunks = chunk_text(&"景".repeat(1200), opts);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 500);
        assert_eq!(chunks[2].chars().count(), 300);

        let opts = ChunkOptions {
            chunk_size: 5,
            chunk_overlap: 0,
        };
        assert_eq!(chunk_text("第一段。第二段。", opts), vec!["第一段。", "第二段。"]);
        assert!(chunk_text("   ", opts).is_empty());
    }

    #[test]
    fn test_chunk_text_degenerate_options_terminate() {
        let opts = ChunkOptions {
            chunk_size: 0,
            chunk_overlap: 10,
        };
        assert_eq!(chunk_text("abc", opts), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_load_dir_indexes_text_and_markdown() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("taichung.txt"), "台中 美食 逢甲夜市 宮原眼科").unwrap();
        std::fs::write(dir.path().join("hokkaido.md"), "北海道 滑雪 二世谷").unwrap();
        std::fs::write(dir.path().join("ignored.json"), "{}").unwrap();

        let kb = InMemoryKnowledge::new(0.0);
        let added = kb.load_dir(dir.path(), ChunkOptions::default()).unwrap();
        assert_eq!(added, 2);
        let hits = kb.search("台中 美食", 3).await;
        assert_eq!(hits[0].title, "taichung");
        assert!(hits[0].content.contains("逢甲夜市"));
    }

    #[test]
    fn test_load_dir_missing_is_config_error() {
        let kb = InMemoryKnowledge::new(0.0);
        let err = kb
            .load_dir(Path::new("/nonexistent/tripmate-kb"), ChunkOptions::default())
            .unwrap_err();
        assert!(matches!(err, AgentError::ConfigError(_)));
    }

    #[test]
    fn test_format_documents_limits() {
        assert_eq!(format_documents(&[]), NO_DOCUMENTS_PLACEHOLDER);

        let long = "景".repeat(1000);
        let docs = vec![
            RetrievedDoc { title: "low".into(), content: "x".into(), score: 0.1 },
            RetrievedDoc { title: "high".into(), content: long.clone(), score: 0.9 },
            RetrievedDoc { title: "mid".into(), content: long.clone(), score: 0.5 },
            RetrievedDoc { title: "mid2".into(), content: long, score: 0.4 },
        ];
        let text = format_documents(&docs);
        assert!(text.starts_with("【high】"));
        assert!(text.contains("content too long, truncated."));
        assert!(text.ends_with("...additional content truncated due to length limit."));
        assert!(!text.contains("【low】"));
    }
}
