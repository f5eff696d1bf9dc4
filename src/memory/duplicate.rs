//! 重复回复检测
//!
//! 只与上一条助手回复比较：两段文本分别嵌入后算余弦相似度，达到阈值即视为重复，
//! 由调用方改用「告知已完整回答 + 主动引导新主题」的指令重新生成。
//! 嵌入失败或超时按「不重复」处理，只记录日志。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::llm::EmbeddingProvider;

/// 默认相似度阈值
pub const DEFAULT_DUPLICATE_THRESHOLD: f32 = 0.9;

/// 余弦相似度；维度不一致或零向量返回 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())) as f32
}

/// 单次检测结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuplicateVerdict {
    /// 没有上一条回复或嵌入失败时为 None
    pub similarity: Option<f32>,
    pub duplicate: bool,
}

impl DuplicateVerdict {
    fn not_checked() -> Self {
        Self {
            similarity: None,
            duplicate: false,
        }
    }
}

pub struct DuplicateDetector {
    embedder: Arc<dyn EmbeddingProvider>,
    threshold: f32,
    timeout: Duration,
}

impl DuplicateDetector {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            threshold: DEFAULT_DUPLICATE_THRESHOLD,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// 按阈值分类（边界值算重复）
    pub fn classify(&self, similarity: f32) -> bool {
        similarity >= self.threshold
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        match timeout(self.timeout, self.embedder.embed(text.trim())).await {
            Ok(Ok(v)) => Some(v),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "embedding failed, skipping duplicate check");
                None
            }
            Err(_) => {
                tracing::warn!("embedding timed out, skipping duplicate check");
                None
            }
        }
    }

    pub async fn check(&self, candidate: &str, prior: Option<&str>) -> DuplicateVerdict {
        let Some(prior) = prior.filter(|p| !p.trim().is_empty()) else {
            return DuplicateVerdict::not_checked();
        };
        let Some(a) = self.embed(candidate).await else {
            return DuplicateVerdict::not_checked();
        };
        let Some(b) = self.embed(prior).await else {
            return DuplicateVerdict::not_checked();
        };
        let similarity = cosine_similarity(&a, &b);
        let duplicate = self.classify(similarity);
        if duplicate {
            tracing::info!(similarity, threshold = self.threshold, "duplicate reply detected");
        }
        DuplicateVerdict {
            similarity: Some(similarity),
            duplicate,
        }
    }
}
