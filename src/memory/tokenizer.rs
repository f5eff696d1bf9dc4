//! Token 计数与分词
//!
//! - `Tokenizer`：按模型名计数 token 的外部协作者接口；默认实现为中英文混合启发式估算。
//! - `model_token_limit`：模型上下文上限表，未知模型回退 4096。
//! - `segment` / `jaccard_similarity`：知识库关键词检索用的 jieba 分词。

use std::collections::HashSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;

/// 未知模型的默认上下文上限
pub const DEFAULT_TOKEN_LIMIT: usize = 4096;

/// 模型上下文上限（token）
pub fn model_token_limit(model: &str) -> usize {
    match model {
        "gpt-3.5-turbo" => 4096,
        "gpt-4" => 8192,
        "gpt-4-32k" => 32768,
        "gpt-4o" | "gpt-4o-mini" => 128_000,
        _ => DEFAULT_TOKEN_LIMIT,
    }
}

/// Token 计数接口（按模型名参数化）
pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str, model: &str) -> usize;
}

/// 启发式估算：英文约 4 字符/token，CJK 约 1.5 字符/token。
/// 不区分模型编码，作为所有模型的默认编码使用。
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicTokenizer;

impl HeuristicTokenizer {
    pub fn estimate(text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let (ascii, non_ascii) = text.chars().fold((0usize, 0usize), |(a, n), c| {
            if c.is_ascii() {
                (a + 1, n)
            } else {
                (a, n + 1)
            }
        });
        let tokens = ascii.div_ceil(4) + (non_ascii as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }
}

impl Tokenizer for HeuristicTokenizer {
    fn count(&self, text: &str, _model: &str) -> usize {
        Self::estimate(text)
    }
}

static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |
        '\u{3400}'..='\u{4DBF}' |
        '\u{F900}'..='\u{FAFF}' |
        '\u{3040}'..='\u{309F}' |
        '\u{30A0}'..='\u{30FF}'
    )
}

pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

/// 分词为小写词集合：含 CJK 时走 jieba 搜索引擎模式，否则按空白切分
pub fn segment(text: &str) -> HashSet<String> {
    let text = text.trim();
    if text.is_empty() {
        return HashSet::new();
    }
    if contains_cjk(text) {
        jieba()
            .cut_for_search(text, true)
            .into_iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| s.chars().count() > 1 || s.chars().next().is_some_and(is_cjk))
            .collect()
    } else {
        text.split_whitespace()
            .map(|s| {
                s.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|s| s.len() > 1)
            .collect()
    }
}

/// Jaccard 相似度
pub fn jaccard_similarity(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_token_limit_table() {
        assert_eq!(model_token_limit("gpt-3.5-turbo"), 4096);
        assert_eq!(model_token_limit("gpt-4"), 8192);
        assert_eq!(model_token_limit("gpt-4-32k"), 32768);
        assert_eq!(model_token_limit("some-unknown-model"), DEFAULT_TOKEN_LIMIT);
    }

    #[test]
    fn test_estimate_english() {
        let text = "Hello, world! This is a test.";
        let tokens = HeuristicTokenizer.count(text, "gpt-4");
        assert!(tokens > 0);
        assert!(tokens < text.len());
    }

    #[test]
    fn test_estimate_chinese_denser_than_ascii() {
        let zh = HeuristicTokenizer::estimate("我想去台中玩三天");
        let en = HeuristicTokenizer::estimate("abcdefgh");
        assert!(zh > en);
    }

    #[test]
    fn test_estimate_empty_is_zero() {
        assert_eq!(HeuristicTokenizer::estimate(""), 0);
    }

    #[test]
    fn test_segment_chinese() {
        let words = segment("推薦適合初學者的日本滑雪場");
        assert!(!words.is_empty());
    }

    #[test]
    fn test_segment_english_strips_punctuation() {
        let words = segment("Ski resorts, Japan!");
        assert!(words.contains("ski"));
        assert!(words.contains("japan"));
    }

    #[test]
    fn test_jaccard() {
        let a = segment("hot spring resort");
        let b = segment("hot spring hotel");
        let sim = jaccard_similarity(&a, &b);
        assert!(sim > 0.0 && sim < 1.0);
        assert_eq!(jaccard_similarity(&a, &HashSet::new()), 0.0);
    }
}
