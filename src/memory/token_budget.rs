//! Token 预算控制
//!
//! 固定前缀（system 指令 + 上下文块）必留并先计费；历史消息从新到旧累加，
//! 第一条放不下时停止并在前缀后插入一条省略标记。省略标记本身的开销也计入上限，
//! 放不下时从最旧的已选消息开始让位，保证总量不超过上限。

use crate::core::AgentError;
use crate::memory::tokenizer::{model_token_limit, Tokenizer};
use crate::memory::Message;

/// 插入到前缀之后的省略标记内容
pub const ELISION_MARKER: &str = "（部分對話已省略）";

/// 组装结果（消息按时间顺序：前缀 → 省略标记（可选）→ 保留的历史）
#[derive(Debug, Clone)]
pub struct BudgetedPrompt {
    pub messages: Vec<Message>,
    pub total_tokens: usize,
    /// 被省略的历史消息条数
    pub elided: usize,
    pub ceiling: usize,
}

impl BudgetedPrompt {
    pub fn has_marker(&self) -> bool {
        self.messages
            .get(2)
            .is_some_and(|m| m.content == ELISION_MARKER)
    }
}

/// Token 预算器：按模型名查上限（可被配置覆盖）并用 Tokenizer 计费
pub struct TokenBudgeter<'a> {
    tokenizer: &'a dyn Tokenizer,
    model: String,
    ceiling: usize,
}

impl<'a> TokenBudgeter<'a> {
    /// 上限取模型表中的值，未知模型回退默认上限
    pub fn new(tokenizer: &'a dyn Tokenizer, model: impl Into<String>) -> Self {
        let model = model.into();
        let ceiling = model_token_limit(&model);
        Self {
            tokenizer,
            model,
            ceiling,
        }
    }

    pub fn with_ceiling(mut self, ceiling: usize) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    fn cost(&self, message: &Message) -> usize {
        self.tokenizer.count(&message.content, &self.model)
    }

    /// 组装一次模型调用的消息序列
    pub fn assemble(
        &self,
        prefix: [Message; 2],
        history: &[Message],
    ) -> Result<BudgetedPrompt, AgentError> {
        let prefix_cost: usize = prefix.iter().map(|m| self.cost(m)).sum();
        if prefix_cost > self.ceiling {
            return Err(AgentError::BudgetExhausted {
                required: prefix_cost,
                ceiling: self.ceiling,
            });
        }

        let mut total = prefix_cost;
        // (下标, 开销)，按从新到旧的顺序收集
        let mut kept: Vec<(usize, usize)> = Vec::new();
        let mut overflowed = false;
        for (idx, msg) in history.iter().enumerate().rev() {
            let cost = self.cost(msg);
            if total + cost > self.ceiling {
                overflowed = true;
                break;
            }
            total += cost;
            kept.push((idx, cost));
        }

        let mut with_marker = false;
        if overflowed {
            let marker_cost = self.cost(&Message::system(ELISION_MARKER));
            while total + marker_cost > self.ceiling {
                match kept.pop() {
                    Some((_, cost)) => total -= cost,
                    None => break,
                }
            }
            if total + marker_cost <= self.ceiling {
                total += marker_cost;
                with_marker = true;
            } else {
                tracing::warn!(
                    ceiling = self.ceiling,
                    prefix_cost,
                    "elision marker does not fit after prefix, omitting it"
                );
            }
        }

        let elided = history.len() - kept.len();
        let mut messages = Vec::with_capacity(kept.len() + 3);
        messages.extend(prefix);
        if with_marker {
            messages.push(Message::system(ELISION_MARKER));
        }
        messages.extend(kept.iter().rev().map(|(idx, _)| history[*idx].clone()));

        tracing::debug!(
            model = %self.model,
            ceiling = self.ceiling,
            total_tokens = total,
            elided,
            "prompt assembled"
        );

        Ok(BudgetedPrompt {
            messages,
            total_tokens: total,
            elided,
            ceiling: self.ceiling,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HeuristicTokenizer;
    use proptest::prelude::*;

    /// 测试用：每个字符 1 token
    struct CharTokenizer;

    impl Tokenizer for CharTokenizer {
        fn count(&self, text: &str, _model: &str) -> usize {
            text.chars().count()
        }
    }

    fn text_of(len: usize, c: char) -> String {
        std::iter::repeat(c).take(len).collect()
    }

    fn prefix(each: usize) -> [Message; 2] {
        [
            Message::system(text_of(each, 's')),
            Message::user(text_of(each, 'c')),
        ]
    }

    #[test]
    fn test_keeps_three_newest_with_marker() {
        // 前缀 300，上限 500，10 条历史各 50
        let history: Vec<Message> = (0..10)
            .map(|i| Message::user(format!("{:0>50}", i)))
            .collect();
        let budgeter = TokenBudgeter::new(&CharTokenizer, "gpt-3.5-turbo").with_ceiling(500);
        let out = budgeter.assemble(prefix(150), &history).unwrap();

        assert_eq!(out.messages.len(), 2 + 1 + 3);
        assert_eq!(out.messages[0].content, text_of(150, 's'));
        assert_eq!(out.messages[1].content, text_of(150, 'c'));
        assert!(out.has_marker());
        assert_eq!(out.messages[3].content, history[7].content);
        assert_eq!(out.messages[5].content, history[9].content);
        assert_eq!(out.elided, 7);
        assert!(out.total_tokens <= 500);
    }

    #[test]
    fn test_everything_fits_without_marker() {
        let history = vec![Message::user("hello"), Message::assistant("hi there")];
        let budgeter = TokenBudgeter::new(&CharTokenizer, "gpt-4");
        let out = budgeter.assemble(prefix(10), &history).unwrap();
        assert_eq!(out.messages.len(), 4);
        assert!(!out.has_marker());
        assert_eq!(out.elided, 0);
        assert_eq!(out.messages[2], history[0]);
        assert_eq!(out.messages[3], history[1]);
    }

    #[test]
    fn test_prefix_over_ceiling_is_budget_exhausted() {
        let budgeter = TokenBudgeter::new(&CharTokenizer, "gpt-4").with_ceiling(100);
        let err = budgeter.assemble(prefix(60), &[]).unwrap_err();
        assert_eq!(
            err,
            AgentError::BudgetExhausted {
                required: 120,
                ceiling: 100
            }
        );
    }

    #[test]
    fn test_marker_omitted_when_it_cannot_fit() {
        // 前缀恰好占满上限，历史一条都放不下，标记也放不下
        let budgeter = TokenBudgeter::new(&CharTokenizer, "gpt-4").with_ceiling(20);
        let out = budgeter
            .assemble(prefix(10), &[Message::user("overflow")])
            .unwrap();
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.elided, 1);
        assert_eq!(out.total_tokens, 20);
    }

    #[test]
    fn test_unknown_model_uses_default_ceiling() {
        let budgeter = TokenBudgeter::new(&HeuristicTokenizer, "my-local-model");
        assert_eq!(budgeter.ceiling(), 4096);
    }

    proptest! {
        #[test]
        fn assembled_prompt_never_exceeds_ceiling(
            prefix_len in 0usize..200,
            lens in prop::collection::vec(0usize..120, 0..30),
            ceiling in 0usize..800,
        ) {
            let history: Vec<Message> = lens.iter().map(|l| Message::user(text_of(*l, 'h'))).collect();
            let budgeter = TokenBudgeter::new(&CharTokenizer, "gpt-4").with_ceiling(ceiling);
            let pfx = prefix(prefix_len);
            match budgeter.assemble(pfx.clone(), &history) {
                Ok(out) => {
                    let cost: usize = out.messages.iter().map(|m| m.content.chars().count()).sum();
                    prop_assert!(cost <= ceiling);
                    prop_assert_eq!(cost, out.total_tokens);
                    prop_assert_eq!(&out.messages[0], &pfx[0]);
                    prop_assert_eq!(&out.messages[1], &pfx[1]);
                    let kept = out.messages.len() - 2 - usize::from(out.has_marker());
                    prop_assert_eq!(kept + out.elided, history.len());
                    // 保留的是最新的一段，且顺序不变
                    let tail = &history[history.len() - kept..];
                    prop_assert_eq!(&out.messages[out.messages.len() - kept..], tail);
                }
                Err(AgentError::BudgetExhausted { required, .. }) => {
                    prop_assert!(required > ceiling);
                }
                Err(other) => prop_assert!(false, "unexpected error {other:?}"),
            }
        }
    }
}
