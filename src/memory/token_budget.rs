//! Token 预算
//!
//! 按字符数估算 token，并在送往模型前从最旧的历史消息开始裁剪，使整体不超过预算。

use crate::memory::Message;

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本的 token 数量：英文约 4 字符/token，中文约 1.5 字符/token
    pub fn estimate(text: &str) -> usize {
        let mut ascii_chars = 0;
        let mut non_ascii_chars = 0;

        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        let tokens = ascii_chars / 4 + (non_ascii_chars as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }

    pub fn estimate_messages(messages: &[Message]) -> usize {
        messages.iter().map(|m| Self::estimate(&m.content)).sum()
    }
}

/// 在 `reserved` 已被占用的前提下，返回能放进 `budget` 的最近若干条历史（保持原顺序）
pub fn fit_history(history: &[Message], reserved: usize, budget: usize) -> Vec<Message> {
    let mut remaining = budget.saturating_sub(reserved);
    let mut kept = Vec::new();
    for msg in history.iter().rev() {
        let cost = TokenEstimator::estimate(&msg.content);
        if cost > remaining {
            break;
        }
        remaining -= cost;
        kept.push(msg.clone());
    }
    kept.reverse();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_ascii_and_cjk() {
        assert_eq!(TokenEstimator::estimate("abcdefgh"), 2);
        assert_eq!(TokenEstimator::estimate("记忆"), 2);
        assert_eq!(TokenEstimator::estimate(""), 1);
    }

    #[test]
    fn test_fit_history_keeps_most_recent() {
        let history = vec![
            Message::user("a".repeat(400)),
            Message::assistant("b".repeat(40)),
            Message::system("c".repeat(40)),
        ];
        let kept = fit_history(&history, 10, 40);
        assert_eq!(kept.len(), 2);
        assert!(kept[0].content.starts_with('b'));
        assert!(kept[1].content.starts_with('c'));
    }

    #[test]
    fn test_fit_history_reserved_exceeds_budget() {
        let history = vec![Message::user("hello there")];
        assert!(fit_history(&history, 100, 50).is_empty());
    }
}
