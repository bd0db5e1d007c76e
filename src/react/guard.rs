//! 重复命令检测：最近 6 次执行的 (命令名, 参数摘要)，同一签名出现 3 次即视为打转

use std::collections::VecDeque;

use serde_json::Value;
use sha2::{Digest, Sha256};

pub const GUARD_CAPACITY: usize = 6;
pub const GUARD_THRESHOLD: usize = 3;

pub const LOOP_DETECTED_MESSAGE: &str = "Loop detected. You have repeated the same command multiple times. Change strategy or request user input.";

/// 命令签名：名称 + 规范化参数 JSON 的 SHA-256
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSignature {
    pub name: String,
    pub args_hash: String,
}

impl ActionSignature {
    pub fn new(name: &str, args: &Value) -> Self {
        let mut canonical = String::new();
        write_canonical(args, &mut canonical);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Self {
            name: name.to_string(),
            args_hash: format!("{:x}", hasher.finalize()),
        }
    }
}

/// 键按字典序输出的 JSON，与键的书写顺序无关
fn write_canonical(v: &Value, out: &mut String) {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, k) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(&map[k], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[derive(Debug, Default)]
pub struct RepetitionGuard {
    recent: VecDeque<ActionSignature>,
}

impl RepetitionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次执行，返回该签名在窗口内的出现次数
    pub fn record(&mut self, sig: ActionSignature) -> usize {
        if self.recent.len() == GUARD_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(sig.clone());
        self.recent.iter().filter(|s| **s == sig).count()
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_change_signature() {
        let a = ActionSignature::new("write_to_file", &json!({"file": "a", "text": "b"}));
        let b: Value = serde_json::from_str(r#"{"text": "b", "file": "a"}"#).unwrap();
        assert_eq!(a, ActionSignature::new("write_to_file", &b));
        assert_ne!(a, ActionSignature::new("append_to_file", &b));
    }

    #[test]
    fn test_counts_within_window() {
        let mut g = RepetitionGuard::new();
        let sig = ActionSignature::new("google", &json!({"input": "rust"}));
        assert_eq!(g.record(sig.clone()), 1);
        assert_eq!(g.record(sig.clone()), 2);
        assert_eq!(g.record(sig.clone()), 3);

        for i in 0..5 {
            g.record(ActionSignature::new("read_file", &json!({"file": i})));
        }
        assert_eq!(g.len(), GUARD_CAPACITY);
        assert_eq!(g.record(sig), 1);
    }
}
