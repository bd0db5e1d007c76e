//! 回复格式 JSON Schema（schemars 生成）
//!
//! 拼入 system prompt，约束模型输出 `{"thoughts": {...}, "command": {"name", "args"}}`。

use schemars::{schema_for, JsonSchema};
use std::collections::HashMap;

#[allow(dead_code)]
#[derive(JsonSchema)]
struct Thoughts {
    /// 当前想法
    text: String,
    reasoning: String,
    /// 简短的要点列表
    plan: String,
    /// 对自身行为的建设性批评
    criticism: String,
    /// 对用户说的一句话总结
    speak: String,
}

#[allow(dead_code)]
#[derive(JsonSchema)]
struct CommandFormat {
    /// 命令名，见命令列表
    name: String,
    /// 命令参数
    args: HashMap<String, String>,
}

/// 模型回复格式：与 parse_command 的解析规则一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ResponseFormat {
    thoughts: Thoughts,
    command: CommandFormat,
}

/// 返回回复格式的 JSON Schema 字符串
pub fn response_schema_json() -> String {
    let schema = schema_for!(ResponseFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_names_command_fields() {
        let s = response_schema_json();
        assert!(s.contains("\"command\""));
        assert!(s.contains("\"thoughts\""));
        assert!(s.contains("\"args\""));
    }
}
