// crates/core/src/output.rs
//! Classification of execution-phase output.
//!
//! The engine writes whatever the executed tool produced: an LLM completion,
//! a CLI capture, arbitrary structured data, or bare text. The shape is
//! probed exactly once here, at the ingestion boundary; everything downstream
//! matches on the tag instead of re-deriving it per render.

use serde::Serialize;
use serde_json::Value;
use ts_rs::TS;

/// Decoded execution output.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../bindings/"))]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ExecutionOutput {
    /// Object carrying a `content` string: an LLM completion.
    Llm { content: String },
    /// Object carrying `stdout`/`stderr`: a CLI capture.
    Cli {
        stdout: String,
        stderr: String,
        exit_code: Option<i64>,
    },
    /// Any other object or array.
    Structured { value: Value },
    /// Bare string output.
    Text { text: String },
    /// Null or absent.
    None,
}

fn string_field(map: &serde_json::Map<String, Value>, key: &str) -> String {
    map.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

/// Classify a raw execution-output value.
///
/// Precedence when an object matches more than one shape: CLI
/// (`stdout`/`stderr` present) over LLM (`content` present) over structured.
/// Total over all JSON values; never errors.
pub fn classify_output(raw: Option<&Value>) -> ExecutionOutput {
    match raw {
        None | Some(Value::Null) => ExecutionOutput::None,
        Some(Value::String(text)) => ExecutionOutput::Text { text: text.clone() },
        Some(Value::Object(map)) => {
            if map.contains_key("stdout") || map.contains_key("stderr") {
                ExecutionOutput::Cli {
                    stdout: string_field(map, "stdout"),
                    stderr: string_field(map, "stderr"),
                    exit_code: map.get("exitCode").and_then(Value::as_i64),
                }
            } else if let Some(content) = map.get("content").and_then(Value::as_str) {
                ExecutionOutput::Llm {
                    content: content.to_string(),
                }
            } else {
                ExecutionOutput::Structured {
                    value: Value::Object(map.clone()),
                }
            }
        }
        Some(other) => ExecutionOutput::Structured {
            value: other.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_classify_none() {
        assert_eq!(classify_output(None), ExecutionOutput::None);
        assert_eq!(classify_output(Some(&Value::Null)), ExecutionOutput::None);
    }

    #[test]
    fn test_classify_text() {
        let raw = json!("plain result");
        assert_eq!(
            classify_output(Some(&raw)),
            ExecutionOutput::Text {
                text: "plain result".into()
            }
        );
    }

    #[test]
    fn test_classify_cli() {
        let raw = json!({ "stdout": "ok\n", "stderr": "", "exitCode": 0 });
        assert_eq!(
            classify_output(Some(&raw)),
            ExecutionOutput::Cli {
                stdout: "ok\n".into(),
                stderr: String::new(),
                exit_code: Some(0),
            }
        );
    }

    #[test]
    fn test_classify_llm() {
        let raw = json!({ "content": "The deadline is Friday." });
        assert_eq!(
            classify_output(Some(&raw)),
            ExecutionOutput::Llm {
                content: "The deadline is Friday.".into()
            }
        );
    }

    #[test]
    fn test_cli_wins_over_llm() {
        // A CLI capture may legitimately contain a `content` key in its
        // stdout-bearing object; stdout/stderr decide the tag.
        let raw = json!({ "stdout": "x", "content": "y" });
        assert!(matches!(
            classify_output(Some(&raw)),
            ExecutionOutput::Cli { .. }
        ));
    }

    #[test]
    fn test_classify_structured() {
        let raw = json!({ "fields": { "customer": "ACME" } });
        assert!(matches!(
            classify_output(Some(&raw)),
            ExecutionOutput::Structured { .. }
        ));
        let arr = json!([1, 2, 3]);
        assert!(matches!(
            classify_output(Some(&arr)),
            ExecutionOutput::Structured { .. }
        ));
    }

    #[test]
    fn test_non_string_content_is_structured() {
        let raw = json!({ "content": 42 });
        assert!(matches!(
            classify_output(Some(&raw)),
            ExecutionOutput::Structured { .. }
        ));
    }
}
