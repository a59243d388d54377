//! Parsing of the coding subprocess's stream-json output: newline-delimited
//! JSON records, with anything unparseable passed through as text.

use serde_json::Value;

/// A progress-bearing record from an `assistant` line.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEventRecord {
    Text(String),
    ToolUse { name: String },
}

/// The terminal `result` record; at most one per run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TerminalRecord {
    pub subtype: String,
    pub result: String,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub session_id: Option<String>,
    pub errors: Vec<String>,
}

impl TerminalRecord {
    pub fn is_success(&self) -> bool {
        self.subtype == "success"
    }
}

/// One parsed stdout line.
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedLine {
    /// Recognised assistant content: zero or more progress events.
    Events(Vec<StreamEventRecord>),
    /// The terminal result record.
    Terminal(TerminalRecord),
    /// Not JSON we recognise; forwarded unchanged as text progress.
    Raw(String),
}

fn assistant_events(value: &Value) -> Vec<StreamEventRecord> {
    let Some(content) = value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    content
        .iter()
        .filter_map(|item| match item.get("type").and_then(Value::as_str) {
            Some("text") => item
                .get("text")
                .and_then(Value::as_str)
                .map(|t| StreamEventRecord::Text(t.to_string())),
            Some("tool_use") => item
                .get("name")
                .and_then(Value::as_str)
                .map(|n| StreamEventRecord::ToolUse {
                    name: n.to_string(),
                }),
            _ => None,
        })
        .collect()
}

fn terminal_record(value: &Value) -> TerminalRecord {
    let result = match value.get("result") {
        Some(Value::String(s)) => s.clone(),
        Some(other) if !other.is_null() => other.to_string(),
        _ => String::new(),
    };
    TerminalRecord {
        subtype: value
            .get("subtype")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        result,
        cost_usd: value.get("cost_usd").and_then(Value::as_f64).unwrap_or(0.0),
        duration_ms: value
            .get("duration_ms")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        session_id: value
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        errors: value
            .get("errors")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    }
}

/// Parses one stdout line.
pub fn parse_line(line: &str) -> ParsedLine {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return ParsedLine::Raw(line.to_string());
    };
    match value.get("type").and_then(Value::as_str) {
        Some("assistant") => ParsedLine::Events(assistant_events(&value)),
        Some("result") => ParsedLine::Terminal(terminal_record(&value)),
        _ => ParsedLine::Raw(line.to_string()),
    }
}
