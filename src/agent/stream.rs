use serde::Deserialize;
use serde_json::Value;

/// Events from Claude CLI's stream-json output format
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "assistant")]
    Assistant {
        message: AssistantMessage,
        #[serde(default)]
        session_id: String,
    },

    #[serde(rename = "user")]
    User {
        #[serde(default)]
        tool_use_result: Option<Value>,
    },

    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        usage: Option<StreamUsage>,
        #[serde(default)]
        session_id: Option<String>,
    },

    #[serde(rename = "system")]
    System {
        #[serde(default)]
        subtype: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        input: Value,
    },

    #[serde(rename = "text")]
    Text { text: String },

    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct StreamUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// One-line description of a tool call for progress logging.
pub fn describe_tool_use(name: &str, input: &Value) -> String {
    let field = |key: &str| input.get(key).and_then(|v| v.as_str());
    match name {
        "Read" => format!("Reading: {}", field("file_path").map(shorten_path).unwrap_or_else(|| "file".to_string())),
        "Write" => format!("Creating: {}", field("file_path").map(shorten_path).unwrap_or_else(|| "file".to_string())),
        "Edit" => format!("Editing: {}", field("file_path").map(shorten_path).unwrap_or_else(|| "file".to_string())),
        "Bash" => format!("Running: {}", field("command").map(|s| truncate_str(s, 40)).unwrap_or_else(|| "command".to_string())),
        "Grep" => format!("Grep: {}", field("pattern").map(|s| truncate_str(s, 30)).unwrap_or_else(|| "pattern".to_string())),
        _ => name.to_string(),
    }
}

/// Last two path components.
fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.rsplit('/').take(2).collect();
    parts.into_iter().rev().collect::<Vec<_>>().join("/")
}

fn truncate_str(s: &str, max_chars: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    if first_line.chars().count() <= max_chars {
        first_line.to_string()
    } else {
        let truncated: String = first_line.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}
