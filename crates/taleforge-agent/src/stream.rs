/// Events emitted while reading a single LLM response stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental raw text content from the model (markers included).
    TextDelta { text: String },

    /// A text content block has closed; carries its full accumulated text.
    TextBlockEnd { text: String },

    /// Model wants to call a tool.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Stream completed successfully.
    Done { stop_reason: String },

    /// Error during streaming.
    Error { message: String },
}

/// Parse a single SSE line: `event: <type>` or `data: <json>`.
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}
