//! Instructions for models that call tools

/// Appended to the system prompt when tools are advertised
///
/// Models that do not support structured tool calls are asked to answer
/// with a bare JSON object instead; the agent recognises that form too.
pub const TOOL_USAGE_PROMPT: &str = r#"
## Tool usage:
You have tools (also called functions) to find information or perform actions.
You can use one tool per message and you will receive the result of that tool in the next message.
If you need a tool, your response must start immediately with the JSON for the call.
Use tools:
- for real-time data such as weather, news or search results;
- for calculations and code execution;
- to query specialised knowledge bases, storages and databases.
Tool call format, a single JSON object:
{
    "name": "time",
    "params": {
        "location": "New York",
        "24hr": true
    }
}
Only use the tool names and parameters you were given.
If you can answer from your own knowledge, answer directly without a tool.
"#;
