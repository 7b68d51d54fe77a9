use serde_json::{json, Value};

use mecenas_core::errors::ProviderError;
use mecenas_core::ids::ToolCallId;
use mecenas_core::messages::{ChatMessage, ToolCallBlock, UserContent};
use mecenas_core::provider::{ChatContext, Completion, CompletionOptions};

/// Convert a full ChatContext into a chat-completions request body.
pub fn build_request_body(
    context: &ChatContext,
    options: &CompletionOptions,
    model: &str,
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": convert_messages(&context.messages),
    });

    if let Some(max) = options.max_tokens {
        body["max_tokens"] = json!(max);
    }
    if let Some(temp) = options.temperature {
        body["temperature"] = json!(temp);
    }

    if !context.tools.is_empty() {
        let tools: Vec<Value> = context
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }

    body
}

fn convert_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages.iter().map(convert_message).collect()
}

fn convert_message(msg: &ChatMessage) -> Value {
    match msg {
        ChatMessage::System { content } => json!({"role": "system", "content": content}),
        ChatMessage::User { content } => convert_user_content(content),
        ChatMessage::Assistant { content, tool_calls } => {
            let mut val = json!({"role": "assistant", "content": content});
            if !tool_calls.is_empty() {
                let calls: Vec<Value> = tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id.as_str(),
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                val["tool_calls"] = json!(calls);
            }
            val
        }
        ChatMessage::Tool { tool_call_id, content } => json!({
            "role": "tool",
            "tool_call_id": tool_call_id.as_str(),
            "content": content,
        }),
    }
}

/// A user turn with only text collapses to a plain string; any inline image
/// forces the structured content-part array.
fn convert_user_content(content: &[UserContent]) -> Value {
    let only_text = content
        .iter()
        .all(|c| matches!(c, UserContent::Text { .. }));

    if only_text {
        let text: Vec<&str> = content
            .iter()
            .map(|c| match c {
                UserContent::Text { text } => text.as_str(),
                UserContent::Image { .. } => unreachable!(),
            })
            .collect();
        return json!({"role": "user", "content": text.join("\n")});
    }

    let parts: Vec<Value> = content
        .iter()
        .map(|c| match c {
            UserContent::Text { text } => json!({"type": "text", "text": text}),
            UserContent::Image { mime_type, data } => json!({
                "type": "image_url",
                "image_url": {"url": format!("data:{mime_type};base64,{data}")}
            }),
        })
        .collect();

    json!({"role": "user", "content": parts})
}

/// Parse a chat-completions response body into a Completion.
pub fn parse_completion(body: &Value) -> Result<Completion, ProviderError> {
    let message = body
        .pointer("/choices/0/message")
        .ok_or_else(|| ProviderError::InvalidResponse("missing choices[0].message".into()))?;

    let text = message
        .get("content")
        .and_then(|c| c.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    let tool_calls = match message.get("tool_calls").and_then(|tc| tc.as_array()) {
        Some(calls) => calls
            .iter()
            .map(parse_tool_call)
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    if text.is_none() && tool_calls.is_empty() {
        return Err(ProviderError::InvalidResponse(
            "response has neither content nor tool calls".into(),
        ));
    }

    Ok(Completion { text, tool_calls })
}

fn parse_tool_call(call: &Value) -> Result<ToolCallBlock, ProviderError> {
    let id = call
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ProviderError::InvalidResponse("tool call missing id".into()))?;
    let name = call
        .pointer("/function/name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ProviderError::InvalidResponse("tool call missing function.name".into()))?;

    // Arguments arrive as a JSON-encoded string. A model occasionally emits
    // malformed JSON here; surface that to the tool layer as null rather
    // than failing the whole decision call.
    let arguments = call
        .pointer("/function/arguments")
        .and_then(|v| v.as_str())
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or(Value::Null);

    Ok(ToolCallBlock {
        id: ToolCallId::from_raw(id),
        name: name.to_string(),
        arguments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mecenas_core::tools::ToolDefinition;

    #[test]
    fn plain_text_user_collapses_to_string() {
        let msg = ChatMessage::user_text("czesc");
        let val = convert_message(&msg);
        assert_eq!(val["role"], "user");
        assert_eq!(val["content"], "czesc");
    }

    #[test]
    fn user_with_image_uses_content_parts() {
        let msg = ChatMessage::User {
            content: vec![
                UserContent::Text { text: "co to jest?".into() },
                UserContent::Image {
                    mime_type: "image/png".into(),
                    data: "AAAA".into(),
                },
            ],
        };
        let val = convert_message(&msg);
        let parts = val["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn assistant_tool_calls_serialize_arguments_as_string() {
        let msg = ChatMessage::Assistant {
            content: None,
            tool_calls: vec![ToolCallBlock {
                id: ToolCallId::from_raw("call_1"),
                name: "web_search".into(),
                arguments: json!({"query": "orzecznictwo"}),
            }],
        };
        let val = convert_message(&msg);
        assert_eq!(val["tool_calls"][0]["id"], "call_1");
        assert_eq!(val["tool_calls"][0]["function"]["name"], "web_search");
        let args: Value =
            serde_json::from_str(val["tool_calls"][0]["function"]["arguments"].as_str().unwrap())
                .unwrap();
        assert_eq!(args["query"], "orzecznictwo");
    }

    #[test]
    fn tool_result_message_converts() {
        let msg = ChatMessage::tool_result(ToolCallId::from_raw("call_2"), "wynik");
        let val = convert_message(&msg);
        assert_eq!(val["role"], "tool");
        assert_eq!(val["tool_call_id"], "call_2");
        assert_eq!(val["content"], "wynik");
    }

    #[test]
    fn request_body_includes_tools() {
        let context = ChatContext {
            messages: vec![ChatMessage::user_text("hej")],
            tools: vec![ToolDefinition {
                name: "web_search".into(),
                description: "Szuka w internecie".into(),
                parameters_schema: json!({"type": "object"}),
            }],
        };
        let body = build_request_body(&context, &CompletionOptions::default(), "gpt-4o");

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "web_search");
    }

    #[test]
    fn parse_text_completion() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "odpowiedz"}}]
        });
        let completion = parse_completion(&body).unwrap();
        assert_eq!(completion.text.as_deref(), Some("odpowiedz"));
        assert!(!completion.has_tool_calls());
    }

    #[test]
    fn parse_tool_call_completion() {
        let body = json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_abc",
                    "type": "function",
                    "function": {"name": "generate_image", "arguments": "{\"prompt\":\"kot\"}"}
                }]
            }}]
        });
        let completion = parse_completion(&body).unwrap();
        assert!(completion.text.is_none());
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].name, "generate_image");
        assert_eq!(completion.tool_calls[0].arguments["prompt"], "kot");
    }

    #[test]
    fn malformed_arguments_become_null() {
        let body = json!({
            "choices": [{"message": {
                "role": "assistant",
                "tool_calls": [{
                    "id": "call_x",
                    "type": "function",
                    "function": {"name": "web_search", "arguments": "{not json"}
                }]
            }}]
        });
        let completion = parse_completion(&body).unwrap();
        assert_eq!(completion.tool_calls[0].arguments, Value::Null);
    }

    #[test]
    fn empty_response_is_invalid() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": null}}]
        });
        assert!(matches!(
            parse_completion(&body),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn missing_choices_is_invalid() {
        let body = json!({"error": {"message": "oops"}});
        assert!(parse_completion(&body).is_err());
    }
}
