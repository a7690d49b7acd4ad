//! Non-streaming client for OpenAI-compatible chat-completions endpoints.

use super::types::{
    AssistantPart, Message, ModelResponse, ModelUsage, ToolCallRequest, ToolSpec, UserPart,
};
use super::{LanguageModel, ProviderError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug)]
pub struct OpenAiCompatModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    /// Bare model name, as the endpoint expects it.
    model: String,
    /// Full `provider:model` identifier.
    id: String,
}

impl OpenAiCompatModel {
    pub fn new(base_url: String, api_key: String, model: String, id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
            id,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn text(role: &'static str, content: String) -> Self {
        Self {
            role,
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    /// JSON-encoded argument object.
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireToolDecl,
}

#[derive(Debug, Serialize)]
struct WireToolDecl {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn convert_messages(messages: &[Message]) -> Vec<WireMessage> {
    let mut out = Vec::new();
    for msg in messages {
        match msg {
            Message::System { text } => out.push(WireMessage::text("system", text.clone())),
            Message::User { parts } => {
                let mut content = String::new();
                for part in parts {
                    match part {
                        UserPart::Text { text } => {
                            if !content.is_empty() {
                                content.push('\n');
                            }
                            content.push_str(text);
                        }
                        UserPart::File { data, mime_type } => {
                            if !content.is_empty() {
                                content.push('\n');
                            }
                            content.push_str(&format!(
                                "[attached file: {mime_type}, {} bytes]",
                                data.len()
                            ));
                        }
                    }
                }
                out.push(WireMessage::text("user", content));
            }
            Message::Assistant { parts } => {
                let mut content = String::new();
                let mut calls = Vec::new();
                for part in parts {
                    match part {
                        AssistantPart::Text { text } => content.push_str(text),
                        AssistantPart::ToolCall { id, name, input } => calls.push(WireToolCall {
                            id: id.clone(),
                            call_type: "function".to_string(),
                            function: WireFunction {
                                name: name.clone(),
                                arguments: input.to_string(),
                            },
                        }),
                    }
                }
                out.push(WireMessage {
                    role: "assistant",
                    content: (!content.is_empty()).then_some(content),
                    tool_calls: (!calls.is_empty()).then_some(calls),
                    tool_call_id: None,
                });
            }
            Message::Tool { results } => {
                for result in results {
                    out.push(WireMessage {
                        role: "tool",
                        content: Some(result.output.render()),
                        tool_calls: None,
                        tool_call_id: Some(result.tool_call_id.clone()),
                    });
                }
            }
        }
    }
    out
}

#[async_trait]
impl LanguageModel for OpenAiCompatModel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<ModelResponse, ProviderError> {
        let request = WireRequest {
            model: self.model.clone(),
            messages: convert_messages(messages),
            tools: (!tools.is_empty()).then(|| {
                tools
                    .iter()
                    .map(|t| WireTool {
                        tool_type: "function",
                        function: WireToolDecl {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.input_schema.clone(),
                        },
                    })
                    .collect()
            }),
        };

        debug!(model = %self.id, messages = request.messages.len(), "chat completion request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let wire: WireResponse = response.json().await?;
        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Decode("response has no choices".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCallRequest {
                tool_call_id: tc.id,
                tool_name: tc.function.name,
                input: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::Null),
            })
            .collect();

        Ok(ModelResponse {
            text: choice.message.content.filter(|t| !t.is_empty()),
            tool_calls,
            usage: wire.usage.map(|u| ModelUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
            finish_reason: choice.finish_reason,
        })
    }
}
