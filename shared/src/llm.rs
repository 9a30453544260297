//! Hosted model access through the Bedrock Converse API.
//!
//! The app-facing model catalog maps the ids clients select to Bedrock
//! model ids, and [`LlmClient`] wraps the streaming chat step, one-shot
//! generation (titles, document content) and UI-to-provider message
//! conversion.

use aws_sdk_bedrockruntime::operation::converse_stream::ConverseStreamOutput as ConverseStreamResponse;
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ConversationRole, ConverseOutput, DocumentBlock, DocumentFormat, DocumentSource,
    ImageBlock, ImageFormat, ImageSource, InferenceConfiguration, Message, SystemContentBlock,
    ToolConfiguration, ToolResultBlock, ToolResultContentBlock, ToolUseBlock,
};
use aws_smithy_types::{Document, Number};
use tracing::debug;

use crate::error::{ChatSdkError, ErrorKind, Surface};
use crate::models::{ChatMessage, MessagePart, MessageRole};
use crate::prompts::TITLE_PROMPT;
use crate::Result;

/// An entry in the app-facing model catalog.
#[derive(Debug, Clone, Copy)]
pub struct ChatModelSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub bedrock_model_id: &'static str,
}

pub const DEFAULT_CHAT_MODEL: &str = "chat-model";

pub const CHAT_MODELS: [ChatModelSpec; 3] = [
    ChatModelSpec {
        id: "chat-model",
        name: "Claude 3.5 Sonnet",
        bedrock_model_id: "anthropic.claude-3-5-sonnet-20241022-v2:0",
    },
    ChatModelSpec {
        id: "chat-model-reasoning",
        name: "Claude 3.7 Sonnet (extended thinking)",
        bedrock_model_id: "us.anthropic.claude-3-7-sonnet-20250219-v1:0",
    },
    ChatModelSpec {
        id: "chat-model-small",
        name: "Claude 3.5 Haiku",
        bedrock_model_id: "anthropic.claude-3-5-haiku-20241022-v1:0",
    },
];

const TITLE_MODEL_ID: &str = "anthropic.claude-3-5-haiku-20241022-v1:0";
const ARTIFACT_MODEL_ID: &str = "anthropic.claude-3-5-sonnet-20241022-v2:0";

/// Resolve an app-facing model id against the catalog.
pub fn resolve_model(id: &str) -> Option<&'static ChatModelSpec> {
    CHAT_MODELS.iter().find(|m| m.id == id)
}

/// Reasoning models run without tools and with an extended thinking budget.
pub fn is_reasoning_model(id: &str) -> bool {
    id.contains("reasoning") || id.contains("thinking")
}

fn env_model_override(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Bedrock model id for a catalog entry, honoring env overrides like
/// `BEDROCK_MODEL_CHAT_MODEL`.
pub fn bedrock_model_id(spec: &ChatModelSpec) -> String {
    let var = format!("BEDROCK_MODEL_{}", spec.id.to_uppercase().replace('-', "_"));
    env_model_override(&var, spec.bedrock_model_id)
}

pub fn title_model() -> String {
    env_model_override("BEDROCK_MODEL_TITLE", TITLE_MODEL_ID)
}

pub fn artifact_model() -> String {
    env_model_override("BEDROCK_MODEL_ARTIFACT", ARTIFACT_MODEL_ID)
}

/// One streamed chat step.
#[derive(Debug)]
pub struct ChatStepRequest {
    pub bedrock_model_id: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub tool_config: Option<ToolConfiguration>,
    pub reasoning: bool,
}

/// Client for the Bedrock Converse API.
#[derive(Clone)]
pub struct LlmClient {
    client: aws_sdk_bedrockruntime::Client,
}

impl LlmClient {
    pub fn new(client: aws_sdk_bedrockruntime::Client) -> Self {
        Self { client }
    }

    fn model_error(context: &str, err: impl std::fmt::Display) -> ChatSdkError {
        ChatSdkError::with_cause(
            ErrorKind::Offline,
            Surface::Chat,
            format!("{}: {}", context, err),
        )
    }

    /// Start streaming one chat step.
    pub async fn start_chat_step(&self, request: ChatStepRequest) -> Result<ConverseStreamResponse> {
        debug!(model = %request.bedrock_model_id, messages = request.messages.len(), "starting chat step");

        let mut builder = self
            .client
            .converse_stream()
            .model_id(request.bedrock_model_id)
            .system(SystemContentBlock::Text(request.system))
            .set_messages(Some(request.messages))
            .inference_config(InferenceConfiguration::builder().max_tokens(4096).build());

        if let Some(tools) = request.tool_config {
            builder = builder.tool_config(tools);
        }

        if request.reasoning {
            builder = builder.additional_model_request_fields(json_to_document(
                &serde_json::json!({"thinking": {"type": "enabled", "budget_tokens": 10_000}}),
            ));
        }

        builder
            .send()
            .await
            .map_err(|e| Self::model_error("model stream failed", e))
    }

    /// One-shot text generation.
    pub async fn generate_text(
        &self,
        bedrock_model_id: &str,
        system: &str,
        prompt: &str,
        max_tokens: i32,
    ) -> Result<String> {
        let message = build_message(
            ConversationRole::User,
            vec![ContentBlock::Text(prompt.to_string())],
        )?;

        let response = self
            .client
            .converse()
            .model_id(bedrock_model_id)
            .system(SystemContentBlock::Text(system.to_string()))
            .messages(message)
            .inference_config(InferenceConfiguration::builder().max_tokens(max_tokens).build())
            .send()
            .await
            .map_err(|e| Self::model_error("model call failed", e))?;

        let mut text = String::new();
        if let Some(ConverseOutput::Message(message)) = response.output() {
            for block in message.content() {
                if let ContentBlock::Text(t) = block {
                    text.push_str(t);
                }
            }
        }

        Ok(text)
    }

    /// Generate a chat title from the first user message.
    pub async fn generate_title(&self, message_text: &str) -> Result<String> {
        let raw = self
            .generate_text(&title_model(), TITLE_PROMPT, message_text, 256)
            .await?;
        Ok(sanitize_title(&raw))
    }
}

/// Titles carry no quotes or colons and stay within 80 characters.
pub fn sanitize_title(raw: &str) -> String {
    raw.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .replace(':', "")
        .chars()
        .take(80)
        .collect()
}

pub fn build_message(role: ConversationRole, content: Vec<ContentBlock>) -> Result<Message> {
    Message::builder()
        .role(role)
        .set_content(Some(content))
        .build()
        .map_err(|e| ChatSdkError::with_cause(ErrorKind::BadRequest, Surface::Api, e.to_string()))
}

/// Map an attachment to a Bedrock content block. Unsupported media types
/// degrade to a filename note so the model still sees the attachment.
pub fn attachment_block(media_type: &str, name: Option<&str>, bytes: Vec<u8>) -> Result<ContentBlock> {
    let build_err =
        |e: aws_smithy_types::error::operation::BuildError| {
            ChatSdkError::with_cause(ErrorKind::BadRequest, Surface::Api, e.to_string())
        };

    let image_format = match media_type {
        "image/png" => Some(ImageFormat::Png),
        "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
        "image/gif" => Some(ImageFormat::Gif),
        "image/webp" => Some(ImageFormat::Webp),
        _ => None,
    };

    if let Some(format) = image_format {
        let image = ImageBlock::builder()
            .format(format)
            .source(ImageSource::Bytes(Blob::new(bytes)))
            .build()
            .map_err(build_err)?;
        return Ok(ContentBlock::Image(image));
    }

    let document_format = match media_type {
        "application/pdf" => Some(DocumentFormat::Pdf),
        "text/plain" => Some(DocumentFormat::Txt),
        "text/markdown" => Some(DocumentFormat::Md),
        "text/csv" => Some(DocumentFormat::Csv),
        "text/html" => Some(DocumentFormat::Html),
        _ => None,
    };

    if let Some(format) = document_format {
        let document = DocumentBlock::builder()
            .format(format)
            .name(sanitize_document_name(name.unwrap_or("attachment")))
            .source(DocumentSource::Bytes(Blob::new(bytes)))
            .build()
            .map_err(build_err)?;
        return Ok(ContentBlock::Document(document));
    }

    Ok(ContentBlock::Text(format!(
        "[attachment {} of type {} omitted]",
        name.unwrap_or("unnamed"),
        media_type
    )))
}

/// Bedrock restricts document names to a small character set.
pub fn sanitize_document_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '(' | ')' | '[' | ']') {
                c
            } else {
                '-'
            }
        })
        .collect();

    if cleaned.trim().is_empty() {
        "attachment".to_string()
    } else {
        cleaned
    }
}

async fn user_blocks(
    http_client: &reqwest::Client,
    message: &ChatMessage,
) -> Result<Vec<ContentBlock>> {
    let mut blocks = Vec::new();
    let mut files = Vec::new();

    for part in &message.parts {
        match part {
            MessagePart::Text { text } if !text.is_empty() => {
                blocks.push(ContentBlock::Text(text.clone()));
            }
            MessagePart::File {
                url,
                media_type,
                name,
            } => files.push((url.clone(), media_type.clone(), name.clone())),
            _ => {}
        }
    }

    // Independent downloads run concurrently and are awaited together.
    let downloads = files.iter().map(|(url, _, _)| {
        let http_client = http_client.clone();
        let url = url.clone();
        async move {
            let response = http_client
                .get(&url)
                .send()
                .await
                .map_err(|e| LlmClient::model_error("attachment download failed", e))?
                .error_for_status()
                .map_err(|e| LlmClient::model_error("attachment download failed", e))?;
            let bytes = response
                .bytes()
                .await
                .map_err(|e| LlmClient::model_error("attachment download failed", e))?;
            Ok::<Vec<u8>, ChatSdkError>(bytes.to_vec())
        }
    });

    let bodies = futures::future::try_join_all(downloads).await?;

    for ((_, media_type, name), bytes) in files.iter().zip(bodies) {
        blocks.push(attachment_block(media_type, name.as_deref(), bytes)?);
    }

    Ok(blocks)
}

/// Convert UI messages into Bedrock conversation messages.
///
/// Assistant tool-call parts become toolUse blocks, with their recorded
/// outputs re-sent as toolResult blocks in a following user turn, which is
/// the shape the Converse API requires. Reasoning parts are not re-sent.
pub async fn convert_messages(
    http_client: &reqwest::Client,
    messages: &[ChatMessage],
) -> Result<Vec<Message>> {
    let mut converted = Vec::new();

    for message in messages {
        match message.role {
            MessageRole::System => {}
            MessageRole::User => {
                let blocks = user_blocks(http_client, message).await?;
                if !blocks.is_empty() {
                    converted.push(build_message(ConversationRole::User, blocks)?);
                }
            }
            MessageRole::Assistant => {
                let mut blocks = Vec::new();
                let mut results = Vec::new();

                for part in &message.parts {
                    match part {
                        MessagePart::Text { text } if !text.is_empty() => {
                            blocks.push(ContentBlock::Text(text.clone()));
                        }
                        MessagePart::ToolCall {
                            tool_call_id,
                            tool_name,
                            input,
                            output,
                            ..
                        } => {
                            let tool_use = ToolUseBlock::builder()
                                .tool_use_id(tool_call_id)
                                .name(tool_name)
                                .input(json_to_document(input))
                                .build()
                                .map_err(|e| {
                                    ChatSdkError::with_cause(
                                        ErrorKind::BadRequest,
                                        Surface::Api,
                                        e.to_string(),
                                    )
                                })?;
                            blocks.push(ContentBlock::ToolUse(tool_use));

                            if let Some(output) = output {
                                let result = ToolResultBlock::builder()
                                    .tool_use_id(tool_call_id)
                                    .content(ToolResultContentBlock::Json(json_to_document(output)))
                                    .build()
                                    .map_err(|e| {
                                        ChatSdkError::with_cause(
                                            ErrorKind::BadRequest,
                                            Surface::Api,
                                            e.to_string(),
                                        )
                                    })?;
                                results.push(ContentBlock::ToolResult(result));
                            }
                        }
                        _ => {}
                    }
                }

                if !blocks.is_empty() {
                    converted.push(build_message(ConversationRole::Assistant, blocks)?);
                }
                if !results.is_empty() {
                    converted.push(build_message(ConversationRole::User, results)?);
                }
            }
        }
    }

    Ok(converted)
}

/// Convert a JSON value to a smithy document.
pub fn json_to_document(value: &serde_json::Value) -> Document {
    match value {
        serde_json::Value::Null => Document::Null,
        serde_json::Value::Bool(b) => Document::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Document::Number(Number::PosInt(u))
            } else if let Some(i) = n.as_i64() {
                Document::Number(Number::NegInt(i))
            } else {
                Document::Number(Number::Float(n.as_f64().unwrap_or(0.0)))
            }
        }
        serde_json::Value::String(s) => Document::String(s.clone()),
        serde_json::Value::Array(items) => {
            Document::Array(items.iter().map(json_to_document).collect())
        }
        serde_json::Value::Object(map) => Document::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_document(v)))
                .collect(),
        ),
    }
}

/// Convert a smithy document back to a JSON value.
pub fn document_to_json(document: &Document) -> serde_json::Value {
    match document {
        Document::Null => serde_json::Value::Null,
        Document::Bool(b) => serde_json::Value::Bool(*b),
        Document::Number(Number::PosInt(u)) => (*u).into(),
        Document::Number(Number::NegInt(i)) => (*i).into(),
        Document::Number(Number::Float(f)) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Document::String(s) => serde_json::Value::String(s.clone()),
        Document::Array(items) => {
            serde_json::Value::Array(items.iter().map(document_to_json).collect())
        }
        Document::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), document_to_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_model() {
        let spec = resolve_model("chat-model").unwrap();
        assert_eq!(spec.id, "chat-model");
        assert!(resolve_model("gpt-99").is_none());
    }

    #[test]
    fn test_reasoning_detection() {
        assert!(is_reasoning_model("chat-model-reasoning"));
        assert!(is_reasoning_model("some-thinking-model"));
        assert!(!is_reasoning_model("chat-model"));
    }

    #[test]
    fn test_json_document_round_trip() {
        let value = serde_json::json!({
            "latitude": 51.5,
            "count": 3,
            "offset": -2,
            "tags": ["a", "b"],
            "nested": {"ok": true, "gone": null},
        });

        assert_eq!(document_to_json(&json_to_document(&value)), value);
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("\"Weather: in London\"\n"), "Weather in London");
        assert_eq!(sanitize_title(&"x".repeat(200)).len(), 80);
    }

    #[test]
    fn test_sanitize_document_name() {
        assert_eq!(sanitize_document_name("report_v2.pdf"), "report-v2-pdf");
        assert_eq!(sanitize_document_name("???"), "attachment");
    }

    #[test]
    fn test_attachment_block_variants() {
        let image = attachment_block("image/png", Some("a.png"), vec![1, 2]).unwrap();
        assert!(matches!(image, ContentBlock::Image(_)));

        let document = attachment_block("application/pdf", Some("a.pdf"), vec![1, 2]).unwrap();
        assert!(matches!(document, ContentBlock::Document(_)));

        let fallback = attachment_block("application/zip", Some("a.zip"), vec![1, 2]).unwrap();
        match fallback {
            ContentBlock::Text(text) => assert!(text.contains("a.zip")),
            other => panic!("unexpected block: {:?}", other),
        }
    }
}
