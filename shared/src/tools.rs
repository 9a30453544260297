//! The fixed tool set offered to non-reasoning models.
//!
//! Tools run server-side between chat steps: `get_weather` hits the public
//! forecast API, the document tools generate content with a second model
//! call, emit artifact data parts on the live stream, and persist
//! document/suggestion rows. Tool failures are returned to the model as
//! `{"error": ...}` outputs, never as HTTP errors.

use aws_sdk_bedrockruntime::types::{
    ContentBlock, ContentBlockDelta, ConversationRole, ConverseStreamOutput, Tool,
    ToolConfiguration, ToolInputSchema, ToolSpecification,
};
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ChatSdkError, ErrorKind, Surface};
use crate::llm::{artifact_model, build_message, json_to_document, ChatStepRequest, LlmClient};
use crate::queries;
use crate::stream::{StreamWriter, UiStreamEvent};
use crate::Result;

pub const TOOL_NAMES: [&str; 4] = [
    "get_weather",
    "create_document",
    "update_document",
    "request_suggestions",
];

const DOCUMENT_SYSTEM_PROMPT: &str = "\
Write about the given topic. Markdown is supported. Use headings wherever \
appropriate.";

const SUGGESTIONS_SYSTEM_PROMPT: &str = "\
You are a help writing assistant. Given a piece of writing, offer suggestions \
to improve it. Respond with a JSON array of objects, each with the fields \
\"originalSentence\", \"suggestedSentence\" and \"description\". Provide at \
most five suggestions and no other text.";

/// Everything a tool execution may touch.
pub struct ToolContext {
    pub http_client: reqwest::Client,
    pub pool: PgPool,
    pub llm: LlmClient,
    pub user_id: Uuid,
    pub writer: StreamWriter,
}

fn spec_error(err: impl std::fmt::Display) -> ChatSdkError {
    ChatSdkError::with_cause(ErrorKind::Offline, Surface::Chat, err.to_string())
}

/// Tool configuration advertised to the model.
pub fn tool_config() -> Result<ToolConfiguration> {
    let specs: [(&str, &str, serde_json::Value); 4] = [
        (
            "get_weather",
            "Get the current weather at a location",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "latitude": {"type": "number"},
                    "longitude": {"type": "number"},
                },
                "required": ["latitude", "longitude"],
            }),
        ),
        (
            "create_document",
            "Create a document for a writing activity. The document content streams to the user as it is written.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "kind": {"type": "string", "enum": ["text"]},
                },
                "required": ["title", "kind"],
            }),
        ),
        (
            "update_document",
            "Update an existing document following the given description",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string", "description": "The id of the document to update"},
                    "description": {"type": "string", "description": "The change to make"},
                },
                "required": ["id", "description"],
            }),
        ),
        (
            "request_suggestions",
            "Request writing suggestions for a document",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "documentId": {"type": "string"},
                },
                "required": ["documentId"],
            }),
        ),
    ];

    let mut builder = ToolConfiguration::builder();
    for (name, description, schema) in specs {
        let spec = ToolSpecification::builder()
            .name(name)
            .description(description)
            .input_schema(ToolInputSchema::Json(json_to_document(&schema)))
            .build()
            .map_err(spec_error)?;
        builder = builder.tools(Tool::ToolSpec(spec));
    }

    builder.build().map_err(spec_error)
}

/// Execute one tool call and return its output for the model.
pub async fn execute(
    ctx: &ToolContext,
    tool_name: &str,
    input: &serde_json::Value,
) -> Result<serde_json::Value> {
    match tool_name {
        "get_weather" => get_weather(ctx, input).await,
        "create_document" => create_document(ctx, input).await,
        "update_document" => update_document(ctx, input).await,
        "request_suggestions" => request_suggestions(ctx, input).await,
        other => Ok(serde_json::json!({"error": format!("Unknown tool: {}", other)})),
    }
}

async fn get_weather(ctx: &ToolContext, input: &serde_json::Value) -> Result<serde_json::Value> {
    let latitude = input.get("latitude").and_then(|v| v.as_f64());
    let longitude = input.get("longitude").and_then(|v| v.as_f64());

    let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
        return Ok(serde_json::json!({"error": "latitude and longitude are required"}));
    };

    let url = format!(
        "https://api.open-meteo.com/v1/forecast?latitude={}&longitude={}&current=temperature_2m&hourly=temperature_2m&daily=sunrise,sunset&timezone=auto",
        latitude, longitude
    );

    let response = match ctx.http_client.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!("weather lookup failed: {}", e);
            return Ok(serde_json::json!({"error": "weather service unavailable"}));
        }
    };

    match response.json::<serde_json::Value>().await {
        Ok(weather) => Ok(weather),
        Err(e) => {
            warn!("weather response unreadable: {}", e);
            Ok(serde_json::json!({"error": "weather service unavailable"}))
        }
    }
}

/// Stream document content from the artifact model, echoing deltas to the
/// client as `data-textDelta` parts.
async fn stream_document_content(
    ctx: &ToolContext,
    system: &str,
    prompt: &str,
) -> Result<String> {
    let message = build_message(
        ConversationRole::User,
        vec![ContentBlock::Text(prompt.to_string())],
    )?;

    let response = ctx
        .llm
        .start_chat_step(ChatStepRequest {
            bedrock_model_id: artifact_model(),
            system: system.to_string(),
            messages: vec![message],
            tool_config: None,
            reasoning: false,
        })
        .await?;

    let mut stream = response.stream;
    let mut content = String::new();

    while let Some(event) = stream
        .recv()
        .await
        .map_err(|e| ChatSdkError::with_cause(ErrorKind::Offline, Surface::Chat, e.to_string()))?
    {
        if let ConverseStreamOutput::ContentBlockDelta(delta_event) = event {
            if let Some(ContentBlockDelta::Text(text)) = delta_event.delta() {
                content.push_str(text);
                ctx.writer
                    .write(&UiStreamEvent::DataTextDelta { data: text.clone() })
                    .await;
            }
        }
    }

    Ok(content)
}

async fn create_document(ctx: &ToolContext, input: &serde_json::Value) -> Result<serde_json::Value> {
    let title = input.get("title").and_then(|v| v.as_str()).unwrap_or("Untitled");
    let kind = input.get("kind").and_then(|v| v.as_str()).unwrap_or("text");

    if kind != "text" {
        return Ok(serde_json::json!({"error": format!("Unsupported document kind: {}", kind)}));
    }

    let id = Uuid::new_v4();

    ctx.writer
        .write(&UiStreamEvent::DataKind {
            data: kind.to_string(),
        })
        .await;
    ctx.writer
        .write(&UiStreamEvent::DataId {
            data: id.to_string(),
        })
        .await;
    ctx.writer
        .write(&UiStreamEvent::DataTitle {
            data: title.to_string(),
        })
        .await;
    ctx.writer.write(&UiStreamEvent::DataClear).await;

    let content = stream_document_content(ctx, DOCUMENT_SYSTEM_PROMPT, title).await?;

    queries::save_document(&ctx.pool, id, title, kind, &content, ctx.user_id).await?;
    ctx.writer.write(&UiStreamEvent::DataFinish).await;

    info!(document_id = %id, "created document");

    Ok(serde_json::json!({
        "id": id.to_string(),
        "title": title,
        "kind": kind,
        "content": "A document was created and is now visible to the user.",
    }))
}

async fn update_document(ctx: &ToolContext, input: &serde_json::Value) -> Result<serde_json::Value> {
    let id = input.get("id").and_then(|v| v.as_str()).unwrap_or_default();
    let description = input
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    let Ok(id) = Uuid::parse_str(id) else {
        return Ok(serde_json::json!({"error": "Invalid document id"}));
    };

    let Some(document) = queries::get_document_by_id(&ctx.pool, id).await? else {
        return Ok(serde_json::json!({"error": "Document not found"}));
    };

    ctx.writer.write(&UiStreamEvent::DataClear).await;

    let system = format!(
        "Improve the following contents of the document based on the given prompt.\n\n{}",
        document.content
    );
    let content = stream_document_content(ctx, &system, description).await?;

    queries::save_document(
        &ctx.pool,
        document.id,
        &document.title,
        &document.kind,
        &content,
        ctx.user_id,
    )
    .await?;
    ctx.writer.write(&UiStreamEvent::DataFinish).await;

    Ok(serde_json::json!({
        "id": document.id.to_string(),
        "title": document.title,
        "kind": document.kind,
        "message": "The document has been updated successfully.",
    }))
}

#[derive(Debug, Deserialize)]
struct SuggestionItem {
    #[serde(rename = "originalSentence")]
    original_sentence: String,
    #[serde(rename = "suggestedSentence")]
    suggested_sentence: String,
    #[serde(default)]
    description: Option<String>,
}

/// Models sometimes wrap JSON output in a markdown code fence.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn parse_suggestion_items(raw: &str) -> Vec<SuggestionItem> {
    match serde_json::from_str(strip_code_fences(raw)) {
        Ok(items) => items,
        Err(e) => {
            warn!("unparseable suggestions output: {}", e);
            Vec::new()
        }
    }
}

async fn request_suggestions(
    ctx: &ToolContext,
    input: &serde_json::Value,
) -> Result<serde_json::Value> {
    let document_id = input
        .get("documentId")
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    let Ok(document_id) = Uuid::parse_str(document_id) else {
        return Ok(serde_json::json!({"error": "Invalid document id"}));
    };

    let Some(document) = queries::get_document_by_id(&ctx.pool, document_id).await? else {
        return Ok(serde_json::json!({"error": "Document not found"}));
    };

    let raw = ctx
        .llm
        .generate_text(
            &artifact_model(),
            SUGGESTIONS_SYSTEM_PROMPT,
            &document.content,
            2048,
        )
        .await?;

    let items = parse_suggestion_items(&raw);
    let mut suggestions = Vec::new();

    for item in &items {
        let data = serde_json::json!({
            "id": Uuid::new_v4().to_string(),
            "documentId": document.id.to_string(),
            "originalText": item.original_sentence,
            "suggestedText": item.suggested_sentence,
            "description": item.description,
            "isResolved": false,
        });
        ctx.writer
            .write(&UiStreamEvent::DataSuggestion { data })
            .await;

        suggestions.push(queries::NewSuggestion {
            document_id: document.id,
            document_created_at: document.created_at,
            original_text: item.original_sentence.clone(),
            suggested_text: item.suggested_sentence.clone(),
            description: item.description.clone(),
        });
    }

    if !suggestions.is_empty() {
        queries::save_suggestions(&ctx.pool, ctx.user_id, &suggestions).await?;
    }

    Ok(serde_json::json!({
        "id": document.id.to_string(),
        "title": document.title,
        "kind": document.kind,
        "message": "Suggestions have been added to the document",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_config_advertises_all_tools() {
        let config = tool_config().unwrap();
        assert_eq!(config.tools().len(), TOOL_NAMES.len());
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("[1]"), "[1]");
        assert_eq!(strip_code_fences("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("```\n[1]\n```"), "[1]");
    }

    #[test]
    fn test_parse_suggestions_lenient() {
        let raw = r#"```json
        [{"originalSentence": "a", "suggestedSentence": "b", "description": "c"}]
        ```"#;
        let items = parse_suggestion_items(raw);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].suggested_sentence, "b");

        assert!(parse_suggestion_items("not json").is_empty());
    }
}
