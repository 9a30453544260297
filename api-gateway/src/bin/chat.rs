//! Chat Lambda - the chat stream route family.
//!
//! Endpoints:
//! - POST /chat - stream a model turn as SSE UI message deltas
//! - DELETE /chat?id= - delete a chat owned by the caller
//! - GET /chat/{id}/stream - resume the most recent stream for a chat
//!
//! Runs as a streaming-response function; every arm answers with an
//! [`SseBody`], single-frame for the non-streamed routes.

use std::collections::HashMap;
use std::sync::Arc;

use aws_config::BehaviorVersion;
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ContentBlockDelta, ContentBlockStart, ConversationRole, ConverseStreamOutput,
    Message, ReasoningContentBlockDelta, StopReason, ToolResultBlock, ToolResultContentBlock,
    ToolUseBlock,
};
use lambda_http::{run_with_streaming_response, service_fn, Error, Request, RequestExt, Response};
use serde::Deserialize;
use serde::Serialize;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use validator::Validate;

use shared::error::{ChatSdkError, ErrorKind, Surface};
use shared::llm::{self, ChatStepRequest, LlmClient};
use shared::models::{
    last_user_text, ChatMessage, ChatVisibility, DeepCitationSession, MessagePart, MessageRole,
    ToolCallState,
};
use shared::prompts::{system_prompt, wrap_citation_prompt, RequestHints};
use shared::queries::{self, NewMessage};
use shared::stream::{
    empty_body, single_frame_body, sse_channel, SseBody, StreamContext, StreamWriter,
    UiStreamEvent, WordChunker,
};
use shared::tools::{self, ToolContext};
use shared::{entitlements_for, extract_user_from_context, validate_token, AuthenticatedUser, Config};

/// Step limit for the tool loop of one turn.
const MAX_STEPS: usize = 5;

/// Rate limit window in hours.
const RATE_LIMIT_WINDOW_HOURS: i32 = 24;

/// Chat request body.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct PostRequestBody {
    id: Uuid,
    /// The new user message (normal turn)
    message: Option<ChatMessage>,
    /// The full history (tool approval continuation)
    messages: Option<Vec<ChatMessage>>,
    #[validate(length(min = 1, max = 64))]
    selected_chat_model: String,
    selected_visibility_type: ChatVisibility,
    deep_citation: Option<DeepCitationSession>,
}

impl PostRequestBody {
    /// Shape checks beyond field validation: exactly one of `message` and
    /// `messages`, and a model id from the catalog.
    fn validate_shape(&self) -> Result<(), ChatSdkError> {
        let bad_request = || ChatSdkError::new(ErrorKind::BadRequest, Surface::Api);

        if self.validate().is_err() {
            return Err(bad_request());
        }
        if self.message.is_some() == self.messages.is_some() {
            return Err(bad_request());
        }
        if let Some(message) = &self.message {
            if message.parts.is_empty() {
                return Err(bad_request());
            }
        }
        if llm::resolve_model(&self.selected_chat_model).is_none() {
            return Err(bad_request());
        }

        Ok(())
    }
}

/// Application state shared across requests.
struct AppState {
    db_pool: PgPool,
    llm: LlmClient,
    http_client: reqwest::Client,
    stream_context: Option<StreamContext>,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env().map_err(|e| format!("configuration error: {}", e))?;

        let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        let secrets_client = aws_sdk_secretsmanager::Client::new(&aws_config);

        let creds = shared::get_database_credentials(&secrets_client, &config.db_secret_arn)
            .await
            .map_err(|e| format!("failed to load database credentials: {}", e))?;
        let db_pool = shared::db::create_pool(&config, &creds)
            .await
            .map_err(|e| format!("failed to connect to database: {}", e))?;

        let llm = LlmClient::new(aws_sdk_bedrockruntime::Client::new(&aws_config));
        let stream_context = StreamContext::connect(config.redis_url.as_deref()).await;

        Ok(Self {
            db_pool,
            llm,
            http_client: reqwest::Client::new(),
            stream_context,
        })
    }
}

fn stream_response(status: u16, content_type: &str, body: SseBody) -> Response<SseBody> {
    Response::builder()
        .status(status)
        .header("content-type", content_type)
        .body(body)
        .expect("Failed to build response")
}

fn json_stream_response<T: Serialize>(status: u16, data: &T) -> Response<SseBody> {
    let json = serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string());
    stream_response(status, "application/json", single_frame_body(json))
}

fn error_stream_response(err: &ChatSdkError) -> Response<SseBody> {
    json_stream_response(err.status_code(), &shared::http::error_body(err))
}

fn sse_response(body: SseBody) -> Response<SseBody> {
    Response::builder()
        .status(200)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .body(body)
        .expect("Failed to build response")
}

/// Extract the caller from authorizer claims, with a Bearer fallback for
/// direct invocation.
fn authenticate(event: &Request) -> Result<AuthenticatedUser, ChatSdkError> {
    if let Some(context) = event.request_context_ref() {
        if let Some(authorizer) = context.authorizer() {
            if let Some(claims) = authorizer.fields.get("claims") {
                return extract_user_from_context(claims)
                    .map_err(|_| ChatSdkError::new(ErrorKind::Unauthorized, Surface::Chat));
            }
        }
    }

    if let Some(header) = event
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
    {
        return validate_token(header)
            .map_err(|_| ChatSdkError::new(ErrorKind::Unauthorized, Surface::Chat));
    }

    Err(ChatSdkError::new(ErrorKind::Unauthorized, Surface::Chat))
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<SseBody>, Error> {
    let raw_path = event.uri().path().to_string();
    // Strip /api stage prefix if present
    let path = raw_path.strip_prefix("/api").unwrap_or(&raw_path);
    let method = event.method().as_str().to_string();

    match (method.as_str(), path) {
        ("POST", "/chat") => handle_post(state, event).await,
        ("DELETE", "/chat") => handle_delete(state, event).await,
        ("GET", path) if path.starts_with("/chat/") && path.ends_with("/stream") => {
            let id = path
                .trim_start_matches("/chat/")
                .trim_end_matches("/stream")
                .to_string();
            handle_resume(state, event, &id).await
        }
        _ => Ok(error_stream_response(&ChatSdkError::new(
            ErrorKind::NotFound,
            Surface::Api,
        ))),
    }
}

async fn handle_post(state: Arc<AppState>, event: Request) -> Result<Response<SseBody>, Error> {
    let body: PostRequestBody = match serde_json::from_slice(event.body().as_ref()) {
        Ok(body) => body,
        Err(_) => {
            return Ok(error_stream_response(&ChatSdkError::new(
                ErrorKind::BadRequest,
                Surface::Api,
            )))
        }
    };
    if let Err(err) = body.validate_shape() {
        return Ok(error_stream_response(&err));
    }

    match run_chat(state, &event, body).await {
        Ok(response) => Ok(response),
        Err(err) => {
            if err.is_loggable_only() || err.kind() == ErrorKind::Offline {
                error!(code = %err.code(), cause = ?err.cause(), "chat request failed");
            }
            Ok(error_stream_response(&err))
        }
    }
}

async fn run_chat(
    state: Arc<AppState>,
    event: &Request,
    body: PostRequestBody,
) -> Result<Response<SseBody>, ChatSdkError> {
    let user = authenticate(event)?;
    let model_spec = llm::resolve_model(&body.selected_chat_model)
        .ok_or_else(|| ChatSdkError::new(ErrorKind::BadRequest, Surface::Api))?;

    let message_count = queries::get_message_count_by_user_id(
        &state.db_pool,
        user.user_id,
        RATE_LIMIT_WINDOW_HOURS,
    )
    .await?;
    if message_count > entitlements_for(user.user_type).max_messages_per_day {
        return Err(ChatSdkError::new(ErrorKind::RateLimit, Surface::Chat));
    }

    let is_tool_approval = body.messages.is_some();
    let chat = queries::get_chat_by_id(&state.db_pool, body.id).await?;
    let mut messages_from_db = Vec::new();
    let mut title_task: Option<JoinHandle<shared::Result<String>>> = None;

    let incoming_is_user = body
        .message
        .as_ref()
        .is_some_and(|m| m.role == MessageRole::User);

    match &chat {
        Some(chat) => {
            if chat.user_id != user.user_id {
                return Err(ChatSdkError::new(ErrorKind::Forbidden, Surface::Chat));
            }
            if !is_tool_approval {
                messages_from_db =
                    queries::get_messages_by_chat_id(&state.db_pool, body.id).await?;
            }
        }
        None => {
            if incoming_is_user {
                // Save immediately with a placeholder; the real title is
                // generated in parallel and streamed when it lands.
                queries::save_chat(
                    &state.db_pool,
                    body.id,
                    user.user_id,
                    "New chat",
                    body.selected_visibility_type,
                )
                .await?;

                let llm = state.llm.clone();
                let text = body
                    .message
                    .as_ref()
                    .map(|m| m.text_content())
                    .unwrap_or_default();
                title_task = Some(tokio::spawn(
                    async move { llm.generate_title(&text).await },
                ));
            }
        }
    }

    let ui_messages: Vec<ChatMessage> = if is_tool_approval {
        body.messages.clone().unwrap_or_default()
    } else {
        let mut messages = queries::convert_to_ui_messages(messages_from_db)?;
        if let Some(message) = body.message.clone() {
            messages.push(message);
        }
        messages
    };

    // Only user messages are persisted here; tool approval continuations
    // update on finish instead.
    if let Some(message) = body.message.as_ref().filter(|m| m.role == MessageRole::User) {
        queries::save_messages(
            &state.db_pool,
            &[NewMessage {
                id: message.id,
                chat_id: body.id,
                role: MessageRole::User,
                parts: message.parts.clone(),
                attachments: Vec::new(),
            }],
        )
        .await?;
    }

    let stream_id = Uuid::new_v4();
    queries::create_stream_id(&state.db_pool, stream_id, body.id).await?;

    let hints = RequestHints::from_headers(event.headers());
    let reasoning = llm::is_reasoning_model(&body.selected_chat_model);
    let mut system = system_prompt(&body.selected_chat_model, &hints);

    // When DeepCitation is enabled the prepared document text is embedded in
    // the enhanced user prompt, so the last user message drops its file
    // parts to avoid feeding the model both raw and citation-ready copies.
    let mut model_ui_messages = ui_messages.clone();
    let mut file_data_parts_value: Option<serde_json::Value> = None;

    if let Some(deep_citation) = &body.deep_citation {
        let portions = deep_citation
            .deep_text_prompt_portion
            .clone()
            .unwrap_or_default();
        if deep_citation.enabled && !portions.is_empty() {
            let user_prompt = last_user_text(&model_ui_messages).unwrap_or_default().to_string();
            let (enhanced_system, enhanced_user) =
                wrap_citation_prompt(&system, &user_prompt, &portions);
            system = enhanced_system;

            if let Some(last_user) = model_ui_messages
                .iter_mut()
                .rev()
                .find(|m| m.role == MessageRole::User)
            {
                last_user.parts = vec![MessagePart::Text {
                    text: enhanced_user,
                }];
            }

            if let Some(parts) = &deep_citation.file_data_parts {
                file_data_parts_value = Some(serde_json::to_value(parts)?);
            }
        }
    }

    let model_messages = llm::convert_messages(&state.http_client, &model_ui_messages).await?;

    let mirror = state
        .stream_context
        .as_ref()
        .map(|context| context.mirror(stream_id));
    let (writer, response_body) = sse_channel(mirror);

    if let Some(task) = title_task {
        let writer = writer.clone();
        let pool = state.db_pool.clone();
        let chat_id = body.id;
        tokio::spawn(async move {
            match task.await {
                Ok(Ok(title)) => {
                    if let Err(e) = queries::update_chat_title_by_id(&pool, chat_id, &title).await {
                        warn!("failed to persist chat title: {}", e);
                    }
                    writer
                        .write(&UiStreamEvent::DataChatTitle { data: title })
                        .await;
                }
                Ok(Err(e)) => warn!("title generation failed: {}", e),
                Err(e) => warn!("title task failed: {}", e),
            }
        });
    }

    let turn = Turn {
        state: Arc::clone(&state),
        chat_id: body.id,
        user_id: user.user_id,
        bedrock_model_id: llm::bedrock_model_id(model_spec),
        system,
        model_messages,
        ui_messages,
        is_tool_approval,
        reasoning,
        file_data_parts_value,
        writer,
    };

    tokio::spawn(stream_turn(turn));

    info!(chat_id = %body.id, stream_id = %stream_id, "chat stream started");

    Ok(sse_response(response_body))
}

/// Everything the producer task needs to stream one turn.
struct Turn {
    state: Arc<AppState>,
    chat_id: Uuid,
    user_id: Uuid,
    bedrock_model_id: String,
    system: String,
    model_messages: Vec<Message>,
    ui_messages: Vec<ChatMessage>,
    is_tool_approval: bool,
    reasoning: bool,
    file_data_parts_value: Option<serde_json::Value>,
    writer: StreamWriter,
}

async fn stream_turn(turn: Turn) {
    let writer = turn.writer.clone();

    if let Err(err) = run_stream_steps(turn).await {
        error!(code = %err.code(), cause = ?err.cause(), "chat stream failed");
        writer
            .write(&UiStreamEvent::Error {
                error_text: "Oops, an error occurred!".to_string(),
            })
            .await;
    }

    writer.done().await;
}

async fn run_stream_steps(turn: Turn) -> Result<(), ChatSdkError> {
    let Turn {
        state,
        chat_id,
        user_id,
        bedrock_model_id,
        system,
        mut model_messages,
        ui_messages,
        is_tool_approval,
        reasoning,
        file_data_parts_value,
        writer,
    } = turn;

    let assistant_message_id = Uuid::new_v4();
    writer
        .write(&UiStreamEvent::Start {
            message_id: assistant_message_id.to_string(),
        })
        .await;

    // Echo the file data parts back so the client can verify citations once
    // the turn completes.
    if let Some(data) = file_data_parts_value {
        writer
            .write(&UiStreamEvent::DataDeepcitationFileparts { data })
            .await;
    }

    let tool_ctx = ToolContext {
        http_client: state.http_client.clone(),
        pool: state.db_pool.clone(),
        llm: state.llm.clone(),
        user_id,
        writer: writer.clone(),
    };

    let mut assistant_parts: Vec<MessagePart> = Vec::new();

    for step in 0..MAX_STEPS {
        writer.write(&UiStreamEvent::StartStep).await;

        let tool_config = if reasoning {
            None
        } else {
            Some(tools::tool_config()?)
        };

        let response = state
            .llm
            .start_chat_step(ChatStepRequest {
                bedrock_model_id: bedrock_model_id.clone(),
                system: system.clone(),
                messages: model_messages.clone(),
                tool_config,
                reasoning,
            })
            .await?;

        let outcome = pump_step(&writer, !reasoning, response).await?;
        writer.write(&UiStreamEvent::FinishStep).await;

        if !outcome.reasoning.is_empty() {
            assistant_parts.push(MessagePart::Reasoning {
                text: outcome.reasoning.clone(),
            });
        }
        if !outcome.text.is_empty() {
            assistant_parts.push(MessagePart::Text {
                text: outcome.text.clone(),
            });
        }

        let mut assistant_blocks: Vec<ContentBlock> = Vec::new();
        if !outcome.text.is_empty() {
            assistant_blocks.push(ContentBlock::Text(outcome.text.clone()));
        }

        let stop_for_tools =
            matches!(outcome.stop_reason, StopReason::ToolUse) && !outcome.tool_uses.is_empty();

        if !stop_for_tools {
            break;
        }

        let mut result_blocks: Vec<ContentBlock> = Vec::new();

        for tool_use in &outcome.tool_uses {
            assistant_parts.push(MessagePart::ToolCall {
                tool_call_id: tool_use.id.clone(),
                tool_name: tool_use.name.clone(),
                input: tool_use.input.clone(),
                output: None,
                state: ToolCallState::InputAvailable,
            });

            assistant_blocks.push(ContentBlock::ToolUse(
                ToolUseBlock::builder()
                    .tool_use_id(&tool_use.id)
                    .name(&tool_use.name)
                    .input(llm::json_to_document(&tool_use.input))
                    .build()
                    .map_err(|e| {
                        ChatSdkError::with_cause(ErrorKind::Offline, Surface::Chat, e.to_string())
                    })?,
            ));

            let output = tools::execute(&tool_ctx, &tool_use.name, &tool_use.input).await?;

            writer
                .write(&UiStreamEvent::ToolOutputAvailable {
                    tool_call_id: tool_use.id.clone(),
                    output: output.clone(),
                })
                .await;

            // Flip the just-pushed part to its completed state.
            if let Some(MessagePart::ToolCall {
                output: part_output,
                state: part_state,
                ..
            }) = assistant_parts.last_mut()
            {
                *part_output = Some(output.clone());
                *part_state = ToolCallState::OutputAvailable;
            }

            result_blocks.push(ContentBlock::ToolResult(
                ToolResultBlock::builder()
                    .tool_use_id(&tool_use.id)
                    .content(ToolResultContentBlock::Json(llm::json_to_document(&output)))
                    .build()
                    .map_err(|e| {
                        ChatSdkError::with_cause(ErrorKind::Offline, Surface::Chat, e.to_string())
                    })?,
            ));
        }

        model_messages.push(llm::build_message(
            ConversationRole::Assistant,
            assistant_blocks,
        )?);
        model_messages.push(llm::build_message(ConversationRole::User, result_blocks)?);

        if step + 1 == MAX_STEPS {
            warn!(chat_id = %chat_id, "step limit reached with pending tool use");
        }
    }

    writer.write(&UiStreamEvent::Finish).await;

    persist_assistant_message(
        &state.db_pool,
        chat_id,
        assistant_message_id,
        assistant_parts,
        is_tool_approval,
        &ui_messages,
    )
    .await
}

/// Save the finished assistant message. The tool approval flow updates the
/// trailing assistant message in place instead of inserting a new one.
async fn persist_assistant_message(
    pool: &PgPool,
    chat_id: Uuid,
    assistant_message_id: Uuid,
    parts: Vec<MessagePart>,
    is_tool_approval: bool,
    ui_messages: &[ChatMessage],
) -> Result<(), ChatSdkError> {
    if parts.is_empty() {
        return Ok(());
    }

    if is_tool_approval {
        if let Some(existing) = ui_messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
        {
            let mut merged = existing.parts.clone();
            merged.extend(parts);
            return queries::update_message(pool, existing.id, &merged).await;
        }
    }

    queries::save_messages(
        pool,
        &[NewMessage {
            id: assistant_message_id,
            chat_id,
            role: MessageRole::Assistant,
            parts,
            attachments: Vec::new(),
        }],
    )
    .await
}

struct CompletedToolUse {
    id: String,
    name: String,
    input: serde_json::Value,
}

struct StepOutcome {
    stop_reason: StopReason,
    text: String,
    reasoning: String,
    tool_uses: Vec<CompletedToolUse>,
}

enum OpenBlock {
    Text {
        ui_id: String,
        chunker: Option<WordChunker>,
    },
    Reasoning {
        ui_id: String,
    },
    Tool {
        id: String,
        name: String,
        input_json: String,
    },
}

/// Drive one model stream to completion, forwarding deltas as UI events.
async fn pump_step(
    writer: &StreamWriter,
    smooth: bool,
    response: aws_sdk_bedrockruntime::operation::converse_stream::ConverseStreamOutput,
) -> Result<StepOutcome, ChatSdkError> {
    let mut stream = response.stream;

    let mut open_blocks: HashMap<i32, OpenBlock> = HashMap::new();
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_uses = Vec::new();
    let mut stop_reason = StopReason::EndTurn;

    loop {
        let event = stream.recv().await.map_err(|e| {
            ChatSdkError::with_cause(ErrorKind::Offline, Surface::Chat, e.to_string())
        })?;
        let Some(event) = event else {
            break;
        };

        match event {
            ConverseStreamOutput::ContentBlockStart(start_event) => {
                if let Some(ContentBlockStart::ToolUse(start)) = start_event.start() {
                    writer
                        .write(&UiStreamEvent::ToolInputStart {
                            tool_call_id: start.tool_use_id().to_string(),
                            tool_name: start.name().to_string(),
                        })
                        .await;
                    open_blocks.insert(
                        start_event.content_block_index(),
                        OpenBlock::Tool {
                            id: start.tool_use_id().to_string(),
                            name: start.name().to_string(),
                            input_json: String::new(),
                        },
                    );
                }
            }
            ConverseStreamOutput::ContentBlockDelta(delta_event) => {
                let index = delta_event.content_block_index();
                match delta_event.delta() {
                    Some(ContentBlockDelta::Text(delta)) => {
                        if !open_blocks.contains_key(&index) {
                            let ui_id = Uuid::new_v4().to_string();
                            writer
                                .write(&UiStreamEvent::TextStart { id: ui_id.clone() })
                                .await;
                            open_blocks.insert(
                                index,
                                OpenBlock::Text {
                                    ui_id,
                                    chunker: smooth.then(WordChunker::new),
                                },
                            );
                        }

                        text.push_str(delta);

                        if let Some(OpenBlock::Text { ui_id, chunker }) =
                            open_blocks.get_mut(&index)
                        {
                            match chunker {
                                Some(chunker) => {
                                    for chunk in chunker.push(delta) {
                                        writer
                                            .write(&UiStreamEvent::TextDelta {
                                                id: ui_id.clone(),
                                                delta: chunk,
                                            })
                                            .await;
                                    }
                                }
                                None => {
                                    writer
                                        .write(&UiStreamEvent::TextDelta {
                                            id: ui_id.clone(),
                                            delta: delta.to_string(),
                                        })
                                        .await;
                                }
                            }
                        }
                    }
                    Some(ContentBlockDelta::ToolUse(delta)) => {
                        if let Some(OpenBlock::Tool { id, input_json, .. }) =
                            open_blocks.get_mut(&index)
                        {
                            input_json.push_str(delta.input());
                            writer
                                .write(&UiStreamEvent::ToolInputDelta {
                                    tool_call_id: id.clone(),
                                    input_text_delta: delta.input().to_string(),
                                })
                                .await;
                        }
                    }
                    Some(ContentBlockDelta::ReasoningContent(delta)) => {
                        if let ReasoningContentBlockDelta::Text(delta) = delta {
                            if !open_blocks.contains_key(&index) {
                                let ui_id = Uuid::new_v4().to_string();
                                writer
                                    .write(&UiStreamEvent::ReasoningStart { id: ui_id.clone() })
                                    .await;
                                open_blocks.insert(index, OpenBlock::Reasoning { ui_id });
                            }

                            reasoning.push_str(delta);

                            if let Some(OpenBlock::Reasoning { ui_id }) = open_blocks.get(&index) {
                                writer
                                    .write(&UiStreamEvent::ReasoningDelta {
                                        id: ui_id.clone(),
                                        delta: delta.to_string(),
                                    })
                                    .await;
                            }
                        }
                    }
                    _ => {}
                }
            }
            ConverseStreamOutput::ContentBlockStop(stop_event) => {
                match open_blocks.remove(&stop_event.content_block_index()) {
                    Some(OpenBlock::Text { ui_id, chunker }) => {
                        if let Some(mut chunker) = chunker {
                            if let Some(rest) = chunker.flush() {
                                writer
                                    .write(&UiStreamEvent::TextDelta {
                                        id: ui_id.clone(),
                                        delta: rest,
                                    })
                                    .await;
                            }
                        }
                        writer.write(&UiStreamEvent::TextEnd { id: ui_id }).await;
                    }
                    Some(OpenBlock::Reasoning { ui_id }) => {
                        writer
                            .write(&UiStreamEvent::ReasoningEnd { id: ui_id })
                            .await;
                    }
                    Some(OpenBlock::Tool {
                        id,
                        name,
                        input_json,
                    }) => {
                        let input: serde_json::Value =
                            serde_json::from_str(&input_json).unwrap_or(serde_json::json!({}));
                        writer
                            .write(&UiStreamEvent::ToolInputAvailable {
                                tool_call_id: id.clone(),
                                tool_name: name.clone(),
                                input: input.clone(),
                            })
                            .await;
                        tool_uses.push(CompletedToolUse { id, name, input });
                    }
                    None => {}
                }
            }
            ConverseStreamOutput::MessageStop(stop_event) => {
                stop_reason = stop_event.stop_reason().clone();
            }
            _ => {}
        }
    }

    Ok(StepOutcome {
        stop_reason,
        text,
        reasoning,
        tool_uses,
    })
}

async fn handle_delete(state: Arc<AppState>, event: Request) -> Result<Response<SseBody>, Error> {
    let params = event.query_string_parameters();
    let id = params.first("id").and_then(|id| Uuid::parse_str(id).ok());

    let Some(id) = id else {
        return Ok(error_stream_response(&ChatSdkError::new(
            ErrorKind::BadRequest,
            Surface::Api,
        )));
    };

    let user = match authenticate(&event) {
        Ok(user) => user,
        Err(err) => return Ok(error_stream_response(&err)),
    };

    let chat = match queries::get_chat_by_id(&state.db_pool, id).await {
        Ok(chat) => chat,
        Err(err) => return Ok(error_stream_response(&err)),
    };

    if chat.as_ref().map(|c| c.user_id) != Some(user.user_id) {
        return Ok(error_stream_response(&ChatSdkError::new(
            ErrorKind::Forbidden,
            Surface::Chat,
        )));
    }

    match queries::delete_chat_by_id(&state.db_pool, id).await {
        Ok(deleted) => {
            info!(chat_id = %id, "deleted chat");
            Ok(json_stream_response(200, &deleted))
        }
        Err(err) => Ok(error_stream_response(&err)),
    }
}

async fn handle_resume(
    state: Arc<AppState>,
    event: Request,
    chat_id: &str,
) -> Result<Response<SseBody>, Error> {
    let Ok(chat_id) = Uuid::parse_str(chat_id) else {
        return Ok(error_stream_response(&ChatSdkError::new(
            ErrorKind::BadRequest,
            Surface::Api,
        )));
    };

    let user = match authenticate(&event) {
        Ok(user) => user,
        Err(err) => return Ok(error_stream_response(&err)),
    };

    let chat = match queries::get_chat_by_id(&state.db_pool, chat_id).await {
        Ok(Some(chat)) => chat,
        Ok(None) => {
            return Ok(error_stream_response(&ChatSdkError::new(
                ErrorKind::NotFound,
                Surface::Chat,
            )))
        }
        Err(err) => return Ok(error_stream_response(&err)),
    };

    if chat.visibility == "private" && chat.user_id != user.user_id {
        return Ok(error_stream_response(&ChatSdkError::new(
            ErrorKind::Forbidden,
            Surface::Chat,
        )));
    }

    let stream_ids = match queries::get_stream_ids_by_chat_id(&state.db_pool, chat_id).await {
        Ok(ids) => ids,
        Err(err) => return Ok(error_stream_response(&err)),
    };

    let Some(last_stream_id) = stream_ids.last().copied() else {
        return Ok(error_stream_response(&ChatSdkError::new(
            ErrorKind::NotFound,
            Surface::Stream,
        )));
    };

    let Some(context) = &state.stream_context else {
        // Resumable streams disabled; nothing to replay.
        return Ok(stream_response(204, "text/event-stream", empty_body()));
    };

    match context.resume_body(last_stream_id).await {
        Some(body) => Ok(sse_response(body)),
        None => Ok(stream_response(204, "text/event-stream", empty_body())),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);

    run_with_streaming_response(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}
