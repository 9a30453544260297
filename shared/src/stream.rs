//! SSE transport for UI message streams.
//!
//! The chat route speaks the UI message delta protocol: JSON events framed
//! as `data: <json>\n\n` with a final `data: [DONE]\n\n`. The response body
//! is a channel-backed [`StreamBody`] so a producer task can push frames
//! while the Lambda streaming response drains them.
//!
//! When a stream context is configured (`REDIS_URL`), every frame of a live
//! stream is mirrored to a TTL'd Redis list keyed by stream id, and the
//! resume route replays that list, following appended frames until the
//! terminator.

use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use http_body::Frame;
use http_body_util::StreamBody;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;
use uuid::Uuid;

/// Body type for all streamed Lambda responses.
pub type SseBody = StreamBody<ReceiverStream<std::result::Result<Frame<Bytes>, Infallible>>>;

/// Terminal SSE frame.
pub const SSE_DONE: &str = "data: [DONE]\n\n";

/// Mirrored frames expire after this many seconds.
const STREAM_TTL_SECONDS: i64 = 15 * 60;

/// How long a resumed stream will wait for its producer to finish.
const RESUME_FOLLOW_TIMEOUT: Duration = Duration::from_secs(60);

/// One UI message delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiStreamEvent {
    Start {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    StartStep,
    FinishStep,
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        delta: String,
    },
    ReasoningEnd {
        id: String,
    },
    ToolInputStart {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
    },
    ToolInputDelta {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "inputTextDelta")]
        input_text_delta: String,
    },
    ToolInputAvailable {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: serde_json::Value,
    },
    ToolOutputAvailable {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        output: serde_json::Value,
    },
    #[serde(rename = "data-chat-title")]
    DataChatTitle { data: String },
    #[serde(rename = "data-deepcitation-fileparts")]
    DataDeepcitationFileparts { data: serde_json::Value },
    #[serde(rename = "data-kind")]
    DataKind { data: String },
    #[serde(rename = "data-id")]
    DataId { data: String },
    #[serde(rename = "data-title")]
    DataTitle { data: String },
    #[serde(rename = "data-clear")]
    DataClear,
    #[serde(rename = "data-textDelta")]
    DataTextDelta { data: String },
    #[serde(rename = "data-suggestion")]
    DataSuggestion { data: serde_json::Value },
    #[serde(rename = "data-finish")]
    DataFinish,
    Error {
        #[serde(rename = "errorText")]
        error_text: String,
    },
    Finish,
}

/// Encode one event as an SSE frame.
pub fn encode_sse_event(event: &UiStreamEvent) -> String {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("data: {}\n\n", json)
}

/// Producer half of a streamed response.
#[derive(Clone)]
pub struct StreamWriter {
    tx: mpsc::Sender<std::result::Result<Frame<Bytes>, Infallible>>,
    mirror: Option<StreamMirror>,
}

impl StreamWriter {
    pub async fn write(&self, event: &UiStreamEvent) {
        self.write_raw(encode_sse_event(event)).await;
    }

    /// Write the terminal frame.
    pub async fn done(&self) {
        self.write_raw(SSE_DONE.to_string()).await;
    }

    pub async fn write_raw(&self, frame: String) {
        if let Some(mirror) = &self.mirror {
            mirror.append(&frame).await;
        }
        // A closed receiver means the client went away; the mirror above
        // already captured the frame for resumption.
        let _ = self.tx.send(Ok(Frame::data(Bytes::from(frame)))).await;
    }
}

/// Create a writer/body pair for a streamed response.
pub fn sse_channel(mirror: Option<StreamMirror>) -> (StreamWriter, SseBody) {
    let (tx, rx) = mpsc::channel(64);
    (
        StreamWriter { tx, mirror },
        StreamBody::new(ReceiverStream::new(rx)),
    )
}

/// A body that yields one frame and ends; used for the non-streamed
/// responses of a streaming-enabled function.
pub fn single_frame_body(content: String) -> SseBody {
    let (tx, rx) = mpsc::channel(1);
    let _ = tx.try_send(Ok(Frame::data(Bytes::from(content))));
    StreamBody::new(ReceiverStream::new(rx))
}

/// An empty body.
pub fn empty_body() -> SseBody {
    let (_tx, rx) = mpsc::channel(1);
    StreamBody::new(ReceiverStream::new(rx))
}

fn stream_key(stream_id: Uuid) -> String {
    format!("citechat:stream:{}", stream_id)
}

/// Handle to the Redis mirror backing resumable streams.
#[derive(Clone)]
pub struct StreamContext {
    manager: redis::aio::ConnectionManager,
}

impl StreamContext {
    /// Connect to Redis. Returns `None` (with a logged notice) when no URL
    /// is configured, which disables resumable streams.
    pub async fn connect(redis_url: Option<&str>) -> Option<Self> {
        let Some(url) = redis_url else {
            tracing::info!("Resumable streams are disabled due to missing REDIS_URL");
            return None;
        };

        let client = match redis::Client::open(url) {
            Ok(client) => client,
            Err(e) => {
                warn!("invalid REDIS_URL, resumable streams disabled: {}", e);
                return None;
            }
        };

        match client.get_connection_manager().await {
            Ok(manager) => Some(Self { manager }),
            Err(e) => {
                warn!("redis connection failed, resumable streams disabled: {}", e);
                None
            }
        }
    }

    /// Mirror handle for a new live stream.
    pub fn mirror(&self, stream_id: Uuid) -> StreamMirror {
        StreamMirror {
            manager: self.manager.clone(),
            key: stream_key(stream_id),
        }
    }

    /// Replay a recorded stream, following appended frames until the
    /// terminator. Returns `None` when nothing was recorded under the id.
    pub async fn resume_body(&self, stream_id: Uuid) -> Option<SseBody> {
        let key = stream_key(stream_id);
        let mut conn = self.manager.clone();

        let exists: bool = match conn.exists(&key).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!("stream resume lookup failed: {}", e);
                return None;
            }
        };
        if !exists {
            return None;
        }

        let (writer, body) = sse_channel(None);
        let manager = self.manager.clone();

        tokio::spawn(async move {
            let mut offset: isize = 0;
            let deadline = tokio::time::Instant::now() + RESUME_FOLLOW_TIMEOUT;

            loop {
                let mut conn = manager.clone();
                let frames: Vec<String> = match conn.lrange(&key, offset, -1).await {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!("stream resume read failed: {}", e);
                        return;
                    }
                };

                for frame in frames {
                    offset += 1;
                    let terminal = frame == SSE_DONE;
                    writer.write_raw(frame).await;
                    if terminal {
                        return;
                    }
                }

                if tokio::time::Instant::now() >= deadline {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        });

        Some(body)
    }
}

/// Appends live frames to a TTL'd Redis list.
#[derive(Clone)]
pub struct StreamMirror {
    manager: redis::aio::ConnectionManager,
    key: String,
}

impl StreamMirror {
    /// Mirror failures are logged and never break the primary stream.
    pub async fn append(&self, frame: &str) {
        let mut conn = self.manager.clone();
        let result: redis::RedisResult<()> = redis::pipe()
            .rpush(&self.key, frame)
            .ignore()
            .expire(&self.key, STREAM_TTL_SECONDS)
            .ignore()
            .query_async(&mut conn)
            .await;

        if let Err(e) = result {
            warn!("failed to mirror stream frame: {}", e);
        }
    }
}

/// Re-chunks raw model text deltas at whitespace boundaries so the client
/// receives word-granular deltas.
#[derive(Debug, Default)]
pub struct WordChunker {
    buffer: String,
}

impl WordChunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw delta, returning the word chunks it completed.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        for c in delta.chars() {
            self.buffer.push(c);
            if c.is_whitespace() {
                chunks.push(std::mem::take(&mut self.buffer));
            }
        }
        chunks
    }

    /// Flush any trailing partial word.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tags() {
        let event = UiStreamEvent::TextDelta {
            id: "t1".to_string(),
            delta: "hi".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "text-delta");
        assert_eq!(json["delta"], "hi");

        let tool = UiStreamEvent::ToolInputAvailable {
            tool_call_id: "c1".to_string(),
            tool_name: "get_weather".to_string(),
            input: serde_json::json!({}),
        };
        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["type"], "tool-input-available");
        assert_eq!(json["toolCallId"], "c1");
        assert_eq!(json["toolName"], "get_weather");
    }

    #[test]
    fn test_data_event_names_keep_original_casing() {
        let event = UiStreamEvent::DataTextDelta {
            data: "chunk".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "data-textDelta");

        let title = UiStreamEvent::DataChatTitle {
            data: "My chat".to_string(),
        };
        assert_eq!(serde_json::to_value(&title).unwrap()["type"], "data-chat-title");
    }

    #[test]
    fn test_encode_sse_frame_shape() {
        let frame = encode_sse_event(&UiStreamEvent::Finish);
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));
        assert_eq!(SSE_DONE, "data: [DONE]\n\n");
    }

    #[test]
    fn test_word_chunker_splits_on_whitespace() {
        let mut chunker = WordChunker::new();
        let mut output = String::new();

        for delta in ["Hel", "lo wor", "ld and", " beyond"] {
            for chunk in chunker.push(delta) {
                output.push_str(&chunk);
            }
        }
        if let Some(rest) = chunker.flush() {
            output.push_str(&rest);
        }

        assert_eq!(output, "Hello world and beyond");
    }

    #[test]
    fn test_word_chunker_emits_whole_words() {
        let mut chunker = WordChunker::new();
        let chunks = chunker.push("one two thr");
        assert_eq!(chunks, vec!["one ".to_string(), "two ".to_string()]);
        assert_eq!(chunker.flush(), Some("thr".to_string()));
        assert_eq!(chunker.flush(), None);
    }

    #[tokio::test]
    async fn test_sse_channel_round_trip() {
        use http_body_util::BodyExt;

        let (writer, body) = sse_channel(None);
        writer.write(&UiStreamEvent::Finish).await;
        writer.done().await;
        drop(writer);

        let collected = body.collect().await.unwrap().to_bytes();
        let text = String::from_utf8(collected.to_vec()).unwrap();
        assert!(text.contains(r#""type":"finish""#));
        assert!(text.ends_with(SSE_DONE));
    }
}
