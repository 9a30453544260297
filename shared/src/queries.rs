//! Database queries for chats, messages, streams, documents and suggestions.
//!
//! Tables (created out of band by the infrastructure stack):
//! - `chats(id, user_id, title, visibility, created_at)`
//! - `messages(id, chat_id, role, parts, attachments, created_at)`
//! - `streams(id, chat_id, created_at)`
//! - `documents(id, created_at, title, kind, content, user_id)` keyed by
//!   `(id, created_at)` so updates append versions
//! - `suggestions(id, document_id, document_created_at, original_text,
//!   suggested_text, description, is_resolved, user_id, created_at)`

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Attachment, ChatMessage, ChatVisibility, MessagePart, MessageRole};
use crate::Result;

/// A chat row.
#[derive(Debug, Clone, Serialize)]
pub struct Chat {
    pub id: Uuid,
    #[serde(rename = "userId")]
    pub user_id: Uuid,
    pub title: String,
    pub visibility: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// A message row; `parts` and `attachments` are stored as JSONB.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub role: String,
    pub parts: serde_json::Value,
    pub attachments: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl MessageRow {
    /// Convert a row into the UI message shape.
    pub fn into_chat_message(self) -> Result<ChatMessage> {
        let role = match self.role.as_str() {
            "assistant" => MessageRole::Assistant,
            "system" => MessageRole::System,
            _ => MessageRole::User,
        };
        let parts: Vec<MessagePart> = serde_json::from_value(self.parts)?;

        Ok(ChatMessage {
            id: self.id,
            role,
            parts,
        })
    }
}

/// Convert message rows to UI messages, oldest first.
pub fn convert_to_ui_messages(rows: Vec<MessageRow>) -> Result<Vec<ChatMessage>> {
    rows.into_iter().map(MessageRow::into_chat_message).collect()
}

/// A new message to persist.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
    pub attachments: Vec<Attachment>,
}

/// A document version row.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: Uuid,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub kind: String,
    pub content: String,
    #[serde(rename = "userId")]
    pub user_id: Uuid,
}

/// A writing suggestion tied to a document version.
#[derive(Debug, Clone)]
pub struct NewSuggestion {
    pub document_id: Uuid,
    pub document_created_at: DateTime<Utc>,
    pub original_text: String,
    pub suggested_text: String,
    pub description: Option<String>,
}

pub async fn get_chat_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Chat>> {
    let row = sqlx::query_as::<_, (Uuid, Uuid, String, String, DateTime<Utc>)>(
        "SELECT id, user_id, title, visibility, created_at FROM chats WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(id, user_id, title, visibility, created_at)| Chat {
        id,
        user_id,
        title,
        visibility,
        created_at,
    }))
}

pub async fn save_chat(
    pool: &PgPool,
    id: Uuid,
    user_id: Uuid,
    title: &str,
    visibility: ChatVisibility,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO chats (id, user_id, title, visibility, created_at) VALUES ($1, $2, $3, $4, NOW())",
    )
    .bind(id)
    .bind(user_id)
    .bind(title)
    .bind(visibility.as_str())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn update_chat_title_by_id(pool: &PgPool, chat_id: Uuid, title: &str) -> Result<()> {
    sqlx::query("UPDATE chats SET title = $2 WHERE id = $1")
        .bind(chat_id)
        .bind(title)
        .execute(pool)
        .await?;

    Ok(())
}

/// Delete a chat with its messages and stream ids, returning the chat row.
pub async fn delete_chat_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Chat>> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM messages WHERE chat_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM streams WHERE chat_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let row = sqlx::query_as::<_, (Uuid, Uuid, String, String, DateTime<Utc>)>(
        "DELETE FROM chats WHERE id = $1 RETURNING id, user_id, title, visibility, created_at",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(row.map(|(id, user_id, title, visibility, created_at)| Chat {
        id,
        user_id,
        title,
        visibility,
        created_at,
    }))
}

pub async fn get_messages_by_chat_id(pool: &PgPool, chat_id: Uuid) -> Result<Vec<MessageRow>> {
    let rows = sqlx::query_as::<
        _,
        (
            Uuid,
            Uuid,
            String,
            serde_json::Value,
            serde_json::Value,
            DateTime<Utc>,
        ),
    >(
        "SELECT id, chat_id, role, parts, attachments, created_at
         FROM messages WHERE chat_id = $1 ORDER BY created_at ASC",
    )
    .bind(chat_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(
            |(id, chat_id, role, parts, attachments, created_at)| MessageRow {
                id,
                chat_id,
                role,
                parts,
                attachments,
                created_at,
            },
        )
        .collect())
}

pub async fn save_messages(pool: &PgPool, messages: &[NewMessage]) -> Result<()> {
    let mut tx = pool.begin().await?;

    for message in messages {
        sqlx::query(
            "INSERT INTO messages (id, chat_id, role, parts, attachments, created_at)
             VALUES ($1, $2, $3, $4, $5, NOW())",
        )
        .bind(message.id)
        .bind(message.chat_id)
        .bind(message.role.as_str())
        .bind(serde_json::to_value(&message.parts)?)
        .bind(serde_json::to_value(&message.attachments)?)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(())
}

/// Replace the parts of an existing message (tool approval flow).
pub async fn update_message(pool: &PgPool, id: Uuid, parts: &[MessagePart]) -> Result<()> {
    sqlx::query("UPDATE messages SET parts = $2 WHERE id = $1")
        .bind(id)
        .bind(serde_json::to_value(parts)?)
        .execute(pool)
        .await?;

    Ok(())
}

/// Count a user's messages over a trailing window, for rate limiting.
pub async fn get_message_count_by_user_id(
    pool: &PgPool,
    user_id: Uuid,
    difference_in_hours: i32,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(m.id)
         FROM messages m
         JOIN chats c ON c.id = m.chat_id
         WHERE c.user_id = $1
           AND m.role = 'user'
           AND m.created_at >= NOW() - make_interval(hours => $2)",
    )
    .bind(user_id)
    .bind(difference_in_hours)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

pub async fn create_stream_id(pool: &PgPool, stream_id: Uuid, chat_id: Uuid) -> Result<()> {
    sqlx::query("INSERT INTO streams (id, chat_id, created_at) VALUES ($1, $2, NOW())")
        .bind(stream_id)
        .bind(chat_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Stream ids for a chat, oldest first.
pub async fn get_stream_ids_by_chat_id(pool: &PgPool, chat_id: Uuid) -> Result<Vec<Uuid>> {
    let ids = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM streams WHERE chat_id = $1 ORDER BY created_at ASC",
    )
    .bind(chat_id)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// Append a document version.
pub async fn save_document(
    pool: &PgPool,
    id: Uuid,
    title: &str,
    kind: &str,
    content: &str,
    user_id: Uuid,
) -> Result<Document> {
    let (created_at,): (DateTime<Utc>,) = sqlx::query_as(
        "INSERT INTO documents (id, created_at, title, kind, content, user_id)
         VALUES ($1, NOW(), $2, $3, $4, $5) RETURNING created_at",
    )
    .bind(id)
    .bind(title)
    .bind(kind)
    .bind(content)
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(Document {
        id,
        created_at,
        title: title.to_string(),
        kind: kind.to_string(),
        content: content.to_string(),
        user_id,
    })
}

/// Latest version of a document.
pub async fn get_document_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Document>> {
    let row = sqlx::query_as::<_, (Uuid, DateTime<Utc>, String, String, String, Uuid)>(
        "SELECT id, created_at, title, kind, content, user_id
         FROM documents WHERE id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(id, created_at, title, kind, content, user_id)| Document {
        id,
        created_at,
        title,
        kind,
        content,
        user_id,
    }))
}

pub async fn save_suggestions(
    pool: &PgPool,
    user_id: Uuid,
    suggestions: &[NewSuggestion],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    for suggestion in suggestions {
        sqlx::query(
            "INSERT INTO suggestions (id, document_id, document_created_at, original_text,
                                      suggested_text, description, is_resolved, user_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7, NOW())",
        )
        .bind(Uuid::new_v4())
        .bind(suggestion.document_id)
        .bind(suggestion.document_created_at)
        .bind(&suggestion.original_text)
        .bind(&suggestion.suggested_text)
        .bind(&suggestion.description)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_row_conversion() {
        let row = MessageRow {
            id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            role: "assistant".to_string(),
            parts: serde_json::json!([{"type": "text", "text": "hi"}]),
            attachments: serde_json::json!([]),
            created_at: Utc::now(),
        };

        let message = row.into_chat_message().unwrap();
        assert_eq!(message.role, MessageRole::Assistant);
        assert_eq!(message.parts.len(), 1);
    }

    #[test]
    fn test_unknown_role_defaults_to_user() {
        let row = MessageRow {
            id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            role: "tool".to_string(),
            parts: serde_json::json!([]),
            attachments: serde_json::json!([]),
            created_at: Utc::now(),
        };

        assert_eq!(row.into_chat_message().unwrap().role, MessageRole::User);
    }

    #[test]
    fn test_malformed_parts_error() {
        let row = MessageRow {
            id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            role: "user".to_string(),
            parts: serde_json::json!({"not": "an array"}),
            attachments: serde_json::json!([]),
            created_at: Utc::now(),
        };

        assert!(row.into_chat_message().is_err());
    }
}
