//! Error types for CiteChat Lambda functions.
//!
//! Every failure surfaced to a client is one of a closed set of
//! `category:surface` codes, each with a fixed HTTP status and user-facing
//! message. Database-surface errors never leak their cause to the client.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, ChatSdkError>;

/// Error category, the part before the colon in an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimit,
    Offline,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Offline => "offline",
        }
    }

    /// HTTP status code for this category.
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::RateLimit => 429,
            ErrorKind::Offline => 503,
        }
    }
}

/// The part of the system an error belongs to, the part after the colon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Api,
    Auth,
    Chat,
    Stream,
    Database,
    Document,
    Suggestions,
}

impl Surface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Surface::Api => "api",
            Surface::Auth => "auth",
            Surface::Chat => "chat",
            Surface::Stream => "stream",
            Surface::Database => "database",
            Surface::Document => "document",
            Surface::Suggestions => "suggestions",
        }
    }
}

/// A typed application error carrying its `category:surface` code.
#[derive(Error, Debug)]
#[error("{}: {}", self.code(), self.message())]
pub struct ChatSdkError {
    kind: ErrorKind,
    surface: Surface,
    cause: Option<String>,
}

impl ChatSdkError {
    pub fn new(kind: ErrorKind, surface: Surface) -> Self {
        Self {
            kind,
            surface,
            cause: None,
        }
    }

    pub fn with_cause(kind: ErrorKind, surface: Surface, cause: impl Into<String>) -> Self {
        Self {
            kind,
            surface,
            cause: Some(cause.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn surface(&self) -> Surface {
        self.surface
    }

    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    /// The wire code, e.g. `rate_limit:chat`.
    pub fn code(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.surface.as_str())
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    /// Whether the client only gets a generic message while the real cause
    /// goes to the log.
    pub fn is_loggable_only(&self) -> bool {
        matches!(self.surface, Surface::Database)
    }

    /// User-facing message for this error code.
    pub fn message(&self) -> &'static str {
        match (self.kind, self.surface) {
            (ErrorKind::BadRequest, Surface::Api) => {
                "The request couldn't be processed. Please check your input and try again."
            }
            (ErrorKind::Unauthorized, Surface::Auth) => "You need to sign in before continuing.",
            (ErrorKind::Forbidden, Surface::Auth) => {
                "Your account does not have access to this feature."
            }
            (ErrorKind::RateLimit, Surface::Chat) => {
                "You have exceeded your maximum number of messages for the day. Please try again later."
            }
            (ErrorKind::NotFound, Surface::Chat) => {
                "The requested chat was not found. Please check the chat ID and try again."
            }
            (ErrorKind::Forbidden, Surface::Chat) => {
                "This chat belongs to another user. Please check the chat ID and try again."
            }
            (ErrorKind::Unauthorized, Surface::Chat) => {
                "You need to sign in to view this chat. Please sign in and try again."
            }
            (ErrorKind::Offline, Surface::Chat) => {
                "We're having trouble sending your message. Please check your internet connection and try again."
            }
            (ErrorKind::NotFound, Surface::Stream) => {
                "The stream for this chat was not found. It may have already finished."
            }
            (ErrorKind::NotFound, Surface::Document) => {
                "The requested document was not found. Please check the document ID and try again."
            }
            (ErrorKind::Forbidden, Surface::Document) => {
                "This document belongs to another user. Please check the document ID and try again."
            }
            (ErrorKind::Unauthorized, Surface::Document) => {
                "You need to sign in to view this document. Please sign in and try again."
            }
            (ErrorKind::BadRequest, Surface::Document) => {
                "The request to create or update the document was invalid. Please check your input and try again."
            }
            (ErrorKind::NotFound, Surface::Suggestions) => {
                "The requested suggestions were not found. Please try again."
            }
            (_, Surface::Database) => "An error occurred while executing a database query.",
            _ => "Something went wrong. Please try again later.",
        }
    }
}

impl From<sqlx::Error> for ChatSdkError {
    fn from(err: sqlx::Error) -> Self {
        ChatSdkError::with_cause(ErrorKind::BadRequest, Surface::Database, err.to_string())
    }
}

impl From<serde_json::Error> for ChatSdkError {
    fn from(err: serde_json::Error) -> Self {
        ChatSdkError::with_cause(ErrorKind::BadRequest, Surface::Api, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_format() {
        let err = ChatSdkError::new(ErrorKind::RateLimit, Surface::Chat);
        assert_eq!(err.code(), "rate_limit:chat");
        assert_eq!(err.status_code(), 429);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ChatSdkError::new(ErrorKind::BadRequest, Surface::Api).status_code(),
            400
        );
        assert_eq!(
            ChatSdkError::new(ErrorKind::Unauthorized, Surface::Chat).status_code(),
            401
        );
        assert_eq!(
            ChatSdkError::new(ErrorKind::Forbidden, Surface::Chat).status_code(),
            403
        );
        assert_eq!(
            ChatSdkError::new(ErrorKind::NotFound, Surface::Stream).status_code(),
            404
        );
        assert_eq!(
            ChatSdkError::new(ErrorKind::Offline, Surface::Chat).status_code(),
            503
        );
    }

    #[test]
    fn test_database_errors_are_loggable_only() {
        let err = ChatSdkError::with_cause(
            ErrorKind::BadRequest,
            Surface::Database,
            "connection refused",
        );
        assert!(err.is_loggable_only());
        assert_eq!(
            err.message(),
            "An error occurred while executing a database query."
        );
        assert_eq!(err.cause(), Some("connection refused"));
    }

    #[test]
    fn test_sqlx_error_maps_to_database_surface() {
        let err: ChatSdkError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code(), "bad_request:database");
        assert!(err.is_loggable_only());
    }
}
