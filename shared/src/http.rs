//! HTTP helpers for Lambda functions.

use lambda_http::{Body, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::error;

use crate::ChatSdkError;

/// Standard API response wrapper for the non-streaming routes.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Wire shape of a typed error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Create a JSON response with the given status code and data.
pub fn json_response<T: Serialize>(
    status: u16,
    data: &T,
) -> Result<Response<Body>, lambda_http::Error> {
    Ok(Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(data)?))
        .expect("Failed to build response"))
}

/// Create an error response with the given status code and message.
pub fn error_response(
    status: u16,
    message: impl Into<String>,
) -> Result<Response<Body>, lambda_http::Error> {
    json_response(status, &ApiResponse::<()>::error(message))
}

/// Serialize a [`ChatSdkError`] into its wire body.
///
/// Loggable-only errors (database surface) log the cause and hand the
/// client a blank code with a generic message.
pub fn error_body(err: &ChatSdkError) -> ErrorBody {
    if err.is_loggable_only() {
        error!(code = %err.code(), cause = ?err.cause(), "internal error");
        return ErrorBody {
            code: String::new(),
            message: "Something went wrong. Please try again later.".to_string(),
        };
    }

    ErrorBody {
        code: err.code(),
        message: err.message().to_string(),
    }
}

/// Create a response for a [`ChatSdkError`] with its mapped status code.
pub fn chat_error_response(err: &ChatSdkError) -> Result<Response<Body>, lambda_http::Error> {
    json_response(err.status_code(), &error_body(err))
}

/// Parse request body as JSON, returning a 400 response on failure.
///
/// Returns `Ok(Ok(T))` on successful parse, `Ok(Err(Response))` on parse
/// error (400), or `Err(lambda_http::Error)` on serialization failure.
pub fn parse_json_body<T: DeserializeOwned>(
    body: &Body,
) -> Result<Result<T, Response<Body>>, lambda_http::Error> {
    match serde_json::from_slice(body.as_ref()) {
        Ok(parsed) => Ok(Ok(parsed)),
        Err(e) => {
            let response = error_response(400, format!("Invalid request body: {}", e))?;
            Ok(Err(response))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, Surface};

    #[test]
    fn test_error_body_carries_code_and_message() {
        let err = ChatSdkError::new(ErrorKind::Forbidden, Surface::Chat);
        let body = error_body(&err);
        assert_eq!(body.code, "forbidden:chat");
        assert!(body.message.contains("another user"));
    }

    #[test]
    fn test_database_error_body_is_generic() {
        let err = ChatSdkError::with_cause(ErrorKind::BadRequest, Surface::Database, "boom");
        let body = error_body(&err);
        assert_eq!(body.code, "");
        assert_eq!(body.message, "Something went wrong. Please try again later.");
    }
}
