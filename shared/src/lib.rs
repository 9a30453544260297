//! Shared library for CiteChat Lambda functions.
//!
//! This crate provides common utilities, types, and clients used across all
//! Lambda functions.

pub mod auth;
pub mod citation;
pub mod config;
pub mod db;
pub mod deepcitation;
pub mod entitlements;
pub mod error;
pub mod http;
pub mod llm;
pub mod models;
pub mod prompts;
pub mod queries;
pub mod secrets;
pub mod stream;
pub mod tools;

pub use auth::{extract_user_from_context, validate_token, AuthenticatedUser, UserType};
pub use config::Config;
pub use deepcitation::{DeepCitationClient, FileDataPart, Verification};
pub use entitlements::{entitlements_for, Entitlements};
pub use error::{ChatSdkError, ErrorKind, Result, Surface};
pub use http::ApiResponse;
pub use llm::LlmClient;
pub use models::{Attachment, ChatMessage, ChatVisibility, DeepCitationSession, MessagePart, MessageRole};
pub use secrets::{get_database_credentials, get_secret, DatabaseCredentials};
pub use stream::{StreamContext, StreamWriter, UiStreamEvent};
