//! DeepCitation SaaS client.
//!
//! The citation extraction, key generation and verification logic lives in
//! the hosted DeepCitation service; this client only moves bytes. Fields we
//! never interpret ride along in `extra` so vendor additions survive the
//! round trip.

use std::collections::HashMap;

use reqwest::multipart;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ChatSdkError, ErrorKind, Surface};
use crate::Result;

/// Per-file record assigned by the prepare call, keyed by the
/// vendor-assigned attachment id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDataPart {
    #[serde(rename = "attachmentId")]
    pub attachment_id: String,
    #[serde(rename = "deepTextPromptPortion")]
    pub deep_text_prompt_portion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Vendor judgment of whether a citation's claimed source text is found in
/// the referenced document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub status: String,
    #[serde(rename = "pageNumber", skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(rename = "matchedText", skip_serializing_if = "Option::is_none")]
    pub matched_text: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        self.status == "verified"
    }
}

/// Result of preparing files for citation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareOutput {
    #[serde(rename = "fileDataParts")]
    pub file_data_parts: Vec<FileDataPart>,
    #[serde(rename = "deepTextPromptPortion")]
    pub deep_text_prompt_portion: Vec<String>,
}

/// Result of verifying an LLM output against prepared files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOutput {
    #[serde(default)]
    pub verifications: HashMap<String, Verification>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A file buffer to prepare.
#[derive(Debug, Clone)]
pub struct FileInput {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    #[serde(rename = "llmOutput")]
    llm_output: &'a str,
    #[serde(rename = "fileDataParts", skip_serializing_if = "Option::is_none")]
    file_data_parts: Option<&'a [FileDataPart]>,
}

/// Client for the DeepCitation service.
#[derive(Clone)]
pub struct DeepCitationClient {
    http_client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl DeepCitationClient {
    pub fn new(http_client: reqwest::Client, api_key: String, base_url: String) -> Self {
        Self {
            http_client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn service_error(context: &str, err: impl std::fmt::Display) -> ChatSdkError {
        ChatSdkError::with_cause(
            ErrorKind::Offline,
            Surface::Api,
            format!("DeepCitation {} failed: {}", context, err),
        )
    }

    /// Upload file buffers and receive per-file prompt portions.
    pub async fn prepare_files(&self, files: Vec<FileInput>) -> Result<PrepareOutput> {
        let mut form = multipart::Form::new();
        for file in files {
            form = form.part(
                "files",
                multipart::Part::bytes(file.bytes).file_name(file.filename),
            );
        }

        let response = self
            .http_client
            .post(format!("{}/prepare", self.base_url))
            .header("x-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Self::service_error("prepare", e))?
            .error_for_status()
            .map_err(|e| Self::service_error("prepare", e))?;

        let output: PrepareOutput = response
            .json()
            .await
            .map_err(|e| Self::service_error("prepare", e))?;

        debug!(
            files = output.file_data_parts.len(),
            portions = output.deep_text_prompt_portion.len(),
            "prepared files for citation"
        );

        Ok(output)
    }

    /// Verify an LLM output against prepared files.
    pub async fn verify(
        &self,
        llm_output: &str,
        file_data_parts: Option<&[FileDataPart]>,
    ) -> Result<VerifyOutput> {
        let response = self
            .http_client
            .post(format!("{}/verify", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(&VerifyRequest {
                llm_output,
                file_data_parts,
            })
            .send()
            .await
            .map_err(|e| Self::service_error("verify", e))?
            .error_for_status()
            .map_err(|e| Self::service_error("verify", e))?;

        let output: VerifyOutput = response
            .json()
            .await
            .map_err(|e| Self::service_error("verify", e))?;

        debug!(
            verifications = output.verifications.len(),
            "verified citations"
        );

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_data_part_preserves_unknown_fields() {
        let json = serde_json::json!({
            "attachmentId": "file_1",
            "deepTextPromptPortion": "blob",
            "filename": "report.pdf",
            "checksum": "abc123",
        });

        let part: FileDataPart = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(part.attachment_id, "file_1");
        assert_eq!(part.extra["checksum"], "abc123");

        let back = serde_json::to_value(&part).unwrap();
        assert_eq!(back, json);
    }

    #[test]
    fn test_verify_output_defaults_to_empty_map() {
        let output: VerifyOutput = serde_json::from_str("{}").unwrap();
        assert!(output.verifications.is_empty());
    }

    #[test]
    fn test_verification_status() {
        let verification: Verification = serde_json::from_value(serde_json::json!({
            "status": "verified",
            "pageNumber": 4,
        }))
        .unwrap();

        assert!(verification.is_verified());
        assert_eq!(verification.page_number, Some(4));
    }
}
