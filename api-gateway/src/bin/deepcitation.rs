//! DeepCitation Lambda - proxies file buffers and LLM output to the
//! citation service.
//!
//! Endpoints:
//! - POST /deepcitation/prepare - upload files, get prompt portions back
//! - POST /deepcitation/verify - verify an LLM output's citations
//!
//! Failures of the vendor service are caught, logged, and surfaced as a
//! generic 500; there is no retry.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use validator::Validate;

use shared::citation;
use shared::deepcitation::{DeepCitationClient, FileDataPart, FileInput};
use shared::http::{error_response, json_response};
use shared::{extract_user_from_context, validate_token, Config};

/// Prepare request: files to upload by URL.
#[derive(Debug, Deserialize, Validate)]
struct PrepareRequest {
    #[validate(length(min = 1, max = 16), nested)]
    files: Vec<PrepareFile>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
struct PrepareFile {
    #[validate(url)]
    url: String,
    #[validate(length(min = 1, max = 256))]
    filename: String,
}

/// Verify request: an LLM output plus the prepared file records.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest {
    #[validate(length(min = 1))]
    llm_output: String,
    file_data_parts: Option<Vec<FileDataPart>>,
}

/// Prepare response with base64-encoded prompt portions.
#[derive(Debug, Serialize)]
struct PrepareResponse {
    #[serde(rename = "fileDataParts")]
    file_data_parts: Vec<FileDataPart>,
    #[serde(rename = "deepTextPromptPortion")]
    deep_text_prompt_portion: Vec<String>,
    /// Flag to indicate base64 encoding
    encoded: bool,
}

/// Application state shared across requests.
struct AppState {
    http_client: reqwest::Client,
    deepcitation: Option<DeepCitationClient>,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env().map_err(|e| format!("configuration error: {}", e))?;
        let http_client = reqwest::Client::new();

        let deepcitation = config.deepcitation_api_key.as_ref().map(|key| {
            DeepCitationClient::new(
                http_client.clone(),
                key.clone(),
                config.deepcitation_api_url.clone(),
            )
        });

        Ok(Self {
            http_client,
            deepcitation,
        })
    }
}

/// The proxy routes only need to know a session exists.
fn is_authenticated(event: &Request) -> bool {
    if let Some(context) = event.request_context_ref() {
        if let Some(authorizer) = context.authorizer() {
            if let Some(claims) = authorizer.fields.get("claims") {
                return extract_user_from_context(claims).is_ok();
            }
        }
    }

    event
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|header| validate_token(header).is_ok())
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let raw_path = event.uri().path();
    // Strip /api stage prefix if present
    let path = raw_path.strip_prefix("/api").unwrap_or(raw_path);
    let method = event.method().as_str();

    if !is_authenticated(&event) {
        return error_response(401, "Unauthorized");
    }

    let Some(deepcitation) = &state.deepcitation else {
        return error_response(500, "DeepCitation API key not configured");
    };

    match (method, path) {
        ("POST", "/deepcitation/prepare") => {
            let request: PrepareRequest = match shared::http::parse_json_body(event.body())? {
                Ok(request) => request,
                Err(response) => return Ok(response),
            };
            if request.validate().is_err() {
                return error_response(400, "Invalid request body");
            }

            handle_prepare(&state, deepcitation, request).await
        }
        ("POST", "/deepcitation/verify") => {
            let request: VerifyRequest = match shared::http::parse_json_body(event.body())? {
                Ok(request) => request,
                Err(response) => return Ok(response),
            };
            if request.validate().is_err() {
                return error_response(400, "Invalid request body");
            }

            handle_verify(deepcitation, request).await
        }
        _ => error_response(404, "Not found"),
    }
}

async fn handle_prepare(
    state: &AppState,
    deepcitation: &DeepCitationClient,
    request: PrepareRequest,
) -> Result<Response<Body>, Error> {
    // Fetch all files concurrently and await them together.
    let downloads = request.files.iter().map(|file| {
        let http_client = state.http_client.clone();
        let url = file.url.clone();
        let filename = file.filename.clone();
        async move {
            let response = http_client.get(&url).send().await?.error_for_status()?;
            let bytes = response.bytes().await?;
            Ok::<FileInput, reqwest::Error>(FileInput {
                filename,
                bytes: bytes.to_vec(),
            })
        }
    });

    let files = match futures::future::try_join_all(downloads).await {
        Ok(files) => files,
        Err(e) => {
            error!("DeepCitation prepare error: {}", e);
            return error_response(500, "Failed to prepare files for citation");
        }
    };

    let output = match deepcitation.prepare_files(files).await {
        Ok(output) => output,
        Err(e) => {
            error!("DeepCitation prepare error: {}", e);
            return error_response(500, "Failed to prepare files for citation");
        }
    };

    info!(
        files = output.file_data_parts.len(),
        "prepared files for citation"
    );

    // Base64 encode the prompt portions to prevent newline escaping issues
    // in transit.
    let response = PrepareResponse {
        file_data_parts: output
            .file_data_parts
            .into_iter()
            .map(|mut part| {
                part.deep_text_prompt_portion = BASE64.encode(&part.deep_text_prompt_portion);
                part
            })
            .collect(),
        deep_text_prompt_portion: output
            .deep_text_prompt_portion
            .iter()
            .map(|text| BASE64.encode(text))
            .collect(),
        encoded: true,
    };

    let body = serde_json::to_string(&response)?;

    Ok(Response::builder()
        .status(200)
        .header("content-type", "application/json")
        .header(
            "cache-control",
            "no-store, no-cache, must-revalidate, proxy-revalidate",
        )
        .header("pragma", "no-cache")
        .header("expires", "0")
        .body(Body::from(body))
        .expect("Failed to build response"))
}

async fn handle_verify(
    deepcitation: &DeepCitationClient,
    request: VerifyRequest,
) -> Result<Response<Body>, Error> {
    let extracted = citation::extract_citations(&request.llm_output);

    info!(
        output_chars = request.llm_output.len(),
        citations = extracted.len(),
        files = request.file_data_parts.as_ref().map_or(0, |f| f.len()),
        "verifying citations"
    );

    // No cite tags means nothing for the vendor to verify.
    if extracted.is_empty() {
        return json_response(
            200,
            &serde_json::json!({"verifications": {}, "citations": []}),
        );
    }

    let result = match deepcitation
        .verify(&request.llm_output, request.file_data_parts.as_deref())
        .await
    {
        Ok(result) => result,
        Err(e) => {
            error!("DeepCitation verify error: {}", e);
            return error_response(500, "Failed to verify citations");
        }
    };

    info!(
        verifications = result.verifications.len(),
        "verification complete"
    );

    // Pair each citation with its verification, by key first and by
    // document-order position when the key misses. A miss on both leaves
    // the citation unverified.
    let ordered_keys: Vec<String> = extracted.iter().map(|c| c.key.clone()).collect();
    let citations: Vec<serde_json::Value> = extracted
        .iter()
        .enumerate()
        .map(|(index, extracted)| {
            let verification = citation::match_verification(
                &result.verifications,
                &extracted.key,
                &ordered_keys,
                index,
            );
            serde_json::json!({
                "key": extracted.key,
                "citation": extracted.citation,
                "verification": verification,
            })
        })
        .collect();

    let mut body = serde_json::to_value(&result)?;
    body["citations"] = serde_json::Value::Array(citations);

    json_response(200, &body)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);

    run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}
