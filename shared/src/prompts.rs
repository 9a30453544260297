//! Prompt assembly for the chat route.

use lambda_http::http::HeaderMap;

pub const REGULAR_PROMPT: &str =
    "You are a friendly assistant! Keep your responses concise and helpful.";

const TOOLS_PROMPT: &str = "\
You have tools available for weather lookups and for working with documents. \
Use create_document for substantial writing tasks (essays, emails, reports) \
the user will want to keep, update_document to revise an existing document \
following the user's instructions, and request_suggestions to propose \
improvements to a document. For short conversational answers, reply directly \
without creating a document.";

const CITATION_INSTRUCTIONS: &str = "\
Citation syntax to use within Markdown: when a statement is supported by the \
attached documents, cite it inline with a tag of the form \
<cite attachment_id=\"<id>\" page_number=\"<page>\" full_phrase=\"<exact text from the document>\"/> \
placed immediately after the statement. Quote full_phrase verbatim from the \
attachment text. Only cite text that appears in the attachments; never invent \
attachment ids or page numbers.";

/// Signals about the origin of the request, forwarded from edge headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestHints {
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub city: Option<String>,
    pub country: Option<String>,
}

impl RequestHints {
    /// Read CloudFront viewer-location headers.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        Self {
            longitude: get("cloudfront-viewer-longitude").and_then(|v| v.parse().ok()),
            latitude: get("cloudfront-viewer-latitude").and_then(|v| v.parse().ok()),
            city: get("cloudfront-viewer-city"),
            country: get("cloudfront-viewer-country"),
        }
    }

    fn render(&self) -> String {
        format!(
            "About the origin of user's request:\n- lat: {}\n- lon: {}\n- city: {}\n- country: {}",
            self.latitude.map_or("unknown".to_string(), |v| v.to_string()),
            self.longitude.map_or("unknown".to_string(), |v| v.to_string()),
            self.city.as_deref().unwrap_or("unknown"),
            self.country.as_deref().unwrap_or("unknown"),
        )
    }
}

/// Assemble the system prompt for a model selection.
///
/// Reasoning models run without tools, so they get no tool guidance.
pub fn system_prompt(selected_chat_model: &str, hints: &RequestHints) -> String {
    let base = format!("{}\n\n{}", REGULAR_PROMPT, hints.render());

    if crate::llm::is_reasoning_model(selected_chat_model) {
        base
    } else {
        format!("{}\n\n{}", base, TOOLS_PROMPT)
    }
}

/// Prompt for the one-shot chat title generation call.
pub const TITLE_PROMPT: &str = "\
Generate a short title based on the first message a user begins a \
conversation with. Ensure it is not more than 80 characters long. The title \
should be a summary of the user's message. Do not use quotes or colons.";

/// Wrap the system and user prompts with citation instructions.
///
/// The system prompt gains the citation-syntax instruction block; the user
/// prompt is prefixed with the prepared attachment text blobs so the model
/// reads the documents in citation-ready form.
pub fn wrap_citation_prompt(
    system_prompt: &str,
    user_prompt: &str,
    deep_text_prompt_portion: &[String],
) -> (String, String) {
    let enhanced_system = format!("{}\n\n{}", system_prompt, CITATION_INSTRUCTIONS);

    let mut enhanced_user = String::new();
    for (index, portion) in deep_text_prompt_portion.iter().enumerate() {
        enhanced_user.push_str(&format!(
            "\n<attachment index=\"{}\">\n{}\n</attachment>\n",
            index + 1,
            portion
        ));
    }
    enhanced_user.push('\n');
    enhanced_user.push_str(user_prompt);

    (enhanced_system, enhanced_user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasoning_model_gets_no_tool_guidance() {
        let hints = RequestHints::default();
        let regular = system_prompt("chat-model", &hints);
        let reasoning = system_prompt("chat-model-reasoning", &hints);

        assert!(regular.contains("create_document"));
        assert!(!reasoning.contains("create_document"));
    }

    #[test]
    fn test_hints_render_into_system_prompt() {
        let hints = RequestHints {
            longitude: Some(-0.1),
            latitude: Some(51.5),
            city: Some("London".to_string()),
            country: Some("GB".to_string()),
        };

        let prompt = system_prompt("chat-model", &hints);
        assert!(prompt.contains("city: London"));
        assert!(prompt.contains("lat: 51.5"));
    }

    #[test]
    fn test_hints_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("cloudfront-viewer-city", "Berlin".parse().unwrap());
        headers.insert("cloudfront-viewer-latitude", "52.52".parse().unwrap());
        headers.insert("cloudfront-viewer-longitude", "13.40".parse().unwrap());
        headers.insert("cloudfront-viewer-country", "DE".parse().unwrap());

        let hints = RequestHints::from_headers(&headers);
        assert_eq!(hints.city.as_deref(), Some("Berlin"));
        assert_eq!(hints.latitude, Some(52.52));
    }

    #[test]
    fn test_wrap_citation_prompt_shapes() {
        let portions = vec!["PAGE 1 text".to_string(), "PAGE 2 text".to_string()];
        let (system, user) =
            wrap_citation_prompt("base system", "What grew last quarter?", &portions);

        assert!(system.starts_with("base system"));
        assert!(system.contains("<cite attachment_id="));
        assert!(user.starts_with("\n<attachment"));
        assert!(user.contains("PAGE 2 text"));
        assert!(user.ends_with("What grew last quarter?"));
    }

    #[test]
    fn test_wrap_with_no_portions_keeps_question() {
        let (_, user) = wrap_citation_prompt("s", "question", &[]);
        assert!(user.ends_with("question"));
    }
}
