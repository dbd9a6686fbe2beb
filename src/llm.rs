use crate::http::build_client;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const FN_LISTING_COPY: &str = "listing_copy";
const FN_IDENTIFY_PRODUCT: &str = "identify_product";

const DESCRIPTION_PROMPT: &str = "You write listings for a secondhand marketplace. \
Rewrite the source description below into a short, appealing listing. \
Be honest about the actual condition and mention every defect listed. \
Use short lines with emoji bullets, no markdown headings, plain text only, \
and end with a friendly call to action.";

const IDENTIFY_PROMPT: &str = "Identify the product in this photo. Answer with a short \
search term of brand and model only, on a single line, without quotes or extra text.";

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub gateway_url: String,
    pub api_key: Option<String>,
    pub text_model: Option<String>,
    pub vision_model: Option<String>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            gateway_url: std::env::var("LLM_GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            api_key: std::env::var("LLM_API_KEY").ok(),
            text_model: std::env::var("LLM_TEXT_MODEL").ok(),
            vision_model: std::env::var("LLM_VISION_MODEL").ok(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing gateway url")]
    MissingGateway,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmMessage {
    pub role: String,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    InlineImage { mime_type: String, data: String },
}

impl LlmMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    pub fn user_with_image(text: impl Into<String>, mime_type: &str, bytes: &[u8]) -> Self {
        Self {
            role: "user".to_string(),
            content: vec![
                ContentPart::Text { text: text.into() },
                ContentPart::InlineImage {
                    mime_type: mime_type.to_string(),
                    data: BASE64.encode(bytes),
                },
            ],
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    #[serde(default)]
    pub usage: Option<LlmUsage>,
}

#[derive(Debug, Deserialize)]
pub struct LlmUsage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

pub struct LlmClient {
    http: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(LlmConfig::from_env())
    }

    /// Turns the source description plus observed defects into listing copy.
    /// Callers fall back to the source description when this fails.
    pub async fn optimize_description(
        &self,
        source_description: &str,
        defects: &str,
    ) -> Result<String, LlmError> {
        let prompt = description_prompt(source_description, defects);
        let response = self
            .chat(
                FN_LISTING_COPY,
                self.config.text_model.as_deref(),
                &[LlmMessage::user(prompt)],
            )
            .await?;
        if let Some(usage) = &response.usage {
            debug!(
                target = "rastro.llm",
                input_tokens = ?usage.input_tokens,
                output_tokens = ?usage.output_tokens,
                "listing copy generated"
            );
        }
        let text = strip_markdown_fence(&response.text).to_string();
        if text.is_empty() {
            return Err(LlmError::InvalidResponse("empty listing copy".into()));
        }
        Ok(text)
    }

    /// Names the product on a photo as a search term. There is no fallback
    /// for this one.
    pub async fn identify_search_query(
        &self,
        image: &[u8],
        mime_type: &str,
    ) -> Result<String, LlmError> {
        let response = self
            .chat(
                FN_IDENTIFY_PRODUCT,
                self.config.vision_model.as_deref(),
                &[LlmMessage::user_with_image(IDENTIFY_PROMPT, mime_type, image)],
            )
            .await?;
        let query = clean_search_query(&response.text);
        if query.is_empty() {
            return Err(LlmError::InvalidResponse(
                "empty product identification".into(),
            ));
        }
        Ok(query)
    }

    pub async fn chat(
        &self,
        function_name: &str,
        model: Option<&str>,
        messages: &[LlmMessage],
    ) -> Result<LlmResponse, LlmError> {
        let gateway = self.config.gateway_url.trim();
        if gateway.is_empty() {
            return Err(LlmError::MissingGateway);
        }

        let body = ChatRequest {
            function_name: function_name.to_string(),
            model_name: model.map(|value| value.to_string()),
            input: ChatInput {
                messages: messages.to_vec(),
            },
        };

        let mut request = self.http.post(format!("{gateway}/inference")).json(&body);

        if let Some(key) = &self.config.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::Http(format!("HTTP {}", response.status())));
        }

        let payload: GatewayResponse = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;

        let text = payload
            .content
            .into_iter()
            .find(|item| item.r#type == "text")
            .map(|item| item.text)
            .ok_or_else(|| LlmError::InvalidResponse("missing text".into()))?;

        Ok(LlmResponse {
            text,
            usage: payload.usage,
        })
    }
}

fn description_prompt(source_description: &str, defects: &str) -> String {
    let defects = if defects.trim().is_empty() {
        "No defects mentioned"
    } else {
        defects.trim()
    };
    format!(
        "{DESCRIPTION_PROMPT}\n\nSOURCE DESCRIPTION:\n{source_description}\n\nACTUAL CONDITION:\n{defects}"
    )
}

/// Models keep answering in fenced blocks no matter what the prompt says.
fn strip_markdown_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

fn clean_search_query(raw: &str) -> String {
    let text = strip_markdown_fence(raw);
    let line = text.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    line.trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '.'))
        .trim()
        .to_string()
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    function_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_name: Option<String>,
    input: ChatInput,
}

#[derive(Debug, Serialize)]
struct ChatInput {
    messages: Vec<LlmMessage>,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    content: Vec<ResponseContent>,
    #[serde(default)]
    usage: Option<LlmUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    r#type: String,
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_query_is_cleaned() {
        assert_eq!(clean_search_query("Sony WH-1000XM4"), "Sony WH-1000XM4");
        assert_eq!(clean_search_query("\"Sony WH-1000XM4\""), "Sony WH-1000XM4");
        assert_eq!(clean_search_query("`Sony WH-1000XM4`."), "Sony WH-1000XM4");
        assert_eq!(
            clean_search_query("```\nSony WH-1000XM4\n```"),
            "Sony WH-1000XM4"
        );
        assert_eq!(
            clean_search_query("\n\nNintendo Switch OLED\nsecond line ignored"),
            "Nintendo Switch OLED"
        );
        assert_eq!(clean_search_query("   "), "");
    }

    #[test]
    fn fences_are_stripped_with_language_tags() {
        assert_eq!(strip_markdown_fence("```text\nhello\n```"), "hello");
        assert_eq!(strip_markdown_fence("```\nhello\n```"), "hello");
        assert_eq!(strip_markdown_fence("plain"), "plain");
    }

    #[test]
    fn prompt_carries_defects_or_a_placeholder() {
        let with = description_prompt("A tablet", "cracked corner");
        assert!(with.contains("SOURCE DESCRIPTION:\nA tablet"));
        assert!(with.contains("ACTUAL CONDITION:\ncracked corner"));

        let without = description_prompt("A tablet", "   ");
        assert!(without.contains("No defects mentioned"));
    }

    #[test]
    fn image_messages_carry_base64_data() {
        let message = LlmMessage::user_with_image("identify", "image/png", &[1, 2, 3]);
        let encoded = serde_json::to_value(&message).expect("serialize");
        assert_eq!(encoded["content"][0]["type"], "text");
        assert_eq!(encoded["content"][1]["type"], "inline_image");
        assert_eq!(encoded["content"][1]["mime_type"], "image/png");
        assert_eq!(encoded["content"][1]["data"], BASE64.encode([1, 2, 3]));
    }

    #[tokio::test]
    async fn blank_gateway_url_is_rejected_before_any_request() {
        let client = LlmClient::new(LlmConfig {
            gateway_url: "  ".to_string(),
            api_key: None,
            text_model: None,
            vision_model: None,
        });
        let err = client
            .chat("listing_copy", None, &[LlmMessage::user("hi")])
            .await
            .expect_err("must fail");
        assert!(matches!(err, LlmError::MissingGateway));
    }
}
