use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::TextGenerator;
use crate::config::{NarratorConfig, RetryConfig};
use crate::http::{check_status, ServiceError};
use crate::retry::with_retry;

const SERVICE: &str = "text generation";

/// Gemini `generateContent` REST client
pub struct GeminiClient {
    client: Client,
    endpoint: String,
    api_key: String,
    retry: RetryConfig,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GeminiClient {
    pub fn new(client: Client, config: &NarratorConfig, api_key: String, retry: RetryConfig) -> Self {
        let endpoint = format!(
            "{}/models/{}:generateContent",
            config.api_base.trim_end_matches('/'),
            config.model
        );
        Self {
            client,
            endpoint,
            api_key,
            retry,
        }
    }
}

/// Text of the first candidate, or why there is none
fn extract_text(response: GenerateResponse) -> Result<String, ServiceError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ServiceError::rejected(SERVICE, format!("prompt blocked: {}", reason)));
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ServiceError::rejected(SERVICE, "no candidates returned"))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_string());
        return Err(ServiceError::rejected(
            SERVICE,
            format!("empty response (finish reason: {})", reason),
        ));
    }

    Ok(text)
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        let response: GenerateResponse = with_retry(&self.retry, "text generation", || {
            let request = &request;
            async move {
                let response = self
                    .client
                    .post(&self.endpoint)
                    .header("x-goog-api-key", &self.api_key)
                    .json(request)
                    .send()
                    .await
                    .map_err(|e| ServiceError::from_reqwest(SERVICE, e))?;

                check_status(SERVICE, response)
                    .await?
                    .json::<GenerateResponse>()
                    .await
                    .map_err(|e| ServiceError::from_reqwest(SERVICE, e))
            }
        })
        .await?;

        extract_text(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Classify, ErrorCategory};

    fn parse(json: &str) -> GenerateResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response = parse(
            r#"{"candidates":[{"content":{"parts":[{"text":"Yoda was "},{"text":"wise."}],"role":"model"},"finishReason":"STOP"}]}"#,
        );
        assert_eq!(extract_text(response).unwrap(), "Yoda was wise.");
    }

    #[test]
    fn test_blocked_prompt_is_permanent() {
        let response = parse(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#);
        let err = extract_text(response).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Permanent);
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn test_safety_stop_without_text() {
        let response = parse(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#);
        let err = extract_text(response).unwrap_err();
        assert!(err.to_string().contains("finish reason: SAFETY"));
    }

    #[test]
    fn test_endpoint() {
        let client = GeminiClient::new(
            Client::new(),
            &NarratorConfig::default(),
            "key".into(),
            RetryConfig::default(),
        );
        assert_eq!(
            client.endpoint,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }
}
