//! Thesis extraction.
//!
//! Replies are deserialized straight into [`ThesisFields`], which rejects
//! unknown keys and wrongly typed values. The only leniency is a single
//! surrounding markdown code fence, which some models add regardless of
//! instructions.

use async_trait::async_trait;
use std::sync::Arc;

use enrich_types::ThesisFields;

use crate::client::ApiClient;
use crate::error::AiError;

#[async_trait]
pub trait ThesisExtractor: Send + Sync {
    async fn extract_thesis(&self, profile_text: &str) -> Result<ThesisFields, AiError>;
}

/// Strip one surrounding ``` or ```json fence, if present.
pub(crate) fn unwrap_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.trim()
}

/// Parse an extractor reply into typed thesis fields.
pub fn parse_thesis(reply: &str) -> Result<ThesisFields, AiError> {
    let fields: ThesisFields = serde_json::from_str(unwrap_code_fence(reply))
        .map_err(|e| AiError::ParseError(format!("Thesis JSON does not match schema: {}", e)))?;

    if fields.summary.trim().is_empty() {
        return Err(AiError::EmptyResponse("thesis summary is blank".to_string()));
    }
    Ok(fields)
}

/// Thesis extractor backed by a chat completion endpoint.
pub struct ApiThesisExtractor {
    client: Arc<ApiClient>,
}

impl ApiThesisExtractor {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    fn build_prompt(profile_text: &str) -> String {
        format!(
            r#"Extract the investment thesis of the person described below.

PROFILE:
{profile_text}

Respond with JSON only, using exactly these keys:
{{
  "sectors": ["..."],
  "stages": ["pre-seed", "seed", "series-a", ...],
  "check_sizes": ["$100k-$500k", ...],
  "geographies": ["..."],
  "keywords": ["..."],
  "summary": "One sentence describing what they invest in"
}}
Use empty lists when the profile says nothing about a field."#
        )
    }
}

#[async_trait]
impl ThesisExtractor for ApiThesisExtractor {
    async fn extract_thesis(&self, profile_text: &str) -> Result<ThesisFields, AiError> {
        if profile_text.trim().is_empty() {
            return Err(AiError::InvalidInput("profile text is empty".to_string()));
        }
        let reply = self.client.complete(&Self::build_prompt(profile_text)).await?;
        parse_thesis(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ApiClientConfig;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID: &str = r#"{"sectors":["climate"],"stages":["seed"],"check_sizes":["$250k"],"geographies":["EU"],"keywords":["energy"],"summary":"Seed climate investor in Europe."}"#;

    #[test]
    fn test_unwrap_code_fence() {
        assert_eq!(unwrap_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(unwrap_code_fence("```\n{}\n```"), "{}");
        assert_eq!(unwrap_code_fence("  {} "), "{}");
        assert_eq!(unwrap_code_fence("```{}"), "```{}");
    }

    #[test]
    fn test_parse_valid_thesis() {
        let fields = parse_thesis(VALID).unwrap();
        assert_eq!(fields.sectors, vec!["climate"]);
        assert_eq!(fields.summary, "Seed climate investor in Europe.");

        let fenced = format!("```json\n{}\n```", VALID);
        assert!(parse_thesis(&fenced).is_ok());
    }

    #[test]
    fn test_parse_rejects_shape_mismatch() {
        let missing_key = r#"{"sectors":[],"stages":[],"check_sizes":[],"geographies":[],"summary":"x"}"#;
        assert!(matches!(parse_thesis(missing_key), Err(AiError::ParseError(_))));

        let prose = "Sure! Here is the thesis: {\"sectors\": []}";
        assert!(matches!(parse_thesis(prose), Err(AiError::ParseError(_))));
    }

    #[test]
    fn test_parse_rejects_blank_summary() {
        let blank = r#"{"sectors":[],"stages":[],"check_sizes":[],"geographies":[],"keywords":[],"summary":" "}"#;
        assert!(matches!(parse_thesis(blank), Err(AiError::EmptyResponse(_))));
    }

    #[tokio::test]
    async fn test_extract_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": VALID}}]
            })))
            .mount(&server)
            .await;

        let client = ApiClient::new(
            ApiClientConfig::openai("k", "m")
                .with_base_url(server.uri())
                .with_max_retries(1),
        )
        .unwrap();
        let extractor = ApiThesisExtractor::new(Arc::new(client));

        let fields = extractor.extract_thesis("Invests in climate.").await.unwrap();
        assert_eq!(fields.geographies, vec!["EU"]);
        assert!(matches!(
            extractor.extract_thesis("  ").await,
            Err(AiError::InvalidInput(_))
        ));
    }
}
