//! Biography generation.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use enrich_types::Contact;

use crate::client::ApiClient;
use crate::error::AiError;
use crate::thesis::unwrap_code_fence;

/// What the generator knows about a contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BioRequest {
    pub name: String,
    pub company: Option<String>,
    pub title: Option<String>,
}

impl BioRequest {
    pub fn from_contact(contact: &Contact) -> Self {
        let keep = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            name: contact.name.trim().to_string(),
            company: keep(&contact.company),
            title: keep(&contact.title),
        }
    }
}

/// Generated biography, optionally with a corrected title or company.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BioProfile {
    pub bio: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
}

#[async_trait]
pub trait BioGenerator: Send + Sync {
    /// Generate a biography. Blank output is an error, never an empty bio.
    async fn generate_bio(&self, request: &BioRequest) -> Result<BioProfile, AiError>;
}

/// Bio generator backed by a chat completion endpoint.
pub struct ApiBioGenerator {
    client: Arc<ApiClient>,
}

impl ApiBioGenerator {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    fn build_prompt(request: &BioRequest) -> String {
        let mut known = format!("Name: {}", request.name);
        if let Some(company) = &request.company {
            known.push_str(&format!("\nCompany: {}", company));
        }
        if let Some(title) = &request.title {
            known.push_str(&format!("\nTitle: {}", title));
        }

        format!(
            r#"Write a short professional biography (2-4 sentences) for this person, focusing on their investing or operating background.

PERSON:
{known}

Respond with JSON only:
{{"bio": "...", "title": "current title or null", "company": "current company or null"}}"#
        )
    }
}

/// Parse a bio reply. Blank biographies are rejected.
pub(crate) fn parse_bio(reply: &str) -> Result<BioProfile, AiError> {
    let mut profile: BioProfile = serde_json::from_str(unwrap_code_fence(reply))
        .map_err(|e| AiError::ParseError(format!("Failed to parse bio JSON: {}", e)))?;

    profile.bio = profile.bio.trim().to_string();
    if profile.bio.is_empty() {
        return Err(AiError::EmptyResponse("biography is blank".to_string()));
    }
    profile.title = profile.title.filter(|t| !t.trim().is_empty());
    profile.company = profile.company.filter(|c| !c.trim().is_empty());
    Ok(profile)
}

#[async_trait]
impl BioGenerator for ApiBioGenerator {
    async fn generate_bio(&self, request: &BioRequest) -> Result<BioProfile, AiError> {
        if request.name.is_empty() {
            return Err(AiError::InvalidInput("contact has no name".to_string()));
        }
        let reply = self.client.complete(&Self::build_prompt(request)).await?;
        parse_bio(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ApiClientConfig;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_request_skips_blank_fields() {
        let contact = Contact::new("o", "c", " Ada ").with_company("  ").with_title("GP");
        let request = BioRequest::from_contact(&contact);
        assert_eq!(request.name, "Ada");
        assert_eq!(request.company, None);
        assert_eq!(request.title.as_deref(), Some("GP"));
    }

    #[test]
    fn test_prompt_lists_known_fields() {
        let request = BioRequest {
            name: "Ada".into(),
            company: Some("Engines".into()),
            title: None,
        };
        let prompt = ApiBioGenerator::build_prompt(&request);
        assert!(prompt.contains("Name: Ada"));
        assert!(prompt.contains("Company: Engines"));
        assert!(!prompt.contains("Title:"));
    }

    #[test]
    fn test_parse_bio() {
        let profile = parse_bio(r#"{"bio": " Invests in robotics. ", "title": "", "company": "Fund"}"#).unwrap();
        assert_eq!(profile.bio, "Invests in robotics.");
        assert_eq!(profile.title, None);
        assert_eq!(profile.company.as_deref(), Some("Fund"));
    }

    #[test]
    fn test_parse_bio_rejects_blank_and_garbage() {
        assert!(matches!(parse_bio(r#"{"bio": "  "}"#), Err(AiError::EmptyResponse(_))));
        assert!(matches!(parse_bio("not json"), Err(AiError::ParseError(_))));
        assert!(matches!(parse_bio(r#"{"title": "x"}"#), Err(AiError::ParseError(_))));
    }

    #[tokio::test]
    async fn test_generate_bio_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "{\"bio\":\"Seed investor in fintech.\"}"}}]
            })))
            .mount(&server)
            .await;

        let client = ApiClient::new(
            ApiClientConfig::openai("k", "gpt-4o-mini")
                .with_base_url(server.uri())
                .with_max_retries(1),
        )
        .unwrap();
        let generator = ApiBioGenerator::new(Arc::new(client));

        let profile = generator
            .generate_bio(&BioRequest::from_contact(&Contact::new("o", "c", "Ada")))
            .await
            .unwrap();
        assert_eq!(profile.bio, "Seed investor in fintech.");
    }
}
