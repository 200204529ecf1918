use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("enhancement request failed: {0}")]
    Request(String),
    #[error("enhancement service returned status {0}")]
    Status(u16),
    #[error("failed to decode enhancement response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct EnhanceRequest {
    pub prompt: String,
    pub style: String,
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnhanceResponse {
    pub enhanced_prompt: String,
    #[serde(default)]
    pub suggested_llm: Option<String>,
    #[serde(default)]
    pub processing_time_ms: Option<u64>,
    #[serde(default)]
    pub relevance_analysis: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptExchange {
    pub prompt: String,
    pub enhanced_prompt: String,
    pub style: String,
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub client_timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackSubmission {
    pub prompt_review_id: String,
    pub feedback: bool,
}

/// The external REST collaborators: the enhancement endpoint, the
/// prompt/response persistence call, and like/dislike feedback.
#[async_trait]
pub trait EnhancementApi: Send + Sync {
    async fn enhance(&self, request: &EnhanceRequest) -> Result<EnhanceResponse, ApiError>;
    async fn persist_exchange(&self, exchange: &PromptExchange) -> Result<(), ApiError>;
    async fn submit_feedback(&self, submission: &FeedbackSubmission) -> Result<(), ApiError>;
}

pub struct HttpEnhancementApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEnhancementApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    async fn post_json<T>(&self, path: &str, body: &T) -> Result<reqwest::Response, ApiError>
    where
        T: Serialize + Sync,
    {
        let url = format!("{}/{path}", self.base_url);
        debug!(%url, "posting to enhancement service");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|err| ApiError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ApiError::Status(response.status().as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl EnhancementApi for HttpEnhancementApi {
    async fn enhance(&self, request: &EnhanceRequest) -> Result<EnhanceResponse, ApiError> {
        let response = self.post_json("enhance", request).await?;
        response
            .json::<EnhanceResponse>()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))
    }

    async fn persist_exchange(&self, exchange: &PromptExchange) -> Result<(), ApiError> {
        self.post_json("prompt-reviews", exchange).await.map(|_| ())
    }

    async fn submit_feedback(&self, submission: &FeedbackSubmission) -> Result<(), ApiError> {
        self.post_json("prompt-reviews/feedback", submission)
            .await
            .map(|_| ())
    }
}
