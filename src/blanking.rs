//! Client for the external blanking/variation service.
//!
//! The service takes answer text and returns a blanked rendition plus
//! optional first-letter clues. It is the only network hop in the engine:
//! one bounded attempt per step, no internal retries — on failure the step
//! is rejected and the session cursor stays where it was so the client can
//! re-request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bound on a single variation request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Error, Debug)]
pub enum BlankingError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("variation service returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("variation service response is missing blanked text")]
    MissingBlankedText,
}

/// Request for one blanked variation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlankRequest {
    pub text: String,
    pub variation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blank_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_number: Option<u32>,
    /// Difficulty bucket 1–4, derived from the user's rating
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty_level: Option<u8>,
}

/// Blanked text plus optional clues.
/// The original service replies with `{"result": ...}`; newer deployments
/// use `blankedText` — both shapes are accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlankResponse {
    #[serde(alias = "result")]
    pub blanked_text: Option<String>,
    #[serde(default)]
    pub clues: Option<Vec<String>>,
}

/// Validated variation payload handed back to the state machine
#[derive(Debug, Clone)]
pub struct Variation {
    pub blanked_text: String,
    pub clues: Option<Vec<String>>,
}

/// Boundary the practice engine calls for non-plain prompts. Async so the
/// HTTP client can be swapped for a stub in tests.
#[async_trait]
pub trait VariationGenerator: Send + Sync {
    async fn blank(&self, request: &BlankRequest) -> Result<Variation, BlankingError>;
}

/// HTTP implementation talking to the NLP blanking service
pub struct HttpVariationGenerator {
    client: Client,
    base_url: String,
}

impl HttpVariationGenerator {
    pub fn new(base_url: String) -> Result<Self, BlankingError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl VariationGenerator for HttpVariationGenerator {
    async fn blank(&self, request: &BlankRequest) -> Result<Variation, BlankingError> {
        let url = format!("{}/blank", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(BlankingError::Server {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: BlankResponse = response.json().await?;
        match body.blanked_text {
            Some(text) if !text.is_empty() => Ok(Variation {
                blanked_text: text,
                clues: body.clues,
            }),
            _ => Err(BlankingError::MissingBlankedText),
        }
    }
}
