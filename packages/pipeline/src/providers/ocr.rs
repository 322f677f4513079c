//! HTTP client for the asynchronous OCR service.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::kernel::{BaseOcrProvider, OcrJobStatus, OcrResult};

pub struct HttpOcrProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    object_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    text: String,
    page_count: i32,
    #[serde(default)]
    page_confidences: Vec<f64>,
}

impl HttpOcrProvider {
    pub fn new(base_url: String, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| PipelineError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            api_key,
            client,
        })
    }

    /// Map an error response to the failure class that drives retries.
    fn classify_status(status: reqwest::StatusCode, body: String) -> PipelineError {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            PipelineError::Throttling(format!("OCR provider throttled: {body}"))
        } else if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            PipelineError::Authentication(format!("OCR provider rejected credentials: {body}"))
        } else if status.is_server_error() {
            PipelineError::Resource(format!("OCR provider error {status}: {body}"))
        } else {
            PipelineError::Validation(format!("OCR provider error {status}: {body}"))
        }
    }

    async fn check<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body).into());
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PipelineError::Data(format!("malformed OCR response: {e}")).into())
    }
}

#[async_trait]
impl BaseOcrProvider for HttpOcrProvider {
    async fn submit(&self, object_key: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/v1/jobs", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&SubmitRequest { object_key })
            .send()
            .await
            .map_err(|e| PipelineError::Network(format!("OCR submit failed: {e}")))?;

        let submitted: SubmitResponse = Self::check(response).await?;
        Ok(submitted.job_id)
    }

    async fn poll(&self, job_handle: &str) -> Result<OcrJobStatus> {
        let response = self
            .client
            .get(format!("{}/v1/jobs/{job_handle}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| PipelineError::Network(format!("OCR poll failed: {e}")))?;

        let poll: PollResponse = Self::check(response).await?;
        match poll.status.as_str() {
            "succeeded" => Ok(OcrJobStatus::Succeeded),
            "failed" => Ok(OcrJobStatus::Failed {
                reason: poll.error.unwrap_or_else(|| "unspecified".to_string()),
            }),
            _ => Ok(OcrJobStatus::Pending),
        }
    }

    async fn fetch(&self, job_handle: &str) -> Result<OcrResult> {
        let response = self
            .client
            .get(format!("{}/v1/jobs/{job_handle}/result", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| PipelineError::Network(format!("OCR fetch failed: {e}")))?;

        let fetched: FetchResponse = Self::check(response).await?;
        Ok(OcrResult {
            text: fetched.text,
            page_count: fetched.page_count,
            page_confidences: fetched.page_confidences,
        })
    }
}
