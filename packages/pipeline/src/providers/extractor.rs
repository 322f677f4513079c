//! LLM-backed entity and relationship extraction client.
//!
//! The provider exposes structured extraction endpoints; we send the
//! text plus the closed entity-type set and get typed JSON back.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::kernel::{BaseEntityExtractor, ExtractedEntity, ExtractedRelationship, MergeDecision};
use crate::resolution::EntityType;

pub struct LlmEntityExtractor {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct EntityRequest<'a> {
    text: &'a str,
    entity_types: &'a [EntityType],
}

#[derive(Debug, Deserialize)]
struct EntityResponse {
    entities: Vec<ExtractedEntity>,
}

#[derive(Debug, Serialize)]
struct RelationshipRequest<'a> {
    text: &'a str,
    entity_names: &'a [String],
}

#[derive(Debug, Deserialize)]
struct RelationshipResponse {
    relationships: Vec<ExtractedRelationship>,
}

#[derive(Debug, Serialize)]
struct MergeRequest<'a> {
    left_name: &'a str,
    right_name: &'a str,
    entity_type: EntityType,
}

impl LlmEntityExtractor {
    pub fn new(base_url: String, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| PipelineError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            api_key,
            client,
        })
    }

    fn classify_status(status: reqwest::StatusCode, body: String) -> PipelineError {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            PipelineError::Throttling(format!("extraction provider throttled: {body}"))
        } else if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            PipelineError::Authentication(format!(
                "extraction provider rejected credentials: {body}"
            ))
        } else if status.is_server_error() {
            PipelineError::Resource(format!("extraction provider error {status}: {body}"))
        } else {
            PipelineError::Validation(format!("extraction provider error {status}: {body}"))
        }
    }

    async fn post_json<Req: Serialize, Res: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Res> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| PipelineError::Network(format!("extraction request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body).into());
        }

        response
            .json::<Res>()
            .await
            .map_err(|e| PipelineError::Data(format!("malformed extraction response: {e}")).into())
    }
}

#[async_trait]
impl BaseEntityExtractor for LlmEntityExtractor {
    async fn extract_entities(&self, text: &str) -> Result<Vec<ExtractedEntity>> {
        let response: EntityResponse = self
            .post_json(
                "/v1/extract/entities",
                &EntityRequest {
                    text,
                    entity_types: &EntityType::ALL,
                },
            )
            .await?;

        Ok(response.entities)
    }

    async fn extract_relationships(
        &self,
        text: &str,
        entity_names: &[String],
    ) -> Result<Vec<ExtractedRelationship>> {
        let response: RelationshipResponse = self
            .post_json(
                "/v1/extract/relationships",
                &RelationshipRequest { text, entity_names },
            )
            .await?;

        Ok(response.relationships)
    }

    async fn adjudicate_merge(
        &self,
        left_name: &str,
        right_name: &str,
        entity_type: EntityType,
    ) -> Result<MergeDecision> {
        self.post_json(
            "/v1/adjudicate/merge",
            &MergeRequest {
                left_name,
                right_name,
                entity_type,
            },
        )
        .await
    }
}
