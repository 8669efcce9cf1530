//! Client for the external indexing/answering service.

use std::time::Duration;

use async_trait::async_trait;
use college_shared::AskResponse;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::EngineError;

#[async_trait]
pub trait IndexingService: Send + Sync {
    /// Submit the full text of a dataset. Returns the number of chunks the
    /// service produced.
    async fn index(&self, dataset_id: Uuid, title: &str, text: &str) -> Result<u32, EngineError>;

    async fn ask(&self, dataset_id: Uuid, question: &str) -> Result<AskResponse, EngineError>;
}

pub struct HttpIndexingService {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct IndexResponse {
    ok: bool,
    #[serde(default)]
    chunks: u32,
}

#[derive(Serialize)]
struct AskRequest<'a> {
    dataset_id: String,
    question: &'a str,
    k: u32,
    min_score: f64,
    max_ctx_chars: u32,
    use_reranking: bool,
    debug_reranking: bool,
}

impl<'a> AskRequest<'a> {
    fn new(dataset_id: Uuid, question: &'a str) -> Self {
        Self {
            dataset_id: dataset_id.to_string(),
            question,
            k: 6,
            min_score: 0.0,
            max_ctx_chars: 8000,
            use_reranking: true,
            debug_reranking: false,
        }
    }
}

impl HttpIndexingService {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Internal(format!("failed to build indexing client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }
}

fn index_form(dataset_id: Uuid, title: &str, text: &str) -> Result<Form, EngineError> {
    let file = Part::bytes(text.as_bytes().to_vec())
        .file_name(format!("{dataset_id}.md"))
        .mime_str("text/markdown")
        .map_err(|e| EngineError::Internal(format!("invalid mime type: {e}")))?;

    let mut form = Form::new().text("dataset_id", dataset_id.to_string());
    if !title.is_empty() {
        form = form.text("title", title.to_string());
    }
    Ok(form
        .text("version", "1")
        .text("overwrite", "true")
        .part("file", file))
}

#[async_trait]
impl IndexingService for HttpIndexingService {
    async fn index(&self, dataset_id: Uuid, title: &str, text: &str) -> Result<u32, EngineError> {
        let url = format!("{}/index/file", self.base_url);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .multipart(index_form(dataset_id, title, text)?)
            .send()
            .await
            .map_err(|e| EngineError::UpstreamFailure(format!("indexing request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!(
                %dataset_id,
                status = status.as_u16(),
                %body,
                "indexing service rejected document"
            );
            return Err(EngineError::UpstreamFailure(format!(
                "indexing service returned status {}",
                status.as_u16()
            )));
        }

        let body: IndexResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::UpstreamFailure(format!("invalid indexing response: {e}")))?;

        if !body.ok {
            return Err(EngineError::UpstreamFailure("indexing failed".to_string()));
        }

        debug!(%dataset_id, chunks = body.chunks, "document indexed");
        Ok(body.chunks)
    }

    async fn ask(&self, dataset_id: Uuid, question: &str) -> Result<AskResponse, EngineError> {
        let url = format!("{}/ask", self.base_url);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&AskRequest::new(dataset_id, question))
            .send()
            .await
            .map_err(|e| EngineError::UpstreamFailure(format!("ask request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(EngineError::UpstreamFailure(format!(
                "indexing service returned status {}",
                resp.status().as_u16()
            )));
        }

        resp.json::<AskResponse>()
            .await
            .map_err(|e| EngineError::UpstreamFailure(format!("invalid ask response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ask_request_carries_retrieval_defaults() {
        let id = Uuid::new_v4();
        let value = serde_json::to_value(AskRequest::new(id, "why?")).unwrap();
        assert_eq!(value["dataset_id"], id.to_string());
        assert_eq!(value["k"], 6);
        assert_eq!(value["max_ctx_chars"], 8000);
        assert_eq!(value["use_reranking"], true);
        assert_eq!(value["debug_reranking"], false);
    }

    #[test]
    fn index_response_requires_ok() {
        let body: IndexResponse = serde_json::from_str(r#"{"ok":false}"#).unwrap();
        assert!(!body.ok);
        assert_eq!(body.chunks, 0);
    }

    #[test]
    fn ask_response_keeps_rerank_deltas() {
        let body: AskResponse = serde_json::from_str(
            r#"{"answer":"42","citations":[
                {"chunk_id":3,"score":0.9,"original_score":0.5,"score_improvement":0.4}
            ]}"#,
        )
        .unwrap();
        assert_eq!(body.citations[0].score_improvement, Some(0.4));
    }
}
