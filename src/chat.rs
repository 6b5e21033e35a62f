//! Grounded answer assembly.
//!
//! Retrieves passages for a question, formats them into a prompt for the
//! generation provider, and lists the distinct `(document, page)` sources the
//! answer drew on.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::GenerationConfig;
use crate::error::GenerationProviderError;
use crate::models::{QueryResult, Source};
use crate::retrieve::RetrievalEngine;

pub const NO_DOCUMENTS_ANSWER: &str =
    "No documents have been ingested yet. Please add some PDFs and run ingestion first.";

pub const SYSTEM_PROMPT: &str = "You are a helpful AI assistant that answers questions based on the provided document context.

Your responses should be:
- Accurate and based on the provided context
- Clear and well-structured
- Concise but complete

If the answer is not found in the context, say: \"I couldn't find that information in the uploaded documents.\"
";

#[async_trait]
pub trait Generator: Send + Sync {
    fn default_model(&self) -> &str;

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, GenerationProviderError>;
}

/// Generation adapter for Ollama's `POST /api/generate` (non-streaming).
pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    timeout: Duration,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let timeout = config.timeout();
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn default_model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, GenerationProviderError> {
        let body = serde_json::json!({
            "model": model,
            "system": SYSTEM_PROMPT,
            "prompt": prompt,
            "stream": false,
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationProviderError::Timeout(self.timeout)
                } else {
                    GenerationProviderError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationProviderError::InvalidResponse(e.to_string()))?;

        json.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| {
                GenerationProviderError::InvalidResponse("missing response field".to_string())
            })
    }
}

pub fn build_prompt(question: &str, results: &[QueryResult]) -> String {
    let mut context = String::new();
    for r in results {
        context.push_str(&format!(
            "\n[Source: {} | Page {}]\n{}\n",
            r.document_id, r.page, r.text
        ));
    }

    format!(
        "CONTEXT FROM DOCUMENTS:\n{}\n\nUSER QUESTION:\n{}\n\nPlease answer the question based on the context above.",
        context, question
    )
}

/// Collapse hits to distinct `(document_id, page)` pairs in first-seen
/// order. Each source keeps the highest score among its hits.
pub fn dedup_sources(results: &[QueryResult]) -> Vec<Source> {
    let mut sources: Vec<Source> = Vec::new();
    for r in results {
        match sources
            .iter_mut()
            .find(|s| s.document_id == r.document_id && s.page == r.page)
        {
            Some(existing) => {
                if r.score > existing.score {
                    existing.score = r.score;
                }
            }
            None => sources.push(Source {
                document_id: r.document_id.clone(),
                page: r.page,
                score: r.score,
            }),
        }
    }
    sources
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<Source>,
}

pub struct ChatService {
    engine: Arc<RetrievalEngine>,
    generator: Arc<dyn Generator>,
}

impl ChatService {
    pub fn new(engine: Arc<RetrievalEngine>, generator: Arc<dyn Generator>) -> Self {
        Self { engine, generator }
    }

    pub async fn answer(&self, question: &str, top_k: usize, model: Option<&str>) -> ChatResponse {
        let results = self.engine.query(question, top_k).await;
        if results.is_empty() {
            return ChatResponse {
                answer: NO_DOCUMENTS_ANSWER.to_string(),
                sources: Vec::new(),
            };
        }

        let prompt = build_prompt(question, &results);
        let model = model.unwrap_or_else(|| self.generator.default_model());
        let answer = match self.generator.generate(model, &prompt).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, model, "generation failed");
                format!("Error: {}", e)
            }
        };

        ChatResponse {
            answer,
            sources: dedup_sources(&results),
        }
    }
}
