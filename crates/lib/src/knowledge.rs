//! Clinic knowledge base search (procedures, prices, policies).
//!
//! Preferred path: embed the query with OpenAI and call the Supabase
//! `match_documents` RPC for vector similarity. Every failure along that
//! path (no OpenAI key, embedding error, RPC non-200) degrades to a plain
//! case-insensitive substring search against the `knowledge_base` table.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

const EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const EMBEDDING_MODEL: &str = "text-embedding-3-small";
const MATCH_THRESHOLD: f64 = 0.5;
const MATCH_COUNT: usize = 5;
/// How many documents the formatted answer includes.
const TOP_DOCS: usize = 3;
const VECTOR_CONTENT_LIMIT: usize = 500;
const TEXT_CONTENT_LIMIT: usize = 300;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("supabase not configured")]
    NotConfigured,
    #[error("empty query")]
    EmptyQuery,
    #[error("knowledge request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("knowledge search returned {0}")]
    Api(reqwest::StatusCode),
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct Document {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

impl Document {
    fn render(&self, content_limit: usize) -> String {
        let title = self.title.as_deref().unwrap_or("Sem título");
        let content: String = self
            .content
            .as_deref()
            .unwrap_or_default()
            .chars()
            .take(content_limit)
            .collect();
        format!("**{}**\n{}", title, content)
    }
}

/// Knowledge base search client.
pub struct KnowledgeBase {
    supabase_url: Option<String>,
    supabase_key: Option<String>,
    openai_key: Option<String>,
    client: reqwest::Client,
}

impl KnowledgeBase {
    pub fn new(
        supabase_url: Option<String>,
        supabase_key: Option<String>,
        openai_key: Option<String>,
    ) -> Self {
        Self {
            supabase_url: supabase_url.map(|u| u.trim_end_matches('/').to_string()),
            supabase_key,
            openai_key,
            client: reqwest::Client::new(),
        }
    }

    fn credentials(&self) -> Result<(&str, &str), KnowledgeError> {
        match (self.supabase_url.as_deref(), self.supabase_key.as_deref()) {
            (Some(url), Some(key)) if !url.is_empty() && !key.is_empty() => Ok((url, key)),
            _ => Err(KnowledgeError::NotConfigured),
        }
    }

    /// Search the knowledge base and format an answer for the agent.
    pub async fn search(&self, query: &str) -> Result<String, KnowledgeError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(KnowledgeError::EmptyQuery);
        }
        self.credentials()?;

        match self.embed(query).await {
            Some(embedding) => match self.vector_search(&embedding).await {
                Ok(docs) => Ok(format_vector_results(query, &docs)),
                Err(e) => {
                    log::warn!("vector search failed ({}), using text search", e);
                    self.text_search(query).await
                }
            },
            None => self.text_search(query).await,
        }
    }

    /// Embed the query text. Any failure returns `None` so the caller can
    /// degrade to substring search instead of losing the turn.
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let key = self.openai_key.as_deref().filter(|k| !k.is_empty())?;
        let result = self
            .client
            .post(EMBEDDINGS_URL)
            .bearer_auth(key)
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({ "input": text, "model": EMBEDDING_MODEL }))
            .send()
            .await;
        let res = match result {
            Ok(res) if res.status().is_success() => res,
            Ok(res) => {
                log::warn!("embedding request returned {}", res.status());
                return None;
            }
            Err(e) => {
                log::warn!("embedding request failed: {}", e);
                return None;
            }
        };
        match res.json::<EmbeddingResponse>().await {
            Ok(parsed) => parsed.data.into_iter().next().map(|i| i.embedding),
            Err(e) => {
                log::warn!("embedding response malformed: {}", e);
                None
            }
        }
    }

    async fn vector_search(&self, embedding: &[f32]) -> Result<Vec<Document>, KnowledgeError> {
        let (url, key) = self.credentials()?;
        let res = self
            .client
            .post(format!("{}/rest/v1/rpc/match_documents", url))
            .header("apikey", key)
            .bearer_auth(key)
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({
                "query_embedding": embedding,
                "match_threshold": MATCH_THRESHOLD,
                "match_count": MATCH_COUNT,
            }))
            .send()
            .await?;
        if res.status() != reqwest::StatusCode::OK {
            return Err(KnowledgeError::Api(res.status()));
        }
        Ok(res.json().await?)
    }

    async fn text_search(&self, query: &str) -> Result<String, KnowledgeError> {
        let (url, key) = self.credentials()?;
        let res = self
            .client
            .get(format!("{}/rest/v1/knowledge_base", url))
            .header("apikey", key)
            .bearer_auth(key)
            .timeout(REQUEST_TIMEOUT)
            .query(&[
                (
                    "or",
                    format!("(title.ilike.*{}*,content.ilike.*{}*)", query, query),
                ),
                ("limit", MATCH_COUNT.to_string()),
            ])
            .send()
            .await?;
        if res.status() != reqwest::StatusCode::OK {
            return Err(KnowledgeError::Api(res.status()));
        }
        let docs: Vec<Document> = res.json().await?;
        Ok(format_text_results(query, &docs))
    }
}

fn format_vector_results(query: &str, docs: &[Document]) -> String {
    if docs.is_empty() {
        return format!(
            "Não encontrei informações sobre '{}' na base de conhecimento.",
            query
        );
    }
    let sections: Vec<String> = docs
        .iter()
        .take(TOP_DOCS)
        .map(|d| d.render(VECTOR_CONTENT_LIMIT))
        .collect();
    format!(
        "Informações encontradas sobre '{}':\n\n{}",
        query,
        sections.join("\n\n---\n\n")
    )
}

fn format_text_results(query: &str, docs: &[Document]) -> String {
    if docs.is_empty() {
        return format!("Não encontrei informações sobre '{}'.", query);
    }
    let sections: Vec<String> = docs
        .iter()
        .take(TOP_DOCS)
        .map(|d| d.render(TEXT_CONTENT_LIMIT))
        .collect();
    format!("Informações sobre '{}':\n\n{}", query, sections.join("\n\n"))
}
