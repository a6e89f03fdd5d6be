//! # Web Search
//!
//! `web_search` tool over a [`SearchProvider`]. Calls are counted against an
//! optional per-instance budget; once spent, further calls return an error
//! payload instead of reaching the provider.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{parameters_for, parse_args, Tool};
use crate::error::{WorkflowError, WorkflowResult};
use crate::llm::ToolDefinition;
use crate::state::io::truncate;

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";
const MAX_ERROR_LEN: usize = 300;

/// Arguments for web search
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchQuery {
    /// The search query. Be specific and include relevant keywords for better results.
    pub query: String,
    /// Search depth: 'basic' for quick results, 'advanced' for comprehensive research
    #[serde(default = "default_depth")]
    pub search_depth: String,
    /// Maximum number of results to return (1-10)
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

fn default_depth() -> String {
    "basic".to_string()
}

fn default_max_results() -> u32 {
    5
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, search_depth: impl Into<String>, max_results: u32) -> Self {
        Self {
            query: query.into(),
            search_depth: search_depth.into(),
            max_results,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

/// What the tool hands back to the generator
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchOutcome {
    pub query: String,
    pub results: Vec<SearchHit>,
    #[serde(default)]
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchOutcome {
    pub fn failed(query: &str, error: impl Into<String>) -> Self {
        Self {
            query: query.to_string(),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// The web-search capability
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// `Err(Configuration)` is fatal; any other error becomes an error payload
    async fn search(&self, query: &SearchQuery) -> WorkflowResult<SearchOutcome>;
}

/// Tavily search API client
pub struct TavilySearch {
    api_key: Option<String>,
    client: reqwest::Client,
}

impl TavilySearch {
    pub fn new(api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { api_key, client }
    }

    /// Reads `TAVILY_API_KEY` (or the legacy `Tvly_API_KEY`)
    pub fn from_env() -> Self {
        let key = std::env::var("TAVILY_API_KEY")
            .or_else(|_| std::env::var("Tvly_API_KEY"))
            .ok();
        Self::new(key)
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(&self, query: &SearchQuery) -> WorkflowResult<SearchOutcome> {
        let key = self.api_key.as_deref().ok_or_else(|| {
            WorkflowError::Configuration("Tavily API key not configured. Set TAVILY_API_KEY".into())
        })?;

        let response = self
            .client
            .post(TAVILY_ENDPOINT)
            .bearer_auth(key)
            .json(&json!({
                "query": query.query,
                "search_depth": query.search_depth,
                "max_results": query.max_results,
                "include_answer": true,
            }))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Web search failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Web search failed ({}): {}", status, body).into());
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Web search returned invalid JSON: {}", e))?;

        let results = body["results"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value::<SearchHit>(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();

        Ok(SearchOutcome {
            query: query.query.clone(),
            results,
            answer: body["answer"].as_str().unwrap_or("").to_string(),
            error: None,
        })
    }
}

/// The `web_search` tool
pub struct SearchTool {
    provider: Arc<dyn SearchProvider>,
    budget: Option<usize>,
    used: AtomicUsize,
}

impl SearchTool {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self {
            provider,
            budget: None,
            used: AtomicUsize::new(0),
        }
    }

    /// Cap the number of provider calls this instance will make
    pub fn with_budget(mut self, max_calls: usize) -> Self {
        self.budget = Some(max_calls);
        self
    }

    /// Provider calls made so far
    pub fn calls_made(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> Option<usize> {
        self.budget.map(|b| b.saturating_sub(self.calls_made()))
    }

    /// Run one search; capability failures come back inside the outcome
    pub async fn search(&self, mut query: SearchQuery) -> WorkflowResult<SearchOutcome> {
        query.max_results = query.max_results.clamp(1, 10);

        let slot = self.used.fetch_add(1, Ordering::SeqCst);
        if let Some(budget) = self.budget {
            if slot >= budget {
                self.used.fetch_sub(1, Ordering::SeqCst);
                tracing::warn!(query = %query.query, budget, "Search budget exhausted");
                return Ok(SearchOutcome::failed(
                    &query.query,
                    format!("Search budget of {} calls exhausted for this run", budget),
                ));
            }
        }

        match self.provider.search(&query).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_configuration() => Err(e),
            Err(e) => {
                let mut message = e.to_string();
                if message.chars().count() > MAX_ERROR_LEN {
                    message = format!("{}...", truncate(&message, MAX_ERROR_LEN));
                }
                tracing::warn!(query = %query.query, error = %message, "Web search failed");
                Ok(SearchOutcome::failed(&query.query, message))
            }
        }
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "web_search".to_string(),
            description: "Search the web for current information, market trends, competitor analysis, or any topic research.".to_string(),
            parameters: parameters_for::<SearchQuery>(),
        }
    }

    async fn call(&self, args: Value) -> WorkflowResult<Value> {
        let query = match parse_args::<SearchQuery>("web_search", args) {
            Ok(q) => q,
            Err(payload) => return Ok(payload),
        };
        let outcome = self.search(query).await?;
        Ok(serde_json::to_value(outcome).unwrap_or_else(|e| super::error_payload(e.to_string())))
    }
}
