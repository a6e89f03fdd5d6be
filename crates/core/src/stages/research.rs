//! # Deep Research
//!
//! Three-phase replacement for the single-call strategy stage:
//!
//! 1. **Plan** - the generator breaks the topic into prioritised dimensions
//!    with search queries. Unparseable plans fall back to a fixed
//!    three-dimension plan.
//! 2. **Research** - queries are issued sequentially, high priority first,
//!    within a per-dimension and per-run call budget; the generator then
//!    summarises the raw results into findings.
//! 3. **Synthesis** - plan and findings become a [`MarketingStrategy`],
//!    published under the strategy author so nothing downstream can tell
//!    which variant ran.
//!
//! Any phase may degrade to its fallback. Only configuration errors abort.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use super::{prompts, Stage, StageContext, StageId};
use crate::artifacts::{ArtifactKind, MarketingStrategy};
use crate::config::ResearchConfig;
use crate::conversation::Conversation;
use crate::error::{WorkflowError, WorkflowResult};
use crate::extract;
use crate::language::detect_language;
use crate::llm::{AgentRunner, ChatBackend, ChatConfig, ChatMessage};
use crate::tools::search::{SearchOutcome, SearchQuery};
use crate::tools::{SearchProvider, SearchTool, ToolBox};
use crate::workflow::events::{WorkflowEvent, WorkflowEventKind};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResearchPlan {
    #[serde(default)]
    pub topic_analysis: String,
    #[serde(default)]
    pub research_dimensions: Vec<ResearchDimension>,
    #[serde(default)]
    pub target_insights: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResearchDimension {
    pub dimension: String,
    /// high, medium or low
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub search_queries: Vec<String>,
    #[serde(default)]
    pub info_needed: Vec<String>,
}

impl ResearchDimension {
    fn new(dimension: &str, priority: &str, queries: [String; 2], info: [&str; 2]) -> Self {
        Self {
            dimension: dimension.to_string(),
            priority: priority.to_string(),
            search_queries: queries.to_vec(),
            info_needed: info.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Sort key: high, medium, low; anything unrecognised ranks as medium
    fn rank(&self) -> u8 {
        match self.priority.trim().to_lowercase().as_str() {
            "high" => 0,
            "low" => 2,
            _ => 1,
        }
    }
}

impl ResearchPlan {
    /// Plan used when the generator's plan cannot be parsed
    pub fn fallback(topic: &str) -> Self {
        Self {
            topic_analysis: topic.to_string(),
            research_dimensions: vec![
                ResearchDimension::new(
                    "Market Trends",
                    "high",
                    [format!("{} market trends 2024 2025", topic), format!("{} industry outlook", topic)],
                    ["Market size", "Growth trends"],
                ),
                ResearchDimension::new(
                    "Target Users",
                    "high",
                    [format!("{} user persona pain points", topic), format!("{} target audience", topic)],
                    ["User characteristics", "Pain points and needs"],
                ),
                ResearchDimension::new(
                    "Competitive Landscape",
                    "medium",
                    [format!("{} competitor analysis", topic), format!("{} competitors", topic)],
                    ["Main competitors", "Differentiation opportunities"],
                ),
            ],
            target_insights: vec![
                "Market opportunities".to_string(),
                "User pain points".to_string(),
                "Differentiated positioning".to_string(),
            ],
        }
    }

    /// Dimensions in priority order; ties keep plan order
    pub fn by_priority(&self) -> Vec<&ResearchDimension> {
        let mut dimensions: Vec<&ResearchDimension> = self.research_dimensions.iter().collect();
        dimensions.sort_by_key(|d| d.rank());
        dimensions
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DimensionFindings {
    #[serde(default)]
    pub dimension: String,
    #[serde(default)]
    pub key_insights: Vec<String>,
    #[serde(default)]
    pub data_points: Vec<String>,
    #[serde(default)]
    pub trends: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResearchFindings {
    #[serde(default)]
    pub research_findings: Vec<DimensionFindings>,
    #[serde(default)]
    pub market_overview: String,
    #[serde(default)]
    pub competitive_landscape: String,
    #[serde(default)]
    pub opportunity_areas: Vec<String>,
}

impl ResearchFindings {
    /// Empty envelope used when findings cannot be parsed
    pub fn fallback(topic: &str) -> Self {
        Self {
            research_findings: Vec::new(),
            market_overview: format!("Research on {}", topic),
            competitive_landscape: "To be analyzed".to_string(),
            opportunity_areas: Vec::new(),
        }
    }
}

/// Search results gathered for one dimension
#[derive(Debug, Clone, Serialize)]
struct DimensionEvidence<'a> {
    dimension: &'a str,
    priority: &'a str,
    searches: Vec<SearchOutcome>,
}

pub struct DeepResearchStage {
    backend: Arc<dyn ChatBackend>,
    config: ChatConfig,
    search: Arc<dyn SearchProvider>,
    research: ResearchConfig,
}

impl DeepResearchStage {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        config: ChatConfig,
        search: Arc<dyn SearchProvider>,
        research: ResearchConfig,
    ) -> Self {
        Self {
            backend,
            config,
            search,
            research,
        }
    }

    /// One tool-less generator call; non-configuration failures become `None`
    async fn generate(&self, ctx: &StageContext, phase: &str, system: String, prompt: String) -> WorkflowResult<Option<String>> {
        let tools = ToolBox::new();
        let result = AgentRunner::new(self.backend.as_ref(), self.config.clone(), &tools, StageId::Strategy, &ctx.events)
            .run(vec![ChatMessage::system(system), ChatMessage::user(prompt)])
            .await;

        match result {
            Ok(text) => Ok(Some(text)),
            Err(e @ WorkflowError::Configuration(_)) => Err(e),
            Err(e) => {
                tracing::warn!(run_id = %ctx.run_id, phase, error = %e, "Research phase generation failed, using fallback");
                Ok(None)
            }
        }
    }

    async fn phase_event(&self, ctx: &StageContext, data: Value) {
        ctx.events
            .emit(WorkflowEvent::for_stage(WorkflowEventKind::ResearchPhase, StageId::Strategy).with_data(data))
            .await;
    }

    async fn plan(&self, ctx: &StageContext, topic: &str, language: &str) -> WorkflowResult<ResearchPlan> {
        let prompt = format!(
            "Please create a deep research plan for the following marketing topic (user language: {}):\n\n{}",
            language, topic
        );
        let text = self
            .generate(ctx, "plan", prompts::RESEARCH_PLANNER.to_string(), prompt)
            .await?;

        let plan = text
            .map(|t| extract::extract_or_else(&t, "research plan", || ResearchPlan::fallback(topic)))
            .unwrap_or_else(|| ResearchPlan::fallback(topic));

        if plan.research_dimensions.is_empty() {
            tracing::warn!(run_id = %ctx.run_id, "Research plan has no dimensions, using default plan");
            return Ok(ResearchPlan::fallback(topic));
        }
        Ok(plan)
    }

    /// Issue the plan's queries in priority order within the budgets
    async fn search(&self, ctx: &StageContext, plan: &ResearchPlan) -> WorkflowResult<Vec<(String, String, Vec<SearchOutcome>)>> {
        let tool = SearchTool::new(self.search.clone()).with_budget(self.research.max_search_calls);
        let mut gathered = Vec::new();

        'dimensions: for dimension in plan.by_priority() {
            let mut searches = Vec::new();
            for query in dimension
                .search_queries
                .iter()
                .filter(|q| !q.trim().is_empty())
                .take(self.research.max_queries_per_dimension)
            {
                if tool.remaining() == Some(0) {
                    tracing::info!(run_id = %ctx.run_id, calls = tool.calls_made(), "Research search budget spent");
                    gathered.push((dimension.dimension.clone(), dimension.priority.clone(), searches));
                    break 'dimensions;
                }
                let outcome = tool
                    .search(SearchQuery::new(
                        query.trim(),
                        self.research.search_depth.clone(),
                        self.research.max_results,
                    ))
                    .await?;
                searches.push(outcome);
            }
            gathered.push((dimension.dimension.clone(), dimension.priority.clone(), searches));
        }
        Ok(gathered)
    }

    async fn research(&self, ctx: &StageContext, topic: &str, language: &str, plan: &ResearchPlan) -> WorkflowResult<(ResearchFindings, usize)> {
        let gathered = self.search(ctx, plan).await?;
        let calls: usize = gathered.iter().map(|(_, _, s)| s.len()).sum();

        let evidence: Vec<DimensionEvidence<'_>> = gathered
            .iter()
            .map(|(dimension, priority, searches)| DimensionEvidence {
                dimension,
                priority,
                searches: searches.clone(),
            })
            .collect();

        let prompt = format!(
            "**Topic**: {}\n**Output language**: {}\n\n**Research Plan**:\n{}\n\n**Search Results**:\n{}\n\nSummarize the findings per dimension, high priority dimensions first.",
            topic,
            language,
            to_pretty(plan),
            to_pretty(&evidence),
        );
        let text = self
            .generate(ctx, "research", prompts::RESEARCHER.to_string(), prompt)
            .await?;

        let findings = text
            .map(|t| extract::extract_or_else(&t, "research findings", || ResearchFindings::fallback(topic)))
            .unwrap_or_else(|| ResearchFindings::fallback(topic));
        Ok((findings, calls))
    }

    async fn synthesize(
        &self,
        ctx: &StageContext,
        topic: &str,
        language: &str,
        plan: &ResearchPlan,
        findings: &ResearchFindings,
    ) -> WorkflowResult<MarketingStrategy> {
        let prompt = format!(
            "Please generate a structured marketing strategy based on the following research data.\n\n**Topic**: {}\n**output_language**: {}\n\n**Research Plan**:\n{}\n\n**Research Findings**:\n{}\n\nEnsure:\n1. The topic field contains the original topic\n2. Each list field has at least 3 entries\n3. Content is based on the research findings",
            topic,
            language,
            to_pretty(plan),
            to_pretty(findings),
        );
        let Some(text) = self
            .generate(ctx, "synthesis", prompts::analyst_instructions(), prompt)
            .await?
        else {
            return Ok(MarketingStrategy::placeholder(topic, language));
        };

        Ok(strategy_from_text(&text, topic, language))
    }
}

/// Parse a synthesized strategy, filling topic and language when omitted
pub fn strategy_from_text(text: &str, topic: &str, language: &str) -> MarketingStrategy {
    let mut value = match extract::extract_value(text) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) | Err(_) => {
            tracing::warn!("Strategy synthesis unparseable, using placeholder");
            return MarketingStrategy::placeholder(topic, language);
        }
    };

    if let Some(obj) = value.as_object_mut() {
        obj.entry("topic").or_insert_with(|| json!(topic));
        obj.entry("output_language").or_insert_with(|| json!(language));
    }

    serde_json::from_value(value).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Strategy synthesis failed validation, using placeholder");
        MarketingStrategy::placeholder(topic, language)
    })
}

fn to_pretty<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

#[async_trait]
impl Stage for DeepResearchStage {
    fn id(&self) -> StageId {
        StageId::Strategy
    }

    fn artifact(&self) -> Option<ArtifactKind> {
        Some(ArtifactKind::Strategy)
    }

    async fn run(&self, conversation: &Conversation, ctx: &StageContext) -> WorkflowResult<Conversation> {
        let topic = conversation
            .topic()
            .ok_or_else(|| anyhow::anyhow!("User topic not found in conversation history"))?;
        let language = detect_language(topic);
        tracing::info!(run_id = %ctx.run_id, topic, language, "Deep research started");

        let plan = self.plan(ctx, topic, language).await?;
        self.phase_event(
            ctx,
            json!({"phase": "plan", "dimensions": plan.research_dimensions.len()}),
        )
        .await;

        let (findings, calls) = self.research(ctx, topic, language, &plan).await?;
        self.phase_event(
            ctx,
            json!({
                "phase": "research",
                "search_calls": calls,
                "findings": findings.research_findings.len(),
            }),
        )
        .await;

        let strategy = self.synthesize(ctx, topic, language, &plan, &findings).await?;
        self.phase_event(ctx, json!({"phase": "synthesis", "output_language": strategy.output_language}))
            .await;

        let text = serde_json::to_string_pretty(&strategy).map_err(|e| anyhow::anyhow!(e))?;
        tracing::info!(run_id = %ctx.run_id, "Deep research completed");
        Ok(conversation.with_output(StageId::Strategy, text))
    }
}
