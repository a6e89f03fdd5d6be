//! Full campaign runs against scripted capabilities.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use beacon_core::config::WorkflowConfig;
use beacon_core::llm::{ChatBackend, ChatRequest, ChatResponse, ProviderError};
use beacon_core::tools::search::{SearchHit, SearchOutcome, SearchQuery};
use beacon_core::tools::SearchProvider;
use beacon_core::workflow::{Capabilities, MarketingWorkflow, WorkflowEventKind};
use beacon_core::WorkflowResult;

const TOPIC: &str = "AI Programming Assistant";

const STRATEGY: &str = r#"Here is the strategy:
```json
{
  "topic": "AI Programming Assistant",
  "user_intent": "Launch awareness among working developers",
  "target_audience": "Professional software developers at fast-moving product teams",
  "pain_points": ["Context switching", "Boilerplate", "Slow code review"],
  "selling_points": ["Inline suggestions", "Repository awareness", "Private by default"],
  "content_framework": ["Problem", "Demo", "Proof", "Offer"],
  "tone_of_voice": "Confident, technical, friendly",
  "brand_pillars": ["Speed", "Trust", "Craft"],
  "keywords": ["ai coding", "developer productivity", "code assistant"],
}
```"#;

const COPY: &str = r##"```json
{
  "hero_message": "Ship the idea, skip the boilerplate",
  "social_posts": [
    {"channel": "LinkedIn", "post_text": "Your repo, understood.", "hashtags": "#ai #devtools"},
    {"platform": "X", "body": "Less typing, more building.", "hashtags": ["#coding"]},
  ],
  "blog_outline": ["Why", "How", "Proof"],
  "blog_article": "# Ship faster

Long form with a C:\path in it.",
  "pain_point_analysis": ["Context switching costs hours"],
  "cta_variations": ["Start free", "Book a demo", "Try it now"],
}
```"##;

const IMAGES: &str = r#"{"prompts": [
  {"prompt_id": "prompt-01", "prompt": "developer at dawn with glowing editor"},
  {"prompt_id": "prompt-02", "prompt": "code flowing into a rocket", "style": "isometric"}
]}"#;

const VIDEO: &str = r#"{"structure_notes": ["Hook", "Demo", "CTA"], "scenes": [
  {"scene_number": 1, "act": "hook", "visual": "blank editor", "narration": "Stuck again?"},
  {"scene_number": 2, "act": "demo", "visuals": "suggestion appears", "voiceover": "Not anymore."}
], "cta": "Start free today", "srt_caption": "1\n00:00:00,000 --> 00:00:02,000\nStuck again?"}"#;

/// Replays canned turns in order, whatever the stage
struct Script {
    turns: Mutex<VecDeque<String>>,
}

impl Script {
    fn new(turns: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.iter().map(|t| t.to_string()).collect()),
        })
    }

    fn remaining(&self) -> usize {
        self.turns.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatBackend for Script {
    fn name(&self) -> &str {
        "script"
    }

    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.turns
            .lock()
            .unwrap()
            .pop_front()
            .map(ChatResponse::Text)
            .ok_or_else(|| ProviderError::RequestFailed("script exhausted".into()))
    }
}

#[derive(Default)]
struct Search {
    queries: Mutex<Vec<SearchQuery>>,
}

#[async_trait]
impl SearchProvider for Search {
    async fn search(&self, query: &SearchQuery) -> WorkflowResult<SearchOutcome> {
        self.queries.lock().unwrap().push(query.clone());
        Ok(SearchOutcome {
            query: query.query.clone(),
            results: vec![SearchHit {
                title: "Survey".into(),
                url: "https://example.com/survey".into(),
                content: format!("Findings on {}", query.query),
                score: 0.8,
            }],
            answer: String::new(),
            error: None,
        })
    }
}

fn scratch_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("beacon-{}-{}", name, uuid::Uuid::new_v4()))
}

fn assert_slug(id: &str) {
    assert!(!id.is_empty() && id.len() <= 60, "bad length: {}", id);
    assert!(
        id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'),
        "not a slug: {}",
        id
    );
    assert!(!id.starts_with('-') && !id.ends_with('-'));
}

#[tokio::test]
async fn test_full_campaign_is_persisted() {
    let output_dir = scratch_dir("e2e");
    let config = WorkflowConfig {
        output_dir: output_dir.clone(),
        ..WorkflowConfig::default()
    };
    let chat = Script::new(&[STRATEGY, COPY, IMAGES, VIDEO]);
    let (tx, mut rx) = tokio::sync::mpsc::channel(512);
    let mut workflow = MarketingWorkflow::new(config, Capabilities::new(chat.clone(), Arc::new(Search::default())))
        .unwrap()
        .with_event_channel(tx);

    let package = workflow.run(TOPIC).await.unwrap();
    assert_eq!(chat.remaining(), 0);

    assert_eq!(package.topic, TOPIC);
    assert_slug(&package.campaign_id);
    assert!(package.campaign_id.starts_with("ai-programming-assistant-"));
    for (field, items) in package.strategy.list_fields() {
        assert!(items.len() >= 3, "{} has {} entries", field, items.len());
    }

    // Repaired: trailing commas, a raw newline and a stray backslash
    assert_eq!(package.copywriting.hero_message, "Ship the idea, skip the boilerplate");
    assert_eq!(package.copywriting.social_posts[0].platform, "LinkedIn");
    assert_eq!(package.copywriting.social_posts[0].hashtags, vec!["#ai", "#devtools"]);

    assert_eq!(package.images.prompts.len(), 2);
    assert!(package.images.assets.is_empty());
    assert_eq!(package.video.scenes[0].voiceover, "Stuck again?");
    assert_eq!(package.video.scenes[0].visuals, "blank editor");

    let package_dir = PathBuf::from(package.package_path.clone().unwrap());
    assert!(package_dir.starts_with(&output_dir));
    assert!(package_dir
        .file_name()
        .unwrap()
        .to_string_lossy()
        .ends_with("_campaign"));
    for file in ["manifest.json", "strategy/strategy.md", "copywriting/blog.md", "video/scenes.json"] {
        assert!(package_dir.join(file).exists(), "{} missing", file);
    }

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind);
    }
    let count = |kind: WorkflowEventKind| kinds.iter().filter(|k| **k == kind).count();
    assert_eq!(count(WorkflowEventKind::StageStarted), 5);
    assert_eq!(count(WorkflowEventKind::CheckpointSaved), 5);
    assert_eq!(count(WorkflowEventKind::PackageReady), 1);
    assert!(count(WorkflowEventKind::StreamedToken) >= 4);
    assert_eq!(kinds.last(), Some(&WorkflowEventKind::RunIdle));

    let _ = tokio::fs::remove_dir_all(&output_dir).await;
}

#[tokio::test]
async fn test_deep_research_with_unparseable_plan() {
    let config = WorkflowConfig {
        persist_output: false,
        enable_deep_research: true,
        ..WorkflowConfig::default()
    };
    let findings = r#"{"research_findings": [], "market_overview": "Crowded but growing"}"#;
    let chat = Script::new(&["Sorry, no plan today.", findings, STRATEGY, COPY, IMAGES, VIDEO]);
    let search = Arc::new(Search::default());
    let mut workflow = MarketingWorkflow::new(config, Capabilities::new(chat.clone(), search.clone())).unwrap();

    let package = workflow.run(TOPIC).await.unwrap();

    let queries = search.queries.lock().unwrap();
    assert_eq!(queries.len(), 6);
    assert!(queries.iter().all(|q| q.query.contains(TOPIC)));
    assert_eq!(package.strategy.topic, TOPIC);
    assert_eq!(package.strategy.output_language, "en");
    assert!(package.package_path.is_none());
    assert_slug(&package.campaign_id);
}

#[tokio::test]
async fn test_missing_stage_output_aborts_run() {
    let config = WorkflowConfig {
        persist_output: false,
        ..WorkflowConfig::default()
    };
    // Video stage gets an empty reply
    let chat = Script::new(&[STRATEGY, COPY, IMAGES, "   "]);
    let mut workflow = MarketingWorkflow::new(config, Capabilities::new(chat, Arc::new(Search::default()))).unwrap();

    let err = workflow.run(TOPIC).await.unwrap_err();
    assert!(err.to_string().contains("video_agent"), "{}", err);
}
