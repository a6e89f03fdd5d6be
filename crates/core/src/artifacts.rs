//! # Campaign Artifacts
//!
//! Schema-shaped records each stage is contracted to publish, and the final
//! campaign aggregate. Generators are loose about field names, so several
//! records accept alternate keys and fold them into the canonical ones in
//! [`Artifact::normalize`].

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::extract;
use crate::language::detect_language;

/// Kind of artifact a stage publishes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Strategy,
    Copywriting,
    Images,
    Video,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Strategy => "strategy",
            ArtifactKind::Copywriting => "copywriting",
            ArtifactKind::Images => "images",
            ArtifactKind::Video => "video",
        }
    }

    /// Schema description appended to the stage instructions
    pub fn schema_prompt(&self) -> String {
        match self {
            ArtifactKind::Strategy => schema_prompt::<MarketingStrategy>(),
            ArtifactKind::Copywriting => schema_prompt::<CopywritingContent>(),
            ArtifactKind::Images => schema_prompt::<ImageContent>(),
            ArtifactKind::Video => schema_prompt::<VideoScript>(),
        }
    }
}

/// A record published by exactly one stage
pub trait Artifact: Serialize + DeserializeOwned + JsonSchema + Send + Sync + 'static {
    const KIND: ArtifactKind;

    /// Fold alternate generator field names into canonical ones
    fn normalize(&mut self) {}

    /// Schema-valid placeholder used when the stage's text cannot be parsed
    fn fallback(topic: &str) -> Self;

    /// Extract from a stage message, falling back on any parse failure
    fn from_message(text: &str, topic: &str) -> Self {
        let mut record: Self = extract::extract_or_else(text, Self::KIND.as_str(), || {
            Self::fallback(topic)
        });
        record.normalize();
        record
    }
}

// ============================================================================
// Strategy
// ============================================================================

/// Structured positioning work published by the strategy stage
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct MarketingStrategy {
    /// User supplied topic for the campaign.
    pub topic: String,
    /// Analysis of the user's original intent, goals and what they want to achieve.
    #[serde(default)]
    pub user_intent: String,
    /// Language code for all outputs, detected from user input (e.g. 'en', 'zh', 'ja', 'ko').
    #[serde(default = "default_language")]
    pub output_language: String,
    /// Persona or ICP summary.
    pub target_audience: String,
    /// Ordered list of customer pains.
    #[serde(default)]
    pub pain_points: Vec<String>,
    /// Differentiated value props.
    #[serde(default)]
    pub selling_points: Vec<String>,
    /// Story beats or outline segments.
    #[serde(default)]
    pub content_framework: Vec<String>,
    /// Tone guidance for downstream assets.
    pub tone_of_voice: String,
    /// Anchor themes to repeat across channels.
    #[serde(default)]
    pub brand_pillars: Vec<String>,
    /// SEO or creative keywords to reuse.
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_language() -> String {
    "en".to_string()
}

impl MarketingStrategy {
    /// Minimal valid strategy: topic plus single-item placeholder lists
    pub fn placeholder(topic: &str, language: &str) -> Self {
        Self {
            topic: topic.to_string(),
            user_intent: format!("Create marketing content for {}", topic),
            output_language: language.to_string(),
            target_audience: "To be analyzed".to_string(),
            pain_points: vec!["To be analyzed".to_string()],
            selling_points: vec!["To be analyzed".to_string()],
            content_framework: vec!["Introduction".to_string()],
            tone_of_voice: "Professional, trustworthy".to_string(),
            brand_pillars: vec!["Quality".to_string()],
            keywords: vec![topic.to_string()],
        }
    }

    /// List fields, in schema order
    pub fn list_fields(&self) -> [(&'static str, &[String]); 5] {
        [
            ("pain_points", self.pain_points.as_slice()),
            ("selling_points", self.selling_points.as_slice()),
            ("content_framework", self.content_framework.as_slice()),
            ("brand_pillars", self.brand_pillars.as_slice()),
            ("keywords", self.keywords.as_slice()),
        ]
    }

    /// Human-readable rendering
    pub fn to_markdown(&self) -> String {
        let mut lines = vec![
            format!("# Marketing Strategy: {}", self.topic),
            String::new(),
            "## Target Audience".to_string(),
            self.target_audience.clone(),
            String::new(),
            "## Pain Points".to_string(),
        ];
        lines.extend(self.pain_points.iter().map(|p| format!("- {}", p)));
        lines.extend([String::new(), "## Selling Points".to_string()]);
        lines.extend(self.selling_points.iter().map(|p| format!("- {}", p)));
        lines.extend([String::new(), "## Content Framework".to_string()]);
        lines.extend(self.content_framework.iter().map(|p| format!("1. {}", p)));
        lines.extend([
            String::new(),
            "## Tone of Voice".to_string(),
            self.tone_of_voice.clone(),
            String::new(),
            "## Brand Pillars".to_string(),
        ]);
        lines.extend(self.brand_pillars.iter().map(|p| format!("- {}", p)));
        lines.extend([String::new(), "## Keywords".to_string(), self.keywords.join(", ")]);
        lines.join("\n")
    }
}

impl Artifact for MarketingStrategy {
    const KIND: ArtifactKind = ArtifactKind::Strategy;

    fn fallback(topic: &str) -> Self {
        Self::placeholder(topic, detect_language(topic))
    }
}

// ============================================================================
// Copywriting
// ============================================================================

/// Single social post variant
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SocialPost {
    /// Channel, e.g. LinkedIn, Instagram, Rednote.
    #[serde(default)]
    pub platform: String,
    /// Tone or mood for the copy.
    #[serde(default)]
    pub tone: String,
    /// First line or hook that anchors the scroll stop.
    #[serde(default)]
    pub hook: String,
    /// Main body text.
    #[serde(default)]
    pub body: String,
    /// Call-to-action copy.
    #[serde(default)]
    pub cta: String,
    /// Hashtags for the post.
    #[serde(default, deserialize_with = "string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub hashtags: Vec<String>,
    /// Suggested image description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_suggestion: Option<String>,

    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    channel: Option<String>,
    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    post_text: Option<String>,
    #[serde(default, rename = "copy", skip_serializing)]
    #[schemars(skip)]
    copy_text: Option<String>,
    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    content: Option<String>,
    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    call_to_action: Option<String>,
}

impl SocialPost {
    pub fn new(platform: &str, hook: &str, body: &str, cta: &str) -> Self {
        Self {
            platform: platform.to_string(),
            hook: hook.to_string(),
            body: body.to_string(),
            cta: cta.to_string(),
            ..Self::default()
        }
    }

    fn normalize(&mut self) {
        if self.platform.is_empty() {
            if let Some(channel) = self.channel.take() {
                self.platform = channel;
            }
        }
        if self.body.is_empty() {
            if let Some(body) = self
                .post_text
                .take()
                .or_else(|| self.copy_text.take())
                .or_else(|| self.content.take())
            {
                self.body = body;
            }
        }
        if self.cta.is_empty() {
            if let Some(cta) = self.call_to_action.take() {
                self.cta = cta;
            }
        }
    }
}

/// Accepts `["#a", "#b"]` as well as `"#a #b"` or `"#a, #b"`
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }

    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::One(s) => s
            .replace(',', " ")
            .split_whitespace()
            .map(str::to_string)
            .collect(),
        StringOrList::Many(v) => v,
        StringOrList::Nothing(()) => Vec::new(),
    })
}

/// Email campaign copy
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct EmailCampaign {
    /// Subject line variants for A/B testing.
    #[serde(default)]
    pub subject_lines: Vec<String>,
    /// Inbox preview text.
    #[serde(default)]
    pub preview_text: String,
    /// HTML body.
    #[serde(default)]
    pub body_html: String,
    /// Plain-text body.
    #[serde(default)]
    pub body_plain: String,
}

/// Payload published by the copywriting stage
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CopywritingContent {
    /// One sentence elevator pitch.
    pub hero_message: String,
    #[serde(default)]
    pub social_posts: Vec<SocialPost>,
    /// Ordered outline for the long-form asset.
    #[serde(default)]
    pub blog_outline: Vec<String>,
    /// Full blog/long-form draft in markdown.
    pub blog_article: String,
    /// Problem/solution bullets.
    #[serde(default)]
    pub pain_point_analysis: Vec<String>,
    /// List of CTA options for experimentation.
    #[serde(default)]
    pub cta_variations: Vec<String>,
    /// Optional email campaign.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_campaign: Option<EmailCampaign>,
}

impl Artifact for CopywritingContent {
    const KIND: ArtifactKind = ArtifactKind::Copywriting;

    fn normalize(&mut self) {
        self.social_posts.iter_mut().for_each(SocialPost::normalize);
    }

    fn fallback(topic: &str) -> Self {
        Self {
            hero_message: topic.to_string(),
            social_posts: Vec::new(),
            blog_outline: Vec::new(),
            blog_article: String::new(),
            pain_point_analysis: Vec::new(),
            cta_variations: Vec::new(),
            email_campaign: None,
        }
    }
}

// ============================================================================
// Images
// ============================================================================

/// Prompt engineering payload for an image generator
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ImagePrompt {
    /// Stable identifier used for matching assets.
    pub prompt_id: String,
    /// The actual text prompt to feed the image model.
    pub prompt: String,
    /// Plain language paraphrase for humans.
    #[serde(default)]
    pub scene_description: String,
    /// Visual direction (e.g. cinematic, minimal).
    #[serde(default = "default_style")]
    pub style: String,
    /// Aspect ratio guidance.
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
}

fn default_style() -> String {
    "cinematic".to_string()
}

fn default_aspect_ratio() -> String {
    "1:1".to_string()
}

/// Metadata for a rendered image
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct GeneratedImage {
    pub prompt_id: String,
    /// URL or local file reference to the rendered image.
    pub url: String,
    /// Local filesystem path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    /// Model-adjusted prompt text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
    /// Original prompt used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// Prompts plus generated imagery
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ImageContent {
    #[serde(default)]
    pub prompts: Vec<ImagePrompt>,
    #[serde(default)]
    pub assets: Vec<GeneratedImage>,
}

impl Artifact for ImageContent {
    const KIND: ArtifactKind = ArtifactKind::Images;

    fn fallback(_topic: &str) -> Self {
        Self::default()
    }
}

// ============================================================================
// Video
// ============================================================================

/// Single scene in a three-act marketing video
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct VideoScene {
    pub scene_number: u32,
    /// Problem / Solution / Transformation
    #[serde(default)]
    pub act: String,
    /// Camera and action direction.
    #[serde(default)]
    pub visuals: String,
    /// Narration copy.
    #[serde(default)]
    pub voiceover: String,
    /// On-screen supers or captions.
    #[serde(default)]
    pub screen_text: String,
    /// Duration of the shot in seconds (4, 8 or 12).
    #[serde(default = "default_scene_seconds")]
    #[schemars(range(min = 1))]
    pub duration_seconds: u32,

    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    visual: Option<String>,
    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    audio_narration: Option<String>,
    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    narration: Option<String>,
    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    dialogue: Option<Value>,
    #[serde(default, skip_serializing)]
    #[schemars(skip)]
    on_screen_text: Option<String>,
}

fn default_scene_seconds() -> u32 {
    5
}

impl VideoScene {
    fn normalize(&mut self) {
        if self.voiceover.is_empty() {
            let dialogue = match self.dialogue.take() {
                Some(Value::String(s)) => Some(s),
                _ => None,
            };
            if let Some(voiceover) = self
                .audio_narration
                .take()
                .or_else(|| self.narration.take())
                .or(dialogue)
            {
                self.voiceover = voiceover;
            }
        }
        if self.screen_text.is_empty() {
            if let Some(text) = self.on_screen_text.take() {
                self.screen_text = text;
            }
        }
        if self.visuals.is_empty() {
            if let Some(visual) = self.visual.take() {
                self.visuals = visual;
            }
        }
        self.duration_seconds = self.duration_seconds.max(1);
    }
}

/// Structured output of the video stage
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct VideoScript {
    /// High-level structure summary.
    #[serde(default)]
    pub structure_notes: Vec<String>,
    #[serde(default)]
    pub scenes: Vec<VideoScene>,
    /// Summed duration for quick planning.
    #[serde(default = "default_total_seconds")]
    pub total_duration_seconds: u32,
    /// Closing CTA line.
    #[serde(default)]
    pub cta: String,
    /// Subtitle text block in SRT style.
    #[serde(default)]
    pub srt_caption: String,
}

fn default_total_seconds() -> u32 {
    60
}

impl Default for VideoScript {
    fn default() -> Self {
        Self {
            structure_notes: Vec::new(),
            scenes: Vec::new(),
            total_duration_seconds: default_total_seconds(),
            cta: String::new(),
            srt_caption: String::new(),
        }
    }
}

impl Artifact for VideoScript {
    const KIND: ArtifactKind = ArtifactKind::Video;

    fn normalize(&mut self) {
        self.scenes.iter_mut().for_each(VideoScene::normalize);
    }

    fn fallback(_topic: &str) -> Self {
        Self::default()
    }
}

// ============================================================================
// Aggregate
// ============================================================================

/// Final packaged output across all modalities
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignPackage {
    pub campaign_id: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
    pub strategy: MarketingStrategy,
    pub copywriting: CopywritingContent,
    pub images: ImageContent,
    pub video: VideoScript,
    /// Filesystem location for persisted assets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_path: Option<String>,
}

impl CampaignPackage {
    pub fn with_package_path(mut self, path: impl Into<String>) -> Self {
        self.package_path = Some(path.into());
        self
    }
}

// ============================================================================
// Schema prompts
// ============================================================================

/// Render a compact field listing from a type's JSON schema
pub fn schema_prompt<T: JsonSchema>() -> String {
    let schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null);
    let mut out = String::from("Fields:\n");
    out.push_str(&describe_properties(schema.get("properties"), "- "));

    let defs = schema.get("$defs").and_then(Value::as_object);
    if let Some(defs) = defs.filter(|d| !d.is_empty()) {
        out.push_str("\nNested object definitions:\n");
        for (name, def) in defs {
            out.push_str(&format!("\n{}:\n", name));
            out.push_str(&describe_properties(def.get("properties"), "  - "));
        }
    }
    out
}

fn describe_properties(properties: Option<&Value>, bullet: &str) -> String {
    let Some(props) = properties.and_then(Value::as_object) else {
        return String::new();
    };
    props
        .iter()
        .map(|(name, info)| {
            let description = info.get("description").and_then(Value::as_str).unwrap_or("");
            format!("{}{} ({}): {}\n", bullet, name, type_description(info), description)
        })
        .collect()
}

fn ref_name(info: &Value) -> Option<&str> {
    info.get("$ref")
        .and_then(Value::as_str)
        .and_then(|r| r.rsplit('/').next())
}

fn primary_type(info: &Value) -> &str {
    match info.get("type") {
        Some(Value::String(t)) => t.as_str(),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null")
            .unwrap_or("string"),
        _ => "object",
    }
}

fn type_description(info: &Value) -> String {
    if let Some(name) = ref_name(info) {
        return format!("{} object", name);
    }
    if let Some(name) = info
        .get("anyOf")
        .and_then(Value::as_array)
        .and_then(|variants| variants.iter().find_map(ref_name))
    {
        return format!("{} object", name);
    }
    match primary_type(info) {
        "array" => {
            let items = info.get("items").cloned().unwrap_or(Value::Null);
            match ref_name(&items) {
                Some(name) => format!("array of {} objects", name),
                None => format!("array of {}s", items.get("type").and_then(Value::as_str).unwrap_or("string")),
            }
        }
        other => other.to_string(),
    }
}
