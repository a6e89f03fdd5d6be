//! # Packaging
//!
//! Final stage. Pulls the most recent message of every artifact-publishing
//! stage out of the conversation, parses it, assembles the
//! [`CampaignPackage`] and optionally writes the campaign folder:
//!
//! ```text
//! {campaign_dir}/
//!   strategy/     strategy.json, strategy.md
//!   copywriting/  hero_message.md, blog.md, social_posts.json, ...
//!                 email/ (when an email campaign exists)
//!   images/       prompts.json, assets.json, *.png
//!   video/        scenes.json, video_script.json, script.md, cta.md, *.mp4
//!   manifest.json
//! ```
//!
//! A missing or empty stage message is fatal. A present message that does not
//! parse degrades to that artifact's fallback.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::path::{Path, PathBuf};

use super::{Stage, StageContext, StageId};
use crate::artifacts::{
    Artifact, ArtifactKind, CampaignPackage, CopywritingContent, ImageContent, MarketingStrategy, VideoScript,
};
use crate::conversation::Conversation;
use crate::error::{WorkflowError, WorkflowResult};
use crate::state::io::{dump_json, ensure_directory, slugify, write_text};
use crate::workflow::events::{WorkflowEvent, WorkflowEventKind};

const REQUIRED: [ArtifactKind; 4] = [
    ArtifactKind::Strategy,
    ArtifactKind::Copywriting,
    ArtifactKind::Images,
    ArtifactKind::Video,
];

#[derive(Debug, Clone, Default)]
pub struct PackagingStage {
    campaign_dir: Option<PathBuf>,
}

impl PackagingStage {
    /// Assemble only; nothing is written
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble and write the campaign folder (which may already hold media)
    pub fn persisting_to(campaign_dir: impl Into<PathBuf>) -> Self {
        Self {
            campaign_dir: Some(campaign_dir.into()),
        }
    }

    fn extract<A: Artifact>(conversation: &Conversation, ctx: &StageContext, topic: &str) -> WorkflowResult<A> {
        let stage = ctx.registry.stage_for(A::KIND).ok_or_else(|| {
            WorkflowError::InvalidPipeline(format!("no stage publishes the {} artifact", A::KIND.as_str()))
        })?;

        let message = conversation
            .latest_from(stage)
            .ok_or_else(|| WorkflowError::missing(stage, "no message in conversation"))?;
        if message.text.trim().is_empty() {
            return Err(WorkflowError::missing(stage, "message is empty"));
        }

        Ok(A::from_message(&message.text, topic))
    }

    /// Build the aggregate from the conversation
    pub fn assemble(&self, conversation: &Conversation, ctx: &StageContext) -> WorkflowResult<CampaignPackage> {
        let topic = conversation
            .topic()
            .ok_or_else(|| anyhow::anyhow!("User topic not found in conversation history"))?;

        let strategy: MarketingStrategy = Self::extract(conversation, ctx, topic)?;
        let copywriting: CopywritingContent = Self::extract(conversation, ctx, topic)?;
        let images: ImageContent = Self::extract(conversation, ctx, topic)?;
        let video: VideoScript = Self::extract(conversation, ctx, topic)?;

        Ok(CampaignPackage {
            campaign_id: slugify(&format!("{}-{}", topic, strategy.target_audience)),
            topic: topic.to_string(),
            created_at: Utc::now(),
            strategy,
            copywriting,
            images,
            video,
            package_path: None,
        })
    }
}

#[async_trait]
impl Stage for PackagingStage {
    fn id(&self) -> StageId {
        StageId::Packaging
    }

    fn artifact(&self) -> Option<ArtifactKind> {
        None
    }

    fn requires(&self) -> Vec<ArtifactKind> {
        REQUIRED.to_vec()
    }

    async fn run(&self, conversation: &Conversation, ctx: &StageContext) -> WorkflowResult<Conversation> {
        let mut package = self.assemble(conversation, ctx)?;

        if let Some(dir) = &self.campaign_dir {
            let path = persist_package(&package, dir).await?;
            package = package.with_package_path(path.display().to_string());
            tracing::info!(run_id = %ctx.run_id, path = %path.display(), "Campaign persisted");
        }

        ctx.events
            .emit(
                WorkflowEvent::for_stage(WorkflowEventKind::PackageReady, StageId::Packaging).with_data(json!({
                    "campaign_id": package.campaign_id,
                    "package_path": package.package_path,
                })),
            )
            .await;

        let text = serde_json::to_string_pretty(&package).map_err(|e| anyhow::anyhow!(e))?;
        Ok(conversation.with_output(StageId::Packaging, text))
    }
}

/// Write every artifact plus `manifest.json` under `base_dir`
pub async fn persist_package(package: &CampaignPackage, base_dir: &Path) -> Result<PathBuf> {
    let base_dir = ensure_directory(base_dir).await?;
    let strategy_dir = ensure_directory(base_dir.join("strategy")).await?;
    let copy_dir = ensure_directory(base_dir.join("copywriting")).await?;
    let img_dir = ensure_directory(base_dir.join("images")).await?;
    let video_dir = ensure_directory(base_dir.join("video")).await?;

    dump_json(&package.strategy, strategy_dir.join("strategy.json")).await?;
    write_text(strategy_dir.join("strategy.md"), &package.strategy.to_markdown()).await?;

    let copy = &package.copywriting;
    write_text(copy_dir.join("hero_message.md"), &copy.hero_message).await?;
    write_text(copy_dir.join("blog.md"), &copy.blog_article).await?;
    dump_json(&copy.social_posts, copy_dir.join("social_posts.json")).await?;
    dump_json(&copy.blog_outline, copy_dir.join("blog_outline.json")).await?;
    dump_json(&copy.pain_point_analysis, copy_dir.join("pain_point_analysis.json")).await?;
    dump_json(&copy.cta_variations, copy_dir.join("cta_variations.json")).await?;

    if let Some(email) = &copy.email_campaign {
        let email_dir = ensure_directory(copy_dir.join("email")).await?;
        dump_json(email, email_dir.join("email_campaign.json")).await?;
        write_text(email_dir.join("email_campaign.txt"), &email.body_plain).await?;
        if !email.subject_lines.is_empty() {
            write_text(email_dir.join("subject_lines.txt"), &email.subject_lines.join("\n")).await?;
        }
    }

    dump_json(&package.images.prompts, img_dir.join("prompts.json")).await?;
    dump_json(&package.images.assets, img_dir.join("assets.json")).await?;

    let video = &package.video;
    dump_json(&video.scenes, video_dir.join("scenes.json")).await?;
    dump_json(video, video_dir.join("video_script.json")).await?;
    write_text(video_dir.join("script.md"), &video.srt_caption).await?;
    write_text(video_dir.join("cta.md"), &video.cta).await?;
    if !video.structure_notes.is_empty() {
        let notes: Vec<String> = video.structure_notes.iter().map(|n| format!("- {}", n)).collect();
        write_text(video_dir.join("structure_notes.md"), &notes.join("\n")).await?;
    }

    let manifest = package.clone().with_package_path(base_dir.display().to_string());
    dump_json(&manifest, base_dir.join("manifest.json")).await?;

    Ok(base_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::EmailCampaign;
    use crate::stages::ArtifactRegistry;
    use crate::state::io::tests::scratch_dir;
    use crate::workflow::events::EventSink;
    use std::sync::Arc;

    const STRATEGY: &str = r#"{"topic": "Smart Watch", "target_audience": "Busy professionals aged 30-45", "tone_of_voice": "Warm"}"#;
    const COPY: &str = r##"```json
{"hero_message": "Time, mastered.", "blog_article": "# Blog", "email_campaign": {"subject_lines": ["A", "B"], "body_plain": "Hi"}}
```"##;

    fn context() -> StageContext {
        let mut registry = ArtifactRegistry::new();
        registry.register(ArtifactKind::Strategy, StageId::Strategy);
        registry.register(ArtifactKind::Copywriting, StageId::Copywriting);
        registry.register(ArtifactKind::Images, StageId::Image);
        registry.register(ArtifactKind::Video, StageId::Video);
        StageContext::new("run-1", EventSink::new(), Arc::new(registry))
    }

    fn full_conversation() -> Conversation {
        Conversation::seed("Smart Watch")
            .with_output(StageId::Strategy, STRATEGY)
            .with_output(StageId::Copywriting, COPY)
            .with_output(StageId::Image, r#"{"prompts": [{"prompt_id": "prompt-01", "prompt": "watch"}]}"#)
            .with_output(StageId::Video, "not json at all")
    }

    #[test]
    fn test_assemble() {
        let package = PackagingStage::new().assemble(&full_conversation(), &context()).unwrap();
        assert_eq!(package.campaign_id, "smart-watch-busy-professionals-aged-30-45");
        assert_eq!(package.copywriting.hero_message, "Time, mastered.");
        assert_eq!(package.images.prompts[0].style, "cinematic");
        // Unparseable video degrades to its fallback
        assert_eq!(package.video, VideoScript::default());
    }

    #[test]
    fn test_most_recent_message_wins() {
        let convo = full_conversation().with_output(
            StageId::Strategy,
            r#"{"topic": "Smart Watch", "target_audience": "Runners", "tone_of_voice": "Bold"}"#,
        );
        let package = PackagingStage::new().assemble(&convo, &context()).unwrap();
        assert_eq!(package.strategy.target_audience, "Runners");
    }

    #[test]
    fn test_missing_stage_is_fatal() {
        let convo = Conversation::seed("Smart Watch")
            .with_output(StageId::Strategy, STRATEGY)
            .with_output(StageId::Copywriting, COPY)
            .with_output(StageId::Image, "{}");
        let err = PackagingStage::new().assemble(&convo, &context()).unwrap_err();
        assert!(matches!(err, WorkflowError::MissingArtifact { stage: StageId::Video, .. }));
        assert!(err.to_string().contains("video_agent"));
    }

    #[test]
    fn test_empty_stage_message_is_fatal() {
        let convo = full_conversation().with_output(StageId::Copywriting, "   ");
        let err = PackagingStage::new().assemble(&convo, &context()).unwrap_err();
        assert!(matches!(err, WorkflowError::MissingArtifact { stage: StageId::Copywriting, .. }));
    }

    #[tokio::test]
    async fn test_run_persists_layout() {
        let root = scratch_dir("packaging");
        let dir = root.join("20250101_000000_campaign");
        let ctx = context();
        let stage = PackagingStage::persisting_to(&dir);

        let out = stage.run(&full_conversation(), &ctx).await.unwrap();
        let last = out.last().unwrap();
        assert_eq!(last.author, Some(StageId::Packaging));

        let package: CampaignPackage = serde_json::from_str(&last.text).unwrap();
        assert_eq!(package.package_path.as_deref(), Some(dir.display().to_string().as_str()));

        for file in [
            "strategy/strategy.json",
            "strategy/strategy.md",
            "copywriting/hero_message.md",
            "copywriting/blog.md",
            "copywriting/social_posts.json",
            "copywriting/email/email_campaign.json",
            "copywriting/email/subject_lines.txt",
            "images/prompts.json",
            "images/assets.json",
            "video/scenes.json",
            "video/video_script.json",
            "video/script.md",
            "video/cta.md",
            "manifest.json",
        ] {
            assert!(dir.join(file).exists(), "{} missing", file);
        }
        assert!(!dir.join("video/structure_notes.md").exists());

        let manifest: CampaignPackage =
            serde_json::from_str(&tokio::fs::read_to_string(dir.join("manifest.json")).await.unwrap()).unwrap();
        assert_eq!(manifest.package_path, package.package_path);
        assert_eq!(
            manifest.copywriting.email_campaign,
            Some(EmailCampaign {
                subject_lines: vec!["A".into(), "B".into()],
                body_plain: "Hi".into(),
                ..EmailCampaign::default()
            })
        );

        assert_eq!(ctx.events.kinds(), vec![WorkflowEventKind::PackageReady]);
        let _ = tokio::fs::remove_dir_all(root).await;
    }
}
