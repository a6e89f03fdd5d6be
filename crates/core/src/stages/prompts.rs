//! Default stage instructions bundled at compile time.
//!
//! `{{schema}}` in a template is replaced by the artifact's schema prompt.

use crate::artifacts::{schema_prompt, ArtifactKind, MarketingStrategy};
use crate::stages::StageId;

/// Strategist - single-call strategy stage
pub const STRATEGY: &str = include_str!("defaults/strategy.md");

/// Copywriter - social posts, blog, CTAs, email
pub const COPYWRITING: &str = include_str!("defaults/copywriting.md");

/// Image prompt engineer
pub const IMAGE: &str = include_str!("defaults/image.md");

/// Three-act video scriptwriter
pub const VIDEO: &str = include_str!("defaults/video.md");

pub const SEARCH_TOOL: &str = include_str!("defaults/search_tool.md");
pub const IMAGE_TOOL: &str = include_str!("defaults/image_tool.md");
pub const IMAGE_NO_TOOL: &str = include_str!("defaults/image_no_tool.md");
pub const VIDEO_TOOL: &str = include_str!("defaults/video_tool.md");
pub const VIDEO_NO_TOOL: &str = include_str!("defaults/video_no_tool.md");

/// Deep research: plan phase
pub const RESEARCH_PLANNER: &str = include_str!("defaults/research_planner.md");

/// Deep research: findings summary
pub const RESEARCHER: &str = include_str!("defaults/researcher.md");

/// Deep research: synthesis into a strategy
pub const RESEARCH_ANALYST: &str = include_str!("defaults/research_analyst.md");

const SCHEMA_SLOT: &str = "{{schema}}";

fn with_schema(template: &str, schema: &str) -> String {
    template.replace(SCHEMA_SLOT, schema)
}

/// Instructions for a generative stage, given the tool names it holds
pub fn stage_instructions(stage: StageId, kind: ArtifactKind, tools: &[String]) -> String {
    let has = |name: &str| tools.iter().any(|t| t == name);
    let schema = kind.schema_prompt();

    let mut sections = vec![match stage {
        StageId::Strategy => with_schema(STRATEGY, &schema),
        StageId::Copywriting => with_schema(COPYWRITING, &schema),
        StageId::Image => with_schema(IMAGE, &schema),
        StageId::Video => with_schema(VIDEO, &schema),
        StageId::Packaging => schema,
    }];

    if has("web_search") {
        sections.push(SEARCH_TOOL.to_string());
    }
    match stage {
        StageId::Image if has("generate_image") => sections.push(IMAGE_TOOL.to_string()),
        StageId::Image => sections.push(IMAGE_NO_TOOL.to_string()),
        StageId::Video if has("generate_video") => sections.push(VIDEO_TOOL.to_string()),
        StageId::Video => sections.push(VIDEO_NO_TOOL.to_string()),
        _ => {}
    }
    sections.join("\n\n")
}

/// Synthesis instructions carrying the strategy schema
pub fn analyst_instructions() -> String {
    with_schema(RESEARCH_ANALYST, &schema_prompt::<MarketingStrategy>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_prompts_non_empty() {
        for (name, content) in [
            ("strategy", STRATEGY),
            ("copywriting", COPYWRITING),
            ("image", IMAGE),
            ("video", VIDEO),
            ("research_planner", RESEARCH_PLANNER),
            ("researcher", RESEARCHER),
            ("research_analyst", RESEARCH_ANALYST),
        ] {
            assert!(content.len() > 50, "Prompt '{}' seems too short", name);
        }
    }

    #[test]
    fn test_schema_is_spliced_in() {
        let text = stage_instructions(StageId::Strategy, ArtifactKind::Strategy, &[]);
        assert!(!text.contains(SCHEMA_SLOT));
        assert!(text.contains("target_audience"));
        assert!(!text.contains("web_search tool is available"));
    }

    #[test]
    fn test_tool_sections_follow_tools() {
        let with_tool = stage_instructions(StageId::Video, ArtifactKind::Video, &["generate_video".to_string()]);
        assert!(with_tool.contains("generate_video tool is available"));

        let without = stage_instructions(StageId::Video, ArtifactKind::Video, &[]);
        assert!(without.contains("no video generation tool"));

        let copy = stage_instructions(StageId::Copywriting, ArtifactKind::Copywriting, &["web_search".to_string()]);
        assert!(copy.contains("web_search tool is available"));
    }

    #[test]
    fn test_analyst_has_schema() {
        assert!(analyst_instructions().contains("brand_pillars"));
    }
}
