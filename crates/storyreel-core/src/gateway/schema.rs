//! Structured-output schemas and payload parsing.
//!
//! Draft operations pin the provider to JSON via response schemas; this
//! module builds those schemas, parses the replies into domain types, and
//! enforces the motion-prompt pacing suffix.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::error::{CoreError, CoreResult};
use crate::types::TitleCandidate;

// =============================================================================
// Constants
// =============================================================================

/// Pacing clause every motion prompt must close with.
pub const MOTION_SUFFIX: &str = "There is no slow motion, and the scene unfolds quickly.";

/// Number of title candidates a draft is asked for.
pub const TITLE_COUNT: usize = 10;

// =============================================================================
// Motion Prompt Normalization
// =============================================================================

/// Appends [`MOTION_SUFFIX`] unless the prompt already closes with it.
///
/// The check matches the suffix tail rather than the full clause, so a prompt
/// that already ends in `"quickly."` is left alone. Applying this twice is the
/// same as applying it once.
pub fn normalize_motion_prompt(prompt: &str) -> String {
    let trimmed = prompt.trim_end();
    if trimmed.is_empty() {
        return MOTION_SUFFIX.to_string();
    }
    if trimmed.ends_with("quickly.") {
        return trimmed.to_string();
    }
    format!("{trimmed} {MOTION_SUFFIX}")
}

// =============================================================================
// Response Schemas
// =============================================================================

/// Schema for a full story draft: scenes, titles, and the music production.
pub fn story_response_schema(scene_count: u32) -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "scenes": {
                "type": "ARRAY",
                "description": format!("Exactly {scene_count} narrative scenes."),
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "sceneNumber": { "type": "INTEGER" },
                        "description": { "type": "STRING" },
                        "imagePrompt": { "type": "STRING" },
                        "i2vPrompt": { "type": "STRING" },
                    },
                    "required": ["sceneNumber", "description", "imagePrompt", "i2vPrompt"],
                },
            },
            "titles": {
                "type": "ARRAY",
                "description": "10 SEO optimized YouTube titles.",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "english": { "type": "STRING" },
                        "korean": { "type": "STRING" },
                    },
                    "required": ["english", "korean"],
                },
            },
            "musicPrompt": { "type": "STRING" },
            "lyrics": { "type": "STRING" },
            "lyricsKorean": { "type": "STRING" },
        },
        "required": ["scenes", "titles", "musicPrompt", "lyrics", "lyricsKorean"],
    })
}

/// Schema for a standalone title regeneration.
pub fn titles_response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "titles": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "english": { "type": "STRING" },
                        "korean": { "type": "STRING" },
                    },
                    "required": ["english", "korean"],
                },
            },
        },
        "required": ["titles"],
    })
}

/// Schema for a composed motion prompt pair.
pub fn motion_prompt_response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "english": {
                "type": "STRING",
                "description": "Optimized English motion prompt for image-to-video generation",
            },
            "korean": {
                "type": "STRING",
                "description": "Accurate and evocative Korean translation of the English prompt",
            },
        },
        "required": ["english", "korean"],
    })
}

// =============================================================================
// Wire Payloads
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStoryPayload {
    #[serde(default)]
    scenes: Vec<RawScene>,
    #[serde(default)]
    titles: Vec<RawTitle>,
    #[serde(default)]
    music_prompt: String,
    #[serde(default)]
    lyrics: String,
    #[serde(default)]
    lyrics_korean: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScene {
    scene_number: u32,
    description: String,
    image_prompt: String,
    i2v_prompt: String,
}

#[derive(Debug, Deserialize)]
struct RawTitle {
    english: String,
    korean: String,
}

#[derive(Debug, Deserialize)]
struct RawTitleList {
    #[serde(default)]
    titles: Vec<RawTitle>,
}

#[derive(Debug, Deserialize)]
struct RawMotionPayload {
    #[serde(default)]
    english: String,
    #[serde(default)]
    korean: String,
}

// =============================================================================
// Domain Drafts
// =============================================================================

/// One scene of a freshly drafted story, before any rendering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneDraft {
    pub scene_number: u32,
    /// Short narrative summary of the scene.
    pub narrative: String,
    /// Visual prompt for still-image generation.
    pub image_prompt: String,
    /// Motion directive for image-to-video, always suffix-terminated.
    pub motion_prompt: String,
}

/// A complete story draft as returned by the structure operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryDraft {
    pub scenes: Vec<SceneDraft>,
    pub titles: Vec<TitleCandidate>,
    pub music_prompt: String,
    pub lyrics: String,
    pub lyrics_localized: String,
}

/// Bilingual motion prompt pair for a single image-to-video shot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionPrompt {
    pub english: String,
    pub korean: String,
}

// =============================================================================
// Payload Parsing
// =============================================================================

/// Extracts JSON from a reply that may wrap it in markdown code fences.
fn extract_json(text: &str) -> &str {
    let inner = if text.contains("```json") {
        text.split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(text)
    } else if text.contains("```") {
        text.split("```")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(text)
    } else {
        text
    };
    inner.trim()
}

/// Parses a story draft reply and normalizes every motion prompt.
///
/// Scene and title counts that disagree with the request are tolerated with a
/// warning; an empty scene list is not.
pub fn parse_story_payload(text: &str, requested_scenes: u32) -> CoreResult<StoryDraft> {
    let raw: RawStoryPayload = serde_json::from_str(extract_json(text))
        .map_err(|e| CoreError::SchemaViolation(format!("Story payload did not parse: {e}")))?;

    if raw.scenes.is_empty() {
        return Err(CoreError::SchemaViolation(
            "Story payload contained no scenes".into(),
        ));
    }
    if raw.scenes.len() != requested_scenes as usize {
        warn!(
            requested = requested_scenes,
            received = raw.scenes.len(),
            "provider returned a different scene count than requested"
        );
    }
    if raw.titles.len() != TITLE_COUNT {
        warn!(
            received = raw.titles.len(),
            "provider returned a different title count than requested"
        );
    }

    Ok(StoryDraft {
        scenes: raw
            .scenes
            .into_iter()
            .map(|s| SceneDraft {
                scene_number: s.scene_number,
                narrative: s.description,
                image_prompt: s.image_prompt,
                motion_prompt: normalize_motion_prompt(&s.i2v_prompt),
            })
            .collect(),
        titles: raw
            .titles
            .into_iter()
            .map(|t| TitleCandidate::new(t.english, t.korean))
            .collect(),
        music_prompt: raw.music_prompt,
        lyrics: raw.lyrics,
        lyrics_localized: raw.lyrics_korean,
    })
}

/// Parses a standalone titles reply.
pub fn parse_titles_payload(text: &str) -> CoreResult<Vec<TitleCandidate>> {
    let raw: RawTitleList = serde_json::from_str(extract_json(text))
        .map_err(|e| CoreError::SchemaViolation(format!("Titles payload did not parse: {e}")))?;

    if raw.titles.is_empty() {
        return Err(CoreError::SchemaViolation(
            "Titles payload contained no titles".into(),
        ));
    }
    if raw.titles.len() != TITLE_COUNT {
        warn!(
            received = raw.titles.len(),
            "provider returned a different title count than requested"
        );
    }

    Ok(raw
        .titles
        .into_iter()
        .map(|t| TitleCandidate::new(t.english, t.korean))
        .collect())
}

/// Parses a motion prompt reply; the English half gets the pacing suffix.
pub fn parse_motion_payload(text: &str) -> CoreResult<MotionPrompt> {
    let raw: RawMotionPayload = serde_json::from_str(extract_json(text)).map_err(|e| {
        CoreError::SchemaViolation(format!("Motion prompt payload did not parse: {e}"))
    })?;

    if raw.english.trim().is_empty() {
        return Err(CoreError::SchemaViolation(
            "Motion prompt payload had an empty english field".into(),
        ));
    }

    Ok(MotionPrompt {
        english: normalize_motion_prompt(&raw.english),
        korean: raw.korean,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_appended_when_missing() {
        let out = normalize_motion_prompt("The camera pans across the harbor");
        assert_eq!(
            out,
            "The camera pans across the harbor There is no slow motion, and the scene unfolds quickly."
        );
    }

    #[test]
    fn suffix_not_duplicated() {
        let already = format!("Waves crash. {MOTION_SUFFIX}");
        assert_eq!(normalize_motion_prompt(&already), already);
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_motion_prompt("Dust swirls in the beam");
        let twice = normalize_motion_prompt(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_prompt_becomes_bare_suffix() {
        assert_eq!(normalize_motion_prompt("   "), MOTION_SUFFIX);
    }

    #[test]
    fn story_schema_threads_scene_count() {
        let schema = story_response_schema(3);
        let description = schema["properties"]["scenes"]["description"]
            .as_str()
            .unwrap();
        assert_eq!(description, "Exactly 3 narrative scenes.");

        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 5);
    }

    #[test]
    fn story_payload_parses_and_normalizes() {
        let text = r#"{
            "scenes": [
                {"sceneNumber": 1, "description": "Opening", "imagePrompt": "A lighthouse at dusk", "i2vPrompt": "Slow push toward the door"},
                {"sceneNumber": 2, "description": "Climb", "imagePrompt": "Spiral stairs", "i2vPrompt": "Rises fast, and the scene unfolds quickly."}
            ],
            "titles": [{"english": "The Last Light", "korean": "마지막 빛"}],
            "musicPrompt": "Genre: ambient",
            "lyrics": "[Verse 1] ...",
            "lyricsKorean": "[1절] ..."
        }"#;

        let draft = parse_story_payload(text, 2).unwrap();
        assert_eq!(draft.scenes.len(), 2);
        assert!(draft.scenes[0].motion_prompt.ends_with(MOTION_SUFFIX));
        assert_eq!(
            draft.scenes[1].motion_prompt,
            "Rises fast, and the scene unfolds quickly."
        );
        assert_eq!(draft.titles[0].primary, "The Last Light");
        assert_eq!(draft.lyrics_localized, "[1절] ...");
    }

    #[test]
    fn story_payload_inside_code_fence_parses() {
        let text = "```json\n{\"scenes\":[{\"sceneNumber\":1,\"description\":\"d\",\"imagePrompt\":\"p\",\"i2vPrompt\":\"m\"}],\"titles\":[],\"musicPrompt\":\"\",\"lyrics\":\"\",\"lyricsKorean\":\"\"}\n```";
        let draft = parse_story_payload(text, 1).unwrap();
        assert_eq!(draft.scenes.len(), 1);
    }

    #[test]
    fn empty_scene_list_rejected() {
        let text = r#"{"scenes": [], "titles": [], "musicPrompt": "", "lyrics": "", "lyricsKorean": ""}"#;
        let err = parse_story_payload(text, 3).unwrap_err();
        assert!(matches!(err, CoreError::SchemaViolation(_)));
    }

    #[test]
    fn mismatched_scene_count_is_tolerated() {
        let text = r#"{"scenes": [
            {"sceneNumber": 1, "description": "d", "imagePrompt": "p", "i2vPrompt": "m"}
        ], "titles": [], "musicPrompt": "", "lyrics": "", "lyricsKorean": ""}"#;
        let draft = parse_story_payload(text, 5).unwrap();
        assert_eq!(draft.scenes.len(), 1);
    }

    #[test]
    fn titles_payload_maps_to_candidates() {
        let text = r#"{"titles": [
            {"english": "One", "korean": "하나"},
            {"english": "Two", "korean": "둘"}
        ]}"#;
        let titles = parse_titles_payload(text).unwrap();
        assert_eq!(titles.len(), 2);
        assert_eq!(titles[1].localized, "둘");
    }

    #[test]
    fn motion_payload_normalizes_english() {
        let text = r#"{"english": "Fog rolls over the rail", "korean": "안개가 난간 위로"}"#;
        let prompt = parse_motion_payload(text).unwrap();
        assert!(prompt.english.ends_with(MOTION_SUFFIX));
        assert_eq!(prompt.korean, "안개가 난간 위로");
    }

    #[test]
    fn garbage_payload_is_schema_violation() {
        assert!(matches!(
            parse_story_payload("not json", 1),
            Err(CoreError::SchemaViolation(_))
        ));
        assert!(matches!(
            parse_titles_payload("{}"),
            Err(CoreError::SchemaViolation(_))
        ));
    }
}
