//! Prompt enhancement shared by every provider.
//!
//! The encoder is a pure function of its inputs and the static tables below,
//! so the same request always produces a byte-identical enhanced prompt.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::GenerationType;

pub const MAX_CLEANED_PROMPT_CHARS: usize = 500;
pub const MAX_TAGS: usize = 8;

const CINEMATIC_TAGS: &[&str] = &[
    "ultra realistic",
    "hyper detailed",
    "8k resolution",
    "professional photography",
    "cinematic lighting",
    "depth of field",
    "sharp focus",
    "masterpiece",
    "best quality",
    "highly detailed",
];

const PHOTOREALISTIC_TAGS: &[&str] = &[
    "photorealistic",
    "realistic texture",
    "natural lighting",
    "lifelike",
    "true to life",
    "professional photo",
    "RAW photo",
    "DSLR quality",
];

const NEGATIVE_IMAGE: &str = "blurry, low quality, distorted, deformed, ugly, bad anatomy, disfigured, poorly drawn face, mutation, mutated, extra limbs, extra fingers, malformed limbs, missing arms, missing legs, extra arms, extra legs, fused fingers, too many fingers, long neck, cross-eyed, mutated hands, polar lowres, bad face, out of frame, oversaturated, overexposed";
const NEGATIVE_EDIT: &str = "low quality, artifacts, inconsistent style, unnatural blend";
const NEGATIVE_VIDEO: &str =
    "shaky, blurry, low quality, distorted, unstable, jittery, bad motion, unnatural movement";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    Photorealistic,
    Cinematic,
    Artistic,
    Minimal,
}

impl Style {
    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Photorealistic => "photorealistic",
            Style::Cinematic => "cinematic",
            Style::Artistic => "artistic",
            Style::Minimal => "minimal",
        }
    }

    fn modifier(&self) -> &'static str {
        match self {
            Style::Photorealistic => {
                "photorealistic style, lifelike appearance, natural textures, realistic lighting"
            }
            Style::Cinematic => {
                "cinematic composition, film grain, anamorphic lens flare, color graded, movie still"
            }
            Style::Artistic => "artistic interpretation, stylized, creative composition, expressive",
            Style::Minimal => {
                "minimalist composition, clean lines, simple background, focused subject"
            }
        }
    }

    /// Style used when the caller does not pick one.
    pub fn default_for(kind: GenerationType) -> Style {
        match kind {
            GenerationType::Video => Style::Cinematic,
            GenerationType::Image | GenerationType::Edit => Style::Photorealistic,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Standard,
    #[default]
    High,
    Ultra,
}

impl QualityTier {
    fn modifier(&self) -> &'static str {
        match self {
            QualityTier::Standard => "high quality, detailed",
            QualityTier::High => "ultra high quality, extremely detailed, crisp",
            QualityTier::Ultra => {
                "masterpiece, best quality, ultra detailed, 8k, hyperdetailed, intricate details"
            }
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            QualityTier::Standard => 0.7,
            QualityTier::High => 0.85,
            QualityTier::Ultra => 0.95,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedPrompt {
    pub original: String,
    pub enhanced: String,
    pub tags: Vec<String>,
    pub style: Style,
    pub quality: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct PromptEncoder<'a> {
    kind: GenerationType,
    style: Style,
    quality: QualityTier,
    aspect_ratio: Option<&'a str>,
}

impl<'a> PromptEncoder<'a> {
    pub fn new(kind: GenerationType) -> Self {
        Self {
            kind,
            style: Style::default_for(kind),
            quality: QualityTier::default(),
            aspect_ratio: None,
        }
    }

    pub fn style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }

    pub fn quality(mut self, quality: QualityTier) -> Self {
        self.quality = quality;
        self
    }

    pub fn aspect_ratio(mut self, aspect_ratio: Option<&'a str>) -> Self {
        self.aspect_ratio = aspect_ratio.map(str::trim).filter(|value| !value.is_empty());
        self
    }

    pub fn encode(&self, raw_prompt: &str) -> EnhancedPrompt {
        let cleaned = clean_prompt(raw_prompt);
        let tags = generate_tags(self.style);

        let mut parts = vec![
            self.quality.modifier().to_string(),
            format!("{cleaned}, {}", self.style.modifier()),
            tags.join(", "),
        ];
        if let Some(aspect_ratio) = self.aspect_ratio {
            parts.push(format!("composition: {aspect_ratio}"));
        }

        EnhancedPrompt {
            original: raw_prompt.to_string(),
            enhanced: parts.join(". "),
            tags,
            style: self.style,
            quality: self.quality.score(),
        }
    }

    pub fn negative_prompt(&self) -> &'static str {
        negative_prompt(self.kind)
    }
}

pub fn negative_prompt(kind: GenerationType) -> &'static str {
    match kind {
        GenerationType::Image => NEGATIVE_IMAGE,
        GenerationType::Edit => NEGATIVE_EDIT,
        GenerationType::Video => NEGATIVE_VIDEO,
    }
}

fn clean_prompt(prompt: &str) -> String {
    let collapsed = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .chars()
        .filter(|ch| !matches!(ch, '<' | '>' | '[' | ']' | '{' | '}'))
        .take(MAX_CLEANED_PROMPT_CHARS)
        .collect()
}

fn generate_tags(style: Style) -> Vec<String> {
    let extra: &[&str] = if style == Style::Photorealistic {
        PHOTOREALISTIC_TAGS
    } else {
        &[]
    };
    let mut tags: Vec<String> = Vec::with_capacity(MAX_TAGS);
    for tag in CINEMATIC_TAGS.iter().chain(extra.iter()) {
        if tags.len() == MAX_TAGS {
            break;
        }
        if !tags.iter().any(|existing| existing == tag) {
            tags.push((*tag).to_string());
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    const STYLES: [Style; 4] = [
        Style::Photorealistic,
        Style::Cinematic,
        Style::Artistic,
        Style::Minimal,
    ];

    #[test]
    fn encoding_is_deterministic() {
        for style in STYLES {
            for quality in [QualityTier::Standard, QualityTier::High, QualityTier::Ultra] {
                let encoder = PromptEncoder::new(GenerationType::Image)
                    .style(style)
                    .quality(quality)
                    .aspect_ratio(Some("16:9"));
                assert_eq!(encoder.encode("a red bicycle"), encoder.encode("a red bicycle"));
            }
        }
    }

    #[test]
    fn tags_are_capped_and_unique_for_every_style() {
        for style in STYLES {
            let tags = generate_tags(style);
            assert!(tags.len() <= MAX_TAGS);
            let mut deduped = tags.clone();
            deduped.sort();
            deduped.dedup();
            assert_eq!(deduped.len(), tags.len());
        }
    }

    #[test]
    fn cleaning_strips_brackets_and_collapses_whitespace() {
        assert_eq!(clean_prompt("  a  <red>\n[bike] {x} "), "a red bike x");
    }

    #[test]
    fn cleaning_truncates_to_limit() {
        let long = "a".repeat(800);
        assert_eq!(clean_prompt(&long).chars().count(), MAX_CLEANED_PROMPT_CHARS);
    }

    #[test]
    fn enhanced_prompt_leads_with_quality_cue() {
        let prompt = PromptEncoder::new(GenerationType::Image)
            .quality(QualityTier::Standard)
            .style(Style::Minimal)
            .aspect_ratio(Some("1:1"))
            .encode("a red bicycle");
        let parts: Vec<&str> = prompt.enhanced.split(". ").collect();
        assert_eq!(parts[0], "high quality, detailed");
        assert!(parts[1].starts_with("a red bicycle, minimalist composition"));
        assert_eq!(parts.last().copied(), Some("composition: 1:1"));
        assert_eq!(prompt.quality, 0.7);
        assert_eq!(prompt.original, "a red bicycle");
    }

    #[test]
    fn video_defaults_to_cinematic_style() {
        let prompt = PromptEncoder::new(GenerationType::Video).encode("waves");
        assert_eq!(prompt.style, Style::Cinematic);
        assert_eq!(prompt.quality, 0.85);
        assert!(negative_prompt(GenerationType::Video).contains("jittery"));
    }
}
