use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::prompt::{QualityTier, Style};
use crate::types::{GenerationType, Priority};

pub const MAX_PROMPT_CHARS: usize = 500;
pub const MAX_REFERENCE_IMAGES: usize = 5;
pub const MIN_VIDEO_DURATION_SECS: u32 = 1;
pub const MAX_VIDEO_DURATION_SECS: u32 = 15;
pub const DEFAULT_VIDEO_DURATION_SECS: u32 = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoOptions {
    pub duration: Option<u32>,
    pub aspect_ratio: Option<String>,
    /// Output quality token such as "720p" or "480p".
    pub resolution: Option<String>,
    /// When set the provider edits this video instead of generating one.
    pub source_video_url: Option<String>,
}

impl VideoOptions {
    pub fn effective_duration(&self) -> u32 {
        self.duration.unwrap_or(DEFAULT_VIDEO_DURATION_SECS)
    }
}

/// A caller-constructed request for one generation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub kind: GenerationType,
    pub owner: String,
    pub prompt: String,
    pub resolution: Option<String>,
    pub image_url: Option<String>,
    pub reference_images: Vec<String>,
    pub instructions: Option<String>,
    pub model_id: Option<String>,
    pub priority: Priority,
    pub style: Option<Style>,
    pub quality: Option<QualityTier>,
    pub video: VideoOptions,
}

impl GenerationRequest {
    pub fn new(kind: GenerationType, owner: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            owner: owner.into(),
            prompt: prompt.into(),
            resolution: None,
            image_url: None,
            reference_images: Vec::new(),
            instructions: None,
            model_id: None,
            priority: Priority::default(),
            style: None,
            quality: None,
            video: VideoOptions::default(),
        }
    }

    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    pub fn with_image(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    pub fn with_reference_images(mut self, urls: Vec<String>) -> Self {
        self.reference_images = urls;
        self
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_video_options(mut self, video: VideoOptions) -> Self {
        self.video = video;
        self
    }

    /// Aspect-ratio note handed to the prompt encoder, if the request carries one.
    pub fn aspect_ratio(&self) -> Option<&str> {
        self.video
            .aspect_ratio
            .as_deref()
            .or(self.resolution.as_deref())
            .filter(|value| value.contains(':'))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let prompt = self.prompt.trim();
        if prompt.is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }
        let length = prompt.chars().count();
        if length > MAX_PROMPT_CHARS {
            return Err(ValidationError::PromptTooLong {
                max: MAX_PROMPT_CHARS,
                actual: length,
            });
        }
        if self.kind == GenerationType::Edit
            && self.image_url.as_deref().is_none_or(|url| url.trim().is_empty())
        {
            return Err(ValidationError::ImageRequired(GenerationType::Edit));
        }
        if self.reference_images.len() > MAX_REFERENCE_IMAGES {
            return Err(ValidationError::TooManyReferenceImages {
                max: MAX_REFERENCE_IMAGES,
                actual: self.reference_images.len(),
            });
        }
        if let Some(duration) = self.video.duration {
            if !(MIN_VIDEO_DURATION_SECS..=MAX_VIDEO_DURATION_SECS).contains(&duration) {
                return Err(ValidationError::InvalidDuration {
                    min: MIN_VIDEO_DURATION_SECS,
                    max: MAX_VIDEO_DURATION_SECS,
                    actual: duration,
                });
            }
        }
        Ok(())
    }
}
