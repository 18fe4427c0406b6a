use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum GenerationType {
    Image,
    Edit,
    Video,
}

impl GenerationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationType::Image => "image",
            GenerationType::Edit => "edit",
            GenerationType::Video => "video",
        }
    }
}

impl fmt::Display for GenerationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(GenerationType::Image),
            "edit" => Ok(GenerationType::Edit),
            "video" => Ok(GenerationType::Video),
            other => Err(format!("unknown generation type: {other}")),
        }
    }
}

/// Tie-break used by the router when several models can serve a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Speed,
    #[default]
    Quality,
    Cost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    #[serde(rename = "modelslabs")]
    ModelsLabs,
    Xai,
    Higgsfield,
}

impl ProviderId {
    pub const ALL: [ProviderId; 3] = [ProviderId::ModelsLabs, ProviderId::Xai, ProviderId::Higgsfield];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::ModelsLabs => "modelslabs",
            ProviderId::Xai => "xai",
            ProviderId::Higgsfield => "higgsfield",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::ModelsLabs => "ModelsLabs",
            ProviderId::Xai => "xAI",
            ProviderId::Higgsfield => "Higgsfield",
        }
    }

    /// Generation types each provider's adapter can serve.
    pub fn supported_types(&self) -> &'static [GenerationType] {
        match self {
            ProviderId::ModelsLabs => &[GenerationType::Image, GenerationType::Edit],
            ProviderId::Xai => &[GenerationType::Image, GenerationType::Edit, GenerationType::Video],
            ProviderId::Higgsfield => &[GenerationType::Video],
        }
    }

    pub fn supports(&self, kind: GenerationType) -> bool {
        self.supported_types().contains(&kind)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl GenerationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Failed)
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GenerationStatus::Pending => "pending",
            GenerationStatus::Processing => "processing",
            GenerationStatus::Completed => "completed",
            GenerationStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_ids_serialize_to_wire_names() {
        let json = serde_json::to_string(&ProviderId::ModelsLabs).unwrap();
        assert_eq!(json, "\"modelslabs\"");
        let parsed: ProviderId = serde_json::from_str("\"higgsfield\"").unwrap();
        assert_eq!(parsed, ProviderId::Higgsfield);
    }

    #[test]
    fn generation_type_parses_case_insensitively() {
        assert_eq!("Video".parse::<GenerationType>().unwrap(), GenerationType::Video);
        assert!("audio".parse::<GenerationType>().is_err());
    }

    #[test]
    fn higgsfield_only_serves_video() {
        assert!(ProviderId::Higgsfield.supports(GenerationType::Video));
        assert!(!ProviderId::Higgsfield.supports(GenerationType::Edit));
        assert!(!ProviderId::ModelsLabs.supports(GenerationType::Video));
    }
}
