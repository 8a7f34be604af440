//! Provider feature switches.
//!
//! These map high-level choices onto the request fields GLM endpoints read.

use serde::{Deserialize, Serialize};

/// Whether the model should emit its reasoning before answering.
///
/// GLM models accept `"thinking": {"type": "enabled" | "disabled"}`. With
/// [`ThinkingMode::Default`] the field is omitted and the model decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ThinkingMode {
    #[default]
    Default,
    Enabled,
    Disabled,
}

impl ThinkingMode {
    /// Value of the wire `thinking.type` field, if one is sent.
    #[must_use]
    pub const fn wire_type(&self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::Enabled => Some("enabled"),
            Self::Disabled => Some("disabled"),
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled)
    }
}

impl From<bool> for ThinkingMode {
    fn from(enabled: bool) -> Self {
        if enabled { Self::Enabled } else { Self::Disabled }
    }
}

/// Ready-made system prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum SystemPrompt {
    /// General helper for programming questions.
    FriendlyAssistant,
    /// Writes code with comments and documentation.
    CodingAssistant,
    /// Looks for bugs, performance problems and improvements.
    CodeReviewer,
    /// Explains things so a beginner can follow.
    Teacher,
    /// Only answers with JSON.
    JsonOnly,
}

impl SystemPrompt {
    #[must_use]
    pub const fn text(&self) -> &'static str {
        match self {
            Self::FriendlyAssistant => "You are a friendly AI coding assistant.",
            Self::CodingAssistant => {
                "You are an expert coding assistant. Always include comments and documentation when you write code."
            }
            Self::CodeReviewer => {
                "You are a code reviewer. Find potential bugs, performance problems and possible improvements in the code."
            }
            Self::Teacher => {
                "You are a kind teacher. Explain things simply enough for a beginner to understand."
            }
            Self::JsonOnly => "You are an AI assistant that responds only in JSON format.",
        }
    }

    /// Looks a preset up by its snake_case name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "friendly_assistant" => Some(Self::FriendlyAssistant),
            "coding_assistant" => Some(Self::CodingAssistant),
            "code_reviewer" => Some(Self::CodeReviewer),
            "teacher" => Some(Self::Teacher),
            "json_only" => Some(Self::JsonOnly),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thinking_wire_type() {
        assert_eq!(ThinkingMode::Default.wire_type(), None);
        assert_eq!(ThinkingMode::Enabled.wire_type(), Some("enabled"));
        assert_eq!(ThinkingMode::Disabled.wire_type(), Some("disabled"));
    }

    #[test]
    fn test_thinking_from_bool() {
        assert!(ThinkingMode::from(true).is_enabled());
        assert_eq!(ThinkingMode::from(false), ThinkingMode::Disabled);
        assert!(!ThinkingMode::Default.is_enabled());
    }

    #[test]
    fn test_system_prompt_lookup() {
        assert_eq!(
            SystemPrompt::from_name("code_reviewer"),
            Some(SystemPrompt::CodeReviewer)
        );
        assert_eq!(SystemPrompt::from_name("pirate"), None);
        assert!(SystemPrompt::Teacher.text().contains("beginner"));
    }
}
