//! Provider vendor tags and capabilities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Vendor behind a provider adapter.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// `OpenAI`.
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    /// Azure Cognitive Services / Azure `OpenAI`.
    Azure,
    /// AWS (Transcribe, Bedrock, Polly).
    Aws,
    /// Google Cloud.
    Google,
    /// Anthropic.
    Anthropic,
    /// Deepgram.
    Deepgram,
    /// `ElevenLabs`.
    #[serde(rename = "elevenlabs")]
    ElevenLabs,
    /// Self-hosted HTTP endpoint.
    CustomHttp,
    /// Self-hosted WebSocket endpoint.
    CustomWs,
}

impl ProviderKind {
    /// Every known kind.
    pub const ALL: [Self; 9] = [
        Self::OpenAi,
        Self::Azure,
        Self::Aws,
        Self::Google,
        Self::Anthropic,
        Self::Deepgram,
        Self::ElevenLabs,
        Self::CustomHttp,
        Self::CustomWs,
    ];

    /// Stable tag used in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Azure => "azure",
            Self::Aws => "aws",
            Self::Google => "google",
            Self::Anthropic => "anthropic",
            Self::Deepgram => "deepgram",
            Self::ElevenLabs => "elevenlabs",
            Self::CustomHttp => "custom_http",
            Self::CustomWs => "custom_ws",
        }
    }

    /// Parse a tag, falling back to [`ProviderKind::OpenAi`] for unknown values.
    #[must_use]
    pub fn parse_or_default(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            warn!(provider = value, "Unknown provider, falling back to openai");
            Self::default()
        })
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| value.to_string())
    }
}

/// What a provider adapter can do.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Speech to text.
    Stt,
    /// Text generation.
    Llm,
    /// Text to speech.
    Tts,
}

impl Capability {
    /// Short name used in errors and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stt => "stt",
            Self::Llm => "llm",
            Self::Tts => "tts",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_kinds() {
        assert_eq!("deepgram".parse::<ProviderKind>().unwrap(), ProviderKind::Deepgram);
        assert_eq!(" ElevenLabs ".parse::<ProviderKind>().unwrap(), ProviderKind::ElevenLabs);
        for kind in ProviderKind::ALL {
            assert_eq!(kind.as_str().parse::<ProviderKind>().unwrap(), kind);
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.as_str());
        }
    }

    #[test]
    fn test_unknown_kind_falls_back_to_openai() {
        assert!("watson".parse::<ProviderKind>().is_err());
        assert_eq!(ProviderKind::parse_or_default("watson"), ProviderKind::OpenAi);
    }
}
