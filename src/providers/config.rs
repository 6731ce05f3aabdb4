//! Provider configuration.

use serde::{Deserialize, Serialize};

use crate::providers::kinds::ProviderKind;
use crate::session::core::errors::{SessionError, SessionResult};

/// Speech-to-text settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Vendor.
    pub provider: ProviderKind,
    /// BCP-47 language tag.
    pub language: String,
    /// Vendor model name.
    pub model: Option<String>,
    /// Input sample rate in Hz.
    pub sample_rate: u32,
    /// Emit partial transcripts.
    pub interim_results: bool,
    /// Mask profanity.
    pub profanity_filter: bool,
    /// Extra phrases to bias recognition.
    pub custom_vocabulary: Vec<String>,
    /// Vendor-specific options.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            language: "en-US".to_string(),
            model: None,
            sample_rate: 16_000,
            interim_results: true,
            profanity_filter: false,
            custom_vocabulary: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// Language model settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Vendor.
    pub provider: ProviderKind,
    /// Vendor model name.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Response token cap.
    pub max_tokens: u32,
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// Frequency penalty.
    pub frequency_penalty: f32,
    /// Presence penalty.
    pub presence_penalty: f32,
    /// Instruction prepended to every request.
    pub system_prompt: Option<String>,
    /// Stream tokens as they are produced.
    pub streaming: bool,
    /// Vendor-specific options.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 150,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            system_prompt: None,
            streaming: true,
            metadata: serde_json::Map::new(),
        }
    }
}

impl LlmConfig {
    /// Check sampling parameters.
    ///
    /// # Errors
    /// Returns an error if a value is out of range.
    pub fn validate(&self) -> SessionResult<()> {
        if self.model.trim().is_empty() {
            return Err(SessionError::InvalidConfig("llm.model must be set".to_string()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(SessionError::InvalidConfig(
                "llm.temperature must be within 0..=2".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(SessionError::InvalidConfig(
                "llm.top_p must be within 0..=1".to_string(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(SessionError::InvalidConfig(
                "llm.max_tokens must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Text-to-speech settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Vendor.
    pub provider: ProviderKind,
    /// Voice name.
    pub voice: String,
    /// Vendor model name.
    pub model: Option<String>,
    /// Playback speed multiplier.
    pub speed: f32,
    /// Pitch multiplier.
    pub pitch: f32,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Output encoding, e.g. `pcm`.
    pub audio_encoding: String,
    /// Vendor-specific options.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            voice: "alloy".to_string(),
            model: None,
            speed: 1.0,
            pitch: 1.0,
            sample_rate: 24_000,
            audio_encoding: "pcm".to_string(),
            metadata: serde_json::Map::new(),
        }
    }
}

impl TtsConfig {
    /// Check playback parameters.
    ///
    /// # Errors
    /// Returns an error if a value is out of range.
    pub fn validate(&self) -> SessionResult<()> {
        if self.speed <= 0.0 || self.pitch <= 0.0 {
            return Err(SessionError::InvalidConfig(
                "tts.speed and tts.pitch must be > 0".to_string(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(SessionError::InvalidConfig(
                "tts.sample_rate must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
