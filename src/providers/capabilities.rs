//! Capability interfaces every provider adapter implements.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::providers::kinds::ProviderKind;
use crate::session::core::errors::SessionResult;
use crate::session::core::message::{Message, Role};

/// Boxed future type for provider calls.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A transcription result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Recognized text.
    pub text: String,
    /// Confidence in `0..=1`.
    pub confidence: f32,
    /// Whether the text will not be revised.
    pub is_final: bool,
    /// Detected language, if reported.
    pub language: Option<String>,
}

/// A language model reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Reply text.
    pub content: String,
    /// Vendor stop reason.
    pub finish_reason: Option<String>,
    /// Tokens billed, if reported.
    pub tokens_used: Option<u32>,
}

/// Synthesized audio.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpeechAudio {
    /// Encoded audio bytes.
    pub audio: Vec<u8>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Duration, if known.
    pub duration_ms: Option<u64>,
}

/// Converts audio to text.
pub trait SpeechToText: Send + Sync {
    /// Vendor of this adapter.
    fn kind(&self) -> ProviderKind;

    /// Transcribe one buffered utterance.
    ///
    /// # Errors
    /// Returns an error if the vendor call fails.
    fn transcribe<'a>(&'a self, audio: &'a [u8]) -> ProviderFuture<'a, SessionResult<Transcript>>;

    /// Language tags the adapter accepts.
    fn supported_languages(&self) -> Vec<String> {
        vec!["en-US".to_string()]
    }
}

/// Produces a reply from conversation history.
pub trait LanguageModel: Send + Sync {
    /// Vendor of this adapter.
    fn kind(&self) -> ProviderKind;

    /// Complete the conversation; `history` is ordered oldest first.
    ///
    /// # Errors
    /// Returns an error if the vendor call fails.
    fn complete<'a>(&'a self, history: &'a [Message]) -> ProviderFuture<'a, SessionResult<Completion>>;
}

/// Converts text to audio.
pub trait TextToSpeech: Send + Sync {
    /// Vendor of this adapter.
    fn kind(&self) -> ProviderKind;

    /// Synthesize `text`.
    ///
    /// # Errors
    /// Returns an error if the vendor call fails.
    fn synthesize<'a>(&'a self, text: &'a str) -> ProviderFuture<'a, SessionResult<SpeechAudio>>;
}

/// Prompt messages for a language model: the system prompt, if any, then
/// the last `max_history` messages of `history`.
#[must_use]
pub fn prompt_messages(
    system_prompt: Option<&str>,
    history: &[Message],
    max_history: usize,
) -> Vec<Message> {
    let skip = history.len().saturating_sub(max_history);
    let recent = &history[skip..];
    let mut prompt = Vec::with_capacity(recent.len() + 1);
    if let Some(instructions) = system_prompt {
        let timestamp = recent.first().map_or_else(chrono::Utc::now, |first| first.timestamp);
        prompt.push(Message::new(Role::System, instructions, timestamp, 0));
    }
    prompt.extend_from_slice(recent);
    prompt
}
