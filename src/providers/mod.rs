//! Speech and language provider seams.
//!
//! Only the interfaces, configuration and the factory registry live here;
//! vendor adapters are registered by the host.

pub mod capabilities;
pub mod config;
pub mod kinds;
pub mod registry;

pub use capabilities::{
    Completion, LanguageModel, ProviderFuture, SpeechAudio, SpeechToText, TextToSpeech,
    Transcript, prompt_messages,
};
pub use config::{LlmConfig, SttConfig, TtsConfig};
pub use kinds::{Capability, ProviderKind};
pub use registry::ProviderRegistry;
