//! Explicit provider factory registry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::providers::capabilities::{LanguageModel, SpeechToText, TextToSpeech};
use crate::providers::config::{LlmConfig, SttConfig, TtsConfig};
use crate::providers::kinds::{Capability, ProviderKind};
use crate::session::core::errors::{SessionError, SessionResult};

/// Builds a speech-to-text adapter.
pub type SttFactory = Box<dyn Fn(&SttConfig) -> SessionResult<Arc<dyn SpeechToText>> + Send + Sync>;
/// Builds a language model adapter.
pub type LlmFactory = Box<dyn Fn(&LlmConfig) -> SessionResult<Arc<dyn LanguageModel>> + Send + Sync>;
/// Builds a text-to-speech adapter.
pub type TtsFactory = Box<dyn Fn(&TtsConfig) -> SessionResult<Arc<dyn TextToSpeech>> + Send + Sync>;

/// Maps `(capability, vendor)` to adapter factories.
///
/// Built once by the host and passed by reference; nothing is registered
/// implicitly.
#[derive(Default)]
pub struct ProviderRegistry {
    stt: HashMap<ProviderKind, SttFactory>,
    llm: HashMap<ProviderKind, LlmFactory>,
    tts: HashMap<ProviderKind, TtsFactory>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a speech-to-text factory, replacing any previous one for `kind`.
    pub fn register_stt<F>(&mut self, kind: ProviderKind, factory: F) -> &mut Self
    where
        F: Fn(&SttConfig) -> SessionResult<Arc<dyn SpeechToText>> + Send + Sync + 'static,
    {
        debug!(provider = %kind, capability = "stt", "Registered provider");
        self.stt.insert(kind, Box::new(factory));
        self
    }

    /// Register a language model factory, replacing any previous one for `kind`.
    pub fn register_llm<F>(&mut self, kind: ProviderKind, factory: F) -> &mut Self
    where
        F: Fn(&LlmConfig) -> SessionResult<Arc<dyn LanguageModel>> + Send + Sync + 'static,
    {
        debug!(provider = %kind, capability = "llm", "Registered provider");
        self.llm.insert(kind, Box::new(factory));
        self
    }

    /// Register a text-to-speech factory, replacing any previous one for `kind`.
    pub fn register_tts<F>(&mut self, kind: ProviderKind, factory: F) -> &mut Self
    where
        F: Fn(&TtsConfig) -> SessionResult<Arc<dyn TextToSpeech>> + Send + Sync + 'static,
    {
        debug!(provider = %kind, capability = "tts", "Registered provider");
        self.tts.insert(kind, Box::new(factory));
        self
    }

    /// Build the speech-to-text adapter named by `config.provider`.
    ///
    /// # Errors
    /// Returns [`SessionError::ProviderNotRegistered`] or the factory's error.
    pub fn create_stt(&self, config: &SttConfig) -> SessionResult<Arc<dyn SpeechToText>> {
        let factory = self
            .stt
            .get(&config.provider)
            .ok_or_else(|| not_registered(Capability::Stt, config.provider))?;
        factory(config)
    }

    /// Build the language model adapter named by `config.provider`.
    ///
    /// # Errors
    /// Returns [`SessionError::ProviderNotRegistered`], an invalid config
    /// error, or the factory's error.
    pub fn create_llm(&self, config: &LlmConfig) -> SessionResult<Arc<dyn LanguageModel>> {
        config.validate()?;
        let factory = self
            .llm
            .get(&config.provider)
            .ok_or_else(|| not_registered(Capability::Llm, config.provider))?;
        factory(config)
    }

    /// Build the text-to-speech adapter named by `config.provider`.
    ///
    /// # Errors
    /// Returns [`SessionError::ProviderNotRegistered`], an invalid config
    /// error, or the factory's error.
    pub fn create_tts(&self, config: &TtsConfig) -> SessionResult<Arc<dyn TextToSpeech>> {
        config.validate()?;
        let factory = self
            .tts
            .get(&config.provider)
            .ok_or_else(|| not_registered(Capability::Tts, config.provider))?;
        factory(config)
    }

    /// Vendors registered for `capability`, sorted.
    #[must_use]
    pub fn kinds(&self, capability: Capability) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = match capability {
            Capability::Stt => self.stt.keys().copied().collect(),
            Capability::Llm => self.llm.keys().copied().collect(),
            Capability::Tts => self.tts.keys().copied().collect(),
        };
        kinds.sort();
        kinds
    }
}

fn not_registered(capability: Capability, kind: ProviderKind) -> SessionError {
    SessionError::ProviderNotRegistered {
        capability: capability.as_str(),
        kind: kind.to_string(),
    }
}
