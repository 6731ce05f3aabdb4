//! Per-session lifecycle state machine.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::session::cache::{CacheMirror, MirrorStatus};
use crate::session::core::config::SessionConfig;
use crate::session::core::context::SessionContext;
use crate::session::core::errors::{
    LifecycleState, SessionError, SessionResult, SessionWarning, SessionWarnings,
};
use crate::session::core::ids::{ConversationId, SessionId};
use crate::session::core::message::{Message, Role};
use crate::session::delivery::retry::{RetryPolicy, with_retry};
use crate::session::delivery::write_queue::DurableWriter;
use crate::session::engine::events::{EventOutcome, SessionEvent};
use crate::session::engine::summary::{DurabilityStatus, SessionSummary};
use crate::session::sink::DurableSink;
use crate::session::state::message_log::MessageLog;
use crate::session::state::participants::{
    JoinOutcome, LeaveOutcome, ParticipantRegistry, ParticipantSnapshot,
};

/// Drives one session from start to teardown.
///
/// Turns are appended in memory, mirrored to the cache when one is configured
/// and queued for background persistence. Only [`end`](Self::end) waits on
/// the durable sink. I/O failures become [`SessionWarning`]s or a
/// [`DurabilityStatus`]; the only error callers see is
/// [`SessionError::InvalidState`].
///
/// A controller is driven by one caller at a time.
pub struct SessionLifecycleController {
    config: SessionConfig,
    sink: Arc<dyn DurableSink>,
    writer: Arc<DurableWriter>,
    mirror: CacheMirror,
    end_policy: RetryPolicy,
    state: LifecycleState,
    context: Option<SessionContext>,
    log: MessageLog,
    participants: ParticipantRegistry,
    warnings: SessionWarnings,
}

impl SessionLifecycleController {
    /// Create an uninitialized controller.
    #[must_use]
    pub fn new(
        config: SessionConfig,
        sink: Arc<dyn DurableSink>,
        writer: Arc<DurableWriter>,
        mirror: CacheMirror,
    ) -> Self {
        let end_policy = RetryPolicy::end_of_session(&config);
        let log = MessageLog::new(config.capacity);
        Self {
            config,
            sink,
            writer,
            mirror,
            end_policy,
            state: LifecycleState::Uninitialized,
            context: None,
            log,
            participants: ParticipantRegistry::new(),
            warnings: SessionWarnings::new(),
        }
    }

    /// Replace the retry policy of the end-of-session write.
    #[must_use]
    pub fn with_end_policy(mut self, policy: RetryPolicy) -> Self {
        self.end_policy = policy;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Session identity and timing, once started.
    #[must_use]
    pub const fn context(&self) -> Option<&SessionContext> {
        self.context.as_ref()
    }

    /// Retained messages, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<Message> {
        self.log.snapshot()
    }

    /// Messages appended or hydrated so far, trimmed ones included.
    #[must_use]
    pub const fn total_appended(&self) -> u64 {
        self.log.total_appended()
    }

    /// Participant join/leave cycles so far.
    #[must_use]
    pub fn participants(&self) -> ParticipantSnapshot {
        self.participants.snapshot()
    }

    /// Degradations observed so far.
    #[must_use]
    pub const fn warnings(&self) -> &SessionWarnings {
        &self.warnings
    }

    /// Host context value stored under `key`, once started.
    #[must_use]
    pub fn user_context(&self, key: &str) -> Option<&serde_json::Value> {
        self.context.as_ref()?.user_context(key)
    }

    fn require_active(&self, operation: &'static str) -> SessionResult<&SessionContext> {
        match (&self.state, &self.context) {
            (LifecycleState::Active, Some(context)) => Ok(context),
            (state, _) => Err(SessionError::invalid_state(operation, *state)),
        }
    }

    /// Open the session.
    ///
    /// Generates a conversation id when none is given. With `hydrate`, the
    /// last `hydration_limit` messages are read from the sink within
    /// `hydration_timeout_ms`; a failure leaves the log empty and records a
    /// [`SessionWarning::Hydration`].
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidState`] unless the controller is
    /// uninitialized.
    pub async fn start(
        &mut self,
        session_id: SessionId,
        conversation_id: Option<ConversationId>,
        hydrate: bool,
    ) -> SessionResult<SessionContext> {
        if self.state != LifecycleState::Uninitialized {
            return Err(SessionError::invalid_state("start", self.state));
        }

        let conversation_id = conversation_id.unwrap_or_else(ConversationId::generate);
        let context = SessionContext::new(session_id, conversation_id, Utc::now());
        if hydrate {
            self.hydrate(context.conversation_id()).await;
        }

        info!(
            session_id = %context.session_id(),
            conversation_id = %context.conversation_id(),
            hydrated = self.log.total_appended(),
            "Session started"
        );
        self.context = Some(context.clone());
        self.state = LifecycleState::Active;
        Ok(context)
    }

    async fn hydrate(&mut self, conversation_id: &ConversationId) {
        if self.config.hydration_limit == 0 {
            return;
        }
        let read = self
            .sink
            .read_recent_messages(conversation_id, self.config.hydration_limit);

        let reason = match tokio::time::timeout(self.config.hydration_timeout(), read).await {
            Ok(Ok(history)) => {
                let accepted = self.log.hydrate(history);
                debug!(conversation_id = %conversation_id, accepted, "Hydrated history");
                return;
            }
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!(
                "timed out after {} ms",
                self.config.hydration_timeout_ms
            ),
        };

        warn!(
            conversation_id = %conversation_id,
            operation = "read_recent_messages",
            reason = %reason,
            "Hydration failed, starting with empty history"
        );
        self.note(SessionWarning::Hydration {
            conversation_id: conversation_id.clone(),
            reason,
        });
    }

    /// Append a turn and dispatch its persistence.
    ///
    /// The cache mirror write is bounded by `cache_op_timeout_ms`; the durable
    /// write is queued and never awaited.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidState`] unless the session is active.
    pub async fn record_turn(
        &mut self,
        role: Role,
        content: impl Into<String>,
    ) -> SessionResult<Message> {
        self.record_turn_with_metadata(role, content, None).await
    }

    /// Append a turn carrying host metadata; see [`record_turn`](Self::record_turn).
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidState`] unless the session is active.
    pub async fn record_turn_with_metadata(
        &mut self,
        role: Role,
        content: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) -> SessionResult<Message> {
        let conversation_id = self.require_active("record_turn")?.conversation_id().clone();
        let message = self.log.append_with_metadata(role, content, metadata);

        if let MirrorStatus::Failed(reason) = self.mirror.mirror_append(&conversation_id, &message).await {
            self.note(SessionWarning::MirrorWrite {
                conversation_id: conversation_id.clone(),
                sequence: message.sequence,
                reason,
            });
        }

        self.writer.enqueue(conversation_id, message.clone());
        Ok(message)
    }

    /// Store a host context value for the rest of the session.
    ///
    /// Returns the value previously stored under `key`. The context is copied
    /// into the [`SessionSummary`].
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidState`] unless the session is active.
    pub fn set_user_context(
        &mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> SessionResult<Option<serde_json::Value>> {
        self.require_active("set_user_context")?;
        match self.context.as_mut() {
            Some(context) => Ok(context.set_user_context(key, value)),
            None => Err(SessionError::invalid_state("set_user_context", self.state)),
        }
    }

    fn note(&mut self, warning: SessionWarning) {
        let kind = warning.kind();
        if !self.warnings.push(warning) {
            let suppressed = self.warnings.suppressed().get(kind).copied().unwrap_or_default();
            debug!(kind, suppressed, "Warning counted only");
        }
    }

    /// Record a participant join.
    ///
    /// A join for an identity that is already present changes nothing and
    /// records a [`SessionWarning::DuplicateJoin`].
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidState`] unless the session is active.
    pub fn participant_joined(
        &mut self,
        identity: &str,
        metadata: Option<serde_json::Value>,
    ) -> SessionResult<JoinOutcome> {
        let session_id = self.require_active("participant_joined")?.session_id().clone();
        let outcome = self.participants.join(identity, metadata);
        if outcome == JoinOutcome::AlreadyPresent {
            warn!(session_id = %session_id, identity, "Duplicate join ignored");
            self.note(SessionWarning::DuplicateJoin {
                identity: identity.to_string(),
            });
        }
        Ok(outcome)
    }

    /// Record a participant leave.
    ///
    /// A leave with no open entry changes nothing and records a
    /// [`SessionWarning::UnknownLeave`].
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidState`] unless the session is active.
    pub fn participant_left(&mut self, identity: &str) -> SessionResult<LeaveOutcome> {
        let session_id = self.require_active("participant_left")?.session_id().clone();
        let outcome = self.participants.leave(identity);
        if outcome == LeaveOutcome::NotPresent {
            warn!(session_id = %session_id, identity, "Leave without open entry ignored");
            self.note(SessionWarning::UnknownLeave {
                identity: identity.to_string(),
            });
        }
        Ok(outcome)
    }

    /// Close the session and persist its summary.
    ///
    /// The summary reflects the state at the moment of the call. Its write is
    /// awaited with the end-of-session retry policy; the controller is
    /// terminated whatever the outcome, which is reported in
    /// [`SessionSummary::status`].
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidState`] unless the session is active.
    pub async fn end(&mut self) -> SessionResult<SessionSummary> {
        self.require_active("end")?;
        self.state = LifecycleState::Ending;

        let Some(context) = self.context.as_mut() else {
            return Err(SessionError::invalid_state("end", LifecycleState::Ending));
        };
        context.mark_ended(Utc::now());
        let mut summary = SessionSummary::build(
            context,
            self.log.snapshot(),
            self.participants.snapshot(),
            self.log.total_appended(),
            self.warnings.clone(),
        );

        let sink = Arc::clone(&self.sink);
        let outcome = with_retry(&self.end_policy, "write_summary", || {
            sink.write_summary(&summary)
        })
        .await;

        summary.status = match outcome.result {
            Ok(()) => {
                info!(
                    session_id = %summary.session_id,
                    conversation_id = %summary.conversation_id,
                    messages = summary.messages.len(),
                    duration_ms = summary.duration_ms,
                    attempts = outcome.attempts,
                    "Session summary persisted"
                );
                DurabilityStatus::Persisted {
                    attempts: outcome.attempts,
                }
            }
            Err(err) => {
                warn!(
                    session_id = %summary.session_id,
                    conversation_id = %summary.conversation_id,
                    total_messages = summary.total_messages,
                    attempts = outcome.attempts,
                    error = %err,
                    "Session summary write failed"
                );
                DurabilityStatus::Failed {
                    attempts: outcome.attempts,
                    error: err.to_string(),
                }
            }
        };

        self.log.clear();
        self.state = LifecycleState::Terminated;
        Ok(summary)
    }

    /// Apply one event.
    ///
    /// # Errors
    /// Returns [`SessionError::UnknownSession`] if the event targets another
    /// session, otherwise the error of the underlying operation.
    pub async fn apply(&mut self, event: SessionEvent) -> SessionResult<EventOutcome> {
        if let Some(context) = &self.context
            && context.session_id() != event.session_id()
        {
            return Err(SessionError::UnknownSession(event.session_id().clone()));
        }

        match event {
            SessionEvent::Start {
                session_id,
                conversation_id,
                hydrate,
            } => {
                let context = self.start(session_id, conversation_id, hydrate).await?;
                let hydrated = self.log.size();
                Ok(EventOutcome::Started { context, hydrated })
            }
            SessionEvent::Turn {
                role,
                content,
                metadata,
                ..
            } => {
                let message = self
                    .record_turn_with_metadata(role, content, metadata)
                    .await?;
                Ok(EventOutcome::Recorded { message })
            }
            SessionEvent::SetContext { key, value, .. } => {
                let previous = self.set_user_context(key.clone(), value)?;
                Ok(EventOutcome::ContextSet { key, previous })
            }
            SessionEvent::ParticipantJoined {
                identity, metadata, ..
            } => {
                let result = self.participant_joined(&identity, metadata)?;
                Ok(EventOutcome::Joined { identity, result })
            }
            SessionEvent::ParticipantLeft { identity, .. } => {
                let result = self.participant_left(&identity)?;
                Ok(EventOutcome::Left { identity, result })
            }
            SessionEvent::End { .. } => {
                let summary = self.end().await?;
                Ok(EventOutcome::Ended {
                    summary: Box::new(summary),
                })
            }
        }
    }
}
