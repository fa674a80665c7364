//! Request dispatch wrapper.
//!
//! Every request that enters dispatch leaves with exactly one terminal
//! envelope: the handler's own, or an empty end-session when the handler
//! returned nothing, failed, or panicked.
//!
//! ```text
//! Idle -> Dispatching -> Completed | Failed -> Idle
//! ```

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use hark_protocol::{
    GuiClear, Message, ResourceCategory, SKILL_ID_KEY, SessionEnvelope, SessionId, SkillId,
};
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use crate::compiler::bare_actions;
use crate::context::SkillHandle;
use crate::lifecycle::{LifecycleHooks, guarded};
use crate::session::end_envelope;
use crate::skill::{IntentHandler, Skill};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Dispatching,
    Completed,
    Failed,
}

impl DispatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Outcome of one dispatch. `envelope` is what was sent to the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub handler: String,
    pub session_id: SessionId,
    pub state: DispatchState,
    pub envelope: SessionEnvelope,
    /// Whether `envelope` was synthesized instead of returned by the handler.
    pub fallback: bool,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// The contentless end-session sent when a handler produced nothing usable.
pub fn fallback_envelope(
    skill_id: &SkillId,
    session_id: &SessionId,
    gui_clear: GuiClear,
) -> SessionEnvelope {
    end_envelope(skill_id, session_id, bare_actions(gui_clear), false)
}

/// Classify a handler outcome and pick the envelope to send.
pub fn settle(
    handler: &str,
    skill_id: &SkillId,
    session_id: &SessionId,
    outcome: Result<Option<SessionEnvelope>>,
    fallback_clear: GuiClear,
    started_at: DateTime<Utc>,
) -> DispatchReport {
    let (state, envelope, fallback, error) = match outcome {
        Ok(Some(envelope)) => (DispatchState::Completed, envelope, false, None),
        Ok(None) => (
            DispatchState::Completed,
            fallback_envelope(skill_id, session_id, fallback_clear),
            true,
            None,
        ),
        Err(err) => (
            DispatchState::Failed,
            fallback_envelope(skill_id, session_id, fallback_clear),
            true,
            Some(format!("{err:#}")),
        ),
    };
    DispatchReport {
        handler: handler.to_owned(),
        session_id: session_id.clone(),
        state,
        envelope,
        fallback,
        error,
        started_at,
        finished_at: Utc::now(),
    }
}

/// Strip the skill's alphanumeric id from data keys the intent parser
/// prefixed with it.
pub fn unmunge_message(mut message: Message, skill_id: &SkillId) -> Message {
    let prefix = skill_id.alphanumeric();
    message.data = message
        .data
        .into_iter()
        .map(|(key, value)| match key.strip_prefix(prefix.as_str()) {
            Some(rest) if !rest.is_empty() => (rest.to_owned(), value),
            _ => (key, value),
        })
        .collect();
    message
}

#[derive(Clone)]
pub struct Dispatcher {
    handle: SkillHandle,
    hooks: Arc<LifecycleHooks>,
    acknowledge: Option<String>,
}

impl Dispatcher {
    pub fn new(
        handle: SkillHandle,
        hooks: Arc<LifecycleHooks>,
        acknowledge: Option<String>,
    ) -> Self {
        Self {
            handle,
            hooks,
            acknowledge,
        }
    }

    pub fn handle(&self) -> &SkillHandle {
        &self.handle
    }

    pub fn hooks(&self) -> &Arc<LifecycleHooks> {
        &self.hooks
    }

    fn skill_id(&self) -> &SkillId {
        self.handle.skill_id()
    }

    /// Session of an inbound request. A request without one gets a fresh id
    /// so the terminal envelope is still addressable.
    fn request_session(&self, message: &Message) -> SessionId {
        message.session_id().unwrap_or_else(|| {
            let session_id = SessionId::new_uuid();
            warn!(
                skill_id = %self.skill_id(),
                topic = %message.msg_type,
                %session_id,
                "request carried no session id; allocated one"
            );
            session_id
        })
    }

    /// Play the configured acknowledgment sound. Never fails the request.
    pub async fn acknowledge(&self, session_id: &SessionId) {
        let Some(sound) = &self.acknowledge else {
            return;
        };
        let resources = self.handle.builder().resources();
        let Some(uri) = resources.resolve(sound, ResourceCategory::Sound) else {
            warn!(skill_id = %self.skill_id(), sound = %sound, "acknowledge sound not found");
            return;
        };
        if let Err(err) = self.handle.play_sound_uri(&uri, Some(session_id)).await {
            warn!(skill_id = %self.skill_id(), error = %err, "failed playing acknowledge sound");
        }
    }

    #[instrument(skip(self, handler, message), fields(skill_id = %self.skill_id()))]
    pub async fn dispatch_intent(
        &self,
        intent_name: &str,
        handler: &dyn IntentHandler,
        message: Message,
    ) -> DispatchReport {
        let started_at = Utc::now();
        let session_id = self.request_session(&message);
        self.handle.sessions().activate(&session_id);
        debug!(%session_id, state = ?DispatchState::Dispatching, "handling intent");

        self.acknowledge(&session_id).await;
        let message = unmunge_message(message, self.skill_id());
        let ctx = self.handle.context(session_id.clone());
        let outcome = self
            .hooks
            .run(intent_name, &message, handler.handle(ctx, message.clone()))
            .await;

        let report = settle(
            intent_name,
            self.skill_id(),
            &session_id,
            outcome,
            GuiClear::Auto,
            started_at,
        );
        self.finish(report).await
    }

    /// Handle `skill.stop`. `None` when the request targets another skill.
    #[instrument(skip(self, skill, message), fields(skill_id = %self.skill_id()))]
    pub async fn dispatch_stop(
        &self,
        skill: &dyn Skill,
        message: Message,
    ) -> Option<DispatchReport> {
        if message.get_str(SKILL_ID_KEY) != Some(self.skill_id().as_str()) {
            return None;
        }
        let started_at = Utc::now();
        let session_id = self.request_session(&message);
        self.handle.sessions().activate(&session_id);
        debug!(%session_id, state = ?DispatchState::Dispatching, "handling stop");

        let ctx = self.handle.context(session_id.clone());
        let outcome = self.hooks.run("stop", &message, skill.stop(ctx)).await;
        let report = settle(
            "stop",
            self.skill_id(),
            &session_id,
            outcome,
            GuiClear::AtEnd,
            started_at,
        );
        Some(self.finish(report).await)
    }

    /// Handle `skill.response`: a free-text answer for the session this
    /// skill is currently handling. Answers for another skill, or for a
    /// superseded or finished session, are not for us and yield `None`.
    #[instrument(skip(self, skill, message), fields(skill_id = %self.skill_id()))]
    pub async fn dispatch_response(
        &self,
        skill: &dyn Skill,
        message: Message,
    ) -> Option<DispatchReport> {
        if message.get_str(SKILL_ID_KEY) != Some(self.skill_id().as_str()) {
            return None;
        }
        let session_id = message.session_id()?;
        if !self.handle.sessions().is_active(&session_id) {
            debug!(%session_id, "response for a session we are not waiting on");
            return None;
        }
        let started_at = Utc::now();
        debug!(%session_id, state = ?DispatchState::Dispatching, "handling raw response");

        let utterance = message
            .data
            .get("utterances")
            .and_then(Value::as_array)
            .and_then(|utterances| utterances.first())
            .and_then(Value::as_str)
            .map(str::to_owned);
        let state = message.data.get("state").filter(|s| !s.is_null()).cloned();

        self.acknowledge(&session_id).await;
        let ctx = self.handle.context(session_id.clone());
        let outcome = guarded(skill.raw_utterance(ctx, utterance, state)).await;
        let report = settle(
            "raw_utterance",
            self.skill_id(),
            &session_id,
            outcome,
            GuiClear::Auto,
            started_at,
        );
        Some(self.finish(report).await)
    }

    async fn finish(&self, report: DispatchReport) -> DispatchReport {
        match (&report.state, &report.error) {
            (DispatchState::Failed, Some(err)) => error!(
                handler = %report.handler,
                session_id = %report.session_id,
                error = %err,
                "handler failed; ending session"
            ),
            _ if report.fallback => debug!(
                handler = %report.handler,
                session_id = %report.session_id,
                "handler returned no envelope; ending session"
            ),
            _ => {}
        }

        if let Err(err) = self.handle.emit_envelope(report.envelope.clone()).await {
            warn!(
                handler = %report.handler,
                session_id = %report.session_id,
                error = %err,
                "failed emitting terminal envelope"
            );
        }
        debug!(
            state = ?report.state,
            topic = report.envelope.topic(),
            next = ?DispatchState::Idle,
            "dispatch finished"
        );
        report
    }
}
