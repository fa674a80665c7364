//! Handles passed to skill code: the skill-wide [`SkillHandle`] and the
//! per-dispatch [`RequestContext`].

use std::sync::Arc;

use hark_protocol::{
    CompileError, Data, Message, ResourceCategory, SESSION_ID_KEY, SessionEnvelope, SessionId,
    SkillError, SkillId, SkillResult, Transport, topics,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::audio::AudioService;
use crate::compiler::ActionRequest;
use crate::session::SessionBuilder;
use crate::settings::SettingsState;

/// The one session this skill is currently handling.
///
/// Each dispatch replaces it, so a raw response is only accepted for the
/// latest request. An end envelope for the active session clears it.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    active: Arc<Mutex<Option<SessionId>>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `session_id` the active session, superseding any earlier one.
    pub fn activate(&self, session_id: &SessionId) {
        let previous = self.active.lock().replace(session_id.clone());
        if let Some(previous) = previous.filter(|p| p != session_id) {
            debug!(%previous, active = %session_id, "session superseded");
        }
    }

    /// Update from an envelope about to be emitted.
    pub fn observe(&self, envelope: &SessionEnvelope) {
        let id = envelope.session_id();
        let mut active = self.active.lock();
        if envelope.leaves_open() {
            *active = Some(id.clone());
        } else if envelope.is_end() && active.as_ref() == Some(id) {
            *active = None;
        }
    }

    pub fn active(&self) -> Option<SessionId> {
        self.active.lock().clone()
    }

    pub fn is_active(&self, session_id: &SessionId) -> bool {
        self.active.lock().as_ref() == Some(session_id)
    }
}

/// Skill-wide handle: envelope building, bus access, and settings.
#[derive(Clone)]
pub struct SkillHandle {
    builder: SessionBuilder,
    transport: Arc<dyn Transport>,
    sessions: SessionTracker,
    settings: SettingsState,
}

impl SkillHandle {
    pub fn new(
        builder: SessionBuilder,
        transport: Arc<dyn Transport>,
        sessions: SessionTracker,
        settings: SettingsState,
    ) -> Self {
        Self {
            builder,
            transport,
            sessions,
            settings,
        }
    }

    pub fn skill_id(&self) -> &SkillId {
        self.builder.skill_id()
    }

    pub fn builder(&self) -> &SessionBuilder {
        &self.builder
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn settings(&self) -> &SettingsState {
        &self.settings
    }

    pub fn audio(&self) -> AudioService {
        AudioService::new(self.transport.clone())
    }

    /// Scope a request context to `session_id`.
    pub fn context(&self, session_id: SessionId) -> RequestContext {
        RequestContext {
            session_id,
            handle: self.clone(),
        }
    }

    pub async fn emit(&self, message: Message) -> SkillResult<()> {
        self.transport.emit(message).await
    }

    /// Emit an envelope, recording whether it leaves its session open.
    #[instrument(
        skip(self, envelope),
        fields(
            skill_id = %self.skill_id(),
            session_id = %envelope.session_id(),
            topic = envelope.topic()
        )
    )]
    pub async fn emit_envelope(&self, envelope: SessionEnvelope) -> SkillResult<()> {
        self.sessions.observe(&envelope);
        self.transport.emit(envelope.to_message()?).await
    }

    pub fn start_session(
        &self,
        request: &ActionRequest,
        session_id: Option<SessionId>,
        continue_session: bool,
    ) -> Result<(SessionId, SessionEnvelope), CompileError> {
        self.builder
            .start_session(request, session_id, continue_session)
    }

    /// Build and emit a new session in one step, for proactive output.
    pub async fn emit_start_session(
        &self,
        request: &ActionRequest,
        continue_session: bool,
    ) -> SkillResult<SessionId> {
        let (session_id, envelope) = self.start_session(request, None, continue_session)?;
        self.emit_envelope(envelope).await?;
        Ok(session_id)
    }

    /// Play a sound URI outside of any action list.
    pub async fn play_sound_uri(
        &self,
        uri: &str,
        session_id: Option<&SessionId>,
    ) -> SkillResult<()> {
        let mut data = Data::new();
        data.insert("uri".to_owned(), json!(uri));
        if let Some(id) = session_id {
            data.insert(SESSION_ID_KEY.to_owned(), json!(id));
        }
        self.emit(Message::new(topics::PLAY_SOUND, data)).await
    }

    /// Play a sound resource by name. Fails when it cannot be resolved.
    pub async fn play_sound(&self, name: &str, session_id: Option<&SessionId>) -> SkillResult<()> {
        let uri = self
            .builder
            .resources()
            .resolve(name, ResourceCategory::Sound)
            .ok_or_else(|| {
                SkillError::Compile(CompileError::ResourceNotFound {
                    name: name.to_owned(),
                    category: ResourceCategory::Sound,
                })
            })?;
        self.play_sound_uri(&uri, session_id).await
    }

    /// Set values on a page that is already shown.
    pub async fn update_gui_values(
        &self,
        page: &str,
        data: Value,
        overwrite: bool,
    ) -> SkillResult<()> {
        let namespace = format!("{}.{}", self.skill_id(), page);
        debug!(%namespace, overwrite, "updating gui values");
        self.emit(Message::from_value(
            topics::GUI_VALUE_SET,
            json!({ "namespace": namespace, "data": data, "overwrite": overwrite }),
        ))
        .await
    }
}

/// Context of one in-flight dispatch.
///
/// Owns the session id of the request being handled, so concurrent
/// dispatches never see each other's session.
#[derive(Clone)]
pub struct RequestContext {
    session_id: SessionId,
    handle: SkillHandle,
}

impl RequestContext {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn skill_id(&self) -> &SkillId {
        self.handle.skill_id()
    }

    pub fn handle(&self) -> &SkillHandle {
        &self.handle
    }

    pub fn settings(&self) -> &SettingsState {
        self.handle.settings()
    }

    pub fn continue_session(
        &self,
        request: &ActionRequest,
        state: Option<Value>,
    ) -> Result<SessionEnvelope, CompileError> {
        self.handle
            .builder
            .continue_session(&self.session_id, request, state)
    }

    pub fn end_session(&self, request: &ActionRequest) -> Result<SessionEnvelope, CompileError> {
        self.handle.builder.end_session(&self.session_id, request)
    }

    pub fn abort_session(&self) -> SessionEnvelope {
        self.handle.builder.abort_session(&self.session_id)
    }

    pub async fn emit(&self, message: Message) -> SkillResult<()> {
        self.handle.emit(message).await
    }

    /// Emit an envelope immediately instead of returning it.
    pub async fn emit_envelope(&self, envelope: SessionEnvelope) -> SkillResult<()> {
        self.handle.emit_envelope(envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::TemplateDialogRenderer;
    use anyhow::Result;
    use hark_bus::MessageBus;
    use hark_protocol::{ResourceResolver, SessionContinue, SessionEnd, SessionStart};

    struct Sounds;

    impl ResourceResolver for Sounds {
        fn resolve(&self, name: &str, category: ResourceCategory) -> Option<String> {
            (name != "missing.wav").then(|| format!("file:///core/{}/{name}", category.dir_name()))
        }
    }

    fn handle(bus: &MessageBus) -> SkillHandle {
        let builder = SessionBuilder::new(
            SkillId::from_string("clock.mark2"),
            Arc::new(Sounds),
            Arc::new(TemplateDialogRenderer::new()),
        );
        SkillHandle::new(
            builder,
            Arc::new(bus.clone()),
            SessionTracker::new(),
            SettingsState::new(std::env::temp_dir().join("hark-context-unused.json")),
        )
    }

    fn owner() -> SkillId {
        SkillId::from_string("clock.mark2")
    }

    fn end(id: &SessionId) -> SessionEnvelope {
        SessionEnvelope::End(SessionEnd {
            session_id: id.clone(),
            owner_id: owner(),
            actions: Vec::new(),
            aborted: false,
        })
    }

    #[test]
    fn tracker_follows_envelope_kinds() {
        let tracker = SessionTracker::new();
        let id = SessionId::from_string("S1");

        tracker.observe(&SessionEnvelope::Start(SessionStart {
            session_id: id.clone(),
            owner_id: owner(),
            actions: Vec::new(),
            continue_session: false,
        }));
        assert!(!tracker.is_active(&id));

        tracker.observe(&SessionEnvelope::Continue(SessionContinue {
            session_id: id.clone(),
            owner_id: owner(),
            actions: Vec::new(),
            state: None,
        }));
        assert!(tracker.is_active(&id));

        tracker.observe(&end(&id));
        assert!(!tracker.is_active(&id));
        assert_eq!(tracker.active(), None);
    }

    #[test]
    fn newer_session_supersedes_older() {
        let tracker = SessionTracker::new();
        let old = SessionId::from_string("A");
        let new = SessionId::from_string("B");

        tracker.activate(&old);
        tracker.activate(&new);
        assert!(!tracker.is_active(&old));
        assert_eq!(tracker.active(), Some(new.clone()));

        // Ending a superseded session leaves the newer one alone.
        tracker.observe(&end(&old));
        assert!(tracker.is_active(&new));
    }

    #[test]
    fn context_defaults_to_its_own_session() {
        let bus = MessageBus::default();
        let ctx = handle(&bus).context(SessionId::from_string("R"));

        let cont = ctx
            .continue_session(&ActionRequest::new().speak("Which alarm?"), None)
            .unwrap();
        let end = ctx.end_session(&ActionRequest::new()).unwrap();
        assert_eq!(cont.session_id().as_str(), "R");
        assert_eq!(end.session_id().as_str(), "R");
    }

    #[tokio::test]
    async fn emit_start_session_opens_tracked_session() -> Result<()> {
        let bus = MessageBus::default();
        let mut observer = bus.subscribe();
        let handle = handle(&bus);

        let id = handle
            .emit_start_session(&ActionRequest::new().speak("Alarm!"), true)
            .await?;
        let message = observer.recv().await?;
        assert_eq!(message.msg_type, topics::SESSION_START);
        assert_eq!(message.session_id(), Some(id.clone()));
        assert!(handle.sessions().is_active(&id));
        Ok(())
    }

    #[tokio::test]
    async fn play_sound_carries_session() -> Result<()> {
        let bus = MessageBus::default();
        let mut observer = bus.subscribe();
        let handle = handle(&bus);
        let id = SessionId::from_string("S9");

        handle.play_sound("ding.wav", Some(&id)).await?;
        let message = observer.recv().await?;
        assert_eq!(message.msg_type, topics::PLAY_SOUND);
        assert_eq!(message.data["uri"], "file:///core/sounds/ding.wav");
        assert_eq!(message.data["session_id"], "S9");

        let err = handle.play_sound("missing.wav", None).await.unwrap_err();
        assert!(matches!(err, SkillError::Compile(_)));
        Ok(())
    }

    #[tokio::test]
    async fn gui_values_are_namespaced() -> Result<()> {
        let bus = MessageBus::default();
        let mut observer = bus.subscribe();
        handle(&bus)
            .update_gui_values("clock.qml", json!({ "time": "10:42" }), false)
            .await?;

        let message = observer.recv().await?;
        assert_eq!(message.msg_type, topics::GUI_VALUE_SET);
        assert_eq!(message.data["namespace"], "clock.mark2.clock.qml");
        assert_eq!(message.data["data"]["time"], "10:42");
        assert_eq!(message.data["overwrite"], false);
        Ok(())
    }
}
