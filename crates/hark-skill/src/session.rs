//! Session envelope builder.

use std::sync::Arc;

use hark_protocol::{
    Action, CompileError, DialogRenderer, GuiClear, ResourceResolver, SessionContinue, SessionEnd,
    SessionEnvelope, SessionId, SessionStart, SkillId,
};
use serde_json::Value;
use tracing::debug;

use crate::compiler::{ActionRequest, CompileScope, bare_actions, compile_actions};

/// Builds start/continue/end envelopes for one skill.
///
/// Every envelope carries exactly one session id and the owning skill id;
/// the result can be emitted as-is.
#[derive(Clone)]
pub struct SessionBuilder {
    skill_id: SkillId,
    resources: Arc<dyn ResourceResolver>,
    dialogs: Arc<dyn DialogRenderer>,
}

impl SessionBuilder {
    pub fn new(
        skill_id: SkillId,
        resources: Arc<dyn ResourceResolver>,
        dialogs: Arc<dyn DialogRenderer>,
    ) -> Self {
        Self {
            skill_id,
            resources,
            dialogs,
        }
    }

    pub fn skill_id(&self) -> &SkillId {
        &self.skill_id
    }

    pub fn resources(&self) -> &Arc<dyn ResourceResolver> {
        &self.resources
    }

    pub fn dialogs(&self) -> &Arc<dyn DialogRenderer> {
        &self.dialogs
    }

    pub fn compile(
        &self,
        session_id: &SessionId,
        request: &ActionRequest,
    ) -> Result<Vec<Action>, CompileError> {
        let scope = CompileScope {
            skill_id: &self.skill_id,
            session_id,
            resources: self.resources.as_ref(),
            dialogs: self.dialogs.as_ref(),
        };
        compile_actions(request, &scope)
    }

    /// Open a session. A fresh id is allocated unless one is supplied; the
    /// id is returned so later continue/end calls can correlate.
    pub fn start_session(
        &self,
        request: &ActionRequest,
        session_id: Option<SessionId>,
        continue_session: bool,
    ) -> Result<(SessionId, SessionEnvelope), CompileError> {
        let session_id = session_id.unwrap_or_else(SessionId::new_uuid);
        let actions = self.compile(&session_id, request)?;
        debug!(
            skill_id = %self.skill_id,
            session_id = %session_id,
            actions = actions.len(),
            continue_session,
            "session start built"
        );
        let envelope = SessionEnvelope::Start(SessionStart {
            session_id: session_id.clone(),
            owner_id: self.skill_id.clone(),
            actions,
            continue_session,
        });
        Ok((session_id, envelope))
    }

    pub fn continue_session(
        &self,
        session_id: &SessionId,
        request: &ActionRequest,
        state: Option<Value>,
    ) -> Result<SessionEnvelope, CompileError> {
        let actions = self.compile(session_id, request)?;
        debug!(
            skill_id = %self.skill_id,
            session_id = %session_id,
            actions = actions.len(),
            "session continue built"
        );
        Ok(SessionEnvelope::Continue(SessionContinue {
            session_id: session_id.clone(),
            owner_id: self.skill_id.clone(),
            actions,
            state,
        }))
    }

    /// Close a session. `expect_response` is ignored: nobody is left to
    /// answer.
    pub fn end_session(
        &self,
        session_id: &SessionId,
        request: &ActionRequest,
    ) -> Result<SessionEnvelope, CompileError> {
        let request = if request.expect_response {
            ActionRequest {
                expect_response: false,
                ..request.clone()
            }
        } else {
            request.clone()
        };
        let actions = self.compile(session_id, &request)?;
        debug!(
            skill_id = %self.skill_id,
            session_id = %session_id,
            actions = actions.len(),
            "session end built"
        );
        Ok(end_envelope(&self.skill_id, session_id, actions, false))
    }

    /// Forced termination with no content.
    pub fn abort_session(&self, session_id: &SessionId) -> SessionEnvelope {
        end_envelope(
            &self.skill_id,
            session_id,
            bare_actions(GuiClear::Auto),
            true,
        )
    }
}

pub(crate) fn end_envelope(
    skill_id: &SkillId,
    session_id: &SessionId,
    actions: Vec<Action>,
    aborted: bool,
) -> SessionEnvelope {
    SessionEnvelope::End(SessionEnd {
        session_id: session_id.clone(),
        owner_id: skill_id.clone(),
        actions,
        aborted,
    })
}
