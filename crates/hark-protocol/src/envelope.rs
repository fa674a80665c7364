//! Session envelopes: the outbound start, continue, and end directives.

use crate::action::Action;
use crate::error::{BusError, SkillError};
use crate::ids::{SessionId, SkillId};
use crate::message::{Message, topics};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opens a session. Proactive skills use this to speak without a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStart {
    pub session_id: SessionId,
    #[serde(rename = "skill_id")]
    pub owner_id: SkillId,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub continue_session: bool,
}

/// Keeps a session open. `state` is echoed back on the next inbound
/// response for this session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContinue {
    pub session_id: SessionId,
    #[serde(rename = "skill_id")]
    pub owner_id: SkillId,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub state: Option<Value>,
}

/// Closes a session. `aborted` marks a forced termination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEnd {
    pub session_id: SessionId,
    #[serde(rename = "skill_id")]
    pub owner_id: SkillId,
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub aborted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Start,
    Continue,
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnvelope {
    Start(SessionStart),
    Continue(SessionContinue),
    End(SessionEnd),
}

impl SessionEnvelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Start(_) => EnvelopeKind::Start,
            Self::Continue(_) => EnvelopeKind::Continue,
            Self::End(_) => EnvelopeKind::End,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Start(start) => &start.session_id,
            Self::Continue(cont) => &cont.session_id,
            Self::End(end) => &end.session_id,
        }
    }

    pub fn owner_id(&self) -> &SkillId {
        match self {
            Self::Start(start) => &start.owner_id,
            Self::Continue(cont) => &cont.owner_id,
            Self::End(end) => &end.owner_id,
        }
    }

    pub fn actions(&self) -> &[Action] {
        match self {
            Self::Start(start) => &start.actions,
            Self::Continue(cont) => &cont.actions,
            Self::End(end) => &end.actions,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Self::End(_))
    }

    /// Whether the session stays open after this envelope is played.
    pub fn leaves_open(&self) -> bool {
        match self {
            Self::Start(start) => start.continue_session,
            Self::Continue(_) => true,
            Self::End(_) => false,
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            Self::Start(_) => topics::SESSION_START,
            Self::Continue(_) => topics::SESSION_CONTINUE,
            Self::End(_) => topics::SESSION_END,
        }
    }

    /// Bus form of the envelope. The payload is the serde form of the
    /// inner struct, so both directions share one field layout.
    pub fn to_message(&self) -> Result<Message, SkillError> {
        let data = match self {
            Self::Start(start) => serde_json::to_value(start),
            Self::Continue(cont) => serde_json::to_value(cont),
            Self::End(end) => serde_json::to_value(end),
        }
        .map_err(|e| SkillError::Bus(BusError::Serialization(e.to_string())))?;
        Ok(Message::from_value(self.topic(), data))
    }

    /// Parse an envelope back out of a bus message.
    pub fn from_message(message: &Message) -> Result<Self, SkillError> {
        let data = Value::Object(message.data.clone());
        let parsed = match message.msg_type.as_str() {
            topics::SESSION_START => serde_json::from_value(data).map(Self::Start),
            topics::SESSION_CONTINUE => serde_json::from_value(data).map(Self::Continue),
            topics::SESSION_END => serde_json::from_value(data).map(Self::End),
            other => {
                return Err(SkillError::InvalidMessage(format!(
                    "not a session envelope: {other}"
                )));
            }
        };
        parsed.map_err(|e| SkillError::InvalidMessage(e.to_string()))
    }
}

impl TryFrom<SessionEnvelope> for Message {
    type Error = SkillError;

    fn try_from(envelope: SessionEnvelope) -> Result<Self, Self::Error> {
        envelope.to_message()
    }
}
