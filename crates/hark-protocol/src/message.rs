//! Bus messages and the well-known topics exchanged by skills.

use crate::ids::SessionId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON object payload carried by every message.
pub type Data = Map<String, Value>;

/// Data key carrying the session id on every session-scoped message.
pub const SESSION_ID_KEY: &str = "session_id";
/// Data key carrying the owning skill id.
pub const SKILL_ID_KEY: &str = "skill_id";

/// Well-known bus topics.
pub mod topics {
    pub const SESSION_START: &str = "session.start";
    pub const SESSION_CONTINUE: &str = "session.continue";
    pub const SESSION_END: &str = "session.end";

    pub const SKILL_STOP: &str = "skill.stop";
    pub const SKILL_RESPONSE: &str = "skill.response";
    pub const SKILL_DETACH: &str = "skill.detach";
    pub const SETTINGS_CHANGED: &str = "skill.settings.changed";
    pub const INTENT_ENABLE: &str = "skill.intent.enable";
    pub const INTENT_DISABLE: &str = "skill.intent.disable";

    pub const INTENT_REGISTER: &str = "intent.register";
    pub const INTENT_DETACH: &str = "intent.detach";

    pub const GUI_IDLE: &str = "gui.handle-idle";
    pub const GUI_VALUE_SET: &str = "gui.value.set";

    pub const PLAY_SOUND: &str = "audio.play-sound";
    pub const SYSTEM_STOP: &str = "system.stop";
}

/// A message on the skill bus.
///
/// `context` carries routing metadata (`source`, `destination`) that
/// replies swap and forwards preserve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub data: Data,
    #[serde(default)]
    pub context: Data,
}

impl Message {
    pub fn new(msg_type: impl Into<String>, data: Data) -> Self {
        Self {
            msg_type: msg_type.into(),
            data,
            context: Data::new(),
        }
    }

    /// Message with an empty payload.
    pub fn bare(msg_type: impl Into<String>) -> Self {
        Self::new(msg_type, Data::new())
    }

    /// Build from a `serde_json::json!` object; non-objects become an empty
    /// payload.
    pub fn from_value(msg_type: impl Into<String>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Data::new(),
        };
        Self::new(msg_type, data)
    }

    pub fn with_context(mut self, context: Data) -> Self {
        self.context = context;
        self
    }

    /// New message of another type keeping this message's context.
    pub fn forward(&self, msg_type: impl Into<String>, data: Data) -> Self {
        Self {
            msg_type: msg_type.into(),
            data,
            context: self.context.clone(),
        }
    }

    /// New message addressed back to the sender: `source` and
    /// `destination` are swapped.
    pub fn reply(&self, msg_type: impl Into<String>, data: Data) -> Self {
        let mut context = self.context.clone();
        let source = context.remove("source");
        let destination = context.remove("destination");
        if let Some(destination) = destination {
            context.insert("source".to_owned(), destination);
        }
        if let Some(source) = source {
            context.insert("destination".to_owned(), source);
        }
        Self {
            msg_type: msg_type.into(),
            data,
            context,
        }
    }

    /// Reply on `<type>.response`.
    pub fn response(&self, data: Data) -> Self {
        self.reply(format!("{}.response", self.msg_type), data)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// The session id carried in `data`, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        self.get_str(SESSION_ID_KEY).map(SessionId::from_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn routed() -> Message {
        let mut context = Data::new();
        context.insert("source".into(), json!("audio"));
        context.insert("destination".into(), json!("skills"));
        Message::from_value("skill.ping", json!({ "session_id": "S1" })).with_context(context)
    }

    #[test]
    fn response_swaps_source_and_destination() {
        let reply = routed().response(Data::new());
        assert_eq!(reply.msg_type, "skill.ping.response");
        assert_eq!(reply.context["source"], json!("skills"));
        assert_eq!(reply.context["destination"], json!("audio"));
    }

    #[test]
    fn forward_keeps_context() {
        let forwarded = routed().forward("skill.handler.start", Data::new());
        assert_eq!(forwarded.context, routed().context);
    }

    #[test]
    fn session_id_is_read_from_data() {
        assert_eq!(routed().session_id(), Some(SessionId::from_string("S1")));
        assert_eq!(Message::bare("x").session_id(), None);
    }

    #[test]
    fn wire_form_uses_type_key() {
        let json = serde_json::to_value(Message::bare("session.end")).unwrap();
        assert_eq!(json["type"], "session.end");
    }
}
