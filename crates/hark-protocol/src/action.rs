//! Presentation actions and the policies that place them.

use crate::message::Data;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One atomic instruction to a presentation engine.
///
/// Order within a compiled list is load-bearing: downstream engines run
/// actions strictly in sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Message {
        message_type: String,
        data: Data,
        /// Seconds to wait before sending. Only set for end-placed messages.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delay: Option<f64>,
    },
    ClearDisplay,
    AudioAlert {
        uri: String,
        wait: bool,
    },
    ShowPage {
        page: String,
        #[serde(default)]
        data: Option<Value>,
        namespace: String,
    },
    Speak {
        utterance: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dialog: Option<String>,
        wait: bool,
    },
    StreamMusic {
        uri: String,
    },
    GetResponse,
    WaitForIdle,
}

impl Action {
    pub fn is_clear_display(&self) -> bool {
        matches!(self, Self::ClearDisplay)
    }

    pub fn is_wait_for_idle(&self) -> bool {
        matches!(self, Self::WaitForIdle)
    }
}

/// When the display is cleared relative to the rest of the actions.
///
/// `Auto` is a placeholder: it is always resolved to one of the concrete
/// timings before a list is finalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuiClear {
    #[default]
    Auto,
    OnIdle,
    Never,
    AtStart,
    AtEnd,
}

/// Where an attached outbound message is spliced into the action list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSend {
    #[default]
    AtStart,
    AtEnd,
}
