//! # hark-protocol — skill session protocol
//!
//! Shared types and collaborator ports for the skill runtime. Dependency-light
//! (no tokio) so it can be used as a pure contract crate by bus consumers.
//!
//! ## Module Overview
//!
//! - [`ids`] — SessionId, SkillId
//! - [`message`] — bus `Message` and well-known topics
//! - [`action`] — `Action`, `GuiClear`, `MessageSend`
//! - [`envelope`] — session start/continue/end envelopes
//! - [`ports`] — transport, resource, dialog, and settings ports
//! - [`error`] — CompileError, BusError, SkillError

pub mod action;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod message;
pub mod ports;

pub use action::{Action, GuiClear, MessageSend};
pub use envelope::{EnvelopeKind, SessionContinue, SessionEnd, SessionEnvelope, SessionStart};
pub use error::{BusError, CompileError, SkillError, SkillResult};
pub use ids::{SessionId, SkillId};
pub use message::{Data, Message, SESSION_ID_KEY, SKILL_ID_KEY, topics};
pub use ports::{
    BusHandler, DialogRenderer, ResourceCategory, ResourceResolver, SettingsStore,
    SubscriptionId, Transport,
};
