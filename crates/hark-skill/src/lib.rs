//! # hark-skill — skill session core
//!
//! Turns declarative handler output into ordered presentation actions,
//! wraps them in session envelopes, and guarantees every dispatched request
//! ends with exactly one terminal envelope.
//!
//! ## Module Overview
//!
//! - [`compiler`] — `ActionRequest` → ordered `Action` list
//! - [`session`] — start/continue/end/abort envelope builder
//! - [`dispatch`] — request dispatch wrapper with fallback envelopes
//! - [`lifecycle`] — start/end/error hooks around every handler
//! - [`runtime`] — binds a [`Skill`] to a bus
//! - [`registry`], [`skill`] — explicit handler registration
//! - [`context`], [`settings`], [`resources`], [`dialog`], [`audio`], [`config`]

pub mod audio;
pub mod compiler;
pub mod config;
pub mod context;
pub mod dialog;
pub mod dispatch;
pub mod lifecycle;
pub mod registry;
pub mod resources;
pub mod runtime;
pub mod session;
pub mod settings;
pub mod skill;

pub use audio::{AudioService, Track};
pub use compiler::{
    ActionRequest, AttachedMessage, CompileScope, DialogItem, GuiItem, compile_actions,
    resolve_gui_clear,
};
pub use config::{SkillConfig, SoundConfig};
pub use context::{RequestContext, SessionTracker, SkillHandle};
pub use dialog::{SKILL_ERROR_TEMPLATE, TemplateDialogRenderer, camel_case_split};
pub use dispatch::{DispatchReport, DispatchState, Dispatcher, fallback_envelope, settle};
pub use lifecycle::{LifecycleHooks, guarded};
pub use registry::{IntentDescriptor, IntentEntry, IntentRegistry, SkillRegistrar};
pub use resources::FileResourceResolver;
pub use runtime::{SkillRuntime, SkillRuntimeBuilder};
pub use session::SessionBuilder;
pub use settings::{JsonSettingsStore, SettingsState};
pub use skill::{
    ApiCall, ApiMethod, EventHandler, IntentHandler, Skill, api_fn, event_fn, intent_fn,
};
