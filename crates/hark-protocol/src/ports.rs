//! Collaborator ports consumed by the skill runtime.
//!
//! These traits are the only boundary between the session core and the
//! outside world: bus transport, resource lookup, dialog rendering, and
//! settings persistence.
//!
//! Object-safety note:
//! - Async traits use `async-trait` for dyn-dispatch.
//! - Resource lookup and dialog rendering are synchronous because action
//!   compilation never suspends.

use crate::error::{CompileError, SkillResult};
use crate::message::{Data, Message};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCategory {
    Ui,
    Dialog,
    Vocab,
    Regex,
    Sound,
}

impl ResourceCategory {
    /// Directory name used for the category on disk.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Ui => "ui",
            Self::Dialog => "dialog",
            Self::Vocab => "vocab",
            Self::Regex => "regex",
            Self::Sound => "sounds",
        }
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Turns a resource name into a displayable/playable URI.
pub trait ResourceResolver: Send + Sync {
    fn resolve(&self, name: &str, category: ResourceCategory) -> Option<String>;
}

/// Renders a dialog template id into an utterance.
pub trait DialogRenderer: Send + Sync {
    fn render(&self, template_id: &str, data: &Data) -> Result<String, CompileError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load(&self, path: &Path) -> SkillResult<Data>;
    async fn save(&self, path: &Path, settings: &Data) -> SkillResult<()>;
}

/// Handle returned by [`Transport::on`], used to remove one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// A callback registered against a bus topic.
///
/// Bus handlers are infallible at the transport boundary; faults are
/// contained by the wrappers that produce them.
#[async_trait]
pub trait BusHandler: Send + Sync {
    async fn handle(&self, message: Message);
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn emit(&self, message: Message) -> SkillResult<()>;

    fn on(&self, topic: &str, handler: Arc<dyn BusHandler>) -> SubscriptionId;

    /// Like [`Transport::on`], removed after the first delivery.
    fn once(&self, topic: &str, handler: Arc<dyn BusHandler>) -> SubscriptionId;

    /// Remove every subscription on `topic`. Returns whether any existed.
    fn remove(&self, topic: &str) -> bool;

    fn remove_subscription(&self, id: SubscriptionId) -> bool;

    /// Emit `message` and wait for the first message of `reply_type`
    /// (default `<type>.response`). `None` on timeout.
    async fn wait_for_response(
        &self,
        message: Message,
        reply_type: Option<&str>,
        timeout: Duration,
    ) -> SkillResult<Option<Message>>;
}
