//! Start/end/error hooks wrapped around every registered handler.
//!
//! The wrapper observes outcomes and never changes them: an error goes in,
//! the same error comes out.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures_util::FutureExt;
use hark_protocol::{BusHandler, Data, Message, SKILL_ID_KEY, SettingsStore, SkillId};
use serde_json::json;
use tracing::{debug, error, warn};

use crate::context::SkillHandle;
use crate::dialog::{SKILL_ERROR_TEMPLATE, camel_case_split};
use crate::skill::EventHandler;

/// Await `fut`, turning a panic into an error.
pub async fn guarded<T, Fut>(fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Err(anyhow!("handler panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text
    } else {
        "unknown panic payload"
    }
}

#[derive(Clone)]
pub struct LifecycleHooks {
    skill_id: SkillId,
    skill_name: String,
    handle: SkillHandle,
    store: Arc<dyn SettingsStore>,
    handler_info: Option<String>,
}

impl LifecycleHooks {
    pub fn new(
        skill_name: impl Into<String>,
        handle: SkillHandle,
        store: Arc<dyn SettingsStore>,
        handler_info: Option<String>,
    ) -> Self {
        Self {
            skill_id: handle.skill_id().clone(),
            skill_name: skill_name.into(),
            handle,
            store,
            handler_info,
        }
    }

    /// Run `fut` for `handler_name`, triggered by `message`.
    pub async fn run<T, Fut>(&self, handler_name: &str, message: &Message, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let mut skill_data = Data::new();
        skill_data.insert("name".to_owned(), json!(handler_name));
        skill_data.insert(SKILL_ID_KEY.to_owned(), json!(self.skill_id));

        self.on_start(message, &skill_data).await;
        let outcome = guarded(fut).await;
        if let Err(err) = &outcome {
            let phrase = self.on_error(handler_name, err);
            skill_data.insert("exception".to_owned(), json!(format!("{err:#}")));
            debug!(%phrase, "error phrase rendered");
        }
        self.on_end(message, &skill_data).await;
        outcome
    }

    async fn on_start(&self, message: &Message, skill_data: &Data) {
        if let Some(info) = &self.handler_info {
            self.announce(message.forward(format!("{info}.start"), skill_data.clone()))
                .await;
        }
    }

    /// Log the fault and render the spoken error phrase. Nothing is played.
    fn on_error(&self, handler_name: &str, err: &anyhow::Error) -> String {
        let phrase = self.error_phrase();
        error!(
            skill_id = %self.skill_id,
            handler = handler_name,
            error = %format!("{err:#}"),
            "{phrase}"
        );
        phrase
    }

    async fn on_end(&self, message: &Message, skill_data: &Data) {
        if let Err(err) = self
            .handle
            .settings()
            .persist_if_dirty(self.store.as_ref())
            .await
        {
            warn!(skill_id = %self.skill_id, error = %err, "failed saving settings");
        }
        if let Some(info) = &self.handler_info {
            self.announce(message.forward(format!("{info}.complete"), skill_data.clone()))
                .await;
        }
    }

    async fn announce(&self, message: Message) {
        if let Err(err) = self.handle.emit(message).await {
            warn!(skill_id = %self.skill_id, error = %err, "failed announcing handler status");
        }
    }

    /// The `skill.error` phrase for this skill, e.g. "An error occurred
    /// while processing a request in Weather Skill".
    pub fn error_phrase(&self) -> String {
        let spoken_name = camel_case_split(&self.skill_name);
        let mut data = Data::new();
        data.insert("skill".to_owned(), json!(spoken_name));
        self.handle
            .builder()
            .dialogs()
            .render(SKILL_ERROR_TEMPLATE, &data)
            .unwrap_or_else(|err| {
                warn!(error = %err, "error template unavailable");
                format!("An error occurred in {spoken_name}")
            })
    }
}

/// Bus adapter running an [`EventHandler`] inside the lifecycle hooks.
pub struct LifecycleBusHandler {
    pub(crate) name: String,
    pub(crate) handler: Arc<dyn EventHandler>,
    pub(crate) hooks: Weak<LifecycleHooks>,
}

impl LifecycleBusHandler {
    pub fn new(
        name: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        hooks: &Arc<LifecycleHooks>,
    ) -> Self {
        Self {
            name: name.into(),
            handler,
            hooks: Arc::downgrade(hooks),
        }
    }
}

#[async_trait]
impl BusHandler for LifecycleBusHandler {
    async fn handle(&self, message: Message) {
        let Some(hooks) = self.hooks.upgrade() else {
            debug!(handler = %self.name, "skill unloaded; dropping event");
            return;
        };
        let handle = hooks.handle.clone();
        let _ = hooks
            .run(&self.name, &message, self.handler.handle(handle, message.clone()))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SessionTracker;
    use crate::dialog::TemplateDialogRenderer;
    use crate::session::SessionBuilder;
    use crate::settings::{JsonSettingsStore, SettingsState};
    use crate::skill::event_fn;
    use hark_bus::MessageBus;
    use hark_protocol::{ResourceCategory, ResourceResolver, SkillError, SkillResult};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    struct NoResources;

    impl ResourceResolver for NoResources {
        fn resolve(&self, _name: &str, _category: ResourceCategory) -> Option<String> {
            None
        }
    }

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    /// Fails the first `failures` saves, then records every save.
    #[derive(Default)]
    struct FlakyStore {
        failures: AtomicUsize,
        saved: parking_lot::Mutex<Vec<Data>>,
    }

    #[async_trait]
    impl SettingsStore for FlakyStore {
        async fn load(&self, _path: &Path) -> SkillResult<Data> {
            Ok(Data::new())
        }

        async fn save(&self, _path: &Path, settings: &Data) -> SkillResult<()> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(SkillError::Settings("disk full".into()));
            }
            self.saved.lock().push(settings.clone());
            Ok(())
        }
    }

    fn hooks(bus: &MessageBus, root: &Path, info: Option<&str>) -> LifecycleHooks {
        hooks_with_store(bus, root, info, Arc::new(JsonSettingsStore))
    }

    fn hooks_with_store(
        bus: &MessageBus,
        root: &Path,
        info: Option<&str>,
        store: Arc<dyn SettingsStore>,
    ) -> LifecycleHooks {
        let builder = SessionBuilder::new(
            SkillId::from_string("timer.mark2"),
            Arc::new(NoResources),
            Arc::new(TemplateDialogRenderer::with_builtin()),
        );
        let handle = SkillHandle::new(
            builder,
            Arc::new(bus.clone()),
            SessionTracker::new(),
            SettingsState::new(root.join("settings.json")),
        );
        LifecycleHooks::new("TimerSkill", handle, store, info.map(str::to_owned))
    }

    async fn drain(observer: &mut tokio::sync::broadcast::Receiver<Message>) -> Vec<Message> {
        let mut seen = Vec::new();
        while let Ok(Ok(message)) =
            tokio::time::timeout(Duration::from_millis(20), observer.recv()).await
        {
            seen.push(message);
        }
        seen
    }

    #[tokio::test]
    async fn announces_start_and_complete() -> Result<()> {
        let bus = MessageBus::default();
        let mut observer = bus.subscribe();
        let root = unique_test_root("hark-lifecycle-announce");
        let hooks = hooks(&bus, &root, Some("skill.handler"));

        let value = hooks
            .run("handle_set_timer", &Message::bare("timer.mark2:SetTimer"), async {
                Ok(7)
            })
            .await?;
        assert_eq!(value, 7);

        let seen = drain(&mut observer).await;
        let types: Vec<&str> = seen.iter().map(|m| m.msg_type.as_str()).collect();
        assert_eq!(types, vec!["skill.handler.start", "skill.handler.complete"]);
        assert_eq!(seen[1].data["name"], "handle_set_timer");
        assert!(seen[1].data.get("exception").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn errors_pass_through_and_are_reported() -> Result<()> {
        let bus = MessageBus::default();
        let mut observer = bus.subscribe();
        let root = unique_test_root("hark-lifecycle-error");
        let hooks = hooks(&bus, &root, Some("skill.handler"));

        let outcome: Result<()> = hooks
            .run("handle_cancel", &Message::bare("timer.mark2:Cancel"), async {
                Err(anyhow!("no timer running"))
            })
            .await;
        assert!(outcome.unwrap_err().to_string().contains("no timer running"));

        let seen = drain(&mut observer).await;
        let complete = seen
            .iter()
            .find(|m| m.msg_type == "skill.handler.complete")
            .expect("complete announced");
        assert!(
            complete.data["exception"]
                .as_str()
                .is_some_and(|e| e.contains("no timer running"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn panics_become_errors() -> Result<()> {
        let bus = MessageBus::default();
        let root = unique_test_root("hark-lifecycle-panic");
        let hooks = hooks(&bus, &root, None);

        let outcome: Result<()> = hooks
            .run("handle_boom", &Message::bare("timer.mark2:Boom"), async {
                panic!("boom")
            })
            .await;
        assert!(outcome.unwrap_err().to_string().contains("boom"));
        Ok(())
    }

    #[tokio::test]
    async fn dirty_settings_are_saved_on_end() -> Result<()> {
        let bus = MessageBus::default();
        let root = unique_test_root("hark-lifecycle-settings");
        let hooks = hooks(&bus, &root, None);
        let settings = hooks.handle.settings().clone();

        hooks
            .run("handle_units", &Message::bare("timer.mark2:Units"), async {
                settings.set("beep", json!(false));
                Ok(())
            })
            .await?;

        assert!(!hooks.handle.settings().is_dirty());
        let saved = std::fs::read_to_string(root.join("settings.json"))?;
        assert!(saved.contains("\"beep\": false"));

        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }

    #[tokio::test]
    async fn failed_settings_save_is_retried_on_next_run() -> Result<()> {
        let bus = MessageBus::default();
        let mut observer = bus.subscribe();
        let root = unique_test_root("hark-lifecycle-flaky-store");
        let store = Arc::new(FlakyStore {
            failures: AtomicUsize::new(1),
            ..FlakyStore::default()
        });
        let hooks = hooks_with_store(&bus, &root, Some("skill.handler"), store.clone());
        let settings = hooks.handle.settings().clone();

        let value = hooks
            .run("handle_volume", &Message::bare("timer.mark2:Volume"), async {
                settings.set("volume", json!(7));
                Ok(42)
            })
            .await?;
        assert_eq!(value, 42);
        assert!(hooks.handle.settings().is_dirty());
        assert!(store.saved.lock().is_empty());

        let seen = drain(&mut observer).await;
        let types: Vec<&str> = seen.iter().map(|m| m.msg_type.as_str()).collect();
        assert_eq!(types, vec!["skill.handler.start", "skill.handler.complete"]);
        assert!(seen[1].data.get("exception").is_none());

        hooks
            .run("handle_status", &Message::bare("timer.mark2:Status"), async {
                Ok(())
            })
            .await?;
        assert!(!hooks.handle.settings().is_dirty());
        let saved = store.saved.lock().clone();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0]["volume"], 7);
        Ok(())
    }

    #[test]
    fn error_phrase_uses_split_skill_name() {
        let bus = MessageBus::default();
        let hooks = hooks(&bus, &unique_test_root("hark-lifecycle-phrase"), None);
        assert_eq!(
            hooks.error_phrase(),
            "An error occurred while processing a request in Timer Skill"
        );
    }

    #[tokio::test]
    async fn bus_handler_runs_event_inside_hooks() -> Result<()> {
        let bus = MessageBus::default();
        let mut observer = bus.subscribe();
        let root = unique_test_root("hark-lifecycle-bus");
        let hooks = Arc::new(hooks(&bus, &root, Some("skill.handler")));

        let handler = LifecycleBusHandler::new(
            "timer.expired",
            event_fn(|handle: SkillHandle, _message| async move {
                handle.emit(Message::bare("timer.beep")).await?;
                Ok(())
            }),
            &hooks,
        );
        handler.handle(Message::bare("timer.expired")).await;

        let types: Vec<String> = drain(&mut observer)
            .await
            .into_iter()
            .map(|m| m.msg_type)
            .collect();
        assert_eq!(
            types,
            vec!["skill.handler.start", "timer.beep", "skill.handler.complete"]
        );
        Ok(())
    }
}
