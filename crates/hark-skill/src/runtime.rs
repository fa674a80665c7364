//! Binds a [`Skill`] to a bus.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use hark_protocol::{
    BusHandler, Data, DialogRenderer, Message, ResourceResolver, SKILL_ID_KEY, SessionId,
    SettingsStore, SkillId, SkillResult, SubscriptionId, Transport, topics,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::config::SkillConfig;
use crate::context::{RequestContext, SessionTracker, SkillHandle};
use crate::dialog::TemplateDialogRenderer;
use crate::dispatch::{DispatchReport, Dispatcher};
use crate::lifecycle::{LifecycleBusHandler, LifecycleHooks, guarded};
use crate::registry::{IntentEntry, IntentRegistry, SkillRegistrar, intent_entry};
use crate::resources::FileResourceResolver;
use crate::session::SessionBuilder;
use crate::settings::{JsonSettingsStore, SettingsState};
use crate::skill::{ApiCall, ApiMethod, IntentHandler, Skill};

pub struct SkillRuntimeBuilder {
    skill_id: SkillId,
    config: SkillConfig,
    skill_root: Option<PathBuf>,
    resources: Option<Arc<dyn ResourceResolver>>,
    dialogs: Option<Arc<dyn DialogRenderer>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
}

impl SkillRuntimeBuilder {
    pub fn new(skill_id: impl Into<SkillId>) -> Self {
        Self {
            skill_id: skill_id.into(),
            config: SkillConfig::default(),
            skill_root: None,
            resources: None,
            dialogs: None,
            settings_store: None,
        }
    }

    pub fn config(mut self, config: SkillConfig) -> Self {
        self.config = config;
        self
    }

    /// Directory holding the skill's `ui/`, `dialog/`, `vocab/`, ... trees.
    pub fn skill_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.skill_root = Some(root.into());
        self
    }

    /// Replace filesystem lookup entirely.
    pub fn resources(mut self, resources: Arc<dyn ResourceResolver>) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn dialogs(mut self, dialogs: Arc<dyn DialogRenderer>) -> Self {
        self.dialogs = Some(dialogs);
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    fn build_resources(&self) -> Arc<dyn ResourceResolver> {
        if let Some(resources) = &self.resources {
            return resources.clone();
        }
        let root = self.skill_root.clone().unwrap_or_else(|| PathBuf::from("."));
        let mut resolver = FileResourceResolver::new(root, self.config.lang.clone());
        if let Some(core) = &self.config.resource_root {
            resolver = resolver.with_fallback(Arc::new(FileResourceResolver::new(
                core.clone(),
                self.config.lang.clone(),
            )));
        }
        Arc::new(resolver)
    }

    /// Load settings, collect the skill's registrations, and subscribe
    /// everything on `transport`.
    #[instrument(skip(self, skill, transport), fields(skill_id = %self.skill_id))]
    pub async fn bind<S: Skill>(
        self,
        skill: Arc<S>,
        transport: Arc<dyn Transport>,
    ) -> Result<SkillRuntime> {
        let resources = self.build_resources();
        let dialogs = self
            .dialogs
            .clone()
            .unwrap_or_else(|| Arc::new(TemplateDialogRenderer::with_builtin()));
        let store = self
            .settings_store
            .clone()
            .unwrap_or_else(|| Arc::new(JsonSettingsStore));

        let settings_path = self.config.settings_path(self.skill_id.as_str());
        let settings = SettingsState::load(&settings_path, store.as_ref())
            .await
            .with_context(|| {
                format!("failed loading settings from {}", settings_path.display())
            })?;

        let builder = SessionBuilder::new(self.skill_id.clone(), resources.clone(), dialogs);
        let handle = SkillHandle::new(builder, transport.clone(), SessionTracker::new(), settings);
        let hooks = Arc::new(LifecycleHooks::new(
            skill.name(),
            handle.clone(),
            store.clone(),
            self.config.handler_info.clone(),
        ));
        let dispatcher = Dispatcher::new(
            handle.clone(),
            hooks.clone(),
            self.config.sounds.acknowledge.clone(),
        );

        let mut registrar = SkillRegistrar::new(self.skill_id.clone());
        skill
            .clone()
            .register(&mut registrar)
            .with_context(|| format!("skill {} failed to register", self.skill_id))?;

        let mut intents = IntentRegistry::default();
        let mut intent_handlers = Vec::with_capacity(registrar.intents.len());
        for registration in registrar.intents.drain(..) {
            let entry = intent_entry(&self.skill_id, registration.descriptor, resources.as_ref())?;
            intent_handlers.push((entry.clone(), registration.handler));
            intents.insert(entry)?;
        }

        let skill: Arc<dyn Skill> = skill;
        let inner = Arc::new(RuntimeInner {
            skill_id: self.skill_id.clone(),
            skill,
            handle,
            dispatcher,
            hooks,
            store,
            intents: Mutex::new(intents),
            intent_handlers: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        });
        let runtime = SkillRuntime { inner };

        runtime.subscribe_system_handlers();
        for (entry, handler) in intent_handlers {
            runtime.subscribe_intent(entry, handler).await;
        }
        runtime.subscribe_apis(&registrar);
        for event in registrar.events {
            let handler =
                LifecycleBusHandler::new(event.topic.clone(), event.handler, &runtime.inner.hooks);
            runtime.track_subscription(&event.topic, Arc::new(handler), event.once);
        }

        info!(
            intents = runtime.inner.intents.lock().len(),
            apis = registrar.apis.len(),
            "skill bound"
        );
        Ok(runtime)
    }
}

struct RuntimeInner {
    skill_id: SkillId,
    skill: Arc<dyn Skill>,
    handle: SkillHandle,
    dispatcher: Dispatcher,
    hooks: Arc<LifecycleHooks>,
    store: Arc<dyn SettingsStore>,
    intents: Mutex<IntentRegistry>,
    intent_handlers: Mutex<Vec<(String, Arc<dyn IntentHandler>)>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl RuntimeInner {
    fn intent_handler(&self, name: &str) -> Option<Arc<dyn IntentHandler>> {
        self.intent_handlers
            .lock()
            .iter()
            .find(|(registered, _)| registered == name)
            .map(|(_, handler)| handler.clone())
    }
}

/// A skill bound to a bus.
#[derive(Clone)]
pub struct SkillRuntime {
    inner: Arc<RuntimeInner>,
}

#[derive(Debug, Clone, Copy)]
enum SystemHandler {
    Stop,
    Response,
    GuiIdle,
    SettingsChanged,
    EnableIntent,
    DisableIntent,
}

impl SystemHandler {
    const ALL: [Self; 6] = [
        Self::Stop,
        Self::Response,
        Self::GuiIdle,
        Self::SettingsChanged,
        Self::EnableIntent,
        Self::DisableIntent,
    ];

    fn topic(self) -> &'static str {
        match self {
            Self::Stop => topics::SKILL_STOP,
            Self::Response => topics::SKILL_RESPONSE,
            Self::GuiIdle => topics::GUI_IDLE,
            Self::SettingsChanged => topics::SETTINGS_CHANGED,
            Self::EnableIntent => topics::INTENT_ENABLE,
            Self::DisableIntent => topics::INTENT_DISABLE,
        }
    }
}

struct SystemBusHandler {
    kind: SystemHandler,
    runtime: Weak<RuntimeInner>,
}

#[async_trait]
impl BusHandler for SystemBusHandler {
    async fn handle(&self, message: Message) {
        let Some(inner) = self.runtime.upgrade() else {
            return;
        };
        let runtime = SkillRuntime { inner };
        match self.kind {
            SystemHandler::Stop => {
                runtime
                    .inner
                    .dispatcher
                    .dispatch_stop(runtime.inner.skill.as_ref(), message)
                    .await;
            }
            SystemHandler::Response => {
                runtime
                    .inner
                    .dispatcher
                    .dispatch_response(runtime.inner.skill.as_ref(), message)
                    .await;
            }
            SystemHandler::GuiIdle => runtime.handle_gui_idle(message).await,
            SystemHandler::SettingsChanged => runtime.handle_settings_changed(message).await,
            SystemHandler::EnableIntent | SystemHandler::DisableIntent => {
                let enabled = matches!(self.kind, SystemHandler::EnableIntent);
                let Some(name) = message.get_str("intent_name").map(str::to_owned) else {
                    warn!(topic = %message.msg_type, "intent toggle without intent_name");
                    return;
                };
                let hooks = runtime.inner.hooks.clone();
                let toggle = async {
                    runtime
                        .set_intent_enabled(&name, enabled)
                        .await
                        .map_err(anyhow::Error::from)
                };
                let _ = hooks.run(self.kind.topic(), &message, toggle).await;
            }
        }
    }
}

struct IntentBusHandler {
    name: String,
    runtime: Weak<RuntimeInner>,
}

#[async_trait]
impl BusHandler for IntentBusHandler {
    async fn handle(&self, message: Message) {
        let Some(inner) = self.runtime.upgrade() else {
            return;
        };
        let Some(handler) = inner.intent_handler(&self.name) else {
            warn!(intent = %self.name, "no handler for intent");
            return;
        };
        inner
            .dispatcher
            .dispatch_intent(&self.name, handler.as_ref(), message)
            .await;
    }
}

struct ApiBusHandler {
    name: String,
    method: Arc<dyn ApiMethod>,
    runtime: Weak<RuntimeInner>,
}

#[async_trait]
impl BusHandler for ApiBusHandler {
    async fn handle(&self, message: Message) {
        let Some(inner) = self.runtime.upgrade() else {
            return;
        };
        let call = ApiCall::from_message(&message);
        let outcome = inner
            .hooks
            .run(&self.name, &message, self.method.call(call))
            .await;
        if let Ok(result) = outcome {
            let mut data = Data::new();
            data.insert("result".to_owned(), result);
            if let Err(err) = inner.handle.emit(message.response(data)).await {
                warn!(api = %self.name, error = %err, "failed answering api call");
            }
        }
    }
}

struct PublicApiHandler {
    listing: Value,
    transport: Arc<dyn Transport>,
}

#[async_trait]
impl BusHandler for PublicApiHandler {
    async fn handle(&self, message: Message) {
        let data = match &self.listing {
            Value::Object(map) => map.clone(),
            _ => Data::new(),
        };
        if let Err(err) = self.transport.emit(message.response(data)).await {
            warn!(error = %err, "failed answering public api listing");
        }
    }
}

impl SkillRuntime {
    pub fn skill_id(&self) -> &SkillId {
        &self.inner.skill_id
    }

    pub fn handle(&self) -> &SkillHandle {
        &self.inner.handle
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Context for work outside a dispatch, e.g. a timer firing into an
    /// existing session.
    pub fn context(&self, session_id: SessionId) -> RequestContext {
        self.inner.handle.context(session_id)
    }

    pub fn intents(&self) -> Vec<IntentEntry> {
        self.inner.intents.lock().iter().cloned().collect()
    }

    fn transport(&self) -> &Arc<dyn Transport> {
        self.inner.handle.transport()
    }

    fn track_subscription(&self, topic: &str, handler: Arc<dyn BusHandler>, once: bool) {
        let id = if once {
            self.transport().once(topic, handler)
        } else {
            self.transport().on(topic, handler)
        };
        self.inner.subscriptions.lock().push(id);
    }

    fn subscribe_system_handlers(&self) {
        for kind in SystemHandler::ALL {
            let handler = SystemBusHandler {
                kind,
                runtime: Arc::downgrade(&self.inner),
            };
            self.track_subscription(kind.topic(), Arc::new(handler), false);
        }
    }

    async fn subscribe_intent(&self, entry: IntentEntry, handler: Arc<dyn IntentHandler>) {
        let name = entry.descriptor.name().to_owned();
        self.inner
            .intent_handlers
            .lock()
            .push((name.clone(), handler));
        let bus_handler = IntentBusHandler {
            name,
            runtime: Arc::downgrade(&self.inner),
        };
        self.track_subscription(&entry.topic, Arc::new(bus_handler), false);
        if let Err(err) = self.transport().emit(entry.register_message()).await {
            warn!(intent = %entry.topic, error = %err, "failed announcing intent");
        }
    }

    fn subscribe_apis(&self, registrar: &SkillRegistrar) {
        if registrar.apis.is_empty() {
            return;
        }
        for (name, api) in &registrar.apis {
            let topic = registrar.api_topic(name);
            debug!(%topic, "exposing api method");
            let handler = ApiBusHandler {
                name: name.clone(),
                method: api.method.clone(),
                runtime: Arc::downgrade(&self.inner),
            };
            self.track_subscription(&topic, Arc::new(handler), false);
        }
        let listing = PublicApiHandler {
            listing: registrar.public_api(),
            transport: self.transport().clone(),
        };
        self.track_subscription(&registrar.api_topic("public_api"), Arc::new(listing), false);
    }

    /// Dispatch a request to a registered intent directly, bypassing the bus
    /// subscription.
    pub async fn dispatch_intent(&self, name: &str, message: Message) -> Result<DispatchReport> {
        let Some(handler) = self.inner.intent_handler(name) else {
            bail!("skill {} has no intent {name}", self.skill_id());
        };
        Ok(self
            .inner
            .dispatcher
            .dispatch_intent(name, handler.as_ref(), message)
            .await)
    }

    pub async fn enable_intent(&self, name: &str) -> SkillResult<bool> {
        self.set_intent_enabled(name, true).await
    }

    pub async fn disable_intent(&self, name: &str) -> SkillResult<bool> {
        self.set_intent_enabled(name, false).await
    }

    /// Announce or detach an intent. `false` for an unknown name; the bus
    /// handler stays subscribed either way.
    #[instrument(skip(self), fields(skill_id = %self.inner.skill_id))]
    async fn set_intent_enabled(&self, name: &str, enabled: bool) -> SkillResult<bool> {
        let announcement = {
            let mut intents = self.inner.intents.lock();
            match intents.set_enabled(name, enabled) {
                None => {
                    warn!("unknown intent");
                    return Ok(false);
                }
                Some(false) => None,
                Some(true) => intents.get(name).map(|entry| {
                    if enabled {
                        entry.register_message()
                    } else {
                        entry.detach_message()
                    }
                }),
            }
        };
        if let Some(message) = announcement {
            self.transport().emit(message).await?;
        }
        debug!("intent toggled");
        Ok(true)
    }

    async fn handle_gui_idle(&self, message: Message) {
        if message.get_str(SKILL_ID_KEY) != Some(self.skill_id().as_str()) {
            return;
        }
        let handled = match guarded(self.inner.skill.handle_gui_idle()).await {
            Ok(handled) => handled,
            Err(err) => {
                warn!(skill_id = %self.skill_id(), error = %err, "gui idle hook failed");
                false
            }
        };
        let mut data = Data::new();
        data.insert("handled".to_owned(), json!(handled));
        if let Err(err) = self.transport().emit(message.response(data)).await {
            warn!(skill_id = %self.skill_id(), error = %err, "failed answering gui idle");
        }
    }

    async fn handle_settings_changed(&self, message: Message) {
        let Some(Value::Object(remote)) = message.data.get(self.skill_id().as_str()).cloned() else {
            return;
        };
        info!(skill_id = %self.skill_id(), "updating settings from remote");
        let settings = self.inner.handle.settings();
        settings.update(remote);
        if let Err(err) = settings.save(self.inner.store.as_ref()).await {
            warn!(skill_id = %self.skill_id(), error = %err, "failed saving remote settings");
        }
        if let Err(err) = guarded(self.inner.skill.on_settings_changed(&self.inner.handle)).await {
            warn!(skill_id = %self.skill_id(), error = %err, "settings change callback failed");
        }
    }

    /// Unload the skill: shutdown hook, settings, subscriptions, detach
    /// announcement, then one final stop whose envelope is discarded.
    #[instrument(skip(self), fields(skill_id = %self.inner.skill_id))]
    pub async fn shutdown(&self) -> Result<()> {
        if let Err(err) = guarded(self.inner.skill.shutdown()).await {
            warn!(error = %err, "skill shutdown hook failed");
        }
        if let Err(err) = self
            .inner
            .handle
            .settings()
            .persist_if_dirty(self.inner.store.as_ref())
            .await
        {
            warn!(error = %err, "failed saving settings on shutdown");
        }

        let subscriptions: Vec<SubscriptionId> =
            self.inner.subscriptions.lock().drain(..).collect();
        for id in subscriptions {
            self.transport().remove_subscription(id);
        }
        self.inner.intent_handlers.lock().clear();

        let detach = Message::from_value(
            topics::SKILL_DETACH,
            json!({ "skill_id": format!("{}:", self.skill_id()) }),
        );
        self.transport()
            .emit(detach)
            .await
            .context("failed announcing skill detach")?;

        let ctx = self.context(SessionId::new_uuid());
        if let Err(err) = guarded(self.inner.skill.stop(ctx)).await {
            warn!(error = %err, "stop during shutdown failed");
        }
        info!("skill unloaded");
        Ok(())
    }
}
