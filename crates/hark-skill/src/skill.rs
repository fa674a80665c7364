//! The skill trait and handler adapters.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use hark_protocol::{Data, GuiClear, Message, SessionEnvelope};
use serde_json::Value;

use crate::compiler::ActionRequest;
use crate::context::{RequestContext, SkillHandle};
use crate::registry::SkillRegistrar;

/// A skill: a named bundle of intent, event, and API handlers.
///
/// Handlers are declared in [`Skill::register`] instead of being discovered.
/// The remaining hooks have defaults so a skill only overrides what it uses.
#[async_trait]
pub trait Skill: Send + Sync + 'static {
    /// Human-readable class name, e.g. `WeatherSkill`. Used in spoken errors.
    fn name(&self) -> &str;

    fn register(self: Arc<Self>, registrar: &mut SkillRegistrar) -> Result<()>;

    /// Stop whatever the skill is doing. The default ends the session and
    /// clears the display.
    async fn stop(&self, ctx: RequestContext) -> Result<Option<SessionEnvelope>> {
        let envelope = ctx.end_session(&ActionRequest::new().gui_clear(GuiClear::AtEnd))?;
        Ok(Some(envelope))
    }

    /// Free-text answer to a session left open with `expect_response`.
    async fn raw_utterance(
        &self,
        _ctx: RequestContext,
        _utterance: Option<String>,
        _state: Option<Value>,
    ) -> Result<Option<SessionEnvelope>> {
        Ok(None)
    }

    /// Whether the skill takes over the idle screen.
    async fn handle_gui_idle(&self) -> Result<bool> {
        Ok(false)
    }

    /// Called after remote settings were merged and saved.
    async fn on_settings_changed(&self, _handle: &SkillHandle) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Handles a matched intent. Returning `None` lets the dispatcher end the
/// session.
#[async_trait]
pub trait IntentHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: RequestContext,
        message: Message,
    ) -> Result<Option<SessionEnvelope>>;
}

/// Handles any other bus topic registered through the registrar.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, handle: SkillHandle, message: Message) -> Result<()>;
}

/// Arguments of a public API call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiCall {
    pub args: Vec<Value>,
    pub kwargs: Data,
}

impl ApiCall {
    pub fn from_message(message: &Message) -> Self {
        let args = message
            .data
            .get("args")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let kwargs = message
            .data
            .get("kwargs")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Self { args, kwargs }
    }
}

/// A method other skills may call over the bus.
#[async_trait]
pub trait ApiMethod: Send + Sync {
    async fn call(&self, call: ApiCall) -> Result<Value>;
}

pub struct FnIntent<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> IntentHandler for FnIntent<F, Fut>
where
    F: Fn(RequestContext, Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<SessionEnvelope>>> + Send + 'static,
{
    async fn handle(
        &self,
        ctx: RequestContext,
        message: Message,
    ) -> Result<Option<SessionEnvelope>> {
        (self.f)(ctx, message).await
    }
}

/// Adapt an async closure into an [`IntentHandler`].
pub fn intent_fn<F, Fut>(f: F) -> Arc<dyn IntentHandler>
where
    F: Fn(RequestContext, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<SessionEnvelope>>> + Send + 'static,
{
    Arc::new(FnIntent {
        f,
        _marker: PhantomData,
    })
}

pub struct FnEvent<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> EventHandler for FnEvent<F, Fut>
where
    F: Fn(SkillHandle, Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, handle: SkillHandle, message: Message) -> Result<()> {
        (self.f)(handle, message).await
    }
}

pub fn event_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(SkillHandle, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnEvent {
        f,
        _marker: PhantomData,
    })
}

pub struct FnApi<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> ApiMethod for FnApi<F, Fut>
where
    F: Fn(ApiCall) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn call(&self, call: ApiCall) -> Result<Value> {
        (self.f)(call).await
    }
}

pub fn api_fn<F, Fut>(f: F) -> Arc<dyn ApiMethod>
where
    F: Fn(ApiCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(FnApi {
        f,
        _marker: PhantomData,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_call_reads_args_and_kwargs() {
        let message = Message::from_value(
            "weather.mark2.forecast",
            json!({ "args": ["Berlin"], "kwargs": { "days": 3 } }),
        );
        let call = ApiCall::from_message(&message);
        assert_eq!(call.args, vec![json!("Berlin")]);
        assert_eq!(call.kwargs["days"], 3);
    }

    #[test]
    fn api_call_tolerates_missing_fields() {
        let call = ApiCall::from_message(&Message::bare("weather.mark2.forecast"));
        assert_eq!(call, ApiCall::default());
    }

    #[tokio::test]
    async fn api_fn_forwards_call() -> Result<()> {
        let method = api_fn(|call: ApiCall| async move { Ok(json!(call.args.len())) });
        let result = method
            .call(ApiCall {
                args: vec![json!(1), json!(2)],
                kwargs: Data::new(),
            })
            .await?;
        assert_eq!(result, json!(2));
        Ok(())
    }
}
