//! Skills bundled with the daemon.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use hark_protocol::{Message, SessionEnvelope, topics};
use hark_skill::{ActionRequest, RequestContext, Skill, SkillRegistrar, api_fn, intent_fn};
use serde_json::{Value, json};

pub const STOP_SKILL_ID: &str = "stop.mark2";
pub const GREETER_SKILL_ID: &str = "greeter.mark2";

/// Handles the global "stop" and "never mind" intents.
pub struct StopSkill;

#[async_trait]
impl Skill for StopSkill {
    fn name(&self) -> &str {
        "StopSkill"
    }

    fn register(self: Arc<Self>, registrar: &mut SkillRegistrar) -> Result<()> {
        registrar.register_intent(
            "Stop",
            intent_fn(|ctx: RequestContext, _message| async move {
                ctx.emit(Message::bare(topics::SYSTEM_STOP)).await?;
                Ok(Some(ctx.end_session(&ActionRequest::new())?))
            }),
        )?;
        registrar.register_intent(
            "Nevermind",
            intent_fn(|ctx: RequestContext, _message| async move {
                Ok(Some(ctx.end_session(&ActionRequest::new())?))
            }),
        )?;
        Ok(())
    }
}

/// Asks for the user's name and greets them back.
pub struct GreeterSkill;

#[async_trait]
impl Skill for GreeterSkill {
    fn name(&self) -> &str {
        "GreeterSkill"
    }

    fn register(self: Arc<Self>, registrar: &mut SkillRegistrar) -> Result<()> {
        registrar.register_intent(
            "Hello",
            intent_fn(|ctx: RequestContext, _message| async move {
                let request = ActionRequest::new()
                    .speak("Hello! What is your name?")
                    .expect_response(true);
                Ok(Some(ctx.continue_session(&request, None)?))
            }),
        )?;
        registrar.expose_api(
            "greeting",
            "Greeting for the given name",
            api_fn(|call| async move {
                let name = call
                    .args
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or("friend")
                    .to_owned();
                Ok(json!(greeting(&name)))
            }),
        )?;
        Ok(())
    }

    async fn raw_utterance(
        &self,
        ctx: RequestContext,
        utterance: Option<String>,
        _state: Option<Value>,
    ) -> Result<Option<SessionEnvelope>> {
        let Some(name) = utterance.filter(|u| !u.trim().is_empty()) else {
            return Ok(None);
        };
        let request = ActionRequest::new().speak(greeting(name.trim()));
        Ok(Some(ctx.end_session(&request)?))
    }
}

fn greeting(name: &str) -> String {
    format!("Nice to meet you, {name}.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use hark_bus::MessageBus;
    use hark_protocol::{Action, EnvelopeKind, Transport};
    use hark_skill::{SkillConfig, SkillRuntime, SkillRuntimeBuilder};
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use tokio::sync::broadcast::Receiver;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    async fn bind<S: Skill>(
        skill_id: &str,
        skill: S,
        bus: &MessageBus,
        root: &std::path::Path,
    ) -> Result<SkillRuntime> {
        let config = SkillConfig {
            settings_root: root.join("settings"),
            ..SkillConfig::default()
        };
        SkillRuntimeBuilder::new(skill_id)
            .config(config)
            .skill_root(root)
            .bind(Arc::new(skill), Arc::new(bus.clone()))
            .await
    }

    async fn next_envelope(observer: &mut Receiver<Message>) -> Result<SessionEnvelope> {
        let wait = async {
            loop {
                let message = observer.recv().await?;
                if message.msg_type.starts_with("session.") {
                    return Ok::<_, anyhow::Error>(SessionEnvelope::from_message(&message)?);
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(2), wait).await?
    }

    fn spoken(envelope: &SessionEnvelope) -> Vec<&str> {
        envelope
            .actions()
            .iter()
            .filter_map(|action| match action {
                Action::Speak { utterance, .. } => Some(utterance.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn greeter_asks_then_answers() -> Result<()> {
        let bus = MessageBus::default();
        let mut observer = bus.subscribe();
        let root = unique_test_root("harkd-greeter");
        let runtime = bind(GREETER_SKILL_ID, GreeterSkill, &bus, &root).await?;

        bus.emit(Message::from_value(
            "greeter.mark2:Hello",
            json!({ "session_id": "S1" }),
        ))
        .await?;
        let asked = next_envelope(&mut observer).await?;
        assert_eq!(asked.kind(), EnvelopeKind::Continue);
        assert_eq!(spoken(&asked), vec!["Hello! What is your name?"]);
        assert!(asked.actions().contains(&Action::GetResponse));

        bus.emit(Message::from_value(
            topics::SKILL_RESPONSE,
            json!({
                "skill_id": GREETER_SKILL_ID,
                "session_id": "S1",
                "utterances": ["  Ada "],
            }),
        ))
        .await?;
        let answered = next_envelope(&mut observer).await?;
        assert!(answered.is_end());
        assert_eq!(spoken(&answered), vec!["Nice to meet you, Ada."]);

        runtime.shutdown().await?;
        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }

    #[tokio::test]
    async fn empty_answer_falls_back_to_bare_end() -> Result<()> {
        let bus = MessageBus::default();
        let root = unique_test_root("harkd-greeter-empty");
        let runtime = bind(GREETER_SKILL_ID, GreeterSkill, &bus, &root).await?;

        let request = ActionRequest::new().speak("Name?").expect_response(true);
        let ctx = runtime.context("S2".into());
        ctx.emit_envelope(ctx.continue_session(&request, None)?).await?;

        let mut observer = bus.subscribe();
        bus.emit(Message::from_value(
            topics::SKILL_RESPONSE,
            json!({ "skill_id": GREETER_SKILL_ID, "session_id": "S2", "utterances": [" "] }),
        ))
        .await?;
        let ended = next_envelope(&mut observer).await?;
        assert!(ended.is_end());
        assert!(spoken(&ended).is_empty());

        runtime.shutdown().await?;
        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }

    #[tokio::test]
    async fn stop_intent_halts_the_system() -> Result<()> {
        let bus = MessageBus::default();
        let root = unique_test_root("harkd-stop");
        let runtime = bind(STOP_SKILL_ID, StopSkill, &bus, &root).await?;

        let report = runtime
            .dispatch_intent(
                "Stop",
                Message::from_value("stop.mark2:Stop", json!({ "session_id": "S3" })),
            )
            .await?;
        assert!(!report.fallback);
        assert!(report.envelope.is_end());
        assert_eq!(report.envelope.session_id().as_str(), "S3");

        runtime.shutdown().await?;
        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }

    #[tokio::test]
    async fn greeting_api_defaults_to_friend() -> Result<()> {
        let bus = MessageBus::default();
        let root = unique_test_root("harkd-greeter-api");
        let runtime = bind(GREETER_SKILL_ID, GreeterSkill, &bus, &root).await?;

        let reply = bus
            .wait_for_response(
                Message::bare("greeter.mark2.greeting"),
                None,
                Duration::from_secs(2),
            )
            .await?;
        let reply = reply.ok_or_else(|| anyhow::anyhow!("no api reply"))?;
        assert_eq!(reply.data["result"], "Nice to meet you, friend.");

        runtime.shutdown().await?;
        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }
}
