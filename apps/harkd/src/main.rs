mod skills;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use hark_bus::MessageBus;
use hark_protocol::{Message, SessionEnvelope, SessionId, Transport, topics};
use hark_skill::{SkillConfig, SkillRuntime, SkillRuntimeBuilder};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::skills::{GREETER_SKILL_ID, GreeterSkill, STOP_SKILL_ID, StopSkill};

#[derive(Debug, Parser)]
#[command(name = "harkd")]
#[command(about = "Skill host demo daemon")]
struct Cli {
    /// Directory holding skill resources and settings.
    #[arg(long, default_value = ".hark")]
    root: PathBuf,
    /// JSON runtime config. Defaults apply when the file is missing.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    lang: Option<String>,
    /// Intent topic to replay once the skills are bound.
    #[arg(long, default_value = "greeter.mark2:Hello")]
    intent: String,
    /// Answer sent if the replayed intent leaves its session open.
    #[arg(long)]
    reply: Option<String>,
    #[arg(long, default_value = "info")]
    log_filter: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_filter).context("invalid --log-filter")?)
        .compact()
        .init();

    let mut config = match &cli.config {
        Some(path) => SkillConfig::load(path).await?,
        None => SkillConfig::default(),
    };
    if let Some(lang) = &cli.lang {
        config.lang = lang.to_lowercase();
    }
    if cli.config.is_none() {
        config.settings_root = cli.root.join("settings");
    }

    let bus = MessageBus::default();
    let transport: Arc<dyn Transport> = Arc::new(bus.clone());

    let mut messages = bus.subscribe_stream();
    let observer_task = tokio::spawn(async move {
        while let Some(item) = messages.next().await {
            let message = match item {
                Ok(message) => message,
                Err(error) => {
                    warn!(%error, "observer fell behind the bus");
                    continue;
                }
            };
            match SessionEnvelope::from_message(&message) {
                Ok(envelope) => {
                    let actions =
                        serde_json::to_string(envelope.actions()).unwrap_or_else(|_| "[]".into());
                    info!(
                        kind = ?envelope.kind(),
                        session_id = %envelope.session_id(),
                        owner = %envelope.owner_id(),
                        %actions,
                        "session envelope"
                    );
                }
                Err(_) => info!(topic = %message.msg_type, "bus message"),
            }
        }
    });

    let runtimes = vec![
        bind(STOP_SKILL_ID, StopSkill, &cli.root, &config, &transport).await?,
        bind(GREETER_SKILL_ID, GreeterSkill, &cli.root, &config, &transport).await?,
    ];

    let session_id = SessionId::new_uuid();
    info!(%session_id, intent = %cli.intent, "replaying request");
    bus.emit(Message::from_value(
        cli.intent.clone(),
        json!({ "session_id": session_id, "utterance": cli.intent }),
    ))
    .await?;
    tokio::time::sleep(Duration::from_millis(150)).await;

    if let Some(reply) = &cli.reply {
        let owner = runtimes
            .iter()
            .find(|runtime| runtime.handle().sessions().is_active(&session_id));
        match owner {
            Some(runtime) => {
                bus.emit(Message::from_value(
                    topics::SKILL_RESPONSE,
                    json!({
                        "skill_id": runtime.skill_id(),
                        "session_id": session_id,
                        "utterances": [reply],
                    }),
                ))
                .await?;
                tokio::time::sleep(Duration::from_millis(150)).await;
            }
            None => warn!(%session_id, "no skill is waiting for a reply"),
        }
    }

    for runtime in &runtimes {
        if let Err(error) = runtime.shutdown().await {
            warn!(skill_id = %runtime.skill_id(), %error, "shutdown failed");
        }
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    observer_task.abort();
    if let Err(error) = observer_task.await {
        if !error.is_cancelled() {
            warn!(%error, "observer task stopped");
        }
    }

    Ok(())
}

async fn bind<S: hark_skill::Skill>(
    skill_id: &str,
    skill: S,
    root: &std::path::Path,
    config: &SkillConfig,
    transport: &Arc<dyn Transport>,
) -> Result<SkillRuntime> {
    SkillRuntimeBuilder::new(skill_id)
        .config(config.clone())
        .skill_root(root.join("skills").join(skill_id))
        .bind(Arc::new(skill), transport.clone())
        .await
        .with_context(|| format!("failed binding {skill_id}"))
}
