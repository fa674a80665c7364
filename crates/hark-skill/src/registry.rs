//! Explicit handler registration.

use std::fmt;
use std::sync::Arc;

use anyhow::{Result, bail};
use hark_protocol::{Message, ResourceCategory, ResourceResolver, SkillId, topics};
use indexmap::IndexMap;
use serde_json::{Value, json};

use crate::skill::{ApiMethod, EventHandler, IntentHandler};

/// How an intent is matched by the intent service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IntentDescriptor {
    /// Keyword intent named after its required vocabulary.
    Keyword(String),
    /// Example-sentence file, `<name>.intent`.
    File(String),
    /// Regular expression file, `<name>.rx`.
    Regex(String),
}

impl IntentDescriptor {
    /// Classify by suffix: `.intent` files, `.rx` files, otherwise a keyword.
    pub fn parse(name: &str) -> Self {
        if name.ends_with(".intent") {
            Self::File(name.to_owned())
        } else if name.ends_with(".rx") {
            Self::Regex(name.to_owned())
        } else {
            Self::Keyword(name.to_owned())
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Keyword(name) | Self::File(name) | Self::Regex(name) => name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Keyword(_) => "keyword",
            Self::File(_) => "file",
            Self::Regex(_) => "regex",
        }
    }

    /// Resource category holding the backing file, if any.
    pub fn resource_category(&self) -> Option<ResourceCategory> {
        match self {
            Self::Keyword(_) => None,
            Self::File(_) => Some(ResourceCategory::Vocab),
            Self::Regex(_) => Some(ResourceCategory::Regex),
        }
    }

    /// Bus topic the intent service routes matches to.
    pub fn topic(&self, skill_id: &SkillId) -> String {
        intent_topic(skill_id, self.name())
    }
}

impl From<&str> for IntentDescriptor {
    fn from(name: &str) -> Self {
        Self::parse(name)
    }
}

impl fmt::Display for IntentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn intent_topic(skill_id: &SkillId, name: &str) -> String {
    format!("{skill_id}:{name}")
}

/// A registered intent and whether it is currently announced.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentEntry {
    pub descriptor: IntentDescriptor,
    pub topic: String,
    /// Resolved backing file for file and regex intents.
    pub file: Option<String>,
    pub enabled: bool,
}

impl IntentEntry {
    pub fn register_message(&self) -> Message {
        let mut data = json!({ "name": self.topic, "type": self.descriptor.kind() });
        if let (Some(file), Value::Object(map)) = (&self.file, &mut data) {
            map.insert("file".to_owned(), json!(file));
        }
        Message::from_value(topics::INTENT_REGISTER, data)
    }

    pub fn detach_message(&self) -> Message {
        Message::from_value(topics::INTENT_DETACH, json!({ "intent_name": self.topic }))
    }
}

/// Intents of one skill, in registration order.
#[derive(Debug, Default, Clone)]
pub struct IntentRegistry {
    entries: IndexMap<String, IntentEntry>,
}

impl IntentRegistry {
    pub fn insert(&mut self, entry: IntentEntry) -> Result<()> {
        let name = entry.descriptor.name().to_owned();
        if self.entries.contains_key(&name) {
            bail!("intent {name} is already registered");
        }
        self.entries.insert(name, entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&IntentEntry> {
        self.entries.get(name)
    }

    /// Flip the enabled flag. `None` for an unknown intent, otherwise
    /// whether the flag changed.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Option<bool> {
        let entry = self.entries.get_mut(name)?;
        let changed = entry.enabled != enabled;
        entry.enabled = enabled;
        Some(changed)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IntentEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub(crate) struct IntentRegistration {
    pub descriptor: IntentDescriptor,
    pub handler: Arc<dyn IntentHandler>,
}

pub(crate) struct ApiRegistration {
    pub help: String,
    pub method: Arc<dyn ApiMethod>,
}

pub(crate) struct EventRegistration {
    pub topic: String,
    pub handler: Arc<dyn EventHandler>,
    pub once: bool,
}

/// Collects a skill's handlers during [`crate::Skill::register`].
pub struct SkillRegistrar {
    skill_id: SkillId,
    pub(crate) intents: Vec<IntentRegistration>,
    pub(crate) apis: IndexMap<String, ApiRegistration>,
    pub(crate) events: Vec<EventRegistration>,
}

impl SkillRegistrar {
    pub fn new(skill_id: SkillId) -> Self {
        Self {
            skill_id,
            intents: Vec::new(),
            apis: IndexMap::new(),
            events: Vec::new(),
        }
    }

    pub fn skill_id(&self) -> &SkillId {
        &self.skill_id
    }

    pub fn register_intent(
        &mut self,
        descriptor: impl Into<IntentDescriptor>,
        handler: Arc<dyn IntentHandler>,
    ) -> Result<()> {
        let descriptor = descriptor.into();
        if self
            .intents
            .iter()
            .any(|i| i.descriptor.name() == descriptor.name())
        {
            bail!("intent {descriptor} is already registered");
        }
        self.intents.push(IntentRegistration {
            descriptor,
            handler,
        });
        Ok(())
    }

    /// Expose `method` at `<skill_id>.<name>`.
    pub fn expose_api(
        &mut self,
        name: impl Into<String>,
        help: impl Into<String>,
        method: Arc<dyn ApiMethod>,
    ) -> Result<()> {
        let name = name.into();
        if self.apis.contains_key(&name) {
            bail!("api method {name} is already exposed");
        }
        self.apis.insert(
            name,
            ApiRegistration {
                help: help.into(),
                method,
            },
        );
        Ok(())
    }

    pub fn add_event(
        &mut self,
        topic: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        once: bool,
    ) {
        self.events.push(EventRegistration {
            topic: topic.into(),
            handler,
            once,
        });
    }

    pub fn api_topic(&self, name: &str) -> String {
        format!("{}.{name}", self.skill_id)
    }

    /// `{name: {help, type}}` listing answered on `<skill_id>.public_api`.
    pub fn public_api(&self) -> Value {
        let listing: serde_json::Map<String, Value> = self
            .apis
            .iter()
            .map(|(name, api)| {
                (
                    name.clone(),
                    json!({ "help": api.help, "type": self.api_topic(name) }),
                )
            })
            .collect();
        Value::Object(listing)
    }
}

/// Build the registry entry for `descriptor`, resolving its backing file.
pub fn intent_entry(
    skill_id: &SkillId,
    descriptor: IntentDescriptor,
    resources: &dyn ResourceResolver,
) -> Result<IntentEntry> {
    let file = match descriptor.resource_category() {
        Some(category) => match resources.resolve(descriptor.name(), category) {
            Some(uri) => Some(uri),
            None => bail!("unable to find {category} file for intent {descriptor}"),
        },
        None => None,
    };
    Ok(IntentEntry {
        topic: descriptor.topic(skill_id),
        descriptor,
        file,
        enabled: true,
    })
}
