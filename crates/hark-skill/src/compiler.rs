//! Action compiler: turns a declarative [`ActionRequest`] into the ordered
//! action list played by the presentation engines.
//!
//! Emission order is fixed:
//!
//! 1. attached message (`MessageSend::AtStart`)
//! 2. clear display (`GuiClear::AtStart`)
//! 3. audio alert
//! 4. GUI pages and dialogs, interleaved by position (page first)
//! 5. literal utterance
//! 6. attached message (`MessageSend::AtEnd`)
//! 7. music stream
//! 8. get response
//! 9. clear display (`AtEnd`) or wait for idle (`OnIdle`)
//!
//! Compilation is synchronous and all-or-nothing: a page or template that
//! cannot be resolved aborts the whole list.

use hark_protocol::{
    Action, CompileError, Data, DialogRenderer, GuiClear, Message, MessageSend,
    ResourceCategory, ResourceResolver, SESSION_ID_KEY, SessionId, SkillId,
};
use serde_json::{Value, json};

/// A dialog template id plus the data used to render it.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogItem {
    pub template: String,
    pub data: Data,
}

impl DialogItem {
    pub fn new(template: impl Into<String>, data: Data) -> Self {
        Self {
            template: template.into(),
            data,
        }
    }
}

impl From<&str> for DialogItem {
    fn from(template: &str) -> Self {
        Self::new(template, Data::new())
    }
}

impl From<String> for DialogItem {
    fn from(template: String) -> Self {
        Self::new(template, Data::new())
    }
}

impl From<(&str, Data)> for DialogItem {
    fn from((template, data): (&str, Data)) -> Self {
        Self::new(template, data)
    }
}

/// Render data must be a JSON object; anything else is rejected up front.
impl TryFrom<(&str, Value)> for DialogItem {
    type Error = CompileError;

    fn try_from((template, data): (&str, Value)) -> Result<Self, Self::Error> {
        match data {
            Value::Object(map) => Ok(Self::new(template, map)),
            other => Err(CompileError::TemplateRender {
                template: template.to_owned(),
                reason: format!("dialog data must be an object, got {other}"),
            }),
        }
    }
}

/// A GUI page name plus optional page data.
#[derive(Debug, Clone, PartialEq)]
pub struct GuiItem {
    pub page: String,
    pub data: Option<Value>,
}

impl GuiItem {
    pub fn new(page: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            page: page.into(),
            data,
        }
    }
}

impl From<&str> for GuiItem {
    fn from(page: &str) -> Self {
        Self::new(page, None)
    }
}

impl From<String> for GuiItem {
    fn from(page: String) -> Self {
        Self::new(page, None)
    }
}

impl From<(&str, Value)> for GuiItem {
    fn from((page, data): (&str, Value)) -> Self {
        Self::new(page, Some(data))
    }
}

/// An outbound bus message spliced into the action list.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachedMessage {
    pub message: Message,
    pub send: MessageSend,
    /// Seconds; only honoured for `MessageSend::AtEnd`.
    pub delay: f64,
}

/// Declarative description of what should happen in response to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub message: Option<AttachedMessage>,
    pub gui_clear: GuiClear,
    pub audio_alert: Option<String>,
    pub guis: Vec<GuiItem>,
    pub dialogs: Vec<DialogItem>,
    pub speak: Option<String>,
    pub speak_wait: bool,
    pub music_uri: Option<String>,
    pub expect_response: bool,
}

impl Default for ActionRequest {
    fn default() -> Self {
        Self {
            message: None,
            gui_clear: GuiClear::Auto,
            audio_alert: None,
            guis: Vec::new(),
            dialogs: Vec::new(),
            speak: None,
            speak_wait: true,
            music_uri: None,
            expect_response: false,
        }
    }
}

impl ActionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dialog(mut self, item: impl Into<DialogItem>) -> Self {
        self.dialogs.push(item.into());
        self
    }

    pub fn dialogs<I, D>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<DialogItem>,
    {
        self.dialogs.extend(items.into_iter().map(Into::into));
        self
    }

    pub fn gui(mut self, item: impl Into<GuiItem>) -> Self {
        self.guis.push(item.into());
        self
    }

    pub fn guis<I, G>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: Into<GuiItem>,
    {
        self.guis.extend(items.into_iter().map(Into::into));
        self
    }

    pub fn speak(mut self, utterance: impl Into<String>) -> Self {
        self.speak = Some(utterance.into());
        self
    }

    pub fn speak_wait(mut self, wait: bool) -> Self {
        self.speak_wait = wait;
        self
    }

    pub fn gui_clear(mut self, policy: GuiClear) -> Self {
        self.gui_clear = policy;
        self
    }

    pub fn audio_alert(mut self, uri: impl Into<String>) -> Self {
        self.audio_alert = Some(uri.into());
        self
    }

    pub fn music_uri(mut self, uri: impl Into<String>) -> Self {
        self.music_uri = Some(uri.into());
        self
    }

    pub fn message(mut self, message: Message, send: MessageSend) -> Self {
        self.message = Some(AttachedMessage {
            message,
            send,
            delay: 0.0,
        });
        self
    }

    /// Delay for an end-placed message. No effect without an attached message.
    pub fn message_delay(mut self, seconds: f64) -> Self {
        if let Some(attached) = self.message.as_mut() {
            attached.delay = seconds;
        }
        self
    }

    pub fn expect_response(mut self, expect: bool) -> Self {
        self.expect_response = expect;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.message.is_none()
            && self.audio_alert.is_none()
            && self.guis.is_empty()
            && self.dialogs.is_empty()
            && self.speak.is_none()
            && self.music_uri.is_none()
            && !self.expect_response
    }
}

/// Everything the compiler needs besides the request itself.
#[derive(Clone, Copy)]
pub struct CompileScope<'a> {
    pub skill_id: &'a SkillId,
    pub session_id: &'a SessionId,
    pub resources: &'a dyn ResourceResolver,
    pub dialogs: &'a dyn DialogRenderer,
}

/// Resolve a clear policy to a concrete timing.
///
/// A pending response is never interrupted, so `Auto` degrades to `Never`
/// when `expect_response` is set. Otherwise shown pages are cleared after
/// speech, or on idle when nothing was spoken.
pub fn resolve_gui_clear(
    policy: GuiClear,
    expect_response: bool,
    showed_pages: bool,
    spoke: bool,
) -> GuiClear {
    match policy {
        GuiClear::Auto if expect_response => GuiClear::Never,
        GuiClear::Auto if showed_pages && spoke => GuiClear::AtEnd,
        GuiClear::Auto if showed_pages => GuiClear::OnIdle,
        GuiClear::Auto => GuiClear::Never,
        concrete => concrete,
    }
}

fn closing_action(resolved: GuiClear) -> Option<Action> {
    match resolved {
        GuiClear::AtEnd => Some(Action::ClearDisplay),
        GuiClear::OnIdle => Some(Action::WaitForIdle),
        GuiClear::Auto | GuiClear::Never | GuiClear::AtStart => None,
    }
}

/// Actions for a request with no content. Needs no collaborators, so it
/// cannot fail.
pub fn bare_actions(gui_clear: GuiClear) -> Vec<Action> {
    let mut actions = Vec::new();
    if gui_clear == GuiClear::AtStart {
        actions.push(Action::ClearDisplay);
    }
    actions.extend(closing_action(resolve_gui_clear(
        gui_clear, false, false, false,
    )));
    actions
}

fn message_action(attached: &AttachedMessage, session_id: &SessionId, delay: Option<f64>) -> Action {
    let mut data = Data::new();
    data.insert(SESSION_ID_KEY.to_owned(), json!(session_id));
    data.extend(attached.message.data.clone());
    Action::Message {
        message_type: attached.message.msg_type.clone(),
        data,
        delay,
    }
}

fn show_page_action(item: &GuiItem, scope: &CompileScope<'_>) -> Result<Action, CompileError> {
    let page = scope
        .resources
        .resolve(&item.page, ResourceCategory::Ui)
        .ok_or_else(|| CompileError::ResourceNotFound {
            name: item.page.clone(),
            category: ResourceCategory::Ui,
        })?;
    Ok(Action::ShowPage {
        page,
        data: item.data.clone(),
        namespace: format!("{}.{}", scope.skill_id, item.page),
    })
}

pub fn compile_actions(
    request: &ActionRequest,
    scope: &CompileScope<'_>,
) -> Result<Vec<Action>, CompileError> {
    let mut actions = Vec::new();
    let gui_clear = resolve_gui_clear(
        request.gui_clear,
        request.expect_response,
        !request.guis.is_empty(),
        !request.dialogs.is_empty() || request.speak.is_some(),
    );

    if let Some(attached) = &request.message
        && attached.send == MessageSend::AtStart
    {
        actions.push(message_action(attached, scope.session_id, None));
    }

    if gui_clear == GuiClear::AtStart {
        actions.push(Action::ClearDisplay);
    }

    if let Some(uri) = &request.audio_alert {
        actions.push(Action::AudioAlert {
            uri: uri.clone(),
            wait: true,
        });
    }

    // Positional pairing; the shorter sequence leaves gaps rather than
    // truncating the longer one.
    let slots = request.guis.len().max(request.dialogs.len());
    for index in 0..slots {
        if let Some(gui) = request.guis.get(index) {
            actions.push(show_page_action(gui, scope)?);
        }
        if let Some(dialog) = request.dialogs.get(index) {
            let utterance = scope.dialogs.render(&dialog.template, &dialog.data)?;
            actions.push(Action::Speak {
                utterance,
                dialog: Some(dialog.template.clone()),
                wait: request.speak_wait,
            });
        }
    }

    if let Some(utterance) = &request.speak {
        actions.push(Action::Speak {
            utterance: utterance.clone(),
            dialog: None,
            wait: request.speak_wait,
        });
    }

    if let Some(attached) = &request.message
        && attached.send == MessageSend::AtEnd
    {
        actions.push(message_action(attached, scope.session_id, Some(attached.delay)));
    }

    if let Some(uri) = &request.music_uri {
        actions.push(Action::StreamMusic { uri: uri.clone() });
    }

    if request.expect_response {
        actions.push(Action::GetResponse);
    }

    actions.extend(closing_action(gui_clear));
    Ok(actions)
}
