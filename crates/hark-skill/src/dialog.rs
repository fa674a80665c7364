use std::collections::HashMap;

use hark_protocol::{CompileError, Data, DialogRenderer};
use parking_lot::Mutex;
use serde_json::Value;

/// Template rendered when a handler fails.
pub const SKILL_ERROR_TEMPLATE: &str = "skill.error";

/// In-memory dialog templates with `{key}` placeholders.
///
/// A template id may carry several variants; they are used round-robin so
/// repeated prompts do not sound identical.
#[derive(Debug, Default)]
pub struct TemplateDialogRenderer {
    templates: HashMap<String, Vec<String>>,
    cursors: Mutex<HashMap<String, usize>>,
}

impl TemplateDialogRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Renderer preloaded with the runtime's own templates.
    pub fn with_builtin() -> Self {
        let mut renderer = Self::new();
        renderer.insert(
            SKILL_ERROR_TEMPLATE,
            ["An error occurred while processing a request in {skill}"],
        );
        renderer
    }

    pub fn insert<I, S>(&mut self, template_id: impl Into<String>, variants: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.templates.insert(
            template_id.into(),
            variants.into_iter().map(Into::into).collect(),
        );
    }

    fn next_variant(&self, template_id: &str) -> Option<&str> {
        let variants = self.templates.get(template_id)?;
        if variants.is_empty() {
            return None;
        }
        let mut cursors = self.cursors.lock();
        let cursor = cursors.entry(template_id.to_owned()).or_insert(0);
        let index = *cursor % variants.len();
        *cursor = cursor.wrapping_add(1);
        Some(variants[index].as_str())
    }
}

impl DialogRenderer for TemplateDialogRenderer {
    fn render(&self, template_id: &str, data: &Data) -> Result<String, CompileError> {
        let template = self
            .next_variant(template_id)
            .ok_or_else(|| CompileError::TemplateNotFound(template_id.to_owned()))?;
        fill_placeholders(template, data).map_err(|key| CompileError::TemplateRender {
            template: template_id.to_owned(),
            reason: format!("missing value for {{{key}}}"),
        })
    }
}

/// Substitute `{key}` placeholders. Returns the first missing key on failure.
/// An unclosed brace is kept literally.
fn fill_placeholders(template: &str, data: &Data) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return Ok(out);
        };
        let key = after[..close].trim();
        match data.get(key) {
            Some(Value::String(text)) => out.push_str(text),
            Some(value) => out.push_str(&value.to_string()),
            None => return Err(key.to_owned()),
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Split a CamelCase name into words: `MyFancySkill` → `My Fancy Skill`.
pub fn camel_case_split(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && c.is_uppercase() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower)
            {
                out.push(' ');
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> Data {
        match value {
            Value::Object(map) => map,
            _ => Data::new(),
        }
    }

    #[test]
    fn renders_placeholders_from_data() {
        let mut renderer = TemplateDialogRenderer::new();
        renderer.insert("timer.set", ["Timer set for {duration}", "{duration} timer started"]);

        let args = data(json!({ "duration": "five minutes" }));
        assert_eq!(
            renderer.render("timer.set", &args).unwrap(),
            "Timer set for five minutes"
        );
        assert_eq!(
            renderer.render("timer.set", &args).unwrap(),
            "five minutes timer started"
        );
        assert_eq!(
            renderer.render("timer.set", &args).unwrap(),
            "Timer set for five minutes"
        );
    }

    #[test]
    fn non_string_values_are_rendered_as_json() {
        let mut renderer = TemplateDialogRenderer::new();
        renderer.insert("count", ["{n} items"]);
        let args = data(json!({ "n": 3 }));
        assert_eq!(renderer.render("count", &args).unwrap(), "3 items");
    }

    #[test]
    fn unknown_template_is_an_error() {
        let renderer = TemplateDialogRenderer::new();
        let err = renderer.render("nope", &Data::new()).unwrap_err();
        assert_eq!(err, CompileError::TemplateNotFound("nope".into()));
    }

    #[test]
    fn missing_placeholder_value_is_an_error() {
        let renderer = TemplateDialogRenderer::with_builtin();
        let err = renderer
            .render(SKILL_ERROR_TEMPLATE, &Data::new())
            .unwrap_err();
        assert!(matches!(err, CompileError::TemplateRender { .. }));
    }

    #[test]
    fn unclosed_brace_is_literal() {
        let mut renderer = TemplateDialogRenderer::new();
        renderer.insert("odd", ["left {brace"]);
        assert_eq!(renderer.render("odd", &Data::new()).unwrap(), "left {brace");
    }

    #[test]
    fn camel_case_split_inserts_spaces() {
        assert_eq!(camel_case_split("MyFancySkill"), "My Fancy Skill");
        assert_eq!(camel_case_split("StopSkill"), "Stop Skill");
        assert_eq!(camel_case_split("HTTPServer"), "HTTP Server");
        assert_eq!(camel_case_split("weather"), "weather");
    }
}
