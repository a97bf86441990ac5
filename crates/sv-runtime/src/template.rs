use std::sync::OnceLock;

use regex::{Captures, Regex};
use sv_core::{SessionState, StateValue};

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}").expect("placeholder regex must compile")
    })
}

fn slot_template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\s*([A-Za-z_][A-Za-z0-9_]*)(?:\s+as\s+([A-Za-z_][A-Za-z0-9_]*))?\s*\}")
            .expect("slot template regex must compile")
    })
}

/// Replaces `{name}` with the variable's text. Unknown names are left alone.
pub fn substitute(text: &str, state: &SessionState) -> String {
    placeholder_pattern()
        .replace_all(text, |captures: &Captures<'_>| match state.variable(&captures[1]) {
            Some(value) => value.to_text(),
            None => captures[0].to_string(),
        })
        .into_owned()
}

/// Substitution for boolean expressions: every placeholder becomes a literal
/// the evaluator can read, and unknown names read as `false`.
pub fn substitute_condition(text: &str, state: &SessionState) -> String {
    placeholder_pattern()
        .replace_all(text, |captures: &Captures<'_>| match state.variable(&captures[1]) {
            None | Some(StateValue::Null) => "false".to_string(),
            Some(StateValue::Bool(value)) => value.to_string(),
            Some(StateValue::Number(value)) => sv_core::format_number(*value),
            Some(other) => quote(&other.to_text()),
        })
        .into_owned()
}

fn quote(raw: &str) -> String {
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

/// One `{slot}` or `{slot as alias}` placeholder inside an utterance template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotPlaceholder {
    pub slot: String,
    pub alias: Option<String>,
}

impl SlotPlaceholder {
    /// State variable that receives the slot value.
    pub fn variable(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.slot)
    }
}

pub fn slot_placeholders(template: &str) -> Vec<SlotPlaceholder> {
    slot_template_pattern()
        .captures_iter(template)
        .map(|captures| SlotPlaceholder {
            slot: captures[1].to_string(),
            alias: captures.get(2).map(|alias| alias.as_str().to_string()),
        })
        .collect()
}

/// Fills slot placeholders using `lookup`; unresolved placeholders stay.
pub fn fill_slots<'a, F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<&'a str>,
{
    slot_template_pattern()
        .replace_all(template, |captures: &Captures<'_>| match lookup(&captures[1]) {
            Some(value) => value.to_string(),
            None => captures[0].to_string(),
        })
        .into_owned()
}

/// Text left once every slot placeholder is removed.
pub fn strip_slots(template: &str) -> String {
    slot_template_pattern().replace_all(template, " ").trim().to_string()
}

#[cfg(test)]
mod template_tests {
    use super::*;

    fn state() -> SessionState {
        let mut state = SessionState::default();
        state.set_variable("name", StateValue::from("Ada \"the\" brave"));
        state.set_variable("gold", StateValue::Number(12.0));
        state.set_variable("lit", StateValue::Bool(true));
        state
    }

    #[test]
    fn substitute_keeps_unknown_placeholders() {
        assert_eq!(
            substitute("Hi {name}, you have {gold} coins and {silver}.", &state()),
            "Hi Ada \"the\" brave, you have 12 coins and {silver}."
        );
    }

    #[test]
    fn condition_substitution_emits_literals() {
        assert_eq!(
            substitute_condition("{gold} > 3 and {lit} and {name} is {missing}", &state()),
            r#"12 > 3 and true and "Ada \"the\" brave" is false"#
        );
    }

    #[test]
    fn slot_placeholders_read_aliases() {
        let found = slot_placeholders("drink {bottles} with {friend as companion}");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].variable(), "bottles");
        assert_eq!(found[1].slot, "friend");
        assert_eq!(found[1].variable(), "companion");
        assert_eq!(strip_slots("{bottles}"), "");
        assert_eq!(
            fill_slots("drink {bottles} now", |name| (name == "bottles").then_some("3")),
            "drink 3 now"
        );
    }
}
