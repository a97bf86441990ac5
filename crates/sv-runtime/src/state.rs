//! Pure operations over [`SessionState`]. Nothing here touches the graph or
//! the play stage.

use sha2::{Digest, Sha256};
use sv_core::{Choice, ChoiceRecord, Origin, SessionState, StateValue, UserInput};
use tracing::{debug, warn};

use crate::address::Address;
use crate::fuzzy::{normalize, similarity};
use crate::template::{fill_slots, slot_placeholders, strip_slots};

pub const RESUME_TARGET_VARIABLE: &str = "system_resumeTarget";
pub const WILDCARD_UTTERANCE: &str = "*";

/// Stable id for a set of utterances, independent of their order and case.
pub fn choice_id(utterances: &[String]) -> String {
    let mut normalized = utterances
        .iter()
        .map(|utterance| normalize(utterance))
        .collect::<Vec<_>>();
    normalized.sort();
    normalized.dedup();
    let digest = Sha256::digest(normalized.join("\u{1f}").as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

pub fn reset_choices(state: &mut SessionState) {
    state.choices.clear();
    state.utterance_index.clear();
}

pub fn enqueue_choice(state: &mut SessionState, choice: Choice) {
    for utterance in &choice.utterances {
        state
            .utterance_index
            .insert(normalize(utterance), choice.id.clone());
    }
    state.choices.insert(choice.id.clone(), choice);
}

pub fn append_history(state: &mut SessionState, record: ChoiceRecord, history_size: usize) {
    state.choice_history.push(record);
    evict_oldest(&mut state.choice_history, history_size);
}

pub fn set_paused(state: &mut SessionState, paused: bool) {
    state.paused = paused;
}

pub fn is_paused(state: &SessionState) -> bool {
    state.paused
}

pub fn set_ending_reached(state: &mut SessionState, reached: bool) {
    state.ending_reached = reached;
}

pub fn is_ending_reached(state: &SessionState) -> bool {
    state.ending_reached
}

pub fn expect_slot(state: &mut SessionState, name: &str) {
    if !state
        .expected_slots
        .iter()
        .any(|expected| expected.eq_ignore_ascii_case(name))
    {
        state.expected_slots.push(name.to_string());
    }
}

pub fn clear_expected_slots(state: &mut SessionState) {
    state.expected_slots.clear();
}

fn is_slot_expected(state: &SessionState, name: &str) -> bool {
    state
        .expected_slots
        .iter()
        .any(|expected| expected.eq_ignore_ascii_case(name))
}

/// Remembers the current bookmark as the place to resume after a pause.
pub fn capture_resume_state(state: &mut SessionState) {
    if let Some(bookmark) = state.bookmark.clone() {
        state.set_variable(RESUME_TARGET_VARIABLE, StateValue::String(bookmark));
    }
}

/// Moves the bookmark back to the captured resume target and forgets it.
pub fn restore_resume_state(state: &mut SessionState) -> Option<String> {
    let target = state
        .remove_variable(RESUME_TARGET_VARIABLE)
        .map(|value| value.to_text())
        .filter(|target| !target.is_empty())?;
    state.bookmark = Some(target.clone());
    Some(target)
}

pub fn push_call(state: &mut SessionState, address: &Address, history_size: usize) {
    state.call_stack.push(address.encode());
    evict_oldest(&mut state.call_stack, history_size);
}

/// Pops the newest decodable return address.
pub fn pop_call(state: &mut SessionState) -> Option<Address> {
    while let Some(raw) = state.call_stack.pop() {
        match Address::decode(&raw) {
            Ok(address) => return Some(address),
            Err(error) => warn!(%error, raw = %raw, "dropping unreadable call stack entry"),
        }
    }
    None
}

pub fn push_origin(state: &mut SessionState, origin: Origin, history_size: usize) {
    state.origin_stack.push(origin);
    evict_oldest(&mut state.origin_stack, history_size);
}

/// Pops up to `count` origins and returns the last one popped.
pub fn pop_origins(state: &mut SessionState, count: usize) -> Option<Origin> {
    let mut last = None;
    for _ in 0..count {
        match state.origin_stack.pop() {
            Some(origin) => last = Some(origin),
            None => break,
        }
    }
    last
}

/// Forgets story progress. The random generator state survives so a restarted
/// story does not replay the same alternatives.
pub fn reset_story_state(state: &mut SessionState) {
    let rng_state = state.rng_state;
    let previous_speech = std::mem::take(&mut state.previous_speech);
    let previous_reprompt = std::mem::take(&mut state.previous_reprompt);
    let previous_recap = std::mem::take(&mut state.previous_recap);
    *state = SessionState {
        rng_state,
        previous_speech,
        previous_reprompt,
        previous_recap,
        ..SessionState::default()
    };
}

fn evict_oldest<T>(items: &mut Vec<T>, limit: usize) {
    if items.len() > limit {
        let excess = items.len() - limit;
        items.drain(..excess);
    }
}

/// Picks the registered choice that best answers `input` and applies its
/// slot values to state. Priority: slot token, raw value, intent name, then
/// the `*` wildcard.
pub fn resolve_choice_by_input(
    state: &mut SessionState,
    input: &UserInput,
    threshold: f64,
) -> Option<Choice> {
    let choice = match_choice(state, input, threshold)?.clone();
    apply_slots(state, &choice, input);
    Some(choice)
}

fn match_choice<'s>(state: &'s SessionState, input: &UserInput, threshold: f64) -> Option<&'s Choice> {
    let templates = state
        .choices
        .values()
        .flat_map(|choice| {
            choice
                .utterances
                .iter()
                .map(move |utterance| (utterance.as_str(), choice))
        })
        .collect::<Vec<_>>();
    if templates.is_empty() {
        return None;
    }

    if let Some(token) = slot_token(input) {
        if let Some(&(_, choice)) = templates
            .iter()
            .find(|(template, _)| template_slot_token(template).as_deref() == Some(token.as_str()))
        {
            debug!(choice = %choice.id, "choice matched by slot token");
            return Some(choice);
        }
    }

    if let Some(value) = input.value.as_deref().map(normalize).filter(|v| !v.is_empty()) {
        if let Some(choice) = state
            .utterance_index
            .get(&value)
            .and_then(|id| state.choices.get(id))
        {
            debug!(choice = %choice.id, "choice matched by exact utterance");
            return Some(choice);
        }

        let mut best: Option<(f64, &Choice)> = None;
        for &(template, choice) in &templates {
            if template == WILDCARD_UTTERANCE {
                continue;
            }
            let filled = normalize(&fill_slots(template, |name| input.slot_value(name)));
            let score = if filled == value {
                1.0
            } else {
                similarity(&filled, &value)
            };
            if score >= threshold && best.map_or(true, |(top, _)| score > top) {
                best = Some((score, choice));
            }
        }
        if let Some((score, choice)) = best {
            debug!(choice = %choice.id, score, "choice matched by utterance");
            return Some(choice);
        }
    }

    if let Some(intent) = input.intent.as_deref().map(intent_words) {
        if let Some(&(_, choice)) = templates
            .iter()
            .find(|(template, _)| normalize(template).replace(' ', "") == intent)
        {
            debug!(choice = %choice.id, "choice matched by intent");
            return Some(choice);
        }
    }

    templates
        .iter()
        .find(|(template, _)| template.trim() == WILDCARD_UTTERANCE)
        .map(|(_, choice)| *choice)
}

/// `AMAZON.YesIntent` reads as `yes`.
fn intent_words(intent: &str) -> String {
    let name = intent.rsplit('.').next().unwrap_or(intent);
    let name = name.strip_suffix("Intent").unwrap_or(name);
    normalize(name).replace(' ', "")
}

fn slot_token(input: &UserInput) -> Option<String> {
    let mut names = input
        .slots
        .iter()
        .filter(|slot| slot.value.as_deref().is_some_and(|value| !value.trim().is_empty()))
        .map(|slot| slot.name.to_lowercase())
        .collect::<Vec<_>>();
    if names.is_empty() {
        return None;
    }
    names.sort();
    Some(names.join(" "))
}

/// Slot names of a template made only of placeholders.
fn template_slot_token(template: &str) -> Option<String> {
    if !strip_slots(template).is_empty() {
        return None;
    }
    let mut names = slot_placeholders(template)
        .into_iter()
        .map(|placeholder| placeholder.slot.to_lowercase())
        .collect::<Vec<_>>();
    if names.is_empty() {
        return None;
    }
    names.sort();
    Some(names.join(" "))
}

fn apply_slots(state: &mut SessionState, choice: &Choice, input: &UserInput) {
    for utterance in &choice.utterances {
        for placeholder in slot_placeholders(utterance) {
            let value = input
                .slot_value(&placeholder.slot)
                .filter(|value| !value.trim().is_empty());
            match value {
                Some(value) if is_slot_expected(state, &placeholder.slot) => {
                    state.set_variable(placeholder.variable(), StateValue::String(value.to_string()));
                }
                _ => {
                    state.remove_variable(placeholder.variable());
                }
            }
        }
    }
}

#[cfg(test)]
mod state_helper_tests {
    use super::*;

    fn choice(utterances: &[&str]) -> Choice {
        let utterances = utterances.iter().map(|u| u.to_string()).collect::<Vec<_>>();
        Choice {
            id: choice_id(&utterances),
            utterances,
            address: None,
            instructions: Vec::new(),
            save_to_history: false,
        }
    }

    fn state_with(choices: &[Choice]) -> SessionState {
        let mut state = SessionState::default();
        for choice in choices {
            enqueue_choice(&mut state, choice.clone());
        }
        state
    }

    #[test]
    fn choice_id_ignores_order_and_case() {
        let a = choice_id(&["Go North".to_string(), "north".to_string()]);
        let b = choice_id(&["north".to_string(), "go north!".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, choice_id(&["south".to_string()]));
    }

    #[test]
    fn raw_value_matches_exactly_then_fuzzily() {
        let north = choice(&["go north", "north"]);
        let south = choice(&["go south"]);
        let mut state = state_with(&[north.clone(), south.clone()]);

        let exact = resolve_choice_by_input(&mut state, &UserInput::from_utterance("North!"), 0.8);
        assert_eq!(exact.map(|c| c.id), Some(north.id.clone()));

        let fuzzy = resolve_choice_by_input(&mut state, &UserInput::from_utterance("go southh"), 0.8);
        assert_eq!(fuzzy.map(|c| c.id), Some(south.id));

        let miss = resolve_choice_by_input(&mut state, &UserInput::from_utterance("dance"), 0.8);
        assert!(miss.is_none());
    }

    #[test]
    fn intent_names_match_after_stripping_namespace_and_suffix() {
        let yes = choice(&["yes", "sure"]);
        let north = choice(&["go north"]);
        let mut state = state_with(&[yes.clone(), north.clone()]);
        let matched = resolve_choice_by_input(&mut state, &UserInput::from_intent("AMAZON.YesIntent"), 0.8);
        assert_eq!(matched.map(|c| c.id), Some(yes.id));
        let matched = resolve_choice_by_input(&mut state, &UserInput::from_intent("GoNorthIntent"), 0.8);
        assert_eq!(matched.map(|c| c.id), Some(north.id));
    }

    #[test]
    fn wildcard_catches_unmatched_input() {
        let wildcard = choice(&["*"]);
        let mut state = state_with(&[choice(&["open the door"]), wildcard.clone()]);
        let matched = resolve_choice_by_input(&mut state, &UserInput::from_utterance("sing a song"), 0.8);
        assert_eq!(matched.map(|c| c.id), Some(wildcard.id.clone()));
        let matched = resolve_choice_by_input(&mut state, &UserInput::default(), 0.8);
        assert_eq!(matched.map(|c| c.id), Some(wildcard.id));
    }

    #[test]
    fn slot_token_wins_over_other_matches() {
        let count = choice(&["{bottles}"]);
        let mut state = state_with(&[choice(&["three"]), count.clone()]);
        expect_slot(&mut state, "bottles");
        let input = UserInput::from_utterance("three").with_slot("bottles", "3");
        let matched = resolve_choice_by_input(&mut state, &input, 0.8);
        assert_eq!(matched.map(|c| c.id), Some(count.id));
        assert_eq!(state.variable("bottles"), Some(&StateValue::from("3")));
    }

    #[test]
    fn slot_values_copy_only_when_expected() {
        let drink = choice(&["drink {bottles}", "drink {friend as companion}"]);
        let mut state = state_with(&[drink]);
        state.set_variable("companion", StateValue::from("stale"));
        expect_slot(&mut state, "bottles");

        let input = UserInput::from_utterance("drink 2")
            .with_slot("bottles", "2")
            .with_slot("friend", "Bob");
        assert!(resolve_choice_by_input(&mut state, &input, 0.8).is_some());
        assert_eq!(state.variable("bottles"), Some(&StateValue::from("2")));
        assert_eq!(state.variable("companion"), None);
    }

    #[test]
    fn missing_slot_deletes_stale_value() {
        let drink = choice(&["{bottles}", "drink"]);
        let mut state = state_with(&[drink]);
        expect_slot(&mut state, "bottles");
        state.set_variable("bottles", StateValue::from("9"));
        assert!(resolve_choice_by_input(&mut state, &UserInput::from_utterance("drink"), 0.8).is_some());
        assert_eq!(state.variable("bottles"), None);
    }

    #[test]
    fn bounded_stacks_evict_oldest() {
        let mut state = SessionState::default();
        for index in 0..5 {
            push_origin(
                &mut state,
                Origin {
                    scene_id: format!("s{}", index),
                    property: None,
                },
                3,
            );
            push_call(&mut state, &Address::scene(&format!("s{}", index), 0, 0), 2);
        }
        assert_eq!(state.origin_stack.len(), 3);
        assert_eq!(state.origin_stack[0].scene_id, "s2");
        assert_eq!(state.call_stack.len(), 2);

        let popped = pop_origins(&mut state, 2).expect("origin");
        assert_eq!(popped.scene_id, "s3");
        assert_eq!(pop_origins(&mut state, 9).map(|o| o.scene_id), Some("s2".to_string()));
        assert!(pop_origins(&mut state, 1).is_none());

        state.call_stack.push("@2;broken".to_string());
        assert_eq!(pop_call(&mut state).map(|a| a.scene_id().to_string()), Some("s4".to_string()));
    }

    #[test]
    fn history_is_bounded() {
        let mut state = SessionState::default();
        for index in 0..4 {
            append_history(
                &mut state,
                ChoiceRecord {
                    id: index.to_string(),
                    utterance: "x".to_string(),
                },
                2,
            );
        }
        let ids = state.choice_history.iter().map(|r| r.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["2", "3"]);
    }

    #[test]
    fn resume_target_roundtrips_through_a_variable() {
        let mut state = SessionState {
            bookmark: Some("cellar".to_string()),
            ..SessionState::default()
        };
        capture_resume_state(&mut state);
        state.bookmark = Some("pause".to_string());
        assert_eq!(restore_resume_state(&mut state).as_deref(), Some("cellar"));
        assert_eq!(state.bookmark.as_deref(), Some("cellar"));
        assert!(restore_resume_state(&mut state).is_none());
    }

    #[test]
    fn reset_keeps_rng_and_previous_content() {
        let mut state = SessionState {
            bookmark: Some("hall".to_string()),
            paused: true,
            rng_state: Some(42),
            ..SessionState::default()
        };
        state.set_variable("gold", StateValue::Number(3.0));
        enqueue_choice(&mut state, choice(&["x"]));
        reset_story_state(&mut state);
        assert_eq!(state.rng_state, Some(42));
        assert!(state.bookmark.is_none());
        assert!(state.choices.is_empty());
        assert!(state.variables.is_empty());
        assert!(!is_paused(&state));
    }
}
