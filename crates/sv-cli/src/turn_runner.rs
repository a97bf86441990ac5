use sv_api::{create_engine_from_json, parse_run_config, CreateEngineFromJsonOptions};
use sv_core::{SessionState, StoryError, UserInput};
use sv_runtime::TurnResult;
use tracing::{debug, info};

use crate::cli_args::TurnArgs;
use crate::error_map::{json_string, map_error};
use crate::state_store::{load_session_state, save_session_state};

pub(crate) async fn run_turn(args: TurnArgs) -> Result<i32, StoryError> {
    let story_json = tokio::fs::read_to_string(&args.story)
        .await
        .map_err(|error| map_error("CLI_STORY_READ", format!("{}: {}", args.story, error)))?;

    let mut options = CreateEngineFromJsonOptions::new(story_json);
    if let Some(path) = &args.config {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|error| map_error("CLI_CONFIG_READ", format!("{}: {}", path, error)))?;
        options.config = parse_run_config(&raw)?;
    }
    let engine = create_engine_from_json(options)?;

    let state = match &args.state_in {
        Some(path) => load_session_state(path).await?,
        None => SessionState::default(),
    };
    let input = build_input(&args);
    debug!(bookmark = ?state.bookmark, intent = ?input.intent, "running turn");

    let result = engine.advance_turn(input, &state).await?;
    save_session_state(&args.state_out, &result.state).await?;
    info!(visited = result.visited_scenes.len(), "turn finished");

    for line in turn_lines(&result, &args.state_out) {
        println!("{}", line);
    }
    Ok(0)
}

pub(crate) fn build_input(args: &TurnArgs) -> UserInput {
    let mut input = UserInput {
        intent: args.intent.clone(),
        slots: Vec::new(),
        value: args.utterance.clone(),
    };
    for (name, value) in &args.slots {
        input = input.with_slot(name.as_str(), value.as_str());
    }
    input
}

pub(crate) fn turn_lines(result: &TurnResult, state_out: &str) -> Vec<String> {
    let visited = serde_json::Value::Array(
        result
            .visited_scenes
            .iter()
            .map(|id| serde_json::Value::String(id.clone()))
            .collect(),
    );
    let mut lines = vec![
        "RESULT:OK".to_string(),
        format!("SPEECH_JSON:{}", json_string(&result.speech)),
        format!("REPROMPT_JSON:{}", json_string(&result.reprompt)),
        format!("PREVIEW_JSON:{}", json_string(&result.preview)),
        format!("VISITED_JSON:{}", visited),
        format!("ENDING:{}", result.ending_reached),
        format!("UNHANDLED:{}", result.unhandled_choice),
    ];
    if let Some(message) = &result.error_message {
        lines.push(format!("AUDIO_ERROR_JSON:{}", json_string(message)));
    }
    lines.push(format!("STATE_OUT:{}", state_out));
    lines
}
