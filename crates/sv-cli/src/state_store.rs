use std::io::ErrorKind;
use std::path::Path;

use sv_api::{parse_state_json, serialize_state};
use sv_core::{SessionState, StoryError};

use crate::error_map::map_error;

pub(crate) async fn load_session_state(path: &str) -> Result<SessionState, StoryError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            return Err(StoryError::new(
                "CLI_STATE_NOT_FOUND",
                format!("State file not found: {}", path),
            ))
        }
        Err(error) => return Err(map_error("CLI_STATE_READ", error)),
    };
    parse_state_json(&raw).map_err(|error| map_error("CLI_STATE_INVALID", error.message))
}

pub(crate) async fn save_session_state(path: &str, state: &SessionState) -> Result<(), StoryError> {
    let text = serialize_state(state)?;
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| map_error("CLI_STATE_WRITE", error))?;
        }
    }
    tokio::fs::write(path, text)
        .await
        .map_err(|error| map_error("CLI_STATE_WRITE", error))
}
