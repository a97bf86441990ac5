use std::fmt::Display;

use sv_core::StoryError;

pub(crate) fn map_error(code: &str, error: impl Display) -> StoryError {
    StoryError::new(code, error.to_string())
}

pub(crate) fn json_string(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

pub(crate) fn error_lines(error: &StoryError) -> Vec<String> {
    vec![
        "RESULT:ERROR".to_string(),
        format!("ERROR_CODE:{}", error.code),
        format!("ERROR_MSG_JSON:{}", json_string(&error.message)),
    ]
}

pub(crate) fn emit_error(error: &StoryError) -> i32 {
    for line in error_lines(error) {
        println!("{}", line);
    }
    1
}
