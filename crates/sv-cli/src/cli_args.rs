use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "sv-cli")]
#[command(about = "Runs one storyvoice turn against files on disk")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Mode,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Mode {
    Turn(TurnArgs),
}

#[derive(Debug, Args)]
pub(crate) struct TurnArgs {
    /// Compiled story: a JSON array of scenes.
    #[arg(long = "story")]
    pub(crate) story: String,
    /// Omit to start a fresh session.
    #[arg(long = "state-in")]
    pub(crate) state_in: Option<String>,
    #[arg(long = "state-out")]
    pub(crate) state_out: String,
    /// JSON with optional `engine` and `audio` sections.
    #[arg(long = "config")]
    pub(crate) config: Option<String>,
    #[arg(long = "intent")]
    pub(crate) intent: Option<String>,
    #[arg(long = "utterance")]
    pub(crate) utterance: Option<String>,
    /// `name=value`; repeatable.
    #[arg(long = "slot", value_parser = parse_slot)]
    pub(crate) slots: Vec<(String, String)>,
}

pub(crate) fn parse_slot(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected name=value, got \"{}\"", raw)),
    }
}
