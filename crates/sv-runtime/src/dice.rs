use std::sync::OnceLock;

use regex::{Captures, Regex};
use sv_core::{format_number, StoryError};

use crate::expr::{evaluate, NoVariables};

pub const ROLL_RESULT_VARIABLE: &str = "rollResult";
const MAX_DICE: u32 = 1000;

/// Source of single die results.
pub trait DieRoller {
    /// One roll of a die with `faces` sides.
    fn roll(&mut self, faces: u32) -> f64;
}

/// Always yields the die's arithmetic mean; used for reproducible tests.
pub struct MeanRoller;

impl DieRoller for MeanRoller {
    fn roll(&mut self, faces: u32) -> f64 {
        (f64::from(faces) + 1.0) / 2.0
    }
}

fn dice_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(\d*)d(\d+)(?:k(\d+))?\b").expect("dice regex must compile")
    })
}

/// Rolls every `<count>d<faces>[k<keep>]` token, substitutes the sums and
/// evaluates the remaining arithmetic.
pub fn roll_expression(expression: &str, roller: &mut dyn DieRoller) -> Result<f64, StoryError> {
    let mut failure = None;
    let substituted = dice_pattern().replace_all(expression, |captures: &Captures<'_>| {
        match roll_token(captures, roller) {
            Ok(sum) => format_number(sum),
            Err(error) => {
                failure.get_or_insert(error);
                "0".to_string()
            }
        }
    });
    if let Some(error) = failure {
        return Err(error);
    }

    let value = evaluate(&substituted, &NoVariables).map_err(|error| {
        StoryError::new(
            "DICE_INVALID",
            format!("Roll \"{}\" is not arithmetic: {}", expression, error.message),
        )
    })?;
    value.as_number().ok_or_else(|| {
        StoryError::new(
            "DICE_INVALID",
            format!("Roll \"{}\" did not produce a number.", expression),
        )
    })
}

fn roll_token(captures: &Captures<'_>, roller: &mut dyn DieRoller) -> Result<f64, StoryError> {
    let token = &captures[0];
    let count = match captures.get(1).map(|count| count.as_str()) {
        None | Some("") => 1,
        Some(raw) => parse_count(raw, token)?,
    };
    let faces = parse_count(&captures[2], token)?;
    if faces == 0 || count == 0 || count > MAX_DICE {
        return Err(StoryError::new(
            "DICE_INVALID",
            format!("Dice token \"{}\" is out of range.", token),
        ));
    }

    let mut rolls = (0..count).map(|_| roller.roll(faces)).collect::<Vec<_>>();
    if let Some(keep) = captures.get(3) {
        let keep = parse_count(keep.as_str(), token)? as usize;
        rolls.sort_by(|a, b| b.total_cmp(a));
        rolls.truncate(keep);
    }
    Ok(rolls.iter().sum())
}

fn parse_count(raw: &str, token: &str) -> Result<u32, StoryError> {
    raw.parse::<u32>().map_err(|_| {
        StoryError::new(
            "DICE_INVALID",
            format!("Dice token \"{}\" has an invalid number.", token),
        )
    })
}

#[cfg(test)]
mod dice_tests {
    use super::*;

    /// Hands out a fixed sequence of results, then repeats the last one.
    struct SequenceRoller {
        values: Vec<f64>,
        index: usize,
    }

    impl DieRoller for SequenceRoller {
        fn roll(&mut self, _faces: u32) -> f64 {
            let value = self.values[self.index.min(self.values.len() - 1)];
            self.index += 1;
            value
        }
    }

    #[test]
    fn mean_roll_keeps_highest() {
        assert_eq!(roll_expression("2d6k1", &mut MeanRoller).expect("roll"), 3.5);
        assert_eq!(roll_expression("2d6", &mut MeanRoller).expect("roll"), 7.0);
    }

    #[test]
    fn keep_selects_the_highest_rolls() {
        let mut roller = SequenceRoller {
            values: vec![2.0, 6.0, 4.0, 1.0],
            index: 0,
        };
        assert_eq!(roll_expression("4d6k2 + 1", &mut roller).expect("roll"), 11.0);
    }

    #[test]
    fn tokens_substitute_into_arithmetic() {
        let mut roller = SequenceRoller {
            values: vec![3.0, 5.0],
            index: 0,
        };
        assert_eq!(roll_expression("d20 * 2 - 1d4", &mut roller).expect("roll"), 1.0);
    }

    #[test]
    fn invalid_rolls_report_dice_errors() {
        assert_eq!(
            roll_expression("2d0", &mut MeanRoller).expect_err("zero faces").code,
            "DICE_INVALID"
        );
        assert_eq!(
            roll_expression("2d6 +", &mut MeanRoller).expect_err("dangling").code,
            "DICE_INVALID"
        );
        assert_eq!(
            roll_expression("\"x\"", &mut MeanRoller).expect_err("not number").code,
            "DICE_INVALID"
        );
    }
}
