//! Game settings chosen by the session admin
//!
//! Settings are submitted as a whole and validated with `garde` before the
//! session accepts them. Durations travel as whole seconds.

use std::time::Duration;

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::constants::settings::*;

type ValidationResult = garde::Result;

/// How participants answer questions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// A single captain answers on behalf of everyone
    #[default]
    Team,
    /// Every participant answers on their own
    Individual,
}

/// Difficulty requested from the question supplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// Easy questions
    Easy,
    /// Medium questions
    #[default]
    Medium,
    /// Hard questions
    Hard,
}

/// Validates that a duration lies within `[MIN_SECONDS, MAX_SECONDS]`
///
/// # Arguments
///
/// * `val` - The `Duration` to validate.
/// * `_ctx` - Unused validation context.
///
/// # Errors
///
/// Returns a `garde::Error` when the whole seconds fall outside the bounds.
pub fn validate_duration<const MIN_SECONDS: u64, const MAX_SECONDS: u64>(
    val: &Duration,
    _ctx: &(),
) -> ValidationResult {
    if (MIN_SECONDS..=MAX_SECONDS).contains(&val.as_secs()) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "outside of bounds [{MIN_SECONDS},{MAX_SECONDS}]",
        )))
    }
}

fn default_language() -> String {
    "ru".to_owned()
}

/// Settings of one game
#[serde_with::serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Settings {
    /// Team or individual play
    #[garde(skip)]
    #[serde(default)]
    pub mode: Mode,
    /// Difficulty of generated questions
    #[garde(skip)]
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Number of rounds
    #[garde(range(min = MIN_ROUNDS, max = MAX_ROUNDS))]
    pub rounds: usize,
    /// Number of questions in each round
    #[garde(range(min = MIN_QUESTIONS_PER_ROUND, max = MAX_QUESTIONS_PER_ROUND))]
    pub questions_per_round: usize,
    /// Time allowed for each question
    #[garde(custom(validate_duration::<MIN_TIME_PER_QUESTION, MAX_TIME_PER_QUESTION>))]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub time_per_question: Duration,
    /// Theme of the questions, chosen after the other settings
    #[garde(length(chars, max = MAX_THEME_LENGTH))]
    #[serde(default)]
    pub theme: String,
    /// Language the supplier should generate in
    #[garde(length(chars, min = 1, max = MAX_LANGUAGE_LENGTH))]
    #[serde(default = "default_language")]
    pub language: String,
    /// Ask the supplier to judge the round's answers before totals are computed
    #[garde(skip)]
    #[serde(default)]
    pub delegated_review: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            difficulty: Difficulty::default(),
            rounds: DEFAULT_ROUNDS,
            questions_per_round: DEFAULT_QUESTIONS_PER_ROUND,
            time_per_question: Duration::from_secs(DEFAULT_TIME_PER_QUESTION),
            theme: String::new(),
            language: default_language(),
            delegated_review: false,
        }
    }
}

impl Settings {
    /// Returns the window in which a correct answer earns the fast bonus
    ///
    /// The window is a fixed share of the question time, rounded down to
    /// whole seconds and never shorter than one second.
    ///
    /// # Returns
    ///
    /// `max(1, floor(time_per_question * 0.2))` seconds
    pub fn fast_bonus_window(&self) -> Duration {
        let seconds = (self.time_per_question.as_secs_f64()
            * crate::constants::scoring::FAST_BONUS_FRACTION)
            .floor() as u64;
        Duration::from_secs(seconds.max(1))
    }

    /// Returns whether the question after `question_index` of `round` is the last one of the game
    pub fn is_last_question(&self, round: usize, question_index: usize) -> bool {
        round >= self.rounds && question_index + 1 >= self.questions_per_round
    }
}
