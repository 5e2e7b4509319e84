//! Questions as received from a supplier and as used by a session
//!
//! Suppliers are unreliable: entries may miss fields, use alternative keys,
//! or carry values that are too long. [`RawQuestion`] accepts whatever shape
//! arrives and [`QuestionRecord::try_from`] is the single place where an entry
//! is accepted or dropped.

use garde::Validate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    constants::{question::*, quality},
    scoring,
    settings::Difficulty,
};

/// Question payload exactly as a supplier produced it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawQuestion {
    /// Question text
    #[serde(default, alias = "text", alias = "question_text")]
    pub question: Option<String>,
    /// Expected answer
    #[serde(default, alias = "correct_answer")]
    pub answer: Option<String>,
    /// Explanation shown after the question closes
    #[serde(default)]
    pub explanation: Option<String>,
    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Difficulty label, if the supplier reported one
    #[serde(default)]
    pub difficulty: Option<String>,
}

impl RawQuestion {
    /// Creates a complete raw entry with the given text and answer
    pub fn new(question: &str, answer: &str) -> Self {
        Self {
            question: Some(question.to_owned()),
            answer: Some(answer.to_owned()),
            ..Self::default()
        }
    }
}

/// Reasons a supplier entry is dropped
#[derive(Error, Serialize, Debug, Clone, PartialEq, Eq)]
pub enum InvalidQuestion {
    /// The entry has no question text
    #[error("question text is missing")]
    MissingText,
    /// The entry has no answer
    #[error("answer is missing")]
    MissingAnswer,
    /// The entry violates a length limit
    #[error("question is invalid: {0}")]
    Invalid(String),
}

/// A validated question ready to be presented
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct QuestionRecord {
    /// Question text
    #[garde(length(chars, min = 1, max = MAX_TEXT_LENGTH))]
    pub text: String,
    /// Answer that responses are scored against
    #[garde(length(chars, min = 1, max = MAX_ANSWER_LENGTH))]
    pub canonical_answer: String,
    /// Explanation shown after the question closes, possibly empty
    #[garde(length(chars, max = MAX_EXPLANATION_LENGTH))]
    pub explanation: String,
    /// Free-form tags
    #[garde(length(max = MAX_TAG_COUNT))]
    pub tags: Vec<String>,
    /// Difficulty reported by the supplier
    #[garde(skip)]
    pub difficulty: Option<Difficulty>,
}

impl QuestionRecord {
    /// Creates a question without tags or difficulty
    pub fn new(text: &str, canonical_answer: &str, explanation: &str) -> Self {
        Self {
            text: text.to_owned(),
            canonical_answer: canonical_answer.to_owned(),
            explanation: explanation.to_owned(),
            tags: Vec::new(),
            difficulty: None,
        }
    }

    /// Key used to recognize a question that was already asked
    pub fn dedup_key(&self) -> String {
        scoring::normalize(&self.text)
    }

    /// Rates how well the question is suited for a timed quiz
    pub fn quality(&self) -> Quality {
        let words = lowercase_words(&self.text);
        let padded = format!(" {} ", words.join(" "));
        let mentions = |phrases: &[&str]| {
            phrases
                .iter()
                .any(|phrase| padded.contains(&format!(" {phrase} ")))
        };

        let mut issues = Vec::new();
        if mentions(quality::AMBIGUOUS_WORDS) {
            issues.push(QualityIssue::Ambiguous);
        }
        if is_vague_answer(&self.canonical_answer) {
            issues.push(QualityIssue::VagueAnswer);
        }
        if mentions(quality::SUBJECTIVE_WORDS) {
            issues.push(QualityIssue::Subjective);
        }
        if mentions(quality::DATE_WORDS) {
            issues.push(QualityIssue::TimeSensitive);
        }
        let repeats = words
            .windows(2)
            .any(|pair| pair[0] == pair[1] && pair[0].chars().count() > 2);
        if repeats || self.text.contains("  ") {
            issues.push(QualityIssue::Repetition);
        }
        if words.len() > quality::MAX_WORDS {
            issues.push(QualityIssue::TooLong);
        }
        if !self.text.ends_with('?') {
            issues.push(QualityIssue::NotAQuestion);
        }

        let penalty: u8 = issues.iter().map(|issue| issue.penalty()).sum();
        let mut score = quality::MAX_SCORE.saturating_sub(penalty);
        if self.explanation.chars().count() > quality::MIN_EXPLANATION_LENGTH {
            score = (score + 1).min(quality::MAX_SCORE);
        }

        Quality {
            score: score.max(quality::MIN_SCORE),
            issues,
        }
    }
}

/// Problems that make a question a poor fit for a quiz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QualityIssue {
    /// Hedging wording admits several answers
    Ambiguous,
    /// The answer is too short or too generic to judge
    VagueAnswer,
    /// The question asks for an opinion
    Subjective,
    /// The answer depends on when the question is asked
    TimeSensitive,
    /// Repeated words or doubled spaces
    Repetition,
    /// Too many words to read within the time limit
    TooLong,
    /// The text does not end with a question mark
    NotAQuestion,
}

impl QualityIssue {
    fn penalty(self) -> u8 {
        match self {
            Self::Subjective => 4,
            Self::Ambiguous => 3,
            Self::VagueAnswer => 2,
            Self::TimeSensitive | Self::Repetition | Self::TooLong | Self::NotAQuestion => 1,
        }
    }
}

/// Outcome of [`QuestionRecord::quality`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quality {
    pub score: u8,
    pub issues: Vec<QualityIssue>,
}

impl Quality {
    pub fn is_acceptable(&self) -> bool {
        self.score >= quality::ACCEPT_SCORE
    }
}

fn lowercase_words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|word| !word.is_empty())
        .map(str::to_owned)
        .collect()
}

// A specific answer is a number, a proper name or more than one word.
fn is_vague_answer(answer: &str) -> bool {
    let specific = answer.chars().any(|c| c.is_ascii_digit() || c.is_uppercase())
        || answer.split_whitespace().count() > 1;
    answer.chars().count() < 2 || !specific
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_difficulty(label: &str) -> Option<Difficulty> {
    match label.trim().to_lowercase().as_str() {
        "easy" => Some(Difficulty::Easy),
        "medium" => Some(Difficulty::Medium),
        "hard" => Some(Difficulty::Hard),
        _ => None,
    }
}

impl TryFrom<RawQuestion> for QuestionRecord {
    type Error = InvalidQuestion;

    /// Validates a supplier entry
    ///
    /// Text fields are trimmed, blank tags are removed and an unknown
    /// difficulty label is ignored rather than rejected.
    ///
    /// # Errors
    ///
    /// * `InvalidQuestion::MissingText` - No non-blank question text
    /// * `InvalidQuestion::MissingAnswer` - No non-blank answer
    /// * `InvalidQuestion::Invalid` - A length limit is violated
    fn try_from(raw: RawQuestion) -> Result<Self, Self::Error> {
        let text = non_empty(raw.question).ok_or(InvalidQuestion::MissingText)?;
        let canonical_answer = non_empty(raw.answer).ok_or(InvalidQuestion::MissingAnswer)?;

        let record = QuestionRecord {
            text,
            canonical_answer,
            explanation: non_empty(raw.explanation).unwrap_or_default(),
            tags: raw
                .tags
                .into_iter()
                .filter_map(|tag| non_empty(Some(tag)))
                .collect(),
            difficulty: raw.difficulty.as_deref().and_then(parse_difficulty),
        };

        record
            .validate()
            .map_err(|report| InvalidQuestion::Invalid(report.to_string()))?;

        Ok(record)
    }
}
