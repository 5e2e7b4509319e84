//! Configuration constants for quiz sessions
//!
//! This module contains the limits and tuning values used throughout the
//! session engine, grouped by the component that enforces them.

/// Limits on the settings an admin can choose
pub mod settings {
    /// Minimum number of rounds in a game
    pub const MIN_ROUNDS: usize = 1;
    /// Maximum number of rounds in a game
    pub const MAX_ROUNDS: usize = 5;
    /// Minimum number of questions asked in one round
    pub const MIN_QUESTIONS_PER_ROUND: usize = 1;
    /// Maximum number of questions asked in one round
    pub const MAX_QUESTIONS_PER_ROUND: usize = 10;
    /// Minimum time in seconds allowed for a single question
    pub const MIN_TIME_PER_QUESTION: u64 = 5;
    /// Maximum time in seconds allowed for a single question
    pub const MAX_TIME_PER_QUESTION: u64 = 600;
    /// Maximum length of a theme in characters
    pub const MAX_THEME_LENGTH: usize = 100;
    /// Maximum length of a language tag
    pub const MAX_LANGUAGE_LENGTH: usize = 16;

    /// Rounds used when the admin keeps the defaults
    pub const DEFAULT_ROUNDS: usize = 2;
    /// Questions per round used when the admin keeps the defaults
    pub const DEFAULT_QUESTIONS_PER_ROUND: usize = 2;
    /// Time per question in seconds used when the admin keeps the defaults
    pub const DEFAULT_TIME_PER_QUESTION: u64 = 300;
}

/// Participant registration constants
pub mod registration {
    /// Maximum number of participants in a single session
    pub const MAX_PARTICIPANTS: usize = 100;
    /// Maximum length of a display name in characters
    pub const MAX_NAME_LENGTH: usize = 30;
    /// Number of names included in registration updates
    pub const NAMES_SHOWN: usize = 50;
    /// Seconds the registration stays open before it closes by itself
    pub const REGISTRATION_WINDOW: u64 = 60;
}

/// Scoring constants
pub mod scoring {
    /// Share of the question time that still earns the fast bonus
    pub const FAST_BONUS_FRACTION: f64 = 0.2;
    /// Similarity ratio at which two answers are considered the same
    pub const SIMILARITY_THRESHOLD: f64 = 0.85;
    /// Normalized answers shorter than this are only matched exactly
    pub const MIN_FUZZY_LENGTH: usize = 3;
}

/// Question validation constants
pub mod question {
    /// Maximum length of a question text in characters
    pub const MAX_TEXT_LENGTH: usize = 1000;
    /// Maximum length of a canonical answer in characters
    pub const MAX_ANSWER_LENGTH: usize = 200;
    /// Maximum length of an explanation in characters
    pub const MAX_EXPLANATION_LENGTH: usize = 2000;
    /// Maximum number of tags on a question
    pub const MAX_TAG_COUNT: usize = 10;
}

/// Question quality heuristics
pub mod quality {
    /// Score a question starts from, also the ceiling
    pub const MAX_SCORE: u8 = 10;
    /// Lowest score a question can end up with
    pub const MIN_SCORE: u8 = 1;
    /// Questions scoring below this are discarded
    pub const ACCEPT_SCORE: u8 = 7;
    /// Questions longer than this many words are penalized
    pub const MAX_WORDS: usize = 30;
    /// Explanations longer than this many characters earn a bonus
    pub const MIN_EXPLANATION_LENGTH: usize = 10;

    /// Hedging words that leave more than one defensible answer
    pub const AMBIGUOUS_WORDS: &[&str] = &[
        "может быть",
        "возможно",
        "иногда",
        "часто",
        "обычно",
        "некоторые",
        "многие",
        "несколько",
        "наверное",
        "скорее всего",
        "примерно",
        "около",
        "где-то",
        "как правило",
        "в основном",
        "maybe",
        "perhaps",
        "sometimes",
        "often",
        "usually",
        "some",
        "many",
        "several",
        "probably",
        "approximately",
        "about",
    ];

    /// Words asking for an opinion rather than a fact
    pub const SUBJECTIVE_WORDS: &[&str] = &[
        "любимый",
        "лучший",
        "худший",
        "красивый",
        "важный",
        "интересный",
        "скучный",
        "полезный",
        "вредный",
        "favorite",
        "favourite",
        "best",
        "worst",
        "beautiful",
        "important",
        "interesting",
        "boring",
        "useful",
        "harmful",
    ];

    /// Words tying the answer to the moment the question is asked
    pub const DATE_WORDS: &[&str] = &[
        "сейчас",
        "в настоящее время",
        "сегодня",
        "текущий",
        "современный",
        "на данный момент",
        "ныне",
        "теперь",
        "now",
        "currently",
        "today",
        "current",
        "nowadays",
    ];
}

/// Question supplier constants
pub mod supplier {
    /// Additional generation attempts made to replace unusable questions
    pub const BACKFILL_ATTEMPTS: usize = 2;
    /// Number of previously asked questions per theme excluded from generation
    pub const HISTORY_LIMIT: usize = 50;
    /// Seconds a single supplier call may take before it counts as unavailable
    pub const CALL_TIMEOUT: u64 = 30;
}

/// Countdown warning constants
pub mod countdown {
    /// Seconds remaining at which warnings are sent
    pub const WARNINGS: [u64; 2] = [60, 10];
    /// Questions shorter than or equal to this many seconds get no warnings
    pub const MIN_TIME_FOR_WARNINGS: u64 = 60;
}

/// Answer text configuration constants
pub mod answer_text {
    /// Maximum length of answer text in characters
    pub const MAX_LENGTH: usize = 200;
}
