//! Answer scoring
//!
//! Free-text answers from people carry typos, case differences and
//! inflections, so correctness is judged by a tiered fuzzy match rather than
//! plain equality. All functions here are pure.

use std::{collections::BTreeMap, ops::AddAssign, time::Duration};

use enum_map::{Enum, EnumMap};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    constants::scoring::{MIN_FUZZY_LENGTH, SIMILARITY_THRESHOLD},
    ids::UserId,
    question::QuestionRecord,
    settings::Mode,
    state::AnswerRecord,
};

/// Letters that are written interchangeably and compare as equal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Equivalences(Vec<(char, char)>);

impl Equivalences {
    /// Creates a table that folds the first letter of each pair into the second
    pub fn new(pairs: Vec<(char, char)>) -> Self {
        Self(pairs)
    }

    /// Table for answers in the given language
    ///
    /// Cyrillic folds are always included since chats mix scripts. Languages
    /// written with diacritics add folds to the plain letters.
    pub fn for_language(language: &str) -> Self {
        let mut pairs = Self::default().0;
        let extra: &[(char, char)] = match language.trim().to_lowercase().as_str() {
            "de" => &[('ä', 'a'), ('ö', 'o'), ('ü', 'u')],
            "fr" => &[
                ('à', 'a'),
                ('â', 'a'),
                ('ç', 'c'),
                ('é', 'e'),
                ('è', 'e'),
                ('ê', 'e'),
                ('ë', 'e'),
                ('î', 'i'),
                ('ï', 'i'),
                ('ô', 'o'),
                ('ù', 'u'),
                ('û', 'u'),
            ],
            "es" => &[
                ('á', 'a'),
                ('é', 'e'),
                ('í', 'i'),
                ('ñ', 'n'),
                ('ó', 'o'),
                ('ú', 'u'),
                ('ü', 'u'),
            ],
            _ => &[],
        };
        pairs.extend_from_slice(extra);
        Self(pairs)
    }

    fn fold(&self, c: char) -> char {
        self.0
            .iter()
            .find_map(|&(from, to)| (from == c).then_some(to))
            .unwrap_or(c)
    }
}

impl Default for Equivalences {
    fn default() -> Self {
        Self(vec![('ё', 'е'), ('й', 'и')])
    }
}

/// Normalizes text with the default equivalence table
pub fn normalize(text: &str) -> String {
    normalize_with(text, &Equivalences::default())
}

/// Normalizes text for comparison
///
/// The text is lowercased, equivalent letters are folded, punctuation at
/// both ends is removed and inner whitespace is collapsed to single spaces.
///
/// # Arguments
///
/// * `text` - Text to normalize
/// * `equivalences` - Letters to fold
///
/// # Returns
///
/// The normalized text
pub fn normalize_with(text: &str, equivalences: &Equivalences) -> String {
    let folded: String = text
        .to_lowercase()
        .chars()
        .map(|c| equivalences.fold(c))
        .collect();

    folded
        .trim_matches(|c: char| !c.is_alphanumeric())
        .split_whitespace()
        .join(" ")
}

/// Similarity ratio of two strings in `[0, 1]`
///
/// Computed as twice the length of the longest common subsequence of
/// characters divided by the total number of characters.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = a.chars().collect_vec();
    let b = b.chars().collect_vec();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }

    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for &x in &a {
        for (j, &y) in b.iter().enumerate() {
            current[j + 1] = if x == y {
                previous[j] + 1
            } else {
                previous[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    let common = previous[b.len()];

    (2 * common) as f64 / (a.len() + b.len()) as f64
}

fn tokens(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect()
}

fn token_matches(token: &str, other: &str) -> bool {
    if token == other {
        return true;
    }
    if token.chars().count() < MIN_FUZZY_LENGTH || other.chars().count() < MIN_FUZZY_LENGTH {
        return false;
    }
    other.contains(token) || token.contains(other) || similarity(token, other) >= SIMILARITY_THRESHOLD
}

fn covered_by(side: &[&str], other: &[&str]) -> bool {
    !side.is_empty()
        && side
            .iter()
            .all(|token| other.iter().any(|candidate| token_matches(token, candidate)))
}

/// Judges an answer with the default equivalence table
pub fn is_correct(answer: &str, canonical: &str) -> bool {
    is_correct_with(answer, canonical, &Equivalences::default())
}

/// Judges whether an answer matches the canonical answer
///
/// The tiers are tried in order:
/// 1. equal after normalization
/// 2. either side shorter than three characters: incorrect
/// 3. similarity ratio of at least 0.85
/// 4. one side contains the other
/// 5. every token of one side matches a token of the other
///
/// # Arguments
///
/// * `answer` - Answer as typed by the participant
/// * `canonical` - Expected answer
/// * `equivalences` - Letters compared as equal
pub fn is_correct_with(answer: &str, canonical: &str, equivalences: &Equivalences) -> bool {
    let answer = normalize_with(answer, equivalences);
    let canonical = normalize_with(canonical, equivalences);

    if answer == canonical {
        return true;
    }
    if answer.chars().count() < MIN_FUZZY_LENGTH || canonical.chars().count() < MIN_FUZZY_LENGTH
    {
        return false;
    }
    if similarity(&answer, &canonical) >= SIMILARITY_THRESHOLD {
        return true;
    }
    if answer.contains(&canonical) || canonical.contains(&answer) {
        return true;
    }

    let answer_tokens = tokens(&answer);
    let canonical_tokens = tokens(&canonical);
    covered_by(&answer_tokens, &canonical_tokens) || covered_by(&canonical_tokens, &answer_tokens)
}

/// Whether an answer given after `elapsed` is inside the fast bonus `window`
pub fn fast_bonus_eligible(elapsed: Duration, window: Duration) -> bool {
    elapsed <= window
}

/// Classification of a single answer record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, Serialize, Deserialize)]
pub enum Outcome {
    /// The answer was correct
    Correct,
    /// The answer was wrong
    Incorrect,
    /// No answer was given in time
    Missed,
}

/// Correct answers and fast bonuses of a team or participant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Number of correct answers
    pub correct: u64,
    /// Number of fast bonuses
    pub fast_bonus: u64,
}

impl Tally {
    /// Total points: one per correct answer plus one per fast bonus
    pub fn points(&self) -> u64 {
        self.correct + self.fast_bonus
    }

    fn count(&mut self, record: &AnswerRecord) {
        if record.is_correct {
            self.correct += 1;
            if record.fast_bonus {
                self.fast_bonus += 1;
            }
        }
    }
}

impl AddAssign for Tally {
    fn add_assign(&mut self, other: Self) {
        self.correct += other.correct;
        self.fast_bonus += other.fast_bonus;
    }
}

/// Mode specific totals of one round
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Totals {
    /// One counter shared by the team
    Team(Tally),
    /// One counter per participant that has records in the round
    Individual(BTreeMap<UserId, Tally>),
}

/// Result of scoring one round
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundTotals {
    /// Number of questions asked in the round
    pub questions: usize,
    /// Counters for the mode
    pub totals: Totals,
    /// Outcome counts per question, in question order
    pub outcomes: Vec<EnumMap<Outcome, usize>>,
}

/// Scores a finished round
///
/// In Team mode a question counts once when any of its records is correct,
/// and earns the bonus when a correct record was fast. In Individual mode
/// each participant is credited only from their own records.
///
/// # Arguments
///
/// * `history` - Answers of each question, keyed by question index
/// * `questions` - Questions asked in the round
/// * `mode` - Team or Individual
pub fn compute_round_totals(
    history: &BTreeMap<usize, BTreeMap<UserId, AnswerRecord>>,
    questions: &[QuestionRecord],
    mode: Mode,
) -> RoundTotals {
    let outcomes = (0..questions.len())
        .map(|index| {
            let mut counts = EnumMap::default();
            for record in history.get(&index).into_iter().flat_map(BTreeMap::values) {
                counts[record.outcome()] += 1;
            }
            counts
        })
        .collect_vec();

    let totals = match mode {
        Mode::Team => {
            let mut tally = Tally::default();
            for answers in history.values() {
                if answers.values().any(|record| record.is_correct) {
                    tally.correct += 1;
                }
                if answers
                    .values()
                    .any(|record| record.is_correct && record.fast_bonus)
                {
                    tally.fast_bonus += 1;
                }
            }
            Totals::Team(tally)
        }
        Mode::Individual => {
            let mut tallies: BTreeMap<UserId, Tally> = BTreeMap::new();
            for record in history.values().flat_map(BTreeMap::values) {
                tallies.entry(record.user_id).or_default().count(record);
            }
            Totals::Individual(tallies)
        }
    };

    RoundTotals {
        questions: questions.len(),
        totals,
        outcomes,
    }
}
