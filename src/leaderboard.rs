//! Standings and round results
//!
//! Team games have a single standing for the whole team, credited to the
//! captain. Individual games rank every participant by points, then by
//! correct answers, then by user id so the order is stable.

use enum_map::EnumMap;
use itertools::Itertools;
use serde::Serialize;

use super::{
    TruncatedVec,
    constants::registration::NAMES_SHOWN,
    ids::UserId,
    scoring::{Outcome, RoundTotals, Tally, Totals},
    settings::Mode,
    state::{AnswerRecord, Session},
};

/// Position of a team or participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Standing {
    /// Position in the leaderboard (1-indexed)
    pub position: usize,
    /// User credited with the result; the captain in Team mode
    pub user_id: Option<UserId>,
    /// Name shown in the leaderboard
    pub name: String,
    /// Correct answers and fast bonuses
    pub tally: Tally,
    /// Total points
    pub points: u64,
}

/// Snapshot of the standings of a game
#[derive(Debug, Clone, Serialize)]
pub struct Leaderboard {
    /// Mode of the game
    pub mode: Mode,
    /// Standings, best first
    pub standings: TruncatedVec<Standing>,
    /// Best standing, if anyone took part
    pub winner: Option<Standing>,
}

impl Leaderboard {
    /// Returns the user credited with the win
    pub fn winner_id(&self) -> Option<UserId> {
        self.winner.as_ref().and_then(|standing| standing.user_id)
    }
}

/// Result of one question within a round summary
#[derive(Debug, Clone, Serialize)]
pub struct QuestionResult {
    /// Question text
    pub text: String,
    /// Expected answer
    pub canonical_answer: String,
    /// Explanation, possibly empty
    pub explanation: String,
    /// How many answers were correct, incorrect or missing
    pub outcomes: EnumMap<Outcome, usize>,
    /// Every answer to the question
    pub answers: Vec<AnswerRecord>,
}

/// Results of a finished round
#[derive(Debug, Clone, Serialize)]
pub struct RoundSummary {
    /// Round number, starting at one
    pub round: usize,
    /// Number of questions asked
    pub questions: usize,
    /// Per question breakdown
    pub results: Vec<QuestionResult>,
    /// What the round earned: one tally for the team or one per participant
    pub round_standings: Vec<Standing>,
    /// Standings over the whole game so far
    pub leaderboard: Leaderboard,
}

fn rank(entries: impl Iterator<Item = (Option<UserId>, String, Tally)>) -> Vec<Standing> {
    entries
        .sorted_by(|(a_id, _, a), (b_id, _, b)| {
            b.points()
                .cmp(&a.points())
                .then(b.correct.cmp(&a.correct))
                .then(a_id.cmp(b_id))
        })
        .enumerate()
        .map(|(index, (user_id, name, tally))| Standing {
            position: index + 1,
            user_id,
            name,
            tally,
            points: tally.points(),
        })
        .collect_vec()
}

impl Session {
    fn team_name(&self) -> (Option<UserId>, String) {
        match self.captain {
            Some(captain) => (Some(captain), self.display_name(captain)),
            None => (None, String::from("Team")),
        }
    }

    /// Every standing, best first
    pub(crate) fn standings(&self) -> Vec<Standing> {
        match self.settings.mode {
            Mode::Team => {
                let (user_id, name) = self.team_name();
                let tally = Tally {
                    correct: self.total_score,
                    fast_bonus: self.total_fast_bonus,
                };
                rank(std::iter::once((user_id, name, tally)))
            }
            Mode::Individual => rank(
                self.participants
                    .keys()
                    .chain(self.individual_totals.keys())
                    .unique()
                    .map(|user_id| {
                        let tally = self
                            .individual_totals
                            .get(user_id)
                            .copied()
                            .unwrap_or_default();
                        (Some(*user_id), self.display_name(*user_id), tally)
                    }),
            ),
        }
    }

    /// Returns a snapshot of the standings
    ///
    /// Scores of rounds still in progress are not included.
    pub fn leaderboard(&self) -> Leaderboard {
        let standings = self.standings();
        let winner = standings.first().cloned();
        let count = standings.len();

        Leaderboard {
            mode: self.settings.mode,
            standings: TruncatedVec::new(standings.into_iter(), NAMES_SHOWN, count),
            winner,
        }
    }

    /// Builds the summary of the round that was just scored
    ///
    /// # Arguments
    ///
    /// * `totals` - Totals of the round, already added to the game totals
    pub(crate) fn round_summary(&self, totals: &RoundTotals) -> RoundSummary {
        let results = self
            .round_questions
            .iter()
            .enumerate()
            .map(|(index, question)| QuestionResult {
                text: question.text.clone(),
                canonical_answer: question.canonical_answer.clone(),
                explanation: question.explanation.clone(),
                outcomes: totals.outcomes.get(index).copied().unwrap_or_default(),
                answers: self
                    .answer_history
                    .get(&index)
                    .map(|answers| answers.values().cloned().collect_vec())
                    .unwrap_or_default(),
            })
            .collect_vec();

        let round_standings = match &totals.totals {
            Totals::Team(tally) => {
                let (user_id, name) = self.team_name();
                rank(std::iter::once((user_id, name, *tally)))
            }
            Totals::Individual(tallies) => rank(
                tallies
                    .iter()
                    .map(|(user_id, tally)| (Some(*user_id), self.display_name(*user_id), *tally)),
            ),
        };

        RoundSummary {
            round: self.current_round,
            questions: totals.questions,
            results,
            round_standings,
            leaderboard: self.leaderboard(),
        }
    }
}
