//! Persistence boundary
//!
//! Storage is external. The host calls a [`GameRecorder`] to look up the
//! question history of a theme before generating, to remember new questions,
//! and to store finished games. Recorder failures are logged and otherwise
//! ignored; a game never stalls because storage is unavailable.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::RecorderError,
    ids::{GameId, SessionId, UserId},
    leaderboard::Standing,
    settings::{Difficulty, Mode},
    state::Participant,
};

/// One answer of a finished game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRow {
    /// Round number, starting at one
    pub round: usize,
    /// Question index within the round
    pub question_index: usize,
    /// Question text
    pub question: String,
    /// Expected answer
    pub canonical_answer: String,
    /// Who answered
    pub user_id: UserId,
    /// Name at the time of answering
    pub display_name: String,
    /// Answer given, empty when missed
    pub answer: String,
    /// Whether the answer was correct
    pub is_correct: bool,
    /// Whether the answer earned the fast bonus
    pub fast_bonus: bool,
    /// Milliseconds between the question opening and the answer
    pub elapsed_ms: u64,
}

/// Everything stored about a finished game
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameRecord {
    /// Chat the game was played in
    pub session: SessionId,
    /// Theme
    pub theme: String,
    /// Team or Individual
    pub mode: Mode,
    /// Difficulty
    pub difficulty: Difficulty,
    /// Rounds played
    pub rounds: usize,
    /// Questions per round
    pub questions_per_round: usize,
    /// Team score, zero in Individual mode
    pub total_score: u64,
    /// Team fast bonus, zero in Individual mode
    pub total_fast_bonus: u64,
    /// User credited with the win
    pub winner: Option<UserId>,
    /// Final standings with places
    pub standings: Vec<Standing>,
    /// Participants at the end of the game
    pub participants: Vec<Participant>,
    /// Every answer of the game
    pub answers: Vec<AnswerRow>,
}

/// External storage for game history
#[async_trait]
pub trait GameRecorder: Send + Sync {
    /// Stores a finished game and returns its id
    async fn record_game_completion(&self, record: &GameRecord) -> Result<GameId, RecorderError>;

    /// Stores the answers of a finished game
    async fn record_answers(&self, game: GameId, rows: &[AnswerRow]) -> Result<(), RecorderError>;

    /// Returns the texts of the most recent questions of a theme
    async fn recent_question_texts(
        &self,
        theme: &str,
        limit: usize,
    ) -> Result<Vec<String>, RecorderError>;

    /// Remembers a question so later games of the theme avoid it
    async fn remember_question(&self, theme: &str, text: &str) -> Result<(), RecorderError>;
}

#[async_trait]
impl<R: GameRecorder + ?Sized> GameRecorder for Arc<R> {
    async fn record_game_completion(&self, record: &GameRecord) -> Result<GameId, RecorderError> {
        (**self).record_game_completion(record).await
    }

    async fn record_answers(&self, game: GameId, rows: &[AnswerRow]) -> Result<(), RecorderError> {
        (**self).record_answers(game, rows).await
    }

    async fn recent_question_texts(
        &self,
        theme: &str,
        limit: usize,
    ) -> Result<Vec<String>, RecorderError> {
        (**self).recent_question_texts(theme, limit).await
    }

    async fn remember_question(&self, theme: &str, text: &str) -> Result<(), RecorderError> {
        (**self).remember_question(theme, text).await
    }
}

/// Recorder that stores nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

#[async_trait]
impl GameRecorder for NoopRecorder {
    async fn record_game_completion(&self, _record: &GameRecord) -> Result<GameId, RecorderError> {
        Ok(GameId::from(0))
    }

    async fn record_answers(&self, _game: GameId, _rows: &[AnswerRow]) -> Result<(), RecorderError> {
        Ok(())
    }

    async fn recent_question_texts(
        &self,
        _theme: &str,
        _limit: usize,
    ) -> Result<Vec<String>, RecorderError> {
        Ok(Vec::new())
    }

    async fn remember_question(&self, _theme: &str, _text: &str) -> Result<(), RecorderError> {
        Ok(())
    }
}
