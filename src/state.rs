//! Session state
//!
//! A [`Session`] is the complete record of one game in one chat. It is
//! mutated in place by the operations defined in [`crate::registration`],
//! [`crate::answers`] and the round orchestration, and replaced by a fresh
//! value when the game is reset.

use std::{
    collections::BTreeMap,
    hash::{Hash, Hasher},
    time::Duration,
};

use rustrict::CensorStr;
use serde::{Deserialize, Serialize};
use web_time::SystemTime;

use crate::{
    constants::registration::{MAX_NAME_LENGTH, REGISTRATION_WINDOW},
    error::{Error, StateError},
    ids::{EpochId, SessionId, Ticket, UserId},
    persistence::AnswerRow,
    question::QuestionRecord,
    scoring::{Outcome, Tally},
    settings::Settings,
};

/// Lifecycle phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Phase {
    /// No game is being prepared
    #[default]
    Idle,
    /// The admin is choosing settings
    ConfiguringSettings,
    /// The admin is choosing a theme
    AwaitingTheme,
    /// Participants may join
    Registering,
    /// Team mode is waiting for the admin to pick a captain
    AwaitingCaptain,
    /// A question is being obtained from the supplier
    AskingQuestion,
    /// A question is open for answers
    AwaitingAnswer,
    /// The supplier is judging the round's answers
    ReviewingRound,
    /// A round ended and the admin may start the next one
    RoundFinished,
    /// The supplier failed and the admin may retry
    SupplierFailed,
    /// The game ended and waits to be acknowledged
    GameFinished,
}

impl Phase {
    /// Returns whether rounds are being played
    pub fn is_playing(self) -> bool {
        matches!(
            self,
            Phase::AskingQuestion
                | Phase::AwaitingAnswer
                | Phase::ReviewingRound
                | Phase::RoundFinished
                | Phase::SupplierFailed
        )
    }
}

/// A registered participant
///
/// Participants are identified by their user id only; the display name is
/// informational and may change between registrations.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Chat user id
    pub user_id: UserId,
    /// Name shown in results
    pub display_name: String,
}

impl Participant {
    /// Creates a participant with a sanitized display name
    ///
    /// The name is trimmed, cut to the maximum length and censored. A name
    /// that is blank afterwards is replaced by the user id.
    pub fn new(user_id: UserId, display_name: &str) -> Self {
        let trimmed: String = rustrict::trim_whitespace(display_name)
            .chars()
            .take(MAX_NAME_LENGTH)
            .collect();
        let display_name = if trimmed.is_empty() {
            format!("#{user_id}")
        } else {
            trimmed.as_str().censor()
        };

        Self {
            user_id,
            display_name,
        }
    }
}

impl PartialEq for Participant {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id
    }
}

impl Hash for Participant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.user_id.hash(state);
    }
}

/// One participant's answer to one question
#[serde_with::serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    /// Who answered
    pub user_id: UserId,
    /// Answer as typed, trimmed; empty when the participant did not answer
    pub raw_text: String,
    /// Whether the answer matches the canonical answer
    pub is_correct: bool,
    /// Time between the question opening and the answer
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub elapsed: Duration,
    /// Whether the answer was correct and within the fast bonus window
    pub fast_bonus: bool,
    /// Explanation attached by a delegated review
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,
}

impl AnswerRecord {
    /// Creates the record stored for a participant who did not answer in time
    pub fn missed(user_id: UserId, elapsed: Duration) -> Self {
        Self {
            user_id,
            raw_text: String::new(),
            is_correct: false,
            elapsed,
            fast_bonus: false,
            review: None,
        }
    }

    /// Classifies the record
    pub fn outcome(&self) -> Outcome {
        if self.is_correct {
            Outcome::Correct
        } else if self.raw_text.is_empty() {
            Outcome::Missed
        } else {
            Outcome::Incorrect
        }
    }
}

/// The question currently open for answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenQuestion {
    /// Epoch every answer and timer for this question must present
    pub epoch: EpochId,
    /// The question itself
    pub record: QuestionRecord,
    /// When the question was presented
    pub opened_at: SystemTime,
}

/// What a participant sees of the open question
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionView {
    /// Epoch answers must present
    pub epoch: EpochId,
    /// Question text
    pub text: String,
    /// Round number, starting at one
    pub round: usize,
    /// Question index within the round, starting at zero
    pub index: usize,
    /// Whole seconds until the question times out
    pub seconds_remaining: u64,
}

/// The complete state of one game in one chat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) phase: Phase,
    pub(crate) settings: Settings,
    pub(crate) participants: BTreeMap<UserId, Participant>,
    pub(crate) captain: Option<UserId>,
    pub(crate) admin: Option<UserId>,
    /// Round number, starting at one once the game starts
    pub(crate) current_round: usize,
    /// Number of finalized questions in the current round
    pub(crate) question_index: usize,
    pub(crate) current_question: Option<OpenQuestion>,
    pub(crate) answers: BTreeMap<UserId, AnswerRecord>,
    pub(crate) answer_history: BTreeMap<usize, BTreeMap<UserId, AnswerRecord>>,
    /// Questions presented in the current round, in order
    pub(crate) round_questions: Vec<QuestionRecord>,
    pub(crate) total_score: u64,
    pub(crate) total_fast_bonus: u64,
    pub(crate) individual_totals: BTreeMap<UserId, Tally>,
    pub(crate) is_generating_question: bool,
    pub(crate) generation_ticket: Option<Ticket>,
    pub(crate) prefetched_question: Option<QuestionRecord>,
    pub(crate) review_ticket: Option<Ticket>,
    pub(crate) registration_epoch: Option<EpochId>,
    /// How long registration stays open
    pub(crate) registration_window: Duration,
    /// Dedup keys of every question presented in this game
    pub(crate) asked_texts: Vec<String>,
    /// Every answer of the finished rounds, for persistence
    pub(crate) answer_rows: Vec<AnswerRow>,
}

impl Session {
    /// Creates an idle session for the given chat
    pub fn new(id: SessionId) -> Self {
        Self::with_registration_window(id, Duration::from_secs(REGISTRATION_WINDOW))
    }

    /// Creates an idle session whose registration stays open for `window`
    pub fn with_registration_window(id: SessionId, window: Duration) -> Self {
        Self {
            id,
            phase: Phase::Idle,
            settings: Settings::default(),
            participants: BTreeMap::new(),
            captain: None,
            admin: None,
            current_round: 0,
            question_index: 0,
            current_question: None,
            answers: BTreeMap::new(),
            answer_history: BTreeMap::new(),
            round_questions: Vec::new(),
            total_score: 0,
            total_fast_bonus: 0,
            individual_totals: BTreeMap::new(),
            is_generating_question: false,
            generation_ticket: None,
            prefetched_question: None,
            review_ticket: None,
            registration_epoch: None,
            registration_window: window,
            asked_texts: Vec::new(),
            answer_rows: Vec::new(),
        }
    }

    /// Chat the session belongs to
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Settings of the game
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Registered participants, keyed by user id
    pub fn participants(&self) -> &BTreeMap<UserId, Participant> {
        &self.participants
    }

    /// Captain in Team mode
    pub fn captain(&self) -> Option<UserId> {
        self.captain
    }

    /// User who configured the game
    pub fn admin(&self) -> Option<UserId> {
        self.admin
    }

    /// Round number, starting at one once the game starts
    pub fn current_round(&self) -> usize {
        self.current_round
    }

    /// Number of finalized questions in the current round
    pub fn question_index(&self) -> usize {
        self.question_index
    }

    /// Epoch of the open question, if any
    pub fn current_epoch(&self) -> Option<EpochId> {
        self.current_question.as_ref().map(|open| open.epoch)
    }

    /// Answers recorded for the open question
    pub fn answers(&self) -> &BTreeMap<UserId, AnswerRecord> {
        &self.answers
    }

    /// Answers of the finalized questions of the current round, by question index
    pub fn answer_history(&self) -> &BTreeMap<usize, BTreeMap<UserId, AnswerRecord>> {
        &self.answer_history
    }

    /// Team score accumulated over finished rounds
    pub fn total_score(&self) -> u64 {
        self.total_score
    }

    /// Team fast bonus accumulated over finished rounds
    pub fn total_fast_bonus(&self) -> u64 {
        self.total_fast_bonus
    }

    /// Individual scores accumulated over finished rounds
    pub fn individual_totals(&self) -> &BTreeMap<UserId, Tally> {
        &self.individual_totals
    }

    /// Whether a question request is in flight
    pub fn is_generating_question(&self) -> bool {
        self.is_generating_question
    }

    /// Question generated ahead of time, if any
    pub fn prefetched_question(&self) -> Option<&QuestionRecord> {
        self.prefetched_question.as_ref()
    }

    /// Returns the open question as participants see it
    ///
    /// # Arguments
    ///
    /// * `now` - Current time, used for the remaining seconds
    pub fn question_view(&self, now: SystemTime) -> Option<QuestionView> {
        let open = self.current_question.as_ref()?;
        let elapsed = now.duration_since(open.opened_at).unwrap_or_default();
        let remaining = self.settings.time_per_question.saturating_sub(elapsed);

        Some(QuestionView {
            epoch: open.epoch,
            text: open.record.text.clone(),
            round: self.current_round,
            index: self.question_index,
            seconds_remaining: remaining.as_secs(),
        })
    }

    /// Display name of a user, falling back to the id for users who left
    pub(crate) fn display_name(&self, user_id: UserId) -> String {
        self.participants
            .get(&user_id)
            .map_or_else(|| format!("#{user_id}"), |p| p.display_name.clone())
    }

    pub(crate) fn require_admin(&self, user_id: UserId) -> Result<(), Error> {
        if self.admin == Some(user_id) {
            Ok(())
        } else {
            Err(Error::Forbidden(user_id))
        }
    }

    pub(crate) fn expect_phase(&self, phase: Phase) -> Result<(), StateError> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(StateError::WrongPhase(self.phase))
        }
    }
}
