//! Answer collection
//!
//! An answer is accepted only for the open epoch, only from a participant,
//! only from the captain in Team mode, and only once per participant. When
//! the last expected answer arrives the question is finalized right away;
//! the pending timeout then finds a different epoch and does nothing.

use serde::Serialize;
use tracing::debug;
use web_time::SystemTime;

use crate::{
    Event, Scheduler,
    constants::answer_text::MAX_LENGTH,
    ids::{EpochId, UserId},
    scoring,
    settings::Mode,
    state::{AnswerRecord, Session},
    tunnel::Tunnel,
};

/// Result of submitting an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubmitOutcome {
    /// The answer was recorded
    Accepted,
    /// The epoch is not the open question's epoch
    RejectedStale,
    /// The user has not joined the game
    RejectedNotParticipant,
    /// Team mode and the user is not the captain
    RejectedWrongRole,
    /// The user already answered this question
    RejectedDuplicate,
}

impl SubmitOutcome {
    /// Whether the answer was recorded
    pub fn is_accepted(self) -> bool {
        self == SubmitOutcome::Accepted
    }
}

impl Session {
    fn check_submission(&self, epoch: EpochId, user_id: UserId) -> SubmitOutcome {
        match &self.current_question {
            Some(open) if open.epoch == epoch => {}
            _ => return SubmitOutcome::RejectedStale,
        }
        if !self.participants.contains_key(&user_id) {
            return SubmitOutcome::RejectedNotParticipant;
        }
        if self.settings.mode == Mode::Team && self.captain != Some(user_id) {
            return SubmitOutcome::RejectedWrongRole;
        }
        if self.answers.contains_key(&user_id) {
            return SubmitOutcome::RejectedDuplicate;
        }
        SubmitOutcome::Accepted
    }

    fn record_answer(&mut self, user_id: UserId, raw_text: &str, now: SystemTime) {
        let Some(open) = &self.current_question else {
            return;
        };

        let elapsed = now.duration_since(open.opened_at).unwrap_or_default();
        let raw_text: String = raw_text.trim().chars().take(MAX_LENGTH).collect();
        let equivalences = scoring::Equivalences::for_language(&self.settings.language);
        let is_correct =
            scoring::is_correct_with(&raw_text, &open.record.canonical_answer, &equivalences);
        let fast_bonus = is_correct
            && scoring::fast_bonus_eligible(elapsed, self.settings.fast_bonus_window());

        self.answers.insert(
            user_id,
            AnswerRecord {
                user_id,
                raw_text,
                is_correct,
                elapsed,
                fast_bonus,
                review: None,
            },
        );
    }

    /// Whether the open question has every answer it waits for
    ///
    /// Team mode needs the captain's answer. Individual mode needs an answer
    /// from every current participant, and at least one participant.
    pub(crate) fn question_complete(&self) -> bool {
        if self.current_question.is_none() {
            return false;
        }
        match self.settings.mode {
            Mode::Team => !self.answers.is_empty(),
            Mode::Individual => {
                !self.participants.is_empty()
                    && self
                        .participants
                        .keys()
                        .all(|user_id| self.answers.contains_key(user_id))
            }
        }
    }

    /// Submits an answer for the question with the given epoch
    ///
    /// Checks are made in a fixed order: stale epoch, not a participant,
    /// not the captain (Team mode), duplicate. An accepted answer is scored
    /// immediately and may complete the question.
    ///
    /// # Arguments
    ///
    /// * `epoch` - Epoch the participant was shown
    /// * `user_id` - Who answers
    /// * `raw_text` - The answer as typed
    /// * `now` - Time of the answer
    /// * `tunnel` - Receives the acknowledgment and any follow-up events
    /// * `scheduler` - Receives timers and work for the next question
    ///
    /// # Returns
    ///
    /// The outcome of the submission
    pub fn submit<T: Tunnel, S: Scheduler>(
        &mut self,
        epoch: EpochId,
        user_id: UserId,
        raw_text: &str,
        now: SystemTime,
        tunnel: &T,
        scheduler: &mut S,
    ) -> SubmitOutcome {
        let outcome = self.check_submission(epoch, user_id);
        if outcome.is_accepted() {
            self.record_answer(user_id, raw_text, now);
        } else {
            debug!(session = %self.id, user = %user_id, ?outcome, "answer rejected");
        }

        tunnel.send_event(
            self.id,
            &Event::AnswerAcknowledged {
                user: user_id,
                accepted: outcome.is_accepted(),
                outcome,
            },
        );

        if outcome.is_accepted() && self.question_complete() {
            self.finalize_question(false, now, tunnel, scheduler);
        }

        outcome
    }
}
