//! Round orchestration
//!
//! This module drives a session from configuration through the question
//! loop to the final results. Two triggers race to close every question:
//! the timeout alarm and the last expected answer. Both present the epoch
//! of the question they were created for, and whichever arrives first wins;
//! the other finds a different epoch and changes nothing.
//!
//! Questions come from background work. The session keeps at most one
//! request in flight (`is_generating_question` with its ticket) and at most
//! one question in reserve (`prefetched_question`). A failed request while
//! a question is needed parks the session in [`Phase::SupplierFailed`]
//! without advancing the question index.

use std::time::Duration;

use garde::Validate;
use itertools::Itertools;
use tracing::{debug, info, warn};
use web_time::SystemTime;

use crate::{
    AlarmMessage, Event, Job, Scheduler,
    constants::{countdown, settings::MAX_THEME_LENGTH},
    error::{ConfigurationError, Error, StateError, SupplierError},
    ids::{EpochId, Ticket, UserId},
    persistence::{AnswerRow, GameRecord},
    question::QuestionRecord,
    scoring::{self, Totals},
    settings::Settings,
    state::{AnswerRecord, OpenQuestion, Phase, Session},
    supplier::{self, CheckItem, CheckRequest, GenerateRequest, RawVerdict},
    tunnel::Tunnel,
};

impl Session {
    /// Starts configuring a new game
    ///
    /// # Arguments
    ///
    /// * `admin` - User who will administer the game
    /// * `tunnel` - Receives the configuration prompt
    ///
    /// # Errors
    ///
    /// * `StateError::WrongPhase` - A game is already being prepared or played
    pub fn begin_configuration<T: Tunnel>(&mut self, admin: UserId, tunnel: &T) -> Result<(), Error> {
        self.expect_phase(Phase::Idle)?;

        self.admin = Some(admin);
        self.phase = Phase::ConfiguringSettings;
        info!(session = %self.id, %admin, "configuration started");
        tunnel.send_event(
            self.id,
            &Event::ConfigurationStarted {
                admin,
                settings: self.settings.clone(),
            },
        );

        Ok(())
    }

    /// Accepts the game settings
    ///
    /// # Errors
    ///
    /// * `Error::Forbidden` - The user is not the admin
    /// * `StateError::WrongPhase` - Settings are not being configured
    /// * `ConfigurationError::InvalidSettings` - Validation failed
    pub fn apply_settings<T: Tunnel>(
        &mut self,
        user_id: UserId,
        settings: Settings,
        tunnel: &T,
    ) -> Result<(), Error> {
        self.require_admin(user_id)?;
        self.expect_phase(Phase::ConfiguringSettings)?;
        settings
            .validate()
            .map_err(|report| ConfigurationError::InvalidSettings(report.to_string()))?;

        self.settings = settings;
        self.phase = Phase::AwaitingTheme;
        tunnel.send_event(self.id, &Event::ThemeRequested);

        Ok(())
    }

    /// Sets the theme and opens registration
    ///
    /// # Errors
    ///
    /// * `Error::Forbidden` - The user is not the admin
    /// * `StateError::WrongPhase` - No theme is expected
    /// * `ConfigurationError::EmptyTheme` - The theme is blank
    /// * `ConfigurationError::InvalidSettings` - The theme is too long
    pub fn set_theme<T: Tunnel, S: Scheduler>(
        &mut self,
        user_id: UserId,
        theme: &str,
        tunnel: &T,
        scheduler: &mut S,
    ) -> Result<(), Error> {
        self.require_admin(user_id)?;
        self.expect_phase(Phase::AwaitingTheme)?;

        let theme = theme.trim();
        if theme.is_empty() {
            return Err(ConfigurationError::EmptyTheme.into());
        }
        if theme.chars().count() > MAX_THEME_LENGTH {
            return Err(ConfigurationError::InvalidSettings(format!(
                "theme is longer than {MAX_THEME_LENGTH} characters"
            ))
            .into());
        }

        self.settings.theme = theme.to_owned();
        self.open_registration(tunnel, scheduler);

        Ok(())
    }

    /// Starts the current round
    ///
    /// Clears everything recorded for the previous round and obtains the
    /// first question.
    pub(crate) fn start_round<T: Tunnel, S: Scheduler>(
        &mut self,
        now: SystemTime,
        tunnel: &T,
        scheduler: &mut S,
    ) {
        self.question_index = 0;
        self.current_question = None;
        self.answers.clear();
        self.answer_history.clear();
        self.round_questions.clear();
        self.phase = Phase::AskingQuestion;

        info!(session = %self.id, round = self.current_round, "round started");
        tunnel.send_event(
            self.id,
            &Event::RoundStarted {
                round: self.current_round,
                rounds: self.settings.rounds,
                captain: self
                    .captain
                    .and_then(|captain| self.participants.get(&captain).cloned()),
            },
        );

        self.obtain_question(now, tunnel, scheduler);
    }

    fn generate_request(&self) -> GenerateRequest {
        GenerateRequest {
            theme: self.settings.theme.clone(),
            difficulty: self.settings.difficulty,
            language: self.settings.language.clone(),
            count: 1,
            round: self.current_round,
            exclusions: self.asked_texts.clone(),
        }
    }

    fn request_question<S: Scheduler>(&mut self, scheduler: &mut S) {
        let ticket = Ticket::new();
        self.is_generating_question = true;
        self.generation_ticket = Some(ticket);
        debug!(session = %self.id, %ticket, "requesting question");
        scheduler.dispatch(Job::GenerateQuestion {
            ticket,
            request: self.generate_request(),
        });
    }

    /// Presents the reserved question, waits for the request in flight, or starts one
    fn obtain_question<T: Tunnel, S: Scheduler>(
        &mut self,
        now: SystemTime,
        tunnel: &T,
        scheduler: &mut S,
    ) {
        if let Some(question) = self.prefetched_question.take() {
            self.open_question(question, now, tunnel, scheduler);
        } else if self.is_generating_question {
            debug!(session = %self.id, "waiting for the question in flight");
        } else {
            self.request_question(scheduler);
        }
    }

    fn prefetch<S: Scheduler>(&mut self, scheduler: &mut S) {
        if self.is_generating_question || self.prefetched_question.is_some() {
            return;
        }
        if self
            .settings
            .is_last_question(self.current_round, self.question_index)
        {
            return;
        }
        self.request_question(scheduler);
    }

    fn open_question<T: Tunnel, S: Scheduler>(
        &mut self,
        question: QuestionRecord,
        now: SystemTime,
        tunnel: &T,
        scheduler: &mut S,
    ) -> EpochId {
        let epoch = EpochId::new();
        let time = self.settings.time_per_question;

        self.asked_texts.push(question.dedup_key());
        self.round_questions.push(question.clone());
        self.answers.clear();

        info!(
            session = %self.id,
            %epoch,
            round = self.current_round,
            index = self.question_index,
            "question presented"
        );
        tunnel.send_event(
            self.id,
            &Event::QuestionPresented {
                epoch,
                text: question.text.clone(),
                round: self.current_round,
                index: self.question_index,
                count: self.settings.questions_per_round,
                seconds_remaining: time.as_secs(),
            },
        );

        scheduler.dispatch(Job::RememberQuestion {
            theme: self.settings.theme.clone(),
            text: question.text.clone(),
        });
        self.current_question = Some(OpenQuestion {
            epoch,
            record: question,
            opened_at: now,
        });
        self.phase = Phase::AwaitingAnswer;

        scheduler.schedule(AlarmMessage::QuestionTimeout { epoch }, time);
        if time.as_secs() > countdown::MIN_TIME_FOR_WARNINGS {
            for seconds_remaining in countdown::WARNINGS {
                scheduler.schedule(
                    AlarmMessage::CountdownWarning {
                        epoch,
                        seconds_remaining,
                    },
                    time - Duration::from_secs(seconds_remaining),
                );
            }
        }

        self.prefetch(scheduler);

        epoch
    }

    /// Presents a question obtained outside the background flow
    ///
    /// Mints a new epoch, opens the question, arms its timeout and
    /// prefetches the following question when one will be needed.
    ///
    /// # Errors
    ///
    /// * `StateError::WrongPhase` - The session is not waiting for a question
    ///
    /// # Returns
    ///
    /// The epoch of the opened question
    pub fn present_question<T: Tunnel, S: Scheduler>(
        &mut self,
        question: QuestionRecord,
        now: SystemTime,
        tunnel: &T,
        scheduler: &mut S,
    ) -> Result<EpochId, StateError> {
        self.expect_phase(Phase::AskingQuestion)?;
        Ok(self.open_question(question, now, tunnel, scheduler))
    }

    /// Delivers the result of a question request
    ///
    /// A question arriving while the session waits for one is presented;
    /// otherwise it is kept in reserve. A failure while the session waits
    /// parks it in [`Phase::SupplierFailed`].
    ///
    /// # Returns
    ///
    /// `false` when the ticket is not the one in flight and nothing changed
    pub fn receive_question<T: Tunnel, S: Scheduler>(
        &mut self,
        ticket: Ticket,
        result: Result<QuestionRecord, SupplierError>,
        now: SystemTime,
        tunnel: &T,
        scheduler: &mut S,
    ) -> bool {
        if self.generation_ticket != Some(ticket) {
            debug!(session = %self.id, %ticket, "ignoring stale question result");
            return false;
        }
        self.generation_ticket = None;
        self.is_generating_question = false;

        match result {
            Ok(question) if self.phase == Phase::AskingQuestion => {
                self.open_question(question, now, tunnel, scheduler);
            }
            Ok(question) => {
                debug!(session = %self.id, "question kept in reserve");
                self.prefetched_question = Some(question);
            }
            Err(error) if self.phase == Phase::AskingQuestion => {
                warn!(session = %self.id, %error, "no question available");
                self.phase = Phase::SupplierFailed;
                tunnel.send_event(
                    self.id,
                    &Event::SupplierFailed {
                        reason: error.to_string(),
                    },
                );
            }
            Err(error) => {
                warn!(session = %self.id, %error, "prefetch failed");
            }
        }

        true
    }

    /// Handles an alarm scheduled earlier
    ///
    /// # Returns
    ///
    /// `false` when the alarm is stale and nothing changed
    pub fn receive_alarm<T: Tunnel, S: Scheduler>(
        &mut self,
        alarm: AlarmMessage,
        now: SystemTime,
        tunnel: &T,
        scheduler: &mut S,
    ) -> bool {
        match alarm {
            AlarmMessage::QuestionTimeout { epoch } => self.on_timeout(epoch, now, tunnel, scheduler),
            AlarmMessage::CountdownWarning {
                epoch,
                seconds_remaining,
            } => self.on_countdown(epoch, seconds_remaining, tunnel),
            AlarmMessage::RegistrationDeadline { epoch } => {
                self.on_registration_deadline(epoch, now, tunnel, scheduler)
            }
        }
    }

    fn on_countdown<T: Tunnel>(&self, epoch: EpochId, seconds_remaining: u64, tunnel: &T) -> bool {
        if self.current_epoch() != Some(epoch) {
            return false;
        }
        tunnel.send_event(
            self.id,
            &Event::TimeWarning {
                epoch,
                seconds_remaining,
            },
        );
        true
    }

    /// Closes the question with the given epoch because its time ran out
    ///
    /// Participants without an answer get an empty, incorrect record.
    ///
    /// # Returns
    ///
    /// `false` when `epoch` is not the open question's epoch; the session is
    /// then left exactly as it was
    pub fn on_timeout<T: Tunnel, S: Scheduler>(
        &mut self,
        epoch: EpochId,
        now: SystemTime,
        tunnel: &T,
        scheduler: &mut S,
    ) -> bool {
        let Some(open) = &self.current_question else {
            debug!(session = %self.id, %epoch, "timeout without open question");
            return false;
        };
        if open.epoch != epoch {
            debug!(session = %self.id, %epoch, "ignoring stale timeout");
            return false;
        }

        let elapsed = self.settings.time_per_question;
        let missing = self
            .participants
            .keys()
            .filter(|user_id| !self.answers.contains_key(user_id))
            .copied()
            .collect_vec();
        for user_id in missing {
            self.answers
                .insert(user_id, AnswerRecord::missed(user_id, elapsed));
        }

        self.finalize_question(true, now, tunnel, scheduler);
        true
    }

    /// Archives the answers of the open question and moves on
    ///
    /// The next question is obtained, or the round ends after the last one.
    pub(crate) fn finalize_question<T: Tunnel, S: Scheduler>(
        &mut self,
        timed_out: bool,
        now: SystemTime,
        tunnel: &T,
        scheduler: &mut S,
    ) {
        let Some(open) = self.current_question.take() else {
            return;
        };

        let answers = std::mem::take(&mut self.answers);
        self.answer_history.insert(self.question_index, answers);
        self.question_index += 1;

        tunnel.send_event(
            self.id,
            &Event::QuestionClosed {
                epoch: open.epoch,
                canonical_answer: open.record.canonical_answer,
                explanation: Some(open.record.explanation).filter(|text| !text.is_empty()),
                timed_out,
            },
        );

        if self.question_index >= self.settings.questions_per_round {
            self.finish_round(tunnel, scheduler);
        } else {
            self.phase = Phase::AskingQuestion;
            self.obtain_question(now, tunnel, scheduler);
        }
    }

    fn check_request(&self) -> CheckRequest {
        let items = self
            .answer_history
            .iter()
            .flat_map(|(index, answers)| {
                let question = self.round_questions.get(*index);
                answers
                    .values()
                    .filter(|record| !record.raw_text.is_empty())
                    .filter_map(move |record| {
                        question.map(|question| CheckItem {
                            question_index: *index,
                            user_id: record.user_id,
                            question: question.text.clone(),
                            canonical_answer: question.canonical_answer.clone(),
                            answer: record.raw_text.clone(),
                        })
                    })
            })
            .collect_vec();

        CheckRequest {
            theme: self.settings.theme.clone(),
            language: self.settings.language.clone(),
            items,
        }
    }

    fn finish_round<T: Tunnel, S: Scheduler>(&mut self, tunnel: &T, scheduler: &mut S) {
        if self.settings.delegated_review {
            let request = self.check_request();
            if !request.items.is_empty() {
                let ticket = Ticket::new();
                self.review_ticket = Some(ticket);
                self.phase = Phase::ReviewingRound;
                debug!(session = %self.id, %ticket, "requesting review");
                scheduler.dispatch(Job::ReviewRound { ticket, request });
                return;
            }
        }
        self.complete_round(tunnel, scheduler);
    }

    /// Delivers the supplier's verdicts on the round's answers
    ///
    /// Well-formed verdicts replace the local judgment of each answer; an
    /// unsupported, failed or malformed review keeps the local scores.
    ///
    /// # Returns
    ///
    /// `false` when the ticket is stale and nothing changed
    pub fn receive_review<T: Tunnel, S: Scheduler>(
        &mut self,
        ticket: Ticket,
        result: Result<Option<Vec<RawVerdict>>, SupplierError>,
        tunnel: &T,
        scheduler: &mut S,
    ) -> bool {
        if self.phase != Phase::ReviewingRound || self.review_ticket != Some(ticket) {
            debug!(session = %self.id, %ticket, "ignoring stale review");
            return false;
        }
        self.review_ticket = None;

        let items = self.check_request().items;
        match result {
            Ok(Some(verdicts)) => match supplier::validate_verdicts(&items, verdicts) {
                Ok(verdicts) => {
                    let window = self.settings.fast_bonus_window();
                    for (item, verdict) in items.iter().zip(verdicts) {
                        if let Some(record) = self
                            .answer_history
                            .get_mut(&item.question_index)
                            .and_then(|answers| answers.get_mut(&item.user_id))
                        {
                            record.is_correct = verdict.correct;
                            record.fast_bonus = verdict.correct
                                && scoring::fast_bonus_eligible(record.elapsed, window);
                            record.review = verdict.explanation;
                        }
                    }
                }
                Err(error) => warn!(session = %self.id, %error, "review rejected, scoring locally"),
            },
            Ok(None) => debug!(session = %self.id, "review unsupported, scoring locally"),
            Err(error) => warn!(session = %self.id, %error, "review failed, scoring locally"),
        }

        self.complete_round(tunnel, scheduler);
        true
    }

    fn archive_answer_rows(&mut self) {
        let rows = self
            .answer_history
            .iter()
            .flat_map(|(index, answers)| {
                answers.values().map(move |record| (*index, record))
            })
            .filter_map(|(index, record)| {
                let question = self.round_questions.get(index)?;
                Some(AnswerRow {
                    round: self.current_round,
                    question_index: index,
                    question: question.text.clone(),
                    canonical_answer: question.canonical_answer.clone(),
                    user_id: record.user_id,
                    display_name: self.display_name(record.user_id),
                    answer: record.raw_text.clone(),
                    is_correct: record.is_correct,
                    fast_bonus: record.fast_bonus,
                    elapsed_ms: u64::try_from(record.elapsed.as_millis()).unwrap_or(u64::MAX),
                })
            })
            .collect_vec();
        self.answer_rows.extend(rows);
    }

    fn complete_round<T: Tunnel, S: Scheduler>(&mut self, tunnel: &T, scheduler: &mut S) {
        let totals = scoring::compute_round_totals(
            &self.answer_history,
            &self.round_questions,
            self.settings.mode,
        );

        match &totals.totals {
            Totals::Team(tally) => {
                self.total_score += tally.correct;
                self.total_fast_bonus += tally.fast_bonus;
            }
            Totals::Individual(tallies) => {
                for (user_id, tally) in tallies {
                    *self.individual_totals.entry(*user_id).or_default() += *tally;
                }
            }
        }
        self.archive_answer_rows();

        info!(session = %self.id, round = self.current_round, "round finished");
        tunnel.send_event(self.id, &Event::RoundFinished(self.round_summary(&totals)));

        if self.current_round >= self.settings.rounds {
            self.finish_game(tunnel, scheduler);
        } else {
            self.phase = Phase::RoundFinished;
        }
    }

    fn finish_game<T: Tunnel, S: Scheduler>(&mut self, tunnel: &T, scheduler: &mut S) {
        self.phase = Phase::GameFinished;
        let leaderboard = self.leaderboard();

        info!(session = %self.id, winner = ?leaderboard.winner_id(), "game finished");
        tunnel.send_event(
            self.id,
            &Event::GameFinished {
                leaderboard: leaderboard.clone(),
            },
        );

        scheduler.dispatch(Job::RecordGame(GameRecord {
            session: self.id,
            theme: self.settings.theme.clone(),
            mode: self.settings.mode,
            difficulty: self.settings.difficulty,
            rounds: self.settings.rounds,
            questions_per_round: self.settings.questions_per_round,
            total_score: self.total_score,
            total_fast_bonus: self.total_fast_bonus,
            winner: leaderboard.winner_id(),
            standings: self.standings(),
            participants: self.participants.values().cloned().collect_vec(),
            answers: self.answer_rows.clone(),
        }));
    }

    /// Starts the next round
    ///
    /// # Errors
    ///
    /// * `Error::Forbidden` - The user is not the admin
    /// * `StateError::WrongPhase` - No round just finished
    pub fn next_round<T: Tunnel, S: Scheduler>(
        &mut self,
        user_id: UserId,
        now: SystemTime,
        tunnel: &T,
        scheduler: &mut S,
    ) -> Result<(), Error> {
        self.require_admin(user_id)?;
        self.expect_phase(Phase::RoundFinished)?;

        self.current_round += 1;
        self.question_index = 0;
        self.answer_history.clear();
        self.start_round(now, tunnel, scheduler);

        Ok(())
    }

    /// Asks the supplier again after a failure
    ///
    /// # Errors
    ///
    /// * `Error::Forbidden` - The user is not the admin
    /// * `StateError::WrongPhase` - The session is not parked after a failure
    pub fn retry<T: Tunnel, S: Scheduler>(
        &mut self,
        user_id: UserId,
        now: SystemTime,
        tunnel: &T,
        scheduler: &mut S,
    ) -> Result<(), Error> {
        self.require_admin(user_id)?;
        self.expect_phase(Phase::SupplierFailed)?;

        info!(session = %self.id, index = self.question_index, "retrying question");
        self.phase = Phase::AskingQuestion;
        self.obtain_question(now, tunnel, scheduler);

        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::{
        leaderboard::Leaderboard,
        settings::Mode,
        store::SessionStore,
        testing::{
            ADMIN, RecordingScheduler, RecordingTunnel, playing_session, sample_question,
        },
    };

    fn settings(mode: Mode, rounds: usize, questions: usize, seconds: u64) -> Settings {
        Settings {
            mode,
            rounds,
            questions_per_round: questions,
            time_per_question: Duration::from_secs(seconds),
            ..Settings::default()
        }
    }

    fn snapshot(session: &Session) -> String {
        serde_json::to_string(session).unwrap()
    }

    /// Delivers the question the session asked for, if any
    fn deliver(
        session: &mut Session,
        scheduler: &mut RecordingScheduler,
        question: QuestionRecord,
        now: SystemTime,
        tunnel: &RecordingTunnel,
    ) -> bool {
        match scheduler.generation_tickets().last() {
            Some(ticket) => session.receive_question(*ticket, Ok(question), now, tunnel, scheduler),
            None => false,
        }
    }

    #[test]
    fn test_configuration_flow() {
        let tunnel = RecordingTunnel::default();
        let mut scheduler = RecordingScheduler::default();
        let mut session = Session::new(crate::ids::SessionId::from(1));

        session.begin_configuration(ADMIN, &tunnel).unwrap();
        assert_eq!(session.phase(), Phase::ConfiguringSettings);
        assert_eq!(
            session.begin_configuration(ADMIN, &tunnel),
            Err(Error::from(StateError::WrongPhase(Phase::ConfiguringSettings)))
        );

        let invalid = Settings {
            rounds: 0,
            ..Settings::default()
        };
        assert!(matches!(
            session.apply_settings(ADMIN, invalid, &tunnel),
            Err(Error::Configuration(ConfigurationError::InvalidSettings(_)))
        ));
        assert_eq!(
            session.apply_settings(UserId::from(5), Settings::default(), &tunnel),
            Err(Error::Forbidden(UserId::from(5)))
        );
        session
            .apply_settings(ADMIN, Settings::default(), &tunnel)
            .unwrap();
        assert_eq!(session.phase(), Phase::AwaitingTheme);

        assert_eq!(
            session.set_theme(ADMIN, "   ", &tunnel, &mut scheduler),
            Err(Error::from(ConfigurationError::EmptyTheme))
        );
        session
            .set_theme(ADMIN, "  Space  ", &tunnel, &mut scheduler)
            .unwrap();
        assert_eq!(session.phase(), Phase::Registering);
        assert_eq!(session.settings().theme, "Space");
        assert!(matches!(
            scheduler.alarms.last(),
            Some((AlarmMessage::RegistrationDeadline { .. }, _))
        ));
    }

    #[test]
    fn test_present_question_schedules_timeout_and_prefetch() {
        let (session, scheduler, _) = playing_session(settings(Mode::Team, 1, 3, 300), &[1]);
        let epoch = session.current_epoch().unwrap();

        assert!(scheduler.alarms.contains(&(
            AlarmMessage::QuestionTimeout { epoch },
            Duration::from_secs(300)
        )));
        assert!(scheduler.alarms.contains(&(
            AlarmMessage::CountdownWarning {
                epoch,
                seconds_remaining: 60
            },
            Duration::from_secs(240)
        )));
        assert!(scheduler.alarms.contains(&(
            AlarmMessage::CountdownWarning {
                epoch,
                seconds_remaining: 10
            },
            Duration::from_secs(290)
        )));
        assert!(session.is_generating_question());
        assert_eq!(scheduler.generation_tickets().len(), 2);
    }

    #[test]
    fn test_short_questions_get_no_warnings() {
        let (_, scheduler, _) = playing_session(settings(Mode::Individual, 1, 2, 60), &[1]);

        assert!(
            !scheduler
                .alarms
                .iter()
                .any(|(alarm, _)| matches!(alarm, AlarmMessage::CountdownWarning { .. }))
        );
    }

    #[test]
    fn test_last_question_is_not_prefetched() {
        let (session, scheduler, _) = playing_session(settings(Mode::Individual, 1, 1, 30), &[1]);

        assert!(!session.is_generating_question());
        assert_eq!(scheduler.generation_tickets().len(), 1);
    }

    #[test]
    fn test_prefetch_is_never_doubled() {
        let tunnel = RecordingTunnel::default();
        let (mut session, mut scheduler, opened) =
            playing_session(settings(Mode::Individual, 1, 3, 30), &[1]);
        let epoch = session.current_epoch().unwrap();

        session.submit(epoch, UserId::from(1), "answer 1", opened, &tunnel, &mut scheduler);

        assert_eq!(session.phase(), Phase::AskingQuestion);
        assert_eq!(scheduler.generation_tickets().len(), 2);

        assert!(deliver(&mut session, &mut scheduler, sample_question(2), opened, &tunnel));
        assert_eq!(session.phase(), Phase::AwaitingAnswer);
        assert_eq!(scheduler.generation_tickets().len(), 3);
    }

    #[test]
    fn test_prefetched_question_is_consumed() {
        let tunnel = RecordingTunnel::default();
        let (mut session, mut scheduler, opened) =
            playing_session(settings(Mode::Individual, 1, 2, 30), &[1]);
        let epoch = session.current_epoch().unwrap();

        assert!(deliver(&mut session, &mut scheduler, sample_question(2), opened, &tunnel));
        assert_eq!(session.prefetched_question(), Some(&sample_question(2)));
        assert_eq!(session.current_epoch(), Some(epoch));

        session.submit(epoch, UserId::from(1), "answer 1", opened, &tunnel, &mut scheduler);

        assert_eq!(session.phase(), Phase::AwaitingAnswer);
        assert_eq!(session.prefetched_question(), None);
        assert_eq!(session.question_index(), 1);
        assert_ne!(session.current_epoch(), Some(epoch));
    }

    #[test]
    fn test_stale_question_result_is_ignored() {
        let tunnel = RecordingTunnel::default();
        let (mut session, mut scheduler, opened) =
            playing_session(settings(Mode::Individual, 1, 2, 30), &[1]);
        let before = snapshot(&session);

        assert!(!session.receive_question(
            Ticket::new(),
            Ok(sample_question(9)),
            opened,
            &tunnel,
            &mut scheduler
        ));
        assert_eq!(snapshot(&session), before);
    }

    #[test]
    fn test_stale_timeout_changes_nothing() {
        let tunnel = RecordingTunnel::default();
        let (mut session, mut scheduler, opened) =
            playing_session(settings(Mode::Individual, 1, 2, 30), &[1, 2]);
        let before = snapshot(&session);
        let alarms = scheduler.alarms.len();

        assert!(!session.on_timeout(
            EpochId::new(),
            opened + Duration::from_secs(30),
            &tunnel,
            &mut scheduler
        ));

        assert_eq!(snapshot(&session), before);
        assert_eq!(scheduler.alarms.len(), alarms);
    }

    #[test]
    fn test_stale_countdown_is_silent() {
        let tunnel = RecordingTunnel::default();
        let (mut session, mut scheduler, opened) =
            playing_session(settings(Mode::Team, 1, 2, 300), &[1]);
        let epoch = session.current_epoch().unwrap();

        let stale = AlarmMessage::CountdownWarning {
            epoch: EpochId::new(),
            seconds_remaining: 10,
        };
        assert!(!session.receive_alarm(stale, opened, &tunnel, &mut scheduler));

        let live = AlarmMessage::CountdownWarning {
            epoch,
            seconds_remaining: 10,
        };
        assert!(session.receive_alarm(live, opened, &tunnel, &mut scheduler));
        assert_eq!(
            tunnel.count(|event| matches!(event, Event::TimeWarning { .. })),
            1
        );
    }

    #[test]
    fn test_team_timeout_skips_question() {
        let tunnel = RecordingTunnel::default();
        let (mut session, mut scheduler, opened) =
            playing_session(settings(Mode::Team, 1, 2, 300), &[1, 2]);
        let epoch = session.current_epoch().unwrap();

        assert!(session.on_timeout(
            epoch,
            opened + Duration::from_secs(300),
            &tunnel,
            &mut scheduler
        ));

        assert_eq!(session.question_index(), 1);
        let archived = &session.answer_history()[&0];
        assert_eq!(archived.len(), 2);
        assert!(archived.values().all(|record| !record.is_correct));
        assert_eq!(
            tunnel.count(|event| matches!(event, Event::QuestionClosed { timed_out: true, .. })),
            1
        );
    }

    #[test]
    fn test_team_scenario() {
        let tunnel = RecordingTunnel::default();
        let (mut session, mut scheduler, opened) =
            playing_session(settings(Mode::Team, 1, 2, 300), &[1, 2]);
        let first = session.current_epoch().unwrap();

        let outcome = session.submit(
            first,
            UserId::from(1),
            "Answer 1",
            opened + Duration::from_secs(10),
            &tunnel,
            &mut scheduler,
        );
        assert!(outcome.is_accepted());

        let second_opened = opened + Duration::from_secs(20);
        assert!(deliver(&mut session, &mut scheduler, sample_question(2), second_opened, &tunnel));
        let second = session.current_epoch().unwrap();

        session.submit(
            second,
            UserId::from(1),
            "something else",
            second_opened + Duration::from_secs(200),
            &tunnel,
            &mut scheduler,
        );

        assert_eq!(session.phase(), Phase::GameFinished);
        assert_eq!(session.total_score(), 1);
        assert_eq!(session.total_fast_bonus(), 1);

        let summaries = tunnel.collect(|event| match event {
            Event::RoundFinished(summary) => Some(summary.clone()),
            _ => None,
        });
        assert_eq!(summaries.len(), 1);
        let standing = &summaries[0].round_standings[0];
        assert_eq!(summaries[0].questions, 2);
        assert_eq!(standing.tally.correct, 1);
        assert_eq!(standing.tally.fast_bonus, 1);
        assert_eq!(standing.points, 2);

        let late = session.on_timeout(first, opened + Duration::from_secs(300), &tunnel, &mut scheduler);
        assert!(!late);
    }

    #[test]
    fn test_individual_scenario() {
        let tunnel = RecordingTunnel::default();
        let (mut session, mut scheduler, opened) =
            playing_session(settings(Mode::Individual, 1, 1, 30), &[1, 2]);
        let epoch = session.current_epoch().unwrap();

        session.submit(
            epoch,
            UserId::from(1),
            "answer 1",
            opened + Duration::from_secs(5),
            &tunnel,
            &mut scheduler,
        );
        assert_eq!(session.current_epoch(), Some(epoch));

        assert!(session.on_timeout(
            epoch,
            opened + Duration::from_secs(30),
            &tunnel,
            &mut scheduler
        ));
        let after_first = snapshot(&session);

        assert!(!session.on_timeout(
            epoch,
            opened + Duration::from_secs(31),
            &tunnel,
            &mut scheduler
        ));
        assert_eq!(snapshot(&session), after_first);

        let archived = &session.answer_history()[&0];
        let missed = &archived[&UserId::from(2)];
        assert!(missed.raw_text.is_empty());
        assert!(!missed.is_correct);
        assert!(archived[&UserId::from(1)].is_correct);
        assert_eq!(session.question_index(), 1);
        assert_eq!(session.phase(), Phase::GameFinished);
        assert_eq!(
            tunnel.count(|event| matches!(event, Event::QuestionClosed { .. })),
            1
        );

        let a = session.individual_totals()[&UserId::from(1)];
        assert_eq!(a.correct, 1);
        assert_eq!(a.fast_bonus, 1);
        assert_eq!(session.individual_totals()[&UserId::from(2)].points(), 0);
    }

    #[test]
    fn test_answer_after_completion_is_rejected() {
        let tunnel = RecordingTunnel::default();
        let (mut session, mut scheduler, opened) =
            playing_session(settings(Mode::Individual, 1, 2, 30), &[1, 2]);
        let epoch = session.current_epoch().unwrap();

        session.submit(epoch, UserId::from(1), "answer 1", opened, &tunnel, &mut scheduler);
        session.submit(epoch, UserId::from(2), "answer 1", opened, &tunnel, &mut scheduler);
        let after = session.submit(epoch, UserId::from(1), "again", opened, &tunnel, &mut scheduler);

        assert_eq!(after, crate::answers::SubmitOutcome::RejectedStale);
        assert_eq!(session.answer_history()[&0].len(), 2);
    }

    #[test]
    fn test_supplier_failure_parks_and_retry_resumes() {
        let tunnel = RecordingTunnel::default();
        let (mut session, mut scheduler, opened) =
            playing_session(settings(Mode::Individual, 1, 2, 30), &[1]);
        let epoch = session.current_epoch().unwrap();
        let prefetch = *scheduler.generation_tickets().last().unwrap();

        session.submit(epoch, UserId::from(1), "answer 1", opened, &tunnel, &mut scheduler);
        assert_eq!(session.phase(), Phase::AskingQuestion);

        session.receive_question(
            prefetch,
            Err(SupplierError::Exhausted { attempts: 3 }),
            opened,
            &tunnel,
            &mut scheduler,
        );
        assert_eq!(session.phase(), Phase::SupplierFailed);
        assert_eq!(session.question_index(), 1);
        assert_eq!(session.current_epoch(), None);
        assert!(!session.is_generating_question());
        assert_eq!(
            tunnel.count(|event| matches!(event, Event::SupplierFailed { .. })),
            1
        );

        assert_eq!(
            session.retry(UserId::from(1), opened, &tunnel, &mut scheduler),
            Err(Error::Forbidden(UserId::from(1)))
        );
        session.retry(ADMIN, opened, &tunnel, &mut scheduler).unwrap();
        assert_eq!(session.phase(), Phase::AskingQuestion);
        assert!(session.is_generating_question());

        assert!(deliver(&mut session, &mut scheduler, sample_question(2), opened, &tunnel));
        assert_eq!(session.phase(), Phase::AwaitingAnswer);
        assert_eq!(session.question_index(), 1);
    }

    #[test]
    fn test_failed_prefetch_is_requested_again() {
        let tunnel = RecordingTunnel::default();
        let (mut session, mut scheduler, opened) =
            playing_session(settings(Mode::Individual, 1, 2, 30), &[1]);
        let epoch = session.current_epoch().unwrap();
        let prefetch = *scheduler.generation_tickets().last().unwrap();

        session.receive_question(
            prefetch,
            Err(SupplierError::Unavailable("down".to_owned())),
            opened,
            &tunnel,
            &mut scheduler,
        );
        assert_eq!(session.phase(), Phase::AwaitingAnswer);
        assert!(!session.is_generating_question());

        session.submit(epoch, UserId::from(1), "answer 1", opened, &tunnel, &mut scheduler);

        assert_eq!(session.phase(), Phase::AskingQuestion);
        assert!(session.is_generating_question());
        assert_eq!(scheduler.generation_tickets().len(), 3);
    }

    #[test]
    fn test_present_question_requires_asking_phase() {
        let tunnel = RecordingTunnel::default();
        let (mut session, mut scheduler, opened) =
            playing_session(settings(Mode::Individual, 1, 2, 30), &[1]);

        assert_eq!(
            session.present_question(sample_question(5), opened, &tunnel, &mut scheduler),
            Err(StateError::WrongPhase(Phase::AwaitingAnswer))
        );
    }

    #[test]
    fn test_next_round() {
        let tunnel = RecordingTunnel::default();
        let (mut session, mut scheduler, opened) =
            playing_session(settings(Mode::Individual, 2, 1, 30), &[1]);
        let epoch = session.current_epoch().unwrap();
        let prefetch = *scheduler.generation_tickets().last().unwrap();
        session.receive_question(prefetch, Ok(sample_question(2)), opened, &tunnel, &mut scheduler);

        session.submit(epoch, UserId::from(1), "answer 1", opened, &tunnel, &mut scheduler);
        assert_eq!(session.phase(), Phase::RoundFinished);
        assert_eq!(session.individual_totals()[&UserId::from(1)].correct, 1);

        assert_eq!(
            session.next_round(UserId::from(1), opened, &tunnel, &mut scheduler),
            Err(Error::Forbidden(UserId::from(1)))
        );
        session.next_round(ADMIN, opened, &tunnel, &mut scheduler).unwrap();

        assert_eq!(session.current_round(), 2);
        assert_eq!(session.question_index(), 0);
        assert!(session.answer_history().is_empty());
        assert_eq!(session.phase(), Phase::AwaitingAnswer);
        assert_eq!(session.question_view(opened).unwrap().text, sample_question(2).text);
    }

    #[test]
    fn test_game_finish_dispatches_record() {
        let tunnel = RecordingTunnel::default();
        let (mut session, mut scheduler, opened) =
            playing_session(settings(Mode::Individual, 1, 1, 30), &[1, 2]);
        let epoch = session.current_epoch().unwrap();

        session.submit(epoch, UserId::from(1), "answer 1", opened, &tunnel, &mut scheduler);
        session.submit(epoch, UserId::from(2), "nope", opened, &tunnel, &mut scheduler);

        let record = scheduler
            .jobs
            .iter()
            .find_map(|job| match job {
                Job::RecordGame(record) => Some(record.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(record.winner, Some(UserId::from(1)));
        assert_eq!(record.answers.len(), 2);
        assert_eq!(record.standings[0].position, 1);

        let finished: Vec<Leaderboard> = tunnel.collect(|event| match event {
            Event::GameFinished { leaderboard } => Some(leaderboard.clone()),
            _ => None,
        });
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].winner_id(), Some(UserId::from(1)));
    }

    #[test]
    fn test_delegated_review_overrides_local_scores() {
        let tunnel = RecordingTunnel::default();
        let (mut session, mut scheduler, opened) = playing_session(
            Settings {
                delegated_review: true,
                ..settings(Mode::Individual, 1, 1, 30)
            },
            &[1, 2],
        );
        let epoch = session.current_epoch().unwrap();

        session.submit(epoch, UserId::from(1), "answer 1", opened, &tunnel, &mut scheduler);
        session.submit(epoch, UserId::from(2), "close enough", opened, &tunnel, &mut scheduler);
        assert_eq!(session.phase(), Phase::ReviewingRound);

        let (ticket, request) = scheduler.review_requests().pop().unwrap();
        assert_eq!(request.items.len(), 2);
        let verdicts = request
            .items
            .iter()
            .map(|_| RawVerdict {
                correct: Some(true),
                explanation: Some("accepted".to_owned()),
            })
            .collect_vec();

        assert!(!session.receive_review(Ticket::new(), Ok(None), &tunnel, &mut scheduler));
        assert!(session.receive_review(ticket, Ok(Some(verdicts)), &tunnel, &mut scheduler));

        assert_eq!(session.phase(), Phase::GameFinished);
        assert_eq!(session.individual_totals()[&UserId::from(2)].correct, 1);
    }

    #[test]
    fn test_malformed_review_keeps_local_scores() {
        let tunnel = RecordingTunnel::default();
        let (mut session, mut scheduler, opened) = playing_session(
            Settings {
                delegated_review: true,
                ..settings(Mode::Individual, 1, 1, 30)
            },
            &[1, 2],
        );
        let epoch = session.current_epoch().unwrap();

        session.submit(epoch, UserId::from(1), "answer 1", opened, &tunnel, &mut scheduler);
        session.submit(epoch, UserId::from(2), "close enough", opened, &tunnel, &mut scheduler);
        let (ticket, _) = scheduler.review_requests().pop().unwrap();

        let malformed = vec![RawVerdict::default()];
        assert!(session.receive_review(ticket, Ok(Some(malformed)), &tunnel, &mut scheduler));

        assert_eq!(session.individual_totals()[&UserId::from(1)].correct, 1);
        assert_eq!(session.individual_totals()[&UserId::from(2)].correct, 0);
    }

    #[test]
    fn test_review_after_reset_is_ignored() {
        let tunnel = RecordingTunnel::default();
        let (mut session, mut scheduler, opened) = playing_session(
            Settings {
                delegated_review: true,
                ..settings(Mode::Individual, 1, 1, 30)
            },
            &[1],
        );
        let epoch = session.current_epoch().unwrap();
        session.submit(epoch, UserId::from(1), "answer 1", opened, &tunnel, &mut scheduler);
        let (ticket, _) = scheduler.review_requests().pop().unwrap();

        let id = session.id();
        let mut store = SessionStore::new();
        *store.get_or_create(id) = session;
        store.reset(id);

        let fresh = store.get_mut(id).unwrap();
        assert!(!fresh.receive_review(ticket, Ok(None), &tunnel, &mut scheduler));
        assert_eq!(fresh.phase(), Phase::Idle);
        assert_eq!(tunnel.count(|event| matches!(event, Event::GameFinished { .. })), 0);
    }

    #[test]
    fn test_only_presented_questions_are_remembered() {
        let tunnel = RecordingTunnel::default();
        let (mut session, mut scheduler, opened) =
            playing_session(settings(Mode::Individual, 1, 3, 30), &[1]);
        let remembered = |scheduler: &RecordingScheduler| {
            scheduler
                .jobs
                .iter()
                .filter_map(|job| match job {
                    Job::RememberQuestion { theme, text } => Some((theme.clone(), text.clone())),
                    _ => None,
                })
                .collect_vec()
        };

        assert!(deliver(&mut session, &mut scheduler, sample_question(2), opened, &tunnel));
        assert_eq!(
            remembered(&scheduler),
            vec![("General knowledge".to_owned(), sample_question(1).text)]
        );

        let epoch = session.current_epoch().unwrap();
        session.submit(epoch, UserId::from(1), "answer 1", opened, &tunnel, &mut scheduler);
        assert_eq!(remembered(&scheduler).len(), 2);
        assert_eq!(remembered(&scheduler)[1].1, sample_question(2).text);
    }

    #[test]
    fn test_question_view_counts_down() {
        let (session, _, opened) = playing_session(settings(Mode::Team, 1, 2, 300), &[1]);

        let view = session.question_view(opened + Duration::from_secs(100)).unwrap();
        assert_eq!(view.seconds_remaining, 200);
        assert_eq!(view.index, 0);
        assert_eq!(view.round, 1);

        let view = session.question_view(opened + Duration::from_secs(400)).unwrap();
        assert_eq!(view.seconds_remaining, 0);
    }
}
