//! Asynchronous host for the session engine
//!
//! [`QuizHost`] owns the session store and the external collaborators. Each
//! handler locks the store, runs the synchronous session operation with a
//! scheduler that only collects requests, releases the lock and then starts
//! the collected timers and jobs as tokio tasks. The lock is never held
//! across an `.await`.
//!
//! Timers and jobs report back through the same path. They carry the epoch
//! or ticket they were created for, so a late completion finds a session
//! that moved on and is ignored.

use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use web_time::SystemTime;

use crate::{
    AlarmMessage, Job, Scheduler,
    answers::SubmitOutcome,
    constants::{registration::REGISTRATION_WINDOW, supplier},
    error::{Error, StateError},
    ids::{EpochId, SessionId, Ticket, UserId},
    leaderboard::Leaderboard,
    persistence::{GameRecord, GameRecorder},
    registration::{JoinOutcome, LeaveOutcome},
    settings::Settings,
    state::{Phase, QuestionView, Session},
    store::SessionStore,
    supplier::{CheckRequest, GenerateRequest, QuestionSupplier, fetch_question, with_deadline},
    tunnel::Tunnel,
};

fn default_backfill_attempts() -> usize {
    supplier::BACKFILL_ATTEMPTS
}

fn default_history_limit() -> usize {
    supplier::HISTORY_LIMIT
}

fn default_registration_window() -> Duration {
    Duration::from_secs(REGISTRATION_WINDOW)
}

fn default_supplier_timeout() -> Duration {
    Duration::from_secs(supplier::CALL_TIMEOUT)
}

/// Tunables of the host
#[serde_with::serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Additional supplier calls allowed when a call yields no usable question
    #[serde(default = "default_backfill_attempts")]
    pub backfill_attempts: usize,
    /// Number of earlier questions of a theme excluded from generation
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// How long registration stays open
    #[serde(default = "default_registration_window")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub registration_window: Duration,
    /// How long a single supplier call may take before it counts as failed
    #[serde(default = "default_supplier_timeout")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub supplier_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            backfill_attempts: default_backfill_attempts(),
            history_limit: default_history_limit(),
            registration_window: default_registration_window(),
            supplier_timeout: default_supplier_timeout(),
        }
    }
}

impl HostConfig {
    /// Parses a configuration from JSON; missing fields take their defaults
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the text is not a valid configuration.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Timers and jobs requested while the store was locked
#[derive(Debug, Default)]
struct Pending {
    alarms: Vec<(AlarmMessage, Duration)>,
    jobs: Vec<Job>,
}

impl Scheduler for Pending {
    fn schedule(&mut self, alarm: AlarmMessage, after: Duration) {
        self.alarms.push((alarm, after));
    }

    fn dispatch(&mut self, job: Job) {
        self.jobs.push(job);
    }
}

struct Inner<Q, R, T> {
    store: Mutex<SessionStore>,
    timers: Mutex<HashMap<SessionId, Vec<AbortHandle>>>,
    supplier: Q,
    recorder: R,
    tunnel: T,
    config: HostConfig,
    clock: (SystemTime, tokio::time::Instant),
}

/// Drives sessions on a tokio runtime
///
/// Cloning is cheap; clones share the same sessions.
pub struct QuizHost<Q, R, T> {
    inner: Arc<Inner<Q, R, T>>,
}

impl<Q, R, T> Clone for QuizHost<Q, R, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Q, R, T> QuizHost<Q, R, T>
where
    Q: QuestionSupplier + 'static,
    R: GameRecorder + 'static,
    T: Tunnel + Send + Sync + 'static,
{
    /// Creates a host with no sessions
    ///
    /// Must be called within a tokio runtime.
    pub fn new(supplier: Q, recorder: R, tunnel: T, config: HostConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: Mutex::new(SessionStore::with_registration_window(
                    config.registration_window,
                )),
                timers: Mutex::new(HashMap::new()),
                supplier,
                recorder,
                tunnel,
                config,
                clock: (SystemTime::now(), tokio::time::Instant::now()),
            }),
        }
    }

    /// The tunnel events are sent through
    pub fn tunnel(&self) -> &T {
        &self.inner.tunnel
    }

    /// Current time, measured on the tokio clock so timers and elapsed times agree
    fn now(&self) -> SystemTime {
        let (wall, start) = self.inner.clock;
        wall + start.elapsed()
    }

    fn run<U>(
        &self,
        id: SessionId,
        create: bool,
        operation: impl FnOnce(&mut Session, SystemTime, &T, &mut Pending) -> Result<U, Error>,
    ) -> Result<U, Error> {
        let now = self.now();
        let mut pending = Pending::default();
        let result = {
            let mut store = self.inner.store.lock();
            let session = if create {
                Some(store.get_or_create(id))
            } else {
                store.get_mut(id)
            };
            match session {
                Some(session) => operation(session, now, &self.inner.tunnel, &mut pending),
                None => Err(StateError::NoSession.into()),
            }
        };

        if let Err(Error::State(error)) = &result {
            debug!(session = %id, %error, "operation rejected");
        }
        self.start(id, pending);
        result
    }

    fn start(&self, id: SessionId, pending: Pending) {
        let mut handles = Vec::with_capacity(pending.alarms.len());
        for (alarm, after) in pending.alarms {
            let host = self.clone();
            let task = tokio::spawn(async move {
                tokio::time::sleep(after).await;
                host.deliver_alarm(id, alarm);
            });
            handles.push(task.abort_handle());
        }
        if !handles.is_empty() {
            let mut timers = self.inner.timers.lock();
            let entry = timers.entry(id).or_default();
            entry.retain(|handle| !handle.is_finished());
            entry.extend(handles);
        }

        for job in pending.jobs {
            let host = self.clone();
            match job {
                Job::GenerateQuestion { ticket, request } => {
                    tokio::spawn(async move { host.generate(id, ticket, request).await });
                }
                Job::ReviewRound { ticket, request } => {
                    tokio::spawn(async move { host.review(id, ticket, request).await });
                }
                Job::RememberQuestion { theme, text } => {
                    tokio::spawn(async move { host.remember(id, theme, text).await });
                }
                Job::RecordGame(record) => {
                    tokio::spawn(async move { host.record(record).await });
                }
            }
        }
    }

    fn deliver_alarm(&self, id: SessionId, alarm: AlarmMessage) {
        let applied = self.run(id, false, |session, now, tunnel, pending| {
            Ok(session.receive_alarm(alarm, now, tunnel, pending))
        });
        if !matches!(applied, Ok(true)) {
            debug!(session = %id, ?alarm, "alarm ignored");
        }
    }

    async fn generate(self, id: SessionId, ticket: Ticket, mut request: GenerateRequest) {
        let config = &self.inner.config;
        match self
            .inner
            .recorder
            .recent_question_texts(&request.theme, config.history_limit)
            .await
        {
            Ok(texts) => request.exclusions.extend(texts),
            Err(error) => warn!(session = %id, %error, "question history unavailable"),
        }

        let result = fetch_question(
            &self.inner.supplier,
            &request,
            config.backfill_attempts,
            config.supplier_timeout,
        )
        .await;

        let applied = self.run(id, false, |session, now, tunnel, pending| {
            Ok(session.receive_question(ticket, result, now, tunnel, pending))
        });
        if !matches!(applied, Ok(true)) {
            debug!(session = %id, %ticket, "question result ignored");
        }
    }

    async fn review(self, id: SessionId, ticket: Ticket, request: CheckRequest) {
        let limit = self.inner.config.supplier_timeout;
        let result = with_deadline(limit, self.inner.supplier.check(&request)).await;
        let applied = self.run(id, false, |session, _, tunnel, pending| {
            Ok(session.receive_review(ticket, result, tunnel, pending))
        });
        if !matches!(applied, Ok(true)) {
            debug!(session = %id, %ticket, "review result ignored");
        }
    }

    async fn remember(self, id: SessionId, theme: String, text: String) {
        if let Err(error) = self.inner.recorder.remember_question(&theme, &text).await {
            warn!(session = %id, %error, "could not remember question");
        }
    }

    async fn record(self, record: GameRecord) {
        let recorder = &self.inner.recorder;
        match recorder.record_game_completion(&record).await {
            Ok(game) => {
                info!(session = %record.session, %game, "game recorded");
                if let Err(error) = recorder.record_answers(game, &record.answers).await {
                    warn!(session = %record.session, %error, "could not record answers");
                }
            }
            Err(error) => warn!(session = %record.session, %error, "could not record game"),
        }
    }

    /// Starts configuring a game, creating the session if needed
    ///
    /// # Errors
    ///
    /// * `StateError::WrongPhase` - A game is already being prepared or played
    pub fn handle_start(&self, id: SessionId, admin: UserId) -> Result<(), Error> {
        self.run(id, true, |session, _, tunnel, _| {
            session.begin_configuration(admin, tunnel)
        })
    }

    /// Applies the admin's settings
    ///
    /// # Errors
    ///
    /// See [`Session::apply_settings`]; `StateError::NoSession` when no game was started.
    pub fn handle_settings(
        &self,
        id: SessionId,
        user_id: UserId,
        settings: Settings,
    ) -> Result<(), Error> {
        self.run(id, false, |session, _, tunnel, _| {
            session.apply_settings(user_id, settings, tunnel)
        })
    }

    /// Sets the theme and opens registration
    ///
    /// # Errors
    ///
    /// See [`Session::set_theme`]; `StateError::NoSession` when no game was started.
    pub fn handle_theme(&self, id: SessionId, user_id: UserId, theme: &str) -> Result<(), Error> {
        self.run(id, false, |session, _, tunnel, pending| {
            session.set_theme(user_id, theme, tunnel, pending)
        })
    }

    /// Registers a participant
    ///
    /// # Errors
    ///
    /// See [`Session::join`]; `StateError::NoSession` when no game was started.
    pub fn handle_join(
        &self,
        id: SessionId,
        user_id: UserId,
        display_name: &str,
    ) -> Result<JoinOutcome, Error> {
        self.run(id, false, |session, _, tunnel, _| {
            session.join(user_id, display_name, tunnel)
        })
    }

    /// Removes a participant
    ///
    /// # Errors
    ///
    /// `StateError::NoSession` when no game was started.
    pub fn handle_leave(&self, id: SessionId, user_id: UserId) -> Result<LeaveOutcome, Error> {
        self.run(id, false, |session, now, tunnel, pending| {
            Ok(session.leave(user_id, now, tunnel, pending))
        })
    }

    /// Closes registration
    ///
    /// # Errors
    ///
    /// See [`Session::close_registration`]; `StateError::NoSession` when no game was started.
    pub fn handle_close_registration(&self, id: SessionId, user_id: UserId) -> Result<(), Error> {
        self.run(id, false, |session, now, tunnel, pending| {
            session.close_registration(user_id, now, tunnel, pending)
        })
    }

    /// Designates the captain
    ///
    /// # Errors
    ///
    /// See [`Session::set_captain`]; `StateError::NoSession` when no game was started.
    pub fn handle_set_captain(
        &self,
        id: SessionId,
        user_id: UserId,
        captain: UserId,
    ) -> Result<(), Error> {
        self.run(id, false, |session, now, tunnel, pending| {
            session.set_captain(user_id, captain, now, tunnel, pending)
        })
    }

    /// Submits an answer for the question with the given epoch
    ///
    /// # Errors
    ///
    /// `StateError::NoSession` when no game was started. Rejections of the
    /// answer itself are reported through the [`SubmitOutcome`].
    pub fn handle_submit_answer(
        &self,
        id: SessionId,
        epoch: EpochId,
        user_id: UserId,
        text: &str,
    ) -> Result<SubmitOutcome, Error> {
        self.run(id, false, |session, now, tunnel, pending| {
            Ok(session.submit(epoch, user_id, text, now, tunnel, pending))
        })
    }

    /// Closes the question with the given epoch as timed out
    ///
    /// # Errors
    ///
    /// `StateError::NoSession` when no game was started.
    ///
    /// # Returns
    ///
    /// `false` when the epoch is stale and nothing changed
    pub fn handle_timeout(&self, id: SessionId, epoch: EpochId) -> Result<bool, Error> {
        self.run(id, false, |session, now, tunnel, pending| {
            Ok(session.on_timeout(epoch, now, tunnel, pending))
        })
    }

    /// Starts the next round
    ///
    /// # Errors
    ///
    /// See [`Session::next_round`]; `StateError::NoSession` when no game was started.
    pub fn handle_next_round(&self, id: SessionId, user_id: UserId) -> Result<(), Error> {
        self.run(id, false, |session, now, tunnel, pending| {
            session.next_round(user_id, now, tunnel, pending)
        })
    }

    /// Asks the supplier again after a failure
    ///
    /// # Errors
    ///
    /// See [`Session::retry`]; `StateError::NoSession` when no game was started.
    pub fn handle_retry(&self, id: SessionId, user_id: UserId) -> Result<(), Error> {
        self.run(id, false, |session, now, tunnel, pending| {
            session.retry(user_id, now, tunnel, pending)
        })
    }

    /// Replaces the session with a fresh one
    ///
    /// The admin may reset at any time. Once the game finished, anyone may
    /// acknowledge it. Pending timers are cancelled; any other continuation
    /// still in flight is rejected by its token.
    ///
    /// # Errors
    ///
    /// * `StateError::NoSession` - No game was started
    /// * `Error::Forbidden` - The game is running and the user is not the admin
    pub fn handle_reset(&self, id: SessionId, user_id: UserId) -> Result<(), Error> {
        {
            let mut store = self.inner.store.lock();
            let session = store.get(id).ok_or(StateError::NoSession)?;
            if !matches!(session.phase(), Phase::GameFinished | Phase::Idle) {
                session.require_admin(user_id)?;
            }
            store.reset(id);
        }

        if let Some(handles) = self.inner.timers.lock().remove(&id) {
            handles.iter().for_each(AbortHandle::abort);
        }
        info!(session = %id, "session reset");
        Ok(())
    }

    /// The open question of a session as participants see it
    pub fn question_view(&self, id: SessionId) -> Option<QuestionView> {
        let now = self.now();
        self.inner.store.lock().get(id)?.question_view(now)
    }

    /// Standings of a session
    pub fn leaderboard(&self, id: SessionId) -> Option<Leaderboard> {
        self.inner
            .store
            .lock()
            .get(id)
            .map(Session::leaderboard)
    }

    /// Copy of a session's state
    pub fn snapshot(&self, id: SessionId) -> Option<Session> {
        self.inner.store.lock().get(id).cloned()
    }
}
