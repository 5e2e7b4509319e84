//! Test doubles shared by the unit tests

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use web_time::SystemTime;

use crate::{
    AlarmMessage, Event, Job, Scheduler,
    error::{RecorderError, SupplierError},
    ids::{GameId, SessionId, Ticket, UserId},
    persistence::{AnswerRow, GameRecord, GameRecorder},
    question::{QuestionRecord, RawQuestion},
    settings::{Mode, Settings},
    state::Session,
    supplier::{CheckRequest, GenerateRequest, QuestionSupplier, RawVerdict},
    tunnel::Tunnel,
};

pub const ADMIN: UserId = UserId::new(1000);

/// Installs a test subscriber filtered by `TEST_LOG`, then `RUST_LOG`
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("TEST_LOG")
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Default)]
pub struct RecordingTunnel {
    events: Mutex<Vec<(SessionId, Event)>>,
}

impl RecordingTunnel {
    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(_, event)| predicate(event))
            .count()
    }

    pub fn collect<U>(&self, f: impl Fn(&Event) -> Option<U>) -> Vec<U> {
        self.events
            .lock()
            .iter()
            .filter_map(|(_, event)| f(event))
            .collect()
    }
}

impl Tunnel for RecordingTunnel {
    fn send_event(&self, session: SessionId, event: &Event) {
        self.events.lock().push((session, event.clone()));
    }
}

#[derive(Debug, Default)]
pub struct RecordingScheduler {
    pub alarms: Vec<(AlarmMessage, Duration)>,
    pub jobs: Vec<Job>,
}

impl RecordingScheduler {
    pub fn generation_tickets(&self) -> Vec<Ticket> {
        self.jobs
            .iter()
            .filter_map(|job| match job {
                Job::GenerateQuestion { ticket, .. } => Some(*ticket),
                _ => None,
            })
            .collect()
    }

    pub fn review_requests(&self) -> Vec<(Ticket, CheckRequest)> {
        self.jobs
            .iter()
            .filter_map(|job| match job {
                Job::ReviewRound { ticket, request } => Some((*ticket, request.clone())),
                _ => None,
            })
            .collect()
    }
}

impl Scheduler for RecordingScheduler {
    fn schedule(&mut self, alarm: AlarmMessage, after: Duration) {
        self.alarms.push((alarm, after));
    }

    fn dispatch(&mut self, job: Job) {
        self.jobs.push(job);
    }
}

pub fn sample_question(n: usize) -> QuestionRecord {
    QuestionRecord::new(
        &format!("Question number {n}?"),
        &format!("answer {n}"),
        &format!("Because of {n}."),
    )
}

pub fn opened_at() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

pub fn registering_session_with(settings: Settings) -> Session {
    let tunnel = RecordingTunnel::default();
    let mut scheduler = RecordingScheduler::default();
    let mut session = Session::new(SessionId::from(1));

    session.begin_configuration(ADMIN, &tunnel).unwrap();
    session.apply_settings(ADMIN, settings, &tunnel).unwrap();
    session
        .set_theme(ADMIN, "General knowledge", &tunnel, &mut scheduler)
        .unwrap();
    session
}

pub fn registering_session(mode: Mode) -> Session {
    registering_session_with(Settings {
        mode,
        ..Settings::default()
    })
}

/// Returns a session with the first question open, the scheduler that saw
/// the game start, and the time the question opened
///
/// In Team mode the first participant is the captain.
pub fn playing_session(
    settings: Settings,
    participants: &[i64],
) -> (Session, RecordingScheduler, SystemTime) {
    let tunnel = RecordingTunnel::default();
    let mut scheduler = RecordingScheduler::default();
    let now = opened_at();
    let mode = settings.mode;
    let mut session = registering_session_with(settings);

    for id in participants {
        session
            .join(UserId::from(*id), &format!("Player {id}"), &tunnel)
            .unwrap();
    }
    session
        .close_registration(ADMIN, now, &tunnel, &mut scheduler)
        .unwrap();
    if mode == Mode::Team {
        session
            .set_captain(ADMIN, UserId::from(participants[0]), now, &tunnel, &mut scheduler)
            .unwrap();
    }

    let ticket = scheduler.generation_tickets()[0];
    assert!(session.receive_question(ticket, Ok(sample_question(1)), now, &tunnel, &mut scheduler));

    (session, scheduler, now)
}

/// Supplier that replays a script of results, then returns empty batches
///
/// It can also be told to never answer a number of generation calls, or any
/// check call.
#[derive(Debug, Default)]
pub struct ScriptedSupplier {
    script: Mutex<VecDeque<Result<Vec<RawQuestion>, SupplierError>>>,
    verdicts: Mutex<Option<Result<Option<Vec<RawVerdict>>, SupplierError>>>,
    calls: AtomicUsize,
    stalled_calls: AtomicUsize,
    stall_checks: bool,
}

impl ScriptedSupplier {
    pub fn new(script: Vec<Result<Vec<RawQuestion>, SupplierError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn with_verdicts(self, verdicts: Result<Option<Vec<RawVerdict>>, SupplierError>) -> Self {
        *self.verdicts.lock() = Some(verdicts);
        self
    }

    /// The next `calls` generation calls never complete
    pub fn stalling(self, calls: usize) -> Self {
        self.stalled_calls.store(calls, Ordering::SeqCst);
        self
    }

    pub fn stalling_checks(self) -> Self {
        Self {
            stall_checks: true,
            ..self
        }
    }

    pub fn push(&self, result: Result<Vec<RawQuestion>, SupplierError>) {
        self.script.lock().push_back(result);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuestionSupplier for ScriptedSupplier {
    async fn generate(&self, _request: &GenerateRequest) -> Result<Vec<RawQuestion>, SupplierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stalled = self
            .stalled_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stalled {
            std::future::pending::<()>().await;
        }
        self.script.lock().pop_front().unwrap_or(Ok(Vec::new()))
    }

    async fn check(&self, _request: &CheckRequest) -> Result<Option<Vec<RawVerdict>>, SupplierError> {
        if self.stall_checks {
            std::future::pending::<()>().await;
        }
        self.verdicts.lock().clone().unwrap_or(Ok(None))
    }
}

/// Recorder that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    pub games: Mutex<Vec<GameRecord>>,
    pub answers: Mutex<Vec<(GameId, Vec<AnswerRow>)>>,
    pub history: Mutex<Vec<(String, String)>>,
    pub fail: bool,
}

impl MemoryRecorder {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn check(&self) -> Result<(), RecorderError> {
        if self.fail {
            Err(RecorderError("storage offline".to_owned()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl GameRecorder for MemoryRecorder {
    async fn record_game_completion(&self, record: &GameRecord) -> Result<GameId, RecorderError> {
        self.check()?;
        let mut games = self.games.lock();
        games.push(record.clone());
        Ok(GameId::from(games.len() as i64))
    }

    async fn record_answers(&self, game: GameId, rows: &[AnswerRow]) -> Result<(), RecorderError> {
        self.check()?;
        self.answers.lock().push((game, rows.to_vec()));
        Ok(())
    }

    async fn recent_question_texts(
        &self,
        theme: &str,
        limit: usize,
    ) -> Result<Vec<String>, RecorderError> {
        self.check()?;
        Ok(self
            .history
            .lock()
            .iter()
            .rev()
            .filter(|(stored, _)| stored == theme)
            .take(limit)
            .map(|(_, text)| text.clone())
            .collect())
    }

    async fn remember_question(&self, theme: &str, text: &str) -> Result<(), RecorderError> {
        self.check()?;
        self.history.lock().push((theme.to_owned(), text.to_owned()));
        Ok(())
    }
}
