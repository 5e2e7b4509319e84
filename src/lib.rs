//! # Quizroom
//!
//! This library runs live, timed trivia sessions inside chat groups. It handles
//! session configuration, participant registration, the race between question
//! timers and submitted answers, fuzzy answer scoring, and round and game
//! results.
//!
//! The session engine is synchronous: every operation mutates a [`state::Session`]
//! and reports its effects through a [`tunnel::Tunnel`] (events for the chat) and
//! a [`Scheduler`] (timers and background work). The [`host`] module drives the
//! engine on a tokio runtime.

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![warn(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::ignored_unit_patterns)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::wildcard_imports)]
#![allow(clippy::missing_errors_doc)]
use std::time::Duration;

use derive_where::derive_where;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

pub mod answers;
pub mod constants;
pub mod error;
pub mod host;
pub mod ids;
pub mod leaderboard;
mod orchestrator;
pub mod persistence;
pub mod question;
pub mod registration;
pub mod scoring;
pub mod settings;
pub mod state;
pub mod store;
pub mod supplier;
pub mod tunnel;

#[cfg(test)]
mod testing;

use ids::{EpochId, Ticket, UserId};

/// Events emitted for the presentation layer
///
/// Events are transport agnostic view models. The chat layer decides how
/// each one is rendered.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub enum Event {
    /// The admin started configuring a new game
    ConfigurationStarted {
        /// User who will administer the game
        admin: UserId,
        /// Settings offered as the starting point
        settings: settings::Settings,
    },
    /// Settings were accepted and the admin should pick a theme
    ThemeRequested,
    /// Registration is open
    RegistrationOpened {
        /// Chosen theme
        theme: String,
        /// Seconds until registration closes by itself
        seconds_remaining: u64,
    },
    /// The participant list changed
    RegistrationUpdated {
        /// Display names of registered participants
        participants: TruncatedVec<String>,
    },
    /// Team mode needs a captain before the first question
    CaptainRequested {
        /// Participants that can be chosen
        candidates: Vec<state::Participant>,
    },
    /// A round has started
    RoundStarted {
        /// Round number, starting at one
        round: usize,
        /// Total number of rounds
        rounds: usize,
        /// Captain answering in this round (Team mode)
        captain: Option<state::Participant>,
    },
    /// A question is open for answers
    QuestionPresented {
        /// Epoch answers must present
        epoch: EpochId,
        /// Question text
        text: String,
        /// Round number, starting at one
        round: usize,
        /// Question index within the round, starting at zero
        index: usize,
        /// Number of questions in the round
        count: usize,
        /// Seconds until the question times out
        seconds_remaining: u64,
    },
    /// Little time is left on the open question
    TimeWarning {
        /// Epoch of the open question
        epoch: EpochId,
        /// Seconds until the question times out
        seconds_remaining: u64,
    },
    /// An answer was received
    AnswerAcknowledged {
        /// User who answered
        user: UserId,
        /// Whether the answer was recorded
        accepted: bool,
        /// Detailed outcome
        outcome: answers::SubmitOutcome,
    },
    /// A question was closed
    QuestionClosed {
        /// Epoch of the closed question
        epoch: EpochId,
        /// Expected answer
        canonical_answer: String,
        /// Explanation, when the question has one
        explanation: Option<String>,
        /// Whether the timer closed the question
        timed_out: bool,
    },
    /// A round finished
    RoundFinished(leaderboard::RoundSummary),
    /// The game finished
    GameFinished {
        /// Final standings
        leaderboard: leaderboard::Leaderboard,
    },
    /// The supplier could not produce a question; the admin may retry
    SupplierFailed {
        /// Human readable reason
        reason: String,
    },
    /// Registration closed with nobody registered
    GameCancelled,
}

impl Event {
    /// Converts the event to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}

/// Timed events a session asks its host to deliver later
///
/// Every alarm carries the epoch it belongs to. When it fires, the session
/// compares the epoch with its current one and ignores the alarm if they
/// differ, so an alarm never needs to be cancelled for correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// The open question ran out of time
    QuestionTimeout {
        /// Epoch of the question
        epoch: EpochId,
    },
    /// The open question is about to run out of time
    CountdownWarning {
        /// Epoch of the question
        epoch: EpochId,
        /// Seconds left when the warning fires
        seconds_remaining: u64,
    },
    /// The registration window elapsed
    RegistrationDeadline {
        /// Epoch of the registration
        epoch: EpochId,
    },
}

/// Background work a session asks its host to perform
///
/// Results come back through [`state::Session::receive_question`] and
/// [`state::Session::receive_review`] together with the ticket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Job {
    /// Generate one question
    GenerateQuestion {
        /// Ticket the result must present
        ticket: Ticket,
        /// What to generate
        request: supplier::GenerateRequest,
    },
    /// Let the supplier judge the answers of a finished round
    ReviewRound {
        /// Ticket the verdicts must present
        ticket: Ticket,
        /// Answers to judge
        request: supplier::CheckRequest,
    },
    /// Add a presented question to the theme's history
    RememberQuestion {
        /// Theme the question was asked under
        theme: String,
        /// Question text
        text: String,
    },
    /// Persist a finished game
    RecordGame(persistence::GameRecord),
}

/// Sink for the timers and background work requested by a session
pub trait Scheduler {
    /// Delivers `alarm` back to the session after `after` has elapsed
    fn schedule(&mut self, alarm: AlarmMessage, after: Duration);

    /// Starts `job` in the background
    fn dispatch(&mut self, job: Job);
}

/// A truncated vector that maintains the exact count while limiting displayed items
///
/// This structure is useful for displaying a limited number of items while
/// still showing the total count. For example, showing "60 participants" but
/// only listing the first 50 names.
#[derive(Debug, Clone, Serialize)]
#[derive_where(Default)]
pub struct TruncatedVec<T> {
    /// The exact total count of items
    exact_count: usize,
    /// The truncated list of items (up to the limit)
    items: Vec<T>,
}

impl<T: Clone> TruncatedVec<T> {
    /// Creates a new truncated vector from an iterator
    ///
    /// # Arguments
    ///
    /// * `list` - An iterator over items to include
    /// * `limit` - Maximum number of items to include in the truncated vector
    /// * `exact_count` - The exact total count of items (may be larger than limit)
    pub fn new<I: Iterator<Item = T>>(list: I, limit: usize, exact_count: usize) -> Self {
        let items = list.take(limit).collect_vec();
        Self { exact_count, items }
    }

    /// Maps a function over the items in the truncated vector
    pub fn map<F, U>(self, f: F) -> TruncatedVec<U>
    where
        F: Fn(T) -> U,
    {
        TruncatedVec {
            exact_count: self.exact_count,
            items: self.items.into_iter().map(f).collect_vec(),
        }
    }

    /// Returns the exact count of items
    pub fn exact_count(&self) -> usize {
        self.exact_count
    }

    /// Returns the truncated items
    pub fn items(&self) -> &[T] {
        &self.items
    }
}
