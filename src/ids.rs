//! Identifiers used by the session engine
//!
//! Sessions and users are identified by the numeric ids of the chat platform,
//! while question epochs and background work are identified by random tokens
//! minted by the engine itself. Tokens are compared, never inferred, before
//! any asynchronous completion is applied to a session.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use uuid::Uuid;

/// Identifier of the chat or group a session belongs to
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
)]
#[serde(transparent)]
pub struct SessionId(i64);

impl SessionId {
    /// Wraps a raw chat id
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw chat id
    pub fn get(self) -> i64 {
        self.0
    }
}

/// Identifier of a chat user
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Wraps a raw user id
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw user id
    pub fn get(self) -> i64 {
        self.0
    }
}

/// Identifier assigned by persistence to a finished game
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
)]
#[serde(transparent)]
pub struct GameId(i64);

/// Token minted each time a question is presented
///
/// Every timer and every answer carries the epoch it was created for. A
/// continuation whose epoch differs from the open question's epoch is stale
/// and must leave the session untouched. Epochs are fresh even when the same
/// question text is presented twice.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct EpochId(Uuid);

impl EpochId {
    /// Creates a new random epoch
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EpochId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for EpochId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EpochId {
    type Err = uuid::Error;

    /// Parses an epoch from a UUID string
    ///
    /// # Errors
    ///
    /// Returns a `uuid::Error` if the string is not a valid UUID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// Token identifying one background request made on behalf of a session
///
/// The session remembers the ticket of the request it is waiting for, so a
/// reply that arrives after a reset, or after a newer request was issued,
/// is recognized and dropped.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, DeserializeFromStr, SerializeDisplay)]
pub struct Ticket(Uuid);

impl Ticket {
    /// Creates a new random ticket
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Ticket {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Ticket {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}
