//! Outgoing events
//!
//! This module defines the trait through which a session reports what
//! happened to the chat it belongs to. The chat transport decides how each
//! event is rendered and delivered.

use super::{Event, ids::SessionId};

/// Trait for sending events to the chat of a session
///
/// Implementations might post messages, edit an existing message, or update
/// inline buttons. Delivery is fire-and-forget from the session's point of
/// view; failures must be handled by the implementation.
pub trait Tunnel {
    /// Sends an event to the chat of `session`
    ///
    /// # Arguments
    ///
    /// * `session` - The session the event belongs to
    /// * `event` - The event to deliver
    fn send_event(&self, session: SessionId, event: &Event);
}
