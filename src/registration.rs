//! Participant registration
//!
//! Registration opens once the admin picked a theme and closes either when
//! the admin closes it or when the registration window elapses. Team games
//! then wait for a captain; Individual games start right away.

use itertools::Itertools;
use serde::Serialize;
use tracing::{debug, info, warn};
use web_time::SystemTime;

use crate::{
    AlarmMessage, Event, Scheduler, TruncatedVec,
    constants::registration::{MAX_PARTICIPANTS, NAMES_SHOWN},
    error::{ConfigurationError, Error, StateError},
    ids::{EpochId, UserId},
    settings::Mode,
    state::{Participant, Phase, Session},
    tunnel::Tunnel,
};

/// Result of a join request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JoinOutcome {
    /// The user was added
    Joined,
    /// The user was already registered
    AlreadyJoined,
}

/// Result of a leave request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LeaveOutcome {
    /// The user was removed
    Removed,
    /// The user was not registered
    NotFound,
    /// The admin cannot leave; the game must be reset instead
    AdminBarred,
}

impl Session {
    fn announce_participants<T: Tunnel>(&self, tunnel: &T) {
        let names = self
            .participants
            .values()
            .map(|participant| participant.display_name.clone())
            .collect_vec();
        let count = names.len();

        tunnel.send_event(
            self.id,
            &Event::RegistrationUpdated {
                participants: TruncatedVec::new(names.into_iter(), NAMES_SHOWN, count),
            },
        );
    }

    /// Opens registration and arms the registration deadline
    pub(crate) fn open_registration<T: Tunnel, S: Scheduler>(&mut self, tunnel: &T, scheduler: &mut S) {
        let epoch = EpochId::new();
        self.phase = Phase::Registering;
        self.registration_epoch = Some(epoch);

        info!(session = %self.id, theme = %self.settings.theme, "registration opened");
        tunnel.send_event(
            self.id,
            &Event::RegistrationOpened {
                theme: self.settings.theme.clone(),
                seconds_remaining: self.registration_window.as_secs(),
            },
        );
        scheduler.schedule(
            AlarmMessage::RegistrationDeadline { epoch },
            self.registration_window,
        );
    }

    /// Registers a participant
    ///
    /// # Arguments
    ///
    /// * `user_id` - Chat user id
    /// * `display_name` - Name to show, sanitized before use
    /// * `tunnel` - Receives the updated participant list
    ///
    /// # Errors
    ///
    /// * `StateError::WrongPhase` - Registration is not open
    /// * `ConfigurationError::TooManyParticipants` - The session is full
    pub fn join<T: Tunnel>(
        &mut self,
        user_id: UserId,
        display_name: &str,
        tunnel: &T,
    ) -> Result<JoinOutcome, Error> {
        self.expect_phase(Phase::Registering)?;

        if self.participants.contains_key(&user_id) {
            return Ok(JoinOutcome::AlreadyJoined);
        }
        if self.participants.len() >= MAX_PARTICIPANTS {
            return Err(ConfigurationError::TooManyParticipants.into());
        }

        self.participants
            .insert(user_id, Participant::new(user_id, display_name));
        debug!(session = %self.id, user = %user_id, "participant joined");
        self.announce_participants(tunnel);

        Ok(JoinOutcome::Joined)
    }

    /// Removes a participant
    ///
    /// A departing captain leaves Team mode without a captain until the
    /// admin picks a new one. In Individual mode the open question is closed
    /// when everyone who remains has answered.
    pub fn leave<T: Tunnel, S: Scheduler>(
        &mut self,
        user_id: UserId,
        now: SystemTime,
        tunnel: &T,
        scheduler: &mut S,
    ) -> LeaveOutcome {
        if self.admin == Some(user_id) {
            return LeaveOutcome::AdminBarred;
        }
        if self.participants.remove(&user_id).is_none() {
            return LeaveOutcome::NotFound;
        }
        if self.captain == Some(user_id) {
            self.captain = None;
        }

        debug!(session = %self.id, user = %user_id, "participant left");
        self.announce_participants(tunnel);

        if self.phase == Phase::AwaitingAnswer && self.question_complete() {
            self.finalize_question(false, now, tunnel, scheduler);
        }

        LeaveOutcome::Removed
    }

    fn end_registration<T: Tunnel, S: Scheduler>(
        &mut self,
        now: SystemTime,
        tunnel: &T,
        scheduler: &mut S,
    ) -> Result<(), ConfigurationError> {
        if self.participants.is_empty() {
            return Err(ConfigurationError::NoParticipants);
        }

        self.registration_epoch = None;
        self.current_round = 1;
        info!(
            session = %self.id,
            participants = self.participants.len(),
            "registration closed"
        );

        match self.settings.mode {
            Mode::Team => {
                self.phase = Phase::AwaitingCaptain;
                tunnel.send_event(
                    self.id,
                    &Event::CaptainRequested {
                        candidates: self.participants.values().cloned().collect_vec(),
                    },
                );
            }
            Mode::Individual => self.start_round(now, tunnel, scheduler),
        }

        Ok(())
    }

    /// Closes registration on the admin's request
    ///
    /// # Errors
    ///
    /// * `Error::Forbidden` - The user is not the admin
    /// * `StateError::WrongPhase` - Registration is not open
    /// * `ConfigurationError::NoParticipants` - Nobody joined; registration stays open
    pub fn close_registration<T: Tunnel, S: Scheduler>(
        &mut self,
        user_id: UserId,
        now: SystemTime,
        tunnel: &T,
        scheduler: &mut S,
    ) -> Result<(), Error> {
        self.require_admin(user_id)?;
        self.expect_phase(Phase::Registering)?;
        self.end_registration(now, tunnel, scheduler)?;
        Ok(())
    }

    /// Designates the captain in Team mode
    ///
    /// While waiting for a captain this starts the first round. During play
    /// it replaces the captain, for example after the previous one left.
    ///
    /// # Errors
    ///
    /// * `Error::Forbidden` - The user is not the admin
    /// * `ConfigurationError::NotAParticipant` - The captain has not joined
    /// * `StateError::WrongPhase` - Not a Team game waiting for or playing rounds
    pub fn set_captain<T: Tunnel, S: Scheduler>(
        &mut self,
        user_id: UserId,
        captain: UserId,
        now: SystemTime,
        tunnel: &T,
        scheduler: &mut S,
    ) -> Result<(), Error> {
        self.require_admin(user_id)?;
        if self.settings.mode != Mode::Team {
            return Err(StateError::WrongPhase(self.phase).into());
        }
        if !self.participants.contains_key(&captain) {
            return Err(ConfigurationError::NotAParticipant.into());
        }

        match self.phase {
            Phase::AwaitingCaptain => {
                self.captain = Some(captain);
                self.start_round(now, tunnel, scheduler);
                Ok(())
            }
            phase if phase.is_playing() => {
                info!(session = %self.id, captain = %captain, "captain replaced");
                self.captain = Some(captain);
                Ok(())
            }
            phase => Err(StateError::WrongPhase(phase).into()),
        }
    }

    /// Closes registration when its window elapsed
    ///
    /// With nobody registered the game is cancelled and the session starts
    /// over. Alarms for an earlier registration are ignored.
    pub(crate) fn on_registration_deadline<T: Tunnel, S: Scheduler>(
        &mut self,
        epoch: EpochId,
        now: SystemTime,
        tunnel: &T,
        scheduler: &mut S,
    ) -> bool {
        if self.phase != Phase::Registering || self.registration_epoch != Some(epoch) {
            return false;
        }

        if self.participants.is_empty() {
            info!(session = %self.id, "registration expired without participants");
            tunnel.send_event(self.id, &Event::GameCancelled);
            *self = Session::with_registration_window(self.id, self.registration_window);
            return true;
        }

        if let Err(error) = self.end_registration(now, tunnel, scheduler) {
            warn!(session = %self.id, %error, "could not close registration");
        }
        true
    }
}
