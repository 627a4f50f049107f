use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::{ParticipantId, RoomId};

use super::connection::ConnectionId;

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Member {
  pub connection_id: ConnectionId,
  pub display_name: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct WaitingMember {
  pub connection_id: ConnectionId,
  pub display_name: String,
  pub joined_at: DateTime<Utc>,
}

/// Where a participant sat before being removed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Departure {
  Present { member: Member, was_host: bool },
  Waiting(WaitingMember),
}

impl Departure {
  pub fn connection_id(&self) -> ConnectionId {
    match self {
      Departure::Present { member, .. } => member.connection_id,
      Departure::Waiting(waiting) => waiting.connection_id,
    }
  }
}

/// Authoritative state of one room.
///
/// A participant ID lives in at most one of `participants` and `waiting`.
#[derive(Debug, Serialize)]
pub struct Room {
  pub id: RoomId,
  host: Option<ParticipantId>,
  participants: HashMap<ParticipantId, Member>,
  waiting: HashMap<ParticipantId, WaitingMember>,
  /// Set once the room was emptied and unlinked from the registry.
  #[serde(skip)]
  closed: bool,
}

impl Room {
  pub(super) fn new(id: RoomId) -> Self {
    Self { id, host: None, participants: Default::default(), waiting: Default::default(), closed: false }
  }

  pub fn host(&self) -> Option<&ParticipantId> {
    self.host.as_ref()
  }

  pub fn is_host(&self, participant_id: &ParticipantId) -> bool {
    self.host.as_ref() == Some(participant_id)
  }

  pub fn participant(&self, participant_id: &ParticipantId) -> Option<&Member> {
    self.participants.get(participant_id)
  }

  pub fn waiting_member(&self, participant_id: &ParticipantId) -> Option<&WaitingMember> {
    self.waiting.get(participant_id)
  }

  /// Connection of whichever seat the participant holds.
  pub fn seat(&self, participant_id: &ParticipantId) -> Option<ConnectionId> {
    self
      .participants
      .get(participant_id)
      .map(|member| member.connection_id)
      .or_else(|| self.waiting.get(participant_id).map(|waiting| waiting.connection_id))
  }

  pub fn participants(&self) -> impl Iterator<Item = (&ParticipantId, &Member)> {
    self.participants.iter()
  }

  /// Waiting participants, oldest first.
  pub fn waiting(&self) -> Vec<(&ParticipantId, &WaitingMember)> {
    let mut waiting: Vec<_> = self.waiting.iter().collect();
    waiting.sort_by(|a, b| a.1.joined_at.cmp(&b.1.joined_at).then_with(|| a.0.cmp(b.0)));
    waiting
  }

  /// Current participants other than `participant_id`.
  pub fn others<'a>(
    &'a self,
    participant_id: &'a ParticipantId,
  ) -> impl Iterator<Item = (&'a ParticipantId, &'a Member)> + 'a {
    self.participants.iter().filter(move |(id, _)| *id != participant_id)
  }

  /// Connection currently holding the host slot, if the host is present.
  pub fn host_connection(&self) -> Option<ConnectionId> {
    self.host.as_ref().and_then(|host| self.participants.get(host)).map(|member| member.connection_id)
  }

  /// Puts the participant into the session, taking it out of the waiting room if needed.
  pub fn place_participant(&mut self, participant_id: ParticipantId, member: Member) {
    self.waiting.remove(&participant_id);
    self.participants.insert(participant_id, member);
  }

  pub fn place_waiting(&mut self, participant_id: ParticipantId, waiting: WaitingMember) {
    self.participants.remove(&participant_id);
    self.waiting.insert(participant_id, waiting);
  }

  /// Claims the host slot; returns the previous holder when it was someone else.
  pub fn assign_host(&mut self, participant_id: ParticipantId) -> Option<ParticipantId> {
    self.host.replace(participant_id.clone()).filter(|previous| *previous != participant_id)
  }

  /// Points a waiting seat at a new connection, returning the one it replaced.
  pub fn rebind_waiting(
    &mut self,
    participant_id: &ParticipantId,
    connection_id: ConnectionId,
  ) -> Option<ConnectionId> {
    self.waiting.get_mut(participant_id).map(|waiting| std::mem::replace(&mut waiting.connection_id, connection_id))
  }

  pub fn take_waiting(&mut self, participant_id: &ParticipantId) -> Option<WaitingMember> {
    self.waiting.remove(participant_id)
  }

  pub fn remove(&mut self, participant_id: &ParticipantId) -> Option<Departure> {
    if let Some(member) = self.participants.remove(participant_id) {
      let was_host = self.is_host(participant_id);
      if was_host {
        self.host = None;
      }
      return Some(Departure::Present { member, was_host });
    }
    self.waiting.remove(participant_id).map(Departure::Waiting)
  }

  pub fn is_empty(&self) -> bool {
    self.participants.is_empty() && self.waiting.is_empty()
  }

  pub(super) fn close(&mut self) {
    self.closed = true;
  }

  pub(super) fn is_closed(&self) -> bool {
    self.closed
  }

  pub fn snapshot(&self) -> RoomSnapshot {
    let mut participants: Vec<_> = self.participants.keys().cloned().collect();
    participants.sort();
    RoomSnapshot {
      id: self.id.clone(),
      host: self.host.clone(),
      participants,
      waiting: self.waiting().into_iter().map(|(id, _)| id.clone()).collect(),
    }
  }
}

/// Point-in-time copy of a room's membership.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RoomSnapshot {
  pub id: RoomId,
  pub host: Option<ParticipantId>,
  pub participants: Vec<ParticipantId>,
  pub waiting: Vec<ParticipantId>,
}
