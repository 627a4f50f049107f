use std::fmt;

use tracing::{debug, info};

use crate::protocol::{AdmissionStatus, ClientMessage, NotificationId, ParticipantId, RoomId, ServerEvent};

use super::connection::JoinParams;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionState {
  Connecting,
  Waiting,
  Active,
  /// Terminal; only a brand new attempt gets back in.
  Rejected,
  /// Terminal; the user left.
  Left,
}

impl AdmissionState {
  pub fn is_terminal(self) -> bool {
    matches!(self, AdmissionState::Rejected | AdmissionState::Left)
  }
}

impl fmt::Display for AdmissionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      AdmissionState::Connecting => "connecting",
      AdmissionState::Waiting => "waiting",
      AdmissionState::Active => "active",
      AdmissionState::Rejected => "rejected",
      AdmissionState::Left => "left",
    };
    f.write_str(name)
  }
}

/// Someone in the waiting room, as seen by the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingParticipant {
  pub participant_id: ParticipantId,
  pub display_name: String,
  pub notification_id: NotificationId,
}

/// Local participant lifecycle, plus the host's queue of people waiting to get in.
#[derive(Debug)]
pub struct Admission {
  room_id: RoomId,
  participant_id: ParticipantId,
  is_host: bool,
  state: AdmissionState,
  pending: Vec<PendingParticipant>,
}

impl Admission {
  pub fn new(join: &JoinParams) -> Self {
    Self {
      room_id: join.room_id.clone(),
      participant_id: join.participant_id.clone(),
      is_host: join.is_host,
      state: AdmissionState::Connecting,
      pending: Vec::new(),
    }
  }

  pub fn state(&self) -> AdmissionState {
    self.state
  }

  pub fn is_host(&self) -> bool {
    self.is_host
  }

  /// Waiting participants in arrival order.
  pub fn pending(&self) -> &[PendingParticipant] {
    &self.pending
  }

  /// Feeds a relay event through the state machine; returns the new state on a transition.
  pub fn apply(&mut self, event: &ServerEvent) -> Option<AdmissionState> {
    match event {
      ServerEvent::Joined { status, .. } if self.state == AdmissionState::Connecting => {
        let next = match (self.is_host, status) {
          (true, _) | (false, AdmissionStatus::Active) => AdmissionState::Active,
          (false, AdmissionStatus::Waiting) => AdmissionState::Waiting,
        };
        self.transition(next)
      }
      ServerEvent::Admitted { .. } if self.state == AdmissionState::Waiting => self.transition(AdmissionState::Active),
      ServerEvent::Rejected { .. } if self.state == AdmissionState::Waiting => {
        self.transition(AdmissionState::Rejected)
      }
      ServerEvent::Waiting { participant_id, display_name, notification_id } if self.is_host => {
        if self.pending.iter().all(|pending| pending.participant_id != *participant_id) {
          self.pending.push(PendingParticipant {
            participant_id: participant_id.clone(),
            display_name: display_name.clone(),
            notification_id: notification_id.clone(),
          });
        }
        None
      }
      ServerEvent::UserLeft { participant_id } => {
        self.pending.retain(|pending| pending.participant_id != *participant_id);
        None
      }
      _ => None,
    }
  }

  /// The relay forgets everything across a full disconnect; start over from `Connecting`.
  pub fn reset(&mut self) {
    if !self.state.is_terminal() {
      self.state = AdmissionState::Connecting;
      self.pending.clear();
    }
  }

  pub fn admit(&mut self, participant_id: &ParticipantId) -> Option<ClientMessage> {
    self.decide(participant_id).map(|target_participant_id| ClientMessage::Admit {
      room_id: self.room_id.clone(),
      target_participant_id,
    })
  }

  pub fn reject(&mut self, participant_id: &ParticipantId) -> Option<ClientMessage> {
    self.decide(participant_id).map(|target_participant_id| ClientMessage::Reject {
      room_id: self.room_id.clone(),
      target_participant_id,
    })
  }

  /// Admits everyone waiting right now.
  pub fn admit_all(&mut self) -> Vec<ClientMessage> {
    let snapshot: Vec<_> = self.pending.iter().map(|pending| pending.participant_id.clone()).collect();
    snapshot.iter().filter_map(|participant_id| self.admit(participant_id)).collect()
  }

  /// Moves to `Left`; returns the leave notice when there is a seat to give up.
  pub fn leave(&mut self) -> Option<ClientMessage> {
    if self.state.is_terminal() {
      return None;
    }
    self.transition(AdmissionState::Left);
    self.pending.clear();
    Some(ClientMessage::Leave { room_id: self.room_id.clone(), participant_id: self.participant_id.clone() })
  }

  fn decide(&mut self, participant_id: &ParticipantId) -> Option<ParticipantId> {
    if !self.is_host || self.state != AdmissionState::Active {
      debug!("only an active host decides admissions");
      return None;
    }
    let index = self.pending.iter().position(|pending| pending.participant_id == *participant_id)?;
    Some(self.pending.remove(index).participant_id)
  }

  fn transition(&mut self, next: AdmissionState) -> Option<AdmissionState> {
    if self.state == next {
      return None;
    }
    info!("admission {} -> {next}", self.state);
    self.state = next;
    Some(next)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn join(is_host: bool) -> JoinParams {
    JoinParams {
      room_id: RoomId::new("r1"),
      participant_id: ParticipantId::new(if is_host { "h" } else { "p1" }),
      is_host,
      display_name: "someone".into(),
    }
  }

  fn joined(status: AdmissionStatus) -> ServerEvent {
    ServerEvent::Joined { room_id: RoomId::new("r1"), participant_id: ParticipantId::new("x"), status }
  }

  fn waiting(id: &str) -> ServerEvent {
    ServerEvent::Waiting {
      participant_id: ParticipantId::new(id),
      display_name: id.to_uppercase(),
      notification_id: NotificationId::new(&RoomId::new("r1"), &ParticipantId::new(id)),
    }
  }

  fn active_host() -> Admission {
    let mut admission = Admission::new(&join(true));
    admission.apply(&joined(AdmissionStatus::Active));
    admission
  }

  #[test]
  fn host_goes_active_on_join_ack() {
    let mut admission = Admission::new(&join(true));
    assert_eq!(admission.state(), AdmissionState::Connecting);
    assert_eq!(admission.apply(&joined(AdmissionStatus::Active)), Some(AdmissionState::Active));
  }

  #[test]
  fn participant_waits_then_gets_admitted() {
    let mut admission = Admission::new(&join(false));
    assert_eq!(admission.apply(&joined(AdmissionStatus::Waiting)), Some(AdmissionState::Waiting));
    assert_eq!(
      admission.apply(&ServerEvent::Admitted { room_id: RoomId::new("r1") }),
      Some(AdmissionState::Active)
    );
  }

  #[test]
  fn participant_in_hostless_room_goes_straight_to_active() {
    let mut admission = Admission::new(&join(false));
    assert_eq!(admission.apply(&joined(AdmissionStatus::Active)), Some(AdmissionState::Active));
  }

  #[test]
  fn rejection_is_terminal() {
    let mut admission = Admission::new(&join(false));
    admission.apply(&joined(AdmissionStatus::Waiting));
    assert_eq!(
      admission.apply(&ServerEvent::Rejected { room_id: RoomId::new("r1") }),
      Some(AdmissionState::Rejected)
    );
    assert_eq!(admission.apply(&ServerEvent::Admitted { room_id: RoomId::new("r1") }), None);
    admission.reset();
    assert_eq!(admission.state(), AdmissionState::Rejected);
    assert_eq!(admission.leave(), None);
  }

  #[test]
  fn host_queue_keeps_arrival_order_without_duplicates() {
    let mut admission = active_host();
    admission.apply(&waiting("p2"));
    admission.apply(&waiting("p1"));
    admission.apply(&waiting("p2"));

    let ids: Vec<_> = admission.pending().iter().map(|p| p.participant_id.as_str()).collect();
    assert_eq!(ids, ["p2", "p1"]);
  }

  #[test]
  fn admit_and_reject_take_from_queue() {
    let mut admission = active_host();
    admission.apply(&waiting("p1"));
    admission.apply(&waiting("p2"));

    assert!(matches!(
      admission.admit(&ParticipantId::new("p1")),
      Some(ClientMessage::Admit { target_participant_id, .. }) if target_participant_id.as_str() == "p1"
    ));
    assert_eq!(admission.admit(&ParticipantId::new("p1")), None);
    assert!(matches!(admission.reject(&ParticipantId::new("p2")), Some(ClientMessage::Reject { .. })));
    assert!(admission.pending().is_empty());
  }

  #[test]
  fn admit_all_uses_a_snapshot() {
    let mut admission = active_host();
    admission.apply(&waiting("p1"));
    admission.apply(&waiting("p2"));
    admission.apply(&waiting("p3"));

    let messages = admission.admit_all();
    assert_eq!(messages.len(), 3);
    assert!(admission.pending().is_empty());
  }

  #[test]
  fn departed_waiter_leaves_the_queue() {
    let mut admission = active_host();
    admission.apply(&waiting("p1"));
    admission.apply(&ServerEvent::UserLeft { participant_id: ParticipantId::new("p1") });
    assert!(admission.pending().is_empty());
  }

  #[test]
  fn participants_cannot_admit() {
    let mut admission = Admission::new(&join(false));
    admission.apply(&joined(AdmissionStatus::Active));
    admission.apply(&waiting("p2"));
    assert!(admission.pending().is_empty());
    assert_eq!(admission.admit(&ParticipantId::new("p2")), None);
  }

  #[test]
  fn reconnect_starts_over() {
    let mut admission = active_host();
    admission.apply(&waiting("p1"));
    admission.reset();
    assert_eq!(admission.state(), AdmissionState::Connecting);
    assert!(admission.pending().is_empty());
  }

  #[test]
  fn leaving_is_terminal() {
    let mut admission = active_host();
    assert!(matches!(admission.leave(), Some(ClientMessage::Leave { .. })));
    assert_eq!(admission.state(), AdmissionState::Left);
    assert_eq!(admission.leave(), None);
  }
}
