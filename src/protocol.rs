//! Relay message contract shared by the server and the client.
//!
//! Every frame is a JSON object tagged by `type` with the kebab-case event name, e.g.
//! `{"type":"user-joined","participantId":"p1","displayName":"Ada","isHost":false}`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct RoomId(String);

impl RoomId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for RoomId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Client-generated participant identity, stable for a whole browser session.
///
/// Ordering is plain string ordering; the negotiation tie-break depends on it.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParticipantId(String);

impl ParticipantId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn generate() -> Self {
    Self(Ulid::new().to_string().to_lowercase())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ParticipantId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Identifies one "participant waiting" prompt: one per (room, participant) pair.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct NotificationId(String);

impl NotificationId {
  pub fn new(room_id: &RoomId, participant_id: &ParticipantId) -> Self {
    Self(format!("{room_id}:{participant_id}"))
  }
}

impl fmt::Display for NotificationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
  Offer,
  Answer,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SessionDescription {
  #[serde(rename = "type")]
  pub kind: SdpKind,
  pub sdp: String,
}

impl SessionDescription {
  pub fn offer(sdp: impl Into<String>) -> Self {
    Self { kind: SdpKind::Offer, sdp: sdp.into() }
  }

  pub fn answer(sdp: impl Into<String>) -> Self {
    Self { kind: SdpKind::Answer, sdp: sdp.into() }
  }
}

/// Browser compliant ICE candidate
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
  pub candidate: String,
  #[serde(default)]
  pub sdp_mid: Option<String>,
  #[serde(default, rename = "sdpMLineIndex")]
  pub sdp_mline_index: Option<u16>,
  #[serde(default)]
  pub username_fragment: Option<String>,
}

/// Where the server placed a joiner.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionStatus {
  Waiting,
  Active,
}

/// Sent by clients to the relay.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
  Join {
    room_id: RoomId,
    participant_id: ParticipantId,
    #[serde(default)]
    is_host: bool,
    display_name: String,
  },
  Admit {
    room_id: RoomId,
    target_participant_id: ParticipantId,
  },
  Reject {
    room_id: RoomId,
    target_participant_id: ParticipantId,
  },
  Offer {
    target_participant_id: ParticipantId,
    sdp: SessionDescription,
  },
  Answer {
    target_participant_id: ParticipantId,
    sdp: SessionDescription,
  },
  IceCandidate {
    target_participant_id: ParticipantId,
    candidate: IceCandidate,
  },
  MediaState {
    audio_enabled: bool,
    video_enabled: bool,
  },
  CodeUpdate {
    content: String,
    language: String,
  },
  Leave {
    room_id: RoomId,
    participant_id: ParticipantId,
  },
  Ping,
}

/// Sent by the relay to clients.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
  Joined {
    room_id: RoomId,
    participant_id: ParticipantId,
    status: AdmissionStatus,
  },
  Waiting {
    participant_id: ParticipantId,
    display_name: String,
    notification_id: NotificationId,
  },
  Admitted {
    room_id: RoomId,
  },
  Rejected {
    room_id: RoomId,
  },
  UserJoined {
    participant_id: ParticipantId,
    display_name: String,
    #[serde(default)]
    is_host: bool,
  },
  UserLeft {
    participant_id: ParticipantId,
  },
  Offer {
    from: ParticipantId,
    sdp: SessionDescription,
  },
  Answer {
    from: ParticipantId,
    sdp: SessionDescription,
  },
  IceCandidate {
    from: ParticipantId,
    candidate: IceCandidate,
  },
  MediaStateChanged {
    participant_id: ParticipantId,
    audio_enabled: bool,
    video_enabled: bool,
  },
  CodeUpdated {
    participant_id: ParticipantId,
    content: String,
    language: String,
  },
  Error {
    code: String,
    message: String,
  },
  Pong,
}

impl fmt::Display for ClientMessage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&serde_json::to_string(self).map_err(|_| fmt::Error)?)
  }
}

impl FromStr for ClientMessage {
  type Err = serde_json::Error;

  fn from_str(s: &str) -> serde_json::Result<Self> {
    serde_json::from_str(s)
  }
}

impl fmt::Display for ServerEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&serde_json::to_string(self).map_err(|_| fmt::Error)?)
  }
}

impl FromStr for ServerEvent {
  type Err = serde_json::Error;

  fn from_str(s: &str) -> serde_json::Result<Self> {
    serde_json::from_str(s)
  }
}
