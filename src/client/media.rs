//! Media capabilities the orchestrator consumes without knowing how they are implemented.
//!
//! A [`MediaEngine`] stands in for the platform's real-time media stack: it captures the local
//! camera and microphone once per session and creates one [`PeerLink`] per remote participant.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{IceCandidate, ParticipantId, SessionDescription};

#[derive(Debug, Error)]
pub enum MediaError {
  /// Camera or microphone access was refused.
  #[error("media permission denied: {0}")]
  PermissionDenied(String),

  #[error("media device unavailable: {0}")]
  DeviceUnavailable(String),

  /// Offer, answer or candidate could not be applied.
  #[error("negotiation failed: {0}")]
  Negotiation(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackKind {
  Audio,
  Video,
}

impl fmt::Display for TrackKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TrackKind::Audio => write!(f, "audio"),
      TrackKind::Video => write!(f, "video"),
    }
  }
}

/// One captured track. Shared, never copied, across every outbound connection.
#[derive(Debug)]
pub struct LocalTrack {
  pub id: String,
  pub kind: TrackKind,
  enabled: AtomicBool,
}

impl LocalTrack {
  pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
    Self { id: id.into(), kind, enabled: AtomicBool::new(true) }
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled.load(Ordering::SeqCst)
  }

  pub fn set_enabled(&self, enabled: bool) {
    self.enabled.store(enabled, Ordering::SeqCst);
  }
}

/// The session's local audio and camera tracks.
#[derive(Clone, Debug)]
pub struct LocalMedia {
  pub audio: Arc<LocalTrack>,
  pub video: Arc<LocalTrack>,
}

/// Events a [`PeerLink`] raises on its own, fed back to the orchestrator.
#[derive(Clone, Debug, PartialEq)]
pub enum MediaEvent {
  /// A local candidate was gathered and must reach the remote side.
  LocalCandidate { peer: ParticipantId, candidate: IceCandidate },
  /// Media is flowing.
  Connected { peer: ParticipantId },
  /// The link gave up.
  Failed { peer: ParticipantId, reason: String },
}

#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
  type Link: PeerLink;

  async fn acquire_local_media(&self) -> Result<LocalMedia, MediaError>;

  async fn acquire_screen(&self) -> Result<Arc<LocalTrack>, MediaError>;

  /// Creates a direct connection to `remote` with the local tracks attached.
  async fn create_link(&self, remote: &ParticipantId, media: &LocalMedia) -> Result<Self::Link, MediaError>;
}

/// One direct media connection.
#[async_trait]
pub trait PeerLink: Send + Sync + 'static {
  async fn create_offer(&self) -> Result<SessionDescription, MediaError>;

  /// Applies a remote offer and produces the answer.
  async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription, MediaError>;

  async fn accept_answer(&self, answer: SessionDescription) -> Result<(), MediaError>;

  async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;

  /// Swaps the outbound video without renegotiating.
  async fn replace_video_track(&self, track: Arc<LocalTrack>) -> Result<(), MediaError>;

  fn close(&self);
}
