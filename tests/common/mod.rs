use std::sync::Arc;

use async_trait::async_trait;
use meeting_relay::client::{LocalMedia, LocalTrack, MediaEngine, MediaError, PeerLink, TrackKind};
use meeting_relay::protocol::{IceCandidate, ParticipantId, SessionDescription};
use parking_lot::Mutex;

/// Links that negotiate instantly and log what was asked of them.
#[derive(Default)]
pub struct LoopbackEngine {
  pub calls: Arc<Mutex<Vec<String>>>,
  /// Refuse camera and microphone, as a user declining the permission prompt.
  pub refuse_media: bool,
}

pub struct LoopbackLink {
  remote: ParticipantId,
  calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
  type Link = LoopbackLink;

  async fn acquire_local_media(&self) -> Result<LocalMedia, MediaError> {
    if self.refuse_media {
      return Err(MediaError::PermissionDenied("camera".into()));
    }
    Ok(LocalMedia {
      audio: Arc::new(LocalTrack::new("mic", TrackKind::Audio)),
      video: Arc::new(LocalTrack::new("cam", TrackKind::Video)),
    })
  }

  async fn acquire_screen(&self) -> Result<Arc<LocalTrack>, MediaError> {
    Err(MediaError::PermissionDenied("no screen".into()))
  }

  async fn create_link(&self, remote: &ParticipantId, _media: &LocalMedia) -> Result<LoopbackLink, MediaError> {
    Ok(LoopbackLink { remote: remote.clone(), calls: self.calls.clone() })
  }
}

#[async_trait]
impl PeerLink for LoopbackLink {
  async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
    self.calls.lock().push(format!("offer {}", self.remote));
    Ok(SessionDescription::offer("v=0"))
  }

  async fn accept_offer(&self, _offer: SessionDescription) -> Result<SessionDescription, MediaError> {
    self.calls.lock().push(format!("accept-offer {}", self.remote));
    Ok(SessionDescription::answer("v=0"))
  }

  async fn accept_answer(&self, _answer: SessionDescription) -> Result<(), MediaError> {
    self.calls.lock().push(format!("accept-answer {}", self.remote));
    Ok(())
  }

  async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<(), MediaError> {
    Ok(())
  }

  async fn replace_video_track(&self, _track: Arc<LocalTrack>) -> Result<(), MediaError> {
    Ok(())
  }

  fn close(&self) {
    self.calls.lock().push(format!("close {}", self.remote));
  }
}
