//! One direct media connection per remote participant, kept in step with the room.
//!
//! # Who offers
//!
//! In a full mesh both ends of a pair learn about each other at roughly the same time. If both
//! sent an offer the negotiations would collide, so exactly one side initiates:
//! - the host initiates toward everyone;
//! - between two participants, the one with the greater participant ID initiates.
//!
//! Connection count grows quadratically with the room size; there is no media relay.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::protocol::{ClientMessage, IceCandidate, ParticipantId, SessionDescription};

use super::connection::SignalingHandle;
use super::media::{LocalMedia, LocalTrack, MediaEngine, MediaError, MediaEvent, PeerLink};

/// Whether `local` sends the first offer to `remote`.
pub fn should_initiate(local: &ParticipantId, local_is_host: bool, remote: &ParticipantId, remote_is_host: bool) -> bool {
  match (local_is_host, remote_is_host) {
    (true, _) => true,
    (false, true) => false,
    (false, false) => local > remote,
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
  Negotiating,
  Connected,
  Closed,
}

/// What the UI layer needs to hear about remote participants.
#[derive(Clone, Debug, PartialEq)]
pub enum PeerUpdate {
  Added { participant_id: ParticipantId, display_name: String },
  /// The real name of a participant first seen through its offer.
  Renamed { participant_id: ParticipantId, display_name: String },
  Connected { participant_id: ParticipantId },
  Removed { participant_id: ParticipantId },
  MediaState { participant_id: ParticipantId, audio_enabled: bool, video_enabled: bool },
  Document { participant_id: ParticipantId, content: String, language: String },
}

struct Peer<L> {
  link: L,
  state: LinkState,
  /// False while the display name is only the participant ID.
  named: bool,
}

pub struct Orchestrator<E: MediaEngine> {
  local: ParticipantId,
  is_host: bool,
  engine: Arc<E>,
  media: LocalMedia,
  screen: Option<Arc<LocalTrack>>,
  signaling: SignalingHandle,
  updates: UnboundedSender<PeerUpdate>,
  peers: HashMap<ParticipantId, Peer<E::Link>>,
}

impl<E: MediaEngine> Orchestrator<E> {
  pub fn new(
    local: ParticipantId,
    is_host: bool,
    engine: Arc<E>,
    media: LocalMedia,
    signaling: SignalingHandle,
    updates: UnboundedSender<PeerUpdate>,
  ) -> Self {
    Self { local, is_host, engine, media, screen: None, signaling, updates, peers: HashMap::new() }
  }

  pub fn state(&self, participant_id: &ParticipantId) -> Option<LinkState> {
    self.peers.get(participant_id).map(|peer| peer.state)
  }

  pub fn peer_ids(&self) -> Vec<ParticipantId> {
    let mut ids: Vec<_> = self.peers.keys().cloned().collect();
    ids.sort();
    ids
  }

  /// A remote participant is in the session; connect, offering first if the tie-break says so.
  pub async fn participant_present(&mut self, participant_id: ParticipantId, display_name: String, is_host: bool) {
    if participant_id == self.local {
      return;
    }
    if is_host && self.is_host {
      // The relay hands the host slot to the latest claimant
      warn!("{participant_id} took over as host, no longer offering to everyone");
      self.is_host = false;
    }
    if let Some(peer) = self.peers.get_mut(&participant_id) {
      if !peer.named {
        peer.named = true;
        self.notify(PeerUpdate::Renamed { participant_id, display_name });
      }
      return;
    }
    if !self.open(&participant_id, display_name, true).await {
      return;
    }
    if !should_initiate(&self.local, self.is_host, &participant_id, is_host) {
      debug!("waiting for {participant_id} to offer");
      return;
    }

    let offer = match self.link(&participant_id) {
      Some(link) => link.create_offer().await,
      None => return,
    };
    match offer {
      Ok(sdp) => {
        debug!("offer to {participant_id}");
        self.send(ClientMessage::Offer { target_participant_id: participant_id, sdp });
      }
      Err(e) => self.fail(&participant_id, e),
    }
  }

  pub async fn handle_offer(&mut self, from: ParticipantId, sdp: SessionDescription) {
    if !self.peers.contains_key(&from) {
      let display_name = from.to_string();
      if !self.open(&from, display_name, false).await {
        return;
      }
    }

    let answer = match self.link(&from) {
      Some(link) => link.accept_offer(sdp).await,
      None => return,
    };
    match answer {
      Ok(sdp) => {
        debug!("answer to {from}");
        self.send(ClientMessage::Answer { target_participant_id: from, sdp });
      }
      Err(e) => self.fail(&from, e),
    }
  }

  pub async fn handle_answer(&mut self, from: ParticipantId, sdp: SessionDescription) {
    let Some(link) = self.link(&from) else {
      error!("answer from {from} without a connection");
      return;
    };
    if let Err(e) = link.accept_answer(sdp).await {
      self.fail(&from, e);
    }
  }

  pub async fn handle_ice_candidate(&mut self, from: ParticipantId, candidate: IceCandidate) {
    let Some(link) = self.link(&from) else {
      debug!("candidate from {from} before its connection, dropping");
      return;
    };
    if let Err(e) = link.add_ice_candidate(candidate).await {
      self.fail(&from, e);
    }
  }

  pub fn participant_left(&mut self, participant_id: &ParticipantId) {
    if let Some(peer) = self.peers.remove(participant_id) {
      info!("{participant_id} left, closing connection");
      peer.link.close();
      self.notify(PeerUpdate::Removed { participant_id: participant_id.clone() });
    }
  }

  pub fn handle_media_event(&mut self, event: MediaEvent) {
    match event {
      MediaEvent::LocalCandidate { peer, candidate } => {
        if self.peers.contains_key(&peer) {
          self.send(ClientMessage::IceCandidate { target_participant_id: peer, candidate });
        }
      }
      MediaEvent::Connected { peer } => {
        if let Some(entry) = self.peers.get_mut(&peer) {
          if entry.state == LinkState::Negotiating {
            entry.state = LinkState::Connected;
            info!("connected to {peer}");
            self.notify(PeerUpdate::Connected { participant_id: peer });
          }
        }
      }
      MediaEvent::Failed { peer, reason } => self.fail(&peer, MediaError::Negotiation(reason)),
    }
  }

  pub fn remote_media_state(&self, participant_id: ParticipantId, audio_enabled: bool, video_enabled: bool) {
    self.notify(PeerUpdate::MediaState { participant_id, audio_enabled, video_enabled });
  }

  pub fn remote_document(&self, participant_id: ParticipantId, content: String, language: String) {
    self.notify(PeerUpdate::Document { participant_id, content, language });
  }

  pub fn toggle_local_audio(&self, enabled: bool) {
    self.media.audio.set_enabled(enabled);
    self.broadcast_media_state();
  }

  pub fn toggle_local_video(&self, enabled: bool) {
    self.media.video.set_enabled(enabled);
    self.broadcast_media_state();
  }

  pub fn is_screen_sharing(&self) -> bool {
    self.screen.is_some()
  }

  /// Replaces the outbound camera with a screen capture on every connection.
  pub async fn start_screen_share(&mut self) -> Result<(), MediaError> {
    if self.screen.is_some() {
      return Ok(());
    }
    let screen = self.engine.acquire_screen().await?;
    self.replace_video(screen.clone()).await;
    self.screen = Some(screen);
    Ok(())
  }

  pub async fn stop_screen_share(&mut self) {
    if self.screen.take().is_some() {
      self.replace_video(self.media.video.clone()).await;
    }
  }

  pub fn send_document_update(&self, content: String, language: String) {
    self.send(ClientMessage::CodeUpdate { content, language });
  }

  /// Closes every connection right away.
  pub fn close_all(&mut self) {
    for (participant_id, peer) in self.peers.drain() {
      debug!("closing connection to {participant_id}");
      peer.link.close();
      if self.updates.send(PeerUpdate::Removed { participant_id }).is_err() {
        debug!("no one is listening for peer updates");
      }
    }
  }

  async fn open(&mut self, participant_id: &ParticipantId, display_name: String, named: bool) -> bool {
    match self.engine.create_link(participant_id, &self.media).await {
      Ok(mut link) => {
        if let Some(screen) = &self.screen {
          link = self.with_video(link, screen.clone()).await;
        }
        self.peers.insert(participant_id.clone(), Peer { link, state: LinkState::Negotiating, named });
        self.notify(PeerUpdate::Added { participant_id: participant_id.clone(), display_name });
        true
      }
      Err(e) => {
        warn!("cannot connect to {participant_id}: {e}");
        false
      }
    }
  }

  async fn with_video(&self, link: E::Link, track: Arc<LocalTrack>) -> E::Link {
    if let Err(e) = link.replace_video_track(track).await {
      warn!("{e}");
    }
    link
  }

  async fn replace_video(&self, track: Arc<LocalTrack>) {
    for (participant_id, peer) in &self.peers {
      if let Err(e) = peer.link.replace_video_track(track.clone()).await {
        warn!("cannot swap video for {participant_id}: {e}");
      }
    }
  }

  /// Negotiation errors tear the pair down for good; the user rejoins to retry.
  fn fail(&mut self, participant_id: &ParticipantId, e: MediaError) {
    warn!("negotiation with {participant_id} failed: {e}");
    if let Some(mut peer) = self.peers.remove(participant_id) {
      peer.state = LinkState::Closed;
      peer.link.close();
      self.notify(PeerUpdate::Removed { participant_id: participant_id.clone() });
    }
  }

  fn link(&self, participant_id: &ParticipantId) -> Option<&E::Link> {
    self.peers.get(participant_id).map(|peer| &peer.link)
  }

  fn broadcast_media_state(&self) {
    self.send(ClientMessage::MediaState {
      audio_enabled: self.media.audio.is_enabled(),
      video_enabled: self.media.video.is_enabled(),
    });
  }

  fn send(&self, message: ClientMessage) {
    if let Err(e) = self.signaling.send(message) {
      warn!("{e}");
    }
  }

  fn notify(&self, update: PeerUpdate) {
    if self.updates.send(update).is_err() {
      debug!("no one is listening for peer updates");
    }
  }
}
