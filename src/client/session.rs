use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};

use crate::protocol::{ClientMessage, ParticipantId, ServerEvent};

use super::admission::{Admission, AdmissionState, PendingParticipant};
use super::connection::{ClientConfig, ClientEvent, JoinParams, SignalingClient, SignalingHandle};
use super::media::{MediaEngine, MediaError, MediaEvent};
use super::orchestrator::{Orchestrator, PeerUpdate};

/// Session-level changes the UI reacts to. Per-peer changes arrive as [`PeerUpdate`]s.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionUpdate {
  Admission(AdmissionState),
  /// The host's waiting list changed.
  PendingChanged,
  /// Transport dropped; every connection was closed and the room will be rejoined.
  Reconnecting { attempt: u32 },
  Error { code: String, message: String },
  Closed,
}

/// One participant's stay in one room.
///
/// Relay events and media events are consumed from their channels one at a time by
/// [`Session::next`], so the admission state and the connections only ever change in
/// receipt order.
pub struct Session<E: MediaEngine> {
  client: SignalingClient,
  signaling: SignalingHandle,
  events: UnboundedReceiver<ClientEvent>,
  media_events: UnboundedReceiver<MediaEvent>,
  admission: Admission,
  orchestrator: Orchestrator<E>,
}

impl<E: MediaEngine> Session<E> {
  /// Captures local media, then connects and joins.
  ///
  /// Media capture failure (e.g. a refused camera permission) aborts the start.
  pub async fn start(
    config: ClientConfig,
    join: JoinParams,
    engine: Arc<E>,
    media_events: UnboundedReceiver<MediaEvent>,
  ) -> Result<(Self, UnboundedReceiver<PeerUpdate>), MediaError> {
    let media = engine.acquire_local_media().await?;
    let admission = Admission::new(&join);
    let (updates, peer_updates) = mpsc::unbounded_channel();
    let local = join.participant_id.clone();
    let is_host = join.is_host;

    let (client, events) = SignalingClient::connect(config, join);
    let signaling = client.handle();
    let orchestrator = Orchestrator::new(local, is_host, engine, media, signaling.clone(), updates);

    let session = Self { client, signaling, events, media_events, admission, orchestrator };
    Ok((session, peer_updates))
  }

  pub fn state(&self) -> AdmissionState {
    self.admission.state()
  }

  pub fn pending(&self) -> &[PendingParticipant] {
    self.admission.pending()
  }

  pub fn orchestrator(&mut self) -> &mut Orchestrator<E> {
    &mut self.orchestrator
  }

  /// Processes inbound events until one matters to the UI. `None` once the session is over.
  pub async fn next(&mut self) -> Option<SessionUpdate> {
    loop {
      tokio::select! {
        event = self.events.recv() => {
          let event = event?;
          if let Some(update) = self.handle_event(event).await {
            return Some(update);
          }
        }
        Some(event) = self.media_events.recv() => self.orchestrator.handle_media_event(event),
      }
    }
  }

  pub fn admit(&mut self, participant_id: &ParticipantId) {
    if let Some(message) = self.admission.admit(participant_id) {
      self.send(message);
    }
  }

  pub fn reject(&mut self, participant_id: &ParticipantId) {
    if let Some(message) = self.admission.reject(participant_id) {
      self.send(message);
    }
  }

  pub fn admit_all(&mut self) {
    for message in self.admission.admit_all() {
      self.send(message);
    }
  }

  /// Closes every connection, tells the relay we are gone, and waits for the socket to close.
  pub async fn leave(mut self) {
    self.orchestrator.close_all();
    if let Some(message) = self.admission.leave() {
      self.send(message);
    }
    self.signaling.close();
    self.client.closed().await;
  }

  async fn handle_event(&mut self, event: ClientEvent) -> Option<SessionUpdate> {
    match event {
      ClientEvent::Connected => None,
      ClientEvent::Reconnecting { attempt } => {
        info!("reconnecting, attempt {attempt}");
        self.orchestrator.close_all();
        self.admission.reset();
        Some(SessionUpdate::Reconnecting { attempt })
      }
      ClientEvent::Closed => {
        self.orchestrator.close_all();
        Some(SessionUpdate::Closed)
      }
      ClientEvent::Server(event) => self.handle_server_event(event).await,
    }
  }

  async fn handle_server_event(&mut self, event: ServerEvent) -> Option<SessionUpdate> {
    let pending_before = self.admission.pending().len();
    let transition = self.admission.apply(&event);

    match event {
      ServerEvent::UserJoined { participant_id, display_name, is_host } => {
        self.orchestrator.participant_present(participant_id, display_name, is_host).await
      }
      ServerEvent::UserLeft { participant_id } => self.orchestrator.participant_left(&participant_id),
      ServerEvent::Offer { from, sdp } => self.orchestrator.handle_offer(from, sdp).await,
      ServerEvent::Answer { from, sdp } => self.orchestrator.handle_answer(from, sdp).await,
      ServerEvent::IceCandidate { from, candidate } => self.orchestrator.handle_ice_candidate(from, candidate).await,
      ServerEvent::MediaStateChanged { participant_id, audio_enabled, video_enabled } => {
        self.orchestrator.remote_media_state(participant_id, audio_enabled, video_enabled)
      }
      ServerEvent::CodeUpdated { participant_id, content, language } => {
        self.orchestrator.remote_document(participant_id, content, language)
      }
      ServerEvent::Error { code, message } => {
        warn!("relay error {code}: {message}");
        return Some(SessionUpdate::Error { code, message });
      }
      ServerEvent::Joined { .. } | ServerEvent::Waiting { .. } => {}
      ServerEvent::Admitted { .. } | ServerEvent::Rejected { .. } | ServerEvent::Pong => {}
    }

    if transition == Some(AdmissionState::Rejected) {
      self.orchestrator.close_all();
      self.signaling.close();
    }
    if let Some(state) = transition {
      return Some(SessionUpdate::Admission(state));
    }
    if self.admission.pending().len() != pending_before {
      return Some(SessionUpdate::PendingChanged);
    }
    None
  }

  fn send(&self, message: ClientMessage) {
    if let Err(e) = self.signaling.send(message) {
      debug!("{e}");
    }
  }
}
