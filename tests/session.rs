use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use meeting_relay::client::{
  AdmissionState, ClientConfig, JoinParams, MediaError, PeerUpdate, Session, SessionUpdate,
};
use meeting_relay::protocol::{AdmissionStatus, ClientMessage, ParticipantId, RoomId, ServerEvent};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use self::common::LoopbackEngine;

mod common;

const WAIT: Duration = Duration::from_secs(5);

/// A relay whose every reply is scripted by the test.
struct ScriptedRelay {
  listener: TcpListener,
}

impl ScriptedRelay {
  async fn bind() -> Self {
    Self { listener: TcpListener::bind("127.0.0.1:0").await.unwrap() }
  }

  fn config(&self) -> ClientConfig {
    ClientConfig {
      url: format!("ws://{}/", self.listener.local_addr().unwrap()),
      reconnect_delay: Duration::from_millis(50),
      max_reconnect_attempts: Some(3),
    }
  }

  async fn accept(&self) -> WebSocketStream<TcpStream> {
    let (stream, _) = timeout(WAIT, self.listener.accept()).await.unwrap().unwrap();
    accept_async(stream).await.unwrap()
  }

  async fn nobody_connects(&self) -> bool {
    timeout(Duration::from_millis(200), self.listener.accept()).await.is_err()
  }
}

async fn read(socket: &mut WebSocketStream<TcpStream>) -> ClientMessage {
  loop {
    let frame = timeout(WAIT, socket.next()).await.unwrap().unwrap().unwrap();
    if let Message::Text(text) = frame {
      return text.parse().unwrap();
    }
  }
}

async fn push(socket: &mut WebSocketStream<TcpStream>, event: ServerEvent) {
  socket.send(Message::Text(event.to_string())).await.unwrap();
}

fn guest_join() -> JoinParams {
  JoinParams {
    room_id: RoomId::new("r1"),
    participant_id: ParticipantId::new("p1"),
    is_host: false,
    display_name: "P1".into(),
  }
}

fn joined(status: AdmissionStatus) -> ServerEvent {
  ServerEvent::Joined { room_id: RoomId::new("r1"), participant_id: ParticipantId::new("p1"), status }
}

fn host_present() -> ServerEvent {
  ServerEvent::UserJoined { participant_id: ParticipantId::new("h"), display_name: "H".into(), is_host: true }
}

/// Surfaces as a session update, so everything pushed before it has been handled.
fn marker() -> ServerEvent {
  ServerEvent::Error { code: "marker".into(), message: String::new() }
}

struct Guest {
  session: Session<LoopbackEngine>,
  peers: UnboundedReceiver<PeerUpdate>,
  calls: Arc<Mutex<Vec<String>>>,
}

impl Guest {
  async fn start(config: ClientConfig) -> Self {
    let engine = LoopbackEngine::default();
    let calls = engine.calls.clone();
    let (_media_sender, media_events) = mpsc::unbounded_channel();
    let (session, peers) = Session::start(config, guest_join(), Arc::new(engine), media_events).await.unwrap();
    Self { session, peers, calls }
  }

  async fn next(&mut self) -> SessionUpdate {
    timeout(WAIT, self.session.next()).await.unwrap().unwrap()
  }

  fn peer_updates(&mut self) -> Vec<PeerUpdate> {
    let mut updates = Vec::new();
    while let Ok(update) = self.peers.try_recv() {
      updates.push(update);
    }
    updates
  }

  fn calls(&self) -> Vec<String> {
    self.calls.lock().clone()
  }
}

/// Admits the guest and introduces the host, leaving one open link to `h`.
async fn admitted_guest(relay: &ScriptedRelay) -> (Guest, WebSocketStream<TcpStream>) {
  let mut guest = Guest::start(relay.config()).await;
  let mut socket = relay.accept().await;
  assert!(matches!(read(&mut socket).await, ClientMessage::Join { .. }));

  push(&mut socket, joined(AdmissionStatus::Waiting)).await;
  assert_eq!(guest.next().await, SessionUpdate::Admission(AdmissionState::Waiting));
  push(&mut socket, ServerEvent::Admitted { room_id: RoomId::new("r1") }).await;
  assert_eq!(guest.next().await, SessionUpdate::Admission(AdmissionState::Active));
  push(&mut socket, host_present()).await;
  push(&mut socket, marker()).await;
  assert!(matches!(guest.next().await, SessionUpdate::Error { code, .. } if code == "marker"));

  assert_eq!(
    guest.peer_updates(),
    [PeerUpdate::Added { participant_id: ParticipantId::new("h"), display_name: "H".into() }]
  );
  (guest, socket)
}

#[tokio::test]
async fn refused_camera_stops_the_session_before_connecting() {
  let relay = ScriptedRelay::bind().await;
  let engine = LoopbackEngine { refuse_media: true, ..Default::default() };
  let (_media_sender, media_events) = mpsc::unbounded_channel();

  let started = Session::start(relay.config(), guest_join(), Arc::new(engine), media_events).await;
  assert!(matches!(started, Err(MediaError::PermissionDenied(_))));
  assert!(relay.nobody_connects().await);
}

#[tokio::test]
async fn leave_closes_links_says_goodbye_and_hangs_up() {
  let relay = ScriptedRelay::bind().await;
  let (guest, mut socket) = admitted_guest(&relay).await;
  let Guest { session, mut peers, calls } = guest;

  timeout(WAIT, session.leave()).await.unwrap();

  assert_eq!(*calls.lock(), ["close h"]);
  assert_eq!(peers.try_recv().ok(), Some(PeerUpdate::Removed { participant_id: ParticipantId::new("h") }));
  assert_eq!(
    read(&mut socket).await,
    ClientMessage::Leave { room_id: RoomId::new("r1"), participant_id: ParticipantId::new("p1") }
  );
  let frame = timeout(WAIT, socket.next()).await.unwrap();
  assert!(matches!(frame, Some(Ok(Message::Close(_))) | None));
  assert!(relay.nobody_connects().await);
}

#[tokio::test]
async fn leave_returns_while_the_relay_never_answers() {
  // Listening without accepting stalls the handshake
  let relay = ScriptedRelay::bind().await;
  let guest = Guest::start(relay.config()).await;
  tokio::time::sleep(Duration::from_millis(50)).await;

  assert!(timeout(Duration::from_secs(2), guest.session.leave()).await.is_ok());
}

#[tokio::test]
async fn dropped_transport_tears_down_and_rejoins_the_waiting_room() {
  let relay = ScriptedRelay::bind().await;
  let (mut guest, socket) = admitted_guest(&relay).await;

  drop(socket);
  assert_eq!(guest.next().await, SessionUpdate::Reconnecting { attempt: 1 });
  assert_eq!(guest.session.state(), AdmissionState::Connecting);
  assert_eq!(guest.calls(), ["close h"]);
  assert_eq!(guest.peer_updates(), [PeerUpdate::Removed { participant_id: ParticipantId::new("h") }]);

  let mut socket = relay.accept().await;
  assert_eq!(read(&mut socket).await, guest_join().message());
  push(&mut socket, joined(AdmissionStatus::Waiting)).await;
  assert_eq!(guest.next().await, SessionUpdate::Admission(AdmissionState::Waiting));
}

#[tokio::test]
async fn rejection_ends_the_session() {
  let relay = ScriptedRelay::bind().await;
  let mut guest = Guest::start(relay.config()).await;
  let mut socket = relay.accept().await;
  read(&mut socket).await;

  push(&mut socket, joined(AdmissionStatus::Waiting)).await;
  assert_eq!(guest.next().await, SessionUpdate::Admission(AdmissionState::Waiting));
  push(&mut socket, ServerEvent::Rejected { room_id: RoomId::new("r1") }).await;
  assert_eq!(guest.next().await, SessionUpdate::Admission(AdmissionState::Rejected));

  let frame = timeout(WAIT, socket.next()).await.unwrap();
  assert!(matches!(frame, Some(Ok(Message::Close(_))) | None));
  assert_eq!(guest.next().await, SessionUpdate::Closed);
  assert_eq!(timeout(WAIT, guest.session.next()).await.unwrap(), None);
  assert!(relay.nobody_connects().await);
}
