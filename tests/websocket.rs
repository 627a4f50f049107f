use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use meeting_relay::client::{AdmissionState, ClientConfig, JoinParams, PeerUpdate, Session, SessionUpdate};
use meeting_relay::protocol::{AdmissionStatus, ClientMessage, ParticipantId, RoomId, ServerEvent, SessionDescription};
use meeting_relay::{Server, Signaling};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use self::common::LoopbackEngine;

mod common;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

fn start_server() -> String {
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  let port = listener.local_addr().unwrap().port();
  tokio::spawn(Server::new(port, Signaling::default()).serve(listener));
  format!("ws://127.0.0.1:{port}/")
}

async fn open(url: &str) -> Socket {
  let (socket, _) = connect_async(url).await.unwrap();
  socket
}

async fn send(socket: &mut Socket, message: ClientMessage) {
  socket.send(Message::Text(message.to_string())).await.unwrap();
}

async fn recv(socket: &mut Socket) -> ServerEvent {
  loop {
    let frame = timeout(WAIT, socket.next()).await.unwrap().unwrap().unwrap();
    if let Message::Text(text) = frame {
      return text.parse().unwrap();
    }
  }
}

fn join_message(participant: &str, is_host: bool) -> ClientMessage {
  ClientMessage::Join {
    room_id: RoomId::new("r1"),
    participant_id: ParticipantId::new(participant),
    is_host,
    display_name: participant.to_uppercase(),
  }
}

#[tokio::test]
async fn host_admits_participant_and_relays_an_offer() {
  let url = start_server();
  let mut host = open(&url).await;
  let mut p1 = open(&url).await;

  send(&mut host, join_message("h", true)).await;
  assert!(matches!(recv(&mut host).await, ServerEvent::Joined { status: AdmissionStatus::Active, .. }));

  send(&mut p1, join_message("p1", false)).await;
  assert!(matches!(recv(&mut p1).await, ServerEvent::Joined { status: AdmissionStatus::Waiting, .. }));
  let notification_id = match recv(&mut host).await {
    ServerEvent::Waiting { participant_id, notification_id, .. } => {
      assert_eq!(participant_id.as_str(), "p1");
      notification_id
    }
    other => panic!("unexpected {other}"),
  };
  assert_eq!(notification_id.to_string(), "r1:p1");

  send(&mut host, ClientMessage::Admit { room_id: RoomId::new("r1"), target_participant_id: ParticipantId::new("p1") })
    .await;
  assert_eq!(recv(&mut p1).await, ServerEvent::Admitted { room_id: RoomId::new("r1") });
  assert!(matches!(recv(&mut p1).await, ServerEvent::UserJoined { is_host: true, .. }));
  assert!(matches!(recv(&mut host).await, ServerEvent::UserJoined { is_host: false, .. }));

  let sdp = SessionDescription::offer("v=0");
  send(&mut host, ClientMessage::Offer { target_participant_id: ParticipantId::new("p1"), sdp: sdp.clone() }).await;
  assert_eq!(recv(&mut p1).await, ServerEvent::Offer { from: ParticipantId::new("h"), sdp });

  drop(p1);
  assert_eq!(recv(&mut host).await, ServerEvent::UserLeft { participant_id: ParticipantId::new("p1") });
}

#[tokio::test]
async fn bad_frames_get_an_error_event() {
  let url = start_server();
  let mut socket = open(&url).await;

  socket.send(Message::Text(r#"{"type":"join","roomId":"r1"}"#.into())).await.unwrap();
  assert!(matches!(recv(&mut socket).await, ServerEvent::Error { code, .. } if code == "invalid-join"));

  socket.send(Message::Text("garbage".into())).await.unwrap();
  assert!(matches!(recv(&mut socket).await, ServerEvent::Error { code, .. } if code == "malformed-message"));

  send(&mut socket, ClientMessage::Ping).await;
  assert_eq!(recv(&mut socket).await, ServerEvent::Pong);
}

async fn start_session(
  url: &str,
  participant: &str,
  is_host: bool,
) -> (Session<LoopbackEngine>, UnboundedReceiver<PeerUpdate>, Arc<Mutex<Vec<String>>>) {
  let engine = LoopbackEngine::default();
  let calls = engine.calls.clone();
  let (_media_sender, media_events) = mpsc::unbounded_channel();
  let join = JoinParams {
    room_id: RoomId::new("r1"),
    participant_id: ParticipantId::new(participant),
    is_host,
    display_name: participant.to_uppercase(),
  };
  let (session, updates) = Session::start(ClientConfig::new(url), join, Arc::new(engine), media_events).await.unwrap();
  (session, updates, calls)
}

async fn next_update(session: &mut Session<LoopbackEngine>) -> SessionUpdate {
  timeout(WAIT, session.next()).await.unwrap().unwrap()
}

/// Keeps a session processing relay traffic in the background.
fn drive(mut session: Session<LoopbackEngine>) -> UnboundedReceiver<SessionUpdate> {
  let (sender, receiver) = mpsc::unbounded_channel();
  tokio::spawn(async move {
    while let Some(update) = session.next().await {
      if sender.send(update).is_err() {
        break;
      }
    }
  });
  receiver
}

#[tokio::test]
async fn sessions_negotiate_through_the_relay() {
  let url = start_server();

  let (mut host, mut host_peers, host_calls) = start_session(&url, "h", true).await;
  assert_eq!(next_update(&mut host).await, SessionUpdate::Admission(AdmissionState::Active));

  let (mut guest, mut guest_peers, guest_calls) = start_session(&url, "p1", false).await;
  assert_eq!(next_update(&mut guest).await, SessionUpdate::Admission(AdmissionState::Waiting));
  assert_eq!(next_update(&mut host).await, SessionUpdate::PendingChanged);
  assert_eq!(host.pending()[0].participant_id, ParticipantId::new("p1"));

  host.admit(&ParticipantId::new("p1"));
  assert!(host.pending().is_empty());
  assert_eq!(next_update(&mut guest).await, SessionUpdate::Admission(AdmissionState::Active));

  let _host_updates = drive(host);
  let _guest_updates = drive(guest);

  let added = timeout(WAIT, host_peers.recv()).await.unwrap().unwrap();
  assert_eq!(added, PeerUpdate::Added { participant_id: ParticipantId::new("p1"), display_name: "P1".into() });
  let added = timeout(WAIT, guest_peers.recv()).await.unwrap().unwrap();
  assert_eq!(added, PeerUpdate::Added { participant_id: ParticipantId::new("h"), display_name: "H".into() });

  timeout(WAIT, async {
    while !host_calls.lock().contains(&"accept-answer p1".to_string()) {
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  })
  .await
  .unwrap();

  // Host offers, guest answers; never the other way round
  assert_eq!(*host_calls.lock(), ["offer p1", "accept-answer p1"]);
  assert_eq!(*guest_calls.lock(), ["accept-offer h"]);
}
