use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_stream::wrappers::{IntervalStream, UnboundedReceiverStream};
use tracing::{debug, error, info, instrument, warn};

use crate::error::SignalingError;
use crate::protocol::{ClientMessage, ServerEvent};
use crate::server::state::ServerState;
use crate::signaling::{ConnectionId, ConnectionSender, JoinRequest, Outbound};
use crate::Signaling;

pub(crate) async fn signal(
  ws: WebSocketUpgrade,
  State(state): State<ServerState>,
  ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
  ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

#[instrument(name = "socket", skip_all, fields(addr = addr.to_string()))]
async fn handle_socket(socket: WebSocket, state: ServerState, addr: SocketAddr) {
  let (ws_sender, ws_receiver) = socket.split();
  let (sender, receiver) = mpsc::unbounded_channel();
  let connection_id = state.signaling.add_connection(sender.clone());
  let heartbeat_interval = state.signaling.config().heartbeat_interval;
  info!("{connection_id} connected");

  tokio::select! {
    _ = handle_channel(receiver, ws_sender) => {},
    _ = handle_heartbeats(connection_id, sender, state.signaling.clone(), heartbeat_interval) => {},
    _ = handle_messages(connection_id, ws_receiver, state.signaling.clone()) => {},
  }

  if let Err(e) = state.signaling.remove_connection(connection_id) {
    error!("{e}");
  }
}

async fn handle_channel(receiver: UnboundedReceiver<Outbound>, mut ws_sender: SplitSink<WebSocket, Message>) -> Result<()> {
  let mut outbound = UnboundedReceiverStream::new(receiver);
  while let Some(item) = outbound.next().await {
    let message = match item {
      Outbound::Event(event) => Message::Text(event.to_string()),
      Outbound::Ping => Message::Ping(Vec::new()),
    };
    ws_sender.send(message).await?;
  }
  Ok(())
}

#[instrument(name = "heartbeat", skip_all, fields(connection = connection_id.to_string()))]
async fn handle_heartbeats(
  connection_id: ConnectionId,
  sender: ConnectionSender,
  signaling: Signaling,
  interval: Duration,
) -> Result<()> {
  let mut stream = IntervalStream::new(tokio::time::interval(interval));
  while stream.next().await.is_some() {
    if signaling.is_alive(connection_id) {
      debug!("send ping");
      signaling.set_alive(connection_id, false)?;
      sender.send(Outbound::Ping)?;
    } else {
      info!("connection timeout");
      break;
    }
  }
  Ok(())
}

#[instrument(name = "message", skip_all, fields(connection = connection_id.to_string()))]
async fn handle_messages(connection_id: ConnectionId, mut ws_receiver: SplitStream<WebSocket>, signaling: Signaling) {
  while let Some(Ok(message)) = ws_receiver.next().await {
    if let Message::Close(_) = message {
      info!("disconnected");
      break;
    }

    if let Err(e) = handle_message(message, connection_id, &signaling) {
      warn!("{e}");
      let event = ServerEvent::Error { code: e.code().into(), message: e.to_string() };
      if let Err(e) = signaling.send(connection_id, event) {
        error!("{e}");
      }
    }
  }
}

fn handle_message(message: Message, connection_id: ConnectionId, signaling: &Signaling) -> Result<(), SignalingError> {
  match message {
    Message::Text(payload) => handle_event(&payload, connection_id, signaling),
    Message::Binary(_) => Err(SignalingError::Malformed("unsupported binary message".into())),
    Message::Pong(_) => {
      debug!("recv pong");
      signaling.set_alive(connection_id, true)
    }
    Message::Ping(_) | Message::Close(_) => Ok(()),
  }
}

fn handle_event(payload: &str, connection_id: ConnectionId, signaling: &Signaling) -> Result<(), SignalingError> {
  let message = parse_message(payload)?;
  debug!("recv message={message}");

  match message {
    ClientMessage::Join { room_id, participant_id, is_host, display_name } => {
      signaling.join(connection_id, JoinRequest { room_id, participant_id, is_host, display_name })?
    }
    ClientMessage::Admit { room_id, target_participant_id } => {
      signaling.admit(connection_id, &room_id, &target_participant_id)?
    }
    ClientMessage::Reject { room_id, target_participant_id } => {
      signaling.reject(connection_id, &room_id, &target_participant_id)?
    }
    ClientMessage::Offer { target_participant_id, sdp } => {
      signaling.relay(connection_id, &target_participant_id, |from| ServerEvent::Offer { from, sdp })
    }
    ClientMessage::Answer { target_participant_id, sdp } => {
      signaling.relay(connection_id, &target_participant_id, |from| ServerEvent::Answer { from, sdp })
    }
    ClientMessage::IceCandidate { target_participant_id, candidate } => {
      signaling.relay(connection_id, &target_participant_id, |from| ServerEvent::IceCandidate { from, candidate })
    }
    ClientMessage::MediaState { audio_enabled, video_enabled } => {
      signaling.broadcast_media_state(connection_id, audio_enabled, video_enabled)
    }
    ClientMessage::CodeUpdate { content, language } => {
      signaling.broadcast_code_update(connection_id, content, language)
    }
    ClientMessage::Leave { room_id, participant_id } => signaling.leave(connection_id, &room_id, &participant_id),
    ClientMessage::Ping => signaling.send(connection_id, ServerEvent::Pong)?,
  }

  Ok(())
}

/// Decodes a frame, reporting a broken `join` distinctly from other garbage.
fn parse_message(payload: &str) -> Result<ClientMessage, SignalingError> {
  payload.parse::<ClientMessage>().map_err(|e| {
    let is_join = serde_json::from_str::<serde_json::Value>(payload)
      .ok()
      .and_then(|value| value.get("type").and_then(|kind| kind.as_str()).map(|kind| kind == "join"))
      .unwrap_or(false);
    if is_join {
      SignalingError::InvalidJoin(e.to_string())
    } else {
      SignalingError::Malformed(e.to_string())
    }
  })
}
