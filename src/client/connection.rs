//! WebSocket connection to the relay with fixed-delay reconnects.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};

use crate::protocol::{ClientMessage, ParticipantId, RoomId, ServerEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum ClientError {
  #[error("signaling connection is closed")]
  Closed,

  #[error("websocket error: {0}")]
  Transport(#[from] tungstenite::Error),
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
  /// Relay endpoint, `ws://` or `wss://`.
  pub url: String,
  /// Fixed wait between reconnect attempts.
  pub reconnect_delay: Duration,
  /// Give up after this many consecutive failures; retry forever when `None`.
  pub max_reconnect_attempts: Option<u32>,
}

impl ClientConfig {
  pub fn new(url: impl Into<String>) -> Self {
    Self { url: url.into(), reconnect_delay: Duration::from_secs(2), max_reconnect_attempts: None }
  }
}

/// Who we are and where we go; replayed on every (re)connect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinParams {
  pub room_id: RoomId,
  pub participant_id: ParticipantId,
  pub is_host: bool,
  pub display_name: String,
}

impl JoinParams {
  pub fn message(&self) -> ClientMessage {
    ClientMessage::Join {
      room_id: self.room_id.clone(),
      participant_id: self.participant_id.clone(),
      is_host: self.is_host,
      display_name: self.display_name.clone(),
    }
  }
}

/// Everything the client learns, in receipt order, on one stream.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
  Connected,
  /// Transport dropped; the next attempt starts after the configured delay.
  Reconnecting { attempt: u32 },
  Server(ServerEvent),
  /// No more events will follow.
  Closed,
}

#[derive(Debug)]
pub(crate) enum Command {
  Send(ClientMessage),
  Close,
}

/// Cheap, cloneable sending side of a [`SignalingClient`].
#[derive(Clone, Debug)]
pub struct SignalingHandle {
  commands: UnboundedSender<Command>,
}

impl SignalingHandle {
  /// Queues a message. Fire-and-forget; dropped if the transport is down at send time.
  pub fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
    self.commands.send(Command::Send(message)).map_err(|_| ClientError::Closed)
  }

  pub fn close(&self) {
    if self.commands.send(Command::Close).is_err() {
      debug!("signaling already closed");
    }
  }

  #[cfg(test)]
  pub(crate) fn channel() -> (Self, UnboundedReceiver<Command>) {
    let (commands, receiver) = mpsc::unbounded_channel();
    (Self { commands }, receiver)
  }
}

pub struct SignalingClient {
  handle: SignalingHandle,
  task: JoinHandle<()>,
}

impl SignalingClient {
  /// Starts connecting in the background; the room join is sent on every successful connect.
  pub fn connect(config: ClientConfig, join: JoinParams) -> (Self, UnboundedReceiver<ClientEvent>) {
    let (commands, command_receiver) = mpsc::unbounded_channel();
    let (events, event_receiver) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(config, join, command_receiver, events));
    (Self { handle: SignalingHandle { commands }, task }, event_receiver)
  }

  pub fn handle(&self) -> SignalingHandle {
    self.handle.clone()
  }

  /// Waits for the background connection task to finish.
  pub async fn closed(self) {
    if let Err(e) = self.task.await {
      warn!("signaling task failed: {e}");
    }
  }
}

enum Exit {
  Closed,
  Dropped,
}

#[instrument(name = "signaling", skip_all, fields(url = %config.url, participant = %join.participant_id))]
async fn run(
  config: ClientConfig,
  join: JoinParams,
  mut commands: UnboundedReceiver<Command>,
  events: UnboundedSender<ClientEvent>,
) {
  let mut attempt = 0u32;

  loop {
    let connecting = tokio::select! {
      result = connect_async(config.url.as_str()) => result,
      _ = closed(&mut commands) => {
        info!("closed while connecting");
        break;
      }
    };

    match connecting {
      Ok((socket, _)) => {
        attempt = 0;
        info!("connected");
        if events.send(ClientEvent::Connected).is_err() {
          return;
        }
        match pump(socket, &join, &mut commands, &events).await {
          Ok(Exit::Closed) => break,
          Ok(Exit::Dropped) => warn!("connection dropped"),
          Err(e) => warn!("{e}"),
        }
      }
      Err(e) => warn!("failed to connect: {e}"),
    }

    attempt += 1;
    if config.max_reconnect_attempts.is_some_and(|max| attempt > max) {
      warn!("giving up after {} attempts", attempt - 1);
      break;
    }
    if events.send(ClientEvent::Reconnecting { attempt }).is_err() {
      return;
    }
    if !backoff(config.reconnect_delay, &mut commands).await {
      break;
    }
  }

  if events.send(ClientEvent::Closed).is_err() {
    debug!("nobody is listening for close");
  }
}

async fn pump(
  socket: WsStream,
  join: &JoinParams,
  commands: &mut UnboundedReceiver<Command>,
  events: &UnboundedSender<ClientEvent>,
) -> Result<Exit, ClientError> {
  let (mut write, mut read) = socket.split();
  write.send(Message::Text(join.message().to_string())).await?;

  loop {
    tokio::select! {
      frame = read.next() => match frame {
        Some(Ok(Message::Text(text))) => match text.parse::<ServerEvent>() {
          Ok(event) => {
            debug!("recv event={event}");
            if events.send(ClientEvent::Server(event)).is_err() {
              return Ok(Exit::Closed);
            }
          }
          Err(e) => warn!("unreadable event: {e}"),
        },
        Some(Ok(Message::Close(_))) | None => return Ok(Exit::Dropped),
        Some(Ok(_)) => {}
        Some(Err(e)) => return Err(e.into()),
      },
      command = commands.recv() => match command {
        Some(Command::Send(message)) => write.send(Message::Text(message.to_string())).await?,
        Some(Command::Close) | None => {
          if let Err(e) = write.send(Message::Close(None)).await {
            debug!("close frame not sent: {e}");
          }
          return Ok(Exit::Closed);
        }
      },
    }
  }
}

/// Sleeps out the reconnect delay. Returns `false` if the client was closed meanwhile.
async fn backoff(delay: Duration, commands: &mut UnboundedReceiver<Command>) -> bool {
  tokio::select! {
    _ = tokio::time::sleep(delay) => true,
    _ = closed(commands) => false,
  }
}

/// Resolves once the client is closed, dropping anything sent while there is no transport.
async fn closed(commands: &mut UnboundedReceiver<Command>) {
  while let Some(command) = commands.recv().await {
    match command {
      // Real-time only: nothing is queued across a reconnect
      Command::Send(message) => debug!("offline, dropping {message}"),
      Command::Close => return,
    }
  }
}
