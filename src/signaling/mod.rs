mod connection;
mod notifications;
mod room;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info, warn};

pub use self::connection::{Connection, ConnectionId, ConnectionSender, Membership, Outbound};
pub use self::notifications::NotificationLog;
pub use self::room::{Departure, Member, Room, RoomSnapshot, WaitingMember};

use crate::error::SignalingError;
use crate::protocol::{AdmissionStatus, NotificationId, ParticipantId, RoomId, ServerEvent};
use crate::Config;

/// Parameters of a `join`, checked by [`Signaling::join`].
#[derive(Clone, Debug)]
pub struct JoinRequest {
  pub room_id: RoomId,
  pub participant_id: ParticipantId,
  pub is_host: bool,
  pub display_name: String,
}

/// Room registry and message router.
///
/// Each room sits behind its own mutex; every membership change and every delivery that
/// results from it happens while that mutex is held, so a room's events are processed
/// strictly one after the other while unrelated rooms proceed in parallel.
///
/// Lock order: room, then registry maps, then a single connection.
#[derive(Clone, Debug, Default)]
pub struct Signaling {
  config: Arc<Config>,
  connections: Arc<RwLock<HashMap<ConnectionId, Arc<RwLock<Connection>>>>>,
  rooms: Arc<RwLock<HashMap<RoomId, Arc<Mutex<Room>>>>>,
  notifications: Arc<Mutex<NotificationLog>>,
}

impl Signaling {
  pub fn new(config: Config) -> Self {
    Self { config: Arc::new(config), ..Default::default() }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn connections(&self) -> Vec<Arc<RwLock<Connection>>> {
    self.connections.read_arc().values().cloned().collect()
  }

  pub fn rooms(&self) -> Vec<RoomSnapshot> {
    let rooms: Vec<_> = self.rooms.read_arc().values().cloned().collect();
    rooms.iter().map(|room| room.lock().snapshot()).collect()
  }

  pub fn room(&self, room_id: &RoomId) -> Option<RoomSnapshot> {
    self.with_room(room_id, |room| room.snapshot())
  }

  pub fn add_connection(&self, sender: ConnectionSender) -> ConnectionId {
    let connection_id = ConnectionId::new();
    debug!("add connection {connection_id}");

    let connection = Arc::new(RwLock::new(Connection::new(connection_id, sender)));
    self.connections.write_arc().insert(connection_id, connection);
    connection_id
  }

  /// Drops a connection, evicting its participant if this was still their live connection.
  pub fn remove_connection(&self, connection_id: ConnectionId) -> Result<(), SignalingError> {
    debug!("remove connection {connection_id}");

    let connection = self
      .connections
      .write_arc()
      .remove(&connection_id)
      .ok_or(SignalingError::ConnectionNotFound(connection_id))?;
    let membership = connection.read().membership.clone();

    if let Some(Membership { room_id, participant_id }) = membership {
      self.with_room(&room_id, |room| {
        if room.seat(&participant_id) == Some(connection_id) {
          info!("{participant_id} dropped from room {room_id}");
          self.vacate(room, &participant_id);
          self.close_if_empty(room);
        }
      });
    }

    self.notifications.lock().forget_connection(connection_id);
    Ok(())
  }

  pub fn set_alive(&self, connection_id: ConnectionId, is_alive: bool) -> Result<(), SignalingError> {
    debug!("set connection alive is_alive={is_alive}");

    self.connection(connection_id)?.write().is_alive = is_alive;
    Ok(())
  }

  pub fn is_alive(&self, connection_id: ConnectionId) -> bool {
    self.connections.read_arc().get(&connection_id).map(|c| c.read().is_alive).unwrap_or(false)
  }

  pub fn membership(&self, connection_id: ConnectionId) -> Option<Membership> {
    self.connections.read_arc().get(&connection_id).and_then(|c| c.read().membership.clone())
  }

  pub fn join(&self, connection_id: ConnectionId, request: JoinRequest) -> Result<(), SignalingError> {
    let JoinRequest { room_id, participant_id, is_host, display_name } = request;
    debug!("join room_id={room_id} participant_id={participant_id} is_host={is_host}");

    if room_id.as_str().trim().is_empty() {
      return Err(SignalingError::InvalidJoin("room id is empty".into()));
    }
    if participant_id.as_str().trim().is_empty() {
      return Err(SignalingError::InvalidJoin("participant id is empty".into()));
    }
    let display_name = display_name.trim().to_owned();
    if display_name.is_empty() {
      return Err(SignalingError::InvalidJoin("display name is empty".into()));
    }

    // A connection speaks for one seat; switching rooms or identities vacates the old one
    let previous = self.connection(connection_id)?.read().membership.clone();
    if let Some(previous) =
      previous.filter(|m| m.room_id != room_id || m.participant_id != participant_id)
    {
      self.depart(connection_id, &previous.room_id, &previous.participant_id);
    }

    loop {
      let room = self.open_room(&room_id);
      let mut room = room.lock();
      // Lost a race with the room being emptied and unlinked; open a fresh one
      if room.is_closed() {
        continue;
      }
      self.seat_joiner(&mut room, connection_id, participant_id, is_host, display_name);
      return Ok(());
    }
  }

  /// Moves a waiting participant into the session. Host only.
  pub fn admit(
    &self,
    connection_id: ConnectionId,
    room_id: &RoomId,
    target: &ParticipantId,
  ) -> Result<(), SignalingError> {
    debug!("admit room_id={room_id} target={target}");
    let membership = self.membership(connection_id).ok_or(SignalingError::NotJoined(connection_id))?;

    self
      .with_room(room_id, |room| -> Result<(), SignalingError> {
        self.ensure_host(room, connection_id, &membership)?;
        let Some(waiting) = room.take_waiting(target) else {
          debug!("{target} is not waiting, ignoring admit");
          return Ok(());
        };

        info!("admit {target} into room {room_id}");
        let member = Member { connection_id: waiting.connection_id, display_name: waiting.display_name };
        room.place_participant(target.clone(), member);
        self.deliver(waiting.connection_id, ServerEvent::Admitted { room_id: room_id.clone() });
        self.introduce(room, target);
        Ok(())
      })
      .unwrap_or(Ok(()))
  }

  /// Turns a waiting participant away. Host only.
  pub fn reject(
    &self,
    connection_id: ConnectionId,
    room_id: &RoomId,
    target: &ParticipantId,
  ) -> Result<(), SignalingError> {
    debug!("reject room_id={room_id} target={target}");
    let membership = self.membership(connection_id).ok_or(SignalingError::NotJoined(connection_id))?;

    self
      .with_room(room_id, |room| -> Result<(), SignalingError> {
        self.ensure_host(room, connection_id, &membership)?;
        let Some(waiting) = room.take_waiting(target) else {
          debug!("{target} is not waiting, ignoring reject");
          return Ok(());
        };

        info!("reject {target} from room {room_id}");
        self.deliver(waiting.connection_id, ServerEvent::Rejected { room_id: room_id.clone() });
        self.notifications.lock().purge(&NotificationId::new(room_id, target));
        self.clear_membership(waiting.connection_id, room_id, target);
        self.close_if_empty(room);
        Ok(())
      })
      .unwrap_or(Ok(()))
  }

  /// Graceful departure; ignored unless the connection currently holds that seat.
  pub fn leave(&self, connection_id: ConnectionId, room_id: &RoomId, participant_id: &ParticipantId) {
    debug!("leave room_id={room_id} participant_id={participant_id}");

    let holds_seat = self
      .membership(connection_id)
      .is_some_and(|m| m.room_id == *room_id && m.participant_id == *participant_id);
    if !holds_seat {
      debug!("connection does not hold {participant_id} in {room_id}, ignoring leave");
      return;
    }
    self.depart(connection_id, room_id, participant_id);
  }

  /// Point-to-point delivery to `target`, stamped with the sender's participant ID.
  ///
  /// Dropped when either side is not currently seated in the session.
  pub fn relay(
    &self,
    connection_id: ConnectionId,
    target: &ParticipantId,
    build: impl FnOnce(ParticipantId) -> ServerEvent,
  ) {
    let Some(from) = self.membership(connection_id) else {
      debug!("relay from a connection outside any room, dropping");
      return;
    };

    self.with_room(&from.room_id, |room| {
      if room.participant(&from.participant_id).map(|m| m.connection_id) != Some(connection_id) {
        debug!("{} is not in the session, dropping relay", from.participant_id);
        return;
      }
      match room.participant(target) {
        Some(member) => self.deliver(member.connection_id, build(from.participant_id.clone())),
        None => debug!("{target} is not connected, dropping relay"),
      }
    });
  }

  pub fn broadcast_media_state(&self, connection_id: ConnectionId, audio_enabled: bool, video_enabled: bool) {
    self.broadcast(connection_id, |participant_id| ServerEvent::MediaStateChanged {
      participant_id,
      audio_enabled,
      video_enabled,
    })
  }

  pub fn broadcast_code_update(&self, connection_id: ConnectionId, content: String, language: String) {
    self.broadcast(connection_id, |participant_id| ServerEvent::CodeUpdated { participant_id, content, language })
  }

  /// Fan-out to every other participant in the session. Waiting participants are skipped.
  fn broadcast(&self, connection_id: ConnectionId, build: impl FnOnce(ParticipantId) -> ServerEvent) {
    let Some(from) = self.membership(connection_id) else {
      debug!("broadcast from a connection outside any room, dropping");
      return;
    };

    self.with_room(&from.room_id, |room| {
      if room.participant(&from.participant_id).map(|m| m.connection_id) != Some(connection_id) {
        debug!("{} is not in the session, dropping broadcast", from.participant_id);
        return;
      }
      let event = build(from.participant_id.clone());
      debug!("broadcast room_id={} event={event}", from.room_id);
      for (_, member) in room.others(&from.participant_id) {
        self.deliver(member.connection_id, event.clone());
      }
    });
  }

  pub fn send(&self, connection_id: ConnectionId, event: ServerEvent) -> Result<(), SignalingError> {
    debug!("send event={event}");

    self
      .connection(connection_id)?
      .read()
      .sender
      .send(Outbound::Event(event))
      .map_err(|_| SignalingError::ConnectionNotFound(connection_id))
  }

  pub async fn run(self) -> Result<()> {
    let mut stream = IntervalStream::new(tokio::time::interval(self.config.sweep_interval));

    while stream.next().await.is_some() {
      self.sweep();
    }

    Ok(())
  }

  fn sweep(&self) {
    debug!("sweep empty rooms");

    // A busy room is in use; skip rather than invert the room-then-map lock order
    self.rooms.write_arc().retain(|_, room| match room.try_lock() {
      Some(mut room) if room.is_empty() => {
        room.close();
        false
      }
      _ => true,
    });
  }

  fn seat_joiner(
    &self,
    room: &mut Room,
    connection_id: ConnectionId,
    participant_id: ParticipantId,
    is_host: bool,
    display_name: String,
  ) {
    let room_id = room.id.clone();

    let present = room.participant(&participant_id).map(|member| member.connection_id);
    let waiting = room.waiting_member(&participant_id).map(|waiting| waiting.connection_id);

    match (present, waiting) {
      // Same join processed twice: acknowledge again, change nothing
      (Some(current), _) if current == connection_id && is_host == room.is_host(&participant_id) => {
        self.acknowledge(connection_id, &room_id, &participant_id, AdmissionStatus::Active);
        if is_host {
          self.replay_waiting(room, connection_id);
        }
        return;
      }
      (_, Some(previous)) if !is_host && room.host().is_some() => {
        if previous != connection_id {
          room.rebind_waiting(&participant_id, connection_id);
          self.clear_membership(previous, &room_id, &participant_id);
          self.bind(connection_id, &room_id, &participant_id);
        }
        self.acknowledge(connection_id, &room_id, &participant_id, AdmissionStatus::Waiting);
        self.notify_waiting(room, &participant_id);
        return;
      }
      (None, None) => {}
      // Seen from another connection or in another role: treat as a fresh arrival
      _ => {
        self.vacate(room, &participant_id);
      }
    }

    if is_host {
      if let Some(previous) = room.assign_host(participant_id.clone()) {
        warn!("{participant_id} took the host slot of room {room_id} from {previous}");
      }
      info!("{participant_id} joined room {room_id} as host");
      room.place_participant(participant_id.clone(), Member { connection_id, display_name });
      self.bind(connection_id, &room_id, &participant_id);
      self.acknowledge(connection_id, &room_id, &participant_id, AdmissionStatus::Active);
      self.introduce(room, &participant_id);
      self.replay_waiting(room, connection_id);
    } else if room.host().is_some() {
      info!("{participant_id} is waiting in room {room_id}");
      let waiting = WaitingMember { connection_id, display_name, joined_at: Utc::now() };
      room.place_waiting(participant_id.clone(), waiting);
      self.bind(connection_id, &room_id, &participant_id);
      self.acknowledge(connection_id, &room_id, &participant_id, AdmissionStatus::Waiting);
      self.notify_waiting(room, &participant_id);
    } else {
      info!("{participant_id} joined hostless room {room_id}");
      room.place_participant(participant_id.clone(), Member { connection_id, display_name });
      self.bind(connection_id, &room_id, &participant_id);
      self.acknowledge(connection_id, &room_id, &participant_id, AdmissionStatus::Active);
      self.introduce(room, &participant_id);
    }
  }

  fn acknowledge(
    &self,
    connection_id: ConnectionId,
    room_id: &RoomId,
    participant_id: &ParticipantId,
    status: AdmissionStatus,
  ) {
    let event =
      ServerEvent::Joined { room_id: room_id.clone(), participant_id: participant_id.clone(), status };
    self.deliver(connection_id, event);
  }

  /// Tells the newcomer about everyone present and everyone present about the newcomer.
  fn introduce(&self, room: &Room, newcomer: &ParticipantId) {
    let Some(member) = room.participant(newcomer) else {
      return;
    };

    for (other_id, other) in room.others(newcomer) {
      let about_other = ServerEvent::UserJoined {
        participant_id: other_id.clone(),
        display_name: other.display_name.clone(),
        is_host: room.is_host(other_id),
      };
      self.deliver(member.connection_id, about_other);

      let about_newcomer = ServerEvent::UserJoined {
        participant_id: newcomer.clone(),
        display_name: member.display_name.clone(),
        is_host: room.is_host(newcomer),
      };
      self.deliver(other.connection_id, about_newcomer);
    }
  }

  fn notify_waiting(&self, room: &Room, participant_id: &ParticipantId) {
    let (Some(host_connection), Some(waiting)) = (room.host_connection(), room.waiting_member(participant_id))
    else {
      return;
    };
    self.prompt_host(host_connection, &room.id, participant_id, waiting);
  }

  fn replay_waiting(&self, room: &Room, host_connection: ConnectionId) {
    for (participant_id, waiting) in room.waiting() {
      self.prompt_host(host_connection, &room.id, participant_id, waiting);
    }
  }

  fn prompt_host(
    &self,
    host_connection: ConnectionId,
    room_id: &RoomId,
    participant_id: &ParticipantId,
    waiting: &WaitingMember,
  ) {
    let notification_id = NotificationId::new(room_id, participant_id);
    if !self.notifications.lock().first_delivery(host_connection, &notification_id) {
      debug!("host already notified about {participant_id}");
      return;
    }
    let event = ServerEvent::Waiting {
      participant_id: participant_id.clone(),
      display_name: waiting.display_name.clone(),
      notification_id,
    };
    self.deliver(host_connection, event);
  }

  fn ensure_host(
    &self,
    room: &Room,
    connection_id: ConnectionId,
    membership: &Membership,
  ) -> Result<(), SignalingError> {
    let is_host = membership.room_id == room.id
      && room.is_host(&membership.participant_id)
      && room.seat(&membership.participant_id) == Some(connection_id);
    if is_host {
      Ok(())
    } else {
      Err(SignalingError::PermissionDenied(format!(
        "{} is not the host of room {}",
        membership.participant_id, room.id
      )))
    }
  }

  fn depart(&self, connection_id: ConnectionId, room_id: &RoomId, participant_id: &ParticipantId) {
    self.with_room(room_id, |room| {
      if room.seat(participant_id) != Some(connection_id) {
        return;
      }
      info!("{participant_id} left room {room_id}");
      self.vacate(room, participant_id);
      self.close_if_empty(room);
    });
  }

  /// Removes a participant from whichever set holds them and tells whoever needs to know.
  fn vacate(&self, room: &mut Room, participant_id: &ParticipantId) -> Option<Departure> {
    let departure = room.remove(participant_id)?;
    let left = ServerEvent::UserLeft { participant_id: participant_id.clone() };

    match &departure {
      Departure::Present { was_host, .. } => {
        if *was_host {
          info!("host {participant_id} left room {}, host slot is free", room.id);
        }
        for (_, member) in room.participants() {
          self.deliver(member.connection_id, left.clone());
        }
      }
      Departure::Waiting(_) => {
        if let Some(host_connection) = room.host_connection() {
          self.deliver(host_connection, left);
        }
      }
    }

    self.notifications.lock().purge(&NotificationId::new(&room.id, participant_id));
    self.clear_membership(departure.connection_id(), &room.id, participant_id);
    Some(departure)
  }

  fn close_if_empty(&self, room: &mut Room) {
    if room.is_empty() {
      debug!("close empty room {}", room.id);
      room.close();
      self.rooms.write_arc().remove(&room.id);
    }
  }

  fn open_room(&self, room_id: &RoomId) -> Arc<Mutex<Room>> {
    if let Some(room) = self.rooms.read_arc().get(room_id) {
      return room.clone();
    }
    self
      .rooms
      .write_arc()
      .entry(room_id.clone())
      .or_insert_with(|| {
        debug!("create room {room_id}");
        Arc::new(Mutex::new(Room::new(room_id.clone())))
      })
      .clone()
  }

  /// Runs `f` with the room locked; `None` when the room does not exist.
  fn with_room<R>(&self, room_id: &RoomId, f: impl FnOnce(&mut Room) -> R) -> Option<R> {
    let room = self.rooms.read_arc().get(room_id).cloned()?;
    let mut room = room.lock();
    if room.is_closed() {
      return None;
    }
    Some(f(&mut room))
  }

  fn bind(&self, connection_id: ConnectionId, room_id: &RoomId, participant_id: &ParticipantId) {
    if let Some(connection) = self.connections.read_arc().get(&connection_id) {
      connection.write().membership =
        Some(Membership { room_id: room_id.clone(), participant_id: participant_id.clone() });
    }
  }

  fn clear_membership(&self, connection_id: ConnectionId, room_id: &RoomId, participant_id: &ParticipantId) {
    if let Some(connection) = self.connections.read_arc().get(&connection_id) {
      let mut connection = connection.write();
      let holds_seat = connection
        .membership
        .as_ref()
        .is_some_and(|m| m.room_id == *room_id && m.participant_id == *participant_id);
      if holds_seat {
        connection.membership = None;
      }
    }
  }

  fn deliver(&self, connection_id: ConnectionId, event: ServerEvent) {
    let Some(connection) = self.connections.read_arc().get(&connection_id).cloned() else {
      debug!("connection {connection_id} is gone, dropping event={event}");
      return;
    };
    debug!("deliver to {connection_id} event={event}");
    let connection = connection.read();
    if let Err(e) = connection.sender.send(Outbound::Event(event)) {
      error!("{e}");
    }
  }

  fn connection(&self, connection_id: ConnectionId) -> Result<Arc<RwLock<Connection>>, SignalingError> {
    self
      .connections
      .read_arc()
      .get(&connection_id)
      .cloned()
      .ok_or(SignalingError::ConnectionNotFound(connection_id))
  }
}
