use std::collections::{HashMap, HashSet};

use crate::protocol::NotificationId;

use super::connection::ConnectionId;

/// Remembers which "participant waiting" prompts each host connection already got.
#[derive(Debug, Default)]
pub struct NotificationLog {
  delivered: HashMap<ConnectionId, HashSet<NotificationId>>,
}

impl NotificationLog {
  /// Records the notification for `connection_id` and returns `true` the first time only.
  pub fn first_delivery(&mut self, connection_id: ConnectionId, id: &NotificationId) -> bool {
    self.delivered.entry(connection_id).or_default().insert(id.clone())
  }

  /// Forgets a notification for every connection, so a later attempt prompts again.
  pub fn purge(&mut self, id: &NotificationId) {
    self.delivered.retain(|_, ids| {
      ids.remove(id);
      !ids.is_empty()
    });
  }

  pub fn forget_connection(&mut self, connection_id: ConnectionId) {
    self.delivered.remove(&connection_id);
  }

  #[cfg(test)]
  pub(crate) fn len(&self, connection_id: ConnectionId) -> usize {
    self.delivered.get(&connection_id).map(HashSet::len).unwrap_or(0)
  }
}
