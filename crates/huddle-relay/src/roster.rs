//! Shared relay state: who is connected, what they subscribed to and who
//! has announced presence.
//!
//! Every broadcast goes through the roster while its lock is held, so all
//! members observe broadcasts on a destination in one total order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use huddle_core::{ChatEvent, Identity};
use huddle_protocol::{encode_chat_event, RelayFrame};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

use crate::error::RelayError;

/// Frames queued for one connection's writer task.
pub type Outbox = mpsc::UnboundedSender<RelayFrame>;

/// Roster shared by all connection handlers.
pub type SharedRoster = Arc<Mutex<Roster>>;

/// Identifies a connection for its lifetime.
pub type ConnectionId = u64;

/// One connected client.
#[derive(Debug)]
struct Member {
    identity: Identity,
    outbox: Outbox,
    subscriptions: HashSet<String>,
    /// Announce sequence number, once the member has announced presence.
    announced: Option<u64>,
}

/// What remains of a member after it is removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departed {
    pub identity: Identity,
    pub was_announced: bool,
}

/// Membership table.
#[derive(Debug, Default)]
pub struct Roster {
    members: HashMap<ConnectionId, Member>,
    announce_seq: u64,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRoster {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Admits a connection that completed its handshake.
    ///
    /// Identities are unique among connected members.
    pub fn admit(
        &mut self,
        conn: ConnectionId,
        identity: Identity,
        outbox: Outbox,
        max_clients: usize,
    ) -> Result<(), RelayError> {
        if self.members.values().any(|m| m.identity == identity) {
            return Err(RelayError::IdentityTaken(identity.to_string()));
        }
        if self.members.len() >= max_clients {
            return Err(RelayError::Full { max: max_clients });
        }

        debug!(conn, %identity, "Member admitted");
        self.members.insert(
            conn,
            Member {
                identity,
                outbox,
                subscriptions: HashSet::new(),
                announced: None,
            },
        );
        Ok(())
    }

    /// Removes a connection, returning who it was.
    pub fn remove(&mut self, conn: ConnectionId) -> Option<Departed> {
        let member = self.members.remove(&conn)?;
        debug!(conn, identity = %member.identity, "Member removed");
        Some(Departed {
            identity: member.identity,
            was_announced: member.announced.is_some(),
        })
    }

    /// Adds a subscription. Returns false if it already existed.
    pub fn subscribe(&mut self, conn: ConnectionId, destination: &str) -> bool {
        self.members
            .get_mut(&conn)
            .is_some_and(|m| m.subscriptions.insert(destination.to_string()))
    }

    /// Removes a subscription. Returns false if there was none.
    pub fn unsubscribe(&mut self, conn: ConnectionId, destination: &str) -> bool {
        self.members
            .get_mut(&conn)
            .is_some_and(|m| m.subscriptions.remove(destination))
    }

    /// Marks a member as present. Returns false if it already was.
    pub fn announce(&mut self, conn: ConnectionId) -> bool {
        let Some(member) = self.members.get_mut(&conn) else {
            return false;
        };
        if member.announced.is_some() {
            return false;
        }
        self.announce_seq += 1;
        member.announced = Some(self.announce_seq);
        true
    }

    /// Announced identities, in announce order.
    pub fn present(&self) -> Vec<Identity> {
        let mut present: Vec<_> = self
            .members
            .values()
            .filter_map(|m| m.announced.map(|seq| (seq, m.identity.clone())))
            .collect();
        present.sort_by_key(|(seq, _)| *seq);
        present.into_iter().map(|(_, identity)| identity).collect()
    }

    /// Queues `frame` for one connection. Returns false if it is gone.
    pub fn send_to(&self, conn: ConnectionId, frame: RelayFrame) -> bool {
        self.members
            .get(&conn)
            .is_some_and(|m| m.outbox.send(frame).is_ok())
    }

    /// Queues `event` for every subscriber of `destination`.
    ///
    /// Returns how many outboxes accepted it.
    pub fn broadcast(&self, destination: &str, event: &ChatEvent) -> usize {
        let frame = RelayFrame::message(destination, encode_chat_event(event));
        let mut delivered = 0;

        for (conn, member) in &self.members {
            if !member.subscriptions.contains(destination) {
                continue;
            }
            if member.outbox.send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                trace!(conn, "Outbox closed, skipping");
            }
        }

        debug!(destination, kind = %event.kind(), sender = %event.sender(), delivered, "Broadcast");
        delivered
    }

    /// Sends a `Join` for every present member to `conn` only, so a new
    /// subscriber learns the current roster.
    pub fn replay_presence(
        &self,
        conn: ConnectionId,
        destination: &str,
        now: DateTime<Utc>,
    ) -> usize {
        let mut replayed = 0;
        for identity in self.present() {
            let join = ChatEvent::join(identity).with_timestamp(now);
            if self.send_to(conn, RelayFrame::message(destination, encode_chat_event(&join))) {
                replayed += 1;
            }
        }
        replayed
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns true if `name` is connected (announced or not).
    pub fn is_connected(&self, name: &str) -> bool {
        self.members.values().any(|m| m.identity == name)
    }
}
