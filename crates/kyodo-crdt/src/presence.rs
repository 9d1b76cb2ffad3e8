//! Ephemeral per-peer presence state.
//!
//! Presence is not part of the document. Each peer publishes a small
//! key/value map; everyone observes everyone's map; a peer's map vanishes
//! when it disconnects.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use kyodo_types::PeerId;

const EVENT_CAPACITY: usize = 256;

/// One peer's published fields.
pub type PresenceState = IndexMap<String, Value>;

/// Change notification for presence observers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PresenceChange {
    Updated { peer: PeerId, key: String },
    Removed { peer: PeerId, key: String },
    Disconnected { peer: PeerId },
}

impl PresenceChange {
    pub fn peer(&self) -> PeerId {
        match self {
            Self::Updated { peer, .. } | Self::Removed { peer, .. } | Self::Disconnected { peer } => *peer,
        }
    }
}

/// A peer's view of the presence channel.
pub trait Presence: Send + Sync {
    fn local_peer(&self) -> PeerId;

    /// Publish (`Some`) or withdraw (`None`) one field of the local state.
    fn set_local_field(&self, key: &str, value: Option<Value>);

    /// Snapshot of every connected peer's state, local peer included.
    fn states(&self) -> IndexMap<PeerId, PresenceState>;

    fn subscribe(&self) -> broadcast::Receiver<PresenceChange>;

    fn local_state(&self) -> PresenceState {
        self.states().shift_remove(&self.local_peer()).unwrap_or_default()
    }
}

pub type SharedPresence = Arc<dyn Presence>;

struct HubInner {
    states: RwLock<IndexMap<PeerId, PresenceState>>,
    events: broadcast::Sender<PresenceChange>,
}

/// In-process presence channel shared by any number of peers.
#[derive(Clone)]
pub struct PresenceHub {
    inner: Arc<HubInner>,
}

impl Default for PresenceHub {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceHub {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(HubInner {
                states: RwLock::new(IndexMap::new()),
                events,
            }),
        }
    }

    /// Connect `peer` and hand back its local handle.
    pub fn join(&self, peer: PeerId) -> HubPresence {
        self.inner.states.write().entry(peer).or_default();
        debug!(peer = %peer, "presence peer joined");
        HubPresence {
            peer,
            hub: self.clone(),
        }
    }

    /// Drop every field `peer` published.
    pub fn disconnect(&self, peer: PeerId) {
        if self.inner.states.write().shift_remove(&peer).is_some() {
            debug!(peer = %peer, "presence peer disconnected");
            let _ = self.inner.events.send(PresenceChange::Disconnected { peer });
        }
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.inner.states.read().keys().copied().collect()
    }
}

/// One peer's handle on a [`PresenceHub`].
#[derive(Clone)]
pub struct HubPresence {
    peer: PeerId,
    hub: PresenceHub,
}

impl Presence for HubPresence {
    fn local_peer(&self) -> PeerId {
        self.peer
    }

    fn set_local_field(&self, key: &str, value: Option<Value>) {
        let change = {
            let mut states = self.hub.inner.states.write();
            let state = states.entry(self.peer).or_default();
            match value {
                Some(v) => {
                    state.insert(key.to_string(), v);
                    Some(PresenceChange::Updated {
                        peer: self.peer,
                        key: key.to_string(),
                    })
                }
                None => state.shift_remove(key).map(|_| PresenceChange::Removed {
                    peer: self.peer,
                    key: key.to_string(),
                }),
            }
        };
        if let Some(change) = change {
            let _ = self.hub.inner.events.send(change);
        }
    }

    fn states(&self) -> IndexMap<PeerId, PresenceState> {
        self.hub.inner.states.read().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<PresenceChange> {
        self.hub.inner.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fields_visible_to_other_peers() {
        let hub = PresenceHub::new();
        let alice = hub.join(PeerId::new());
        let bob = hub.join(PeerId::new());

        alice.set_local_field("cursor:a", Some(json!({"length": 3})));
        let seen = bob.states();
        assert_eq!(seen[&alice.local_peer()]["cursor:a"], json!({"length": 3}));
        assert!(bob.local_state().is_empty());
    }

    #[test]
    fn test_withdraw_and_disconnect() {
        let hub = PresenceHub::new();
        let alice = hub.join(PeerId::new());
        let mut rx = alice.subscribe();

        alice.set_local_field("cursor:a", Some(json!(1)));
        alice.set_local_field("cursor:a", None);
        // Withdrawing an absent field is silent.
        alice.set_local_field("cursor:a", None);

        assert!(matches!(rx.try_recv().unwrap(), PresenceChange::Updated { .. }));
        assert!(matches!(rx.try_recv().unwrap(), PresenceChange::Removed { .. }));
        assert!(rx.try_recv().is_err());

        alice.set_local_field("cursor:b", Some(json!(2)));
        hub.disconnect(alice.local_peer());
        assert!(!hub.peers().contains(&alice.local_peer()));
        let _ = rx.try_recv();
        assert_eq!(
            rx.try_recv().unwrap(),
            PresenceChange::Disconnected {
                peer: alice.local_peer()
            }
        );
    }
}
