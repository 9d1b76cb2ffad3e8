//! Live agent cursors over the presence channel.
//!
//! Publishing side: [`CursorBroadcaster`] writes one presence field per
//! agent while it is mutating (`cursor:<agent-id>`), and withdraws the field
//! entirely when done.
//!
//! Rendering side: [`CursorOverlay`] reads every peer's cursor fields,
//! resolves their anchors against the local buffer, and keeps the view's
//! cursor overlays in sync. It re-renders after any presence change and
//! after any buffer transaction, debounced.

use std::collections::HashSet;
use std::time::Duration;

use kyodo_crdt::{Anchor, SharedBuffer, SharedPresence};
use kyodo_types::{AgentId, Color, PeerAlias, TextRange};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::view::SharedView;

pub const CURSOR_FIELD_PREFIX: &str = "cursor:";

/// Presence payload for one agent's live position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorBroadcast {
    pub anchor: Anchor,
    pub length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub color: Color,
}

pub fn cursor_field(agent: &AgentId) -> String {
    format!("{CURSOR_FIELD_PREFIX}{agent}")
}

#[derive(Clone)]
pub struct CursorBroadcaster {
    presence: SharedPresence,
}

impl CursorBroadcaster {
    pub fn new(presence: SharedPresence) -> Self {
        Self { presence }
    }

    pub fn publish(&self, agent: &AgentId, cursor: &CursorBroadcast) {
        match serde_json::to_value(cursor) {
            Ok(value) => self.presence.set_local_field(&cursor_field(agent), Some(value)),
            Err(e) => warn!(agent = %agent, "failed to encode cursor: {e}"),
        }
    }

    /// Withdraw the field. Never publishes an empty cursor.
    pub fn retract(&self, agent: &AgentId) {
        self.presence.set_local_field(&cursor_field(agent), None);
    }
}

/// Renders every peer's published agent cursors into a local view.
pub struct CursorOverlay {
    buffer: SharedBuffer,
    presence: SharedPresence,
    view: SharedView,
    debounce: Duration,
    rendered: Mutex<HashSet<String>>,
}

impl CursorOverlay {
    pub fn new(buffer: SharedBuffer, presence: SharedPresence, view: SharedView, debounce: Duration) -> Self {
        Self {
            buffer,
            presence,
            view,
            debounce,
            rendered: Mutex::new(HashSet::new()),
        }
    }

    /// Reconcile the view's cursors with current presence and buffer state.
    pub fn render(&self) {
        let len = self.buffer.len();
        let mut live = HashSet::new();

        for (peer, state) in self.presence.states() {
            for (key, value) in state {
                let Some(agent) = key.strip_prefix(CURSOR_FIELD_PREFIX) else {
                    continue;
                };
                let cursor: CursorBroadcast = match serde_json::from_value(value) {
                    Ok(cursor) => cursor,
                    Err(e) => {
                        debug!(peer = %peer, key = %key, "ignoring undecodable cursor: {e}");
                        continue;
                    }
                };
                let Some(start) = self.buffer.resolve_anchor(&cursor.anchor) else {
                    continue;
                };
                let id = format!("{peer}:{agent}");
                let label = cursor
                    .display_name
                    .unwrap_or_else(|| format!("AI {}", PeerAlias::from_peer(peer)));
                let range = TextRange::at(start, cursor.length).clamp_to(len);
                self.view.show_cursor(&id, &label, cursor.color, range);
                live.insert(id);
            }
        }

        let mut rendered = self.rendered.lock();
        for stale in rendered.difference(&live) {
            trace!(id = %stale, "removing cursor");
            self.view.remove_cursor(stale);
        }
        *rendered = live;
    }

    /// Re-render on every presence change and buffer transaction until
    /// cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut buffer_events = self.buffer.subscribe();
        let mut presence_events = self.presence.subscribe();
        let mut deadline: Option<Instant> = None;
        self.render();

        loop {
            let next = deadline;
            let due = async move {
                match next {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = buffer_events.recv() => match event {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        deadline.get_or_insert_with(|| Instant::now() + self.debounce);
                    }
                    Err(RecvError::Closed) => break,
                },
                event = presence_events.recv() => match event {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        deadline.get_or_insert_with(|| Instant::now() + self.debounce);
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = due => {
                    deadline = None;
                    self.render();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::MemoryView;
    use kyodo_crdt::{MemoryBuffer, Presence, PresenceHub, TextBuffer};
    use kyodo_types::PeerId;
    use std::sync::Arc;

    struct Fixture {
        buffer: Arc<MemoryBuffer>,
        hub: PresenceHub,
        view: Arc<MemoryView>,
        overlay: Arc<CursorOverlay>,
    }

    fn fixture(text: &str) -> Fixture {
        let buffer = Arc::new(MemoryBuffer::new(text));
        let hub = PresenceHub::new();
        let local = Arc::new(hub.join(PeerId::new()));
        let view = Arc::new(MemoryView::new(buffer.clone()));
        let overlay = Arc::new(CursorOverlay::new(
            buffer.clone(),
            local,
            view.clone(),
            Duration::from_millis(50),
        ));
        Fixture {
            buffer,
            hub,
            view,
            overlay,
        }
    }

    #[test]
    fn test_render_remote_cursor() {
        let fx = fixture("Tenant shall pay");
        let remote_peer = PeerId::new();
        let remote = Arc::new(fx.hub.join(remote_peer));
        let agent = AgentId::new();

        CursorBroadcaster::new(remote).publish(
            &agent,
            &CursorBroadcast {
                anchor: fx.buffer.create_anchor(7),
                length: 0,
                display_name: Some("Drafting Agent".into()),
                color: Color::AGENT_FALLBACK,
            },
        );
        fx.overlay.render();

        let cursors = fx.view.cursors();
        let rendered = &cursors[&format!("{remote_peer}:{agent}")];
        assert_eq!(rendered.label, "Drafting Agent");
        assert_eq!(rendered.range, TextRange::caret(7));

        fx.buffer.insert(0, "The ", None).unwrap();
        fx.overlay.render();
        assert_eq!(fx.view.cursors()[&format!("{remote_peer}:{agent}")].range, TextRange::caret(11));
    }

    #[test]
    fn test_label_fallback_and_retract() {
        let fx = fixture("abc");
        let remote_peer = PeerId::new();
        let remote: SharedPresence = Arc::new(fx.hub.join(remote_peer));
        let broadcaster = CursorBroadcaster::new(remote);
        let agent = AgentId::new();

        broadcaster.publish(
            &agent,
            &CursorBroadcast {
                anchor: fx.buffer.create_anchor(1),
                length: 1,
                display_name: None,
                color: Color::AGENT_FALLBACK,
            },
        );
        fx.overlay.render();
        let label = fx.view.cursors().values().next().unwrap().label.clone();
        assert_eq!(label, format!("AI {}", PeerAlias::from_peer(remote_peer)));

        broadcaster.retract(&agent);
        fx.overlay.render();
        assert!(fx.view.cursors().is_empty());
    }

    #[test]
    fn test_gone_anchor_and_disconnect_remove_cursor() {
        let fx = fixture("abcdef");
        let remote_peer = PeerId::new();
        let remote: SharedPresence = Arc::new(fx.hub.join(remote_peer));
        let broadcaster = CursorBroadcaster::new(remote);
        let (a, b) = (AgentId::new(), AgentId::new());
        for (agent, at) in [(a, 1), (b, 4)] {
            broadcaster.publish(
                &agent,
                &CursorBroadcast {
                    anchor: fx.buffer.create_anchor(at),
                    length: 0,
                    display_name: Some("x".into()),
                    color: Color::AGENT_FALLBACK,
                },
            );
        }
        fx.overlay.render();
        assert_eq!(fx.view.cursors().len(), 2);

        fx.buffer.delete(0, 2, None).unwrap();
        fx.overlay.render();
        assert_eq!(fx.view.cursors().len(), 1);

        fx.hub.disconnect(remote_peer);
        fx.overlay.render();
        assert!(fx.view.cursors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_rerenders_on_buffer_change() {
        let fx = fixture("hello");
        let remote: SharedPresence = Arc::new(fx.hub.join(PeerId::new()));
        let agent = AgentId::new();
        CursorBroadcaster::new(remote).publish(
            &agent,
            &CursorBroadcast {
                anchor: fx.buffer.create_anchor(2),
                length: 0,
                display_name: Some("A".into()),
                color: Color::AGENT_FALLBACK,
            },
        );

        let cancel = CancellationToken::new();
        let task = {
            let overlay = fx.overlay.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { overlay.run(cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fx.view.cursors().values().next().unwrap().range, TextRange::caret(2));

        fx.buffer.insert(0, ">> ", None).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fx.view.cursors().values().next().unwrap().range, TextRange::caret(5));

        cancel.cancel();
        task.await.unwrap();
    }
}
