//! Peer Directory
//!
//! Keeps the live roster keyed by peer id. Detection is by polling: each
//! tick the connected set is scanned, new ids are added and missing ids
//! removed, so a join or leave is noticed within one tick interval.
//!
//! Join/leave notifications are returned from `poll` and also published on
//! a broadcast channel. The channel lets a push-based roster replace the
//! polling scan later without touching the state machine.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use tokio::sync::broadcast;
use tracing::info;

use crate::handshake::peer::{PeerId, PeerView};

/// Capacity of the notification channel.
const NOTIFY_CAPACITY: usize = 64;

/// Anything that can enumerate currently connected peers.
pub trait RosterSource {
    /// Views of every connected peer (may include the local peer).
    fn connected(&self) -> Vec<PeerView>;
}

impl RosterSource for [PeerView] {
    fn connected(&self) -> Vec<PeerView> {
        self.to_vec()
    }
}

impl RosterSource for Vec<PeerView> {
    fn connected(&self) -> Vec<PeerView> {
        self.clone()
    }
}

/// Roster change notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectoryEvent {
    /// A peer id appeared
    Joined(PeerId),
    /// A peer id disappeared
    Left(PeerId),
}

/// Live roster, iterated in ascending id order.
#[derive(Debug)]
pub struct PeerDirectory {
    peers: BTreeMap<PeerId, PeerView>,
    notify: broadcast::Sender<DirectoryEvent>,
}

impl Default for PeerDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            peers: BTreeMap::new(),
            notify,
        }
    }

    /// Subscribe to join/leave notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<DirectoryEvent> {
        self.notify.subscribe()
    }

    /// Scan the connected set and reconcile the roster.
    ///
    /// Leaves are reported before joins. Views of peers still present are
    /// refreshed with this tick's pose and replicated triple.
    pub fn poll(&mut self, source: &dyn RosterSource) -> Vec<DirectoryEvent> {
        let connected: BTreeMap<PeerId, PeerView> = source
            .connected()
            .into_iter()
            .map(|view| (view.id, view))
            .collect();

        let mut events = Vec::new();

        let gone: Vec<PeerId> = self
            .peers
            .keys()
            .filter(|id| !connected.contains_key(id))
            .copied()
            .collect();
        for id in gone {
            self.peers.remove(&id);
            info!("Peer {} left", id);
            events.push(DirectoryEvent::Left(id));
        }

        for (id, view) in connected {
            if self.peers.insert(id, view).is_none() {
                info!("Peer {} joined", id);
                events.push(DirectoryEvent::Joined(id));
            }
        }

        for event in &events {
            // No subscribers is fine
            let _ = self.notify.send(*event);
        }

        events
    }

    /// Drop every entry without notifications.
    pub fn reset(&mut self) {
        self.peers.clear();
    }

    /// Current roster in id order.
    pub fn peers(&self) -> impl Iterator<Item = &PeerView> {
        self.peers.values()
    }

    /// Look up one peer.
    pub fn get(&self, id: PeerId) -> Option<&PeerView> {
        self.peers.get(&id)
    }

    /// Whether a peer is in the roster.
    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    /// Number of peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::peer::{EffectId, LocalPose, PeerRole};
    use crate::handshake::replicated::ReplicaSnapshot;

    fn view(id: u64) -> PeerView {
        PeerView::new(
            PeerId(id),
            PeerRole::Player,
            LocalPose::default(),
            ReplicaSnapshot::initial(EffectId(0)),
        )
    }

    #[test]
    fn test_poll_reports_joins_and_leaves() {
        let mut directory = PeerDirectory::new();

        let events = directory.poll(&vec![view(1), view(2)]);
        assert_eq!(events, vec![DirectoryEvent::Joined(PeerId(1)), DirectoryEvent::Joined(PeerId(2))]);
        assert_eq!(directory.len(), 2);

        // Nothing changed
        assert!(directory.poll(&vec![view(2), view(1)]).is_empty());

        let events = directory.poll(&vec![view(2), view(3)]);
        assert_eq!(events, vec![DirectoryEvent::Left(PeerId(1)), DirectoryEvent::Joined(PeerId(3))]);
        assert!(!directory.contains(PeerId(1)));
        assert!(directory.contains(PeerId(3)));
    }

    #[test]
    fn test_poll_refreshes_views() {
        let mut directory = PeerDirectory::new();
        directory.poll(&vec![view(1)]);

        let mut updated = view(1);
        updated.state.blend = 0.5;
        directory.poll(&vec![updated]);

        assert_eq!(directory.get(PeerId(1)).map(|v| v.state.blend), Some(0.5));
    }

    #[test]
    fn test_peers_iterate_in_id_order() {
        let mut directory = PeerDirectory::new();
        directory.poll(&vec![view(9), view(3), view(5)]);
        let ids: Vec<u64> = directory.peers().map(|v| v.id.get()).collect();
        assert_eq!(ids, vec![3, 5, 9]);
    }

    #[test]
    fn test_reset_is_silent() {
        let mut directory = PeerDirectory::new();
        let mut rx = directory.subscribe();
        directory.poll(&vec![view(1)]);
        assert_eq!(rx.try_recv().ok(), Some(DirectoryEvent::Joined(PeerId(1))));

        directory.reset();
        assert!(directory.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscription_receives_events() {
        let mut directory = PeerDirectory::new();
        let mut rx = directory.subscribe();

        directory.poll(&vec![view(4)]);
        directory.poll(&Vec::<PeerView>::new());

        assert_eq!(rx.recv().await.ok(), Some(DirectoryEvent::Joined(PeerId(4))));
        assert_eq!(rx.recv().await.ok(), Some(DirectoryEvent::Left(PeerId(4))));
    }
}
