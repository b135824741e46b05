//! Broadcast Fan-Out: a `watch` channel for the "replace the pending
//! item" live stream and a bounded per-client `mpsc` for items that must
//! never be silently dropped.
//!
//! Live spectrum frames use `tokio::sync::watch`, which only ever holds
//! the latest value — a drop-latest policy. Sweep segments and text
//! status/events share one bounded `mpsc` per client: a no-drop,
//! disconnect-on-overflow policy, so one queue discipline covers both.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use spectra_core::ClientId;
use tokio::sync::{mpsc, watch};

const CLIENT_QUEUE_CAPACITY: usize = 48;

#[derive(Debug, Clone)]
pub enum OutboundItem {
    SweepSegment(Vec<u8>),
    SweepPanorama(Vec<u8>),
    Text(String),
}

pub struct ClientRegistration {
    pub id: ClientId,
    pub live_rx: watch::Receiver<Option<Vec<u8>>>,
    pub item_rx: mpsc::Receiver<OutboundItem>,
}

pub struct BroadcastFanout {
    live_tx: watch::Sender<Option<Vec<u8>>>,
    clients: Mutex<HashMap<ClientId, mpsc::Sender<OutboundItem>>>,
    next_id: AtomicU64,
}

impl BroadcastFanout {
    #[must_use]
    pub fn new() -> Self {
        let (live_tx, _live_rx) = watch::channel(None);
        Self {
            live_tx,
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register(&self) -> ClientRegistration {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        self.clients.lock().expect("fanout mutex poisoned").insert(id, tx);
        ClientRegistration {
            id,
            live_rx: self.live_tx.subscribe(),
            item_rx: rx,
        }
    }

    pub fn unregister(&self, id: ClientId) {
        self.clients.lock().expect("fanout mutex poisoned").remove(&id);
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.lock().expect("fanout mutex poisoned").len()
    }

    /// Replaces the pending live spectrum frame for every client.
    pub fn publish_live(&self, bytes: Vec<u8>) {
        let _ = self.live_tx.send(Some(bytes));
    }

    /// Pushes a sweep segment to every client; clients whose queue is
    /// full are disconnected and returned.
    pub fn publish_sweep_segment(&self, bytes: Vec<u8>) -> Vec<ClientId> {
        self.publish_no_drop(OutboundItem::SweepSegment(bytes))
    }

    pub fn publish_panorama(&self, bytes: Vec<u8>) -> Vec<ClientId> {
        self.publish_no_drop(OutboundItem::SweepPanorama(bytes))
    }

    pub fn publish_text(&self, text: String) -> Vec<ClientId> {
        self.publish_no_drop(OutboundItem::Text(text))
    }

    fn publish_no_drop(&self, item: OutboundItem) -> Vec<ClientId> {
        let mut clients = self.clients.lock().expect("fanout mutex poisoned");
        let mut slow = Vec::new();
        for (&id, tx) in clients.iter() {
            if tx.try_send(item.clone()).is_err() {
                slow.push(id);
            }
        }
        for id in &slow {
            clients.remove(id);
            tracing::warn!(client = id.0, "disconnecting slow client");
        }
        slow
    }
}

impl Default for BroadcastFanout {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn live_publish_keeps_only_latest() {
        let fanout = BroadcastFanout::new();
        let mut reg = fanout.register();
        fanout.publish_live(vec![1]);
        fanout.publish_live(vec![2]);
        fanout.publish_live(vec![3]);
        reg.live_rx.changed().await.unwrap();
        assert_eq!(reg.live_rx.borrow().clone(), Some(vec![3]));
    }

    #[tokio::test]
    async fn slow_client_is_disconnected_not_gapped() {
        let fanout = BroadcastFanout::new();
        let reg = fanout.register();
        for i in 0..(CLIENT_QUEUE_CAPACITY + 5) {
            fanout.publish_sweep_segment(vec![i as u8]);
        }
        assert_eq!(fanout.client_count(), 0);
        drop(reg);
    }

    #[tokio::test]
    async fn unregister_removes_client() {
        let fanout = BroadcastFanout::new();
        let reg = fanout.register();
        assert_eq!(fanout.client_count(), 1);
        fanout.unregister(reg.id);
        assert_eq!(fanout.client_count(), 0);
    }
}
