//! In-memory channel pair

use async_trait::async_trait;
use courier_core::{Envelope, TransportError, TransportResult};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// One end of an in-process duplex channel
///
/// Envelopes sent on one end arrive, in order, on the other.
#[derive(Debug)]
pub struct MemoryChannel {
    sender: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
}

impl MemoryChannel {
    /// Create two connected ends
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::from_parts(a_tx, b_rx), Self::from_parts(b_tx, a_rx))
    }

    fn from_parts(
        sender: mpsc::UnboundedSender<Envelope>,
        receiver: mpsc::UnboundedReceiver<Envelope>,
    ) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
        }
    }

    /// Take the next envelope if one is already queued
    pub async fn try_recv(&self) -> Option<Envelope> {
        self.receiver.lock().await.try_recv().ok()
    }
}

#[async_trait]
impl crate::Channel for MemoryChannel {
    async fn send_raw(&self, envelope: Envelope) -> TransportResult<()> {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(TransportError::Closed)?;
        sender.send(envelope).map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> TransportResult<Option<Envelope>> {
        Ok(self.receiver.lock().await.recv().await)
    }

    async fn close(&self) -> TransportResult<()> {
        // Dropping the sender lets the peer's `recv` observe end-of-stream
        self.sender.lock().take();
        Ok(())
    }

    fn channel_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Channel;
    use serde_json::json;

    #[tokio::test]
    async fn pair_preserves_order() {
        let (worker, supervisor) = MemoryChannel::pair();
        for i in 0..3 {
            worker
                .send_raw(Envelope::new("sup", format!("e{i}"), json!(i)))
                .await
                .unwrap();
        }
        for i in 0..3 {
            let env = supervisor.recv().await.unwrap().unwrap();
            assert_eq!(env.action, format!("e{i}"));
        }
    }

    #[tokio::test]
    async fn close_ends_peer_stream_and_rejects_sends() {
        let (worker, supervisor) = MemoryChannel::pair();
        worker.close().await.unwrap();

        assert!(supervisor.recv().await.unwrap().is_none());
        let err = worker
            .send_raw(Envelope::new("sup", "late", json!(null)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
