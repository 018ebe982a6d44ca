//! Core channel trait

use async_trait::async_trait;
use courier_core::{Envelope, TransportResult};

/// Duplex, order-preserving envelope channel
///
/// `send_raw` may be called from any task. `recv` is driven by a single
/// reader (the runtime's serve loop).
#[async_trait]
pub trait Channel: Send + Sync {
    /// Transmit one envelope
    async fn send_raw(&self, envelope: Envelope) -> TransportResult<()>;

    /// Receive the next envelope, or `None` once the peer has closed
    async fn recv(&self) -> TransportResult<Option<Envelope>>;

    /// Close the outbound half
    async fn close(&self) -> TransportResult<()>;

    /// Channel type identifier for logs
    fn channel_type(&self) -> &'static str;
}
