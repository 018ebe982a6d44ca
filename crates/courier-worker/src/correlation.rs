//! Correlation Table
//!
//! Assigns call ids, stores the resolver of every outstanding call, matches
//! replies and enforces timeouts.
//!
//! Each pending call is removed from the table exactly once, by whichever of
//! reply, timeout or abandonment gets there first. The resolver only fires
//! after removal, so a late or duplicate reply finds no entry and is dropped.
//!
//! # Blocking Lock Usage
//!
//! Uses `parking_lot::Mutex` for the pending map because:
//! 1. Every operation is an O(1) insert/remove or a drain on shutdown
//! 2. The lock is never held across `.await` points

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use courier_core::{CallId, Envelope, ReplyOutcome};
use courier_transport::Channel;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::CallError;

/// Deadline offset used when a timeout is too large to add to `Instant::now`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

struct PendingCall {
    destination: String,
    event: String,
    created_at: Instant,
    resolver: oneshot::Sender<ReplyOutcome>,
}

/// Outstanding-call bookkeeping for one runtime
pub struct CorrelationTable {
    next_id: AtomicU64,
    pending: Mutex<HashMap<CallId, PendingCall>>,
    max_pending: Option<usize>,
}

impl CorrelationTable {
    /// Create an empty table, optionally bounding outstanding calls
    pub fn new(max_pending: Option<usize>) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            max_pending,
        }
    }

    /// Register a call and transmit its envelope
    ///
    /// The returned [`PendingReply`] completes with the peer's value, the
    /// peer's error, or a timeout after `timeout`.
    pub async fn begin(
        self: &Arc<Self>,
        channel: &dyn Channel,
        destination: impl Into<String>,
        event: impl Into<String>,
        data: Value,
        timeout: Duration,
    ) -> Result<PendingReply, CallError> {
        let destination = destination.into();
        let event = event.into();
        let created_at = Instant::now();
        let (resolver, receiver) = oneshot::channel();

        let id = {
            let mut pending = self.pending.lock();
            if let Some(limit) = self.max_pending {
                if pending.len() >= limit {
                    tracing::warn!(
                        destination = %destination,
                        event = %event,
                        limit,
                        "rejecting call: pending call bound reached"
                    );
                    return Err(CallError::TooManyPending { limit });
                }
            }
            let id = CallId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
            pending.insert(
                id,
                PendingCall {
                    destination: destination.clone(),
                    event: event.clone(),
                    created_at,
                    resolver,
                },
            );
            id
        };

        let reply = PendingReply {
            id,
            receiver,
            deadline: created_at
                .checked_add(timeout)
                .unwrap_or_else(|| created_at + FAR_FUTURE),
            timeout,
            destination: destination.clone(),
            event: event.clone(),
            table: Arc::clone(self),
        };

        tracing::debug!(
            call_id = %id,
            destination = %destination,
            event = %event,
            timeout_ms = timeout.as_millis() as u64,
            "call issued"
        );

        // On failure `reply` is dropped here, which removes the entry
        channel
            .send_raw(Envelope::call(destination, event, id, data))
            .await?;

        Ok(reply)
    }

    /// Complete call `id` with a reply
    ///
    /// Returns `false` when no such call is pending (already resolved, timed
    /// out, or never issued); that case is a silent no-op.
    pub fn resolve(&self, id: CallId, outcome: ReplyOutcome) -> bool {
        let Some(call) = self.pending.lock().remove(&id) else {
            tracing::trace!(call_id = %id, "dropping unmatched reply");
            return false;
        };

        tracing::debug!(
            call_id = %id,
            destination = %call.destination,
            event = %call.event,
            elapsed_ms = call.created_at.elapsed().as_millis() as u64,
            "reply matched"
        );
        // Receiver may be gone if the caller was cancelled in between
        let _ = call.resolver.send(outcome);
        true
    }

    /// Whether call `id` is still outstanding
    pub fn is_pending(&self, id: CallId) -> bool {
        self.pending.lock().contains_key(&id)
    }

    /// Number of outstanding calls
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Id the next call will receive
    pub fn next_id(&self) -> CallId {
        CallId::new(self.next_id.load(Ordering::Relaxed))
    }

    /// Fail every outstanding call with [`CallError::Closed`]
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "closing pending calls");
        }
        // Dropping the resolvers wakes every waiter with a receive error
        drained.len()
    }

    fn forget(&self, id: CallId) -> bool {
        self.pending.lock().remove(&id).is_some()
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Outstanding result of one call
///
/// Dropping it before completion removes the call from the table.
pub struct PendingReply {
    id: CallId,
    receiver: oneshot::Receiver<ReplyOutcome>,
    deadline: Instant,
    timeout: Duration,
    destination: String,
    event: String,
    table: Arc<CorrelationTable>,
}

impl PendingReply {
    /// Correlation id assigned to this call
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Wait for the reply or the deadline, whichever comes first
    pub async fn wait(mut self) -> Result<Value, CallError> {
        let received = tokio::select! {
            biased;
            received = &mut self.receiver => Some(received),
            () = tokio::time::sleep_until(self.deadline) => None,
        };

        let outcome = match received {
            Some(Ok(outcome)) => outcome,
            Some(Err(_)) => return Err(CallError::Closed),
            None => {
                if self.table.forget(self.id) {
                    tracing::debug!(
                        call_id = %self.id,
                        destination = %self.destination,
                        event = %self.event,
                        "call timed out"
                    );
                    return Err(self.timeout_error());
                }
                // A reply removed the entry before the deadline branch ran
                match self.receiver.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => return Err(CallError::Closed),
                }
            }
        };

        outcome.into_result().map_err(CallError::Remote)
    }

    fn timeout_error(&self) -> CallError {
        CallError::Timeout {
            timeout: self.timeout,
            destination: self.destination.clone(),
            event: self.event.clone(),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if self.table.forget(self.id) {
            tracing::debug!(call_id = %self.id, "pending call abandoned");
        }
    }
}
