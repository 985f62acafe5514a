//! Pending-request table.
//!
//! Maps generated reply addresses to the callers waiting on them. Every
//! entry leaves the table exactly once: by reply, by deadline, by caller
//! abandonment, or by [`PendingTable::drain_all`]. Removal and delivery
//! happen in the same step, so no caller can be resolved twice.
//!
//! The table is owned by the connection actor and never shared.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::ReplyAddress;
use crate::protocol::Message;

// ============================================================================
// Types
// ============================================================================

/// Channel a request's single result is delivered on.
pub(crate) type ReplySender = oneshot::Sender<Result<Message>>;

// ============================================================================
// PendingRequest
// ============================================================================

/// A request awaiting its correlated reply.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    /// When the request was registered.
    created_at: Instant,
    /// Reply timeout.
    timeout: Duration,
    /// `created_at + timeout`.
    deadline: Instant,
    /// Result callback.
    reply_tx: ReplySender,
}

// ============================================================================
// PendingTable
// ============================================================================

/// Reply-correlation table.
#[derive(Debug)]
pub(crate) struct PendingTable {
    entries: FxHashMap<ReplyAddress, PendingRequest>,
    capacity: usize,
}

impl PendingTable {
    /// Creates an empty table holding at most `capacity` entries.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: FxHashMap::default(),
            capacity,
        }
    }

    /// Number of requests in flight.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is in flight.
    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if `reply_address` is in flight.
    #[inline]
    pub(crate) fn contains(&self, reply_address: &str) -> bool {
        self.entries.contains_key(reply_address)
    }

    /// Registers a waiting caller.
    ///
    /// On rejection the caller is handed back together with the error so it
    /// can be failed by the owner.
    pub(crate) fn register(
        &mut self,
        reply_address: ReplyAddress,
        timeout: Duration,
        reply_tx: ReplySender,
    ) -> std::result::Result<ReplyAddress, (Error, ReplySender)> {
        if self.entries.len() >= self.capacity {
            let err = Error::TooManyPendingRequests {
                pending: self.entries.len(),
                max: self.capacity,
            };
            return Err((err, reply_tx));
        }

        if self.entries.contains_key(&reply_address) {
            let err = Error::protocol(format!("Duplicate reply address: {reply_address}"));
            return Err((err, reply_tx));
        }

        let created_at = Instant::now();
        self.entries.insert(
            reply_address.clone(),
            PendingRequest {
                created_at,
                timeout,
                deadline: created_at + timeout,
                reply_tx,
            },
        );

        trace!(%reply_address, ?timeout, "Pending request registered");
        Ok(reply_address)
    }

    /// Delivers `result` to the entry for `reply_address` and removes it.
    ///
    /// Returns `true` iff an entry existed.
    pub(crate) fn resolve(&mut self, reply_address: &str, result: Result<Message>) -> bool {
        let Some(entry) = self.entries.remove(reply_address) else {
            return false;
        };

        trace!(
            reply_address,
            elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
            "Pending request resolved"
        );

        // Receiver gone means the caller stopped waiting; nothing to do.
        let _ = entry.reply_tx.send(result);
        true
    }

    /// Fails every entry whose deadline is at or before `now` with
    /// [`Error::ReplyTimeout`], and drops entries whose caller went away.
    ///
    /// Returns the number of timed-out entries.
    pub(crate) fn expire_sweep(&mut self, now: Instant) -> usize {
        let expired: Vec<ReplyAddress> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now || entry.reply_tx.is_closed())
            .map(|(address, _)| address.clone())
            .collect();

        let mut timed_out = 0;
        for address in expired {
            let Some(entry) = self.entries.remove(&address) else {
                continue;
            };

            if entry.reply_tx.is_closed() {
                trace!(%address, "Dropped abandoned pending request");
                continue;
            }

            let timeout_ms = entry.timeout.as_millis() as u64;
            let _ = entry
                .reply_tx
                .send(Err(Error::reply_timeout(address.clone(), timeout_ms)));
            timed_out += 1;
            debug!(%address, timeout_ms, "Pending request timed out");
        }

        timed_out
    }

    /// Earliest deadline among in-flight requests.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|entry| entry.deadline).min()
    }

    /// Fails every entry with the error produced by `reason`.
    ///
    /// Returns the number of entries failed.
    pub(crate) fn drain_all(&mut self, reason: impl Fn() -> Error) -> usize {
        let count = self.entries.len();

        for (_, entry) in self.entries.drain() {
            let _ = entry.reply_tx.send(Err(reason()));
        }

        if count > 0 {
            debug!(count, "Failed all pending requests");
        }
        count
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::protocol::Envelope;

    fn message(address: &str) -> Message {
        Message::from(Envelope::send(address, json!({})))
    }

    #[tokio::test]
    async fn test_resolve_delivers_once() {
        let mut table = PendingTable::new(8);
        let (tx, rx) = oneshot::channel();
        let address = ReplyAddress::generate();

        table
            .register(address.clone(), Duration::from_secs(1), tx)
            .expect("register");
        assert!(table.contains(address.as_str()));

        assert!(table.resolve(address.as_str(), Ok(message("a"))));
        assert!(!table.resolve(address.as_str(), Ok(message("b"))));
        assert!(table.is_empty());

        let reply = rx.await.expect("delivered").expect("ok");
        assert_eq!(reply.address(), "a");
    }

    #[tokio::test]
    async fn test_register_rejects_at_capacity() {
        let mut table = PendingTable::new(1);
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();

        table
            .register(ReplyAddress::generate(), Duration::from_secs(1), tx1)
            .expect("register");
        let rejected = table.register(ReplyAddress::generate(), Duration::from_secs(1), tx2);

        assert!(matches!(
            rejected,
            Err((Error::TooManyPendingRequests { pending: 1, max: 1 }, _))
        ));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate() {
        let mut table = PendingTable::new(4);
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        let address = ReplyAddress::from("same");

        table
            .register(address.clone(), Duration::from_secs(1), tx1)
            .expect("register");
        assert!(table.register(address, Duration::from_secs(1), tx2).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_sweep_times_out_once() {
        let mut table = PendingTable::new(8);
        let (tx_short, rx_short) = oneshot::channel();
        let (tx_long, _rx_long) = oneshot::channel();
        let short = ReplyAddress::from("short");

        table
            .register(short.clone(), Duration::from_millis(100), tx_short)
            .expect("register");
        table
            .register(ReplyAddress::from("long"), Duration::from_secs(10), tx_long)
            .expect("register");

        let first_deadline = table.next_deadline().expect("deadline");
        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(first_deadline <= Instant::now());

        assert_eq!(table.expire_sweep(Instant::now()), 1);
        assert_eq!(table.expire_sweep(Instant::now()), 0);
        assert_eq!(table.len(), 1);
        assert!(!table.resolve(short.as_str(), Ok(message("late"))));

        let result = rx_short.await.expect("delivered");
        assert!(matches!(result, Err(Error::ReplyTimeout { .. })));
    }

    #[tokio::test]
    async fn test_expire_sweep_drops_abandoned() {
        let mut table = PendingTable::new(8);
        let (tx, rx) = oneshot::channel();
        table
            .register(ReplyAddress::generate(), Duration::from_secs(60), tx)
            .expect("register");
        drop(rx);

        assert_eq!(table.expire_sweep(Instant::now()), 0);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_drain_all_fails_everything() {
        let mut table = PendingTable::new(8);
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = oneshot::channel();
            table
                .register(ReplyAddress::generate(), Duration::from_secs(60), tx)
                .expect("register");
            receivers.push(rx);
        }

        assert_eq!(table.drain_all(|| Error::ConnectionClosed), 3);
        assert_eq!(table.drain_all(|| Error::ConnectionClosed), 0);
        assert!(table.next_deadline().is_none());

        for rx in receivers {
            let result = rx.await.expect("delivered");
            assert!(matches!(result, Err(Error::ConnectionClosed)));
        }
    }
}
