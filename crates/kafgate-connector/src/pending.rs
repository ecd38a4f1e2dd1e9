//! The correlation table.
//!
//! Maps message IDs to pending-reply entries. One mutex guards both the
//! entry map and the open flag; completion of an entry always happens
//! after the entry is removed and the lock is released, which is what
//! guarantees exactly-one delivery per entry. The oneshot sender carried
//! by each entry can only fire once, so whichever of reply, sweep,
//! publish failure or close removes the entry first owns the outcome.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use kafgate_core::error::ConnectorError;
use kafgate_core::headers::ReplyHeaders;

/// A matched broker reply.
#[derive(Debug)]
pub struct Reply {
    pub payload: Vec<u8>,
    pub headers: ReplyHeaders,
}

type ReplyResult = Result<Reply, ConnectorError>;

/// The caller's side of a registered entry. Resolves to exactly one of
/// reply, timeout or closed.
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<ReplyResult>,
}

impl PendingReply {
    /// Waits for the outcome of this request.
    pub async fn wait(self) -> ReplyResult {
        // A dropped sender means the table discarded the entry without
        // completing it (replaced registration); surface as closed.
        self.rx.await.unwrap_or(Err(ConnectorError::Closed))
    }
}

struct PendingEntry {
    reply_to: oneshot::Sender<ReplyResult>,
    sent_at: Instant,
    expires_at: Instant,
}

struct TableState {
    entries: HashMap<String, PendingEntry>,
    open: bool,
}

/// The correlation table: pending entries plus the TTL they expire under.
pub struct PendingTable {
    ttl: Duration,
    state: Mutex<TableState>,
}

impl PendingTable {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(TableState {
                entries: HashMap::new(),
                open: true,
            }),
        }
    }

    /// The TTL applied to new registrations.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Registers a pending entry for `id`.
    ///
    /// Fails with `closed` once [`PendingTable::seal`] has run. The
    /// caller is responsible for publishing afterwards and calling
    /// [`PendingTable::unregister`] if the publish fails.
    pub fn register(&self, id: &str, now: Instant) -> Result<PendingReply, ConnectorError> {
        let (tx, rx) = oneshot::channel();
        let entry = PendingEntry {
            reply_to: tx,
            sent_at: now,
            expires_at: now + self.ttl,
        };

        let replaced = {
            let mut state = self.state.lock().unwrap();
            if !state.open {
                return Err(ConnectorError::Closed);
            }
            state.entries.insert(id.to_owned(), entry).is_some()
        };

        if replaced {
            // IDs are 128-bit random, so a live duplicate means a caller
            // bug. The displaced waiter observes `closed`.
            tracing::error!(id, "duplicate pending registration replaced");
        }

        Ok(PendingReply { rx })
    }

    /// Removes an entry without completing it. Used by the publish
    /// failure path, where the caller reports the error itself.
    pub fn unregister(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.entries.remove(id);
    }

    /// Matches a broker reply to its pending entry.
    ///
    /// Returns false when no entry exists — a late, duplicate or
    /// unrelated reply, dropped without error.
    pub fn resolve(&self, id: &str, payload: Vec<u8>, headers: ReplyHeaders) -> bool {
        let entry = {
            let mut state = self.state.lock().unwrap();
            state.entries.remove(id)
        };

        match entry {
            Some(entry) => {
                let _ = entry.reply_to.send(Ok(Reply { payload, headers }));
                true
            }
            None => false,
        }
    }

    /// Expires every entry whose deadline has passed, completing each
    /// with the timeout error. Returns the number of expired entries.
    pub fn expire_sweep(&self, now: Instant) -> usize {
        let expired: Vec<(String, PendingEntry)> = {
            let mut state = self.state.lock().unwrap();
            let ids: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.expires_at <= now)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| state.entries.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        let count = expired.len();
        for (id, entry) in expired {
            tracing::debug!(
                id = %id,
                age_ms = now.duration_since(entry.sent_at).as_millis() as u64,
                "expiring pending request"
            );
            let _ = entry.reply_to.send(Err(ConnectorError::Timeout));
        }
        count
    }

    /// Rejects registrations from now on. Entries already in the table
    /// stay until a reply, the sweeper or [`PendingTable::drain`] takes
    /// them.
    pub fn seal(&self) {
        let mut state = self.state.lock().unwrap();
        state.open = false;
    }

    /// Seals the table and fails every remaining entry with `closed`.
    /// Returns the number of drained entries.
    pub fn drain(&self) -> usize {
        let drained: Vec<PendingEntry> = {
            let mut state = self.state.lock().unwrap();
            state.open = false;
            state.entries.drain().map(|(_, entry)| entry).collect()
        };

        let count = drained.len();
        for entry in drained {
            let _ = entry.reply_to.send(Err(ConnectorError::Closed));
        }
        count
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kafgate_core::error::ErrorKind;

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn resolve_delivers_payload_and_headers() {
        let table = PendingTable::new(TTL);
        let pending = table.register("id-1", Instant::now()).unwrap();

        let mut headers = ReplyHeaders::new();
        headers.insert("KBRG-HTTP-RESPONSE-CODE", "201".to_owned());
        assert!(table.resolve("id-1", b"WORLD".to_vec(), headers));
        assert!(table.is_empty());

        let reply = pending.wait().await.unwrap();
        assert_eq!(reply.payload, b"WORLD");
        assert_eq!(
            reply.headers.get_str("KBRG-HTTP-RESPONSE-CODE").unwrap(),
            "201"
        );
    }

    #[test]
    fn unknown_key_is_dropped_silently() {
        let table = PendingTable::new(TTL);
        assert!(!table.resolve("nobody", Vec::new(), ReplyHeaders::new()));
    }

    #[tokio::test]
    async fn reply_resolves_only_its_own_entry() {
        let table = PendingTable::new(TTL);
        let first = table.register("id-1", Instant::now()).unwrap();
        let second = table.register("id-2", Instant::now()).unwrap();

        assert!(table.resolve("id-2", b"two".to_vec(), ReplyHeaders::new()));
        assert_eq!(table.len(), 1);

        let reply = second.wait().await.unwrap();
        assert_eq!(reply.payload, b"two");

        // id-1 is still pending; drain it so the test observes it too.
        table.drain();
        assert_eq!(
            first.wait().await.unwrap_err().kind(),
            ErrorKind::Closed
        );
    }

    #[tokio::test]
    async fn sweep_expires_only_overdue_entries() {
        let table = PendingTable::new(Duration::from_millis(100));
        let now = Instant::now();
        let overdue = table.register("old", now).unwrap();
        let fresh = table
            .register("new", now + Duration::from_millis(500))
            .unwrap();

        let expired = table.expire_sweep(now + Duration::from_millis(150));
        assert_eq!(expired, 1);
        assert_eq!(table.len(), 1);

        assert_eq!(
            overdue.wait().await.unwrap_err().kind(),
            ErrorKind::Timeout
        );

        // The fresh entry is untouched; a reply still reaches it.
        assert!(table.resolve("new", b"ok".to_vec(), ReplyHeaders::new()));
        assert!(fresh.wait().await.is_ok());
    }

    #[tokio::test]
    async fn reply_after_expiry_is_a_no_op() {
        let table = PendingTable::new(Duration::from_millis(10));
        let now = Instant::now();
        let pending = table.register("id-1", now).unwrap();

        assert_eq!(table.expire_sweep(now + Duration::from_millis(50)), 1);
        assert!(!table.resolve("id-1", b"late".to_vec(), ReplyHeaders::new()));

        assert_eq!(
            pending.wait().await.unwrap_err().kind(),
            ErrorKind::Timeout
        );
    }

    #[tokio::test]
    async fn duplicate_reply_is_dropped() {
        let table = PendingTable::new(TTL);
        let pending = table.register("id-1", Instant::now()).unwrap();

        assert!(table.resolve("id-1", b"first".to_vec(), ReplyHeaders::new()));
        assert!(!table.resolve("id-1", b"second".to_vec(), ReplyHeaders::new()));

        let reply = pending.wait().await.unwrap();
        assert_eq!(reply.payload, b"first");
    }

    #[tokio::test]
    async fn drain_fails_all_entries_with_closed() {
        let table = PendingTable::new(TTL);
        let now = Instant::now();
        let pendings: Vec<PendingReply> = (0..3)
            .map(|i| table.register(&format!("id-{i}"), now).unwrap())
            .collect();

        assert_eq!(table.drain(), 3);
        assert!(table.is_empty());

        for pending in pendings {
            assert_eq!(
                pending.wait().await.unwrap_err().kind(),
                ErrorKind::Closed
            );
        }
    }

    #[test]
    fn register_after_seal_fails_with_closed() {
        let table = PendingTable::new(TTL);
        table.seal();
        let err = table.register("id-1", Instant::now()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Closed);
    }

    #[tokio::test]
    async fn unregister_leaves_no_entry_behind() {
        let table = PendingTable::new(TTL);
        let pending = table.register("id-1", Instant::now()).unwrap();
        table.unregister("id-1");
        assert!(table.is_empty());

        // The waiter observes closed rather than hanging forever.
        assert_eq!(
            pending.wait().await.unwrap_err().kind(),
            ErrorKind::Closed
        );
    }
}
