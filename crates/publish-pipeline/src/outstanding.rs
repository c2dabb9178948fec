//! Outstanding-delivery table: envelopes handed to the transport and
//! awaiting acknowledgment.

use crate::{CorrelationId, Envelope, TableError};
use std::collections::HashMap;
use tokio::time::Instant;

/// An in-flight envelope with its submission time and ack deadline.
#[derive(Debug)]
pub struct OutstandingEntry {
    envelope: Envelope,
    submitted_at: Instant,
    deadline: Instant,
}

impl OutstandingEntry {
    pub fn new(envelope: Envelope, submitted_at: Instant, deadline: Instant) -> Self {
        Self {
            envelope,
            submitted_at,
            deadline,
        }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// True once `now` has reached the ack deadline.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    pub fn into_envelope(self) -> Envelope {
        self.envelope
    }
}

/// An insert the table refused. Hands the entry back so nothing is lost.
#[derive(Debug)]
pub struct RejectedEntry {
    pub error: TableError,
    pub entry: OutstandingEntry,
}

/// Bounded map of correlation id to in-flight entry.
#[derive(Debug)]
pub struct OutstandingTable {
    entries: HashMap<CorrelationId, OutstandingEntry>,
    capacity: usize,
}

impl OutstandingTable {
    /// Create an empty table holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    /// Track a newly submitted envelope.
    pub fn insert(&mut self, entry: OutstandingEntry) -> Result<(), Box<RejectedEntry>> {
        let id = entry.envelope.correlation_id();
        if self.entries.contains_key(&id) {
            return Err(Box::new(RejectedEntry {
                error: TableError::DuplicateCorrelationId(id),
                entry,
            }));
        }
        if self.is_full() {
            return Err(Box::new(RejectedEntry {
                error: TableError::CapacityExceeded {
                    capacity: self.capacity,
                },
                entry,
            }));
        }
        self.entries.insert(id, entry);
        Ok(())
    }

    /// Resolve an entry whose delivery was confirmed.
    ///
    /// Fails with `UnknownCorrelationId` for ids never inserted or already
    /// resolved; callers treat that as a no-op.
    pub fn resolve_success(&mut self, id: CorrelationId) -> Result<Envelope, TableError> {
        self.remove(id)
    }

    /// Resolve an entry whose `attempt` failed, returning it for a retry decision.
    ///
    /// A failure reported for an earlier attempt than the one in flight is
    /// refused with `StaleAttempt` and leaves the entry untouched.
    pub fn resolve_failure(
        &mut self,
        id: CorrelationId,
        attempt: u32,
    ) -> Result<Envelope, TableError> {
        let current = self
            .entries
            .get(&id)
            .map(|entry| entry.envelope.attempt())
            .ok_or(TableError::UnknownCorrelationId(id))?;
        if attempt != current {
            return Err(TableError::StaleAttempt {
                id,
                attempt,
                current,
            });
        }
        self.remove(id)
    }

    /// Remove and return every entry whose deadline has passed, oldest first.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<Envelope> {
        let expired_ids: Vec<CorrelationId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(id, _)| *id)
            .collect();

        let mut expired: Vec<OutstandingEntry> = expired_ids
            .into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect();
        expired.sort_by_key(|entry| entry.submitted_at);
        expired.into_iter().map(OutstandingEntry::into_envelope).collect()
    }

    /// Remove every entry, oldest first.
    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut entries: Vec<OutstandingEntry> = self.entries.drain().map(|(_, e)| e).collect();
        entries.sort_by_key(|entry| entry.submitted_at);
        entries.into_iter().map(OutstandingEntry::into_envelope).collect()
    }

    pub fn contains(&self, id: CorrelationId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn remove(&mut self, id: CorrelationId) -> Result<Envelope, TableError> {
        self.entries
            .remove(&id)
            .map(OutstandingEntry::into_envelope)
            .ok_or(TableError::UnknownCorrelationId(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry_at(now: Instant, offset_ms: u64, timeout_ms: u64) -> OutstandingEntry {
        let submitted_at = now + Duration::from_millis(offset_ms);
        OutstandingEntry::new(
            Envelope::new("t", b"payload".to_vec()),
            submitted_at,
            submitted_at + Duration::from_millis(timeout_ms),
        )
    }

    #[test]
    fn insert_and_resolve_success() {
        let now = Instant::now();
        let mut table = OutstandingTable::new(2);
        let entry = entry_at(now, 0, 100);
        let id = entry.envelope().correlation_id();

        table.insert(entry).unwrap();
        assert!(table.contains(id));
        assert_eq!(table.len(), 1);

        let envelope = table.resolve_success(id).unwrap();
        assert_eq!(envelope.correlation_id(), id);
        assert!(table.is_empty());
    }

    #[test]
    fn resolving_twice_is_unknown() {
        let now = Instant::now();
        let mut table = OutstandingTable::new(2);
        let entry = entry_at(now, 0, 100);
        let id = entry.envelope().correlation_id();
        table.insert(entry).unwrap();

        assert!(table.resolve_failure(id, 1).is_ok());
        assert_eq!(
            table.resolve_failure(id, 1).unwrap_err(),
            TableError::UnknownCorrelationId(id)
        );
        assert_eq!(
            table.resolve_success(id).unwrap_err(),
            TableError::UnknownCorrelationId(id)
        );
        assert!(table.is_empty());
    }

    #[test]
    fn stale_failure_leaves_entry_in_flight() {
        let now = Instant::now();
        let mut table = OutstandingTable::new(1);
        let mut envelope = Envelope::new("t", b"payload".to_vec());
        envelope.bump_attempt();
        let id = envelope.correlation_id();
        table
            .insert(OutstandingEntry::new(envelope, now, now + Duration::from_millis(100)))
            .unwrap();

        assert_eq!(
            table.resolve_failure(id, 1).unwrap_err(),
            TableError::StaleAttempt {
                id,
                attempt: 1,
                current: 2,
            }
        );
        assert!(table.contains(id));
        assert_eq!(table.resolve_failure(id, 2).unwrap().attempt(), 2);
    }

    #[test]
    fn resolving_never_inserted_id_is_unknown() {
        let mut table = OutstandingTable::new(1);
        let id = CorrelationId::new();
        assert_eq!(
            table.resolve_success(id).unwrap_err(),
            TableError::UnknownCorrelationId(id)
        );
    }

    #[test]
    fn insert_beyond_capacity_hands_entry_back() {
        let now = Instant::now();
        let mut table = OutstandingTable::new(1);
        table.insert(entry_at(now, 0, 100)).unwrap();
        assert!(table.is_full());

        let rejected = table.insert(entry_at(now, 1, 100)).unwrap_err();
        assert_eq!(rejected.error, TableError::CapacityExceeded { capacity: 1 });
        assert_eq!(rejected.entry.envelope().attempt(), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn sweep_returns_only_expired_oldest_first() {
        let now = Instant::now();
        let mut table = OutstandingTable::new(4);
        let late = entry_at(now, 5, 10);
        let early = entry_at(now, 0, 10);
        let fresh = entry_at(now, 0, 1_000);
        let late_id = late.envelope().correlation_id();
        let early_id = early.envelope().correlation_id();
        let fresh_id = fresh.envelope().correlation_id();
        table.insert(late).unwrap();
        table.insert(fresh).unwrap();
        table.insert(early).unwrap();

        let expired = table.sweep_expired(now + Duration::from_millis(20));
        let ids: Vec<_> = expired.iter().map(|e| e.correlation_id()).collect();
        assert_eq!(ids, vec![early_id, late_id]);
        assert!(table.contains(fresh_id));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn sweep_before_deadline_is_empty() {
        let now = Instant::now();
        let mut table = OutstandingTable::new(1);
        table.insert(entry_at(now, 0, 50)).unwrap();
        assert!(table.sweep_expired(now + Duration::from_millis(49)).is_empty());
        assert_eq!(table.sweep_expired(now + Duration::from_millis(50)).len(), 1);
    }

    #[test]
    fn drain_empties_table() {
        let now = Instant::now();
        let mut table = OutstandingTable::new(3);
        table.insert(entry_at(now, 0, 10)).unwrap();
        table.insert(entry_at(now, 1, 10)).unwrap();
        assert_eq!(table.drain().len(), 2);
        assert!(table.is_empty());
        assert_eq!(table.capacity(), 3);
    }
}
