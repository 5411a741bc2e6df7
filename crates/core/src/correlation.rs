//! Table of requests still awaiting a response.
//!
//! An entry lives from the moment its request is registered (always before the
//! frame is handed to the transport) until it is taken by the dispatcher, purged
//! after an invalid response, or expired by the timeout sweep.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::identity::RequestId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationError {
    #[error("request id {0} is already awaiting a response")]
    DuplicateId(RequestId),
}

#[derive(Debug)]
struct Pending<C> {
    continuation: C,
    sent_at: Instant,
}

#[derive(Debug)]
pub struct CorrelationTable<C> {
    pending: HashMap<RequestId, Pending<C>>,
}

impl<C> Default for CorrelationTable<C> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }
}

impl<C> CorrelationTable<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the continuation for `id`.
    ///
    /// A duplicate id means the sequence allocator handed out the same number
    /// twice; the existing entry is kept and the new one refused.
    pub fn register(&mut self, id: RequestId, continuation: C) -> Result<(), CorrelationError> {
        self.register_at(id, continuation, Instant::now())
    }

    pub fn register_at(
        &mut self,
        id: RequestId,
        continuation: C,
        sent_at: Instant,
    ) -> Result<(), CorrelationError> {
        if self.pending.contains_key(&id) {
            tracing::error!(%id, "refusing duplicate registration, sequence allocator is broken");
            return Err(CorrelationError::DuplicateId(id));
        }
        self.pending.insert(
            id,
            Pending {
                continuation,
                sent_at,
            },
        );
        Ok(())
    }

    /// Looks up and removes the entry in one step.
    pub fn take(&mut self, id: &RequestId) -> Option<C> {
        self.pending.remove(id).map(|p| p.continuation)
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Outstanding ids in sending order, for diagnostics.
    pub fn outstanding(&self) -> Vec<&RequestId> {
        let mut ids: Vec<_> = self.pending.iter().collect();
        ids.sort_by_key(|(_, p)| p.sent_at);
        ids.into_iter().map(|(id, _)| id).collect()
    }

    /// Removes every entry sent more than `ttl` before `now`, oldest first.
    pub fn expire(&mut self, now: Instant, ttl: Duration) -> Vec<(RequestId, C)> {
        let mut stale: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.sent_at) > ttl)
            .map(|(id, _)| id.clone())
            .collect();
        stale.sort_by_key(|id| self.pending[id].sent_at);
        stale
            .into_iter()
            .filter_map(|id| {
                let pending = self.pending.remove(&id)?;
                Some((id, pending.continuation))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> RequestId {
        RequestId::from(s)
    }

    #[test_log::test]
    fn take_removes_exactly_once() {
        let mut table = CorrelationTable::new();
        table.register(id("c1-0"), "create").unwrap();
        table.register(id("c1-1"), "move").unwrap();
        assert_eq!(table.len(), 2);

        assert_eq!(table.take(&id("c1-1")), Some("move"));
        assert_eq!(table.take(&id("c1-1")), None);
        assert!(table.contains(&id("c1-0")));
        assert_eq!(table.take(&id("c1-0")), Some("create"));
        assert!(table.is_empty());
    }

    #[test_log::test]
    fn duplicate_registration_is_refused() {
        let mut table = CorrelationTable::new();
        table.register(id("c1-0"), 1).unwrap();
        assert_eq!(
            table.register(id("c1-0"), 2),
            Err(CorrelationError::DuplicateId(id("c1-0")))
        );
        // the original continuation survives
        assert_eq!(table.take(&id("c1-0")), Some(1));
    }

    #[test_log::test]
    fn unknown_id_is_absent() {
        let mut table: CorrelationTable<()> = CorrelationTable::new();
        assert_eq!(table.take(&id("c1-99")), None);
    }

    #[test_log::test]
    fn expire_only_stale_entries() {
        let start = Instant::now();
        let mut table = CorrelationTable::new();
        table.register_at(id("c1-0"), 0, start).unwrap();
        table
            .register_at(id("c1-1"), 1, start + Duration::from_secs(5))
            .unwrap();
        table
            .register_at(id("c1-2"), 2, start + Duration::from_secs(20))
            .unwrap();

        let expired = table.expire(start + Duration::from_secs(16), Duration::from_secs(10));
        assert_eq!(expired, vec![(id("c1-0"), 0), (id("c1-1"), 1)]);
        assert_eq!(table.outstanding(), vec![&id("c1-2")]);

        // already expired entries are never handed out again
        assert!(table
            .expire(start + Duration::from_secs(16), Duration::from_secs(10))
            .is_empty());
    }
}
