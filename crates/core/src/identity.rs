//! Client identity and per-identity sequence allocation.
//!
//! Every outgoing request is stamped with a [`RequestId`] composed of the
//! session's [`ClientIdentity`] and a monotonically increasing sequence number.

use std::fmt::Display;
use std::sync::Arc;

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

/// Length of the random salt appended to the environment fragments.
const SALT_LEN: usize = 5;

/// Separator between the identity and the sequence number in a [`RequestId`].
pub const ID_SEPARATOR: char = '-';

/// Opaque identifier of a running client instance.
///
/// Built once per process from environment fragments (host name and process id)
/// plus random entropy. Not checked for collisions against the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(Arc<str>);

impl ClientIdentity {
    pub fn allocate() -> Self {
        let host = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .ok()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| "localhost".to_owned());
        let salt: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SALT_LEN)
            .map(char::from)
            .collect();
        Self::from_fragments(&host, std::process::id(), &salt)
    }

    fn from_fragments(host: &str, pid: u32, salt: &str) -> Self {
        let host: String = host
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
            .collect();
        Self(format!("{host}{ID_SEPARATOR}{pid}{ID_SEPARATOR}{salt}").into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientIdentity {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl Display for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composite request identifier: `<client identity>-<sequence>`.
///
/// Inbound ids are kept verbatim, so a response can only ever match an id this
/// client produced by string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(identity: &ClientIdentity, sequence: u64) -> Self {
        Self(format!("{identity}{ID_SEPARATOR}{sequence}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sequence number of the id, if it has the composite shape.
    pub fn sequence(&self) -> Option<u64> {
        let (_, seq) = self.0.rsplit_once(ID_SEPARATOR)?;
        seq.parse().ok()
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Other servers in the wild answer with numeric ids, accept both.
impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum WireId {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match WireId::deserialize(deserializer)? {
            WireId::Text(s) => RequestId(s),
            WireId::Number(n) => RequestId(n.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("sequence numbers exhausted for this client identity")]
pub struct SequenceExhausted;

/// Per-identity request counter. Starts at 0, never reused, never decremented.
#[derive(Debug)]
pub struct SequenceAllocator {
    identity: ClientIdentity,
    next: Option<u64>,
}

impl SequenceAllocator {
    pub fn new(identity: ClientIdentity) -> Self {
        Self::starting_at(identity, 0)
    }

    pub(crate) fn starting_at(identity: ClientIdentity, first: u64) -> Self {
        Self {
            identity,
            next: Some(first),
        }
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Returns the current counter value and advances it.
    ///
    /// Once `u64::MAX` has been handed out every further call fails instead of wrapping.
    pub fn next_sequence(&mut self) -> Result<u64, SequenceExhausted> {
        let current = self.next.ok_or(SequenceExhausted)?;
        self.next = current.checked_add(1);
        Ok(current)
    }

    pub fn next_request_id(&mut self) -> Result<RequestId, SequenceExhausted> {
        let seq = self.next_sequence()?;
        Ok(RequestId::new(&self.identity, seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn identity_has_environment_fragments_and_salt() {
        let id = ClientIdentity::from_fragments("my host:8000", 42, "aB3dE");
        assert_eq!(id.as_str(), "my_host_8000-42-aB3dE");

        let allocated = ClientIdentity::allocate();
        let salt = allocated.as_str().rsplit('-').next().unwrap();
        assert_eq!(salt.len(), SALT_LEN);
        assert!(salt.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test_log::test]
    fn two_allocations_differ() {
        // 62^5 salts, a collision here means the entropy source is broken
        assert_ne!(ClientIdentity::allocate(), ClientIdentity::allocate());
    }

    #[test_log::test]
    fn request_ids_strictly_increase() {
        let mut seq = SequenceAllocator::new(ClientIdentity::from("c1"));
        let ids: Vec<RequestId> = (0..100).map(|_| seq.next_request_id().unwrap()).collect();
        assert_eq!(ids[0].as_str(), "c1-0");
        assert_eq!(ids[99].as_str(), "c1-99");
        for pair in ids.windows(2) {
            assert!(pair[0].sequence().unwrap() < pair[1].sequence().unwrap());
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[test_log::test]
    fn overflow_fails_loudly() {
        let mut seq = SequenceAllocator::starting_at(ClientIdentity::from("c1"), u64::MAX - 1);
        assert_eq!(seq.next_sequence(), Ok(u64::MAX - 1));
        assert_eq!(seq.next_sequence(), Ok(u64::MAX));
        assert_eq!(seq.next_sequence(), Err(SequenceExhausted));
        assert_eq!(seq.next_sequence(), Err(SequenceExhausted));
    }

    #[test_log::test]
    fn numeric_wire_ids_are_accepted() {
        let id: RequestId = serde_json::from_str("7").unwrap();
        assert_eq!(id.as_str(), "7");
        let id: RequestId = serde_json::from_str("\"c1-3\"").unwrap();
        assert_eq!(id.sequence(), Some(3));
    }
}
