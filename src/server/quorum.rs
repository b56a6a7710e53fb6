//! Quorum tracker: collects per-key message sets from distinct replicas
//! and answers whether a threshold has been met.

use std::collections::HashMap;
use std::hash::Hash;

use crate::core::ReplicaId;

/// Messages collected for one key, at most one per replica.
pub type QuorumMessages<M> = HashMap<ReplicaId, M>;

/// Map `key -> replica ID -> message` with a fixed size threshold. A later
/// message from the same replica replaces the earlier one; protocol code
/// treats a replica's latest vote as its vote.
pub struct QuorumSet<K, M> {
    n_required: usize,
    messages: HashMap<K, QuorumMessages<M>>,
}

impl<K: Eq + Hash + Clone, M> QuorumSet<K, M> {
    /// Creates a quorum set requiring `n_required` distinct replicas.
    pub fn new(n_required: usize) -> Self {
        QuorumSet {
            n_required,
            messages: HashMap::new(),
        }
    }

    /// The configured threshold.
    #[inline]
    pub fn n_required(&self) -> usize {
        self.n_required
    }

    /// Inserts `msg` as `replica`'s vote for `key` (replacing any earlier
    /// vote), then returns the collected messages iff quorum is reached.
    pub fn add_and_check(
        &mut self,
        key: K,
        replica: ReplicaId,
        msg: M,
    ) -> Option<&QuorumMessages<M>> {
        let votes = self.messages.entry(key.clone()).or_default();
        votes.insert(replica, msg);
        self.check(&key)
    }

    /// Returns the collected messages for `key` iff quorum is reached,
    /// without adding any vote. A key never voted for holds an empty set,
    /// which satisfies a zero threshold.
    pub fn check(&mut self, key: &K) -> Option<&QuorumMessages<M>> {
        let votes = self.messages.entry(key.clone()).or_default();
        (votes.len() >= self.n_required).then_some(&*votes)
    }

    /// Forgets all collected messages.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Forgets the collected messages for one key.
    pub fn clear_key(&mut self, key: &K) {
        self.messages.remove(key);
    }
}
