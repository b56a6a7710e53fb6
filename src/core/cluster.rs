//! Cluster membership configuration, immutable for a run.

use crate::core::{ReplicaId, ViewNumber};

/// Cluster configuration: fault tolerance target plus the ordered list of
/// replica addresses (the order maps list index -> replica ID). Constructed
/// in code; there is no config file format for this.
#[derive(Debug, Clone)]
pub struct ClusterConfig<A> {
    /// Number of faulty replicas tolerated. The address list must hold at
    /// least `2 * n_fault + 1` entries.
    pub n_fault: usize,

    /// Ordered list of replica addresses.
    pub replicas: Vec<A>,

    /// Optional multicast address reaching every replica.
    pub multicast: Option<A>,
}

impl<A> ClusterConfig<A> {
    /// Creates a cluster configuration without a multicast address.
    pub fn new(n_fault: usize, replicas: Vec<A>) -> Self {
        debug_assert!(n_fault == 0 || replicas.len() >= 2 * n_fault + 1);
        ClusterConfig {
            n_fault,
            replicas,
            multicast: None,
        }
    }

    /// Number of replicas in the cluster.
    #[inline]
    pub fn population(&self) -> usize {
        self.replicas.len()
    }

    /// ID of the replica acting as primary in the given view.
    #[inline]
    pub fn primary_of(&self, view: ViewNumber) -> ReplicaId {
        (view as usize % self.replicas.len()) as ReplicaId
    }

    /// Address of the given replica ID.
    #[inline]
    pub fn replica(&self, id: ReplicaId) -> &A {
        &self.replicas[id as usize]
    }
}

#[cfg(test)]
mod cluster_tests {
    use super::*;

    #[test]
    fn primary_rotates() {
        let config = ClusterConfig::new(
            1,
            vec!["replica-0", "replica-1", "replica-2"],
        );
        assert_eq!(config.primary_of(0), 0);
        assert_eq!(config.primary_of(1), 1);
        assert_eq!(config.primary_of(2), 2);
        assert_eq!(config.primary_of(3), 0);
        assert_eq!(config.population(), 3);
    }

    #[test]
    fn replica_by_id() {
        let config = ClusterConfig::new(0, vec!["replica-0"]);
        assert_eq!(*config.replica(0), "replica-0");
    }
}
