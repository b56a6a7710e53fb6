//! Winterhold's foundation: ID types, cluster configuration, the transport
//! abstraction, and the application/client interfaces.

mod client;
mod cluster;
mod statemach;
mod transport;
mod types;

pub use client::{random_client_id, GenericClient, InvokeCallback};
pub use cluster::ClusterConfig;
pub use statemach::{MockApp, NullApp, StateMachine};
pub use transport::{ReceiverFn, TaskFn, TimerId, Transport};
pub use types::{
    data_of, ClientId, Data, Digest, OpNumber, ReplicaId, RequestNumber,
    ViewNumber, BLOCK_SIZE,
};
