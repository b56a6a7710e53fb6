//! Public interface to the Winterhold core library: a research framework
//! for state-machine replication protocols, providing the shared machinery
//! (transport abstraction, batched log, client-reply table, quorum tracker,
//! stateful timeout, generic client) and the concrete protocols built on it.

#![allow(clippy::uninlined_format_args)]

#[macro_use]
mod utils;

mod client;
mod core;
mod protocols;
mod server;
mod transport;

pub use crate::core::{
    data_of, random_client_id, ClientId, ClusterConfig, Data, Digest,
    GenericClient, InvokeCallback, MockApp, NullApp, OpNumber, ReceiverFn,
    ReplicaId, RequestNumber, StateMachine, TaskFn, TimerId, Transport,
    ViewNumber, BLOCK_SIZE,
};
pub use client::{
    BasicClient, ClientProtocol, ReplyMessage, RequestMessage, Strategy,
};
pub use protocols::{unreplicated, vr, SmrProtocol, UnreplicatedReplica};
pub use server::{
    Block, ChainBlock, ClientTable, Entry, ListLog, Log, QuorumSet,
    RequestCheck, StatefulTimeout,
};
pub use transport::{SimulatedTransport, UdpTransport};
pub use utils::{wire_decode, wire_encode, WinterholdError};
