//! Transport abstraction: the async message-passing substrate plus a
//! timer/scheduler that every protocol state machine runs on.
//!
//! All protocol handlers execute on a single logical stream of events (see
//! the simulator for the reference scheduling semantics). Registered
//! receiver closures must stay lightweight: decode, then dispatch real work
//! through `spawn` so nothing heavy ever runs on the RX path.

use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use crate::core::{ClusterConfig, ReplicaId};

/// One-shot timer identifier handed back by `schedule`. Passing it to
/// `cancel` guarantees the timer's task will not fire.
pub type TimerId = u64;

/// Receiver closure invoked for every message unicast to a registered
/// address, with `(transport, remote, payload)`.
pub type ReceiverFn<T> =
    Box<dyn FnMut(&mut T, <T as Transport>::Address, &[u8])>;

/// A task enqueued onto the logical event stream.
pub type TaskFn<T> = Box<dyn FnOnce(&mut T)>;

/// Transport interface implemented by the deterministic simulator and the
/// live UDP backend. Methods take the sender's address explicitly so that
/// one transport instance can host many endpoints.
pub trait Transport: Sized + 'static {
    /// Abstract value-typed address token.
    type Address: Clone + Eq + Hash + fmt::Debug + 'static;

    /// Upper bound on a single serialized message, in bytes.
    const BUFFER_SIZE: usize;

    /// The cluster configuration this transport was built from.
    fn config(&self) -> &ClusterConfig<Self::Address>;

    /// Associates a receiver closure with an address; all unicast traffic
    /// to that address is delivered to the closure.
    fn register_receiver(
        &mut self,
        address: Self::Address,
        on_message: ReceiverFn<Self>,
    );

    /// Registers a receiver for traffic sent to the multicast address.
    fn register_multicast_receiver(&mut self, on_message: ReceiverFn<Self>);

    /// Sends one message. `write` serializes into a buffer of at most
    /// `BUFFER_SIZE` bytes and returns the written length; the closure is
    /// not retained past this call. Best-effort: the network may drop,
    /// duplicate, delay, or reorder.
    fn send_message(
        &mut self,
        sender: &Self::Address,
        dest: &Self::Address,
        write: impl FnOnce(&mut [u8]) -> usize,
    );

    /// Sends one message to the replica with the given ID.
    fn send_message_to_replica(
        &mut self,
        sender: &Self::Address,
        id: ReplicaId,
        write: impl FnOnce(&mut [u8]) -> usize,
    ) {
        let dest = self.config().replica(id).clone();
        self.send_message(sender, &dest, write);
    }

    /// Sends one message to every replica except `sender` itself.
    /// Implementations serialize once and copy the buffer per destination.
    fn send_message_to_all(
        &mut self,
        sender: &Self::Address,
        write: impl FnOnce(&mut [u8]) -> usize,
    );

    /// Routes one message to the configured multicast address.
    fn send_message_to_multicast(
        &mut self,
        sender: &Self::Address,
        write: impl FnOnce(&mut [u8]) -> usize,
    ) {
        let dest = match self.config().multicast.clone() {
            Some(addr) => addr,
            None => panic!("no multicast address configured"),
        };
        self.send_message(sender, &dest, write);
    }

    /// Enqueues a task to run on the logical event stream. Tasks spawned at
    /// the same logical instant run in FIFO order.
    fn spawn(&mut self, task: TaskFn<Self>) {
        self.schedule(Duration::ZERO, task);
    }

    /// Schedules a one-shot timer task after `delay`. Tasks with earlier
    /// deadlines run before tasks with later deadlines.
    fn schedule(&mut self, delay: Duration, task: TaskFn<Self>) -> TimerId;

    /// Cancels a scheduled timer. After this returns, the timer's task is
    /// guaranteed not to fire.
    fn cancel(&mut self, timer: TimerId);

    /// Returns a fresh client-side address.
    fn allocate_address(&mut self) -> Self::Address;
}
