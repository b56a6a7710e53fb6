//! Replication protocol: Viewstamped Replication.
//!
//! Leader-based consensus over `2f + 1` replicas: the view's primary orders
//! client requests into batched blocks, backups acknowledge, and a quorum
//! of `f` PrepareOk acks (plus the primary's own) commits. Backups that
//! stop hearing from the primary elect the next view's primary through
//! StartViewChange / DoViewChange / StartView rounds.
//!
//! View change assumes a network that is not dropping messages during the
//! change window: `DoViewChange` and `StartView` carry an empty log
//! placeholder, and a new primary that would need to fetch log entries
//! gives up its view instead (state transfer is unimplemented).

mod execution;
mod leadership;
mod messages;
mod request;

#[cfg(test)]
mod tests;

pub use messages::{
    CommitMessage, DoViewChangeMessage, PrepareMessage, PrepareOkMessage,
    ReplicaMessage, StartViewChangeMessage, StartViewMessage, ZeroLog,
};

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::client::{BasicClient, ReplyMessage};
use crate::core::{
    OpNumber, ReplicaId, Transport, ViewNumber, BLOCK_SIZE,
};
use crate::server::{
    Block, ClientTable, ListLog, QuorumSet, StatefulTimeout,
};
use crate::utils::{wire_decode, wire_encode, WinterholdError};

use serde::Deserialize;

/// Client endpoint type for the VR protocol.
pub type Client<T> = BasicClient<T, ReplicaMessage>;

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicaConfigVr {
    /// Maximum number of client requests batched into one consensus block.
    pub batch_size: usize,

    /// Primary's idle commit broadcast interval in millisecs.
    pub idle_commit_interval_ms: u64,

    /// Backup's lack-of-primary view change timeout in millisecs.
    pub view_change_timeout_ms: u64,
}

impl Default for ReplicaConfigVr {
    fn default() -> Self {
        ReplicaConfigVr {
            batch_size: 1,
            idle_commit_interval_ms: 200,
            view_change_timeout_ms: 500,
        }
    }
}

/// Replica statuses.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Status {
    Normal,
    ViewChange,
}

/// VR server replica.
pub struct VrReplica<T: Transport> {
    /// Replica ID in cluster.
    id: ReplicaId,

    /// My transport address.
    address: T::Address,

    /// Configuration parameters struct.
    config: ReplicaConfigVr,

    status: Status,
    view_number: ViewNumber,

    /// Latest view in which this replica held Normal status.
    latest_normal: ViewNumber,

    /// Highest prepared op number.
    op_number: OpNumber,

    /// Highest committed op number.
    commit_number: OpNumber,

    /// Batch of requests accumulating toward the next block (primary only).
    batch: Block,

    client_table: ClientTable<T::Address, ReplyMessage>,
    log: ListLog,

    /// PrepareOk votes per op number; threshold `f` (the primary's own
    /// implicit vote completes the `f + 1`).
    prepare_ok_set: QuorumSet<OpNumber, PrepareOkMessage>,

    /// StartViewChange votes per view; threshold `f` for the same reason.
    start_view_change_set: QuorumSet<ViewNumber, StartViewChangeMessage>,

    /// DoViewChange messages per view; threshold `f + 1` (own message is
    /// added explicitly when self is the new primary).
    do_view_change_set: QuorumSet<ViewNumber, DoViewChangeMessage>,

    /// Guards against sending DoViewChange more than once per view.
    do_view_change_sent: bool,

    /// Primary: periodic Commit broadcast keeping idle backups current.
    idle_commit_timer: StatefulTimeout<T>,

    /// Backup: fires a view change when the primary goes quiet.
    view_change_timer: StatefulTimeout<T>,
}

impl<T: Transport> VrReplica<T> {
    /// Creates a VR replica, registers its receiver, and starts the timer
    /// matching its initial role in view 0.
    pub fn new_and_setup(
        transport: &mut T,
        id: ReplicaId,
        config: ReplicaConfigVr,
        log: ListLog,
    ) -> Result<Rc<RefCell<Self>>, WinterholdError> {
        if config.batch_size == 0 || config.batch_size > BLOCK_SIZE {
            return logged_err!(
                "invalid config.batch_size {}",
                config.batch_size
            );
        }

        let address = transport.config().replica(id).clone();
        let n_fault = transport.config().n_fault;

        let replica = Rc::new_cyclic(|me: &Weak<RefCell<Self>>| {
            let timer_ref = me.clone();
            let idle_commit_timer = StatefulTimeout::new(
                Duration::from_millis(config.idle_commit_interval_ms),
                move |t: &mut T| {
                    if let Some(replica) = timer_ref.upgrade() {
                        replica.borrow_mut().on_idle_commit(t);
                    }
                },
            );
            let timer_ref = me.clone();
            let view_change_timer = StatefulTimeout::new(
                Duration::from_millis(config.view_change_timeout_ms),
                move |t: &mut T| {
                    if let Some(replica) = timer_ref.upgrade() {
                        replica.borrow_mut().on_view_change_timeout(t);
                    }
                },
            );

            RefCell::new(VrReplica {
                id,
                address: address.clone(),
                config,
                status: Status::Normal,
                view_number: 0,
                latest_normal: 0,
                op_number: 0,
                commit_number: 0,
                batch: Block::new(),
                client_table: ClientTable::new(),
                log,
                prepare_ok_set: QuorumSet::new(n_fault),
                start_view_change_set: QuorumSet::new(n_fault),
                do_view_change_set: QuorumSet::new(n_fault + 1),
                do_view_change_sent: false,
                idle_commit_timer,
                view_change_timer,
            })
        });

        {
            let mut this = replica.borrow_mut();
            if transport.config().primary_of(0) == id {
                this.idle_commit_timer.enable(transport);
            } else {
                this.view_change_timer.enable(transport);
            }
        }

        let me = Rc::downgrade(&replica);
        transport.register_receiver(
            address,
            Box::new(move |t, remote, payload| {
                let Some(replica) = me.upgrade() else {
                    return;
                };
                let message: ReplicaMessage = match wire_decode(payload) {
                    Ok(message) => message,
                    Err(e) => panic!("message deserialize failed: {}", e),
                };
                let me = Rc::downgrade(&replica);
                t.spawn(Box::new(move |t| {
                    let Some(replica) = me.upgrade() else {
                        return;
                    };
                    let result = replica
                        .borrow_mut()
                        .handle_message(t, remote, message);
                    if let Err(e) = result {
                        panic!("protocol invariant violated: {}", e);
                    }
                }));
            }),
        );

        Ok(replica)
    }

    /// This replica's ID.
    pub fn id(&self) -> ReplicaId {
        self.id
    }

    /// Current view number.
    pub fn view_number(&self) -> ViewNumber {
        self.view_number
    }

    /// Highest prepared op number.
    pub fn op_number(&self) -> OpNumber {
        self.op_number
    }

    /// Highest committed op number.
    pub fn commit_number(&self) -> OpNumber {
        self.commit_number
    }

    /// Whether this replica currently holds Normal status.
    pub fn is_normal(&self) -> bool {
        self.status == Status::Normal
    }

    /// Read access to the underlying log (for consistency checks).
    pub fn log(&self) -> &ListLog {
        &self.log
    }

    fn is_primary(&self, transport: &T) -> bool {
        transport.config().primary_of(self.view_number) == self.id
    }

    fn handle_message(
        &mut self,
        transport: &mut T,
        remote: T::Address,
        message: ReplicaMessage,
    ) -> Result<(), WinterholdError> {
        match message {
            ReplicaMessage::Request(m) => {
                self.handle_request(transport, remote, m)
            }
            ReplicaMessage::Prepare(m) => self.handle_prepare(transport, m),
            ReplicaMessage::PrepareOk(m) => {
                self.handle_prepare_ok(transport, m)
            }
            ReplicaMessage::Commit(m) => self.handle_commit(transport, m),
            ReplicaMessage::StartViewChange(m) => {
                self.handle_start_view_change(transport, m)
            }
            ReplicaMessage::DoViewChange(m) => {
                self.handle_do_view_change(transport, m)
            }
            ReplicaMessage::StartView(m) => {
                self.handle_start_view(transport, m)
            }
        }
    }

    fn broadcast(&self, transport: &mut T, message: &ReplicaMessage) {
        transport.send_message_to_all(&self.address, |buffer| {
            match wire_encode(buffer, message) {
                Ok(length) => length,
                Err(e) => panic!("message serialize failed: {}", e),
            }
        });
    }

    fn send_to_replica(
        &self,
        transport: &mut T,
        id: ReplicaId,
        message: &ReplicaMessage,
    ) {
        transport.send_message_to_replica(&self.address, id, |buffer| {
            match wire_encode(buffer, message) {
                Ok(length) => length,
                Err(e) => panic!("message serialize failed: {}", e),
            }
        });
    }

    fn send_reply(
        transport: &mut T,
        source: &T::Address,
        dest: &T::Address,
        reply: &ReplyMessage,
    ) {
        transport.send_message(source, dest, |buffer| {
            match wire_encode(buffer, reply) {
                Ok(length) => length,
                Err(e) => panic!("reply serialize failed: {}", e),
            }
        });
    }
}
