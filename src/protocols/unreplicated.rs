//! Replication protocol: unreplicated.
//!
//! A single replica orders and executes every operation itself. The
//! degenerate baseline, and a smoke test for the log + client-table wiring.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::client::{
    BasicClient, ClientProtocol, ReplyMessage, RequestMessage, Strategy,
};
use crate::core::{OpNumber, Transport};
use crate::server::{Block, ClientTable, Entry, ListLog, Log, RequestCheck};
use crate::utils::{wire_decode, wire_encode, WinterholdError};

use serde::{Deserialize, Serialize};

/// Replica-side message union. Only clients talk to an unreplicated
/// replica, but the tag keeps the wire format uniform across protocols.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReplicaMessage {
    Request(RequestMessage),
}

impl ClientProtocol for ReplicaMessage {
    type ReplicaMessage = ReplicaMessage;
    const STRATEGY: Strategy = Strategy::PrimaryFirst;
    const FAULT_MULTIPLIER: usize = 0;
    const RESEND_INTERVAL: Duration = Duration::from_millis(1000);

    fn wrap_request(request: RequestMessage) -> ReplicaMessage {
        ReplicaMessage::Request(request)
    }
}

/// Client endpoint type for the unreplicated protocol.
pub type Client<T> = BasicClient<T, ReplicaMessage>;

/// The unreplicated server replica.
pub struct UnreplicatedReplica<T: Transport> {
    address: T::Address,

    /// Highest op number assigned so far.
    op_number: OpNumber,

    client_table: ClientTable<T::Address, ReplyMessage>,
    log: ListLog,
}

impl<T: Transport> UnreplicatedReplica<T> {
    /// Creates the replica on replica address 0 and registers its receiver.
    pub fn new_and_setup(
        transport: &mut T,
        log: ListLog,
    ) -> Rc<RefCell<Self>> {
        let address = transport.config().replica(0).clone();
        let replica = Rc::new(RefCell::new(UnreplicatedReplica {
            address: address.clone(),
            op_number: 0,
            client_table: ClientTable::new(),
            log,
        }));

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
                    let result = match message {
                        ReplicaMessage::Request(request) => replica
                            .borrow_mut()
                            .handle_request(t, remote, request),
                    };
                    if let Err(e) = result {
                        panic!("protocol invariant violated: {}", e);
                    }
                }));
            }),
        );
        replica
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

    fn handle_request(
        &mut self,
        transport: &mut T,
        remote: T::Address,
        request: RequestMessage,
    ) -> Result<(), WinterholdError> {
        match self.client_table.check(
            &remote,
            request.client_id,
            request.request_number,
        )? {
            RequestCheck::Resend(dest, reply) => {
                Self::send_reply(transport, &self.address, &dest, &reply);
                return Ok(());
            }
            RequestCheck::Ignore => return Ok(()),
            RequestCheck::Process => {}
        }

        self.op_number += 1;
        self.log.prepare(
            self.op_number,
            Block::of_entry(Entry {
                client_id: request.client_id,
                request_number: request.request_number,
                op: request.op,
            }),
        );

        let address = self.address.clone();
        let client_table = &mut self.client_table;
        self.log.commit(
            self.op_number,
            &mut |client_id, request_number, result| {
                let reply = ReplyMessage {
                    request_number,
                    result,
                    view_number: 0,
                    replica_id: 0,
                };
                if let Some((dest, reply)) =
                    client_table.update_reply(client_id, request_number, reply)
                {
                    Self::send_reply(transport, &address, &dest, &reply);
                }
            },
        );
        Ok(())
    }
}
