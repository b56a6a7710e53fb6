//! VR -- client requests handling and batching (primary side).

use std::mem;

use super::{PrepareMessage, ReplicaMessage, Status, VrReplica};
use crate::client::RequestMessage;
use crate::core::Transport;
use crate::server::{Entry, Log, RequestCheck};
use crate::utils::WinterholdError;

// VrReplica client requests handling
impl<T: Transport> VrReplica<T> {
    /// Handler of Request message from client.
    pub(super) fn handle_request(
        &mut self,
        transport: &mut T,
        remote: T::Address,
        request: RequestMessage,
    ) -> Result<(), WinterholdError> {
        if self.status != Status::Normal || !self.is_primary(transport) {
            return Ok(());
        }

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

        self.batch.push(Entry {
            client_id: request.client_id,
            request_number: request.request_number,
            op: request.op,
        });
        if self.batch.n_entry() >= self.config.batch_size {
            self.close_batch(transport);
        }
        Ok(())
    }

    /// Seals the accumulating batch into the next block, prepares it
    /// locally, and broadcasts the Prepare.
    pub(super) fn close_batch(&mut self, transport: &mut T) {
        self.op_number += 1;
        let block = mem::take(&mut self.batch);
        self.log.prepare(self.op_number, block.clone());

        let prepare = PrepareMessage {
            view_number: self.view_number,
            op_number: self.op_number,
            block,
            commit_number: self.commit_number,
        };
        self.broadcast(transport, &ReplicaMessage::Prepare(prepare));
        self.idle_commit_timer.reset(transport);

        // a single-replica cluster (f = 0) meets quorum with no acks at all
        if self.prepare_ok_set.check(&self.op_number).is_some() {
            self.commit_up_to(transport, self.op_number);
        }
    }
}
