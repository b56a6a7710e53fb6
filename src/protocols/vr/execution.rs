//! VR -- commit execution and reply upcalls.

use super::VrReplica;
use crate::client::ReplyMessage;
use crate::core::{OpNumber, Transport};
use crate::server::Log;
use crate::utils::wire_encode;

// VrReplica commit execution
impl<T: Transport> VrReplica<T> {
    /// Commits and executes every op up to and including `target`. The
    /// per-entry callback caches the reply in the client table; only the
    /// primary actually sends it (backups never learned the remote, and
    /// their cached replies serve later duplicate requests).
    pub(super) fn commit_up_to(&mut self, transport: &mut T, target: OpNumber) {
        if target <= self.commit_number {
            return;
        }
        let primary = self.is_primary(transport);
        let address = self.address.clone();
        let view_number = self.view_number;
        let replica_id = self.id;

        for index in (self.commit_number + 1)..=target {
            let client_table = &mut self.client_table;
            self.log.commit(
                index,
                &mut |client_id, request_number, result| {
                    let reply = ReplyMessage {
                        request_number,
                        result,
                        view_number,
                        replica_id,
                    };
                    let to_send = client_table.update_reply(
                        client_id,
                        request_number,
                        reply,
                    );
                    if primary {
                        if let Some((dest, reply)) = to_send {
                            transport.send_message(&address, &dest, |buffer| {
                                match wire_encode(buffer, &reply) {
                                    Ok(length) => length,
                                    Err(e) => panic!(
                                        "reply serialize failed: {}",
                                        e
                                    ),
                                }
                            });
                        }
                    }
                },
            );
        }
        self.commit_number = target;
    }
}
