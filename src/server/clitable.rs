//! Client-reply table: per-client last-request deduplication and cached
//! replies on the replica side.

use std::collections::HashMap;

use crate::core::{ClientId, RequestNumber};
use crate::utils::WinterholdError;

struct Record<A, R> {
    /// Client's network address, when a request arrived here directly.
    remote: Option<A>,

    /// Highest request number seen from this client.
    request_number: RequestNumber,

    /// Cached reply for `request_number`, once committed.
    reply: Option<R>,
}

/// Outcome of checking an incoming request against the table.
#[derive(Debug, PartialEq, Eq)]
pub enum RequestCheck<A, R> {
    /// Fresh request; caller processes it normally.
    Process,

    /// Stale or still-in-flight duplicate; caller drops it silently.
    Ignore,

    /// Completed duplicate; caller resends the cached reply to the remote.
    Resend(A, R),
}

/// Map from client ID to its latest request number and optional cached
/// reply. Request numbers are non-decreasing per client; a skip of more
/// than one is a protocol violation.
pub struct ClientTable<A, R> {
    records: HashMap<ClientId, Record<A, R>>,
}

impl<A: Clone, R: Clone> ClientTable<A, R> {
    /// Creates an empty table.
    pub fn new() -> Self {
        ClientTable {
            records: HashMap::new(),
        }
    }

    /// Checks a request received directly from `remote`. Records the
    /// request before the caller processes it, so a same-numbered duplicate
    /// arriving mid-processing reads as in-flight.
    pub fn check(
        &mut self,
        remote: &A,
        client_id: ClientId,
        request_number: RequestNumber,
    ) -> Result<RequestCheck<A, R>, WinterholdError> {
        let Some(record) = self.records.get_mut(&client_id) else {
            self.records.insert(
                client_id,
                Record {
                    remote: Some(remote.clone()),
                    request_number,
                    reply: None,
                },
            );
            return Ok(RequestCheck::Process);
        };

        if request_number < record.request_number {
            return Ok(RequestCheck::Ignore);
        }
        if request_number == record.request_number {
            return Ok(match record.reply {
                Some(ref reply) => {
                    RequestCheck::Resend(remote.clone(), reply.clone())
                }
                None => RequestCheck::Ignore,
            });
        }
        if request_number != record.request_number + 1 {
            return logged_err!(
                "discontinuous request number: client id = {:#x}, {} -> {}",
                client_id,
                record.request_number,
                request_number
            );
        }

        record.request_number = request_number;
        record.reply = None;
        record.remote = Some(remote.clone());
        Ok(RequestCheck::Process)
    }

    /// Records a request that arrived via a relay (no direct remote), e.g.
    /// a backup ingesting entries from a `Prepare`.
    pub fn update(&mut self, client_id: ClientId, request_number: RequestNumber) {
        match self.records.get_mut(&client_id) {
            Some(record) if request_number <= record.request_number => {
                pf_trace!(
                    "ignored relayed request: client id = {:#x}, {} <= {}",
                    client_id,
                    request_number,
                    record.request_number
                );
            }
            Some(record) => {
                record.request_number = request_number;
                record.reply = None;
            }
            None => {
                self.records.insert(
                    client_id,
                    Record {
                        remote: None,
                        request_number,
                        reply: None,
                    },
                );
            }
        }
    }

    /// Caches the committed reply for a request. Returns the client's
    /// remote address paired with the reply when one is known, letting the
    /// caller decide whether it should actually send (primary) or not
    /// (backup, which never learned the remote).
    pub fn update_reply(
        &mut self,
        client_id: ClientId,
        request_number: RequestNumber,
        reply: R,
    ) -> Option<(A, R)> {
        let Some(record) = self.records.get_mut(&client_id) else {
            pf_debug!("no record: client id = {:#x}", client_id);
            self.records.insert(
                client_id,
                Record {
                    remote: None,
                    request_number,
                    reply: Some(reply),
                },
            );
            return None;
        };

        if request_number < record.request_number {
            return None; // reply for an outdated request
        }
        if request_number > record.request_number {
            record.request_number = request_number;
        }
        record.reply = Some(reply.clone());
        record.remote.clone().map(|remote| (remote, reply))
    }
}

impl<A: Clone, R: Clone> Default for ClientTable<A, R> {
    fn default() -> Self {
        Self::new()
    }
}
