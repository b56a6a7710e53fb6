//! VR -- message types and peer-peer message handlers.

use std::time::Duration;

use super::{Status, VrReplica};
use crate::client::{ClientProtocol, RequestMessage, Strategy};
use crate::core::{OpNumber, ReplicaId, Transport, ViewNumber};
use crate::server::{Block, Log};
use crate::utils::WinterholdError;

use serde::{Deserialize, Serialize};

/// Primary -> backups: block contents to prepare at an op number,
/// piggybacking the primary's commit number.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct PrepareMessage {
    pub view_number: ViewNumber,
    pub op_number: OpNumber,
    pub block: Block,
    pub commit_number: OpNumber,
}

/// Backup -> primary: acknowledgement of a prepared op number.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct PrepareOkMessage {
    pub view_number: ViewNumber,
    pub op_number: OpNumber,
    pub replica_id: ReplicaId,
}

/// Primary -> backups: idle-period commit number broadcast.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct CommitMessage {
    pub view_number: ViewNumber,
    pub commit_number: OpNumber,
}

/// Backup -> all: vote to leave the current view.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct StartViewChangeMessage {
    pub view_number: ViewNumber,
    pub replica_id: ReplicaId,
}

/// Placeholder for the log transfer this design does not perform. View
/// change is only supported when no log entries need to move.
#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
pub struct ZeroLog;

/// Backup -> new primary: view change commitment carrying log position.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct DoViewChangeMessage {
    pub view_number: ViewNumber,
    pub log: ZeroLog,
    pub latest_normal: ViewNumber,
    pub op_number: OpNumber,
    pub commit_number: OpNumber,
    pub replica_id: ReplicaId,
}

/// New primary -> backups: the new view is in effect.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct StartViewMessage {
    pub view_number: ViewNumber,
    pub log: ZeroLog,
    pub op_number: OpNumber,
    pub commit_number: OpNumber,
}

/// Replica-side message union; the tag discriminates on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReplicaMessage {
    Request(RequestMessage),
    Prepare(PrepareMessage),
    PrepareOk(PrepareOkMessage),
    Commit(CommitMessage),
    StartViewChange(StartViewChangeMessage),
    DoViewChange(DoViewChangeMessage),
    StartView(StartViewMessage),
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

// VrReplica peer-peer messages handling
impl<T: Transport> VrReplica<T> {
    /// Handler of Prepare message from primary (backup side).
    pub(super) fn handle_prepare(
        &mut self,
        transport: &mut T,
        prepare: PrepareMessage,
    ) -> Result<(), WinterholdError> {
        // normal-case traffic must not retrigger the view-change machinery
        // while one is already underway
        if self.status != Status::Normal
            || prepare.view_number < self.view_number
        {
            return Ok(());
        }
        if prepare.view_number > self.view_number {
            self.start_view_change(transport, prepare.view_number);
            return Ok(());
        }
        if self.is_primary(transport) {
            return logged_err!(
                "primary {} received Prepare in its own view {}",
                self.id,
                self.view_number
            );
        }

        self.view_change_timer.reset(transport);

        if prepare.op_number <= self.op_number {
            // already prepared; the stale PrepareOk is not resent
            return Ok(());
        }
        if prepare.op_number != self.op_number + 1 {
            // would need state transfer to fill the hole
            return logged_err!(
                "op number gap at backup {}: {} -> {}",
                self.id,
                self.op_number,
                prepare.op_number
            );
        }

        self.op_number += 1;
        self.log.prepare(self.op_number, prepare.block.clone());
        // record relayed requests first, then ack to the primary
        for entry in &prepare.block.entries {
            self.client_table
                .update(entry.client_id, entry.request_number);
        }

        let prepare_ok = PrepareOkMessage {
            view_number: self.view_number,
            op_number: self.op_number,
            replica_id: self.id,
        };
        let primary = transport.config().primary_of(self.view_number);
        self.send_to_replica(
            transport,
            primary,
            &ReplicaMessage::PrepareOk(prepare_ok),
        );

        if prepare.commit_number > self.commit_number {
            self.commit_up_to(transport, prepare.commit_number);
        }
        Ok(())
    }

    /// Handler of PrepareOk message from backup (primary side).
    pub(super) fn handle_prepare_ok(
        &mut self,
        transport: &mut T,
        prepare_ok: PrepareOkMessage,
    ) -> Result<(), WinterholdError> {
        if prepare_ok.view_number < self.view_number {
            return Ok(());
        }
        if prepare_ok.view_number > self.view_number {
            self.start_view_change(transport, prepare_ok.view_number);
            return Ok(());
        }
        if self.status != Status::Normal {
            return Ok(());
        }
        if !self.is_primary(transport) {
            return logged_err!(
                "backup {} received PrepareOk in view {}",
                self.id,
                self.view_number
            );
        }
        if prepare_ok.op_number <= self.commit_number {
            return Ok(()); // already committed
        }

        let op_number = prepare_ok.op_number;
        if self
            .prepare_ok_set
            .add_and_check(op_number, prepare_ok.replica_id, prepare_ok)
            .is_some()
        {
            self.commit_up_to(transport, op_number);
        }
        Ok(())
    }

    /// Handler of Commit message from primary (backup side).
    pub(super) fn handle_commit(
        &mut self,
        transport: &mut T,
        commit: CommitMessage,
    ) -> Result<(), WinterholdError> {
        if commit.view_number < self.view_number {
            return Ok(());
        }
        if commit.view_number > self.view_number {
            self.start_view_change(transport, commit.view_number);
            return Ok(());
        }
        if self.status != Status::Normal {
            return Ok(());
        }

        self.view_change_timer.reset(transport);

        if commit.commit_number > self.commit_number {
            self.commit_up_to(transport, commit.commit_number);
        }
        Ok(())
    }
}
