//! VR -- view change machinery and role timers.

use super::{
    CommitMessage, DoViewChangeMessage, ReplicaMessage,
    StartViewChangeMessage, StartViewMessage, Status, VrReplica, ZeroLog,
};
use crate::core::{Transport, ViewNumber};
use crate::server::Block;
use crate::utils::WinterholdError;

// VrReplica leadership and view change
impl<T: Transport> VrReplica<T> {
    /// Primary's idle-commit timer callback: keep backups' commit numbers
    /// (and view-change timers) refreshed while no Prepares flow.
    pub(super) fn on_idle_commit(&mut self, transport: &mut T) {
        if self.status != Status::Normal {
            return;
        }
        let commit = CommitMessage {
            view_number: self.view_number,
            commit_number: self.commit_number,
        };
        self.broadcast(transport, &ReplicaMessage::Commit(commit));
        self.idle_commit_timer.reset(transport);
    }

    /// Backup's view-change timer callback: the primary has gone quiet.
    pub(super) fn on_view_change_timeout(&mut self, transport: &mut T) {
        pf_warn!(
            "replica {} timed out on view {}",
            self.id,
            self.view_number
        );
        self.start_view_change(transport, self.view_number + 1);
    }

    /// Moves into ViewChange status for view `view_number` and solicits
    /// votes. The timer stays armed to bound the wait for the new primary.
    pub(super) fn start_view_change(
        &mut self,
        transport: &mut T,
        view_number: ViewNumber,
    ) {
        debug_assert!(view_number > self.view_number);
        self.status = Status::ViewChange;
        self.view_number = view_number;
        self.do_view_change_sent = false;
        self.view_change_timer.reset(transport);

        let msg = StartViewChangeMessage {
            view_number,
            replica_id: self.id,
        };
        self.broadcast(transport, &ReplicaMessage::StartViewChange(msg));
    }

    /// Handler of StartViewChange message from peer.
    pub(super) fn handle_start_view_change(
        &mut self,
        transport: &mut T,
        msg: StartViewChangeMessage,
    ) -> Result<(), WinterholdError> {
        if msg.view_number < self.view_number {
            return Ok(());
        }
        if msg.view_number > self.view_number {
            self.start_view_change(transport, msg.view_number);
        }

        let view_number = msg.view_number;
        let quorum = self
            .start_view_change_set
            .add_and_check(view_number, msg.replica_id, msg)
            .is_some();
        // own vote is implicit: the threshold is f, not f + 1
        if quorum
            && self.status == Status::ViewChange
            && !self.do_view_change_sent
        {
            self.do_view_change_sent = true;
            self.send_do_view_change(transport);
        }
        Ok(())
    }

    /// Commits to the view change by informing the new primary of this
    /// replica's log position.
    fn send_do_view_change(&mut self, transport: &mut T) {
        let msg = DoViewChangeMessage {
            view_number: self.view_number,
            log: ZeroLog,
            latest_normal: self.latest_normal,
            op_number: self.op_number,
            commit_number: self.commit_number,
            replica_id: self.id,
        };
        let primary = transport.config().primary_of(self.view_number);
        if primary != self.id {
            self.send_to_replica(
                transport,
                primary,
                &ReplicaMessage::DoViewChange(msg),
            );
            return;
        }

        // self is the new primary: count our own message and see whether
        // the laggards already got us to quorum
        let quorum: Option<Vec<DoViewChangeMessage>> = self
            .do_view_change_set
            .add_and_check(self.view_number, self.id, msg)
            .map(|votes| votes.values().cloned().collect());
        if let Some(quorum) = quorum {
            self.start_view(transport, quorum);
        }
    }

    /// Handler of DoViewChange message from peer (new primary side).
    pub(super) fn handle_do_view_change(
        &mut self,
        transport: &mut T,
        msg: DoViewChangeMessage,
    ) -> Result<(), WinterholdError> {
        if msg.view_number < self.view_number {
            return Ok(());
        }
        if msg.view_number > self.view_number {
            self.start_view_change(transport, msg.view_number);
        }
        if transport.config().primary_of(self.view_number) != self.id {
            return logged_err!(
                "replica {} is not primary of view {} yet got DoViewChange",
                self.id,
                self.view_number
            );
        }
        if self.status != Status::ViewChange {
            // a late backup would need a StartView resent; dropped
            return Ok(());
        }

        let view_number = msg.view_number;
        let quorum: Option<Vec<DoViewChangeMessage>> = self
            .do_view_change_set
            .add_and_check(view_number, msg.replica_id, msg)
            .map(|votes| votes.values().cloned().collect());
        if let Some(quorum) = quorum {
            self.start_view(transport, quorum);
        }
        Ok(())
    }

    /// Takes over as the new view's primary, unless some quorum member is
    /// ahead of our log (which would require state transfer).
    fn start_view(
        &mut self,
        transport: &mut T,
        quorum: Vec<DoViewChangeMessage>,
    ) {
        let mut max_commit = self.commit_number;
        for msg in &quorum {
            if msg.op_number > self.op_number {
                // cannot lead without the missing entries; the still-armed
                // view-change timer escalates to the next view
                pf_warn!(
                    "replica {} gives up view {}: replica {} has op {} > {}",
                    self.id,
                    self.view_number,
                    msg.replica_id,
                    msg.op_number,
                    self.op_number
                );
                return;
            }
            if msg.commit_number > max_commit {
                max_commit = msg.commit_number;
            }
        }

        let start_view = StartViewMessage {
            view_number: self.view_number,
            log: ZeroLog,
            op_number: self.op_number,
            commit_number: max_commit,
        };
        self.broadcast(
            transport,
            &ReplicaMessage::StartView(start_view.clone()),
        );
        self.enter_view(transport, start_view);
    }

    /// Handler of StartView message from new primary.
    pub(super) fn handle_start_view(
        &mut self,
        transport: &mut T,
        msg: StartViewMessage,
    ) -> Result<(), WinterholdError> {
        if msg.view_number < self.view_number {
            return Ok(());
        }
        if msg.view_number == self.view_number
            && self.status == Status::Normal
        {
            return Ok(()); // already entered
        }
        self.enter_view(transport, msg);
        Ok(())
    }

    /// Resumes Normal status in the view the StartView describes.
    fn enter_view(&mut self, transport: &mut T, start_view: StartViewMessage) {
        pf_info!(
            "replica {} entering view {} (op {} commit {})",
            self.id,
            start_view.view_number,
            start_view.op_number,
            start_view.commit_number
        );
        self.view_number = start_view.view_number;
        self.status = Status::Normal;
        self.latest_normal = start_view.view_number;
        self.batch = Block::new();
        self.prepare_ok_set.clear();
        self.do_view_change_sent = false;

        if self.is_primary(transport) {
            self.view_change_timer.disable(transport);
            self.idle_commit_timer.reset(transport);
        } else {
            self.idle_commit_timer.disable(transport);
            self.view_change_timer.reset(transport);
        }

        if self.op_number < start_view.op_number {
            panic!(
                "replica {} lacks ops {}..{} entering view {}: \
                 state transfer unimplemented",
                self.id,
                self.op_number,
                start_view.op_number,
                start_view.view_number
            );
        }
        if start_view.commit_number > self.commit_number {
            self.commit_up_to(transport, start_view.commit_number);
        }
    }
}
