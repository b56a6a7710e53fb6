//! Replicated log of batched operation blocks, with prepare/commit phases
//! and an upcall into the application on execution.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::core::{
    ClientId, Data, Digest, OpNumber, RequestNumber, StateMachine, BLOCK_SIZE,
};

use serde::{Deserialize, Serialize};

/// One client operation recorded in the log.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Issuing client's ID.
    pub client_id: ClientId,

    /// Client-local request sequence number.
    pub request_number: RequestNumber,

    /// Opaque operation payload.
    pub op: Data,
}

/// Unit of consensus for the list log: a batch of up to `BLOCK_SIZE`
/// entries sharing one op number.
#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    /// Batched entries, in arrival order.
    pub entries: Vec<Entry>,
}

impl Block {
    /// Creates an empty block.
    pub fn new() -> Self {
        Block { entries: vec![] }
    }

    /// Creates a block holding exactly one entry.
    pub fn of_entry(entry: Entry) -> Self {
        Block {
            entries: vec![entry],
        }
    }

    /// Appends an entry; blocks never grow past `BLOCK_SIZE`.
    pub fn push(&mut self, entry: Entry) {
        assert!(self.entries.len() < BLOCK_SIZE, "block overfilled");
        self.entries.push(entry);
    }

    /// Number of batched entries.
    #[inline]
    pub fn n_entry(&self) -> usize {
        self.entries.len()
    }

    /// True iff no entries are batched.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Block variant for the chain log: same batch plus a back-pointer to the
/// preceding block. Reserved for BFT-style protocols; not exercised by any
/// in-tree protocol yet.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ChainBlock {
    /// Digest of the previous chain block.
    pub previous: Digest,

    /// Batched entries.
    pub entries: Vec<Entry>,
}

/// Callback fired once per executed entry with the app's reply payload.
pub type ReplyCallback<'a> =
    &'a mut dyn FnMut(ClientId, RequestNumber, Data);

/// Log interface shared by the list and (reserved) chain variants.
pub trait Log {
    /// Consensus slot index type.
    type Index: Copy + Ord + fmt::Debug;

    /// Block type stored per slot.
    type Block;

    /// Stores a block at `index`. Indices are dense: preparing anywhere but
    /// one past the current tail is a fatal protocol error.
    fn prepare(&mut self, index: Self::Index, block: Self::Block);

    /// Marks the block at `index` committed, then executes every contiguous
    /// committed block past the executed prefix, firing `on_reply` once per
    /// entry.
    fn commit(&mut self, index: Self::Index, on_reply: ReplyCallback<'_>);

    /// Discards every block at `index` and beyond.
    fn rollback_to(&mut self, index: Self::Index);

    /// Turns execution upcalls on and immediately drains any committed
    /// backlog (with no reply callbacks).
    fn enable_upcall(&mut self);

    /// Turns execution upcalls off; blocks still accumulate commit marks.
    fn disable_upcall(&mut self);
}

struct BlockBox {
    block: Block,
    committed: bool,
}

/// The list log: a dense sequence of prepared blocks indexed by op number,
/// executed in order against the application.
pub struct ListLog {
    /// Application the executed entries are fed into.
    app: Rc<RefCell<dyn StateMachine>>,

    /// Op number of the first stored block; 0 until the first prepare.
    start: OpNumber,

    /// Highest executed op number.
    commit_number: OpNumber,

    /// Prepared blocks, dense from `start`.
    blocks: Vec<BlockBox>,

    /// Whether committed blocks are executed against the app.
    upcall: bool,
}

impl ListLog {
    /// Creates an empty list log bound to the given application.
    pub fn new(app: Rc<RefCell<dyn StateMachine>>) -> Self {
        ListLog {
            app,
            start: 0,
            commit_number: 0,
            blocks: vec![],
            upcall: true,
        }
    }

    /// Highest executed op number.
    #[inline]
    pub fn commit_number(&self) -> OpNumber {
        self.commit_number
    }

    /// Op number of the first stored block (0 if nothing prepared yet).
    #[inline]
    pub fn start(&self) -> OpNumber {
        self.start
    }

    /// Number of prepared blocks currently stored.
    #[inline]
    pub fn n_block(&self) -> usize {
        self.blocks.len()
    }

    /// The prepared block at `index`, if stored.
    pub fn block_at(&self, index: OpNumber) -> Option<&Block> {
        self.offset_of(index).map(|o| &self.blocks[o].block)
    }

    /// Whether the block at `index` is marked committed.
    pub fn is_committed(&self, index: OpNumber) -> bool {
        self.offset_of(index)
            .map(|o| self.blocks[o].committed)
            .unwrap_or(false)
    }

    fn offset_of(&self, index: OpNumber) -> Option<usize> {
        if self.start == 0 || index < self.start {
            return None;
        }
        let offset = (index - self.start) as usize;
        (offset < self.blocks.len()).then_some(offset)
    }

    /// Executes contiguous committed blocks past the executed prefix.
    fn drain(&mut self, on_reply: ReplyCallback<'_>) {
        if !self.upcall {
            return;
        }
        loop {
            let next = self.commit_number + 1;
            match self.offset_of(next) {
                Some(offset) if self.blocks[offset].committed => {
                    for entry in &self.blocks[offset].block.entries {
                        let reply =
                            self.app.borrow_mut().commit(entry.op.clone());
                        on_reply(entry.client_id, entry.request_number, reply);
                    }
                    self.commit_number = next;
                }
                _ => break,
            }
        }
    }
}

impl Log for ListLog {
    type Index = OpNumber;
    type Block = Block;

    fn prepare(&mut self, index: OpNumber, block: Block) {
        if self.start == 0 {
            assert!(index > 0, "op number 0 is reserved for unset");
            // first prepare pins the window; normally index 1, but a log
            // may begin mid-stream when seeded from another replica
            self.start = index;
            self.commit_number = index - 1;
        }
        let expect = self.start + self.blocks.len() as OpNumber;
        if index != expect {
            panic!(
                "prepare with op number gap: index = {}, expected {}",
                index, expect
            );
        }
        self.blocks.push(BlockBox {
            block,
            committed: false,
        });
    }

    fn commit(&mut self, index: OpNumber, on_reply: ReplyCallback<'_>) {
        match self.offset_of(index) {
            Some(offset) => self.blocks[offset].committed = true,
            None => panic!("commit on non-prepared index {}", index),
        }
        self.drain(on_reply);
    }

    fn rollback_to(&mut self, index: OpNumber) {
        if index < self.start {
            self.start = 0;
            self.commit_number = 0;
            self.blocks.clear();
        } else {
            debug_assert!(
                index > self.commit_number,
                "rolling back executed blocks"
            );
            self.blocks.truncate((index - self.start) as usize);
        }
    }

    fn enable_upcall(&mut self) {
        self.upcall = true;
        self.drain(&mut |_, _, _| {});
    }

    fn disable_upcall(&mut self) {
        self.upcall = false;
    }
}
