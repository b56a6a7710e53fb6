//! Shared replica-side functionality components reused across protocols.

mod clitable;
mod log;
mod quorum;
mod timeout;

pub use clitable::{ClientTable, RequestCheck};
pub use log::{Block, ChainBlock, Entry, ListLog, Log, ReplyCallback};
pub use quorum::{QuorumMessages, QuorumSet};
pub use timeout::StatefulTimeout;
