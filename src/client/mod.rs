//! Winterhold's client-side functionality modules.

mod basic;

pub use basic::{
    BasicClient, ClientProtocol, ReplyMessage, RequestMessage, Strategy,
};
