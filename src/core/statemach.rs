//! Application state machine interface and the built-in test apps.

use crate::core::Data;

/// Application interface seen by a replica's log. Operations are opaque
/// byte payloads; the log feeds them in commit order.
pub trait StateMachine {
    /// Executes one committed operation, returning the reply payload.
    fn commit(&mut self, op: Data) -> Data;

    /// Undoes the effect of previously committed operations. The in-core
    /// apps are idempotent or accumulator-only, so the default refuses.
    fn rollback(&mut self, _op: Data) {
        panic!("rollback unsupported by this state machine");
    }
}

/// Test app that records every committed op and replies with a derived
/// payload ("Re: <op>" by default).
pub struct MockApp {
    /// All ops committed so far, in execution order.
    pub op_list: Vec<Data>,

    make_reply: Box<dyn FnMut(&Data) -> Data>,
}

impl MockApp {
    /// Creates a mock app with the default "Re: " replier.
    pub fn new() -> Self {
        MockApp {
            op_list: vec![],
            make_reply: Box::new(|op| {
                let mut reply = Data::from_slice(b"Re: ");
                reply.extend_from_slice(op);
                reply
            }),
        }
    }

    /// Creates a mock app with a custom replier.
    pub fn with_replier(
        make_reply: impl FnMut(&Data) -> Data + 'static,
    ) -> Self {
        MockApp {
            op_list: vec![],
            make_reply: Box::new(make_reply),
        }
    }
}

impl Default for MockApp {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine for MockApp {
    fn commit(&mut self, op: Data) -> Data {
        let reply = (self.make_reply)(&op);
        self.op_list.push(op);
        reply
    }
}

/// App that ignores every op and replies with empty payloads.
pub struct NullApp;

impl StateMachine for NullApp {
    fn commit(&mut self, _op: Data) -> Data {
        Data::new()
    }

    fn rollback(&mut self, _op: Data) {}
}
