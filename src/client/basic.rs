//! Protocol-agnostic client: wraps operations into requests, sends them per
//! strategy, resends on timeout, and matches replies.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::core::{
    random_client_id, ClientId, Data, GenericClient, InvokeCallback,
    ReplicaId, RequestNumber, Transport, ViewNumber,
};
use crate::utils::{wire_decode, wire_encode, WinterholdError};

use serde::{Deserialize, Serialize};

/// Client-to-replica request envelope.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct RequestMessage {
    pub client_id: ClientId,
    pub request_number: RequestNumber,
    pub op: Data,
}

/// Replica-to-client reply.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct ReplyMessage {
    pub request_number: RequestNumber,
    pub result: Data,
    pub view_number: ViewNumber,
    pub replica_id: ReplicaId,
}

/// Request send strategy.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Strategy {
    /// Send every request to every replica.
    All,

    /// Send to the presumed primary first; escalate to every replica on
    /// every resend.
    PrimaryFirst,
}

/// Per-protocol client settings: the replica-message wrapper type, the send
/// strategy, and the reply-matching threshold. The codec hooks default to
/// MessagePack and exist so signing layers can interpose.
pub trait ClientProtocol: 'static {
    /// The protocol's replica-side message union that requests wrap into.
    type ReplicaMessage: Serialize;

    const STRATEGY: Strategy;

    /// Replies are accepted once `FAULT_MULTIPLIER * f + 1` distinct
    /// replicas agree on a result (0 for crash-tolerant protocols).
    const FAULT_MULTIPLIER: usize;

    const RESEND_INTERVAL: Duration;

    /// Wraps a request into the replica-message union.
    fn wrap_request(request: RequestMessage) -> Self::ReplicaMessage;

    /// Serializes an outgoing replica message into `buffer`.
    fn serialize_request(
        buffer: &mut [u8],
        msg: &Self::ReplicaMessage,
    ) -> Result<usize, WinterholdError> {
        wire_encode(buffer, msg)
    }

    /// Deserializes an incoming reply.
    fn deserialize_reply(bytes: &[u8]) -> Result<ReplyMessage, WinterholdError> {
        wire_decode(bytes)
    }
}

struct Pending<T: Transport> {
    request_number: RequestNumber,
    op: Data,
    /// Result payload -> replicas that replied with it; only consulted when
    /// more than one matching reply is required.
    results: HashMap<Data, HashSet<ReplicaId>>,
    callback: InvokeCallback<T>,
}

/// Generic client endpoint parameterized by transport and protocol
/// settings. At most one invocation may be outstanding at a time.
pub struct BasicClient<T: Transport, P: ClientProtocol> {
    address: T::Address,
    client_id: ClientId,

    /// Matching replies required before delivering a result.
    n_matched: usize,

    request_number: RequestNumber,

    /// Last view number observed in replies; routes `PrimaryFirst` sends.
    view_number: ViewNumber,

    pending: Option<Pending<T>>,

    /// Number of request resends performed over this client's lifetime.
    n_resend: u64,

    self_ref: Weak<RefCell<Self>>,
    _protocol: PhantomData<P>,
}

impl<T: Transport, P: ClientProtocol> BasicClient<T, P> {
    /// Creates a client, allocates its address, and registers its receiver.
    pub fn new_and_setup(transport: &mut T) -> Rc<RefCell<Self>> {
        let address = transport.allocate_address();
        let n_matched = P::FAULT_MULTIPLIER * transport.config().n_fault + 1;
        let client = Rc::new_cyclic(|me| {
            RefCell::new(BasicClient {
                address: address.clone(),
                client_id: random_client_id(),
                n_matched,
                request_number: 0,
                view_number: 0,
                pending: None,
                n_resend: 0,
                self_ref: me.clone(),
                _protocol: PhantomData,
            })
        });

        let me: Weak<RefCell<Self>> = Rc::downgrade(&client);
        transport.register_receiver(
            address,
            Box::new(move |t, _remote, payload| {
                let Some(client) = me.upgrade() else {
                    return;
                };
                let reply = match P::deserialize_reply(payload) {
                    Ok(reply) => reply,
                    Err(e) => {
                        panic!("reply deserialize failed: {}", e)
                    }
                };
                // handlers run off the RX path, one event at a time
                let me = Rc::downgrade(&client);
                t.spawn(Box::new(move |t| {
                    let Some(client) = me.upgrade() else {
                        return;
                    };
                    let delivery = client.borrow_mut().handle_reply(reply);
                    if let Some((callback, result)) = delivery {
                        callback(t, result);
                    }
                }));
            }),
        );
        client
    }

    /// This client's transport address.
    pub fn address(&self) -> &T::Address {
        &self.address
    }

    /// This client's random identifier.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Last view number observed in replies.
    pub fn view_number(&self) -> ViewNumber {
        self.view_number
    }

    /// Number of resends performed so far.
    pub fn n_resend(&self) -> u64 {
        self.n_resend
    }

    fn send_request(&mut self, transport: &mut T, resend: bool) {
        let Some(pending) = self.pending.as_ref() else {
            return;
        };
        let request = RequestMessage {
            client_id: self.client_id,
            request_number: pending.request_number,
            op: pending.op.clone(),
        };
        let msg = P::wrap_request(request);
        let write = |buffer: &mut [u8]| match P::serialize_request(buffer, &msg)
        {
            Ok(length) => length,
            Err(e) => panic!("request serialize failed: {}", e),
        };

        match P::STRATEGY {
            Strategy::All => {
                transport.send_message_to_all(&self.address, write);
            }
            Strategy::PrimaryFirst if resend => {
                transport.send_message_to_all(&self.address, write);
            }
            Strategy::PrimaryFirst => {
                let primary = transport.config().primary_of(self.view_number);
                transport.send_message_to_replica(
                    &self.address,
                    primary,
                    write,
                );
            }
        }

        let me = self.self_ref.clone();
        let current_number = pending.request_number;
        transport.schedule(
            P::RESEND_INTERVAL,
            Box::new(move |t| {
                let Some(client) = me.upgrade() else {
                    return;
                };
                let mut client = client.borrow_mut();
                let still_pending = matches!(
                    client.pending,
                    Some(ref p) if p.request_number == current_number
                );
                if still_pending {
                    pf_warn!("resend: request number = {}", current_number);
                    client.n_resend += 1;
                    client.send_request(t, true);
                }
            }),
        );
    }

    /// Processes one reply; returns the invoke callback and result when the
    /// reply completes the pending invocation.
    fn handle_reply(
        &mut self,
        reply: ReplyMessage,
    ) -> Option<(InvokeCallback<T>, Data)> {
        {
            let pending = self.pending.as_mut()?;
            if pending.request_number != reply.request_number {
                return None;
            }
            if reply.view_number > self.view_number {
                self.view_number = reply.view_number;
            }
            if self.n_matched > 1 {
                let agreed = pending
                    .results
                    .entry(reply.result.clone())
                    .or_default();
                agreed.insert(reply.replica_id);
                if agreed.len() < self.n_matched {
                    return None;
                }
            }
        }
        self.pending
            .take()
            .map(|pending| (pending.callback, reply.result))
    }
}

impl<T: Transport, P: ClientProtocol> GenericClient<T> for BasicClient<T, P> {
    fn invoke(
        &mut self,
        transport: &mut T,
        op: Data,
        callback: InvokeCallback<T>,
    ) {
        if self.pending.is_some() {
            panic!("invoke on client with pending request");
        }
        self.request_number += 1;
        self.pending = Some(Pending {
            request_number: self.request_number,
            op,
            results: HashMap::new(),
            callback,
        });
        self.send_request(transport, false);
    }
}

#[cfg(test)]
mod basic_tests {
    use super::*;
    use crate::core::{data_of, ClusterConfig};
    use crate::transport::SimulatedTransport;

    /// Minimal settings: requests pass through unwrapped, one matching
    /// reply suffices.
    struct SoloProto;
    impl ClientProtocol for SoloProto {
        type ReplicaMessage = RequestMessage;
        const STRATEGY: Strategy = Strategy::PrimaryFirst;
        const FAULT_MULTIPLIER: usize = 0;
        const RESEND_INTERVAL: Duration = Duration::from_millis(1000);
        fn wrap_request(request: RequestMessage) -> RequestMessage {
            request
        }
    }

    /// BFT-style settings: `f + 1` matching replies required.
    struct MatchedProto;
    impl ClientProtocol for MatchedProto {
        type ReplicaMessage = RequestMessage;
        const STRATEGY: Strategy = Strategy::All;
        const FAULT_MULTIPLIER: usize = 1;
        const RESEND_INTERVAL: Duration = Duration::from_millis(1000);
        fn wrap_request(request: RequestMessage) -> RequestMessage {
            request
        }
    }

    fn sim(n_fault: usize, replicas: &[&str]) -> SimulatedTransport {
        SimulatedTransport::new(ClusterConfig::new(
            n_fault,
            replicas.iter().map(|a| a.to_string()).collect(),
        ))
    }

    /// Stub replica endpoint that records requests and replies through
    /// `make_reply` when it returns one.
    fn stub_replica(
        transport: &mut SimulatedTransport,
        address: &'static str,
        replica_id: ReplicaId,
        mut make_reply: impl FnMut(&RequestMessage) -> Option<Data> + 'static,
    ) -> Rc<RefCell<Vec<RequestMessage>>> {
        let seen = Rc::new(RefCell::new(vec![]));
        let seen_ref = seen.clone();
        transport.register_receiver(
            address.into(),
            Box::new(move |t, remote, payload| {
                let request: RequestMessage = wire_decode(payload).unwrap();
                seen_ref.borrow_mut().push(request.clone());
                if let Some(result) = make_reply(&request) {
                    let reply = ReplyMessage {
                        request_number: request.request_number,
                        result,
                        view_number: 0,
                        replica_id,
                    };
                    t.send_message(&address.into(), &remote, |buf| {
                        wire_encode(buf, &reply).unwrap()
                    });
                }
            }),
        );
        seen
    }

    #[test]
    fn invoke_delivers_result() {
        let mut transport = sim(0, &["replica-0"]);
        let seen = stub_replica(&mut transport, "replica-0", 0, |_| {
            Some(data_of(b"echo"))
        });
        let client =
            BasicClient::<_, SoloProto>::new_and_setup(&mut transport);
        let delivered = Rc::new(RefCell::new(None));
        let delivered_ref = delivered.clone();
        client.borrow_mut().invoke(
            &mut transport,
            data_of(b"hi"),
            Box::new(move |t, result| {
                *delivered_ref.borrow_mut() = Some(result);
                t.terminate();
            }),
        );
        transport.run();
        assert_eq!(*delivered.borrow(), Some(data_of(b"echo")));
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].request_number, 1);
        assert_eq!(client.borrow().n_resend(), 0);
    }

    #[test]
    fn silent_replica_triggers_resend_to_all() {
        let mut transport = sim(0, &["replica-0", "replica-1", "replica-2"]);
        let seen0 = stub_replica(&mut transport, "replica-0", 0, |_| None);
        let seen1 = stub_replica(&mut transport, "replica-1", 1, |_| None);
        let seen2 = stub_replica(&mut transport, "replica-2", 2, |_| None);
        let client =
            BasicClient::<_, SoloProto>::new_and_setup(&mut transport);
        client.borrow_mut().invoke(
            &mut transport,
            data_of(b"hi"),
            Box::new(|_, _| panic!("no reply expected")),
        );
        let client_ref = client.clone();
        transport.schedule(
            Duration::from_millis(1500),
            Box::new(move |t| {
                assert_eq!(client_ref.borrow().n_resend(), 1);
                t.terminate();
            }),
        );
        transport.run();
        // primary-first initially, all replicas after the resend
        assert_eq!(seen0.borrow().len(), 2);
        assert_eq!(seen1.borrow().len(), 1);
        assert_eq!(seen2.borrow().len(), 1);
    }

    #[test]
    fn mismatched_and_duplicate_replies_ignored() {
        let mut transport = sim(0, &["replica-0"]);
        // replies twice per request; the duplicate must not double-fire
        transport.register_receiver(
            "replica-0".into(),
            Box::new(move |t, remote, payload| {
                let request: RequestMessage = wire_decode(payload).unwrap();
                let reply = ReplyMessage {
                    request_number: request.request_number,
                    result: data_of(b"echo"),
                    view_number: 0,
                    replica_id: 0,
                };
                for _ in 0..2 {
                    t.send_message(&"replica-0".into(), &remote, |buf| {
                        wire_encode(buf, &reply).unwrap()
                    });
                }
            }),
        );
        let fired = Rc::new(RefCell::new(0));
        let client =
            BasicClient::<_, SoloProto>::new_and_setup(&mut transport);

        // stale reply with a wrong request number is dropped outright
        let address = client.borrow().address().clone();
        let stale = ReplyMessage {
            request_number: 99,
            result: data_of(b"bogus"),
            view_number: 0,
            replica_id: 0,
        };
        transport.send_message(&"replica-0".into(), &address, |buf| {
            wire_encode(buf, &stale).unwrap()
        });

        let fired_ref = fired.clone();
        client.borrow_mut().invoke(
            &mut transport,
            data_of(b"hi"),
            Box::new(move |_, _| *fired_ref.borrow_mut() += 1),
        );
        transport.run();
        assert_eq!(*fired.borrow(), 1);
    }

    #[test]
    fn matched_replies_threshold() {
        let mut transport = sim(1, &["replica-0", "replica-1", "replica-2"]);
        stub_replica(&mut transport, "replica-0", 0, |_| {
            Some(data_of(b"bogus"))
        });
        stub_replica(&mut transport, "replica-1", 1, |_| {
            Some(data_of(b"echo"))
        });
        stub_replica(&mut transport, "replica-2", 2, |_| {
            Some(data_of(b"echo"))
        });
        let client =
            BasicClient::<_, MatchedProto>::new_and_setup(&mut transport);
        assert_eq!(client.borrow().n_matched, 2);
        let delivered = Rc::new(RefCell::new(None));
        let delivered_ref = delivered.clone();
        client.borrow_mut().invoke(
            &mut transport,
            data_of(b"hi"),
            Box::new(move |t, result| {
                *delivered_ref.borrow_mut() = Some(result);
                t.terminate();
            }),
        );
        transport.run();
        // the two agreeing replicas win; the lone deviant never reaches 2
        assert_eq!(*delivered.borrow(), Some(data_of(b"echo")));
    }

    #[test]
    #[should_panic(expected = "pending request")]
    fn double_invoke_is_fatal() {
        let mut transport = sim(0, &["replica-0"]);
        stub_replica(&mut transport, "replica-0", 0, |_| None);
        let client =
            BasicClient::<_, SoloProto>::new_and_setup(&mut transport);
        client.borrow_mut().invoke(
            &mut transport,
            data_of(b"a"),
            Box::new(|_, _| {}),
        );
        client.borrow_mut().invoke(
            &mut transport,
            data_of(b"b"),
            Box::new(|_, _| {}),
        );
    }
}
