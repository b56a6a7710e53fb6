//! Deterministic simulated transport driving the test suite.
//!
//! The simulator keeps a multimap from logical microsecond timestamps to
//! events (message deliveries and timer firings). Its loop pops the
//! earliest event, advances the logical clock to it, and executes it.
//! Events enqueued at the same instant run in FIFO order, so a run is a
//! pure function of the inputs and any randomness injected via filters.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::cell::RefCell;
use std::time::{Duration, Instant};

use crate::core::{ClusterConfig, ReceiverFn, TaskFn, TimerId, Transport};

use bytes::Bytes;

/// Fault-injection hook: `(source, dest, &mut delay) -> keep`. A message is
/// dropped if any filter returns false; filters may also add delay.
pub type FilterFn = Box<dyn FnMut(&str, &str, &mut Duration) -> bool>;

enum Event {
    Deliver {
        source: String,
        dest: String,
        payload: Bytes,
    },
    Multicast {
        source: String,
        payload: Bytes,
    },
    Timer(TimerId),
}

type SharedReceiver = Rc<RefCell<ReceiverFn<SimulatedTransport>>>;

/// The simulated transport. Addresses are short strings ("replica-0",
/// "client-A", ...).
pub struct SimulatedTransport {
    config: ClusterConfig<String>,

    /// Logical clock, microseconds since the start of the run.
    now_us: u64,

    /// Tiebreaker keeping same-instant events FIFO.
    seq: u64,

    /// Event multimap keyed by `(deadline_us, seq)`.
    events: BTreeMap<(u64, u64), Event>,

    /// Pending timer tasks; cancellation removes the entry so the matching
    /// event fizzles when popped.
    timer_tasks: HashMap<TimerId, TaskFn<Self>>,
    next_timer_id: TimerId,

    receivers: HashMap<String, SharedReceiver>,
    multicast_receivers: Vec<SharedReceiver>,

    /// Filters, run in ascending ID order on every unicast send.
    filters: BTreeMap<u32, FilterFn>,

    n_client: u32,
    terminated: bool,

    /// Hard real-time cap on one `run()`; exceeding it fails the run.
    wall_clock_limit: Duration,
}

impl SimulatedTransport {
    /// Creates a simulator over the given cluster configuration.
    pub fn new(config: ClusterConfig<String>) -> Self {
        SimulatedTransport {
            config,
            now_us: 0,
            seq: 0,
            events: BTreeMap::new(),
            timer_tasks: HashMap::new(),
            next_timer_id: 0,
            receivers: HashMap::new(),
            multicast_receivers: vec![],
            filters: BTreeMap::new(),
            n_client: 0,
            terminated: false,
            wall_clock_limit: Duration::from_secs(10),
        }
    }

    /// Current logical time in microseconds.
    #[inline]
    pub fn now_us(&self) -> u64 {
        self.now_us
    }

    /// Overrides the default 10s real-time cap on `run()`.
    pub fn set_wall_clock_limit(&mut self, limit: Duration) {
        self.wall_clock_limit = limit;
    }

    /// Installs a filter under `id` (replacing any filter with that ID).
    pub fn add_filter(
        &mut self,
        id: u32,
        filter: impl FnMut(&str, &str, &mut Duration) -> bool + 'static,
    ) {
        self.filters.insert(id, Box::new(filter));
    }

    /// Removes the filter installed under `id`.
    pub fn remove_filter(&mut self, id: u32) {
        self.filters.remove(&id);
    }

    /// Stops the run and discards every queued event and timer task.
    pub fn terminate(&mut self) {
        self.terminated = true;
        self.events.clear();
        self.timer_tasks.clear();
    }

    /// Runs events in timestamp order until termination or an empty queue.
    pub fn run(&mut self) {
        self.terminated = false;
        let started = Instant::now();
        while !self.terminated {
            if started.elapsed() > self.wall_clock_limit {
                panic!(
                    "simulation exceeded wall clock limit {:?}",
                    self.wall_clock_limit
                );
            }
            let Some(((deadline, _), event)) = self.events.pop_first() else {
                break;
            };
            debug_assert!(deadline >= self.now_us);
            self.now_us = deadline;
            match event {
                Event::Deliver {
                    source,
                    dest,
                    payload,
                } => {
                    let Some(receiver) = self.receivers.get(&dest) else {
                        panic!("unknown destination {:?}", dest);
                    };
                    let receiver = receiver.clone();
                    let mut on_message = receiver.borrow_mut();
                    (&mut *on_message)(self, source, &payload);
                }
                Event::Multicast { source, payload } => {
                    for receiver in self.multicast_receivers.clone() {
                        let mut on_message = receiver.borrow_mut();
                        (&mut *on_message)(self, source.clone(), &payload);
                    }
                }
                Event::Timer(id) => {
                    if let Some(task) = self.timer_tasks.remove(&id) {
                        task(self);
                    }
                }
            }
        }
    }

    fn enqueue_at(&mut self, deadline_us: u64, event: Event) {
        let seq = self.seq;
        self.seq += 1;
        self.events.insert((deadline_us, seq), event);
    }

    /// Runs the filter chain; `None` means the message is dropped.
    fn filtered_deadline(
        &mut self,
        source: &str,
        dest: &str,
    ) -> Option<u64> {
        let mut delay = Duration::ZERO;
        for filter in self.filters.values_mut() {
            if !filter(source, dest, &mut delay) {
                return None;
            }
        }
        Some(self.now_us + delay.as_micros() as u64)
    }

    fn write_payload(
        write: impl FnOnce(&mut [u8]) -> usize,
    ) -> Bytes {
        let mut buffer = [0u8; Self::BUFFER_SIZE];
        let length = write(&mut buffer);
        assert!(length <= Self::BUFFER_SIZE);
        Bytes::copy_from_slice(&buffer[..length])
    }
}

impl Transport for SimulatedTransport {
    type Address = String;

    const BUFFER_SIZE: usize = 9000;

    fn config(&self) -> &ClusterConfig<String> {
        &self.config
    }

    fn register_receiver(
        &mut self,
        address: String,
        on_message: ReceiverFn<Self>,
    ) {
        self.receivers
            .insert(address, Rc::new(RefCell::new(on_message)));
    }

    fn register_multicast_receiver(&mut self, on_message: ReceiverFn<Self>) {
        self.multicast_receivers
            .push(Rc::new(RefCell::new(on_message)));
    }

    fn send_message(
        &mut self,
        sender: &String,
        dest: &String,
        write: impl FnOnce(&mut [u8]) -> usize,
    ) {
        let payload = Self::write_payload(write);
        if let Some(deadline) = self.filtered_deadline(sender, dest) {
            self.enqueue_at(
                deadline,
                Event::Deliver {
                    source: sender.clone(),
                    dest: dest.clone(),
                    payload,
                },
            );
        }
    }

    fn send_message_to_all(
        &mut self,
        sender: &String,
        write: impl FnOnce(&mut [u8]) -> usize,
    ) {
        // serialize once, enqueue a refcounted clone per destination
        let payload = Self::write_payload(write);
        for dest in self.config.replicas.clone() {
            if dest == *sender {
                continue;
            }
            if let Some(deadline) = self.filtered_deadline(sender, &dest) {
                self.enqueue_at(
                    deadline,
                    Event::Deliver {
                        source: sender.clone(),
                        dest,
                        payload: payload.clone(),
                    },
                );
            }
        }
    }

    fn send_message_to_multicast(
        &mut self,
        sender: &String,
        write: impl FnOnce(&mut [u8]) -> usize,
    ) {
        let multicast = match self.config.multicast.clone() {
            Some(addr) => addr,
            None => panic!("no multicast address configured"),
        };
        let payload = Self::write_payload(write);
        if let Some(deadline) = self.filtered_deadline(sender, &multicast) {
            self.enqueue_at(
                deadline,
                Event::Multicast {
                    source: sender.clone(),
                    payload,
                },
            );
        }
    }

    fn schedule(&mut self, delay: Duration, task: TaskFn<Self>) -> TimerId {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        self.timer_tasks.insert(id, task);
        let deadline = self.now_us + delay.as_micros() as u64;
        self.enqueue_at(deadline, Event::Timer(id));
        id
    }

    fn cancel(&mut self, timer: TimerId) {
        self.timer_tasks.remove(&timer);
    }

    fn allocate_address(&mut self) -> String {
        let address = if self.n_client < 26 {
            format!("client-{}", (b'A' + self.n_client as u8) as char)
        } else {
            format!("client-{}", self.n_client)
        };
        self.n_client += 1;
        address
    }
}
