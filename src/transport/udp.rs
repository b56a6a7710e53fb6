//! Live transport backend over UDP sockets.
//!
//! One RX thread per registered endpoint reads datagrams and forwards them
//! through a channel; the owning thread's `run()` drains that channel and
//! fires due timers, so protocol handlers still execute on a single logical
//! stream of events. This backend is a minimal operational stand-in for a
//! kernel-bypass transport and is not used by the deterministic test suite.

use std::cell::RefCell;
use std::collections::{BinaryHeap, HashMap};
use std::cmp::Reverse;
use std::net::{SocketAddr, UdpSocket};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use crate::core::{ClusterConfig, ReceiverFn, TaskFn, TimerId, Transport};
use crate::utils::WinterholdError;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

type SharedReceiver = Rc<RefCell<ReceiverFn<UdpTransport>>>;

/// Datagram forwarded off an RX thread: `(local endpoint, remote, bytes)`.
type RxDatagram = (SocketAddr, SocketAddr, Vec<u8>);

/// UDP-backed live transport. Addresses are socket addresses; each
/// registered endpoint binds its own socket.
pub struct UdpTransport {
    config: ClusterConfig<SocketAddr>,

    rx: Receiver<RxDatagram>,
    tx: Sender<RxDatagram>,

    /// Bound sockets per registered endpoint, used for sending so replies
    /// route back to the right source address.
    sockets: HashMap<SocketAddr, UdpSocket>,
    receivers: HashMap<SocketAddr, SharedReceiver>,

    timer_queue: BinaryHeap<Reverse<(Instant, TimerId)>>,
    timer_tasks: HashMap<TimerId, TaskFn<Self>>,
    next_timer_id: TimerId,

    running: bool,
}

impl UdpTransport {
    /// Creates a live transport over the given cluster configuration.
    pub fn new(config: ClusterConfig<SocketAddr>) -> Self {
        let (tx, rx) = unbounded();
        UdpTransport {
            config,
            rx,
            tx,
            sockets: HashMap::new(),
            receivers: HashMap::new(),
            timer_queue: BinaryHeap::new(),
            timer_tasks: HashMap::new(),
            next_timer_id: 0,
            running: false,
        }
    }

    /// Asks the running event loop to return after the current event.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Runs the event loop: drains received datagrams and fires due timers
    /// until `stop()` is called from within a handler or task.
    pub fn run(&mut self) -> Result<(), WinterholdError> {
        self.running = true;
        while self.running {
            self.fire_due_timers();
            let wait = self
                .next_deadline()
                .map(|d| d.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::from_millis(100));
            match self.rx.recv_timeout(wait) {
                Ok((local, remote, payload)) => {
                    let Some(receiver) = self.receivers.get(&local) else {
                        pf_warn!("datagram for unregistered {}", local);
                        continue;
                    };
                    let receiver = receiver.clone();
                    let mut on_message = receiver.borrow_mut();
                    (&mut *on_message)(self, remote, &payload);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timer_queue.peek().map(|Reverse((d, _))| *d)
    }

    fn fire_due_timers(&mut self) {
        while let Some(Reverse((deadline, id))) = self.timer_queue.peek().copied()
        {
            if deadline > Instant::now() {
                break;
            }
            self.timer_queue.pop();
            if let Some(task) = self.timer_tasks.remove(&id) {
                task(self);
            }
        }
    }

    fn sender_socket(&self, sender: &SocketAddr) -> &UdpSocket {
        match self.sockets.get(sender) {
            Some(socket) => socket,
            None => panic!("sending from unregistered endpoint {}", sender),
        }
    }

    fn bind_endpoint(&mut self, address: SocketAddr) -> UdpSocket {
        let socket = UdpSocket::bind(address)
            .unwrap_or_else(|e| panic!("binding {} failed: {}", address, e));
        let rx_socket = socket
            .try_clone()
            .unwrap_or_else(|e| panic!("cloning socket failed: {}", e));
        let tx = self.tx.clone();
        thread::spawn(move || {
            let mut buffer = [0u8; UdpTransport::BUFFER_SIZE];
            while let Ok((length, remote)) = rx_socket.recv_from(&mut buffer)
            {
                // only enqueue toward the logical event stream; handlers
                // never run on this thread
                if tx.send((address, remote, buffer[..length].to_vec()))
                    .is_err()
                {
                    break;
                }
            }
        });
        socket
    }
}

impl Transport for UdpTransport {
    type Address = SocketAddr;

    // conservatively below a 1500-byte MTU minus IP and UDP headers
    const BUFFER_SIZE: usize = 1460;

    fn config(&self) -> &ClusterConfig<SocketAddr> {
        &self.config
    }

    fn register_receiver(
        &mut self,
        address: SocketAddr,
        on_message: ReceiverFn<Self>,
    ) {
        let socket = self.bind_endpoint(address);
        self.sockets.insert(address, socket);
        self.receivers
            .insert(address, Rc::new(RefCell::new(on_message)));
    }

    fn register_multicast_receiver(&mut self, on_message: ReceiverFn<Self>) {
        // loopback-grade stand-in: bind the multicast address directly
        let Some(address) = self.config.multicast else {
            panic!("no multicast address configured");
        };
        self.register_receiver(address, on_message);
    }

    fn send_message(
        &mut self,
        sender: &SocketAddr,
        dest: &SocketAddr,
        write: impl FnOnce(&mut [u8]) -> usize,
    ) {
        let mut buffer = [0u8; Self::BUFFER_SIZE];
        let length = write(&mut buffer);
        assert!(length <= Self::BUFFER_SIZE);
        // best-effort: drop on socket error like the network would
        if let Err(e) = self.sender_socket(sender).send_to(&buffer[..length], dest)
        {
            pf_warn!("sending {} -> {} failed: {}", sender, dest, e);
        }
    }

    fn send_message_to_all(
        &mut self,
        sender: &SocketAddr,
        write: impl FnOnce(&mut [u8]) -> usize,
    ) {
        // serialize once, send the same buffer per destination
        let mut buffer = [0u8; Self::BUFFER_SIZE];
        let length = write(&mut buffer);
        assert!(length <= Self::BUFFER_SIZE);
        let socket = self.sender_socket(sender);
        for dest in &self.config.replicas {
            if dest == sender {
                continue;
            }
            if let Err(e) = socket.send_to(&buffer[..length], dest) {
                pf_warn!("sending {} -> {} failed: {}", sender, dest, e);
            }
        }
    }

    fn schedule(&mut self, delay: Duration, task: TaskFn<Self>) -> TimerId {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        self.timer_tasks.insert(id, task);
        self.timer_queue
            .push(Reverse((Instant::now() + delay, id)));
        id
    }

    fn cancel(&mut self, timer: TimerId) {
        self.timer_tasks.remove(&timer);
    }

    fn allocate_address(&mut self) -> SocketAddr {
        // bind an ephemeral port to find a free one, then release it
        let probe = UdpSocket::bind("127.0.0.1:0")
            .unwrap_or_else(|e| panic!("probing free port failed: {}", e));
        probe
            .local_addr()
            .unwrap_or_else(|e| panic!("reading probe address failed: {}", e))
    }
}
