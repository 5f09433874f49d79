use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use futures::sync::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::sync::oneshot;
use futures::{Async, Future, Poll, Stream};
use futures_cpupool::CpuPool;
use futures_timer::Delay;
use hashbrown::HashMap;
use rand::Rng;

use crate::client::ClientEnd;
use crate::error::{Error, Result};
use crate::server::Server;

/// How often an in-flight call re-checks that its server is still the
/// incarnation it was dispatched to.
const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) struct Rpc {
    pub(crate) end_name: String,
    pub(crate) fq_name: &'static str,
    pub(crate) req: Vec<u8>,
    pub(crate) resp: SyncSender<Result<Vec<u8>>>,
}

impl fmt::Debug for Rpc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Rpc")
            .field("end_name", &self.end_name)
            .field("fq_name", &self.fq_name)
            .finish()
    }
}

/// The topology snapshot a request is processed against, read atomically
/// at ingress. The liveness checks later in the request's life compare
/// against this snapshot, not against fresher state.
#[derive(Debug)]
struct EndInfo {
    enabled: bool,
    server_name: Option<String>,
    server: Option<Server>,
    reliable: bool,
    long_reordering: bool,
}

struct Endpoints {
    // ends, by name
    ends: HashMap<String, ClientEnd>,
    // by end name
    enabled: HashMap<String, bool>,
    // servers, by name; None marks a deleted server
    servers: HashMap<String, Option<Server>>,
    // end_name -> server_name
    connections: HashMap<String, Option<String>>,
}

struct Core {
    reliable: AtomicBool,
    // pause a long time on send on disabled connection
    long_delays: AtomicBool,
    // sometimes delay replies a long time
    long_reordering: AtomicBool,
    endpoints: Mutex<Endpoints>,
    // total RPC count, for statistics
    count: AtomicUsize,
    // total bytes routed, for statistics
    bytes: AtomicU64,
    sender: UnboundedSender<Rpc>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    pool: CpuPool,
}

/// The simulated fabric: a registry of endpoints, servers, connections
/// and fault-injection flags, plus the dispatcher that routes every
/// request through delays, drops and reorderings before it reaches a
/// [`Server`].
#[derive(Clone)]
pub struct Network {
    core: Arc<Core>,
}

impl Network {
    pub fn new() -> Network {
        let (rn, incoming) = Network::create();
        rn.start(incoming);
        rn
    }

    pub(crate) fn create() -> (Network, UnboundedReceiver<Rpc>) {
        let (sender, incoming) = unbounded();
        let net = Network {
            core: Arc::new(Core {
                reliable: AtomicBool::new(true),
                long_delays: AtomicBool::new(false),
                long_reordering: AtomicBool::new(false),
                endpoints: Mutex::new(Endpoints {
                    ends: HashMap::new(),
                    enabled: HashMap::new(),
                    servers: HashMap::new(),
                    connections: HashMap::new(),
                }),
                count: AtomicUsize::new(0),
                bytes: AtomicU64::new(0),
                sender,
                shutdown: Mutex::new(None),
                pool: CpuPool::new_num_cpus(),
            }),
        };

        (net, incoming)
    }

    fn start(&self, incoming: UnboundedReceiver<Rpc>) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.core.shutdown.lock().unwrap() = Some(shutdown_tx);

        let net = self.clone();
        let acceptor = incoming.for_each(move |rpc| {
            net.core.count.fetch_add(1, Ordering::SeqCst);
            net.core
                .bytes
                .fetch_add(rpc.req.len() as u64, Ordering::SeqCst);
            let fut = net.process_rpc(rpc);
            net.core.pool.spawn(fut).forget();
            Ok(())
        });
        // the acceptor drains ingress until cleanup() fires the shutdown
        // signal; handler futures already spawned are left to finish on
        // their own
        self.core
            .pool
            .spawn(acceptor.select2(shutdown_rx).then(|_| Ok::<_, ()>(())))
            .forget();
    }

    /// Registers a new endpoint. Endpoints start disabled and
    /// disconnected. Registering a name twice is fatal.
    pub fn create_end(&self, end_name: String) -> ClientEnd {
        let mut eps = self.core.endpoints.lock().unwrap();
        if eps.ends.contains_key(&end_name) {
            panic!("create_end: {} already exists", end_name);
        }
        let end = ClientEnd {
            end_name: end_name.clone(),
            sender: self.core.sender.clone(),
        };
        eps.ends.insert(end_name.clone(), end.clone());
        eps.enabled.insert(end_name.clone(), false);
        eps.connections.insert(end_name, None);
        end
    }

    /// Binds (or rebinds) a server to its name. Calls in flight against a
    /// previous holder of the name have their replies suppressed.
    pub fn add_server(&self, server: Server) {
        let mut eps = self.core.endpoints.lock().unwrap();
        eps.servers.insert(server.name().to_owned(), Some(server));
    }

    /// Unbinds the named server. Calls in flight against it have their
    /// replies suppressed.
    pub fn delete_server(&self, name: String) {
        let mut eps = self.core.endpoints.lock().unwrap();
        eps.servers.insert(name, None);
    }

    /// Connects an endpoint to a server name. Reconnection is allowed;
    /// the last write wins.
    pub fn connect(&self, end_name: String, server_name: String) {
        let mut eps = self.core.endpoints.lock().unwrap();
        eps.connections.insert(end_name, Some(server_name));
    }

    /// Enables or disables an endpoint.
    pub fn enable(&self, end_name: String, enabled: bool) {
        debug!(
            "client {} is {}",
            end_name,
            if enabled { "enabled" } else { "disabled" }
        );
        let mut eps = self.core.endpoints.lock().unwrap();
        eps.enabled.insert(end_name, enabled);
    }

    pub fn set_reliable(&self, yes: bool) {
        self.core.reliable.store(yes, Ordering::SeqCst);
    }

    pub fn set_long_reordering(&self, yes: bool) {
        self.core.long_reordering.store(yes, Ordering::SeqCst);
    }

    pub fn set_long_delays(&self, yes: bool) {
        self.core.long_delays.store(yes, Ordering::SeqCst);
    }

    /// The received-call count of the named server.
    pub fn count(&self, server_name: &str) -> usize {
        let eps = self.core.endpoints.lock().unwrap();
        eps.servers[server_name].as_ref().unwrap().count()
    }

    /// The number of calls that reached ingress.
    pub fn total_count(&self) -> usize {
        self.core.count.load(Ordering::SeqCst)
    }

    /// Bytes routed so far: encoded arguments at ingress, plus encoded
    /// replies at delivery. Dropped replies are not counted.
    pub fn total_bytes(&self) -> u64 {
        self.core.bytes.load(Ordering::SeqCst)
    }

    /// Tears the fabric down. Later submissions fail with
    /// [`Error::Stopped`]; requests already in flight are not joined.
    pub fn cleanup(&self) {
        if let Some(shutdown) = self.core.shutdown.lock().unwrap().take() {
            let _ = shutdown.send(());
        }
    }

    fn end_info(&self, end_name: &str) -> EndInfo {
        let eps = self.core.endpoints.lock().unwrap();
        let server_name = eps.connections[end_name].clone();
        let mut server = None;
        if let Some(ref server_name) = server_name {
            server = eps.servers.get(server_name).cloned().unwrap_or(None);
        }
        EndInfo {
            enabled: eps.enabled[end_name],
            server_name,
            server,
            reliable: self.core.reliable.load(Ordering::SeqCst),
            long_reordering: self.core.long_reordering.load(Ordering::SeqCst),
        }
    }

    fn is_server_dead(&self, end_name: &str, server_name: &str, server_id: usize) -> bool {
        let eps = self.core.endpoints.lock().unwrap();
        !eps.enabled[end_name]
            || eps.servers.get(server_name).map_or(true, |o| {
                o.as_ref().map(|s| s.id() != server_id).unwrap_or(true)
            })
    }

    fn process_rpc(&self, rpc: Rpc) -> ProcessRpc {
        let mut random = rand::thread_rng();
        let network = self.clone();
        let end_info = self.end_info(&rpc.end_name);
        debug!("{:?} process with {:?}", rpc, end_info);
        let EndInfo {
            enabled,
            server_name,
            server,
            reliable,
            long_reordering,
        } = end_info;

        let state = match (enabled, server_name, server) {
            (true, Some(server_name), Some(server)) => {
                let short_delay = if !reliable {
                    // short delay
                    let ms = random.gen::<u64>() % 27;
                    Some(Delay::new(Duration::from_millis(ms)))
                } else {
                    None
                };

                if !reliable && random.gen::<u64>() % 1000 < 100 {
                    // drop the request, return as if timeout
                    ProcessState::Timeout {
                        delay: short_delay.unwrap(),
                    }
                } else {
                    // decide the fate of the reply up front, from the same
                    // snapshot the request was admitted under
                    let drop_reply = !reliable && random.gen::<u64>() % 1000 < 100;
                    let long_reordering = if long_reordering && random.gen_range(0, 900) < 600 {
                        // delay the response for a while
                        let upper_bound: u64 = 1 + random.gen_range(0, 2000);
                        Some(200 + random.gen_range(0, upper_bound))
                    } else {
                        None
                    };
                    ProcessState::Dispatch {
                        delay: short_delay,
                        server,
                        server_name,
                        drop_reply,
                        long_reordering,
                    }
                }
            }
            _ => {
                // simulate no reply and eventual timeout
                let ms = if self.core.long_delays.load(Ordering::SeqCst) {
                    // let leader-election tests check that a peer doesn't
                    // wait synchronously on dead destinations
                    random.gen::<u64>() % 7000
                } else {
                    // keep adversarial tests that sweep many dead
                    // destinations fast
                    random.gen::<u64>() % 100
                };
                debug!("{:?} delay {}ms then timeout", rpc, ms);
                ProcessState::Timeout {
                    delay: Delay::new(Duration::from_millis(ms)),
                }
            }
        };

        ProcessRpc {
            state: Some(state),
            rpc,
            network,
        }
    }
}

/// One request's trip through the fabric, from admission to reply
/// delivery, as a polled state machine.
struct ProcessRpc {
    state: Option<ProcessState>,

    rpc: Rpc,
    network: Network,
}

impl fmt::Debug for ProcessRpc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ProcessRpc")
            .field("rpc", &self.rpc)
            .field("state", &self.state)
            .finish()
    }
}

enum ProcessState {
    /// No reply will ever come; deliver a failure once the delay fires.
    Timeout {
        delay: Delay,
    },
    /// Run the pre-dispatch delay, then hand the request to the server.
    Dispatch {
        delay: Option<Delay>,
        server: Server,
        server_name: String,
        drop_reply: bool,
        long_reordering: Option<u64>,
    },
    /// The handler is running on its own thread. Race its completion
    /// against a periodic check that the server is still the same
    /// incarnation the request was dispatched to.
    Wait {
        rx: oneshot::Receiver<Vec<u8>>,
        tick: Delay,
        server: Server,
        server_name: String,
        drop_reply: bool,
        long_reordering: Option<u64>,
    },
    /// Deliver a held-back reply once the reordering delay fires.
    Reordering {
        delay: Delay,
        resp: Option<Vec<u8>>,
    },
}

impl fmt::Debug for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ProcessState::Timeout { .. } => write!(f, "ProcessState::Timeout"),
            ProcessState::Dispatch {
                ref delay,
                drop_reply,
                long_reordering,
                ..
            } => f
                .debug_struct("ProcessState::Dispatch")
                .field("delay", &delay.is_some())
                .field("drop_reply", &drop_reply)
                .field("long_reordering", &long_reordering)
                .finish(),
            ProcessState::Wait {
                drop_reply,
                long_reordering,
                ..
            } => f
                .debug_struct("ProcessState::Wait")
                .field("drop_reply", &drop_reply)
                .field("long_reordering", &long_reordering)
                .finish(),
            ProcessState::Reordering { .. } => write!(f, "ProcessState::Reordering"),
        }
    }
}

impl Future for ProcessRpc {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        loop {
            let mut next = None;
            debug!("polling {:?}", self);
            match *self
                .state
                .as_mut()
                .expect("cannot poll ProcessRpc after finish")
            {
                ProcessState::Timeout { ref mut delay } => {
                    try_ready!(delay.poll().map_err(|_| ()));
                    let _ = self.rpc.resp.send(Err(Error::Timeout));
                }
                ProcessState::Dispatch {
                    ref mut delay,
                    ref server,
                    ref server_name,
                    drop_reply,
                    long_reordering,
                } => {
                    if let Some(ref mut delay) = *delay {
                        try_ready!(delay.poll().map_err(|_| ()));
                    }
                    // the delay has elapsed, take it out to prevent
                    // polling it twice
                    delay.take();

                    // run the handler on its own thread so we can
                    // periodically check whether the server has been
                    // killed and the RPC should get a failure reply
                    let (tx, rx) = oneshot::channel();
                    let server_ = server.clone();
                    let fq_name = self.rpc.fq_name;
                    let req = mem::replace(&mut self.rpc.req, vec![]);
                    let _ = thread::spawn(move || {
                        let mut rsp = vec![];
                        server_.dispatch(fq_name, &req, &mut rsp);
                        // the receiver is gone if the call was abandoned;
                        // the reply is discarded either way
                        let _ = tx.send(rsp);
                    });
                    next = Some(ProcessState::Wait {
                        rx,
                        tick: Delay::new(LIVENESS_CHECK_INTERVAL),
                        server: server.clone(),
                        server_name: server_name.clone(),
                        drop_reply,
                        long_reordering,
                    });
                }
                ProcessState::Wait {
                    ref mut rx,
                    ref mut tick,
                    ref server,
                    ref server_name,
                    drop_reply,
                    long_reordering,
                } => {
                    match rx.poll() {
                        Ok(Async::Ready(resp)) => {
                            // re-check even after a completed handler: it
                            // may have finished just as the server was
                            // replaced, and a client must not see a
                            // positive reply from a superseded server
                            if self.network.is_server_dead(
                                &self.rpc.end_name,
                                server_name,
                                server.id(),
                            ) {
                                let _ = self.rpc.resp.send(Err(Error::Timeout));
                            } else if drop_reply {
                                // drop the reply, return as if timeout
                                let _ = self.rpc.resp.send(Err(Error::Timeout));
                            } else if let Some(ms) = long_reordering {
                                debug!("{:?} next long reordering {}ms", self.rpc, ms);
                                next = Some(ProcessState::Reordering {
                                    delay: Delay::new(Duration::from_millis(ms)),
                                    resp: Some(resp),
                                });
                            } else {
                                self.network
                                    .core
                                    .bytes
                                    .fetch_add(resp.len() as u64, Ordering::SeqCst);
                                let _ = self.rpc.resp.send(Ok(resp));
                            }
                        }
                        Ok(Async::NotReady) => {
                            try_ready!(tick.poll().map_err(|_| ()));
                            if self.network.is_server_dead(
                                &self.rpc.end_name,
                                server_name,
                                server.id(),
                            ) {
                                // the server was killed while we were
                                // waiting; fail the call now and leave the
                                // dispatch thread to finish into a dropped
                                // receiver
                                let _ = self.rpc.resp.send(Err(Error::Timeout));
                            } else {
                                *tick = Delay::new(LIVENESS_CHECK_INTERVAL);
                                continue;
                            }
                        }
                        Err(_) => {
                            // the dispatch thread died without publishing
                            // a reply; the caller sees a lost reply
                            let _ = self.rpc.resp.send(Err(Error::Timeout));
                        }
                    }
                }
                ProcessState::Reordering {
                    ref mut delay,
                    ref mut resp,
                } => {
                    try_ready!(delay.poll().map_err(|_| ()));
                    let resp = resp.take().unwrap();
                    self.network
                        .core
                        .bytes
                        .fetch_add(resp.len() as u64, Ordering::SeqCst);
                    let _ = self.rpc.resp.send(Ok(resp));
                }
            }
            if let Some(next) = next {
                self.state = Some(next);
            } else {
                self.state.take();
                return Ok(Async::Ready(()));
            }
        }
    }
}
