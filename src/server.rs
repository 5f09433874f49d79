use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use hashbrown::HashMap;

static ID_ALLOC: AtomicUsize = AtomicUsize::new(0);

/// A registered method: takes the encoded argument bytes and writes the
/// encoded reply into the output buffer.
pub type RpcHandler = dyn Fn(&[u8], &mut Vec<u8>) + Send + Sync + 'static;

/// Assembles the method table of one [`Service`]. Normally driven by the
/// [`service!`](crate::service) macro rather than by hand.
pub struct ServiceBuilder {
    name: &'static str,
    methods: HashMap<&'static str, Box<RpcHandler>>,
}

impl ServiceBuilder {
    pub fn new(name: &'static str) -> ServiceBuilder {
        ServiceBuilder {
            name,
            methods: HashMap::new(),
        }
    }

    /// Registers a method handler. Last write wins.
    pub fn add_method(&mut self, method_name: &'static str, handler: Box<RpcHandler>) {
        self.methods.insert(method_name, handler);
    }

    pub fn build(self) -> Service {
        Service {
            core: Arc::new(ServiceCore {
                name: self.name,
                methods: self.methods,
            }),
        }
    }
}

struct ServiceCore {
    name: &'static str,
    methods: HashMap<&'static str, Box<RpcHandler>>,
}

/// A named set of RPC methods backed by one handler object. Immutable
/// after construction.
#[derive(Clone)]
pub struct Service {
    core: Arc<ServiceCore>,
}

impl Service {
    pub fn name(&self) -> &'static str {
        self.core.name
    }

    fn dispatch(&self, method_name: &str, req: &[u8], rsp: &mut Vec<u8>) {
        if let Some(handler) = self.core.methods.get(method_name) {
            handler(req, rsp);
        } else {
            // a misrouted method spec is a test-harness bug, so be loud
            let choices: Vec<_> = self.core.methods.keys().collect();
            panic!(
                "unknown method {} in service {}; expecting one of {:?}",
                method_name, self.core.name, choices
            );
        }
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Service").field("name", &self.core.name).finish()
    }
}

struct ServerCore {
    name: String,
    id: usize,

    services: Mutex<HashMap<&'static str, Service>>,
    count: AtomicUsize,
}

/// A named bundle of services reachable through the fabric.
///
/// Cloning shares the same underlying server; the fabric tells one
/// incarnation from a later one bearing the same name by its process-wide
/// unique id.
#[derive(Clone)]
pub struct Server {
    core: Arc<ServerCore>,
}

impl Server {
    pub fn new(name: String) -> Server {
        Server {
            core: Arc::new(ServerCore {
                name,
                id: ID_ALLOC.fetch_add(1, Ordering::Relaxed),
                services: Mutex::new(HashMap::new()),
                count: AtomicUsize::new(0),
            }),
        }
    }

    /// Registers a service under its name. Last write wins.
    pub fn add_service(&self, svc: Service) {
        let mut services = self.core.services.lock().unwrap();
        services.insert(svc.name(), svc);
    }

    /// The number of RPCs dispatched into this server, including calls
    /// whose replies were later suppressed.
    pub fn count(&self) -> usize {
        self.core.count.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub(crate) fn id(&self) -> usize {
        self.core.id
    }

    pub(crate) fn dispatch(&self, fq_name: &str, req: &[u8], rsp: &mut Vec<u8>) {
        self.core.count.fetch_add(1, Ordering::SeqCst);

        // split "counter.add" into service and method
        let dot = match fq_name.rfind('.') {
            Some(dot) => dot,
            None => panic!("method spec {:?} has no service qualifier", fq_name),
        };
        let service_name = &fq_name[..dot];
        let method_name = &fq_name[dot + 1..];

        // release the lock before invoking: a slow handler must not block
        // the counter or sibling services
        let service = {
            let services = self.core.services.lock().unwrap();
            services.get(service_name).cloned()
        };

        match service {
            Some(service) => service.dispatch(method_name, req, rsp),
            None => {
                let services = self.core.services.lock().unwrap();
                let choices: Vec<_> = services.keys().collect();
                panic!(
                    "unknown service {} in {}; expecting one of {:?}",
                    service_name, fq_name, choices
                );
            }
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.core.name)
            .field("id", &self.core.id)
            .finish()
    }
}
