#![allow(clippy::new_without_default)]
#![allow(clippy::if_same_then_else)]

//! A simulated RPC fabric for exercising distributed protocols under
//! adversarial network conditions, entirely in process.
//!
//! Callers hold a [`ClientEnd`] and make ordinary call-style RPCs; the
//! [`Network`] routes, serializes, delays, reorders and drops those calls
//! according to per-endpoint connectivity and global reliability flags,
//! then dispatches them into handlers registered on a [`Server`]. The
//! handlers never learn they are running inside a simulation, and no
//! operating-system networking is involved.
//!
//! Endpoints can be disabled to simulate partitions, and servers can be
//! deleted or replaced out from under their in-flight calls; a call that
//! comes back successful is guaranteed to have executed on a server that
//! stayed bound to its name for the whole call.
//!
//! # Example
//!
//! ```
//! use simrpc::{Network, Server};
//!
//! #[derive(Clone, PartialEq, prost::Message)]
//! pub struct LenArgs {
//!     #[prost(string, tag = "1")]
//!     pub s: String,
//! }
//!
//! #[derive(Clone, PartialEq, prost::Message)]
//! pub struct LenReply {
//!     #[prost(uint64, tag = "1")]
//!     pub n: u64,
//! }
//!
//! simrpc::service! {
//!     service strlen {
//!         rpc len(LenArgs) returns LenReply;
//!     }
//! }
//!
//! #[derive(Clone)]
//! struct StrlenService;
//!
//! impl strlen::Service for StrlenService {
//!     fn len(&self, args: LenArgs) -> LenReply {
//!         LenReply { n: args.s.len() as u64 }
//!     }
//! }
//!
//! fn main() {
//!     let net = Network::new();
//!     let server = Server::new("server-0".to_owned());
//!     server.add_service(strlen::make_service(StrlenService));
//!     net.add_server(server);
//!
//!     let client = strlen::Client::new(net.create_end("client-0".to_owned()));
//!     net.connect("client-0".to_owned(), "server-0".to_owned());
//!     net.enable("client-0".to_owned(), true);
//!
//!     let reply = client.len(&LenArgs { s: "abc".to_owned() }).unwrap();
//!     assert_eq!(reply.n, 3);
//! }
//! ```

#[macro_use]
extern crate futures;
#[macro_use]
extern crate log;

#[macro_use]
mod macros;

pub mod codec;

mod client;
mod error;
mod network;
mod server;

pub use crate::client::ClientEnd;
pub use crate::error::{Error, Result};
pub use crate::network::Network;
pub use crate::server::{RpcHandler, Server, Service, ServiceBuilder};
