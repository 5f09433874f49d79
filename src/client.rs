use std::sync::mpsc::sync_channel;

use futures::sync::mpsc::UnboundedSender;

use crate::codec;
use crate::error::{Error, Result};
use crate::network::Rpc;

/// A call-site handle bound to one named endpoint on the fabric.
///
/// Created by [`Network::create_end`](crate::Network::create_end); lives
/// until the fabric is torn down and is never reused across fabrics.
#[derive(Clone)]
pub struct ClientEnd {
    // this end-point's name
    pub(crate) end_name: String,
    // copy of Network.sender
    pub(crate) sender: UnboundedSender<Rpc>,
}

impl ClientEnd {
    /// Sends an RPC and waits for the reply.
    ///
    /// The fabric simulates a lossy network, in which servers may be
    /// unreachable, and in which requests and replies may be lost. A
    /// returned error can be caused by a dead server, a live server that
    /// can't be reached, a lost request, or a lost reply; the caller
    /// cannot tell which.
    ///
    /// `call` is guaranteed to return (perhaps after a delay), except if
    /// the handler on the server side never does, so there is no need to
    /// build timeouts around it.
    ///
    /// The argument and reply types must match the types declared at the
    /// service registration site; a mismatch on the reply is fatal.
    pub fn call<Req, Rsp>(&self, fq_name: &'static str, args: &Req) -> Result<Rsp>
    where
        Req: codec::Message,
        Rsp: codec::Message + Default,
    {
        let mut req = vec![];
        if let Err(e) = codec::encode(args, &mut req) {
            panic!("{}.call({}): encode args: {}", self.end_name, fq_name, e);
        }

        let (tx, rx) = sync_channel(1);
        let rpc = Rpc {
            end_name: self.end_name.clone(),
            fq_name,
            req,
            resp: tx,
        };

        // Sends the request and waits for the reply.
        self.sender.unbounded_send(rpc).map_err(|_| Error::Stopped)?;
        match rx.recv() {
            Ok(Ok(reply)) => match codec::decode(&reply) {
                Ok(rsp) => Ok(rsp),
                Err(e) => panic!("{}.call({}): decode reply: {}", self.end_name, fq_name, e),
            },
            Ok(Err(e)) => Err(e),
            Err(e) => Err(Error::Recv(e)),
        }
    }
}
