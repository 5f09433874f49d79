use std::sync::mpsc::RecvError;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Delivery failures observed by a caller.
///
/// The cause is deliberately indistinguishable: a lost request, a lost
/// reply, a disabled endpoint and a dead or superseded server all look
/// the same from the call site. Protocols must treat any of these as
/// "don't know".
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("request or reply was lost")]
    Timeout,
    #[error("reply channel closed: {0}")]
    Recv(#[from] RecvError),
    #[error("network has been shut down")]
    Stopped,
}
