//! Serialization of argument and reply records into opaque byte blobs.
//!
//! A pure library: nothing in here knows about the fabric. Any
//! [`Message`] round-trips through `encode`/`decode` unchanged.

use bytes::BufMut;

pub use prost::{DecodeError, EncodeError, Message};

pub fn encode<M, B>(message: &M, buf: &mut B) -> Result<(), EncodeError>
where
    M: Message,
    B: BufMut,
{
    message.encode(buf)
}

pub fn decode<M>(buf: &[u8]) -> Result<M, DecodeError>
where
    M: Message + Default,
{
    M::decode(buf)
}
