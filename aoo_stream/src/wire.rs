//! Wire representation of [`Message`]s, using [`postcard`].

use crate::{Error, Result};
use aoo_proto::{MAX_FRAGMENTS, format::Format, message::Message};

/// Upper bound on the encoded size of a data message, excluding its payload.
pub const DATA_HEADER_RESERVE: usize = 64;

/// Default maximum datagram size, keeping clear of fragmentation on Ethernet links.
pub const DEFAULT_PACKET_SIZE: usize = 1452;

/// Encodes `message` at the start of `buf`, returns the encoded bytes.
#[inline(always)]
pub fn encode<'b>(message: &Message<'_>, buf: &'b mut [u8]) -> Result<&'b mut [u8]> {
    Ok(postcard::to_slice(message, buf)?)
}

/// Decodes a message, borrowing its payload from `bytes`.
#[inline(always)]
pub fn decode(bytes: &[u8]) -> Result<Message<'_>> {
    Ok(postcard::from_bytes(bytes)?)
}

/// Maximum number of payload bytes per data message.
#[inline(always)]
pub fn max_payload(packet_size: usize) -> Result<usize> {
    packet_size
        .checked_sub(DATA_HEADER_RESERVE)
        .filter(|&n| n > 0)
        .ok_or(Error::InvalidSettings("packet size too small"))
}

/// Returns how many fragments each block of `format` is split into.
pub fn fragment_count(format: &Format, packet_size: usize) -> Result<usize> {
    let needed = format.block_bytes().div_ceil(max_payload(packet_size)?).max(1);

    if needed > MAX_FRAGMENTS as usize {
        return Err(Error::TooManyFragments { needed });
    }

    Ok(needed)
}

/// Splits an encoded block into fragments, yielding `(index, bytes)` pairs.
///
/// All fragments but the last have the same size.
pub fn fragments(bytes: &[u8], max_payload: usize) -> impl ExactSizeIterator<Item = (u32, &[u8])> {
    bytes.chunks(max_payload.max(1)).enumerate().map(|(i, c)| (i as u32, c))
}
