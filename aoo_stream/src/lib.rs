//! Implementation of the streaming model defined in the `aoo_proto` crate.
//!
//! This crate provides the machinery needed to stream audio between independent
//! endpoints over an unreliable transport:
//!
//! - [`Source`](source::Source): takes audio from an audio callback, resamples it to the
//!   stream format, and sends it in fragmented, numbered blocks to any number of sinks.
//! - [`Sink`](sink::Sink): reassembles blocks from any number of sources, conceals loss
//!   and reordering, compensates for clock drift, and mixes everything into its output.
//! - A concrete wire representation, using [`serde`] and [`postcard`], see [`wire`].
//! - A UDP transport, see [`udp`]. Any other transport can be used by implementing
//!   [`Endpoint`].
//!
//! ## Threading
//!
//! Both ends expect to be driven from (at least) two threads. The audio callback calls
//! `process`, and never blocks or allocates (on contention, a cycle is skipped instead).
//! Network and control threads call everything else.

pub mod block;
pub mod sink;
pub mod source;
pub mod udp;
pub mod wire;

pub use aoo_proto;
pub use aoo_utils;
pub use postcard;
pub use serde;

pub use aoo_proto::{Id, Sample};
pub use aoo_utils::time::TimeTag;

/// A peer address, doubling as the capability to send datagrams to it.
///
/// Two endpoints compare equal if they designate the same peer.
pub trait Endpoint: Clone + Eq + core::hash::Hash + Send + Sync + 'static {
    /// Sends one datagram to the peer.
    ///
    /// Delivery is not guaranteed, failures should be ignored (or logged).
    fn send(&self, bytes: &[u8]);
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("wire codec error: {0}")]
    Wire(#[from] postcard::Error),
    #[error("invalid settings: {0}")]
    InvalidSettings(&'static str),
    #[error(
        "blocks would be split in {needed} fragments, at most {} are supported",
        aoo_proto::MAX_FRAGMENTS
    )]
    TooManyFragments { needed: usize },
    #[error("not set up")]
    NotSetUp,
    #[error("clock estimator: {0}")]
    Dll(#[from] aoo_utils::dll::DllError),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Number of blocks needed to cover `duration` of audio, at least one.
pub(crate) fn blocks_for(duration: core::time::Duration, format: &aoo_proto::format::Format) -> usize {
    let frames = (duration.as_secs_f64() * format.sample_rate.get()).round() as usize;
    frames.div_ceil(format.block_size.get()).max(1)
}


#[cfg(test)]
mod tests {
    use super::*;
    use aoo_proto::format::Format;
    use core::time::Duration;

    #[test]
    fn block_count_rounds_up() {
        let format = Format::standard(); // 256 frames @ 48 kHz

        assert_eq!(blocks_for(Duration::ZERO, &format), 1);
        assert_eq!(blocks_for(Duration::from_millis(10), &format), 2);
        assert_eq!(blocks_for(Duration::from_micros(21_333), &format), 4);
        assert_eq!(blocks_for(Duration::from_millis(50), &format), 10);
    }
}
