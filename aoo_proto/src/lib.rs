#![no_std]
//! Message model for streaming audio over unreliable, packetized transports.
//!
//! This crate defines the typed messages exchanged between audio endpoints, without
//! committing to any particular transport or wire encoding.
//!
//! ## Roles
//!
//! Each stream has two ends:
//!
//! - **Sources** produce audio and push it to any number of registered sinks.
//! - **Sinks** receive audio from any number of sources and mix it into their output.
//!
//! Both ends are identified by an [`Id`], unique among the instances sharing a transport
//! endpoint (e.g. a UDP socket address).
//!
//! ## Protocol model
//!
//! Three messages exist, see the [`message`] module:
//!
//! - **Format** messages tell a sink how to interpret the data of a source stream.
//! - **Data** messages carry one fragment of one audio block.
//! - **Format requests** ask a source to retransmit its current format.
//!
//! ## Salts
//!
//! Every format and data message carries a [`Salt`]. Sources advance it whenever their
//! format (or stream identity) changes. Sinks only accept data whose salt matches the
//! format they currently hold for that source, so blocks still in flight after a
//! reconfiguration are discarded rather than misinterpreted.
//!
//! ## Loss and reordering
//!
//! The transport is assumed to be lossy and unordered. Blocks are numbered with a
//! monotonically increasing sequence number, and may be split into at most
//! [`MAX_FRAGMENTS`] fragments. Receivers reassemble, reorder, and conceal loss on
//! their own.
//!
//! The types in this crate implement `serde`'s `Serialize` and `Deserialize` traits, for
//! the user to conveniently plug into `serde` backends.

pub mod format;
pub mod message;

use serde::{Deserialize, Serialize};

/// All audio is processed as 32-bit floats, regardless of the wire [`format::SampleType`].
pub type Sample = f32;

pub const SILENCE: Sample = 0.;

/// Hard limit on the number of fragments a single block may be split into.
pub const MAX_FRAGMENTS: u32 = 32;

/// Identifies a source or a sink among those sharing a transport endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id(pub u32);

/// Format epoch of a source stream.
///
/// Wraps around on overflow, only (in)equality is meaningful.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Salt(pub u32);

impl Salt {
    /// Returns the following salt.
    #[inline(always)]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// Addressing of a message's recipient within an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Recipient {
    /// Every instance behind the endpoint.
    All,
    /// One specific instance.
    One(Id),
}

impl Recipient {
    /// Returns whether an instance with the given `id` should handle the message.
    #[inline(always)]
    pub fn matches(self, id: Id) -> bool {
        match self {
            Self::All => true,
            Self::One(target) => target == id,
        }
    }
}

impl From<Id> for Recipient {
    #[inline(always)]
    fn from(id: Id) -> Self {
        Self::One(id)
    }
}
