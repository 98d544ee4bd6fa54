//! All protocol message types exchanged between endpoints.

use crate::{Id, Recipient, Salt, format::Format};
use serde::{Deserialize, Serialize};

// All messages live in one flat enum: nested enum discriminants are encoded individually,
// which would make every data packet a little larger.

/// Describes which part of which block a [`Message::Data`] carries.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct DataHeader {
    /// Block sequence number, starting at 0 and incremented by one for every block.
    pub sequence: u32,
    /// Sample rate of the source, as measured by its clock estimator.
    pub sample_rate: f64,
    /// Channel offset in the receiving sink's output at which to mix the block.
    pub channel: u32,
    /// Total size of the encoded block, in bytes.
    pub total_size: u32,
    /// Number of fragments the block was split into. At most [`MAX_FRAGMENTS`](crate::MAX_FRAGMENTS).
    pub frame_count: u32,
    /// Index of this fragment.
    pub frame: u32,
}

/// A message exchanged between sources and sinks.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum Message<'a> {
    /// Sent by a source to announce its stream format.
    Format {
        sink: Recipient,
        source: Id,
        salt: Salt,
        format: Format,
    },
    /// Sent by a source, carries one fragment of one encoded block.
    Data {
        sink: Recipient,
        source: Id,
        salt: Salt,
        header: DataHeader,
        #[serde(borrow)]
        bytes: &'a [u8],
    },
    /// Sent by a sink to ask a source to (re)send its format.
    FormatRequest { source: Recipient, sink: Id },
}

impl Message<'_> {
    /// Returns whether this message is addressed to sinks (as opposed to sources).
    #[inline(always)]
    pub fn is_for_sink(&self) -> bool {
        !matches!(self, Self::FormatRequest { .. })
    }
}
