//! # Encoding Module
//!
//! This module defines the codec contract the node layer consumes and the
//! concrete codecs shipped with the crate:
//!
//! - **Encoder contract**: typed values read and written at the page cursor,
//!   with bound-size reporting for the inline/out-of-line layout decision
//! - **Versioned providers**: codec sets are selected by the 4-bit encoders
//!   version persisted in each node's flag byte; unknown versions fail
//! - **Fixed-width intra-page codecs**: page positions (u32) and page
//!   indexes (u64) used for out-of-line offsets, child pointers and markers
//! - **Key/value codecs**: fixed u32/u64 and varint-prefixed byte strings
//!
//! ## Inline vs Out-of-Line
//!
//! A codec reporting `is_of_bound_size()` with `maximum_size()` at or under
//! the configured inline threshold stores its bytes directly in the record
//! slot; every other codec's bytes live in the page's data region behind a
//! fixed-width position. The decision is made once per session from the
//! instantiated codecs, never per record.

pub mod codecs;
pub mod varint;

use eyre::Result;

use crate::storage::{PageRead, PageWrite};

pub use codecs::{BytesCodec, PageIndexCodec, PagePositionCodec, U32Codec, U64Codec};

/// A typed codec reading and writing values at the current page cursor.
pub trait Encoder {
    type Value;

    /// True if every encoding of every value fits in `maximum_size()` bytes.
    fn is_of_bound_size(&self) -> bool;

    /// Maximum encoded size. Unbound codecs have no meaningful maximum and
    /// must never be asked for one in layout arithmetic.
    fn maximum_size(&self) -> usize;

    fn encode<P: PageWrite>(&self, value: &Self::Value, page: &mut P) -> Result<()>;

    fn decode<P: PageRead>(&self, page: &mut P) -> Result<Self::Value>;

    /// Size in bytes of the encoding starting at the cursor, determined
    /// without materializing the value. The cursor position afterwards is
    /// unspecified; callers reposition.
    fn exact_size_in_stream<P: PageRead>(&self, page: &mut P) -> Result<usize>;
}

/// Yields codec instances keyed by the on-page encoders version.
pub trait EncoderProvider {
    type Encoder: Encoder;

    /// Fails for versions this provider does not know.
    fn encoder(&self, version: u8) -> Result<Self::Encoder>;
}
