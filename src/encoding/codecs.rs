//! # Shipped Codecs
//!
//! Concrete implementations of the [`Encoder`] contract:
//!
//! - [`PagePositionCodec`] / [`PageIndexCodec`]: the fixed-width intra-page
//!   codecs the node itself relies on for out-of-line offsets (4 bytes) and
//!   page pointers / marker block indexes (8 bytes)
//! - [`U32Codec`] / [`U64Codec`]: bound-size key/value codecs; at 4 and 8
//!   bytes they fall under the inline thresholds and are stored in-slot
//! - [`BytesCodec`]: unbound varint-length-prefixed byte strings, always
//!   stored out-of-line
//!
//! Each codec doubles as its own [`EncoderProvider`]: only version 0 exists,
//! and any other version is rejected, which is how an unreadable page from a
//! future codec generation surfaces.

use eyre::{ensure, Result};

use super::varint;
use super::{Encoder, EncoderProvider};
use crate::config::ENCODERS_VERSION;
use crate::storage::{PageRead, PageWrite};

fn check_version(version: u8) -> Result<()> {
    ensure!(
        version == ENCODERS_VERSION,
        "unsupported encoders version {} (current is {})",
        version,
        ENCODERS_VERSION
    );
    Ok(())
}

/// Fixed-width codec for intra-page byte offsets.
#[derive(Debug, Clone, Copy, Default)]
pub struct PagePositionCodec;

impl PagePositionCodec {
    pub fn for_version(version: u8) -> Result<Self> {
        check_version(version)?;
        Ok(Self)
    }
}

impl Encoder for PagePositionCodec {
    type Value = u32;

    fn is_of_bound_size(&self) -> bool {
        true
    }

    fn maximum_size(&self) -> usize {
        4
    }

    fn encode<P: PageWrite>(&self, value: &u32, page: &mut P) -> Result<()> {
        page.write_u32(*value)
    }

    fn decode<P: PageRead>(&self, page: &mut P) -> Result<u32> {
        page.read_u32()
    }

    fn exact_size_in_stream<P: PageRead>(&self, _page: &mut P) -> Result<usize> {
        Ok(4)
    }
}

/// Fixed-width codec for page indexes: child pointers, sibling links and
/// marker block indexes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageIndexCodec;

impl PageIndexCodec {
    pub fn for_version(version: u8) -> Result<Self> {
        check_version(version)?;
        Ok(Self)
    }
}

impl Encoder for PageIndexCodec {
    type Value = u64;

    fn is_of_bound_size(&self) -> bool {
        true
    }

    fn maximum_size(&self) -> usize {
        8
    }

    fn encode<P: PageWrite>(&self, value: &u64, page: &mut P) -> Result<()> {
        page.write_u64(*value)
    }

    fn decode<P: PageRead>(&self, page: &mut P) -> Result<u64> {
        page.read_u64()
    }

    fn exact_size_in_stream<P: PageRead>(&self, _page: &mut P) -> Result<usize> {
        Ok(8)
    }
}

/// Bound-size big-endian u32 codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct U32Codec;

impl Encoder for U32Codec {
    type Value = u32;

    fn is_of_bound_size(&self) -> bool {
        true
    }

    fn maximum_size(&self) -> usize {
        4
    }

    fn encode<P: PageWrite>(&self, value: &u32, page: &mut P) -> Result<()> {
        page.write_u32(*value)
    }

    fn decode<P: PageRead>(&self, page: &mut P) -> Result<u32> {
        page.read_u32()
    }

    fn exact_size_in_stream<P: PageRead>(&self, _page: &mut P) -> Result<usize> {
        Ok(4)
    }
}

impl EncoderProvider for U32Codec {
    type Encoder = U32Codec;

    fn encoder(&self, version: u8) -> Result<U32Codec> {
        check_version(version)?;
        Ok(U32Codec)
    }
}

/// Bound-size big-endian u64 codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct U64Codec;

impl Encoder for U64Codec {
    type Value = u64;

    fn is_of_bound_size(&self) -> bool {
        true
    }

    fn maximum_size(&self) -> usize {
        8
    }

    fn encode<P: PageWrite>(&self, value: &u64, page: &mut P) -> Result<()> {
        page.write_u64(*value)
    }

    fn decode<P: PageRead>(&self, page: &mut P) -> Result<u64> {
        page.read_u64()
    }

    fn exact_size_in_stream<P: PageRead>(&self, _page: &mut P) -> Result<usize> {
        Ok(8)
    }
}

impl EncoderProvider for U64Codec {
    type Encoder = U64Codec;

    fn encoder(&self, version: u8) -> Result<U64Codec> {
        check_version(version)?;
        Ok(U64Codec)
    }
}

/// Unbound codec for byte strings: a varint length prefix followed by the
/// raw bytes. Always stored out-of-line.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl BytesCodec {
    /// Encoded size of `bytes`, for entry-size accounting before insertion.
    pub fn encoded_size(bytes: &[u8]) -> usize {
        varint::encoded_len(bytes.len() as u32) + bytes.len()
    }
}

impl Encoder for BytesCodec {
    type Value = Vec<u8>;

    fn is_of_bound_size(&self) -> bool {
        false
    }

    fn maximum_size(&self) -> usize {
        usize::MAX
    }

    fn encode<P: PageWrite>(&self, value: &Vec<u8>, page: &mut P) -> Result<()> {
        varint::encode_into(value.len() as u32, page)?;
        page.write_bytes(value)
    }

    fn decode<P: PageRead>(&self, page: &mut P) -> Result<Vec<u8>> {
        let (len, _) = varint::decode_from(page)?;
        Ok(page.read_bytes(len as usize)?.to_vec())
    }

    fn exact_size_in_stream<P: PageRead>(&self, page: &mut P) -> Result<usize> {
        let (len, prefix) = varint::decode_from(page)?;
        Ok(prefix + len as usize)
    }
}

impl EncoderProvider for BytesCodec {
    type Encoder = BytesCodec;

    fn encoder(&self, version: u8) -> Result<BytesCodec> {
        check_version(version)?;
        Ok(BytesCodec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_SIZE;
    use crate::storage::PageWriter;

    #[test]
    fn fixed_codecs_report_bound_sizes() {
        assert!(U32Codec.is_of_bound_size());
        assert_eq!(U32Codec.maximum_size(), 4);
        assert!(PageIndexCodec.is_of_bound_size());
        assert_eq!(PageIndexCodec.maximum_size(), 8);
        assert_eq!(PagePositionCodec.maximum_size(), 4);
    }

    #[test]
    fn bytes_codec_is_unbound() {
        assert!(!BytesCodec.is_of_bound_size());
    }

    #[test]
    fn u32_codec_roundtrip() {
        let mut page = vec![0u8; PAGE_SIZE];
        let mut writer = PageWriter::new(&mut page, 0);

        writer.set_position(64);
        U32Codec.encode(&0xCAFEBABE, &mut writer).unwrap();
        writer.set_position(64);
        assert_eq!(U32Codec.decode(&mut writer).unwrap(), 0xCAFEBABE);
    }

    #[test]
    fn bytes_codec_roundtrip_and_exact_size() {
        let mut page = vec![0u8; PAGE_SIZE];
        let mut writer = PageWriter::new(&mut page, 0);
        let payload = b"separator key material".to_vec();

        writer.set_position(128);
        BytesCodec.encode(&payload, &mut writer).unwrap();

        writer.set_position(128);
        assert_eq!(BytesCodec.decode(&mut writer).unwrap(), payload);

        writer.set_position(128);
        let exact = BytesCodec.exact_size_in_stream(&mut writer).unwrap();
        assert_eq!(exact, BytesCodec::encoded_size(&payload));
        assert_eq!(exact, 1 + payload.len());
    }

    #[test]
    fn providers_reject_unknown_versions() {
        assert!(U32Codec.encoder(0).is_ok());

        let result = U32Codec.encoder(3);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("unsupported encoders version"));

        assert!(PageIndexCodec::for_version(7).is_err());
        assert!(PagePositionCodec::for_version(15).is_err());
    }
}
