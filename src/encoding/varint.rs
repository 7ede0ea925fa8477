//! # Cursor-Based Variable-Length Integers
//!
//! Length prefixes for the unbound byte-string codec. The scheme favors the
//! short lengths that dominate index payloads:
//!
//! | Value range        | Bytes | Format                  |
//! |--------------------|-------|-------------------------|
//! | 0 - 239            | 1     | `[value]`               |
//! | 240 - 65535        | 3     | `[0xF0, u16 big-endian]`|
//! | 65536 - u32::MAX   | 5     | `[0xF1, u32 big-endian]`|
//!
//! Markers `0xF2..=0xFF` are reserved; decoding one is an error. All
//! functions operate through the page cursor and advance it past the
//! encoding.

use eyre::{bail, Result};

use crate::storage::{PageRead, PageWrite};

const MARKER_U16: u8 = 0xF0;
const MARKER_U32: u8 = 0xF1;
const ONE_BYTE_MAX: u32 = 0xEF;

/// Encoded size of `value` without performing any I/O.
pub fn encoded_len(value: u32) -> usize {
    if value <= ONE_BYTE_MAX {
        1
    } else if value <= u16::MAX as u32 {
        3
    } else {
        5
    }
}

/// Encodes `value` at the cursor. Returns the number of bytes written.
pub fn encode_into<P: PageWrite>(value: u32, page: &mut P) -> Result<usize> {
    if value <= ONE_BYTE_MAX {
        page.write_u8(value as u8)?;
        Ok(1)
    } else if value <= u16::MAX as u32 {
        page.write_u8(MARKER_U16)?;
        page.write_u8((value >> 8) as u8)?;
        page.write_u8(value as u8)?;
        Ok(3)
    } else {
        page.write_u8(MARKER_U32)?;
        page.write_u32(value)?;
        Ok(5)
    }
}

/// Decodes the value at the cursor. Returns the value and its encoded size.
pub fn decode_from<P: PageRead>(page: &mut P) -> Result<(u32, usize)> {
    let first = page.read_u8()?;

    if u32::from(first) <= ONE_BYTE_MAX {
        Ok((first as u32, 1))
    } else if first == MARKER_U16 {
        let high = page.read_u8()? as u32;
        let low = page.read_u8()? as u32;
        Ok(((high << 8) | low, 3))
    } else if first == MARKER_U32 {
        Ok((page.read_u32()?, 5))
    } else {
        bail!("invalid varint marker: {:#04x}", first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_SIZE;
    use crate::storage::PageWriter;

    fn roundtrip(value: u32) -> (u32, usize, usize) {
        let mut page = vec![0u8; PAGE_SIZE];
        let mut writer = PageWriter::new(&mut page, 0);

        let written = encode_into(value, &mut writer).unwrap();
        writer.set_position(0);
        let (decoded, read) = decode_from(&mut writer).unwrap();

        (decoded, written, read)
    }

    #[test]
    fn roundtrip_boundary_values() {
        for value in [0u32, 1, 239, 240, 255, 256, 65535, 65536, u32::MAX] {
            let (decoded, written, read) = roundtrip(value);
            assert_eq!(decoded, value, "value mismatch for {}", value);
            assert_eq!(written, read, "length mismatch for {}", value);
            assert_eq!(encoded_len(value), written, "encoded_len mismatch for {}", value);
        }
    }

    #[test]
    fn encoded_len_tiers() {
        assert_eq!(encoded_len(0), 1);
        assert_eq!(encoded_len(239), 1);
        assert_eq!(encoded_len(240), 3);
        assert_eq!(encoded_len(65535), 3);
        assert_eq!(encoded_len(65536), 5);
        assert_eq!(encoded_len(u32::MAX), 5);
    }

    #[test]
    fn reserved_marker_fails() {
        let mut page = vec![0u8; PAGE_SIZE];
        page[0] = 0xF7;
        let mut writer = PageWriter::new(&mut page, 0);

        let result = decode_from(&mut writer);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("invalid varint marker"));
    }
}
