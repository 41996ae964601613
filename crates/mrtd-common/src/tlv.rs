//! TLV/DER parser for ICAO data group structures
//!
//! Data groups on a travel document chip are BER-TLV encoded. Extraction
//! works on a flattened leaf list: constructed tags (bit 0x20 of the first
//! tag byte) are descended into and never emitted themselves. All length
//! fields are attacker controlled, so every read is bounds checked and the
//! nesting depth is capped.

use thiserror::Error;

/// Maximum nesting depth accepted for constructed values.
///
/// Real data groups nest three or four levels deep; anything past this is
/// malformed input.
pub const MAX_DEPTH: usize = 16;

/// TLV parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TlvError {
    /// A tag, length or value read would run past the end of the buffer
    #[error("truncated TLV structure at offset {offset}")]
    Truncated { offset: usize },
    /// Constructed values nested deeper than [`MAX_DEPTH`]
    #[error("TLV nesting exceeds maximum depth of {MAX_DEPTH}")]
    DepthExceeded,
    /// A length field larger than the parser supports
    #[error("unsupported TLV length encoding at offset {offset}")]
    LengthOverflow { offset: usize },
}

/// A single primitive tag-length-value element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    /// Tag bytes (one or more)
    pub tag: Vec<u8>,
    /// Value bytes
    pub value: Vec<u8>,
}

impl Tlv {
    /// Whether the constructed bit (0x20) is set on the first tag byte
    pub fn is_constructed(&self) -> bool {
        self.tag.first().map(|b| b & 0x20 != 0).unwrap_or(false)
    }

    /// Re-encode this element as tag || DER length || value
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.tag.len() + 4 + self.value.len());
        out.extend_from_slice(&self.tag);
        encode_length(&mut out, self.value.len());
        out.extend_from_slice(&self.value);
        out
    }
}

/// Append a DER length (short or long form) to `out`
pub fn encode_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
}

/// Header of a TLV element, as needed for chunked file reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvHeader {
    /// Combined length of the tag and length fields
    pub header_len: usize,
    /// Declared length of the value
    pub value_len: usize,
}

impl TlvHeader {
    /// Total encoded length of the element (header plus value)
    pub fn total_len(&self) -> usize {
        self.header_len + self.value_len
    }
}

/// Decode the tag and length fields at the start of `data` without
/// requiring the value to be present.
///
/// Used to size a chunked READ BINARY: the first few bytes of a file give
/// the outer tag and declared length, from which the full file length
/// follows.
pub fn decode_header(data: &[u8]) -> Result<TlvHeader, TlvError> {
    let mut offset = 0;
    read_tag(data, &mut offset)?;
    let value_len = read_length(data, &mut offset)?;
    Ok(TlvHeader {
        header_len: offset,
        value_len,
    })
}

/// Parse `data` into a flattened list of primitive TLV elements.
///
/// Constructed elements are descended into recursively; only leaves appear
/// in the output, in encounter order.
pub fn parse(data: &[u8]) -> Result<Vec<Tlv>, TlvError> {
    let mut out = Vec::new();
    parse_into(data, 0, &mut out)?;
    Ok(out)
}

fn parse_into(data: &[u8], depth: usize, out: &mut Vec<Tlv>) -> Result<(), TlvError> {
    if depth > MAX_DEPTH {
        return Err(TlvError::DepthExceeded);
    }

    let mut offset = 0;
    while offset < data.len() {
        let tag_start = offset;
        let tag = read_tag(data, &mut offset)?;
        let len = read_length(data, &mut offset)?;

        if len > data.len() - offset {
            return Err(TlvError::Truncated { offset: tag_start });
        }
        let value = &data[offset..offset + len];
        offset += len;

        if tag[0] & 0x20 != 0 {
            parse_into(value, depth + 1, out)?;
        } else {
            out.push(Tlv {
                tag: tag.to_vec(),
                value: value.to_vec(),
            });
        }
    }
    Ok(())
}

/// Search `data` for the first occurrence of `tag` and return its value.
///
/// Walks the top level only; to reach nested elements, call again on a
/// constructed value, or use [`parse`] for a flattened view.
pub fn find_tag<'a>(data: &'a [u8], tag: &[u8]) -> Option<&'a [u8]> {
    let mut offset = 0;
    while offset < data.len() {
        let current = read_tag(data, &mut offset).ok()?;
        let len = read_length(data, &mut offset).ok()?;
        if len > data.len() - offset {
            return None;
        }
        let value = &data[offset..offset + len];
        offset += len;
        if current == tag {
            return Some(value);
        }
    }
    None
}

fn read_tag<'a>(data: &'a [u8], offset: &mut usize) -> Result<&'a [u8], TlvError> {
    let start = *offset;
    let first = *data.get(*offset).ok_or(TlvError::Truncated { offset: start })?;
    *offset += 1;

    // Low five bits all set means the tag number continues in subsequent
    // bytes: consume while the high bit is set, plus one terminal byte.
    if first & 0x1F == 0x1F {
        loop {
            let b = *data.get(*offset).ok_or(TlvError::Truncated { offset: start })?;
            *offset += 1;
            if b & 0x80 == 0 {
                break;
            }
        }
    }
    Ok(&data[start..*offset])
}

fn read_length(data: &[u8], offset: &mut usize) -> Result<usize, TlvError> {
    let start = *offset;
    let first = *data.get(*offset).ok_or(TlvError::Truncated { offset: start })?;
    *offset += 1;

    if first & 0x80 == 0 {
        return Ok(first as usize);
    }

    let num_bytes = (first & 0x7F) as usize;
    if num_bytes == 0 || num_bytes > 4 {
        return Err(TlvError::LengthOverflow { offset: start });
    }
    if *offset + num_bytes > data.len() {
        return Err(TlvError::Truncated { offset: start });
    }

    let mut len: usize = 0;
    for _ in 0..num_bytes {
        len = (len << 8) | data[*offset] as usize;
        *offset += 1;
    }
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_parse_primitive() {
        let data = hex!("5F 0E 03 41 42 43");
        let tlvs = parse(&data).unwrap();
        assert_eq!(tlvs.len(), 1);
        assert_eq!(tlvs[0].tag, vec![0x5F, 0x0E]);
        assert_eq!(tlvs[0].value, b"ABC");
    }

    #[test]
    fn test_parse_flattens_constructed() {
        // Constructed 6B wrapping two primitives
        let data = [
            0x6B, 0x08, // constructed, 8 bytes
            0x5F, 0x10, 0x02, 0x31, 0x32, // personal number "12"
            0x88, 0x01, 0x05, // format type
        ];
        let tlvs = parse(&data).unwrap();
        assert_eq!(tlvs.len(), 2);
        assert_eq!(tlvs[0].tag, vec![0x5F, 0x10]);
        assert_eq!(tlvs[1].tag, vec![0x88]);
        // The constructed wrapper itself is never emitted
        assert!(tlvs.iter().all(|t| t.tag != vec![0x6B]));
    }

    #[test]
    fn test_parse_long_form_length() {
        let mut data = vec![0x5F, 0x2E, 0x82, 0x01, 0x00];
        data.extend(std::iter::repeat(0xAA).take(256));
        let tlvs = parse(&data).unwrap();
        assert_eq!(tlvs[0].value.len(), 256);
    }

    #[test]
    fn test_parse_truncated_value() {
        // Declared length 5, only 2 value bytes present
        let data = [0x5F, 0x10, 0x05, 0x31, 0x32];
        assert!(matches!(
            parse(&data),
            Err(TlvError::Truncated { offset: 0 })
        ));
    }

    #[test]
    fn test_parse_truncated_length() {
        let data = [0x5F, 0x2E, 0x82, 0x01];
        assert!(matches!(parse(&data), Err(TlvError::Truncated { .. })));
    }

    #[test]
    fn test_parse_depth_bound() {
        // A tower of constructed wrappers deeper than MAX_DEPTH
        let mut data = vec![0x41];
        for _ in 0..(MAX_DEPTH + 2) {
            let mut outer = vec![0x65];
            encode_length(&mut outer, data.len());
            outer.extend_from_slice(&data);
            data = outer;
        }
        assert_eq!(parse(&data), Err(TlvError::DepthExceeded));
    }

    #[test]
    fn test_roundtrip_leaves() {
        let leaves = [
            Tlv { tag: vec![0x5F, 0x0E], value: b"JOHN<DOE".to_vec() },
            Tlv { tag: vec![0x87], value: vec![0x01, 0x01] },
            Tlv { tag: vec![0x88], value: vec![0x00; 200] },
        ];
        let mut encoded = Vec::new();
        for leaf in &leaves {
            encoded.extend(leaf.encode());
        }
        let parsed = parse(&encoded).unwrap();
        assert_eq!(parsed.as_slice(), &leaves[..]);

        // Same leaves survive an extra constructed wrapper
        let mut wrapped = vec![0x6B];
        encode_length(&mut wrapped, encoded.len());
        wrapped.extend_from_slice(&encoded);
        let parsed = parse(&wrapped).unwrap();
        assert_eq!(parsed.as_slice(), &leaves[..]);
    }

    #[test]
    fn test_decode_header() {
        let header = decode_header(&hex!("61 5A FF FF")).unwrap();
        assert_eq!(header.header_len, 2);
        assert_eq!(header.value_len, 0x5A);
        assert_eq!(header.total_len(), 0x5C);

        let header = decode_header(&hex!("75 82 30 39")).unwrap();
        assert_eq!(header.header_len, 4);
        assert_eq!(header.value_len, 0x3039);
    }

    #[test]
    fn test_find_tag() {
        let data = hex!("87 01 04 88 01 05");
        assert_eq!(find_tag(&data, &[0x88]), Some(&[0x05][..]));
        assert_eq!(find_tag(&data, &[0x89]), None);
    }

    #[test]
    fn test_encode_length_forms() {
        let mut out = Vec::new();
        encode_length(&mut out, 0x7F);
        assert_eq!(out, vec![0x7F]);

        out.clear();
        encode_length(&mut out, 0x80);
        assert_eq!(out, vec![0x81, 0x80]);

        out.clear();
        encode_length(&mut out, 0x1234);
        assert_eq!(out, vec![0x82, 0x12, 0x34]);
    }
}
