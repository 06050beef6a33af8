//! Announcement wire codec
//!
//! Payload layout (all integers big-endian):
//!
//! ```text
//! magic: u32 = 0xC0FFEE42
//! version: u16 = 1
//! repeated { len: u16, text[len] }   // alternating key, value
//! ```
//!
//! Entry text is Java's modified UTF-8 (`DataOutput.writeUTF`): NUL is written
//! as `C0 80` and characters outside the BMP as two 3-byte surrogates. Plain
//! UTF-8 is accepted as well.
//!
//! There is no explicit entry count; entries must form complete key/value
//! pairs and exactly consume the payload.

use crate::{
    error::{DecodeError, DiscoveryError, Result},
    types::{keys, AttributeRecord, Attributes},
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::borrow::Cow;

/// Magic prefix of every announcement
pub const MAGIC: u32 = 0xC0FF_EE42;
/// Supported protocol version
pub const PROTOCOL_VERSION: u16 = 1;
/// Size of the magic/version header
pub const HEADER_LEN: usize = 6;
/// Default upper bound on an accepted payload
pub const DEFAULT_MAX_PAYLOAD: usize = 4096;

/// Decoder/encoder for announcement payloads with a size bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    max_payload: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Codec {
    /// Create a codec rejecting payloads larger than `max_payload` bytes
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// Get the payload size bound
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Decode one datagram payload.
    ///
    /// Unknown keys are kept as-is. The identity key is required.
    pub fn decode(&self, raw: &[u8]) -> std::result::Result<AttributeRecord, DecodeError> {
        if raw.len() > self.max_payload {
            return Err(DecodeError::TooLarge {
                len: raw.len(),
                max: self.max_payload,
            });
        }
        if raw.len() < HEADER_LEN {
            return Err(DecodeError::TruncatedHeader { len: raw.len() });
        }

        let mut buf = raw;
        let magic = buf.get_u32();
        if magic != MAGIC {
            return Err(DecodeError::BadMagic { found: magic });
        }
        let version = buf.get_u16();
        if version != PROTOCOL_VERSION {
            return Err(DecodeError::UnsupportedVersion { found: version });
        }

        let mut attributes = Attributes::new();
        while buf.has_remaining() {
            let key_offset = raw.len() - buf.remaining();
            let key = read_entry(&mut buf, raw.len())?;
            if key.is_empty() {
                return Err(DecodeError::EmptyKey { offset: key_offset });
            }
            if !buf.has_remaining() {
                return Err(DecodeError::UnpairedEntry { key });
            }
            let value = read_entry(&mut buf, raw.len())?;
            if attributes.contains_key(&key) {
                return Err(DecodeError::DuplicateKey { key });
            }
            attributes.insert(key, value);
        }

        AttributeRecord::from_attributes(attributes)
    }

    /// Encode a record into a payload this codec would accept.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidData`] if an attribute does not fit a
    /// u16 length prefix, a key is empty, or the payload exceeds the bound.
    pub fn encode(&self, record: &AttributeRecord) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(HEADER_LEN + 64 * record.attributes().len());
        out.put_u32(MAGIC);
        out.put_u16(PROTOCOL_VERSION);

        // Identity first, then the rest in key order
        put_entry(&mut out, keys::IDENTITY)?;
        put_entry(&mut out, record.identity().as_str())?;
        for (key, value) in record.attributes() {
            if key == keys::IDENTITY {
                continue;
            }
            if key.is_empty() {
                return Err(DiscoveryError::invalid_data("attribute key is empty"));
            }
            put_entry(&mut out, key)?;
            put_entry(&mut out, value)?;
        }

        if out.len() > self.max_payload {
            return Err(DiscoveryError::invalid_data(format!(
                "encoded payload of {} bytes exceeds limit of {} bytes",
                out.len(),
                self.max_payload
            )));
        }
        Ok(out.freeze())
    }
}

/// Decode with the default payload bound
pub fn decode(raw: &[u8]) -> std::result::Result<AttributeRecord, DecodeError> {
    Codec::default().decode(raw)
}

/// Encode with the default payload bound
pub fn encode(record: &AttributeRecord) -> Result<Bytes> {
    Codec::default().encode(record)
}

fn read_entry(buf: &mut &[u8], total: usize) -> std::result::Result<String, DecodeError> {
    let offset = total - buf.remaining();
    if buf.remaining() < 2 {
        return Err(DecodeError::TruncatedEntry { offset });
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(DecodeError::TruncatedEntry { offset });
    }
    let text = decode_text(&buf[..len]).ok_or(DecodeError::InvalidUtf8 { offset })?;
    buf.advance(len);
    Ok(text)
}

fn put_entry(out: &mut BytesMut, text: &str) -> Result<()> {
    let bytes = encode_text(text);
    let len = u16::try_from(bytes.len()).map_err(|_| {
        DiscoveryError::invalid_data(format!("entry of {} bytes exceeds u16 length", bytes.len()))
    })?;
    out.put_u16(len);
    out.put_slice(&bytes);
    Ok(())
}

/// Decode entry bytes as plain UTF-8, falling back to modified UTF-8
fn decode_text(bytes: &[u8]) -> Option<String> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Some(text.to_string());
    }

    let mut units = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();
    while let Some(b) = iter.next() {
        let unit = match b {
            0x00..=0x7F => u16::from(b),
            0xC0..=0xDF => {
                let b2 = continuation(iter.next())?;
                (u16::from(b & 0x1F) << 6) | b2
            }
            0xE0..=0xEF => {
                let b2 = continuation(iter.next())?;
                let b3 = continuation(iter.next())?;
                (u16::from(b & 0x0F) << 12) | (b2 << 6) | b3
            }
            _ => return None,
        };
        units.push(unit);
    }
    // Unpaired surrogates are rejected here
    String::from_utf16(&units).ok()
}

fn continuation(byte: Option<u8>) -> Option<u16> {
    match byte? {
        b @ 0x80..=0xBF => Some(u16::from(b & 0x3F)),
        _ => None,
    }
}

/// Encode text the way `DataOutput.writeUTF` does
fn encode_text(text: &str) -> Cow<'_, [u8]> {
    // Identical to UTF-8 unless NUL or supplementary characters are present
    if !text.chars().any(|c| c == '\0' || u32::from(c) > 0xFFFF) {
        return Cow::Borrowed(text.as_bytes());
    }

    let mut out = Vec::with_capacity(text.len() + 8);
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn raw(entries: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
        for entry in entries {
            out.extend_from_slice(&(entry.len() as u16).to_be_bytes());
            out.extend_from_slice(entry.as_bytes());
        }
        out
    }

    #[test]
    fn test_decode_valid_announcement() {
        let payload = raw(&[
            keys::IDENTITY,
            "S1",
            keys::INSTANCE_NAME,
            "app-a",
            "X_VENDOR_EXTRA",
            "opaque",
        ]);
        let record = decode(&payload).unwrap();
        assert_eq!(record.identity().as_str(), "S1");
        assert_eq!(record.attributes().get(keys::INSTANCE_NAME).unwrap(), "app-a");
        assert_eq!(record.attributes().get("X_VENDOR_EXTRA").unwrap(), "opaque");
    }

    #[test]
    fn test_encode_is_accepted_by_decode() {
        let record = AttributeRecord::new("S1")
            .with_attribute(keys::MAIN_CLASS, "com.example.Main")
            .with_attribute("X_UNKNOWN", "");
        let payload = encode(&record).unwrap();
        assert_eq!(&payload[..4], &MAGIC.to_be_bytes());
        assert_eq!(decode(&payload).unwrap(), record);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut payload = raw(&[keys::IDENTITY, "S1"]);
        payload[0] = 0xAB;
        assert!(matches!(decode(&payload), Err(DecodeError::BadMagic { .. })));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut payload = raw(&[keys::IDENTITY, "S1"]);
        payload[5] = 2;
        assert_eq!(
            decode(&payload),
            Err(DecodeError::UnsupportedVersion { found: 2 })
        );
    }

    #[test]
    fn test_rejects_truncation() {
        assert_eq!(
            decode(&[0xC0, 0xFF]),
            Err(DecodeError::TruncatedHeader { len: 2 })
        );

        let payload = raw(&[keys::IDENTITY, "S1"]);
        let cut = &payload[..payload.len() - 1];
        assert!(matches!(decode(cut), Err(DecodeError::TruncatedEntry { .. })));

        // Lone byte where a length prefix should be
        let mut payload = raw(&[keys::IDENTITY, "S1"]);
        payload.push(0);
        assert!(matches!(
            decode(&payload),
            Err(DecodeError::TruncatedEntry { .. })
        ));
    }

    #[test]
    fn test_rejects_unpaired_entry() {
        let payload = raw(&[keys::IDENTITY, "S1", keys::MAIN_CLASS]);
        assert_eq!(
            decode(&payload),
            Err(DecodeError::UnpairedEntry {
                key: keys::MAIN_CLASS.to_string()
            })
        );
    }

    #[test]
    fn test_rejects_missing_identity() {
        let payload = raw(&[keys::MAIN_CLASS, "com.example.Main"]);
        assert!(matches!(
            decode(&payload),
            Err(DecodeError::MissingIdentity { .. })
        ));

        // A header with no entries at all
        assert!(matches!(
            decode(&raw(&[])),
            Err(DecodeError::MissingIdentity { .. })
        ));
    }

    #[test]
    fn test_rejects_duplicate_and_empty_keys() {
        let payload = raw(&[keys::IDENTITY, "S1", keys::IDENTITY, "S2"]);
        assert!(matches!(
            decode(&payload),
            Err(DecodeError::DuplicateKey { .. })
        ));

        let payload = raw(&[keys::IDENTITY, "S1", "", "v"]);
        assert!(matches!(decode(&payload), Err(DecodeError::EmptyKey { .. })));
    }

    #[test]
    fn test_rejects_invalid_utf8() {
        let mut payload = raw(&[keys::IDENTITY, "S1"]);
        let last = payload.len() - 1;
        payload[last] = 0xFF;
        assert!(matches!(
            decode(&payload),
            Err(DecodeError::InvalidUtf8 { .. })
        ));
    }

    fn raw_bytes(entries: &[&[u8]]) -> Vec<u8> {
        let mut out = raw(&[]);
        for entry in entries {
            out.extend_from_slice(&(entry.len() as u16).to_be_bytes());
            out.extend_from_slice(entry);
        }
        out
    }

    #[test]
    fn test_decodes_java_supplementary_characters() {
        // writeUTF of "app-\u{1F600}": the emoji as a surrogate pair
        let payload = raw_bytes(&[
            keys::IDENTITY.as_bytes(),
            b"S1",
            keys::INSTANCE_NAME.as_bytes(),
            b"app-\xED\xA0\xBD\xED\xB8\x80",
        ]);
        let record = decode(&payload).unwrap();
        assert_eq!(
            record.attributes().get(keys::INSTANCE_NAME).unwrap(),
            "app-\u{1F600}"
        );
    }

    #[test]
    fn test_decodes_java_nul() {
        let payload = raw_bytes(&[
            keys::IDENTITY.as_bytes(),
            b"S1",
            keys::INSTANCE_NAME.as_bytes(),
            b"a\xC0\x80",
        ]);
        let record = decode(&payload).unwrap();
        assert_eq!(record.attributes().get(keys::INSTANCE_NAME).unwrap(), "a\0");
    }

    #[test]
    fn test_encodes_like_write_utf() {
        let record = AttributeRecord::new("S1")
            .with_attribute(keys::INSTANCE_NAME, "app-\u{1F600}")
            .with_attribute(keys::MAIN_CLASS, "a\0");
        let payload = encode(&record).unwrap();

        let contains = |needle: &[u8]| payload.windows(needle.len()).any(|w| w == needle);
        assert!(contains(b"app-\xED\xA0\xBD\xED\xB8\x80"));
        assert!(contains(b"a\xC0\x80"));
        // No 4-byte UTF-8 sequences and no raw NUL in the entry text
        assert!(!contains("\u{1F600}".as_bytes()));
        assert_eq!(decode(&payload).unwrap(), record);
    }

    #[test]
    fn test_rejects_unpaired_surrogate() {
        let payload = raw_bytes(&[
            keys::IDENTITY.as_bytes(),
            b"S1",
            keys::INSTANCE_NAME.as_bytes(),
            b"x\xED\xA0\xBD",
        ]);
        assert!(matches!(
            decode(&payload),
            Err(DecodeError::InvalidUtf8 { .. })
        ));
    }

    #[test]
    fn test_size_bound() {
        let codec = Codec::new(16);
        let payload = raw(&[keys::IDENTITY, "S1"]);
        assert!(matches!(
            codec.decode(&payload),
            Err(DecodeError::TooLarge { max: 16, .. })
        ));

        let record = AttributeRecord::new("S1");
        assert!(codec.encode(&record).is_err());
    }

    #[test]
    fn test_encode_rejects_oversize_entry() {
        let record = AttributeRecord::new("S1").with_attribute("BIG", "x".repeat(70_000));
        assert!(Codec::new(usize::MAX).encode(&record).is_err());
    }

    proptest! {
        #[test]
        fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = decode(&bytes);
        }

        #[test]
        fn decode_never_panics_after_valid_header(tail in proptest::collection::vec(any::<u8>(), 0..256)) {
            let mut payload = raw(&[]);
            payload.extend_from_slice(&tail);
            let _ = decode(&payload);
        }

        #[test]
        fn encoded_records_decode(
            identity in "[a-f0-9-]{1,36}",
            extra in proptest::collection::btree_map("[A-Z_]{1,12}", ".{0,24}", 0..6),
        ) {
            let mut record = AttributeRecord::new(identity.as_str());
            for (k, v) in &extra {
                record = record.with_attribute(k.as_str(), v.as_str());
            }
            let payload = encode(&record).unwrap();
            prop_assert_eq!(decode(&payload).unwrap(), record);
        }
    }
}
