//! Modified UTF-8 encoding as used by the class file format.
//!
//! Class file `CONSTANT_Utf8` entries and serialized stack blobs use the JVM's modified
//! UTF-8: `U+0000` is encoded as the two-byte sequence `0xC0 0x80`, and supplementary
//! characters are encoded as surrogate pairs of three-byte sequences (CESU-8 style).

use crate::Result;

/// Decode a modified UTF-8 byte sequence into a string.
///
/// Surrogate halves are recombined; unpaired surrogates are replaced with
/// `U+FFFD`, which preserves decodability of damaged constant pools without
/// failing the whole class.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if a multi-byte sequence is truncated or has
/// invalid continuation bytes.
pub fn decode(bytes: &[u8]) -> Result<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            0x01..=0x7F => {
                units.push(u16::from(b));
                i += 1;
            }
            0xC0..=0xDF => {
                let b2 = continuation(bytes, i + 1)?;
                units.push((u16::from(b & 0x1F) << 6) | u16::from(b2 & 0x3F));
                i += 2;
            }
            0xE0..=0xEF => {
                let b2 = continuation(bytes, i + 1)?;
                let b3 = continuation(bytes, i + 2)?;
                units.push(
                    (u16::from(b & 0x0F) << 12)
                        | (u16::from(b2 & 0x3F) << 6)
                        | u16::from(b3 & 0x3F),
                );
                i += 3;
            }
            _ => {
                return Err(malformed_error!(
                    "invalid modified UTF-8 lead byte {:#04x} at offset {}",
                    b,
                    i
                ));
            }
        }
    }

    Ok(String::from_utf16_lossy(&units))
}

fn continuation(bytes: &[u8], at: usize) -> Result<u8> {
    match bytes.get(at) {
        Some(b) if b & 0xC0 == 0x80 => Ok(*b),
        Some(b) => Err(malformed_error!(
            "invalid modified UTF-8 continuation byte {:#04x} at offset {}",
            b,
            at
        )),
        None => Err(malformed_error!("truncated modified UTF-8 sequence")),
    }
}

/// Encode a string as modified UTF-8.
#[must_use]
pub fn encode(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) as u8 & 0x1F));
                out.push(0x80 | (unit as u8 & 0x3F));
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) as u8 & 0x0F));
                out.push(0x80 | ((unit >> 6) as u8 & 0x3F));
                out.push(0x80 | (unit as u8 & 0x3F));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_roundtrip() {
        let text = "java/util/ArrayList";
        assert_eq!(decode(&encode(text)).unwrap(), text);
        assert_eq!(encode(text), text.as_bytes());
    }

    #[test]
    fn test_nul_is_two_bytes() {
        let encoded = encode("\u{0}");
        assert_eq!(encoded, [0xC0, 0x80]);
        assert_eq!(decode(&encoded).unwrap(), "\u{0}");
    }

    #[test]
    fn test_bmp_roundtrip() {
        let text = "Größe\u{4e2d}";
        assert_eq!(decode(&encode(text)).unwrap(), text);
    }

    #[test]
    fn test_supplementary_roundtrip_via_surrogates() {
        let text = "a\u{1F600}b";
        let encoded = encode(text);
        // Surrogate pair: two 3-byte sequences plus the two ASCII bytes.
        assert_eq!(encoded.len(), 8);
        assert_eq!(decode(&encoded).unwrap(), text);
    }

    #[test]
    fn test_truncated_sequence_is_malformed() {
        assert!(decode(&[0xE4, 0xB8]).is_err());
        assert!(decode(&[0xC3]).is_err());
    }
}
