//! Hexadecimal transcoding for binary payloads
//!
//! MQTT payloads are arbitrary bytes, but the relay log is a line-oriented text
//! file. Payloads are stored as uppercase hex so every record stays on one line
//! and survives a round trip through the log unchanged.

use thiserror::Error;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Errors produced while decoding stored hex text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Hex payload has odd length {0}")]
    OddLength(usize),
    #[error("Invalid hex character {character:?} at index {index}")]
    InvalidCharacter { index: usize, character: char },
    #[error("Decoded {actual} bytes but the record declares {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Encode bytes as uppercase hex, two characters per byte
pub fn encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        out.push(HEX_DIGITS[(byte >> 4) as usize] as char);
        out.push(HEX_DIGITS[(byte & 0x0F) as usize] as char);
    }
    out
}

/// Decode hex text produced by [`encode`]. Lowercase digits are accepted.
pub fn decode(text: &str) -> Result<Vec<u8>, CodecError> {
    let raw = text.as_bytes();
    if raw.len() % 2 != 0 {
        return Err(CodecError::OddLength(raw.len()));
    }

    raw.chunks_exact(2)
        .enumerate()
        .map(|(pair, chunk)| {
            let high = nibble(chunk[0], pair * 2)?;
            let low = nibble(chunk[1], pair * 2 + 1)?;
            Ok((high << 4) | low)
        })
        .collect()
}

/// Decode and check the result against the length recorded alongside it
pub fn decode_with_length(text: &str, expected: usize) -> Result<Vec<u8>, CodecError> {
    let bytes = decode(text)?;
    if bytes.len() != expected {
        return Err(CodecError::LengthMismatch {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(bytes)
}

fn nibble(c: u8, index: usize) -> Result<u8, CodecError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(CodecError::InvalidCharacter {
            index,
            character: c as char,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_uppercase_pairs() {
        assert_eq!(encode(&[0xDE, 0xAD, 0xBE, 0xEF]), "DEADBEEF");
        assert_eq!(encode(&[0x00, 0x0f, 0xa0]), "000FA0");
    }

    #[test]
    fn test_encode_empty() {
        assert_eq!(encode(&[]), "");
        assert_eq!(decode("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_decode_accepts_lowercase() {
        assert_eq!(decode("deadBEEF").unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_decode_odd_length_fails() {
        assert_eq!(decode("ABC"), Err(CodecError::OddLength(3)));
    }

    #[test]
    fn test_decode_rejects_non_hex() {
        assert_eq!(
            decode("0G"),
            Err(CodecError::InvalidCharacter {
                index: 1,
                character: 'G'
            })
        );
        assert!(matches!(
            decode("zz00"),
            Err(CodecError::InvalidCharacter { index: 0, .. })
        ));
    }

    #[test]
    fn test_decode_with_length_mismatch() {
        assert_eq!(decode_with_length("DEAD", 2).unwrap(), vec![0xDE, 0xAD]);
        assert_eq!(
            decode_with_length("DEAD", 4),
            Err(CodecError::LengthMismatch {
                expected: 4,
                actual: 2
            })
        );
    }

    proptest! {
        #[test]
        fn prop_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let text = encode(&bytes);
            prop_assert_eq!(text.len(), bytes.len() * 2);
            prop_assert_eq!(decode(&text).unwrap(), bytes);
        }
    }
}
