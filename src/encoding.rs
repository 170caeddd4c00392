// SPDX-License-Identifier: Apache-2.0

//! Supported stream encodings for line extraction.
//!
//! Each encoding carries its byte-order-mark sequence, its code-unit width,
//! and the encoded form of the LF terminator. Dispatch happens once per file
//! when a harvester opens, not per line.

use std::str::FromStr;

/// Closed set of stream encodings a harvester can read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8; a leading BOM is stripped when present
    #[default]
    Utf8,
    /// UTF-8 with an expected leading BOM
    Utf8Bom,
    /// UTF-16 little-endian with an expected leading BOM
    Utf16LeBom,
    /// UTF-16 big-endian with an expected leading BOM
    Utf16BeBom,
}

/// What to do with a message whose bytes do not decode under the declared
/// encoding. The consumed byte length is committed either way, so one bad
/// message never wedges the offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeErrorPolicy {
    /// Substitute U+FFFD for undecodable sequences
    #[default]
    Replace,
    /// Drop the message text entirely
    Skip,
}

impl Encoding {
    /// The byte-order-mark sequence this encoding strips at stream start.
    pub fn bom(&self) -> &'static [u8] {
        match self {
            Encoding::Utf8 | Encoding::Utf8Bom => &[0xEF, 0xBB, 0xBF],
            Encoding::Utf16LeBom => &[0xFF, 0xFE],
            Encoding::Utf16BeBom => &[0xFE, 0xFF],
        }
    }

    /// Width of one code unit in bytes. Line terminators are only matched at
    /// code-unit-aligned positions.
    pub fn unit_width(&self) -> usize {
        match self {
            Encoding::Utf8 | Encoding::Utf8Bom => 1,
            Encoding::Utf16LeBom | Encoding::Utf16BeBom => 2,
        }
    }

    /// The encoded LF terminator.
    pub fn newline(&self) -> &'static [u8] {
        match self {
            Encoding::Utf8 | Encoding::Utf8Bom => &[0x0A],
            Encoding::Utf16LeBom => &[0x0A, 0x00],
            Encoding::Utf16BeBom => &[0x00, 0x0A],
        }
    }

    /// Decode message bytes to text per the configured failure policy.
    /// Returns None when the policy is Skip and the bytes are undecodable.
    pub fn decode(&self, bytes: &[u8], policy: DecodeErrorPolicy) -> Option<String> {
        match self {
            Encoding::Utf8 | Encoding::Utf8Bom => match std::str::from_utf8(bytes) {
                Ok(s) => Some(s.to_string()),
                Err(_) => match policy {
                    DecodeErrorPolicy::Replace => {
                        Some(String::from_utf8_lossy(bytes).into_owned())
                    }
                    DecodeErrorPolicy::Skip => None,
                },
            },
            Encoding::Utf16LeBom => decode_utf16(bytes, u16::from_le_bytes, policy),
            Encoding::Utf16BeBom => decode_utf16(bytes, u16::from_be_bytes, policy),
        }
    }
}

fn decode_utf16(
    bytes: &[u8],
    unit: fn([u8; 2]) -> u16,
    policy: DecodeErrorPolicy,
) -> Option<String> {
    let dangling = bytes.len() % 2 != 0;
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| unit([c[0], c[1]]))
        .collect();

    match policy {
        DecodeErrorPolicy::Replace => {
            let mut text = String::from_utf16_lossy(&units);
            if dangling {
                text.push('\u{FFFD}');
            }
            Some(text)
        }
        DecodeErrorPolicy::Skip => {
            if dangling {
                return None;
            }
            String::from_utf16(&units).ok()
        }
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            "utf-8-bom" | "utf8-bom" => Ok(Encoding::Utf8Bom),
            "utf-16le-bom" | "utf16le-bom" => Ok(Encoding::Utf16LeBom),
            "utf-16be-bom" | "utf16be-bom" => Ok(Encoding::Utf16BeBom),
            other => Err(format!("unknown encoding: {}", other)),
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Utf8Bom => "utf-8-bom",
            Encoding::Utf16LeBom => "utf-16le-bom",
            Encoding::Utf16BeBom => "utf-16be-bom",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for DecodeErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replace" => Ok(DecodeErrorPolicy::Replace),
            "skip" => Ok(DecodeErrorPolicy::Skip),
            other => Err(format!("unknown decode error policy: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminator_widths() {
        assert_eq!(Encoding::Utf8.newline(), b"\n");
        assert_eq!(Encoding::Utf16LeBom.newline(), &[0x0A, 0x00]);
        assert_eq!(Encoding::Utf16BeBom.newline(), &[0x00, 0x0A]);
        assert_eq!(Encoding::Utf8.unit_width(), 1);
        assert_eq!(Encoding::Utf16BeBom.unit_width(), 2);
    }

    #[test]
    fn test_decode_utf8() {
        let text = Encoding::Utf8
            .decode(b"Hello World", DecodeErrorPolicy::Replace)
            .unwrap();
        assert_eq!(text, "Hello World");
    }

    #[test]
    fn test_decode_utf8_invalid_replace() {
        let text = Encoding::Utf8
            .decode(&[b'a', 0xFF, b'b'], DecodeErrorPolicy::Replace)
            .unwrap();
        assert_eq!(text, "a\u{FFFD}b");
    }

    #[test]
    fn test_decode_utf8_invalid_skip() {
        assert_eq!(
            Encoding::Utf8.decode(&[b'a', 0xFF, b'b'], DecodeErrorPolicy::Skip),
            None
        );
    }

    #[test]
    fn test_decode_utf16le() {
        let bytes: Vec<u8> = "Hi".encode_utf16().flat_map(u16::to_le_bytes).collect();
        let text = Encoding::Utf16LeBom
            .decode(&bytes, DecodeErrorPolicy::Skip)
            .unwrap();
        assert_eq!(text, "Hi");
    }

    #[test]
    fn test_decode_utf16be() {
        let bytes: Vec<u8> = "Hi".encode_utf16().flat_map(u16::to_be_bytes).collect();
        let text = Encoding::Utf16BeBom
            .decode(&bytes, DecodeErrorPolicy::Replace)
            .unwrap();
        assert_eq!(text, "Hi");
    }

    #[test]
    fn test_decode_utf16_dangling_byte() {
        // odd byte count cannot be valid UTF-16
        assert_eq!(
            Encoding::Utf16LeBom.decode(&[0x41], DecodeErrorPolicy::Skip),
            None
        );
        let text = Encoding::Utf16LeBom
            .decode(&[0x41, 0x00, 0x42], DecodeErrorPolicy::Replace)
            .unwrap();
        assert_eq!(text, "A\u{FFFD}");
    }

    #[test]
    fn test_parse_roundtrip() {
        for enc in [
            Encoding::Utf8,
            Encoding::Utf8Bom,
            Encoding::Utf16LeBom,
            Encoding::Utf16BeBom,
        ] {
            assert_eq!(enc.to_string().parse::<Encoding>().unwrap(), enc);
        }
        assert!("latin-1".parse::<Encoding>().is_err());
    }
}
