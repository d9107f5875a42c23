//! Byte-order-mark sniffing and the text codecs the normalizer reads and
//! writes.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use std::fmt;
use std::str::FromStr;

const BOM_UTF8: [u8; 3] = [0xEF, 0xBB, 0xBF];
const BOM_UTF16_LE: [u8; 2] = [0xFF, 0xFE];
const BOM_UTF16_BE: [u8; 2] = [0xFE, 0xFF];
const BOM_UTF32_LE: [u8; 4] = [0xFF, 0xFE, 0x00, 0x00];
const BOM_UTF32_BE: [u8; 4] = [0x00, 0x00, 0xFE, 0xFF];

/// Modified base64 used inside UTF-7 shifted sequences: standard alphabet,
/// no padding, leftover bits discarded.
const UTF7_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::RequireNone)
        .with_decode_allow_trailing_bits(true),
);

/// Encoding detected on an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
    /// No BOM and no byte >= 0x80.
    Ascii,
    /// No BOM, at least one byte >= 0x80.
    Utf8,
    /// UTF-8 with a BOM.
    Utf8Bom,
    /// UTF-16, little endian, with a BOM.
    Utf16Le,
    /// UTF-16, big endian, with a BOM.
    Utf16Be,
    /// UTF-32, little endian, with a BOM.
    Utf32Le,
    /// UTF-32, big endian, with a BOM.
    Utf32Be,
    /// `+/v8`, `+/v9`, `+/v+` or `+/v/` signature.
    Utf7,
}

impl SourceEncoding {
    /// Stable lowercase name used in results and logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::Utf8 => "utf-8",
            Self::Utf8Bom => "utf-8-bom",
            Self::Utf16Le => "utf-16le",
            Self::Utf16Be => "utf-16be",
            Self::Utf32Le => "utf-32le",
            Self::Utf32Be => "utf-32be",
            Self::Utf7 => "utf-7",
        }
    }
}

impl fmt::Display for SourceEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encoding the normalizer can write. UTF-7 is read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetEncoding {
    /// 7-bit ASCII; other characters fail verification.
    Ascii,
    /// UTF-8 without a BOM.
    Utf8,
    /// UTF-8 with a BOM.
    Utf8Bom,
    /// UTF-16 little endian with a BOM.
    Utf16Le,
    /// UTF-16 big endian with a BOM.
    Utf16Be,
    /// UTF-32 little endian with a BOM.
    Utf32Le,
    /// UTF-32 big endian with a BOM.
    Utf32Be,
}

impl TargetEncoding {
    /// Target that keeps a file in its current encoding. UTF-7 sources are
    /// migrated to BOM-less UTF-8.
    pub fn preserving(source: SourceEncoding) -> Self {
        match source {
            SourceEncoding::Ascii => Self::Ascii,
            SourceEncoding::Utf8 | SourceEncoding::Utf7 => Self::Utf8,
            SourceEncoding::Utf8Bom => Self::Utf8Bom,
            SourceEncoding::Utf16Le => Self::Utf16Le,
            SourceEncoding::Utf16Be => Self::Utf16Be,
            SourceEncoding::Utf32Le => Self::Utf32Le,
            SourceEncoding::Utf32Be => Self::Utf32Be,
        }
    }

    /// The encoding a file written with this target is read back as.
    pub fn as_source(self) -> SourceEncoding {
        match self {
            Self::Ascii => SourceEncoding::Ascii,
            Self::Utf8 => SourceEncoding::Utf8,
            Self::Utf8Bom => SourceEncoding::Utf8Bom,
            Self::Utf16Le => SourceEncoding::Utf16Le,
            Self::Utf16Be => SourceEncoding::Utf16Be,
            Self::Utf32Le => SourceEncoding::Utf32Le,
            Self::Utf32Be => SourceEncoding::Utf32Be,
        }
    }

    /// Same names as [`SourceEncoding::name`].
    pub fn name(self) -> &'static str {
        self.as_source().name()
    }
}

impl fmt::Display for TargetEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TargetEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "ascii" => Ok(Self::Ascii),
            "utf8" | "utf8nobom" => Ok(Self::Utf8),
            "utf8bom" => Ok(Self::Utf8Bom),
            "utf16" | "utf16le" | "unicode" => Ok(Self::Utf16Le),
            "utf16be" | "bigendianunicode" => Ok(Self::Utf16Be),
            "utf32" | "utf32le" => Ok(Self::Utf32Le),
            "utf32be" | "bigendianutf32" => Ok(Self::Utf32Be),
            _ => Err(format!("unknown encoding '{s}'")),
        }
    }
}

/// Sniff the encoding of raw file bytes.
///
/// BOMs are checked longest-first so a UTF-32 LE BOM is not mistaken for
/// UTF-16 LE. Without a BOM, any byte >= 0x80 means UTF-8.
pub fn detect_encoding(bytes: &[u8]) -> SourceEncoding {
    if bytes.starts_with(&BOM_UTF32_LE) {
        SourceEncoding::Utf32Le
    } else if bytes.starts_with(&BOM_UTF32_BE) {
        SourceEncoding::Utf32Be
    } else if bytes.starts_with(&BOM_UTF8) {
        SourceEncoding::Utf8Bom
    } else if bytes.starts_with(&BOM_UTF16_LE) {
        SourceEncoding::Utf16Le
    } else if bytes.starts_with(&BOM_UTF16_BE) {
        SourceEncoding::Utf16Be
    } else if bytes.len() >= 4
        && bytes.starts_with(b"+/v")
        && matches!(bytes[3], b'8' | b'9' | b'+' | b'/')
    {
        SourceEncoding::Utf7
    } else if bytes.iter().any(|&b| b >= 0x80) {
        SourceEncoding::Utf8
    } else {
        SourceEncoding::Ascii
    }
}

/// Decode `bytes` as `encoding`, skipping its BOM. Returns `None` when the
/// bytes are not valid in that encoding.
pub fn decode(bytes: &[u8], encoding: SourceEncoding) -> Option<String> {
    match encoding {
        SourceEncoding::Ascii | SourceEncoding::Utf8 => {
            std::str::from_utf8(bytes).ok().map(str::to_owned)
        }
        SourceEncoding::Utf8Bom => std::str::from_utf8(bytes.strip_prefix(&BOM_UTF8)?)
            .ok()
            .map(str::to_owned),
        SourceEncoding::Utf16Le => decode_utf16(bytes.strip_prefix(&BOM_UTF16_LE)?, u16::from_le_bytes),
        SourceEncoding::Utf16Be => decode_utf16(bytes.strip_prefix(&BOM_UTF16_BE)?, u16::from_be_bytes),
        SourceEncoding::Utf32Le => decode_utf32(bytes.strip_prefix(&BOM_UTF32_LE)?, u32::from_le_bytes),
        SourceEncoding::Utf32Be => decode_utf32(bytes.strip_prefix(&BOM_UTF32_BE)?, u32::from_be_bytes),
        SourceEncoding::Utf7 => {
            let text = decode_utf7(bytes)?;
            Some(text.strip_prefix('\u{FEFF}').unwrap_or(&text).to_owned())
        }
    }
}

/// Encode `text` as `encoding`, including its BOM.
///
/// ASCII replaces every non-ASCII character with `?`; callers detect the
/// loss by decoding the result again.
pub fn encode(text: &str, encoding: TargetEncoding) -> Vec<u8> {
    match encoding {
        TargetEncoding::Ascii => text
            .chars()
            .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
            .collect(),
        TargetEncoding::Utf8 => text.as_bytes().to_vec(),
        TargetEncoding::Utf8Bom => {
            let mut out = BOM_UTF8.to_vec();
            out.extend_from_slice(text.as_bytes());
            out
        }
        TargetEncoding::Utf16Le => {
            let mut out = BOM_UTF16_LE.to_vec();
            out.extend(text.encode_utf16().flat_map(u16::to_le_bytes));
            out
        }
        TargetEncoding::Utf16Be => {
            let mut out = BOM_UTF16_BE.to_vec();
            out.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
            out
        }
        TargetEncoding::Utf32Le => {
            let mut out = BOM_UTF32_LE.to_vec();
            out.extend(text.chars().flat_map(|c| u32::from(c).to_le_bytes()));
            out
        }
        TargetEncoding::Utf32Be => {
            let mut out = BOM_UTF32_BE.to_vec();
            out.extend(text.chars().flat_map(|c| u32::from(c).to_be_bytes()));
            out
        }
    }
}

fn decode_utf16(bytes: &[u8], read: fn([u8; 2]) -> u16) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| read([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

fn decode_utf32(bytes: &[u8], read: fn([u8; 4]) -> u32) -> Option<String> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    bytes
        .chunks_exact(4)
        .map(|quad| char::from_u32(read([quad[0], quad[1], quad[2], quad[3]])))
        .collect()
}

fn is_utf7_base64(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/'
}

/// Decode RFC 2152 UTF-7.
///
/// `+` opens a shifted run of modified base64 holding big-endian UTF-16
/// code units; the run ends at the first non-base64 byte, and a `-`
/// terminator is absorbed. `+-` is a literal plus.
fn decode_utf7(bytes: &[u8]) -> Option<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b >= 0x80 {
            return None;
        }
        if b != b'+' {
            units.push(u16::from(b));
            i += 1;
            continue;
        }

        i += 1;
        let start = i;
        while i < bytes.len() && is_utf7_base64(bytes[i]) {
            i += 1;
        }
        let run = &bytes[start..i];

        if run.is_empty() {
            units.push(u16::from(b'+'));
        } else {
            let decoded = UTF7_BASE64.decode(run).ok()?;
            units.extend(
                decoded
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]])),
            );
        }

        if i < bytes.len() && bytes[i] == b'-' {
            i += 1;
        }
    }

    String::from_utf16(&units).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_encoding_from_bom() {
        assert_eq!(detect_encoding(&[0xFF, 0xFE, 0x00, 0x00, b'a']), SourceEncoding::Utf32Le);
        assert_eq!(detect_encoding(&[0x00, 0x00, 0xFE, 0xFF]), SourceEncoding::Utf32Be);
        assert_eq!(detect_encoding(&[0xEF, 0xBB, 0xBF, b'a']), SourceEncoding::Utf8Bom);
        assert_eq!(detect_encoding(&[0xFF, 0xFE, b'a', 0x00]), SourceEncoding::Utf16Le);
        assert_eq!(detect_encoding(&[0xFE, 0xFF, 0x00, b'a']), SourceEncoding::Utf16Be);
        assert_eq!(detect_encoding(b"+/v8-hello"), SourceEncoding::Utf7);
    }

    #[test]
    fn test_detect_encoding_without_bom() {
        assert_eq!(detect_encoding(b"plain text\n"), SourceEncoding::Ascii);
        assert_eq!(detect_encoding("caf\u{e9}\n".as_bytes()), SourceEncoding::Utf8);
        assert_eq!(detect_encoding(b""), SourceEncoding::Ascii);
    }

    #[test]
    fn test_round_trip_lossless_targets() {
        let text = "Write-Host 'gr\u{fc}\u{df}e' \u{1F600}\r\nline two\n";
        for target in [
            TargetEncoding::Utf8,
            TargetEncoding::Utf8Bom,
            TargetEncoding::Utf16Le,
            TargetEncoding::Utf16Be,
            TargetEncoding::Utf32Le,
            TargetEncoding::Utf32Be,
        ] {
            let bytes = encode(text, target);
            assert_eq!(detect_encoding(&bytes), target.as_source(), "{target}");
            assert_eq!(decode(&bytes, target.as_source()).as_deref(), Some(text), "{target}");
        }
    }

    #[test]
    fn test_ascii_encoding_is_lossy() {
        let bytes = encode("na\u{ef}ve", TargetEncoding::Ascii);
        assert_eq!(bytes, b"na?ve");
    }

    #[test]
    fn test_decode_rejects_odd_utf16_length() {
        assert!(decode(&[0xFF, 0xFE, b'a'], SourceEncoding::Utf16Le).is_none());
    }

    #[test]
    fn test_decode_utf7() {
        assert_eq!(decode_utf7(b"Hi Mom -+Jjo--!").as_deref(), Some("Hi Mom -\u{263A}-!"));
        assert_eq!(decode_utf7(b"A+ImIDkQ.").as_deref(), Some("A\u{2262}\u{0391}."));
        assert_eq!(decode_utf7(b"+AGEAYgBj-").as_deref(), Some("abc"));
        assert_eq!(decode_utf7(b"1 +- 1").as_deref(), Some("1 + 1"));
    }

    #[test]
    fn test_decode_utf7_strips_signature() {
        assert_eq!(decode(b"+/v8-hi", SourceEncoding::Utf7).as_deref(), Some("hi"));
    }

    #[test]
    fn test_target_encoding_from_str() {
        assert_eq!("utf8".parse::<TargetEncoding>(), Ok(TargetEncoding::Utf8));
        assert_eq!("UTF-8-BOM".parse::<TargetEncoding>(), Ok(TargetEncoding::Utf8Bom));
        assert_eq!("unicode".parse::<TargetEncoding>(), Ok(TargetEncoding::Utf16Le));
        assert!("latin1".parse::<TargetEncoding>().is_err());
    }
}
