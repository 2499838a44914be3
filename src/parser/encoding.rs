//! Content-Transfer-Encoding decoders for leaf bodies.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;

use crate::error::{Result, StashError};
use crate::model::part::TransferEncoding;

/// Standard alphabet, tolerant of missing padding and stray trailing bits,
/// which real mailers produce often enough.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Decode a raw body according to its transfer encoding.
pub fn decode(raw: &[u8], encoding: TransferEncoding) -> Result<Vec<u8>> {
    match encoding {
        TransferEncoding::Identity => Ok(raw.to_vec()),
        TransferEncoding::Base64 => decode_base64(raw),
        TransferEncoding::QuotedPrintable => Ok(decode_quoted_printable(raw)),
    }
}

/// Decode base64, ignoring line breaks and other whitespace.
fn decode_base64(raw: &[u8]) -> Result<Vec<u8>> {
    let compact: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    LENIENT_BASE64
        .decode(&compact)
        .map_err(|e| StashError::MimeError(format!("invalid base64 body: {e}")))
}

/// Decode quoted-printable (RFC 2045 §6.7).
///
/// Soft line breaks (`=` at end of line) are removed. Malformed escapes are
/// kept verbatim rather than rejected.
fn decode_quoted_printable(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        if b != b'=' {
            out.push(b);
            i += 1;
            continue;
        }
        // Soft line break: "=\n" or "=\r\n"
        if raw.get(i + 1) == Some(&b'\n') {
            i += 2;
            continue;
        }
        if raw.get(i + 1) == Some(&b'\r') && raw.get(i + 2) == Some(&b'\n') {
            i += 3;
            continue;
        }
        match (
            raw.get(i + 1).and_then(|&c| hex_val(c)),
            raw.get(i + 2).and_then(|&c| hex_val(c)),
        ) {
            (Some(hi), Some(lo)) => {
                out.push((hi << 4) | lo);
                i += 3;
            }
            _ => {
                out.push(b'=');
                i += 1;
            }
        }
    }
    out
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}
