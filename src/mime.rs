//! Content transfer decoding for fetched body parts.
//!
//! Supports Base64, Quoted-Printable, and identity encodings. Decoding is
//! lossy by design: delivery is fire-and-forget, so a part that fails to
//! decode falls back to its raw bytes rather than aborting the message.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::parser::TransferEncoding;

/// Decodes a body part according to its declared transfer encoding.
///
/// 7BIT, 8BIT, BINARY, and unrecognized encodings pass the bytes through
/// unchanged. Base64 input is tolerant of embedded CRLF line breaks and
/// whitespace. Undecodable input is returned as-is.
#[must_use]
pub fn decode_transfer(encoding: &TransferEncoding, data: &[u8]) -> Vec<u8> {
    match encoding {
        TransferEncoding::Base64 => decode_base64(data).unwrap_or_else(|| data.to_vec()),
        TransferEncoding::QuotedPrintable => decode_quoted_printable(data),
        TransferEncoding::SevenBit
        | TransferEncoding::EightBit
        | TransferEncoding::Binary
        | TransferEncoding::Other(_) => data.to_vec(),
    }
}

/// Decodes Base64 data, skipping ASCII whitespace first.
///
/// Servers wrap Base64 bodies at 76 columns, so the raw part content
/// contains CRLF pairs that the strict decoder rejects.
fn decode_base64(data: &[u8]) -> Option<Vec<u8>> {
    let compact: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD.decode(&compact).ok()
}

/// Decodes Quoted-Printable content (RFC 2045).
///
/// Handles `=XX` hex escapes and soft line breaks (`=` before CRLF or LF).
/// Invalid escapes are passed through literally rather than rejected.
fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let b = data[i];
        if b != b'=' {
            result.push(b);
            i += 1;
            continue;
        }

        // Soft line break: "=\r\n" or "=\n"
        match data.get(i + 1) {
            Some(b'\r') if data.get(i + 2) == Some(&b'\n') => {
                i += 3;
                continue;
            }
            Some(b'\n') => {
                i += 2;
                continue;
            }
            _ => {}
        }

        // Hex escape: "=XX"
        if let (Some(&hi), Some(&lo)) = (data.get(i + 1), data.get(i + 2))
            && let (Some(hi), Some(lo)) = (hex_value(hi), hex_value(lo))
        {
            result.push(hi << 4 | lo);
            i += 3;
            continue;
        }

        result.push(b);
        i += 1;
    }

    result
}

const fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_encodings_pass_through() {
        let data = b"raw \xffbytes";
        assert_eq!(decode_transfer(&TransferEncoding::SevenBit, data), data);
        assert_eq!(decode_transfer(&TransferEncoding::EightBit, data), data);
        assert_eq!(decode_transfer(&TransferEncoding::Binary, data), data);
        assert_eq!(
            decode_transfer(&TransferEncoding::Other("X-UUENCODE".into()), data),
            data
        );
    }

    #[test]
    fn base64_decodes() {
        assert_eq!(
            decode_transfer(&TransferEncoding::Base64, b"aGVsbG8="),
            b"hello"
        );
    }

    #[test]
    fn base64_tolerates_line_breaks() {
        assert_eq!(
            decode_transfer(&TransferEncoding::Base64, b"aGVs\r\nbG8g\r\nd29ybGQ="),
            b"hello world"
        );
    }

    #[test]
    fn base64_invalid_falls_back_to_raw() {
        let data = b"not!!base64";
        assert_eq!(decode_transfer(&TransferEncoding::Base64, data), data);
    }

    #[test]
    fn quoted_printable_decodes_escapes() {
        assert_eq!(
            decode_transfer(&TransferEncoding::QuotedPrintable, b"caf=C3=A9"),
            "caf\u{e9}".as_bytes()
        );
    }

    #[test]
    fn quoted_printable_soft_line_break() {
        assert_eq!(
            decode_transfer(&TransferEncoding::QuotedPrintable, b"foo=\r\nbar"),
            b"foobar"
        );
        assert_eq!(
            decode_transfer(&TransferEncoding::QuotedPrintable, b"foo=\nbar"),
            b"foobar"
        );
    }

    #[test]
    fn quoted_printable_invalid_escape_kept_literal() {
        assert_eq!(
            decode_transfer(&TransferEncoding::QuotedPrintable, b"50=% off"),
            b"50=% off"
        );
    }
}
