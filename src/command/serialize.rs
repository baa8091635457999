//! Command serialization helpers.

use crate::{Error, Result};

use super::FetchItem;

/// Writes a string argument as a quoted string, escaping `\` and `"`.
///
/// # Errors
///
/// Returns [`Error::CommandSyntax`] for strings containing CR or LF; such
/// arguments would need a literal, which this client does not emit.
pub fn write_astring(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    if s.bytes().any(|b| b == b'\r' || b == b'\n') {
        return Err(Error::CommandSyntax(
            "argument contains CR or LF".to_string(),
        ));
    }

    buf.push(b'"');
    for b in s.bytes() {
        if b == b'"' || b == b'\\' {
            buf.push(b'\\');
        }
        buf.push(b);
    }
    buf.push(b'"');

    Ok(())
}

/// Writes a parenthesized fetch attribute list.
pub fn write_fetch_items(buf: &mut Vec<u8>, items: &[FetchItem]) {
    buf.push(b'(');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            buf.push(b' ');
        }
        match item {
            FetchItem::Flags => buf.extend_from_slice(b"FLAGS"),
            FetchItem::Envelope => buf.extend_from_slice(b"ENVELOPE"),
            FetchItem::Body => buf.extend_from_slice(b"BODY"),
            FetchItem::BodyPeek(path) => {
                buf.extend_from_slice(b"BODY.PEEK[");
                for (j, seg) in path.iter().enumerate() {
                    if j > 0 {
                        buf.push(b'.');
                    }
                    buf.extend_from_slice(seg.to_string().as_bytes());
                }
                buf.push(b']');
            }
        }
    }
    buf.push(b')');
}
