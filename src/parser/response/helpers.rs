//! Shared sub-grammar readers for the response parser.

use chrono::{DateTime, Utc};

use crate::parser::lexer::{Lexer, Token};
use crate::{Error, Result};

use super::types::{Action, CopyUid, ListEntry};

/// Parses a parenthesized flag list, e.g. `(\Seen \Flagged)`.
///
/// Tokens are returned verbatim; callers normalize case where the protocol
/// requires it.
pub fn parse_flag_list(lexer: &mut Lexer<'_>) -> Result<Vec<String>> {
    lexer.expect(Token::LParen)?;

    let mut flags = Vec::new();
    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => continue,
            Token::Atom(s) => flags.push(s.to_string()),
            token => {
                return Err(Error::parse(
                    lexer.position(),
                    format!("unexpected token in flag list: {token:?}"),
                ));
            }
        }
    }

    Ok(flags)
}

/// Parses the bracketed status code of an OK/NO/BAD response, if the code is
/// one the session cares about.
///
/// `PERMANENTFLAGS`, `UNSEEN`, `UIDVALIDITY`, `UIDNEXT`, and `COPYUID` each
/// yield an action; every other code is skipped. The lexer is left positioned
/// just past the closing bracket.
pub fn parse_status_code(lexer: &mut Lexer<'_>) -> Result<Option<Action>> {
    lexer.expect(Token::LBracket)?;

    let atom = lexer.read_atom_string()?;
    let action = match atom.to_uppercase().as_str() {
        "PERMANENTFLAGS" => {
            lexer.expect_space()?;
            let flags = parse_flag_list(lexer)?;
            Some(Action::PermanentFlags(
                flags.into_iter().map(|f| f.to_uppercase()).collect(),
            ))
        }
        "UNSEEN" => {
            lexer.expect_space()?;
            Some(Action::FirstUnseen(lexer.read_number()?))
        }
        "UIDVALIDITY" => {
            lexer.expect_space()?;
            Some(Action::UidValidity(lexer.read_number()?))
        }
        "UIDNEXT" => {
            lexer.expect_space()?;
            Some(Action::UidNext(lexer.read_number()?))
        }
        "COPYUID" => {
            lexer.expect_space()?;
            let validity = lexer.read_number()?;
            lexer.expect_space()?;
            let src = read_uid_set(lexer)?;
            lexer.expect_space()?;
            let dst = read_uid_set(lexer)?;
            Some(Action::CopyUid(CopyUid { validity, src, dst }))
        }
        _ => None,
    };

    // Skip whatever remains of the code, known or not.
    while lexer.peek() != Some(b']') && !lexer.is_eof() {
        lexer.advance();
    }
    lexer.expect(Token::RBracket)?;

    Ok(action)
}

/// Reads one uid-set token (`4:7,9,12`) and expands it.
fn read_uid_set(lexer: &mut Lexer<'_>) -> Result<Vec<u32>> {
    let expanded = match lexer.next_token()? {
        Token::Number(n) => vec![n],
        Token::Atom(s) => expand_uid_set(s),
        token => {
            return Err(Error::parse(
                lexer.position(),
                format!("expected uid-set, got {token:?}"),
            ));
        }
    };
    Ok(expanded)
}

/// Expands a uid-set string into explicit UIDs.
///
/// Ranges `a:b` expand inclusively; reversed ranges are tolerated. A set with
/// any malformed element expands to the empty vector.
#[must_use]
pub fn expand_uid_set(set: &str) -> Vec<u32> {
    let mut uids = Vec::new();

    for part in set.split(',') {
        if let Some((a, b)) = part.split_once(':') {
            let (Ok(a), Ok(b)) = (a.parse::<u32>(), b.parse::<u32>()) else {
                return Vec::new();
            };
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            uids.extend(lo..=hi);
        } else {
            let Ok(n) = part.parse::<u32>() else {
                return Vec::new();
            };
            uids.push(n);
        }
    }

    uids
}

/// Parses the body of a `LIST` response: `(<flags>) <delim> <mailbox>`.
pub fn parse_list_entry(lexer: &mut Lexer<'_>) -> Result<ListEntry> {
    let flags = parse_flag_list(lexer)?
        .into_iter()
        .map(|f| f.to_uppercase())
        .collect();

    lexer.expect_space()?;
    let delimiter = match lexer.next_token()? {
        Token::Nil => None,
        Token::QuotedString(s) => s.chars().next(),
        token => {
            return Err(Error::parse(
                lexer.position(),
                format!("expected delimiter, got {token:?}"),
            ));
        }
    };

    lexer.expect_space()?;
    let name = lexer.read_astring()?;

    Ok(ListEntry {
        name,
        delimiter,
        flags,
    })
}

/// Converts an RFC 5322 date header to a UTC instant.
///
/// Trailing comments like `(PDT)` are stripped before parsing. Unparseable
/// input yields `None` rather than an error.
#[must_use]
pub fn parse_rfc5322_date(raw: &str) -> Option<DateTime<Utc>> {
    let mut s = raw.trim();
    if s.ends_with(')')
        && let Some(open) = s.rfind('(')
    {
        s = s[..open].trim_end();
    }

    DateTime::parse_from_rfc2822(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Reads the remaining response text up to (and consuming) the CRLF.
pub fn read_text_until_crlf(lexer: &mut Lexer<'_>) -> String {
    let remaining = lexer.remaining();
    let end = remaining
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(remaining.len());

    lexer.skip(end);
    if lexer.peek() == Some(b'\r') {
        lexer.skip(2);
    }

    String::from_utf8_lossy(&remaining[..end]).to_string()
}

/// Skips tokens until the parenthesis depth drops below the current level.
///
/// Used for lax parsing of trailing fields (body-structure extensions).
/// Quoted strings and literals are single tokens, so parens inside them do
/// not confuse the depth count. The closing `RParen` is consumed.
pub fn skip_to_close_paren(lexer: &mut Lexer<'_>) -> Result<()> {
    let mut depth = 0u32;
    loop {
        match lexer.next_token()? {
            Token::LParen => depth += 1,
            Token::RParen => {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            }
            Token::Eof | Token::Crlf => {
                return Err(Error::parse(lexer.position(), "unbalanced parentheses"));
            }
            _ => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn flag_list_preserves_case() {
        let mut lexer = Lexer::new(b"(\\Seen \\Flagged $Label)");
        assert_eq!(
            parse_flag_list(&mut lexer).unwrap(),
            vec!["\\Seen", "\\Flagged", "$Label"]
        );
    }

    #[test]
    fn empty_flag_list() {
        let mut lexer = Lexer::new(b"()");
        assert!(parse_flag_list(&mut lexer).unwrap().is_empty());
    }

    #[test]
    fn uid_set_expansion() {
        assert_eq!(expand_uid_set("4:7,9,12"), vec![4, 5, 6, 7, 9, 12]);
        assert_eq!(expand_uid_set("304:307,309,312"), vec![
            304, 305, 306, 307, 309, 312
        ]);
        assert_eq!(expand_uid_set("5"), vec![5]);
        assert_eq!(expand_uid_set("7:5"), vec![5, 6, 7]);
    }

    #[test]
    fn uid_set_malformed_is_empty() {
        assert_eq!(expand_uid_set("4:x"), Vec::<u32>::new());
        assert_eq!(expand_uid_set("a,b"), Vec::<u32>::new());
        assert_eq!(expand_uid_set("1,,3"), Vec::<u32>::new());
    }

    #[test]
    fn status_code_permanentflags() {
        let mut lexer = Lexer::new(b"[PERMANENTFLAGS (\\Deleted \\Seen \\*)] Limited");
        let action = parse_status_code(&mut lexer).unwrap();
        assert_eq!(
            action,
            Some(Action::PermanentFlags(vec![
                "\\DELETED".to_string(),
                "\\SEEN".to_string(),
                "\\*".to_string(),
            ]))
        );
    }

    #[test]
    fn status_code_uidnext() {
        let mut lexer = Lexer::new(b"[UIDNEXT 4392] Predicted next UID");
        assert_eq!(
            parse_status_code(&mut lexer).unwrap(),
            Some(Action::UidNext(4392))
        );
    }

    #[test]
    fn status_code_unknown_is_skipped() {
        let mut lexer = Lexer::new(b"[HIGHESTMODSEQ 715194045007] ok");
        assert_eq!(parse_status_code(&mut lexer).unwrap(), None);
        // Positioned after the bracket, before the text.
        assert_eq!(lexer.peek(), Some(b' '));
    }

    #[test]
    fn status_code_copyuid() {
        let mut lexer = Lexer::new(b"[COPYUID 38675294 4:7,9,12 304:307,309,312] Copy completed");
        let action = parse_status_code(&mut lexer).unwrap();
        assert_eq!(
            action,
            Some(Action::CopyUid(CopyUid {
                validity: 38_675_294,
                src: vec![4, 5, 6, 7, 9, 12],
                dst: vec![304, 305, 306, 307, 309, 312],
            }))
        );
    }

    #[test]
    fn list_entry_basic() {
        let mut lexer = Lexer::new(b"(\\HasNoChildren) \"/\" \"INBOX/Receipts\"");
        let entry = parse_list_entry(&mut lexer).unwrap();
        assert_eq!(entry.flags, vec!["\\HASNOCHILDREN"]);
        assert_eq!(entry.delimiter, Some('/'));
        assert_eq!(entry.name, "INBOX/Receipts");
    }

    #[test]
    fn list_entry_nil_delimiter_and_atom_name() {
        let mut lexer = Lexer::new(b"() NIL Archive");
        let entry = parse_list_entry(&mut lexer).unwrap();
        assert_eq!(entry.delimiter, None);
        assert_eq!(entry.name, "Archive");
    }

    #[test]
    fn list_entry_literal_name() {
        let mut lexer = Lexer::new(b"() \".\" {7}\r\nDrafts2");
        let entry = parse_list_entry(&mut lexer).unwrap();
        assert_eq!(entry.name, "Drafts2");
    }

    #[test]
    fn rfc5322_date_with_zone_comment() {
        let dt = parse_rfc5322_date("Wed, 17 Jul 1996 02:23:25 -0700 (PDT)").unwrap();
        assert_eq!(dt.to_rfc3339(), "1996-07-17T09:23:25+00:00");
    }

    #[test]
    fn rfc5322_date_plain() {
        let dt = parse_rfc5322_date("Thu, 15 Jan 2026 19:31:43 +0000").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-01-15T19:31:43+00:00");
    }

    #[test]
    fn rfc5322_date_garbage_is_none() {
        assert!(parse_rfc5322_date("not a date").is_none());
        assert!(parse_rfc5322_date("").is_none());
    }

    #[test]
    fn skip_to_close_handles_nesting() {
        let mut lexer = Lexer::new(b"(\"BOUNDARY\" \"b(1)\") NIL NIL) tail");
        // Consume the open paren of the params list first.
        assert_eq!(lexer.next_token().unwrap(), Token::LParen);
        skip_to_close_paren(&mut lexer).unwrap(); // params list
        skip_to_close_paren(&mut lexer).unwrap(); // enclosing list
        assert_eq!(lexer.remaining(), b" tail");
    }
}
