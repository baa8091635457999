//! FETCH message-attribute parsing.
//!
//! Each attribute in the msg-att list becomes one [`FetchAttr`]. The
//! BODYSTRUCTURE grammar is fully recursive: a multipart whose first child is
//! itself a multipart nests without limit.

use std::collections::BTreeMap;

use crate::parser::lexer::{Lexer, Token};
use crate::{Error, Result};

use super::helpers::{parse_flag_list, parse_rfc5322_date, skip_to_close_paren};
use super::types::{Address, BodyStructure, Envelope, FetchAttr, TransferEncoding};

/// Parses the parenthesized msg-att list of a FETCH response.
pub fn parse_fetch_attrs(lexer: &mut Lexer<'_>) -> Result<Vec<FetchAttr>> {
    lexer.expect(Token::LParen)?;

    let mut attrs = Vec::new();
    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => continue,
            Token::Atom(name) => {
                let upper = name.to_uppercase();
                match upper.as_str() {
                    "FLAGS" => {
                        lexer.expect_space()?;
                        attrs.push(FetchAttr::Flags(parse_flag_list(lexer)?));
                    }
                    "UID" => {
                        lexer.expect_space()?;
                        attrs.push(FetchAttr::Uid(lexer.read_number()?));
                    }
                    "ENVELOPE" => {
                        lexer.expect_space()?;
                        attrs.push(FetchAttr::Envelope(Box::new(parse_envelope(lexer)?)));
                    }
                    "BODY" | "BODYSTRUCTURE" => {
                        if lexer.peek() == Some(b'[') {
                            attrs.push(parse_body_content(lexer)?);
                        } else {
                            lexer.expect_space()?;
                            attrs.push(FetchAttr::BodyStructure(parse_body_structure(lexer)?));
                        }
                    }
                    _ => skip_unknown_attr(lexer)?,
                }
            }
            token => {
                return Err(Error::parse(
                    lexer.position(),
                    format!("unexpected token in msg-att list: {token:?}"),
                ));
            }
        }
    }

    Ok(attrs)
}

/// Parses `[path] <nstring>` after a BODY attribute keyword.
///
/// An empty section (`BODY[]`) addresses part 1.
fn parse_body_content(lexer: &mut Lexer<'_>) -> Result<FetchAttr> {
    lexer.expect(Token::LBracket)?;

    let path = match lexer.next_token()? {
        Token::RBracket => vec![1],
        Token::Number(n) => {
            lexer.expect(Token::RBracket)?;
            vec![n]
        }
        Token::Atom(s) => {
            let path = parse_part_path(s)
                .ok_or_else(|| Error::parse(lexer.position(), "invalid body part path"))?;
            lexer.expect(Token::RBracket)?;
            path
        }
        token => {
            return Err(Error::parse(
                lexer.position(),
                format!("expected body part path, got {token:?}"),
            ));
        }
    };

    lexer.expect_space()?;
    let data = lexer.read_nstring_bytes()?;

    Ok(FetchAttr::BodyContent { path, data })
}

/// Parses a dotted numeric path like `1.3.2`.
fn parse_part_path(s: &str) -> Option<Vec<u32>> {
    s.split('.').map(|seg| seg.parse().ok()).collect()
}

/// Parses a body structure: onepart or multipart, decided by the first inner
/// token.
pub fn parse_body_structure(lexer: &mut Lexer<'_>) -> Result<BodyStructure> {
    lexer.expect(Token::LParen)?;

    if lexer.peek() == Some(b'(') {
        parse_multipart(lexer)
    } else {
        parse_onepart(lexer)
    }
}

/// Parses the children and subtype of a multipart; trailing extension fields
/// are skipped. The opening paren was already consumed.
fn parse_multipart(lexer: &mut Lexer<'_>) -> Result<BodyStructure> {
    let mut children = Vec::new();
    while lexer.peek() == Some(b'(') {
        children.push(parse_body_structure(lexer)?);
    }

    // media-subtype string, then optional extension fields up to the close.
    lexer.expect_space()?;
    let _subtype = lexer.read_astring()?;
    skip_to_close_paren(lexer)?;

    Ok(BodyStructure::Multipart { children })
}

/// Parses a onepart body: type, subtype, params, id, description, encoding,
/// octet count; anything after (line counts, extensions) is skipped. The
/// opening paren was already consumed.
fn parse_onepart(lexer: &mut Lexer<'_>) -> Result<BodyStructure> {
    let media_type = lexer.read_astring()?;
    lexer.expect_space()?;
    let media_subtype = lexer.read_astring()?;
    lexer.expect_space()?;

    let params = parse_body_params(lexer)?;
    lexer.expect_space()?;

    let _content_id = lexer.read_nstring()?;
    lexer.expect_space()?;
    let _description = lexer.read_nstring()?;
    lexer.expect_space()?;

    let encoding = TransferEncoding::parse(&lexer.read_astring()?);
    lexer.expect_space()?;
    let _octets = lexer.read_number()?;

    skip_to_close_paren(lexer)?;

    Ok(BodyStructure::Onepart {
        mime_type: format!(
            "{}/{}",
            media_type.to_lowercase(),
            media_subtype.to_lowercase()
        ),
        params,
        encoding,
    })
}

/// Parses a body parameter list: `("NAME" "value" ...)` or NIL.
fn parse_body_params(lexer: &mut Lexer<'_>) -> Result<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();

    match lexer.next_token()? {
        Token::Nil => return Ok(params),
        Token::LParen => {}
        token => {
            return Err(Error::parse(
                lexer.position(),
                format!("expected parameter list, got {token:?}"),
            ));
        }
    }

    loop {
        match lexer.next_token()? {
            Token::RParen => break,
            Token::Space => continue,
            Token::QuotedString(key) => {
                lexer.expect_space()?;
                let value = lexer.read_astring()?;
                params.insert(key.to_lowercase(), value);
            }
            Token::Atom(key) => {
                lexer.expect_space()?;
                let value = lexer.read_astring()?;
                params.insert(key.to_lowercase(), value);
            }
            token => {
                return Err(Error::parse(
                    lexer.position(),
                    format!("unexpected token in parameter list: {token:?}"),
                ));
            }
        }
    }

    Ok(params)
}

/// Parses the ten-field envelope structure.
pub fn parse_envelope(lexer: &mut Lexer<'_>) -> Result<Envelope> {
    lexer.expect(Token::LParen)?;

    let date = lexer.read_nstring()?;
    lexer.expect_space()?;
    let subject = lexer.read_nstring()?;
    lexer.expect_space()?;

    let from = parse_address_list(lexer)?;
    lexer.expect_space()?;
    let sender = parse_address_list(lexer)?;
    lexer.expect_space()?;
    let reply_to = parse_address_list(lexer)?;
    lexer.expect_space()?;
    let to = parse_address_list(lexer)?;
    lexer.expect_space()?;
    let cc = parse_address_list(lexer)?;
    lexer.expect_space()?;
    let bcc = parse_address_list(lexer)?;
    lexer.expect_space()?;

    let in_reply_to = lexer.read_nstring()?;
    lexer.expect_space()?;
    let message_id = lexer.read_nstring()?;

    lexer.expect(Token::RParen)?;

    Ok(Envelope {
        date: date.as_deref().and_then(parse_rfc5322_date),
        subject,
        from,
        sender,
        reply_to,
        to,
        cc,
        bcc,
        in_reply_to,
        message_id,
    })
}

/// Parses an address list: NIL or `((name adl mailbox host) ...)`.
///
/// Addresses missing the mailbox or host (group markers, malformed entries)
/// are dropped.
fn parse_address_list(lexer: &mut Lexer<'_>) -> Result<Vec<Address>> {
    match lexer.next_token()? {
        Token::Nil => Ok(Vec::new()),
        Token::LParen => {
            let mut addresses = Vec::new();
            loop {
                match lexer.peek() {
                    Some(b')') => {
                        lexer.advance();
                        break;
                    }
                    Some(b'(') => {
                        if let Some(addr) = parse_address(lexer)? {
                            addresses.push(addr);
                        }
                    }
                    Some(b' ') => {
                        lexer.advance();
                    }
                    _ => {
                        return Err(Error::parse(
                            lexer.position(),
                            "address list missing inner tuple",
                        ));
                    }
                }
            }
            Ok(addresses)
        }
        token => Err(Error::parse(
            lexer.position(),
            format!("expected address list, got {token:?}"),
        )),
    }
}

/// Parses one `(name adl mailbox host)` tuple into `(name, mailbox@host)`.
///
/// The mailbox and host are normalized to lower case.
fn parse_address(lexer: &mut Lexer<'_>) -> Result<Option<Address>> {
    lexer.expect(Token::LParen)?;

    let name = lexer.read_nstring()?;
    lexer.expect_space()?;
    let _adl = lexer.read_nstring()?;
    lexer.expect_space()?;
    let mailbox = lexer.read_nstring()?;
    lexer.expect_space()?;
    let host = lexer.read_nstring()?;

    lexer.expect(Token::RParen)?;

    Ok(match (mailbox, host) {
        (Some(m), Some(h)) => Some(Address {
            name,
            email: format!("{}@{}", m.to_lowercase(), h.to_lowercase()),
        }),
        _ => None,
    })
}

/// Skips the value of an attribute we do not model (RFC822.SIZE,
/// INTERNALDATE, MODSEQ, ...).
fn skip_unknown_attr(lexer: &mut Lexer<'_>) -> Result<()> {
    if lexer.peek() == Some(b' ') {
        lexer.advance();
    }

    match lexer.next_token()? {
        Token::LParen => skip_to_close_paren(lexer),
        Token::Eof | Token::Crlf => Err(Error::parse(
            lexer.position(),
            "truncated msg-att value",
        )),
        // Atom, number, string, literal, NIL: single-token values.
        _ => Ok(()),
    }
}
