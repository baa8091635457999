//! IMAP response parser.
//!
//! Maps one framed packet onto an ordered list of [`Action`]s. The parser is
//! stateless and never applies actions to session state; unknown untagged
//! shapes surface as [`Action::Unparsed`] for the session layer to log.

mod fetch;
mod helpers;
mod types;

pub use types::{
    Action, Address, BodyStructure, CopyUid, Envelope, FetchAttr, ListEntry, Status,
    TransferEncoding,
};

use crate::parser::lexer::{Lexer, Token};
use crate::{Error, Result};

use helpers::{parse_flag_list, parse_list_entry, parse_status_code, read_text_until_crlf};

/// Stateless packet parser.
pub struct ResponseParser;

impl ResponseParser {
    /// Parses one complete response packet into its actions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] when a shape the parser attempted does not
    /// match the grammar; callers treat this as fatal for the session.
    pub fn parse(input: &[u8]) -> Result<Vec<Action>> {
        let mut lexer = Lexer::new(input);

        match lexer.next_token()? {
            Token::Asterisk => Self::parse_untagged(&mut lexer, input),
            Token::Plus => Ok(vec![Action::Continuation]),
            Token::Number(tag) => Self::parse_tagged(&mut lexer, tag),
            token => Err(Error::parse(
                0,
                format!("expected *, +, or numeric tag, got {token:?}"),
            )),
        }
    }

    /// Parses `<tag> <status> <text>`.
    ///
    /// A `[COPYUID ...]` code in the text additionally yields a
    /// [`Action::CopyUid`] ahead of the tagged action; the text itself keeps
    /// the bracketed code so callers can inspect codes like `[READ-ONLY]`.
    fn parse_tagged(lexer: &mut Lexer<'_>, tag: u32) -> Result<Vec<Action>> {
        lexer.expect_space()?;
        let status = Self::parse_status(lexer)?;
        lexer.expect_space()?;
        let text = read_text_until_crlf(lexer);

        let mut actions = Vec::new();
        if text.len() > 1 && text.starts_with('[') {
            let mut code_lexer = Lexer::new(text.as_bytes());
            if let Ok(Some(action @ Action::CopyUid(_))) = parse_status_code(&mut code_lexer) {
                actions.push(action);
            }
        }
        actions.push(Action::Tagged { tag, status, text });

        Ok(actions)
    }

    /// Parses the untagged response shapes.
    fn parse_untagged(lexer: &mut Lexer<'_>, input: &[u8]) -> Result<Vec<Action>> {
        lexer.expect_space()?;

        match lexer.next_token()? {
            Token::Atom(keyword) => {
                let upper = keyword.to_uppercase();
                match upper.as_str() {
                    "OK" | "NO" | "BAD" | "PREAUTH" => {
                        lexer.expect_space()?;
                        Ok(Self::parse_untagged_status(lexer))
                    }
                    "BYE" => {
                        lexer.expect_space()?;
                        Ok(vec![Action::Bye(read_text_until_crlf(lexer))])
                    }
                    "CAPABILITY" => {
                        let mut caps = Vec::new();
                        while lexer.peek() == Some(b' ') {
                            lexer.advance();
                            if let Token::Atom(s) = lexer.next_token()? {
                                caps.push(s.to_uppercase());
                            }
                        }
                        Ok(vec![Action::Capabilities(caps)])
                    }
                    "FLAGS" => {
                        lexer.expect_space()?;
                        let flags = parse_flag_list(lexer)?
                            .into_iter()
                            .map(|f| f.to_uppercase())
                            .collect();
                        Ok(vec![Action::ApplicableFlags(flags)])
                    }
                    "LIST" => {
                        lexer.expect_space()?;
                        Ok(vec![Action::ListEntry(parse_list_entry(lexer)?)])
                    }
                    _ => Ok(vec![Action::Unparsed(input.to_vec())]),
                }
            }
            Token::Number(n) => {
                lexer.expect_space()?;
                let keyword = lexer.read_atom_string()?;
                match keyword.to_uppercase().as_str() {
                    "EXISTS" => Ok(vec![Action::Exists(n)]),
                    "RECENT" => Ok(vec![Action::Recent(n)]),
                    "EXPUNGE" => Ok(vec![Action::Expunge(n)]),
                    "FETCH" => {
                        lexer.expect_space()?;
                        let attrs = fetch::parse_fetch_attrs(lexer)?;
                        Ok(attrs
                            .into_iter()
                            .map(|attr| Action::Fetch { seq: n, attr })
                            .collect())
                    }
                    _ => Ok(vec![Action::Unparsed(input.to_vec())]),
                }
            }
            _ => Ok(vec![Action::Unparsed(input.to_vec())]),
        }
    }

    /// Parses the remainder of an untagged OK/NO/BAD/PREAUTH.
    ///
    /// A recognized bracketed code yields its action; everything else on the
    /// line is ignored.
    fn parse_untagged_status(lexer: &mut Lexer<'_>) -> Vec<Action> {
        if lexer.peek() == Some(b'[')
            && let Ok(Some(action)) = parse_status_code(lexer)
        {
            return vec![action];
        }
        Vec::new()
    }

    fn parse_status(lexer: &mut Lexer<'_>) -> Result<Status> {
        let s = lexer.read_atom_string()?;
        match s.to_uppercase().as_str() {
            "OK" => Ok(Status::Ok),
            "NO" => Ok(Status::No),
            "BAD" => Ok(Status::Bad),
            _ => Err(Error::parse(
                lexer.position(),
                format!("invalid status: {s}"),
            )),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn capability_line() {
        let input =
            b"* CAPABILITY IMAP4rev1 SASL-IR LOGIN-REFERRALS ID ENABLE IDLE LITERAL+ AUTH=PLAIN\r\n";
        let actions = ResponseParser::parse(input).unwrap();
        assert_eq!(actions, vec![Action::Capabilities(vec![
            "IMAP4REV1".to_string(),
            "SASL-IR".to_string(),
            "LOGIN-REFERRALS".to_string(),
            "ID".to_string(),
            "ENABLE".to_string(),
            "IDLE".to_string(),
            "LITERAL+".to_string(),
            "AUTH=PLAIN".to_string(),
        ])]);
    }

    #[test]
    fn tagged_ok() {
        let actions = ResponseParser::parse(b"123 OK CAPABILITY completed\r\n").unwrap();
        assert_eq!(actions, vec![Action::Tagged {
            tag: 123,
            status: Status::Ok,
            text: "CAPABILITY completed".to_string(),
        }]);
    }

    #[test]
    fn tagged_no_and_bad() {
        let actions = ResponseParser::parse(b"7 NO [ALERT] quota exceeded\r\n").unwrap();
        assert_eq!(actions, vec![Action::Tagged {
            tag: 7,
            status: Status::No,
            text: "[ALERT] quota exceeded".to_string(),
        }]);

        let actions = ResponseParser::parse(b"8 BAD Expected DONE\r\n").unwrap();
        assert_eq!(actions, vec![Action::Tagged {
            tag: 8,
            status: Status::Bad,
            text: "Expected DONE".to_string(),
        }]);
    }

    #[test]
    fn non_numeric_tag_is_rejected() {
        assert!(ResponseParser::parse(b"A001 OK done\r\n").is_err());
    }

    #[test]
    fn permanentflags_status_code() {
        let actions =
            ResponseParser::parse(b"* OK [PERMANENTFLAGS (\\Deleted \\Seen \\*)] Limited\r\n")
                .unwrap();
        assert_eq!(actions, vec![Action::PermanentFlags(vec![
            "\\DELETED".to_string(),
            "\\SEEN".to_string(),
            "\\*".to_string(),
        ])]);
    }

    #[test]
    fn copyuid_expansion() {
        let actions = ResponseParser::parse(
            b"* OK [COPYUID 38675294 4:7,9,12 304:307,309,312] Copy completed\r\n",
        )
        .unwrap();
        assert_eq!(actions, vec![Action::CopyUid(CopyUid {
            validity: 38_675_294,
            src: vec![4, 5, 6, 7, 9, 12],
            dst: vec![304, 305, 306, 307, 309, 312],
        })]);
    }

    #[test]
    fn tagged_ok_with_copyuid_yields_both_actions() {
        let actions =
            ResponseParser::parse(b"42 OK [COPYUID 1022 3 17] Move completed\r\n").unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(
            actions[0],
            Action::CopyUid(CopyUid {
                validity: 1022,
                src: vec![3],
                dst: vec![17],
            })
        );
        assert!(matches!(actions[1], Action::Tagged {
            tag: 42,
            status: Status::Ok,
            ..
        }));
    }

    #[test]
    fn plain_untagged_ok_yields_nothing() {
        let actions = ResponseParser::parse(b"* OK still here\r\n").unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn exists_recent_expunge() {
        assert_eq!(ResponseParser::parse(b"* 23 EXISTS\r\n").unwrap(), vec![
            Action::Exists(23)
        ]);
        assert_eq!(ResponseParser::parse(b"* 5 RECENT\r\n").unwrap(), vec![
            Action::Recent(5)
        ]);
        assert_eq!(ResponseParser::parse(b"* 44 EXPUNGE\r\n").unwrap(), vec![
            Action::Expunge(44)
        ]);
    }

    #[test]
    fn applicable_flags_upper_cased() {
        let actions = ResponseParser::parse(b"* FLAGS (\\Answered \\Seen $Fwd)\r\n").unwrap();
        assert_eq!(actions, vec![Action::ApplicableFlags(vec![
            "\\ANSWERED".to_string(),
            "\\SEEN".to_string(),
            "$FWD".to_string(),
        ])]);
    }

    #[test]
    fn list_entry() {
        let actions =
            ResponseParser::parse(b"* LIST (\\HasChildren) \"/\" \"Work/Reports\"\r\n").unwrap();
        assert_eq!(actions, vec![Action::ListEntry(ListEntry {
            name: "Work/Reports".to_string(),
            delimiter: Some('/'),
            flags: vec!["\\HASCHILDREN".to_string()],
        })]);
    }

    #[test]
    fn fetch_yields_one_action_per_attribute() {
        let input = b"* 12 FETCH (FLAGS (\\Seen) ENVELOPE (\"Wed, 17 Jul 1996 02:23:25 -0700 (PDT)\" \"IMAP4rev1 WG mtg summary and minutes\" ((\"Terry Gray\" NIL \"gray\" \"cac.washington.edu\")) ((\"Terry Gray\" NIL \"gray\" \"cac.washington.edu\")) ((\"Terry Gray\" NIL \"gray\" \"cac.washington.edu\")) ((NIL NIL \"imap\" \"cac.washington.edu\")) ((NIL NIL \"minutes\" \"CNRI.Reston.VA.US\")(\"John Klensin\" NIL \"KLENSIN\" \"MIT.EDU\")) NIL NIL \"<B27397-0100000@cac.washington.edu>\"))\r\n";
        let actions = ResponseParser::parse(input).unwrap();
        assert_eq!(actions.len(), 2);

        let Action::Fetch {
            seq: 12,
            attr: FetchAttr::Flags(flags),
        } = &actions[0]
        else {
            panic!("expected flags action, got {:?}", actions[0]);
        };
        assert_eq!(flags, &["\\Seen".to_string()]);

        let Action::Fetch {
            seq: 12,
            attr: FetchAttr::Envelope(env),
        } = &actions[1]
        else {
            panic!("expected envelope action, got {:?}", actions[1]);
        };
        assert_eq!(env.date.unwrap().to_rfc3339(), "1996-07-17T09:23:25+00:00");
        assert_eq!(env.from[0].email, "gray@cac.washington.edu");
        assert_eq!(env.cc[1].email, "klensin@mit.edu");
        assert_eq!(
            env.message_id.as_deref(),
            Some("<B27397-0100000@cac.washington.edu>")
        );
    }

    #[test]
    fn fetch_body_content_after_literal_framing() {
        // The framer delivers the literal inline; the parser sees one packet.
        let input = b"* 2 FETCH (BODY[1] {14}\r\nHello 123\r\n456)\r\n";
        let actions = ResponseParser::parse(input).unwrap();
        assert_eq!(actions, vec![Action::Fetch {
            seq: 2,
            attr: FetchAttr::BodyContent {
                path: vec![1],
                data: Some(b"Hello 123\r\n456".to_vec()),
            },
        }]);
    }

    #[test]
    fn continuation() {
        assert_eq!(ResponseParser::parse(b"+ idling\r\n").unwrap(), vec![
            Action::Continuation
        ]);
    }

    #[test]
    fn bye() {
        assert_eq!(
            ResponseParser::parse(b"* BYE Autologout; idle for too long\r\n").unwrap(),
            vec![Action::Bye("Autologout; idle for too long".to_string())]
        );
    }

    #[test]
    fn unknown_untagged_shape_is_unparsed() {
        let input = b"* NAMESPACE ((\"\" \"/\")) NIL NIL\r\n";
        let actions = ResponseParser::parse(input).unwrap();
        assert_eq!(actions, vec![Action::Unparsed(input.to_vec())]);
    }

    #[test]
    fn malformed_fetch_aborts_packet() {
        assert!(ResponseParser::parse(b"* 3 FETCH (FLAGS \\Seen)\r\n").is_err());
        assert!(ResponseParser::parse(b"* 3 FETCH (UID)\r\n").is_err());
    }
}
