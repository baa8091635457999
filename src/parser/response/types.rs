//! Parsed response data types.
//!
//! Every server event the parser can produce is a variant of [`Action`];
//! shapes the parser does not understand become [`Action::Unparsed`] so the
//! session layer can log and move on.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Response status keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command completed successfully.
    Ok,
    /// Command failed.
    No,
    /// Command was malformed or inappropriate.
    Bad,
}

/// A discrete semantic event produced from one response packet.
///
/// A packet yields an ordered list of actions; notably a FETCH response
/// yields one [`Action::Fetch`] per message attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// `CAPABILITY` tokens, upper-cased.
    Capabilities(Vec<String>),
    /// `FLAGS (...)` applicable-flag list, upper-cased.
    ApplicableFlags(Vec<String>),
    /// `[PERMANENTFLAGS (...)]` status code, upper-cased.
    PermanentFlags(Vec<String>),
    /// `[UNSEEN n]` status code: first unseen sequence number.
    FirstUnseen(u32),
    /// `[UIDVALIDITY n]` status code.
    UidValidity(u32),
    /// `[UIDNEXT n]` status code.
    UidNext(u32),
    /// `<n> EXISTS`: mailbox message count.
    Exists(u32),
    /// `<n> RECENT`: recent message count.
    Recent(u32),
    /// `<n> EXPUNGE`: message removed at sequence number n.
    Expunge(u32),
    /// One `LIST` result line.
    ListEntry(ListEntry),
    /// `[COPYUID validity src dst]` with both sets expanded.
    CopyUid(CopyUid),
    /// One attribute of a `FETCH` response for sequence number `seq`.
    Fetch {
        /// Message sequence number.
        seq: u32,
        /// The parsed attribute.
        attr: FetchAttr,
    },
    /// Tagged command completion.
    Tagged {
        /// Numeric tag previously assigned by the dispatcher.
        tag: u32,
        /// Completion status.
        status: Status,
        /// Remaining response text, bracketed code included.
        text: String,
    },
    /// `+` continuation request.
    Continuation,
    /// Untagged `BYE`: the server is closing the connection.
    Bye(String),
    /// A response shape the parser does not understand; logged, not fatal.
    Unparsed(Vec<u8>),
}

/// One mailbox from a `LIST` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Mailbox name (parsed as an astring).
    pub name: String,
    /// Hierarchy delimiter, if any.
    pub delimiter: Option<char>,
    /// Name attributes such as `\HasChildren`, upper-cased.
    pub flags: Vec<String>,
}

/// Expanded `COPYUID` response code payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyUid {
    /// UIDVALIDITY of the destination mailbox.
    pub validity: u32,
    /// Source UIDs, ranges expanded inclusively.
    pub src: Vec<u32>,
    /// Destination UIDs, ranges expanded inclusively.
    pub dst: Vec<u32>,
}

/// One attribute from a FETCH msg-att list.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchAttr {
    /// Raw flag tokens, case preserved.
    Flags(Vec<String>),
    /// Message UID.
    Uid(u32),
    /// Parsed envelope.
    Envelope(Box<Envelope>),
    /// Parsed body structure tree.
    BodyStructure(BodyStructure),
    /// `BODY[path]` part content; an empty path on the wire means `[1]`.
    BodyContent {
        /// Dotted numeric part path.
        path: Vec<u32>,
        /// Raw (still transfer-encoded) content, `None` for NIL.
        data: Option<Vec<u8>>,
    },
}

/// An address from an envelope address list.
///
/// The mailbox and host are normalized to lower case when the address is
/// parsed; the display name keeps its original case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Display name, if present.
    pub name: Option<String>,
    /// `mailbox@host`, lower-cased.
    pub email: String,
}

/// Message envelope from a FETCH ENVELOPE attribute.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    /// Date header normalized to UTC; `None` for NIL or unparseable dates.
    pub date: Option<DateTime<Utc>>,
    /// Subject header.
    pub subject: Option<String>,
    /// From addresses.
    pub from: Vec<Address>,
    /// Sender addresses.
    pub sender: Vec<Address>,
    /// Reply-To addresses.
    pub reply_to: Vec<Address>,
    /// To addresses.
    pub to: Vec<Address>,
    /// Cc addresses.
    pub cc: Vec<Address>,
    /// Bcc addresses.
    pub bcc: Vec<Address>,
    /// In-Reply-To header.
    pub in_reply_to: Option<String>,
    /// Message-ID header.
    pub message_id: Option<String>,
}

/// Content transfer encoding declared in a body structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7BIT (identity).
    SevenBit,
    /// 8BIT (identity).
    EightBit,
    /// BINARY (identity).
    Binary,
    /// BASE64.
    Base64,
    /// QUOTED-PRINTABLE.
    QuotedPrintable,
    /// Anything else, preserved verbatim.
    Other(String),
}

impl TransferEncoding {
    /// Parses an encoding token, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "7BIT" => Self::SevenBit,
            "8BIT" => Self::EightBit,
            "BINARY" => Self::Binary,
            "BASE64" => Self::Base64,
            "QUOTED-PRINTABLE" => Self::QuotedPrintable,
            _ => Self::Other(s.to_string()),
        }
    }
}

/// Body structure tree from a FETCH BODY/BODYSTRUCTURE attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyStructure {
    /// A single body part.
    Onepart {
        /// `type/subtype`, lower-cased.
        mime_type: String,
        /// Body parameters (e.g. charset), keys lower-cased.
        params: BTreeMap<String, String>,
        /// Content transfer encoding.
        encoding: TransferEncoding,
    },
    /// A multipart container.
    Multipart {
        /// Child parts in order.
        children: Vec<BodyStructure>,
    },
}

impl BodyStructure {
    /// Enumerates every leaf part path.
    ///
    /// A onepart is addressable as `[1]`; a multipart expands to the dotted
    /// root-to-leaf indices of its leaves (1-based at every level), fully
    /// recursively.
    #[must_use]
    pub fn leaf_paths(&self) -> Vec<Vec<u32>> {
        match self {
            Self::Onepart { .. } => vec![vec![1]],
            Self::Multipart { children } => {
                let mut paths = Vec::new();
                let mut prefix = Vec::new();
                collect_leaf_paths(children, &mut prefix, &mut paths);
                paths
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn collect_leaf_paths(children: &[BodyStructure], prefix: &mut Vec<u32>, out: &mut Vec<Vec<u32>>) {
    for (i, child) in children.iter().enumerate() {
        prefix.push(i as u32 + 1);
        match child {
            BodyStructure::Onepart { .. } => out.push(prefix.clone()),
            BodyStructure::Multipart { children } => collect_leaf_paths(children, prefix, out),
        }
        prefix.pop();
    }
}
