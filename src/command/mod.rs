//! IMAP command construction and serialization.

mod serialize;
mod tag;

pub use tag::TagSequence;

use crate::Result;

use serialize::{write_astring, write_fetch_items};

/// One fetchable attribute, as rendered into a FETCH command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItem {
    /// `FLAGS`.
    Flags,
    /// `ENVELOPE`.
    Envelope,
    /// `BODY` (the non-extension body structure form).
    Body,
    /// `BODY.PEEK[path]` for one part.
    BodyPeek(Vec<u32>),
}

/// An IMAP command this client can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// CAPABILITY.
    Capability,
    /// NOOP.
    Noop,
    /// LOGOUT.
    Logout,
    /// STARTTLS.
    StartTls,
    /// LOGIN with quoted credentials.
    Login {
        /// Account name.
        username: String,
        /// Account password.
        password: String,
    },
    /// SELECT a mailbox.
    Select {
        /// Mailbox name.
        mailbox: String,
    },
    /// LIST mailboxes.
    List {
        /// Reference name.
        reference: String,
        /// Mailbox pattern.
        pattern: String,
    },
    /// CREATE a mailbox.
    Create {
        /// Mailbox name.
        mailbox: String,
    },
    /// COPY messages to another mailbox.
    Copy {
        /// Sequence numbers, rendered comma-separated.
        seqs: Vec<u32>,
        /// Destination mailbox.
        mailbox: String,
    },
    /// MOVE messages to another mailbox.
    Move {
        /// Sequence numbers, rendered comma-separated.
        seqs: Vec<u32>,
        /// Destination mailbox.
        mailbox: String,
    },
    /// FETCH attributes for one sequence number.
    Fetch {
        /// Message sequence number.
        seq: u32,
        /// Attributes to fetch.
        items: Vec<FetchItem>,
    },
    /// IDLE.
    Idle,
    /// DONE, terminating an IDLE. Sent without a tag.
    Done,
}

impl Command {
    /// Serializes the command with the given numeric tag, CRLF included.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CommandSyntax`] if a string argument contains
    /// CR or LF.
    pub fn serialize(&self, tag: u32) -> Result<Vec<u8>> {
        let mut buf = Vec::new();

        if !matches!(self, Self::Done) {
            buf.extend_from_slice(tag.to_string().as_bytes());
            buf.push(b' ');
        }

        match self {
            Self::Capability => buf.extend_from_slice(b"CAPABILITY"),
            Self::Noop => buf.extend_from_slice(b"NOOP"),
            Self::Logout => buf.extend_from_slice(b"LOGOUT"),
            Self::StartTls => buf.extend_from_slice(b"STARTTLS"),
            Self::Idle => buf.extend_from_slice(b"IDLE"),
            Self::Done => buf.extend_from_slice(b"DONE"),

            Self::Login { username, password } => {
                buf.extend_from_slice(b"LOGIN ");
                write_astring(&mut buf, username)?;
                buf.push(b' ');
                write_astring(&mut buf, password)?;
            }

            Self::Select { mailbox } => {
                buf.extend_from_slice(b"SELECT ");
                write_astring(&mut buf, mailbox)?;
            }

            Self::List { reference, pattern } => {
                buf.extend_from_slice(b"LIST ");
                write_astring(&mut buf, reference)?;
                buf.push(b' ');
                write_astring(&mut buf, pattern)?;
            }

            Self::Create { mailbox } => {
                buf.extend_from_slice(b"CREATE ");
                write_astring(&mut buf, mailbox)?;
            }

            Self::Copy { seqs, mailbox } => {
                buf.extend_from_slice(b"COPY ");
                write_seq_list(&mut buf, seqs);
                buf.push(b' ');
                write_astring(&mut buf, mailbox)?;
            }

            Self::Move { seqs, mailbox } => {
                buf.extend_from_slice(b"MOVE ");
                write_seq_list(&mut buf, seqs);
                buf.push(b' ');
                write_astring(&mut buf, mailbox)?;
            }

            Self::Fetch { seq, items } => {
                buf.extend_from_slice(b"FETCH ");
                buf.extend_from_slice(seq.to_string().as_bytes());
                buf.push(b' ');
                write_fetch_items(&mut buf, items);
            }
        }

        buf.extend_from_slice(b"\r\n");
        Ok(buf)
    }

    /// Returns a log-safe rendering of the command name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Capability => "CAPABILITY",
            Self::Noop => "NOOP",
            Self::Logout => "LOGOUT",
            Self::StartTls => "STARTTLS",
            Self::Login { .. } => "LOGIN",
            Self::Select { .. } => "SELECT",
            Self::List { .. } => "LIST",
            Self::Create { .. } => "CREATE",
            Self::Copy { .. } => "COPY",
            Self::Move { .. } => "MOVE",
            Self::Fetch { .. } => "FETCH",
            Self::Idle => "IDLE",
            Self::Done => "DONE",
        }
    }
}

fn write_seq_list(buf: &mut Vec<u8>, seqs: &[u32]) {
    for (i, seq) in seqs.iter().enumerate() {
        if i > 0 {
            buf.push(b',');
        }
        buf.extend_from_slice(seq.to_string().as_bytes());
    }
}
