//! Session phases, mailbox snapshot, and the tag correlation table.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::message::FetchStage;
use crate::parser::{CopyUid, ListEntry};
use crate::{Error, Result};

/// Connection lifecycle phase.
///
/// `Steady` is the only phase in which a mailbox is selected and the fetch
/// pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the server greeting.
    Greeting,
    /// Pre-authentication CAPABILITY in flight.
    CapabilityUnauth,
    /// STARTTLS requested; handshake pending on its tagged OK.
    UpgradingTls,
    /// LOGIN in flight.
    LoggingIn,
    /// Post-authentication CAPABILITY in flight.
    CapabilityAuth,
    /// SELECT in flight.
    Selecting,
    /// Selected and watching; idling or briefly fetching.
    Steady,
}

/// Mailbox mutability reported by SELECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    /// Flags changes will persist.
    #[default]
    ReadWrite,
    /// The mailbox was selected `[READ-ONLY]`.
    ReadOnly,
}

/// Snapshot of the selected mailbox, mutated only by parser actions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxSnapshot {
    /// UIDVALIDITY of the mailbox generation.
    pub uid_validity: Option<u32>,
    /// Predicted next UID.
    pub uid_next: Option<u32>,
    /// Message count.
    pub exists: u32,
    /// Recent message count.
    pub recent: u32,
    /// Sequence number of the first unseen message.
    pub first_unseen: Option<u32>,
    /// Flags that can be changed permanently.
    pub permanent_flags: Vec<String>,
    /// Flags applicable in this mailbox.
    pub applicable_flags: Vec<String>,
}

/// Reply channel for a user-requested command.
pub type Reply<T> = oneshot::Sender<Result<T>>;

/// What to do when the tagged response for a command arrives.
///
/// The state machine's transition function is a single match on this variant
/// plus the arrived status.
pub enum TagKind {
    /// CAPABILITY during setup.
    Capability {
        /// True for the post-LOGIN capability refresh.
        post_auth: bool,
    },
    /// STARTTLS; OK triggers the TLS handshake.
    StartTls,
    /// LOGIN.
    Login,
    /// SELECT of the watched mailbox.
    Select,
    /// A fetch pipeline stage for one message.
    Fetch {
        /// Sequence number the fetch targets (renumbered on EXPUNGE).
        seq: u32,
        /// Stage the message enters when this command completes.
        next_stage: FetchStage,
    },
    /// IDLE; completes after DONE is written.
    Idle,
    /// NOOP keep-alive poll.
    Noop,
    /// User-requested LIST, accumulating entries until completion.
    List {
        /// Reply channel.
        reply: Reply<Vec<ListEntry>>,
        /// Entries collected from untagged LIST lines.
        entries: Vec<ListEntry>,
    },
    /// User-requested CREATE.
    Create {
        /// Reply channel.
        reply: Reply<()>,
    },
    /// User-requested COPY or MOVE, capturing a COPYUID if reported.
    Copy {
        /// Reply channel.
        reply: Reply<Option<CopyUid>>,
        /// COPYUID captured from the response, if any.
        copyuid: Option<CopyUid>,
    },
    /// LOGOUT during shutdown.
    Logout,
    /// A fetch whose message was expunged mid-flight; the result is dropped.
    Discarded,
}

impl std::fmt::Debug for TagKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Capability { post_auth: false } => "Capability",
            Self::Capability { post_auth: true } => "CapabilityPostAuth",
            Self::StartTls => "StartTls",
            Self::Login => "Login",
            Self::Select => "Select",
            Self::Fetch { .. } => "Fetch",
            Self::Idle => "Idle",
            Self::Noop => "Noop",
            Self::List { .. } => "List",
            Self::Create { .. } => "Create",
            Self::Copy { .. } => "Copy",
            Self::Logout => "Logout",
            Self::Discarded => "Discarded",
        };
        f.write_str(name)
    }
}

/// One outstanding command awaiting its tagged response.
#[derive(Debug)]
pub struct TagEntry {
    /// Command name, for diagnostics. Never includes arguments.
    pub command: &'static str,
    /// Completion disposition.
    pub kind: TagKind,
}

/// Table of outstanding tags.
///
/// An entry lives from command send until its tagged response arrives, at
/// which point it is removed and dispatched exactly once.
#[derive(Debug, Default)]
pub struct TagTable {
    entries: HashMap<u32, TagEntry>,
}

impl TagTable {
    /// Installs an entry for a freshly sent command.
    pub fn insert(&mut self, tag: u32, command: &'static str, kind: TagKind) {
        self.entries.insert(tag, TagEntry { command, kind });
    }

    /// Removes and returns the entry for an arrived tagged response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for a tag this session never issued or
    /// already completed.
    pub fn complete(&mut self, tag: u32) -> Result<TagEntry> {
        self.entries
            .remove(&tag)
            .ok_or_else(|| Error::Protocol(format!("tagged response for unknown tag {tag}")))
    }

    /// Returns the number of outstanding tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no tags are outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renumbers in-flight fetch tags after an EXPUNGE of `expunged`.
    ///
    /// A fetch aimed at the expunged message is marked [`TagKind::Discarded`];
    /// fetches aimed at higher sequence numbers shift down by one, following
    /// the index renumbering.
    pub fn renumber_after_expunge(&mut self, expunged: u32) {
        for entry in self.entries.values_mut() {
            if let TagKind::Fetch { seq, .. } = &mut entry.kind {
                if *seq == expunged {
                    entry.kind = TagKind::Discarded;
                } else if *seq > expunged {
                    *seq -= 1;
                }
            }
        }
    }

    /// Drains every outstanding entry (shutdown path).
    pub fn drain(&mut self) -> Vec<TagEntry> {
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    /// Appends a LIST entry to the in-flight LIST accumulator, if any.
    pub fn push_list_entry(&mut self, entry: ListEntry) -> bool {
        for tag_entry in self.entries.values_mut() {
            if let TagKind::List { entries, .. } = &mut tag_entry.kind {
                entries.push(entry);
                return true;
            }
        }
        false
    }

    /// Records a COPYUID payload on the in-flight COPY/MOVE, if any.
    pub fn record_copyuid(&mut self, copyuid: CopyUid) -> bool {
        for tag_entry in self.entries.values_mut() {
            if let TagKind::Copy {
                copyuid: slot @ None,
                ..
            } = &mut tag_entry.kind
            {
                *slot = Some(copyuid);
                return true;
            }
        }
        false
    }
}
