//! Per-message fetch accumulation and delivery records.
//!
//! While a message is being fetched its data accumulates in a
//! [`PartialMessage`] keyed by sequence number in the [`MessageIndex`]. When
//! every stage has completed, the flat list of `(path, bytes)` body parts is
//! folded into a [`BodyContent`] tree mirroring the body structure, decoding
//! each leaf, and the result ships as a [`DeliveredMessage`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::mime::decode_transfer;
use crate::parser::{Address, BodyStructure, Envelope, FetchAttr};

/// Progress of the fetch pipeline for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchStage {
    /// Nothing requested yet.
    #[default]
    None,
    /// Filter attributes (flags/envelope) requested.
    Filter,
    /// Body structure and remaining metadata requested.
    PreBody,
    /// All body parts received; ready to assemble and deliver.
    Full,
}

/// Accumulated state for one in-flight message.
#[derive(Debug, Clone, Default)]
pub struct PartialMessage {
    /// Pipeline progress.
    pub stage: FetchStage,
    /// Raw flag tokens, once fetched.
    pub flags: Option<Vec<String>>,
    /// UID, if the server volunteered it.
    pub uid: Option<u32>,
    /// Envelope, once fetched.
    pub envelope: Option<Envelope>,
    /// Body structure, once fetched.
    pub body_structure: Option<BodyStructure>,
    /// Collected body parts keyed by dotted path.
    pub parts: Vec<(Vec<u32>, Vec<u8>)>,
}

impl PartialMessage {
    /// Applies one FETCH attribute to the accumulated state.
    pub fn apply(&mut self, attr: FetchAttr) {
        match attr {
            FetchAttr::Flags(flags) => self.flags = Some(flags),
            FetchAttr::Uid(uid) => self.uid = Some(uid),
            FetchAttr::Envelope(envelope) => self.envelope = Some(*envelope),
            FetchAttr::BodyStructure(body) => self.body_structure = Some(body),
            FetchAttr::BodyContent { path, data } => {
                self.parts.retain(|(p, _)| p != &path);
                self.parts.push((path, data.unwrap_or_default()));
            }
        }
    }
}

/// Ordered index of unprocessed messages, keyed by sequence number.
///
/// The domain is always a subset of `1..=exists`; EXPUNGE removes its target
/// and renumbers every higher key down by one.
#[derive(Debug, Default)]
pub struct MessageIndex {
    entries: BTreeMap<u32, PartialMessage>,
    exists: u32,
}

impl MessageIndex {
    /// Creates an index with a baseline message count.
    ///
    /// Messages present at SELECT time are not watched; only growth past the
    /// baseline enters the index.
    #[must_use]
    pub fn with_baseline(exists: u32) -> Self {
        Self {
            entries: BTreeMap::new(),
            exists,
        }
    }

    /// Returns the current EXISTS count.
    #[must_use]
    pub const fn exists(&self) -> u32 {
        self.exists
    }

    /// Returns the number of unprocessed messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there is nothing to process.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies an EXISTS count, adding an entry per newly observed message.
    pub fn grow(&mut self, exists: u32) {
        if exists < self.exists {
            tracing::warn!(
                old = self.exists,
                new = exists,
                "EXISTS shrank without EXPUNGE; ignoring"
            );
            return;
        }
        for seq in (self.exists + 1)..=exists {
            self.entries.insert(seq, PartialMessage::default());
        }
        self.exists = exists;
    }

    /// Applies an EXPUNGE: drops sequence `expunged` and renumbers higher
    /// entries down by one.
    pub fn expunge(&mut self, expunged: u32) {
        if expunged == 0 || expunged > self.exists {
            tracing::warn!(seq = expunged, exists = self.exists, "EXPUNGE out of range");
            return;
        }

        self.entries.remove(&expunged);
        let higher: Vec<u32> = self
            .entries
            .range((expunged + 1)..)
            .map(|(&k, _)| k)
            .collect();
        for key in higher {
            if let Some(entry) = self.entries.remove(&key) {
                self.entries.insert(key - 1, entry);
            }
        }
        self.exists -= 1;
    }

    /// Returns the lowest unprocessed sequence number.
    #[must_use]
    pub fn first_seq(&self) -> Option<u32> {
        self.entries.keys().next().copied()
    }

    /// Returns the entry for a sequence number.
    #[must_use]
    pub fn get(&self, seq: u32) -> Option<&PartialMessage> {
        self.entries.get(&seq)
    }

    /// Returns the entry for a sequence number, mutably.
    pub fn get_mut(&mut self, seq: u32) -> Option<&mut PartialMessage> {
        self.entries.get_mut(&seq)
    }

    /// Removes and returns an entry.
    pub fn remove(&mut self, seq: u32) -> Option<PartialMessage> {
        self.entries.remove(&seq)
    }

    /// Applies a FETCH attribute to the indexed message, ignoring sequence
    /// numbers we are not watching (the server may push updates for already
    /// processed messages).
    pub fn apply_fetch(&mut self, seq: u32, attr: FetchAttr) {
        if let Some(entry) = self.entries.get_mut(&seq) {
            entry.apply(attr);
        } else {
            tracing::trace!(seq, "FETCH for unwatched sequence number ignored");
        }
    }
}

/// Decoded body content, shape-matched to the body structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyContent {
    /// A single decoded part.
    Part {
        /// `type/subtype`, lower-cased.
        mime_type: String,
        /// Body parameters.
        params: BTreeMap<String, String>,
        /// Decoded content bytes.
        data: Vec<u8>,
    },
    /// A multipart container; the i-th entry corresponds to the i-th child.
    Multipart(Vec<BodyContent>),
}

/// Folds collected `(path, bytes)` parts into a tree mirroring `structure`,
/// decoding each leaf per its declared transfer encoding.
///
/// A leaf whose content never arrived gets empty data; delivery is best
/// effort by design.
#[must_use]
pub fn assemble_body(structure: &BodyStructure, parts: &[(Vec<u32>, Vec<u8>)]) -> BodyContent {
    assemble_at(structure, &mut Vec::new(), parts)
}

fn assemble_at(
    structure: &BodyStructure,
    prefix: &mut Vec<u32>,
    parts: &[(Vec<u32>, Vec<u8>)],
) -> BodyContent {
    match structure {
        BodyStructure::Onepart {
            mime_type,
            params,
            encoding,
        } => {
            let path: &[u32] = if prefix.is_empty() { &[1] } else { prefix };
            let raw = parts
                .iter()
                .find(|(p, _)| p == path)
                .map(|(_, data)| data.as_slice())
                .unwrap_or_default();
            BodyContent::Part {
                mime_type: mime_type.clone(),
                params: params.clone(),
                data: decode_transfer(encoding, raw),
            }
        }
        BodyStructure::Multipart { children } => {
            let assembled = children
                .iter()
                .enumerate()
                .map(|(i, child)| {
                    prefix.push(u32::try_from(i + 1).unwrap_or(u32::MAX));
                    let content = assemble_at(child, prefix, parts);
                    prefix.pop();
                    content
                })
                .collect();
            BodyContent::Multipart(assembled)
        }
    }
}

/// A fully fetched, decoded message as handed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    /// Sequence number at delivery time.
    pub seqnum: u32,
    /// Raw flag tokens.
    pub flags: Vec<String>,
    /// Date header, UTC-normalized.
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
    /// Decoded body, shape-matched to the body structure.
    pub body: BodyContent,
}

impl DeliveredMessage {
    /// Builds the delivery record from a fully fetched partial message.
    ///
    /// Returns `None` when the body structure never arrived.
    #[must_use]
    pub fn from_partial(seqnum: u32, partial: &PartialMessage) -> Option<Self> {
        let structure = partial.body_structure.as_ref()?;
        let body = assemble_body(structure, &partial.parts);
        let envelope = partial.envelope.clone().unwrap_or_default();

        Some(Self {
            seqnum,
            flags: partial.flags.clone().unwrap_or_default(),
            date: envelope.date,
            subject: envelope.subject,
            from: envelope.from,
            sender: envelope.sender,
            reply_to: envelope.reply_to,
            to: envelope.to,
            cc: envelope.cc,
            bcc: envelope.bcc,
            in_reply_to: envelope.in_reply_to,
            message_id: envelope.message_id,
            body,
        })
    }
}
