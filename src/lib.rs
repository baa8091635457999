//! # mailwatch
//!
//! A persistent, authenticated IMAP4rev1 client that watches a single mailbox
//! and pushes newly observed messages to in-process subscribers as decoded
//! records.
//!
//! The crate is built around two pieces:
//!
//! - A **sans-I/O response parser** ([`parser`]): a byte-level decoder of the
//!   IMAP response grammar (parenthesized lists, quoted strings, synchronizing
//!   literals, ENVELOPE and recursive BODYSTRUCTURE), producing a flat list of
//!   semantic [`Action`]s per response packet.
//! - A **session state machine** ([`session`]): a per-session tokio task that
//!   negotiates capabilities, upgrades to TLS via STARTTLS when needed, logs
//!   in, selects the mailbox, then sits in IDLE (or NOOP polling) and runs a
//!   staged fetch pipeline for every new message, delivering decoded results
//!   to subscribers whose [`Filter`]s accept them.
//!
//! ## Quick start
//!
//! ```ignore
//! use mailwatch::{Filter, SessionConfig, spawn};
//!
//! #[tokio::main]
//! async fn main() -> mailwatch::Result<()> {
//!     let config = SessionConfig::new("imap.example.com", "user", "password", "work")
//!         .mailbox("INBOX");
//!     let handle = spawn(config)?;
//!
//!     let filter = Filter::builder().lacks_flag("\\Seen").build()?;
//!     let mut subscription = handle.subscribe(filter).await?;
//!
//!     while let Some(message) = subscription.recv().await {
//!         println!("{}: {:?}", message.seqnum, message.subject);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Delivery contract
//!
//! Each accepted message arrives as a [`DeliveredMessage`]: envelope fields
//! with addresses as `(display_name, "mailbox@host")` pairs (emails
//! lower-cased), flags, and a [`BodyContent`] tree mirroring the message's
//! body structure with each leaf transfer-decoded. Delivery is
//! fire-and-forget: a subscriber that falls behind loses messages rather than
//! stalling the protocol.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod command;
pub mod connection;
mod error;
pub mod filter;
pub mod message;
pub mod mime;
pub mod parser;
pub mod session;

pub use connection::{ImapStream, SessionConfig, TlsVerify};
pub use error::{Error, Result};
pub use filter::{Filter, FilterBuilder};
pub use message::{BodyContent, DeliveredMessage, FetchStage, PartialMessage};
pub use parser::{
    Action, Address, BodyStructure, CopyUid, Envelope, FetchAttr, ListEntry, Status,
    TransferEncoding,
};
pub use session::{
    Access, MailboxSnapshot, SessionHandle, SubscriberId, Subscription, spawn,
    spawn_with_transport,
};
