//! Sans-I/O response parsing.
//!
//! [`lexer`] tokenizes a framed packet; [`response`] maps the token stream
//! onto [`Action`]s. Neither holds state between packets.

pub mod lexer;
pub mod response;

pub use response::{
    Action, Address, BodyStructure, CopyUid, Envelope, FetchAttr, ListEntry, ResponseParser,
    Status, TransferEncoding,
};
