//! Subscriber filters.
//!
//! A filter is a conjunction of flag requirements and optional subject and
//! sender patterns. The fetch pipeline consults `needs_flags`/`needs_envelope`
//! to decide which attributes to request before committing to a body fetch,
//! and `accepts` to drop messages no subscriber wants.

use regex::Regex;

use crate::message::PartialMessage;
use crate::{Error, Result};

/// Message filter applied before delivery.
///
/// An attribute the message does not yet carry never rejects: a partially
/// fetched message "could still be accepted" until the data proves otherwise.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    has_flags: Vec<String>,
    lacks_flags: Vec<String>,
    subject: Option<Regex>,
    sender: Option<Regex>,
}

impl Filter {
    /// A filter that accepts every message.
    #[must_use]
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// Starts building a filter.
    #[must_use]
    pub fn builder() -> FilterBuilder {
        FilterBuilder::default()
    }

    /// Returns true if evaluating this filter requires message flags.
    #[must_use]
    pub fn needs_flags(&self) -> bool {
        !self.has_flags.is_empty() || !self.lacks_flags.is_empty()
    }

    /// Returns true if evaluating this filter requires the envelope.
    #[must_use]
    pub const fn needs_envelope(&self) -> bool {
        self.subject.is_some() || self.sender.is_some()
    }

    /// Returns true if the message, as fetched so far, could be accepted.
    #[must_use]
    pub fn accepts(&self, msg: &PartialMessage) -> bool {
        if let Some(flags) = &msg.flags {
            for required in &self.has_flags {
                if !flags.iter().any(|f| f.eq_ignore_ascii_case(required)) {
                    return false;
                }
            }
            for forbidden in &self.lacks_flags {
                if flags.iter().any(|f| f.eq_ignore_ascii_case(forbidden)) {
                    return false;
                }
            }
        }

        if let Some(envelope) = &msg.envelope {
            if let Some(pattern) = &self.subject {
                match envelope.subject.as_deref() {
                    Some(subject) if pattern.is_match(subject) => {}
                    _ => return false,
                }
            }
            if let Some(pattern) = &self.sender {
                let senders = if envelope.from.is_empty() {
                    &envelope.sender
                } else {
                    &envelope.from
                };
                let matched = senders.iter().any(|addr| {
                    let rendered = match &addr.name {
                        Some(name) => format!("{name} <{}>", addr.email),
                        None => addr.email.clone(),
                    };
                    pattern.is_match(&rendered)
                });
                if !matched {
                    return false;
                }
            }
        }

        true
    }
}

/// Builder for [`Filter`], validating constraints at [`build`](Self::build).
#[derive(Debug, Clone, Default)]
pub struct FilterBuilder {
    has_flags: Vec<String>,
    lacks_flags: Vec<String>,
    subject: Option<String>,
    sender: Option<String>,
}

impl FilterBuilder {
    /// Requires a flag to be present. Repetition does not duplicate.
    #[must_use]
    pub fn has_flag(mut self, flag: impl Into<String>) -> Self {
        push_unique(&mut self.has_flags, flag.into());
        self
    }

    /// Requires a flag to be absent. Repetition does not duplicate.
    #[must_use]
    pub fn lacks_flag(mut self, flag: impl Into<String>) -> Self {
        push_unique(&mut self.lacks_flags, flag.into());
        self
    }

    /// Requires the subject to match a regular expression.
    #[must_use]
    pub fn subject_matches(mut self, pattern: impl Into<String>) -> Self {
        self.subject = Some(pattern.into());
        self
    }

    /// Requires a from address (`Name <mbx@host>` or bare email) to match a
    /// regular expression.
    #[must_use]
    pub fn sender_matches(mut self, pattern: impl Into<String>) -> Self {
        self.sender = Some(pattern.into());
        self
    }

    /// Builds the filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FilterConflict`] when a flag is both required and
    /// forbidden, and [`Error::Config`] for an invalid regular expression.
    pub fn build(self) -> Result<Filter> {
        for flag in &self.has_flags {
            if self
                .lacks_flags
                .iter()
                .any(|other| other.eq_ignore_ascii_case(flag))
            {
                return Err(Error::FilterConflict(format!(
                    "flag {flag} is both required and forbidden"
                )));
            }
        }

        let compile = |pattern: Option<String>| -> Result<Option<Regex>> {
            pattern
                .map(|p| Regex::new(&p).map_err(|e| Error::Config(format!("invalid pattern: {e}"))))
                .transpose()
        };

        Ok(Filter {
            has_flags: self.has_flags,
            lacks_flags: self.lacks_flags,
            subject: compile(self.subject)?,
            sender: compile(self.sender)?,
        })
    }
}

fn push_unique(flags: &mut Vec<String>, flag: String) {
    if !flags.iter().any(|f| f.eq_ignore_ascii_case(&flag)) {
        flags.push(flag);
    }
}
