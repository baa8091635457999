//! Fetch pipeline decision functions.
//!
//! Pure helpers deciding, per message and stage, which attributes the next
//! FETCH must carry. The session drives the stages; these functions only
//! inspect accumulated state and the subscriber filters.

use crate::command::FetchItem;
use crate::filter::Filter;
use crate::message::PartialMessage;
use crate::parser::BodyStructure;

/// Attributes the filter stage must fetch, given the registered filters.
///
/// Empty when no filter inspects flags or the envelope; the pipeline then
/// skips straight to the pre-body fetch.
#[must_use]
pub fn filter_fetch_items(filters: &[Filter]) -> Vec<FetchItem> {
    let mut items = Vec::new();
    if filters.iter().any(Filter::needs_flags) {
        items.push(FetchItem::Flags);
    }
    if filters.iter().any(Filter::needs_envelope) {
        items.push(FetchItem::Envelope);
    }
    items
}

/// Attributes the pre-body stage must fetch: the body structure plus whatever
/// metadata the filter stage did not already pull.
#[must_use]
pub fn prebody_fetch_items(msg: &PartialMessage) -> Vec<FetchItem> {
    let mut items = vec![FetchItem::Body];
    if msg.flags.is_none() {
        items.push(FetchItem::Flags);
    }
    if msg.envelope.is_none() {
        items.push(FetchItem::Envelope);
    }
    items
}

/// True when no registered filter could still accept the message.
///
/// With no subscribers at all there is nobody to deliver to, so the message
/// is equally discardable.
#[must_use]
pub fn rejected_by_all(filters: &[Filter], msg: &PartialMessage) -> bool {
    !filters.iter().any(|filter| filter.accepts(msg))
}

/// One `BODY.PEEK[p]` per leaf part of the body structure.
#[must_use]
pub fn part_fetch_items(structure: &BodyStructure) -> Vec<FetchItem> {
    structure
        .leaf_paths()
        .into_iter()
        .map(FetchItem::BodyPeek)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::parser::{Envelope, FetchAttr, TransferEncoding};
    use std::collections::BTreeMap;

    fn flag_filter() -> Filter {
        Filter::builder().has_flag("\\Flagged").build().unwrap()
    }

    fn subject_filter() -> Filter {
        Filter::builder().subject_matches("alert").build().unwrap()
    }

    #[test]
    fn filter_items_cover_only_what_filters_need() {
        assert!(filter_fetch_items(&[Filter::accept_all()]).is_empty());
        assert_eq!(filter_fetch_items(&[flag_filter()]), vec![FetchItem::Flags]);
        assert_eq!(filter_fetch_items(&[subject_filter()]), vec![
            FetchItem::Envelope
        ]);
        assert_eq!(filter_fetch_items(&[flag_filter(), subject_filter()]), vec![
            FetchItem::Flags,
            FetchItem::Envelope,
        ]);
    }

    #[test]
    fn prebody_items_exclude_already_held() {
        let mut msg = PartialMessage::default();
        assert_eq!(prebody_fetch_items(&msg), vec![
            FetchItem::Body,
            FetchItem::Flags,
            FetchItem::Envelope,
        ]);

        msg.apply(FetchAttr::Flags(vec!["\\Seen".to_string()]));
        assert_eq!(prebody_fetch_items(&msg), vec![
            FetchItem::Body,
            FetchItem::Envelope,
        ]);

        msg.apply(FetchAttr::Envelope(Box::new(Envelope::default())));
        assert_eq!(prebody_fetch_items(&msg), vec![FetchItem::Body]);
    }

    #[test]
    fn rejection_requires_every_filter_to_reject() {
        let mut msg = PartialMessage::default();
        msg.apply(FetchAttr::Flags(vec!["\\Seen".to_string()]));

        // flag_filter requires \Flagged which is absent; accept_all still accepts.
        assert!(!rejected_by_all(&[flag_filter(), Filter::accept_all()], &msg));
        assert!(rejected_by_all(&[flag_filter()], &msg));
    }

    #[test]
    fn no_subscribers_means_rejected() {
        assert!(rejected_by_all(&[], &PartialMessage::default()));
    }

    #[test]
    fn part_items_mirror_leaf_paths() {
        let structure = BodyStructure::Multipart {
            children: vec![
                BodyStructure::Multipart {
                    children: vec![
                        BodyStructure::Onepart {
                            mime_type: "text/plain".to_string(),
                            params: BTreeMap::new(),
                            encoding: TransferEncoding::SevenBit,
                        },
                        BodyStructure::Onepart {
                            mime_type: "text/html".to_string(),
                            params: BTreeMap::new(),
                            encoding: TransferEncoding::SevenBit,
                        },
                    ],
                },
                BodyStructure::Onepart {
                    mime_type: "image/png".to_string(),
                    params: BTreeMap::new(),
                    encoding: TransferEncoding::Base64,
                },
            ],
        };
        assert_eq!(part_fetch_items(&structure), vec![
            FetchItem::BodyPeek(vec![1, 1]),
            FetchItem::BodyPeek(vec![1, 2]),
            FetchItem::BodyPeek(vec![2]),
        ]);
    }
}
