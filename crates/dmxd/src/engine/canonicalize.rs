//! CommandCanonicalizer: validates a command payload and coalesces duplicate
//! channels within a patch (last-writer-wins).

use crate::error::{ErrorKind, FieldError};
use crate::model::{ChannelItem, Command};

pub const MAX_PATCH_ITEMS: usize = 64;

/// Result of canonicalizing a `dmx.patch`/`dmx.fade` item list: a stable
/// ordered list with unique channel keys, last-writer-wins on duplicates.
pub fn canonicalize_items(items: &[ChannelItem]) -> Result<Vec<ChannelItem>, (ErrorKind, Vec<FieldError>)> {
    let mut order: Vec<u16> = Vec::new();
    let mut by_channel: std::collections::HashMap<u16, u8> = std::collections::HashMap::new();

    for (idx, item) in items.iter().enumerate() {
        if !(1..=512).contains(&item.ch) {
            return Err((
                ErrorKind::ValidationFailed,
                vec![FieldError::new(
                    format!("items[{idx}].ch"),
                    format!("channel {} out of range [1,512]", item.ch),
                )],
            ));
        }
        // val is a u8, always in [0,255] by type; no range check needed.
        if !by_channel.contains_key(&item.ch) {
            order.push(item.ch);
        }
        by_channel.insert(item.ch, item.val);
    }

    let canonical: Vec<ChannelItem> = order
        .into_iter()
        .map(|ch| ChannelItem {
            ch,
            val: by_channel[&ch],
        })
        .collect();

    if canonical.is_empty() {
        return Err((
            ErrorKind::ValidationFailed,
            vec![FieldError::new("items", "patch has no valid items")],
        ));
    }
    if canonical.len() > MAX_PATCH_ITEMS {
        return Err((ErrorKind::PatchTooLarge, Vec::new()));
    }

    Ok(canonical)
}

/// Validates a decoded command beyond what the type system already enforces,
/// returning field errors on failure. This plays the role the distilled
/// spec assigns to an external JSON-schema validator: a pure function
/// `payload -> errors`.
pub fn validate(cmd: &Command) -> Result<(), (ErrorKind, Vec<FieldError>)> {
    match cmd {
        Command::Set { universe, channel, .. } => {
            if *universe > 63_636 {
                return Err((
                    ErrorKind::ValidationFailed,
                    vec![FieldError::new("universe", "universe out of range")],
                ));
            }
            if !(1..=512).contains(channel) {
                return Err((
                    ErrorKind::ValidationFailed,
                    vec![FieldError::new("channel", "channel out of range [1,512]")],
                ));
            }
            Ok(())
        }
        Command::Patch { universe, items, .. } => {
            if *universe > 63_636 {
                return Err((
                    ErrorKind::ValidationFailed,
                    vec![FieldError::new("universe", "universe out of range")],
                ));
            }
            canonicalize_items(items).map(|_| ())
        }
        Command::Fade {
            universe,
            duration_ms,
            items,
            ..
        } => {
            if *universe > 63_636 {
                return Err((
                    ErrorKind::ValidationFailed,
                    vec![FieldError::new("universe", "universe out of range")],
                ));
            }
            let _ = duration_ms; // durationMs >= 0 is guaranteed by the u64 type
            canonicalize_items(items).map(|_| ())
        }
        Command::FixtureSet { fixture_id, attrs, .. } => {
            if fixture_id.trim().is_empty() {
                return Err((
                    ErrorKind::ValidationFailed,
                    vec![FieldError::new("fixtureId", "fixtureId is required")],
                ));
            }
            if attrs.is_empty() {
                return Err((
                    ErrorKind::ValidationFailed,
                    vec![FieldError::new("attrs", "attrs must not be empty")],
                ));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_writer_wins_on_duplicate_channels() {
        let items = vec![
            ChannelItem { ch: 1, val: 10 },
            ChannelItem { ch: 1, val: 99 },
            ChannelItem { ch: 2, val: 5 },
        ];
        let out = canonicalize_items(&items).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].ch, 1);
        assert_eq!(out[0].val, 99);
    }

    #[test]
    fn rejects_out_of_range_channel() {
        let items = vec![ChannelItem { ch: 0, val: 1 }];
        assert!(canonicalize_items(&items).is_err());
        let items = vec![ChannelItem { ch: 513, val: 1 }];
        assert!(canonicalize_items(&items).is_err());
    }

    #[test]
    fn rejects_oversize_patch() {
        let items: Vec<ChannelItem> = (1..=65).map(|ch| ChannelItem { ch, val: 1 }).collect();
        let err = canonicalize_items(&items).unwrap_err();
        assert_eq!(err.0, ErrorKind::PatchTooLarge);
    }

    #[test]
    fn rejects_empty_patch() {
        assert!(canonicalize_items(&[]).is_err());
    }

    #[test]
    fn coalescing_is_order_independent_on_final_map() {
        let a = vec![
            ChannelItem { ch: 1, val: 1 },
            ChannelItem { ch: 2, val: 2 },
            ChannelItem { ch: 1, val: 3 },
        ];
        let b = vec![ChannelItem { ch: 2, val: 2 }, ChannelItem { ch: 1, val: 3 }];
        let ca = canonicalize_items(&a).unwrap();
        let cb = canonicalize_items(&b).unwrap();
        let mut ma: Vec<_> = ca.iter().map(|i| (i.ch, i.val)).collect();
        let mut mb: Vec<_> = cb.iter().map(|i| (i.ch, i.val)).collect();
        ma.sort();
        mb.sort();
        assert_eq!(ma, mb);
    }

    proptest::proptest! {
        #[test]
        fn lww_final_map_matches_a_plain_hashmap_fold(
            items in proptest::collection::vec((1u16..=512u16, proptest::prelude::any::<u8>()), 1..80)
        ) {
            let mut expected: std::collections::HashMap<u16, u8> = std::collections::HashMap::new();
            for item in &items {
                expected.insert(item.0, item.1);
            }
            let as_channel_items: Vec<ChannelItem> = items.iter().map(|&(ch, val)| ChannelItem { ch, val }).collect();

            match canonicalize_items(&as_channel_items) {
                Ok(canonical) => {
                    proptest::prop_assert_eq!(canonical.len(), expected.len());
                    for item in &canonical {
                        proptest::prop_assert_eq!(expected.get(&item.ch), Some(&item.val));
                    }
                }
                Err((ErrorKind::PatchTooLarge, _)) => {
                    proptest::prop_assert!(expected.len() > MAX_PATCH_ITEMS);
                }
                Err(other) => panic!("unexpected rejection: {other:?}"),
            }
        }

        #[test]
        fn out_of_range_channel_is_always_rejected(
            ch in proptest::prelude::any::<u16>(),
            val in proptest::prelude::any::<u8>(),
        ) {
            proptest::prop_assume!(!(1..=512).contains(&ch));
            let result = canonicalize_items(&[ChannelItem { ch, val }]);
            proptest::prop_assert!(result.is_err());
        }
    }
}
