//! Property tests for the report codec and the report-merge rule.

use ezgpio::codec::{OutputReport, INPUT_REPORT_LEN, OUTPUT_REPORT_LEN};
use ezgpio::reconciler::apply_device_report;
use ezgpio::{decode, encode, parse_input_report, Channel, ChannelTable, Direction, Pull};
use proptest::prelude::*;

fn pull() -> impl Strategy<Value = Pull> {
    (0u32..4).prop_map(Pull::from_code)
}

fn channel() -> impl Strategy<Value = Channel> {
    (pull(), any::<bool>(), any::<bool>()).prop_map(|(pull, output, value)| Channel {
        pull,
        direction: if output {
            Direction::Output
        } else {
            Direction::Input
        },
        value,
    })
}

fn table() -> impl Strategy<Value = ChannelTable> {
    proptest::collection::vec(channel(), 32).prop_map(|chs| {
        let mut channels = [Channel::default(); 32];
        channels.copy_from_slice(&chs);
        ChannelTable::from_channels(channels)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Every field of every channel lands in its own bit position.
    #[test]
    fn prop_bit_placement(table in table()) {
        let bytes = encode(&table);
        prop_assert_eq!(bytes.len(), OUTPUT_REPORT_LEN);
        let report = OutputReport::from_bytes(&bytes);
        for (i, ch) in table.iter() {
            prop_assert_eq!(report.direction >> i & 1 == 1, ch.direction.is_output());
            prop_assert_eq!(report.output >> i & 1 == 1, ch.value);
            let word = if i < 16 { report.pull_lo } else { report.pull_hi };
            prop_assert_eq!((word >> (2 * (i % 16))) & 0b11, ch.pull.code(), "channel {}", i);
        }
    }

    /// A single-channel change touches only that channel's bits.
    #[test]
    fn prop_edit_is_local(table in table(), index in 0usize..32, ch in channel()) {
        let before = OutputReport::from_table(&table);
        let after = OutputReport::from_table(&table.with_channel(index, ch).unwrap());
        let bit = 1u32 << index;
        let pull_mask = 0b11u32 << (2 * (index % 16));
        prop_assert_eq!(before.direction & !bit, after.direction & !bit);
        prop_assert_eq!(before.output & !bit, after.output & !bit);
        if index < 16 {
            prop_assert_eq!(before.pull_lo & !pull_mask, after.pull_lo & !pull_mask);
            prop_assert_eq!(before.pull_hi, after.pull_hi);
        } else {
            prop_assert_eq!(before.pull_hi & !pull_mask, after.pull_hi & !pull_mask);
            prop_assert_eq!(before.pull_lo, after.pull_lo);
        }
    }

    /// Decoding is total and matches the little-endian word bit by bit.
    #[test]
    fn prop_decode_total(bytes in any::<[u8; INPUT_REPORT_LEN]>()) {
        let levels = decode(&bytes);
        let word = u32::from_le_bytes(bytes);
        for (i, level) in levels.iter().enumerate() {
            prop_assert_eq!(*level, word >> i & 1 == 1);
        }
    }

    /// Only frames of exactly four bytes are accepted.
    #[test]
    fn prop_parse_checks_length(data in proptest::collection::vec(any::<u8>(), 0..16)) {
        let parsed = parse_input_report(&data);
        prop_assert_eq!(parsed.is_some(), data.len() == INPUT_REPORT_LEN);
    }

    /// Reports move input values only; outputs and all other fields stay.
    #[test]
    fn prop_report_respects_ownership(table in table(), bytes in any::<[u8; INPUT_REPORT_LEN]>()) {
        let levels = decode(&bytes);
        let merged = apply_device_report(&table, &levels);
        for (i, ch) in table.iter() {
            let after = merged[i];
            prop_assert_eq!(after.pull, ch.pull);
            prop_assert_eq!(after.direction, ch.direction);
            let expected = if ch.direction.is_output() { ch.value } else { levels[i] };
            prop_assert_eq!(after.value, expected);
        }
    }
}
