//! EZ-GPIO report codec.
//!
//! Pure translation between a [`ChannelTable`] and the bridge's HID reports.
//! All words are little-endian `u32`.
//!
//! ## Output report (host → device, 16 bytes)
//! | bytes  | word        | layout                                   |
//! |--------|-------------|------------------------------------------|
//! | 0..4   | `direction` | bit *i* = channel *i* is Output          |
//! | 4..8   | `pull_lo`   | channels 0..15, 2 bits at `2*i`          |
//! | 8..12  | `pull_hi`   | channels 16..31, 2 bits at `2*(i-16)`    |
//! | 12..16 | `output`    | bit *i* = channel *i* value              |
//!
//! Value bits are emitted for every channel; the device ignores bits of inputs.
//!
//! ## Input report (device → host, 4 bytes)
//! | bytes | word    | layout                                   |
//! |-------|---------|------------------------------------------|
//! | 0..4  | `input` | bit *i* = observed level of channel *i*  |
//!
//! Every outbound report is a full-state snapshot; there is no delta form.

use crate::channel::{Channel, ChannelTable, Direction, Pull, CHANNEL_COUNT};

/// Size of the host → device report.
pub const OUTPUT_REPORT_LEN: usize = 16;

/// Size of the device → host report.
pub const INPUT_REPORT_LEN: usize = 4;

/// Channels packed into each pull word.
const CHANNELS_PER_PULL_WORD: usize = 16;

/// Observed level per channel, indexed by channel number.
pub type InputLevels = [bool; CHANNEL_COUNT];

/// Word-level view of the 16-byte output report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutputReport {
    pub direction: u32,
    pub pull_lo: u32,
    pub pull_hi: u32,
    pub output: u32,
}

impl OutputReport {
    /// Pack every channel of `table`.
    pub fn from_table(table: &ChannelTable) -> Self {
        let mut report = Self::default();
        for (i, ch) in table.iter() {
            let bit = 1u32 << i;
            if ch.direction.is_output() {
                report.direction |= bit;
            }
            if ch.value {
                report.output |= bit;
            }
            let shift = 2 * (i % CHANNELS_PER_PULL_WORD);
            if i < CHANNELS_PER_PULL_WORD {
                report.pull_lo |= ch.pull.code() << shift;
            } else {
                report.pull_hi |= ch.pull.code() << shift;
            }
        }
        report
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> [u8; OUTPUT_REPORT_LEN] {
        let mut out = [0u8; OUTPUT_REPORT_LEN];
        out[0..4].copy_from_slice(&self.direction.to_le_bytes());
        out[4..8].copy_from_slice(&self.pull_lo.to_le_bytes());
        out[8..12].copy_from_slice(&self.pull_hi.to_le_bytes());
        out[12..16].copy_from_slice(&self.output.to_le_bytes());
        out
    }

    /// Parse wire bytes (device side of the link).
    pub fn from_bytes(bytes: &[u8; OUTPUT_REPORT_LEN]) -> Self {
        Self {
            direction: le_word(bytes, 0),
            pull_lo: le_word(bytes, 4),
            pull_hi: le_word(bytes, 8),
            output: le_word(bytes, 12),
        }
    }

    /// Pull mode encoded for `channel`.
    pub fn pull(&self, channel: usize) -> Pull {
        let word = if channel < CHANNELS_PER_PULL_WORD {
            self.pull_lo
        } else {
            self.pull_hi
        };
        Pull::from_code(word >> (2 * (channel % CHANNELS_PER_PULL_WORD)))
    }

    pub fn direction(&self, channel: usize) -> Direction {
        if bit(self.direction, channel) {
            Direction::Output
        } else {
            Direction::Input
        }
    }

    pub fn value(&self, channel: usize) -> bool {
        bit(self.output, channel)
    }

    /// Rebuild the channel fields carried by this report.
    pub fn to_table(&self) -> ChannelTable {
        ChannelTable::new().map(|i, _| Channel {
            pull: self.pull(i),
            direction: self.direction(i),
            value: self.value(i),
        })
    }
}

/// Word-level view of the 4-byte input report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InputReport {
    pub input: u32,
}

impl InputReport {
    pub fn from_bytes(bytes: &[u8; INPUT_REPORT_LEN]) -> Self {
        Self {
            input: u32::from_le_bytes(*bytes),
        }
    }

    pub fn to_bytes(&self) -> [u8; INPUT_REPORT_LEN] {
        self.input.to_le_bytes()
    }

    /// Unpack into per-channel levels.
    pub fn levels(&self) -> InputLevels {
        std::array::from_fn(|i| bit(self.input, i))
    }
}

/// Encode the full table as an output report.
pub fn encode(table: &ChannelTable) -> [u8; OUTPUT_REPORT_LEN] {
    OutputReport::from_table(table).to_bytes()
}

/// Decode an input report into per-channel levels.
///
/// Total for any 4-byte input. Direction is not considered here.
pub fn decode(report: &[u8; INPUT_REPORT_LEN]) -> InputLevels {
    InputReport::from_bytes(report).levels()
}

/// Length-checked entry point for raw inbound frames.
///
/// Returns `None` for anything that is not exactly [`INPUT_REPORT_LEN`] bytes.
pub fn parse_input_report(data: &[u8]) -> Option<InputLevels> {
    let report: &[u8; INPUT_REPORT_LEN] = data.try_into().ok()?;
    Some(decode(report))
}

#[inline]
fn bit(word: u32, index: usize) -> bool {
    index < CHANNEL_COUNT && (word >> index) & 1 == 1
}

#[inline]
fn le_word(bytes: &[u8; OUTPUT_REPORT_LEN], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(bytes: &[u8; OUTPUT_REPORT_LEN]) -> [u32; 4] {
        let r = OutputReport::from_bytes(bytes);
        [r.direction, r.pull_lo, r.pull_hi, r.output]
    }

    #[test]
    fn default_table_encodes_to_zeroes() {
        assert_eq!(encode(&ChannelTable::new()), [0u8; OUTPUT_REPORT_LEN]);
    }

    #[test]
    fn single_output_channel() {
        let table = ChannelTable::new()
            .with_channel(
                0,
                Channel {
                    pull: Pull::Floating,
                    direction: Direction::Output,
                    value: true,
                },
            )
            .unwrap();
        assert_eq!(words(&encode(&table)), [0x0000_0001, 0, 0, 0x0000_0001]);
    }

    #[test]
    fn pull_down_on_last_low_channel() {
        let table = ChannelTable::new()
            .with_channel(
                15,
                Channel {
                    pull: Pull::PullDown,
                    ..Channel::default()
                },
            )
            .unwrap();
        let [_, lo, hi, _] = words(&encode(&table));
        assert_eq!(lo, 0b10 << 30);
        assert_eq!(lo, 0x8000_0000);
        assert_eq!(hi, 0);
    }

    #[test]
    fn high_channels_pack_into_pull_hi() {
        let table = ChannelTable::new()
            .with_channel(
                16,
                Channel {
                    pull: Pull::PullUp,
                    ..Channel::default()
                },
            )
            .and_then(|t| {
                t.with_channel(
                    31,
                    Channel {
                        pull: Pull::BusKeep,
                        direction: Direction::Output,
                        value: true,
                    },
                )
            })
            .unwrap();
        let [dir, lo, hi, out] = words(&encode(&table));
        assert_eq!(lo, 0);
        assert_eq!(hi, 0b01 | (0b11 << 30));
        assert_eq!(dir, 1 << 31);
        assert_eq!(out, 1 << 31);
    }

    #[test]
    fn value_bits_sent_for_inputs_too() {
        let table = ChannelTable::new()
            .with_channel(
                5,
                Channel {
                    value: true,
                    ..Channel::default()
                },
            )
            .unwrap();
        let [dir, _, _, out] = words(&encode(&table));
        assert_eq!(dir, 0);
        assert_eq!(out, 1 << 5);
    }

    #[test]
    fn words_are_little_endian() {
        let report = OutputReport {
            direction: 0x0403_0201,
            ..OutputReport::default()
        };
        assert_eq!(&report.to_bytes()[0..4], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn device_side_view_matches_table() {
        let table = ChannelTable::new().map(|i, _| Channel {
            pull: Pull::from_code(i as u32),
            direction: if i % 3 == 0 {
                Direction::Output
            } else {
                Direction::Input
            },
            value: i % 2 == 1,
        });
        let report = OutputReport::from_bytes(&encode(&table));
        assert_eq!(report.to_table(), table);
    }

    #[test]
    fn decode_maps_bits_to_channels() {
        let levels = decode(&[0b0000_1001, 0x00, 0x00, 0x80]);
        assert!(levels[0]);
        assert!(!levels[1]);
        assert!(levels[3]);
        assert!(levels[31]);
        assert_eq!(levels.iter().filter(|&&b| b).count(), 3);
    }

    #[test]
    fn parse_rejects_wrong_lengths() {
        assert!(parse_input_report(&[]).is_none());
        assert!(parse_input_report(&[0xFF; 3]).is_none());
        assert!(parse_input_report(&[0xFF; 5]).is_none());
        assert_eq!(parse_input_report(&[0xFF; 4]), Some([true; CHANNEL_COUNT]));
    }
}
