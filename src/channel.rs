//! Channel model.
//!
//! An EZ-GPIO bridge exposes [`CHANNEL_COUNT`] digital lines. Each line carries
//! three host-configurable fields ([`Channel`]) and the full set is kept in a
//! [`ChannelTable`].
//!
//! ## Ownership of `value`
//! - **Output** channels: `value` is what the host drives. Only local edits change it.
//! - **Input** channels: `value` is what the device observed. Only device reports change it.
//!
//! Changing `direction` never touches `value`; it only moves ownership.
//!
//! ## Snapshots
//! A [`ChannelTable`] is an **immutable** snapshot. Every update produces a new table
//! (copy-on-write over an `Arc`), so a snapshot handed to the codec or to a UI stays
//! valid and consistent no matter what happens afterwards. Cloning is a refcount bump.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Number of channels on the bridge. The index is the wire-level channel number.
pub const CHANNEL_COUNT: usize = 32;

/// Input bias applied to a line.
///
/// The discriminant is the 2-bit wire code used in the pull words of the output report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Pull {
    #[default]
    Floating = 0,
    PullUp = 1,
    PullDown = 2,
    BusKeep = 3,
}

impl Pull {
    const ALL: [Pull; 4] = [Pull::Floating, Pull::PullUp, Pull::PullDown, Pull::BusKeep];

    /// 2-bit wire code.
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Decode a wire code. Only the low two bits are considered.
    #[inline]
    pub const fn from_code(code: u32) -> Self {
        match code & 0b11 {
            0 => Pull::Floating,
            1 => Pull::PullUp,
            2 => Pull::PullDown,
            _ => Pull::BusKeep,
        }
    }

    /// Next mode in `FL → PU → PD → BK → FL` order.
    pub fn next(self) -> Self {
        Self::ALL[(self as usize + 1) % Self::ALL.len()]
    }

    /// Previous mode (reverse of [`Pull::next`]).
    pub fn prev(self) -> Self {
        Self::ALL[(self as usize + Self::ALL.len() - 1) % Self::ALL.len()]
    }

    /// Short label as printed next to a pad.
    pub const fn label(self) -> &'static str {
        match self {
            Pull::Floating => "FL",
            Pull::PullUp => "PU",
            Pull::PullDown => "PD",
            Pull::BusKeep => "BK",
        }
    }
}

impl fmt::Display for Pull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Who drives the line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Observed from the device.
    #[default]
    Input,
    /// Driven by the host.
    Output,
}

impl Direction {
    #[inline]
    pub const fn is_output(self) -> bool {
        matches!(self, Direction::Output)
    }

    /// The opposite direction.
    pub const fn toggled(self) -> Self {
        match self {
            Direction::Input => Direction::Output,
            Direction::Output => Direction::Input,
        }
    }
}

/// Host-side state of one line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel {
    pub pull: Pull,
    pub direction: Direction,
    /// Logical level. Host-owned for outputs, device-owned for inputs.
    pub value: bool,
}

impl Channel {
    /// `true` when the host is authoritative for `value`.
    #[inline]
    pub const fn is_locally_owned(&self) -> bool {
        self.direction.is_output()
    }
}

/// Immutable, ordered snapshot of all [`CHANNEL_COUNT`] channels.
///
/// Created with every channel at `{Floating, Input, false}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTable(Arc<[Channel; CHANNEL_COUNT]>);

impl Default for ChannelTable {
    fn default() -> Self {
        Self::from_channels([Channel::default(); CHANNEL_COUNT])
    }
}

impl ChannelTable {
    /// Table with every channel at its default.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_channels(channels: [Channel; CHANNEL_COUNT]) -> Self {
        Self(Arc::new(channels))
    }

    /// Channel at `index`, or `None` past the end.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Channel> {
        self.0.get(index)
    }

    /// All channels in wire order.
    #[inline]
    pub fn channels(&self) -> &[Channel; CHANNEL_COUNT] {
        &self.0
    }

    /// Iterate `(index, channel)` pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Channel)> {
        self.0.iter().enumerate()
    }

    /// A new table with `channel` at `index`; `None` if `index` is out of range.
    ///
    /// `self` is left untouched.
    pub fn with_channel(&self, index: usize, channel: Channel) -> Option<Self> {
        if index >= CHANNEL_COUNT {
            return None;
        }
        let mut next = self.clone();
        let slot = &mut Arc::make_mut(&mut next.0)[index];
        *slot = channel;
        Some(next)
    }

    /// A new table with `f` applied to every channel.
    pub fn map(&self, f: impl Fn(usize, &Channel) -> Channel) -> Self {
        let mut channels = *self.0;
        for (i, ch) in channels.iter_mut().enumerate() {
            *ch = f(i, ch);
        }
        Self::from_channels(channels)
    }

    /// `true` if both handles point at the same snapshot allocation.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::ops::Index<usize> for ChannelTable {
    type Output = Channel;

    fn index(&self, index: usize) -> &Channel {
        &self.0[index]
    }
}
