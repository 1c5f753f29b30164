//! Reconciliation of local edits and device reports.
//!
//! Ownership rule, per channel:
//! - `Output`: the host owns `value`. Device feedback for that channel is ignored,
//!   so the device can never fight a locally driven pin.
//! - `Input`: the device owns `value`. Only decoded input reports change it.
//!
//! The free functions are pure `(old table, change) → new table`. [`Reconciler`]
//! owns the current table, publishes every new snapshot to subscribers and hands
//! each locally edited table to the [`StateWriter`] for transmission.

use crate::channel::{Channel, ChannelTable, Direction, Pull};
use crate::codec::InputLevels;
use crate::error::GpioError;
use crate::session::{SendTicketSender, StateWriter};
use tokio::sync::watch;
use tracing::debug;

/// Requested change to one channel. `None` keeps the current field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelEdit {
    pub pull: Option<Pull>,
    pub direction: Option<Direction>,
    pub value: Option<bool>,
}

impl ChannelEdit {
    pub fn pull(pull: Pull) -> Self {
        Self {
            pull: Some(pull),
            ..Self::default()
        }
    }

    pub fn direction(direction: Direction) -> Self {
        Self {
            direction: Some(direction),
            ..Self::default()
        }
    }

    pub fn value(value: bool) -> Self {
        Self {
            value: Some(value),
            ..Self::default()
        }
    }

    pub fn with_pull(self, pull: Pull) -> Self {
        Self {
            pull: Some(pull),
            ..self
        }
    }

    pub fn with_direction(self, direction: Direction) -> Self {
        Self {
            direction: Some(direction),
            ..self
        }
    }

    pub fn with_value(self, value: bool) -> Self {
        Self {
            value: Some(value),
            ..self
        }
    }

    /// Step `current`'s pull mode forward (or backward with `reverse`).
    pub fn cycle_pull(current: &Channel, reverse: bool) -> Self {
        let pull = if reverse {
            current.pull.prev()
        } else {
            current.pull.next()
        };
        Self::pull(pull)
    }

    pub fn toggle_direction(current: &Channel) -> Self {
        Self::direction(current.direction.toggled())
    }

    pub fn toggle_value(current: &Channel) -> Self {
        Self::value(!current.value)
    }

    /// `channel` with the requested fields replaced.
    pub fn apply_to(&self, channel: Channel) -> Channel {
        Channel {
            pull: self.pull.unwrap_or(channel.pull),
            direction: self.direction.unwrap_or(channel.direction),
            value: self.value.unwrap_or(channel.value),
        }
    }
}

/// Apply a local edit to the channel at `index`.
///
/// Legal regardless of direction. The result differs from `table` at `index` only.
pub fn apply_local_edit(
    table: &ChannelTable,
    index: usize,
    edit: &ChannelEdit,
) -> Result<ChannelTable, GpioError> {
    let current = table
        .get(index)
        .ok_or(GpioError::ChannelOutOfRange { index })?;
    table
        .with_channel(index, edit.apply_to(*current))
        .ok_or(GpioError::ChannelOutOfRange { index })
}

/// Merge observed levels: inputs take the device's level, outputs keep theirs.
pub fn apply_device_report(table: &ChannelTable, levels: &InputLevels) -> ChannelTable {
    table.map(|i, ch| {
        if ch.is_locally_owned() {
            *ch
        } else {
            Channel {
                value: levels[i],
                ..*ch
            }
        }
    })
}

/// Owner of the live channel table.
#[derive(Debug)]
pub struct Reconciler {
    table: ChannelTable,
    snapshots: watch::Sender<ChannelTable>,
    writer: StateWriter,
}

impl Reconciler {
    pub fn new(table: ChannelTable, writer: StateWriter) -> Self {
        let (snapshots, _) = watch::channel(table.clone());
        Self {
            table,
            snapshots,
            writer,
        }
    }

    /// Current snapshot.
    pub fn table(&self) -> &ChannelTable {
        &self.table
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ChannelTable> {
        self.snapshots.subscribe()
    }

    /// Apply a local edit, publish it, and queue a full-state transmission.
    ///
    /// `reply` receives the transmission outcome (or the range error).
    pub fn apply_local_edit(&mut self, index: usize, edit: &ChannelEdit, reply: SendTicketSender) {
        match apply_local_edit(&self.table, index, edit) {
            Ok(next) => {
                debug!(channel = index, ?edit, "local edit");
                self.publish(next);
                self.writer.submit(self.table.clone(), Some(reply));
            }
            Err(err) => {
                let _ = reply.send(Err(err));
            }
        }
    }

    /// Merge a decoded input report. Returns `true` if any input channel changed.
    pub fn apply_device_report(&mut self, levels: &InputLevels) -> bool {
        let next = apply_device_report(&self.table, levels);
        if next == self.table {
            return false;
        }
        debug!("device report changed input levels");
        self.publish(next);
        true
    }

    /// Queue a transmission of the current table without changing it.
    pub fn resync(&self) {
        self.writer.submit(self.table.clone(), None);
    }

    fn publish(&mut self, next: ChannelTable) {
        self.table = next;
        self.snapshots.send_replace(self.table.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::CHANNEL_COUNT;

    fn table_with(index: usize, ch: Channel) -> ChannelTable {
        ChannelTable::new().with_channel(index, ch).unwrap()
    }

    #[test]
    fn local_edit_changes_only_target_channel() {
        let before = ChannelTable::new();
        let after = apply_local_edit(
            &before,
            9,
            &ChannelEdit::direction(Direction::Output).with_value(true),
        )
        .unwrap();

        assert_eq!(after[9].direction, Direction::Output);
        assert!(after[9].value);
        assert_eq!(after[9].pull, Pull::Floating);
        for i in (0..CHANNEL_COUNT).filter(|&i| i != 9) {
            assert_eq!(after[i], before[i]);
        }
        assert_eq!(before[9], Channel::default());
    }

    #[test]
    fn local_edit_out_of_range() {
        let err = apply_local_edit(&ChannelTable::new(), 32, &ChannelEdit::value(true));
        assert!(matches!(err, Err(GpioError::ChannelOutOfRange { index: 32 })));
    }

    #[test]
    fn local_value_edit_on_input_is_legal() {
        let after = apply_local_edit(&ChannelTable::new(), 2, &ChannelEdit::value(true)).unwrap();
        assert!(after[2].value);
        assert_eq!(after[2].direction, Direction::Input);
    }

    #[test]
    fn report_updates_inputs_only() {
        let table = table_with(
            4,
            Channel {
                direction: Direction::Output,
                value: true,
                ..Channel::default()
            },
        );

        let mut levels = [false; CHANNEL_COUNT];
        levels[3] = true;
        let after = apply_device_report(&table, &levels);
        assert!(after[3].value);
        assert!(after[4].value, "output channel must keep its local value");

        let after = apply_device_report(&after, &[false; CHANNEL_COUNT]);
        assert!(!after[3].value);
        assert!(after[4].value);
    }

    #[test]
    fn direction_flip_moves_authority() {
        let table = apply_local_edit(
            &ChannelTable::new(),
            0,
            &ChannelEdit::direction(Direction::Output).with_value(true),
        )
        .unwrap();
        let table = apply_local_edit(&table, 0, &ChannelEdit::direction(Direction::Input)).unwrap();
        assert!(table[0].value, "direction change must not touch value");

        let table = apply_device_report(&table, &[false; CHANNEL_COUNT]);
        assert!(!table[0].value);
    }

    #[test]
    fn relative_edits() {
        let ch = Channel {
            pull: Pull::BusKeep,
            direction: Direction::Output,
            value: true,
        };
        assert_eq!(ChannelEdit::cycle_pull(&ch, false).pull, Some(Pull::Floating));
        assert_eq!(ChannelEdit::cycle_pull(&ch, true).pull, Some(Pull::PullDown));
        assert_eq!(
            ChannelEdit::toggle_direction(&ch).direction,
            Some(Direction::Input)
        );
        assert_eq!(ChannelEdit::toggle_value(&ch).value, Some(false));
    }

    #[tokio::test]
    async fn reconciler_publishes_and_queues_sends() {
        let (writer, mut queue) = StateWriter::channel();
        let mut rec = Reconciler::new(ChannelTable::new(), writer);
        let mut rx = rec.subscribe();

        let (reply, _ticket) = crate::session::SendTicket::channel();
        rec.apply_local_edit(1, &ChannelEdit::value(true), reply);

        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update()[1].value);
        let queued = queue.try_next().expect("edit should queue a send");
        assert!(queued[1].value);
    }

    #[tokio::test]
    async fn unchanged_report_does_not_publish() {
        let (writer, _queue) = StateWriter::channel();
        let mut rec = Reconciler::new(ChannelTable::new(), writer);
        let rx = rec.subscribe();

        assert!(!rec.apply_device_report(&[false; CHANNEL_COUNT]));
        assert!(!rx.has_changed().unwrap());

        let mut levels = [false; CHANNEL_COUNT];
        levels[0] = true;
        assert!(rec.apply_device_report(&levels));
        assert!(rx.has_changed().unwrap());
    }
}
