use ezgpio::backends::virtual_device::{VirtualDevice, VirtualTransport};
use ezgpio::codec::OutputReport;
use ezgpio::{
    encode, ChannelEdit, ChannelTable, Direction, GpioConfig, GpioHandle, GpioManager, Pull,
};
use tokio_util::sync::CancellationToken;

async fn connected(device: &VirtualDevice) -> (GpioHandle<VirtualTransport>, CancellationToken) {
    let shutdown = CancellationToken::new();
    let (gpio, _task) = GpioManager::new(
        VirtualTransport::with_device(device.clone()),
        &GpioConfig::default(),
    )
    .spawn(shutdown.clone());
    gpio.connect(&CancellationToken::new()).await.unwrap();
    (gpio, shutdown)
}

#[tokio::test]
async fn device_reports_never_override_outputs() {
    let device = VirtualDevice::new("bench");
    let (gpio, _shutdown) = connected(&device).await;

    gpio.edit(4, ChannelEdit::direction(Direction::Output).with_value(true))
        .outcome()
        .await
        .unwrap();

    // Bit 3 high, bit 4 low.
    device.inject_report(&[0x08, 0x00, 0x00, 0x00]);
    gpio.flush().await.unwrap();
    let table = gpio.snapshot();
    assert!(table[3].value);
    assert!(table[4].value, "output channel 4 keeps its local value");

    device.inject_report(&[0x00, 0x00, 0x00, 0x00]);
    gpio.flush().await.unwrap();
    let table = gpio.snapshot();
    assert!(!table[3].value);
    assert!(table[4].value);
}

#[tokio::test]
async fn malformed_reports_are_ignored() {
    let device = VirtualDevice::new("bench");
    let (gpio, _shutdown) = connected(&device).await;
    gpio.flush().await.unwrap();
    let before = gpio.snapshot();

    device.inject_report(&[0xff, 0xff, 0xff]);
    device.inject_report(&[0xff, 0xff, 0xff, 0xff, 0xff]);
    device.inject_report(&[]);
    gpio.flush().await.unwrap();

    let after = gpio.snapshot();
    assert_eq!(after, before);
    assert!(after.ptr_eq(&before), "no new snapshot should be published");
}

#[tokio::test]
async fn edits_are_sent_in_order_as_full_state() {
    let device = VirtualDevice::new("bench");
    let (gpio, _shutdown) = connected(&device).await;

    let tickets = vec![
        gpio.set_direction(0, Direction::Output),
        gpio.set_value(0, true),
        gpio.set_pull(15, Pull::PullDown),
        gpio.set_pull(16, Pull::PullUp),
    ];
    for ticket in tickets {
        ticket.outcome().await.unwrap();
    }

    // Resync first, then one report per edit, each carrying every earlier edit.
    let sent: Vec<OutputReport> = device
        .sent_reports()
        .iter()
        .map(|r| OutputReport::from_bytes(r.data.as_slice().try_into().unwrap()))
        .collect();
    assert_eq!(sent.len(), 5);
    assert_eq!(sent[0], OutputReport::default());
    assert_eq!(sent[1].direction, 0x1);
    assert_eq!(sent[1].output, 0x0);
    assert_eq!(sent[2].output, 0x1);
    assert_eq!(sent[3].pull_lo, 0x8000_0000);
    assert_eq!(sent[3].direction, 0x1);
    assert_eq!(sent[4].pull_hi, 0x1);
    assert_eq!(sent[4].pull_lo, 0x8000_0000);

    assert_eq!(sent[4].to_table(), gpio.snapshot());
    assert_eq!(
        device.sent_reports().last().map(|r| r.data.clone()),
        Some(encode(&gpio.snapshot()).to_vec())
    );
}

#[tokio::test]
async fn echoed_levels_follow_firmware_model() {
    let device = VirtualDevice::new("bench");
    device.set_echo(true);
    let (gpio, _shutdown) = connected(&device).await;

    // Channel 2 driven low locally, outside world pulls 1 and 2 high.
    gpio.set_direction(2, Direction::Output)
        .outcome()
        .await
        .unwrap();
    device.set_external_levels(0b110);
    gpio.flush().await.unwrap();

    let table = gpio.snapshot();
    assert!(table[1].value);
    assert!(!table[2].value);
}

#[tokio::test]
async fn subscribers_see_every_change() {
    let device = VirtualDevice::new("bench");
    let (gpio, _shutdown) = connected(&device).await;
    let mut rx = gpio.subscribe();
    let _ = rx.borrow_and_update();

    gpio.set_pull(7, Pull::BusKeep).outcome().await.unwrap();
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update()[7].pull, Pull::BusKeep);

    device.inject_report(&[0x00, 0x00, 0x00, 0x80]);
    gpio.flush().await.unwrap();
    assert!(rx.has_changed().unwrap());
    assert!(rx.borrow_and_update()[31].value);

    // Same levels again: nothing new to publish.
    device.inject_report(&[0x00, 0x00, 0x00, 0x80]);
    gpio.flush().await.unwrap();
    assert!(!rx.has_changed().unwrap());
}

#[tokio::test]
async fn table_survives_reconnect_and_is_resent() {
    let device = VirtualDevice::new("bench");
    let (gpio, _shutdown) = connected(&device).await;
    gpio.set_direction(9, Direction::Output)
        .outcome()
        .await
        .unwrap();

    gpio.disconnect();
    gpio.connect(&CancellationToken::new()).await.unwrap();
    // Ordered after the resync posted by connect.
    gpio.set_value(9, true).outcome().await.unwrap();

    let sent = device.sent_reports();
    let resync = OutputReport::from_bytes(sent[sent.len() - 2].data.as_slice().try_into().unwrap());
    assert_eq!(resync.direction, 1 << 9);
    assert_eq!(resync.output, 0);
    assert_eq!(gpio.snapshot(), ChannelTable::new().map(|i, ch| {
        if i == 9 {
            ezgpio::Channel {
                direction: Direction::Output,
                value: true,
                ..*ch
            }
        } else {
            *ch
        }
    }));
}
