use ezgpio::backends::virtual_device::{VirtualDevice, VirtualTransport};
use ezgpio::{init_logging, ChannelEdit, Direction, GpioConfig, GpioManager, Pull};
use tokio_util::sync::CancellationToken;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = GpioConfig::default();
    init_logging(&config.logging);

    // An emulated bridge that answers every output report with its pin levels.
    let device = VirtualDevice::new("Virtual EZ-GPIO");
    device.set_echo(true);
    let transport = VirtualTransport::with_device(device.clone());

    let shutdown = CancellationToken::new();
    let (gpio, task) = GpioManager::new(transport, &config).spawn(shutdown.clone());

    let meta = gpio.connect(&CancellationToken::new()).await?;
    println!("connected to {meta}");

    // Drive channel 0 high, pull channel 1 up and leave it as an input.
    gpio.edit(0, ChannelEdit::direction(Direction::Output).with_value(true))
        .outcome()
        .await?;
    gpio.set_pull(1, Pull::PullUp).outcome().await?;

    // Something outside pulls channel 1 high.
    device.set_external_levels(0b10);
    gpio.flush().await?;

    let table = gpio.snapshot();
    for (i, ch) in table.iter().take(4) {
        println!("ch{i:02} {} {:?} {}", ch.pull, ch.direction, u8::from(ch.value));
    }
    if let Some(report) = device.last_output() {
        println!("last output report: {:02x?}", report.to_bytes());
    }
    println!("{}", serde_json::to_string(&table.channels()[..4])?);

    shutdown.cancel();
    task.await?;
    Ok(())
}
