//! Connect to a real bridge and print every change of the channel table.
//!
//! Exits when the bridge is unplugged.
//!
//! Usage: `cargo run --example hid_watch --features hid -- [config.toml]`

use ezgpio::backends::hid::HidApiTransport;
use ezgpio::{init_logging, GpioConfig, GpioManager, SessionState};
use tokio_util::sync::CancellationToken;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => GpioConfig::load(path)?,
        None => GpioConfig::default(),
    };
    init_logging(&config.logging);

    let transport = HidApiTransport::new(config.hid.clone())?;
    let shutdown = CancellationToken::new();
    let (gpio, task) = GpioManager::new(transport, &config).spawn(shutdown.clone());

    let mut state = gpio.watch_state();
    let meta = gpio.connect(&CancellationToken::new()).await?;
    println!("connected to {meta}");

    let mut snapshots = gpio.subscribe();
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let levels: String = snapshots
                    .borrow_and_update()
                    .iter()
                    .map(|(_, ch)| if ch.value { '1' } else { '0' })
                    .collect();
                println!("{levels}");
            }
            _ = state.wait_for(|s| *s == SessionState::Disconnected) => {
                println!("device lost");
                break;
            }
        }
    }

    shutdown.cancel();
    task.await?;
    Ok(())
}
