//! Example: drive a simulated jack through insert, button press and unplug.
//!
//! Run with: cargo run -p headset-detect --example plug_cycle

use std::sync::Arc;
use std::time::Duration;

use headset_detect::{
    new_callback, ButtonDefinition, DetectConfig, HeadsetDevice, IrqEvent, KeyCode,
};
use headset_events::{BroadcastSink, HeadsetEvent};
use headset_hal::sim::SimBoard;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("headset_detect=debug,headset_events=debug")
        .init();

    println!("=== Headset Plug Cycle ===");

    let sim = SimBoard::new();
    let sink = Arc::new(BroadcastSink::new(32));
    let mut events = sink.subscribe();

    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let payload = match event.payload() {
                Ok(payload) => payload,
                Err(err) => {
                    eprintln!("[{}] unserializable event: {}", event.topic(), err);
                    continue;
                }
            };
            match event {
                HeadsetEvent::Plug { state } => {
                    println!("[{}] {} (switch code {})", event.topic(), payload, state.code())
                }
                HeadsetEvent::Key { code, down } => {
                    println!(
                        "[{}] {} {} {}",
                        event.topic(),
                        code,
                        if down { "down" } else { "up" },
                        payload
                    )
                }
            }
        }
    });

    let config = DetectConfig {
        timer_period_ms: 100,
        ..DetectConfig::default()
    };
    let device = HeadsetDevice::builder(sim.board())
        .config(config)
        .plug_sink(sink.clone())
        .key_sink(sink.clone())
        .buttons(vec![
            ButtonDefinition::new(0, 500, KeyCode::MEDIA),
            ButtonDefinition::new(500, 1000, KeyCode::VOLUMEUP),
            ButtonDefinition::new(1000, 2000, KeyCode::VOLUMEDOWN),
        ])
        .build()?;

    device.subscribe(new_callback(|level, snapshot| {
        println!("[hub]  raw level {} (was {:?})", level, snapshot.plug_state);
    }));

    println!("\nInserting a standard headset...");
    sim.set_adc(250, 3000);
    sim.plug(true);
    device.handle_irq(IrqEvent::DetectEdge);
    tokio::time::sleep(Duration::from_millis(400)).await;
    println!("state: {:?} / {:?}", device.plug_state(), device.headset_type());

    println!("\nPressing the media button...");
    sim.set_button(true);
    device.handle_irq(IrqEvent::ButtonEdge);
    tokio::time::sleep(Duration::from_millis(300)).await;

    println!("\nUnplugging with the button still held...");
    sim.plug(false);
    device.handle_irq(IrqEvent::DetectEdge);
    tokio::time::sleep(Duration::from_millis(400)).await;

    println!("\nstats: {}", serde_json::to_string(&device.stats())?);

    device.shutdown();
    drop(device);
    drop(sink);
    printer.await?;

    println!("\nDone.");
    Ok(())
}
