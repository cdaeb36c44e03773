// Producer on one device, consumer on another, ordered by an event.
//
//   RUST_LOG=ferrox_streams=trace cargo run --example cross_device
//   FERROX_BACKEND=cuda cargo run --features cuda --example cross_device
use ferrox_streams::{Event, Runtime, RuntimeConfig, StreamGuard};
use tracing_subscriber::EnvFilter;

fn main() -> ferrox_streams::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let runtime = Runtime::from_config(&RuntimeConfig::from_env()?)?;
    println!("{:?}", runtime);

    let last = runtime.device_count().saturating_sub(1);
    let producer = runtime.acquire_stream(Some(last), true)?;
    let consumer = runtime.acquire_stream(Some(0), false)?;

    let mut ready = Event::new();
    {
        let _guard = StreamGuard::with_stream(&producer)?;
        println!("Producing on {}", runtime.current_stream(None)?);
        ready.record(&producer)?;
    }

    consumer.synchronize_with(&ready)?;
    consumer.synchronize()?;
    println!(
        "Consumer on {} done, event happened: {}",
        consumer,
        ready.happened()?
    );

    for device in 0..runtime.device_count() {
        println!("{}", runtime.pool_stats(device)?);
    }
    Ok(())
}
