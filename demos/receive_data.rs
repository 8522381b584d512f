//! Receive a stream and print its samples with clock-corrected timestamps
//!
//! Run with: cargo run --example receive_data [TYPE]
//!
//! Waits for the first stream of the given type (default "EEG"), prints its
//! full description, then prints samples until Ctrl+C.

use std::time::Duration;

use labstream::{
    resolve_by_property, BufferLength, Config, Context, PostProcessing, StreamInlet, FOREVER,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let stream_type = std::env::args().nth(1).unwrap_or_else(|| "EEG".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("labstream=info".parse()?)
                .add_directive("receive_data=debug".parse()?),
        )
        .init();

    let ctx = Context::new(Config::default())?;
    println!("Looking for a stream of type {}...", stream_type);
    let streams = resolve_by_property(&ctx, "type", &stream_type, 1, 1, FOREVER).await?;
    let Some(info) = streams.first() else {
        return Err("no stream found".into());
    };

    let inlet = StreamInlet::new(&ctx, info, BufferLength::default(), 0, true)?;
    inlet.open_stream(Duration::from_secs(5)).await?;
    inlet.set_postprocessing(PostProcessing::CLOCKSYNC | PostProcessing::DEJITTER)?;

    let full = inlet.info(Duration::from_secs(5)).await?;
    println!("{}", full.to_xml()?);

    let offset = inlet.time_correction(Duration::from_secs(5)).await?;
    println!("Clock offset: {:.6} s", offset);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut sample = vec![0.0f32; full.channel_count() as usize];
    loop {
        let timestamp = tokio::select! {
            pulled = inlet.pull_sample(&mut sample, Duration::from_secs(1)) => pulled?,
            _ = &mut shutdown => break,
        };
        if timestamp == 0.0 {
            continue;
        }
        if inlet.was_clock_reset() {
            println!("Source clock was reset");
        }
        println!("{:.5} {:?}", timestamp, sample);
    }

    let stats = inlet.stats();
    println!(
        "Stats: received={} dropped={} reconnects={}",
        stats.samples_received, stats.samples_dropped, stats.reconnects
    );
    Ok(())
}
