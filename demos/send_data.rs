//! Send a synthetic 8-channel EEG stream
//!
//! Run with: cargo run --example send_data [NAME] [TYPE] [SOURCE_ID]
//!
//! Examples:
//!   cargo run --example send_data                       # "BioSemi" / "EEG"
//!   cargo run --example send_data Gaze EyeTracking t1   # custom identity
//!
//! Pair with `receive_data` on the same or another host.

use std::time::Duration;

use labstream::{BufferLength, ChannelFormat, Config, Context, StreamInfo, StreamOutlet};

const CHANNELS: usize = 8;
const SRATE: f64 = 100.0;

fn print_usage() {
    println!("Usage: send_data [NAME] [TYPE] [SOURCE_ID]");
    println!();
    println!("Streams {} channels of float32 at {} Hz until Ctrl+C.", CHANNELS, SRATE);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }
    let name = args.get(1).map(String::as_str).unwrap_or("BioSemi");
    let stream_type = args.get(2).map(String::as_str).unwrap_or("EEG");
    let source_id = args.get(3).map(String::as_str).unwrap_or("myuid34234");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("labstream=debug".parse()?)
                .add_directive("send_data=debug".parse()?),
        )
        .init();

    let ctx = Context::new(Config::default())?;
    let info = StreamInfo::new(
        name,
        stream_type,
        CHANNELS as u32,
        SRATE,
        ChannelFormat::Float32,
        source_id,
    )?;

    let channels = info.desc().append_child("channels");
    for label in ["C3", "C4", "Cz", "FPz", "POz", "CPz", "O1", "O2"] {
        channels
            .append_child("channel")
            .append_child_value("label", label)
            .append_child_value("unit", "microvolts")
            .append_child_value("type", "EEG");
    }
    info.desc().append_child_value("manufacturer", "SCCN");

    let outlet = StreamOutlet::new(&ctx, &info, 0, BufferLength::default()).await?;
    println!("Now sending data on {} ({})", outlet.info(), outlet.info().uid());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / SRATE));
    let mut n: u64 = 0;
    let mut sample = [0.0f32; CHANNELS];
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for (c, v) in sample.iter_mut().enumerate() {
                    *v = ((n as f64 / SRATE) * (c + 1) as f64 * std::f64::consts::TAU).sin() as f32;
                }
                outlet.push_sample(&sample)?;
                n += 1;
                if n % (SRATE as u64 * 5) == 0 {
                    let stats = outlet.stats();
                    println!(
                        "Stats: pushed={} dropped={} consumers={}",
                        stats.samples_pushed, stats.samples_dropped, stats.consumers
                    );
                }
            }
            _ = &mut shutdown => {
                println!("Shutting down");
                break;
            }
        }
    }

    outlet.close();
    Ok(())
}
