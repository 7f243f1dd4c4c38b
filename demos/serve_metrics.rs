//! Serve Metrics Example
//!
//! Starts an exposition listener and updates a few instruments the way a
//! native host would: through handles only.
//!
//! Run: cargo run --example serve_metrics -- --listen 127.0.0.1:9100 --seconds 30
//! Then: curl http://127.0.0.1:9100/metrics

use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use prom_bridge::{BridgeArgs, BridgeBuilder};

#[derive(Parser, Debug)]
#[command(about = "Serve bridge instruments over HTTP")]
struct Args {
    /// Address to serve on
    #[arg(long, default_value = "127.0.0.1:9100")]
    listen: String,

    /// How long to keep updating instruments
    #[arg(long, default_value_t = 30)]
    seconds: u64,

    #[command(flatten)]
    bridge: BridgeArgs,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let bridge = BridgeBuilder::new()
        .env_prefix("PROM_BRIDGE")
        .namespace("demo")
        .self_metrics(true)
        .with_cli_args(&args.bridge)
        .build()?;

    let addr = bridge.start_exposition(&args.listen, "")?;
    println!(
        "Serving on http://{}{}",
        addr,
        bridge.config().metrics_path
    );

    let in_flight = bridge.new_gauge("in_flight", "Requests in flight")?;
    let requests = bridge.new_counter_vec(
        "requests_total",
        "Requests by route and status",
        vec!["route".into(), "code".into()],
    )?;
    let latency = bridge.new_summary_vec(
        "request_seconds",
        "Request latency",
        &[0.5, 0.9, 0.99],
        &[0.05, 0.01, 0.001],
        60,
        3,
        vec!["route".into()],
    )?;

    let routes = ["/", "/login", "/search"];
    let start = Instant::now();
    let mut tick = 0u64;

    while start.elapsed() < Duration::from_secs(args.seconds) {
        tick += 1;
        let route = routes[(tick % routes.len() as u64) as usize].to_string();
        let code = String::from(if tick % 17 == 0 { "500" } else { "200" });

        bridge.gauge_add(in_flight, 1.0)?;

        let served = bridge.counter_with_label_values(requests, &[route.clone(), code])?;
        bridge.counter_add(served, 1.0)?;

        // Fake latency: a slow tail every tenth request
        let base = if tick % 10 == 0 { 0.5 } else { 0.01 };
        let seconds = base * (1 + tick % 5) as f64;
        let observed = bridge.summary_with_label_values(latency, &[route])?;
        bridge.summary_observe(observed, seconds)?;

        bridge.gauge_sub(in_flight, 1.0)?;
        thread::sleep(Duration::from_millis(50));
    }

    // Drop one series to show deletion
    bridge.summary_delete_label_values(latency, &["/search".to_string()])?;
    println!("Done after {} updates", tick);
    Ok(())
}
