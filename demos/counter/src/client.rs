//! Counter client.
//!
//! Connects, logs every state change and tick, bumps the counter a few
//! times, then disconnects.

use clap::Parser;
use serde_json::json;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uiport_client::Client;
use uiport_demo_counter::protocol::{CounterState, ENDPOINT, INCREMENT, TICK, Tick};
use uiport_ws::WsConnector;

#[derive(Parser, Debug)]
#[command(name = "counter-client")]
#[command(about = "Mirror and bump a shared counter")]
struct Args {
    /// Server URL, without the endpoint path
    #[arg(long, env = "UIPORT_URL", default_value = "ws://127.0.0.1:8080")]
    url: String,

    /// Amount to add per increment
    #[arg(long, default_value_t = 1)]
    by: i64,

    /// Number of increments
    #[arg(long, default_value_t = 3)]
    times: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("counter_client=info".parse()?))
        .init();

    let args = Args::parse();
    let client = Client::new(ENDPOINT, WsConnector::new(args.url));

    client.add_listener(|state| match state.to_typed::<CounterState>() {
        Ok(counter) => tracing::info!(count = counter.count, last = ?counter.last_action, "State"),
        Err(e) => tracing::warn!("Unexpected state: {}", e),
    });
    client.add_directive_listener(TICK, |payload| {
        match serde_json::from_value::<Tick>(payload.clone()) {
            Ok(tick) => tracing::info!(seq = tick.seq, at = tick.at, "Tick"),
            Err(e) => tracing::warn!("Malformed tick: {}", e),
        }
    });

    let initial: CounterState = client.connect().await?.to_typed()?;
    tracing::info!(count = initial.count, "Connected");

    let increment = client.actions().get(INCREMENT);
    for _ in 0..args.times {
        let count: i64 = increment.call_as(vec![json!(args.by)]).await?;
        tracing::info!(count, "Incremented");
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    client.disconnect()?;
    Ok(())
}
